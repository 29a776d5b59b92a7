//! Builtin function registry for `Expr::FunctionCall`.
//!
//! A small, fixed set of scalar functions — the teacher crate has no
//! function registry of its own (its query layer only parses comparison
//! and aggregate expressions), so this is grounded on the shape of
//! `query/executor.rs`'s per-type dispatch, generalized into a name-keyed
//! table of `fn(&[ArrayRef]) -> Result<ArrayRef>` entries.

use arrow::array::{Array, ArrayRef, Float64Array, Int64Array, StringArray};
use std::sync::Arc;

use crate::error::{Error, Result};

/// Dispatch a function call by name (case-insensitive) to its
/// implementation.
///
/// # Errors
/// Returns [`Error::UnknownFunction`] if `name` is not registered, or
/// [`Error::TypeError`] if the arguments don't match the function's
/// expected arity/types.
pub fn call(name: &str, args: &[ArrayRef]) -> Result<ArrayRef> {
    match name.to_ascii_uppercase().as_str() {
        "ABS" => abs(args),
        "LENGTH" => length(args),
        "UPPER" => case_fold(args, str::to_uppercase),
        "LOWER" => case_fold(args, str::to_lowercase),
        "COALESCE" => coalesce(args),
        other => Err(Error::UnknownFunction(other.to_string())),
    }
}

fn one_arg<'a>(name: &str, args: &'a [ArrayRef]) -> Result<&'a ArrayRef> {
    args.first()
        .filter(|_| args.len() == 1)
        .ok_or_else(|| Error::TypeError(format!("{name} expects exactly one argument")))
}

fn abs(args: &[ArrayRef]) -> Result<ArrayRef> {
    let input = one_arg("ABS", args)?;
    if let Some(values) = input.as_any().downcast_ref::<Int64Array>() {
        let result: Int64Array = values
            .iter()
            .map(|v| v.map(i64::abs))
            .collect();
        return Ok(Arc::new(result));
    }
    if let Some(values) = input.as_any().downcast_ref::<Float64Array>() {
        let result: Float64Array = values.iter().map(|v| v.map(f64::abs)).collect();
        return Ok(Arc::new(result));
    }
    Err(Error::TypeError(format!(
        "ABS does not support {:?}",
        input.data_type()
    )))
}

fn length(args: &[ArrayRef]) -> Result<ArrayRef> {
    let input = one_arg("LENGTH", args)?;
    let strings = input
        .as_any()
        .downcast_ref::<StringArray>()
        .ok_or_else(|| Error::TypeError("LENGTH expects Utf8".to_string()))?;
    let result: Int64Array = strings
        .iter()
        .map(|v| v.map(|s| s.chars().count() as i64))
        .collect();
    Ok(Arc::new(result))
}

fn case_fold(args: &[ArrayRef], f: impl Fn(&str) -> String) -> Result<ArrayRef> {
    let input = one_arg("UPPER/LOWER", args)?;
    let strings = input
        .as_any()
        .downcast_ref::<StringArray>()
        .ok_or_else(|| Error::TypeError("UPPER/LOWER expects Utf8".to_string()))?;
    let result: StringArray = strings.iter().map(|v| v.map(&f)).collect();
    Ok(Arc::new(result))
}

/// Returns the first non-null value across all arguments, row-wise.
fn coalesce(args: &[ArrayRef]) -> Result<ArrayRef> {
    if args.is_empty() {
        return Err(Error::TypeError(
            "COALESCE expects at least one argument".to_string(),
        ));
    }
    let expected_type = args[0].data_type();
    if let Some(mismatched) = args.iter().find(|a| a.data_type() != expected_type) {
        return Err(Error::TypeError(format!(
            "COALESCE arguments must share one type: expected {expected_type:?}, found {:?}",
            mismatched.data_type()
        )));
    }

    let len = args[0].len();
    let mut indices: Vec<Option<(usize, usize)>> = vec![None; len];
    for (arg_idx, arg) in args.iter().enumerate() {
        for row in 0..len {
            if indices[row].is_none() && !arg.is_null(row) {
                indices[row] = Some((arg_idx, row));
            }
        }
    }

    match args[0].data_type() {
        arrow::datatypes::DataType::Int64 => {
            let mut builder = arrow::array::Int64Builder::with_capacity(len);
            for slot in &indices {
                match slot {
                    Some((arg_idx, row)) => {
                        let arr = args[*arg_idx].as_any().downcast_ref::<Int64Array>().unwrap();
                        builder.append_value(arr.value(*row));
                    }
                    None => builder.append_null(),
                }
            }
            Ok(Arc::new(builder.finish()))
        }
        arrow::datatypes::DataType::Utf8 => {
            let mut builder = arrow::array::StringBuilder::new();
            for slot in &indices {
                match slot {
                    Some((arg_idx, row)) => {
                        let arr = args[*arg_idx]
                            .as_any()
                            .downcast_ref::<StringArray>()
                            .unwrap();
                        builder.append_value(arr.value(*row));
                    }
                    None => builder.append_null(),
                }
            }
            Ok(Arc::new(builder.finish()))
        }
        other => Err(Error::TypeError(format!(
            "COALESCE does not support {other:?} in this registry"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_function_is_reported() {
        let err = call("NOT_A_FUNCTION", &[]).unwrap_err();
        assert!(matches!(err, Error::UnknownFunction(_)));
    }

    #[test]
    fn abs_handles_negative_and_null() {
        let input: ArrayRef = Arc::new(Int64Array::from(vec![Some(-5), None, Some(3)]));
        let result = call("ABS", &[input]).unwrap();
        let result = result.as_any().downcast_ref::<Int64Array>().unwrap();
        assert_eq!(result.value(0), 5);
        assert!(result.is_null(1));
        assert_eq!(result.value(2), 3);
    }

    #[test]
    fn upper_lower_round_trip() {
        let input: ArrayRef = Arc::new(StringArray::from(vec![Some("MiXeD")]));
        let upper = call("UPPER", &[Arc::clone(&input)]).unwrap();
        let upper = upper.as_any().downcast_ref::<StringArray>().unwrap();
        assert_eq!(upper.value(0), "MIXED");

        let lower = call("LOWER", &[input]).unwrap();
        let lower = lower.as_any().downcast_ref::<StringArray>().unwrap();
        assert_eq!(lower.value(0), "mixed");
    }

    #[test]
    fn coalesce_picks_first_non_null() {
        let a: ArrayRef = Arc::new(Int64Array::from(vec![None, Some(2)]));
        let b: ArrayRef = Arc::new(Int64Array::from(vec![Some(9), Some(9)]));
        let result = call("COALESCE", &[a, b]).unwrap();
        let result = result.as_any().downcast_ref::<Int64Array>().unwrap();
        assert_eq!(result.value(0), 9);
        assert_eq!(result.value(1), 2);
    }

    #[test]
    fn coalesce_rejects_mismatched_argument_types() {
        let a: ArrayRef = Arc::new(Int64Array::from(vec![None]));
        let b: ArrayRef = Arc::new(StringArray::from(vec![Some("x")]));
        let err = call("COALESCE", &[a, b]).unwrap_err();
        assert!(matches!(err, Error::TypeError(_)));
    }
}
