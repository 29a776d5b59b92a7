//! Vectorized expression evaluation over a morsel.
//!
//! Every node evaluates to a single Arrow array the length of the input
//! morsel's physical row count. Null propagation follows Arrow's own
//! Kleene-logic kernels for boolean combinators and comparisons, which is
//! exactly the three-valued logic spec'd for `AND`/`OR`/comparisons — the
//! teacher crate's `query/executor.rs` hand-rolls per-type comparison masks
//! for a handful of numeric types; this module generalizes that into a
//! typed tree evaluated once per node via `arrow::compute` kernels instead
//! of one function per Arrow type.

pub mod function;

use arrow::array::{
    Array, ArrayRef, BooleanArray, Date32Array, Float32Array, Float64Array, Int32Array,
    Int64Array, StringArray, TimestampNanosecondArray,
};
use arrow::compute::kernels::{boolean, cmp, numeric, zip::zip};
use arrow::datatypes::DataType;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::morsel::Morsel;

/// A literal scalar value, used for [`Expr::Literal`] and comparisons
/// against constants.
#[derive(Debug, Clone, PartialEq)]
pub enum ScalarValue {
    /// SQL NULL, typed by context.
    Null,
    /// Boolean literal.
    Boolean(bool),
    /// 32-bit integer literal.
    Int32(i32),
    /// 64-bit integer literal.
    Int64(i64),
    /// 32-bit float literal.
    Float32(f32),
    /// 64-bit float literal.
    Float64(f64),
    /// UTF-8 string literal.
    Utf8(String),
    /// Days since the Unix epoch (`arrow::datatypes::DataType::Date32`).
    Date32(i32),
    /// Nanoseconds since the Unix epoch (timestamp-nanos, no timezone).
    TimestampNanos(i64),
}

impl ScalarValue {
    fn to_array(&self, len: usize) -> ArrayRef {
        match self {
            Self::Null => Arc::new(arrow::array::NullArray::new(len)) as ArrayRef,
            Self::Boolean(v) => Arc::new(BooleanArray::from(vec![*v; len])),
            Self::Int32(v) => Arc::new(Int32Array::from(vec![*v; len])),
            Self::Int64(v) => Arc::new(Int64Array::from(vec![*v; len])),
            Self::Float32(v) => Arc::new(Float32Array::from(vec![*v; len])),
            Self::Float64(v) => Arc::new(Float64Array::from(vec![*v; len])),
            Self::Utf8(v) => Arc::new(StringArray::from(vec![v.as_str(); len])),
            Self::Date32(v) => Arc::new(Date32Array::from(vec![*v; len])),
            Self::TimestampNanos(v) => Arc::new(TimestampNanosecondArray::from(vec![*v; len])),
        }
    }

    /// Parse a `DATE 'YYYY-MM-DD'` literal into a [`ScalarValue::Date32`].
    ///
    /// Errors with [`Error::UnparseableDate`] rather than panicking, per the
    /// `ValueError` taxonomy (spec.md §7): a malformed date literal is a
    /// query-time error, not a crate bug.
    pub fn date32_from_str(s: &str) -> Result<Self> {
        let date = chrono::NaiveDate::parse_from_str(s, "%Y-%m-%d")
            .map_err(|e| Error::UnparseableDate(format!("{s}: {e}")))?;
        let epoch = chrono::NaiveDate::from_ymd_opt(1970, 1, 1)
            .expect("1970-01-01 is a valid calendar date");
        let days = (date - epoch).num_days();
        Ok(Self::Date32(days as i32))
    }

    /// Parse a `TIMESTAMP 'YYYY-MM-DD HH:MM:SS[.fraction]'` literal into a
    /// [`ScalarValue::TimestampNanos`].
    pub fn timestamp_from_str(s: &str) -> Result<Self> {
        let parsed = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f")
            .or_else(|_| chrono::NaiveDate::parse_from_str(s, "%Y-%m-%d").map(|d| d.and_hms_opt(0, 0, 0).expect("midnight is valid")))
            .map_err(|e| Error::UnparseableDate(format!("{s}: {e}")))?;
        Ok(Self::TimestampNanos(
            parsed.and_utc().timestamp_nanos_opt().ok_or_else(|| {
                Error::UnparseableDate(format!("{s}: outside the representable timestamp-nanos range"))
            })?,
        ))
    }
}

/// Unary expression operator kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    /// Boolean negation (three-valued: `NOT NULL = NULL`).
    Not,
    /// Arithmetic negation.
    Neg,
    /// `IS NULL`.
    IsNull,
    /// `IS NOT NULL`.
    IsNotNull,
}

/// Binary expression operator kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    /// Addition.
    Add,
    /// Subtraction.
    Sub,
    /// Multiplication.
    Mul,
    /// Division.
    Div,
    /// Modulo.
    Mod,
    /// Equality.
    Eq,
    /// Inequality.
    NotEq,
    /// Less than.
    Lt,
    /// Less than or equal.
    LtEq,
    /// Greater than.
    Gt,
    /// Greater than or equal.
    GtEq,
    /// Logical AND, three-valued.
    And,
    /// Logical OR, three-valued.
    Or,
    /// Pattern match, case-sensitive.
    Like,
    /// Pattern match, case-insensitive.
    ILike,
    /// Regular expression match.
    Regex,
    /// String concatenation.
    Concat,
}

/// An expression tree node, evaluated against a morsel to produce one
/// column.
#[derive(Debug, Clone)]
pub enum Expr {
    /// A constant value, broadcast to the morsel's row count.
    Literal(ScalarValue),
    /// A reference to a column by its index in the morsel's schema.
    Column(usize),
    /// A unary operator applied to one child expression.
    Unary(UnaryOp, Box<Expr>),
    /// A binary operator applied to two child expressions.
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
    /// Set membership test: `expr IN (list…)`, optionally negated for
    /// `NOT IN`.
    InList {
        /// The expression being tested.
        expr: Box<Expr>,
        /// The candidate values.
        list: Vec<Expr>,
        /// True for `NOT IN`.
        negated: bool,
    },
    /// A call into the builtin function registry.
    FunctionCall {
        /// The function's registered name, case-insensitive.
        name: String,
        /// Evaluated argument expressions.
        args: Vec<Expr>,
    },
    /// `CASE WHEN cond THEN then … ELSE else END`. Earlier `WHEN` arms take
    /// precedence; an arm's `THEN` is only visible for rows not already
    /// assigned by an earlier arm.
    Case {
        /// `(condition, result)` pairs, in evaluation-precedence order.
        when_then: Vec<(Expr, Expr)>,
        /// Fallback expression; `NULL` of an unspecified type if absent.
        else_expr: Option<Box<Expr>>,
    },
}

impl Expr {
    /// Evaluate this expression over `morsel`, returning one Arrow array
    /// with `morsel.physical_row_count()` elements.
    ///
    /// # Errors
    /// Returns [`Error::TypeError`] on an unsupported operand type combination,
    /// [`Error::Overflow`]/[`Error::DivisionByZero`] on arithmetic failures,
    /// [`Error::RegexCompile`] on a bad pattern, or [`Error::UnknownFunction`]
    /// for an unregistered function name.
    pub fn evaluate(&self, morsel: &Morsel) -> Result<ArrayRef> {
        match self {
            Self::Literal(value) => Ok(value.to_array(morsel.physical_row_count())),
            Self::Column(index) => Ok(Arc::clone(morsel.column(*index))),
            Self::Unary(op, child) => evaluate_unary(*op, &child.evaluate(morsel)?),
            Self::Binary(op, left, right) => {
                evaluate_binary(*op, &left.evaluate(morsel)?, &right.evaluate(morsel)?)
            }
            Self::InList {
                expr,
                list,
                negated,
            } => evaluate_in_list(&expr.evaluate(morsel)?, list, *negated, morsel),
            Self::FunctionCall { name, args } => {
                let evaluated: Result<Vec<ArrayRef>> =
                    args.iter().map(|a| a.evaluate(morsel)).collect();
                function::call(name, &evaluated?)
            }
            Self::Case {
                when_then,
                else_expr,
            } => evaluate_case(when_then, else_expr.as_deref(), morsel),
        }
    }
}

fn evaluate_unary(op: UnaryOp, input: &ArrayRef) -> Result<ArrayRef> {
    match op {
        UnaryOp::Not => {
            let bools = as_boolean(input)?;
            Ok(Arc::new(boolean::not(bools)?))
        }
        UnaryOp::Neg => negate_numeric(input),
        UnaryOp::IsNull => Ok(Arc::new(arrow::compute::is_null(input.as_ref())?)),
        UnaryOp::IsNotNull => Ok(Arc::new(arrow::compute::is_not_null(input.as_ref())?)),
    }
}

fn negate_numeric(input: &ArrayRef) -> Result<ArrayRef> {
    match input.data_type() {
        DataType::Int32 | DataType::Int64 | DataType::Float32 | DataType::Float64 => {
            let zero = arrow::array::Scalar::new(match input.data_type() {
                DataType::Int32 => Arc::new(Int32Array::from(vec![0])) as ArrayRef,
                DataType::Int64 => Arc::new(Int64Array::from(vec![0_i64])) as ArrayRef,
                DataType::Float32 => Arc::new(Float32Array::from(vec![0.0_f32])) as ArrayRef,
                _ => Arc::new(Float64Array::from(vec![0.0_f64])) as ArrayRef,
            });
            Ok(numeric::sub(&zero, input)?)
        }
        other => Err(Error::TypeError(format!("cannot negate {other:?}"))),
    }
}

fn evaluate_binary(op: BinaryOp, left: &ArrayRef, right: &ArrayRef) -> Result<ArrayRef> {
    match op {
        BinaryOp::Add => Ok(numeric::add(left, right)?),
        BinaryOp::Sub => Ok(numeric::sub(left, right)?),
        BinaryOp::Mul => Ok(numeric::mul(left, right)?),
        BinaryOp::Div => checked_div(left, right),
        BinaryOp::Mod => checked_rem(left, right),
        BinaryOp::Eq => Ok(Arc::new(cmp::eq(left, right)?)),
        BinaryOp::NotEq => Ok(Arc::new(cmp::neq(left, right)?)),
        BinaryOp::Lt => Ok(Arc::new(cmp::lt(left, right)?)),
        BinaryOp::LtEq => Ok(Arc::new(cmp::lt_eq(left, right)?)),
        BinaryOp::Gt => Ok(Arc::new(cmp::gt(left, right)?)),
        BinaryOp::GtEq => Ok(Arc::new(cmp::gt_eq(left, right)?)),
        BinaryOp::And => Ok(Arc::new(boolean::and_kleene(
            as_boolean(left)?,
            as_boolean(right)?,
        )?)),
        BinaryOp::Or => Ok(Arc::new(boolean::or_kleene(
            as_boolean(left)?,
            as_boolean(right)?,
        )?)),
        BinaryOp::Like => evaluate_pattern(left, right, PatternMode::Like),
        BinaryOp::ILike => evaluate_pattern(left, right, PatternMode::ILike),
        BinaryOp::Regex => evaluate_pattern(left, right, PatternMode::Regex),
        BinaryOp::Concat => concat_strings(left, right),
    }
}

fn as_boolean(array: &ArrayRef) -> Result<&BooleanArray> {
    array
        .as_any()
        .downcast_ref::<BooleanArray>()
        .ok_or_else(|| Error::TypeError(format!("expected boolean, got {:?}", array.data_type())))
}

/// Integer division/modulo null out a row on a zero divisor rather than
/// failing the whole column, matching spec.md §4.2's SQL default
/// (row-level null; a caller wanting the fatal "strict mode" variant can
/// inspect the output for unexpected nulls and raise `DivisionByZero`
/// itself, since the per-row decision lives above the vectorized
/// evaluator). Float division follows IEEE-754 (zero divisor yields `inf`/
/// `NaN`, not an error), so it's left to `arrow`'s own kernel.
fn checked_div(left: &ArrayRef, right: &ArrayRef) -> Result<ArrayRef> {
    match left.data_type() {
        DataType::Int32 | DataType::Int64 => int_div_rem(left, right, IntOp::Div),
        _ => numeric::div(left, right).map_err(|e| Error::Overflow(e.to_string())),
    }
}

fn checked_rem(left: &ArrayRef, right: &ArrayRef) -> Result<ArrayRef> {
    match left.data_type() {
        DataType::Int32 | DataType::Int64 => int_div_rem(left, right, IntOp::Rem),
        _ => numeric::rem(left, right).map_err(|e| Error::Overflow(e.to_string())),
    }
}

#[derive(Clone, Copy)]
enum IntOp {
    Div,
    Rem,
}

fn int_div_rem(left: &ArrayRef, right: &ArrayRef, op: IntOp) -> Result<ArrayRef> {
    match (left.data_type(), right.data_type()) {
        (DataType::Int64, _) | (_, DataType::Int64) => {
            let l = coerce_to_i64(left)?;
            let r = coerce_to_i64(right)?;
            let mut builder = arrow::array::Int64Builder::with_capacity(l.len());
            for i in 0..l.len() {
                if l.is_null(i) || r.is_null(i) {
                    builder.append_null();
                    continue;
                }
                let (a, b) = (l.value(i), r.value(i));
                if b == 0 {
                    builder.append_null();
                    continue;
                }
                match op {
                    IntOp::Div => match a.checked_div(b) {
                        Some(v) => builder.append_value(v),
                        None => builder.append_null(),
                    },
                    IntOp::Rem => match a.checked_rem(b) {
                        Some(v) => builder.append_value(v),
                        None => builder.append_null(),
                    },
                }
            }
            Ok(Arc::new(builder.finish()))
        }
        _ => {
            let l = left
                .as_any()
                .downcast_ref::<Int32Array>()
                .ok_or_else(|| Error::TypeError("expected Int32".to_string()))?;
            let r = right
                .as_any()
                .downcast_ref::<Int32Array>()
                .ok_or_else(|| Error::TypeError("expected Int32".to_string()))?;
            let mut builder = arrow::array::Int32Builder::with_capacity(l.len());
            for i in 0..l.len() {
                if l.is_null(i) || r.is_null(i) {
                    builder.append_null();
                    continue;
                }
                let (a, b) = (l.value(i), r.value(i));
                if b == 0 {
                    builder.append_null();
                    continue;
                }
                match op {
                    IntOp::Div => match a.checked_div(b) {
                        Some(v) => builder.append_value(v),
                        None => builder.append_null(),
                    },
                    IntOp::Rem => match a.checked_rem(b) {
                        Some(v) => builder.append_value(v),
                        None => builder.append_null(),
                    },
                }
            }
            Ok(Arc::new(builder.finish()))
        }
    }
}

fn coerce_to_i64(array: &ArrayRef) -> Result<Int64Array> {
    if let Some(a) = array.as_any().downcast_ref::<Int64Array>() {
        return Ok(a.clone());
    }
    if let Some(a) = array.as_any().downcast_ref::<Int32Array>() {
        return Ok(a.iter().map(|v| v.map(i64::from)).collect());
    }
    Err(Error::TypeError(format!(
        "expected an integer column, got {:?}",
        array.data_type()
    )))
}

enum PatternMode {
    Like,
    ILike,
    Regex,
}

fn evaluate_pattern(left: &ArrayRef, right: &ArrayRef, mode: PatternMode) -> Result<ArrayRef> {
    let haystacks = left
        .as_any()
        .downcast_ref::<StringArray>()
        .ok_or_else(|| Error::TypeError("LIKE/ILIKE/REGEX left operand must be Utf8".to_string()))?;
    let patterns = right
        .as_any()
        .downcast_ref::<StringArray>()
        .ok_or_else(|| Error::TypeError("LIKE/ILIKE/REGEX right operand must be Utf8".to_string()))?;

    let mut builder = arrow::array::BooleanBuilder::with_capacity(haystacks.len());
    for i in 0..haystacks.len() {
        if haystacks.is_null(i) || patterns.is_null(i) {
            builder.append_null();
            continue;
        }
        let pattern = patterns.value(i);
        let regex = compile_pattern(pattern, &mode)?;
        builder.append_value(regex.is_match(haystacks.value(i)));
    }
    Ok(Arc::new(builder.finish()))
}

fn compile_pattern(pattern: &str, mode: &PatternMode) -> Result<regex::Regex> {
    let source = match mode {
        PatternMode::Like => format!("(?s)^{}$", like_to_regex(pattern)),
        PatternMode::ILike => format!("(?is)^{}$", like_to_regex(pattern)),
        PatternMode::Regex => pattern.to_string(),
    };
    regex::Regex::new(&source).map_err(|e| Error::RegexCompile(e.to_string()))
}

/// Translate a SQL `LIKE` pattern (`%` = any run, `_` = one char) into an
/// anchored regex fragment, escaping everything else literally.
fn like_to_regex(pattern: &str) -> String {
    let mut out = String::with_capacity(pattern.len() * 2);
    for c in pattern.chars() {
        match c {
            '%' => out.push_str(".*"),
            '_' => out.push('.'),
            _ => out.push_str(&regex::escape(&c.to_string())),
        }
    }
    out
}

fn concat_strings(left: &ArrayRef, right: &ArrayRef) -> Result<ArrayRef> {
    let left = left
        .as_any()
        .downcast_ref::<StringArray>()
        .ok_or_else(|| Error::TypeError("CONCAT operands must be Utf8".to_string()))?;
    let right = right
        .as_any()
        .downcast_ref::<StringArray>()
        .ok_or_else(|| Error::TypeError("CONCAT operands must be Utf8".to_string()))?;

    let mut builder = arrow::array::StringBuilder::with_capacity(left.len(), left.len() * 8);
    for i in 0..left.len() {
        if left.is_null(i) || right.is_null(i) {
            builder.append_null();
        } else {
            builder.append_value(format!("{}{}", left.value(i), right.value(i)));
        }
    }
    Ok(Arc::new(builder.finish()))
}

fn evaluate_in_list(
    haystack: &ArrayRef,
    list: &[Expr],
    negated: bool,
    morsel: &Morsel,
) -> Result<ArrayRef> {
    let candidates: Result<Vec<ArrayRef>> = list.iter().map(|e| e.evaluate(morsel)).collect();
    let candidates = candidates?;

    let mut membership: Option<BooleanArray> = None;
    for candidate in &candidates {
        let eq = cmp::eq(haystack, candidate)?;
        membership = Some(match membership {
            None => eq,
            Some(acc) => boolean::or_kleene(&acc, &eq)?,
        });
    }

    let result = membership.unwrap_or_else(|| BooleanArray::from(vec![false; haystack.len()]));
    if negated {
        Ok(Arc::new(boolean::not(&result)?))
    } else {
        Ok(Arc::new(result))
    }
}

fn evaluate_case(
    when_then: &[(Expr, Expr)],
    else_expr: Option<&Expr>,
    morsel: &Morsel,
) -> Result<ArrayRef> {
    let row_count = morsel.physical_row_count();
    let mut result = match else_expr {
        Some(expr) => expr.evaluate(morsel)?,
        None => ScalarValue::Null.to_array(row_count),
    };

    // Process arms in reverse so the final `zip` pass leaves the
    // first-matching arm's value in place (later zips overwrite earlier
    // ones only where their own condition is true).
    for (condition, then) in when_then.iter().rev() {
        let mask = condition.evaluate(morsel)?;
        let mask = as_boolean(&mask)?;
        let then_values = then.evaluate(morsel)?;
        result = zip(mask, &then_values, &result)?;
    }

    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::SchemaRef;
    use arrow::datatypes::{Field, Schema};

    fn int_morsel(values: Vec<Option<i32>>) -> Morsel {
        let schema: SchemaRef = Arc::new(Schema::new(vec![Field::new(
            "v",
            DataType::Int32,
            true,
        )]));
        Morsel::new(schema, vec![Arc::new(Int32Array::from(values))]).unwrap()
    }

    #[test]
    fn three_valued_and_or() {
        let m = int_morsel(vec![Some(1)]);
        let t = Expr::Literal(ScalarValue::Boolean(true));
        let f = Expr::Literal(ScalarValue::Boolean(false));
        let n = Expr::Literal(ScalarValue::Null);

        let and_nf = Expr::Binary(BinaryOp::And, Box::new(n.clone()), Box::new(f.clone()))
            .evaluate(&m)
            .unwrap();
        let and_nf = and_nf.as_any().downcast_ref::<BooleanArray>().unwrap();
        assert!(!and_nf.is_null(0));
        assert!(!and_nf.value(0));

        let or_nt = Expr::Binary(BinaryOp::Or, Box::new(n.clone()), Box::new(t.clone()))
            .evaluate(&m)
            .unwrap();
        let or_nt = or_nt.as_any().downcast_ref::<BooleanArray>().unwrap();
        assert!(!or_nt.is_null(0));
        assert!(or_nt.value(0));

        let and_nt = Expr::Binary(BinaryOp::And, Box::new(n.clone()), Box::new(t))
            .evaluate(&m)
            .unwrap();
        let and_nt = and_nt.as_any().downcast_ref::<BooleanArray>().unwrap();
        assert!(and_nt.is_null(0));
    }

    #[test]
    fn division_by_zero_yields_null_per_row() {
        let m = int_morsel(vec![Some(10), Some(20)]);
        let expr = Expr::Binary(
            BinaryOp::Div,
            Box::new(Expr::Column(0)),
            Box::new(Expr::Literal(ScalarValue::Int32(0))),
        );
        let result = expr.evaluate(&m).unwrap();
        let result = result.as_any().downcast_ref::<Int32Array>().unwrap();
        assert!(result.is_null(0));
        assert!(result.is_null(1));
    }

    #[test]
    fn division_by_nonzero_computes_normally() {
        let m = int_morsel(vec![Some(10)]);
        let expr = Expr::Binary(
            BinaryOp::Div,
            Box::new(Expr::Column(0)),
            Box::new(Expr::Literal(ScalarValue::Int32(2))),
        );
        let result = expr.evaluate(&m).unwrap();
        let result = result.as_any().downcast_ref::<Int32Array>().unwrap();
        assert_eq!(result.value(0), 5);
    }

    #[test]
    fn like_pattern_matches() {
        let schema: SchemaRef = Arc::new(Schema::new(vec![Field::new(
            "name",
            DataType::Utf8,
            true,
        )]));
        let m = Morsel::new(
            schema,
            vec![Arc::new(StringArray::from(vec![
                Some("hello"),
                Some("world"),
                None,
            ]))],
        )
        .unwrap();
        let expr = Expr::Binary(
            BinaryOp::Like,
            Box::new(Expr::Column(0)),
            Box::new(Expr::Literal(ScalarValue::Utf8("h_llo".to_string()))),
        );
        let result = expr.evaluate(&m).unwrap();
        let result = result.as_any().downcast_ref::<BooleanArray>().unwrap();
        assert!(result.value(0));
        assert!(!result.value(1));
        assert!(result.is_null(2));
    }

    #[test]
    fn case_first_match_wins() {
        let m = int_morsel(vec![Some(1), Some(2), Some(3)]);
        let expr = Expr::Case {
            when_then: vec![
                (
                    Expr::Binary(
                        BinaryOp::Lt,
                        Box::new(Expr::Column(0)),
                        Box::new(Expr::Literal(ScalarValue::Int32(2))),
                    ),
                    Expr::Literal(ScalarValue::Utf8("small".to_string())),
                ),
                (
                    Expr::Binary(
                        BinaryOp::Lt,
                        Box::new(Expr::Column(0)),
                        Box::new(Expr::Literal(ScalarValue::Int32(3))),
                    ),
                    Expr::Literal(ScalarValue::Utf8("medium".to_string())),
                ),
            ],
            else_expr: Some(Box::new(Expr::Literal(ScalarValue::Utf8(
                "large".to_string(),
            )))),
        };
        let result = expr.evaluate(&m).unwrap();
        let result = result.as_any().downcast_ref::<StringArray>().unwrap();
        assert_eq!(result.value(0), "small");
        assert_eq!(result.value(1), "medium");
        assert_eq!(result.value(2), "large");
    }

    #[test]
    fn in_list_membership() {
        let m = int_morsel(vec![Some(1), Some(2), Some(3)]);
        let expr = Expr::InList {
            expr: Box::new(Expr::Column(0)),
            list: vec![
                Expr::Literal(ScalarValue::Int32(1)),
                Expr::Literal(ScalarValue::Int32(3)),
            ],
            negated: false,
        };
        let result = expr.evaluate(&m).unwrap();
        let result = result.as_any().downcast_ref::<BooleanArray>().unwrap();
        assert!(result.value(0));
        assert!(!result.value(1));
        assert!(result.value(2));
    }

    #[test]
    fn nan_is_not_ordered() {
        let schema: SchemaRef = Arc::new(Schema::new(vec![Field::new(
            "v",
            DataType::Float64,
            false,
        )]));
        let m = Morsel::new(schema, vec![Arc::new(Float64Array::from(vec![f64::NAN]))]).unwrap();
        let expr = Expr::Binary(
            BinaryOp::Eq,
            Box::new(Expr::Column(0)),
            Box::new(Expr::Column(0)),
        );
        let result = expr.evaluate(&m).unwrap();
        let result = result.as_any().downcast_ref::<BooleanArray>().unwrap();
        assert!(!result.value(0));
    }
}
