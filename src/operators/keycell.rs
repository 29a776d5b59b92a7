//! A hashable, comparable projection of one row's key columns, used by
//! `Distinct`, grouped aggregation, and hash joins to dedupe/group/match
//! rows without pulling in a full `ScalarValue`-based comparison for every
//! join/group-by column type.

use arrow::array::Array;

use crate::error::{Error, Result};

/// One cell of a grouping/dedup/join key.
#[derive(PartialEq, Eq, Hash, Clone, Debug)]
pub enum KeyCell {
    /// SQL NULL.
    Null,
    /// Boolean value.
    Bool(bool),
    /// Any integer-typed value (`Int32`, `Int64`, `Date32`, timestamp-nanos),
    /// widened to `i64`. Safe because every key position draws from one
    /// Arrow column of one fixed type, so two cells are only ever compared
    /// positionally against each other, never across columns.
    Int(i64),
    /// `Float64`, compared by bit pattern (so `NaN` groups with other
    /// `NaN`s rather than comparing unequal to itself, which is the right
    /// behavior for grouping even though it differs from `=`).
    Bits(u64),
    /// `Float32`, kept distinct from `Bits` since a 32-bit and a 64-bit NaN
    /// bit pattern aren't comparable.
    Bits32(u32),
    /// UTF-8 string value.
    Str(String),
    /// Binary value.
    Bytes(Vec<u8>),
    /// `Decimal128(p, s)` value, compared on its unscaled `i128`.
    Decimal(i128),
}

/// Extract the grouping/dedup/join key cell for one row of one column.
///
/// # Errors
/// Returns [`Error::TypeError`] if `array`'s type isn't one of the key
/// types this crate knows how to hash and compare — silently collapsing an
/// unrecognized type to one constant cell would make every row with that
/// key type compare equal, which is a correctness bug, not a type error
/// worth swallowing.
pub fn key_cell(array: &dyn Array, row: usize) -> Result<KeyCell> {
    use arrow::array::{
        BinaryArray, BooleanArray, Date32Array, Decimal128Array, Float32Array, Float64Array,
        Int32Array, Int64Array, StringArray, TimestampNanosecondArray,
    };

    if array.is_null(row) {
        return Ok(KeyCell::Null);
    }
    if let Some(a) = array.as_any().downcast_ref::<BooleanArray>() {
        return Ok(KeyCell::Bool(a.value(row)));
    }
    if let Some(a) = array.as_any().downcast_ref::<Int32Array>() {
        return Ok(KeyCell::Int(i64::from(a.value(row))));
    }
    if let Some(a) = array.as_any().downcast_ref::<Int64Array>() {
        return Ok(KeyCell::Int(a.value(row)));
    }
    if let Some(a) = array.as_any().downcast_ref::<Date32Array>() {
        return Ok(KeyCell::Int(i64::from(a.value(row))));
    }
    if let Some(a) = array.as_any().downcast_ref::<TimestampNanosecondArray>() {
        return Ok(KeyCell::Int(a.value(row)));
    }
    if let Some(a) = array.as_any().downcast_ref::<Float64Array>() {
        return Ok(KeyCell::Bits(a.value(row).to_bits()));
    }
    if let Some(a) = array.as_any().downcast_ref::<Float32Array>() {
        return Ok(KeyCell::Bits32(a.value(row).to_bits()));
    }
    if let Some(a) = array.as_any().downcast_ref::<Decimal128Array>() {
        return Ok(KeyCell::Decimal(a.value(row)));
    }
    if let Some(a) = array.as_any().downcast_ref::<StringArray>() {
        return Ok(KeyCell::Str(a.value(row).to_string()));
    }
    if let Some(a) = array.as_any().downcast_ref::<BinaryArray>() {
        return Ok(KeyCell::Bytes(a.value(row).to_vec()));
    }
    Err(Error::TypeError(format!(
        "unsupported join/group key column type: {:?}",
        array.data_type()
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::{Date32Array, Decimal128Array, Float32Array};

    #[test]
    fn float32_and_float64_do_not_collide() {
        let f32_col = Float32Array::from(vec![1.5f32]);
        let f64_col = arrow::array::Float64Array::from(vec![1.5f64]);
        assert_ne!(
            key_cell(&f32_col, 0).unwrap(),
            key_cell(&f64_col, 0).unwrap()
        );
    }

    #[test]
    fn date32_extracts_the_day_count() {
        let col = Date32Array::from(vec![19723]);
        assert_eq!(key_cell(&col, 0).unwrap(), KeyCell::Int(19723));
    }

    #[test]
    fn decimal_extracts_the_unscaled_value() {
        let col = Decimal128Array::from(vec![12345i128]);
        assert_eq!(key_cell(&col, 0).unwrap(), KeyCell::Decimal(12345));
    }

    #[test]
    fn unsupported_type_is_a_type_error_not_a_silent_null() {
        let list_col = arrow::array::ListArray::from_iter_primitive::<arrow::datatypes::Int32Type, _, _>(vec![
            Some(vec![Some(1)]),
        ]);
        let err = key_cell(&list_col, 0).unwrap_err();
        assert!(matches!(err, Error::TypeError(_)));
    }
}
