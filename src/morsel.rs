//! Morsels: columnar batches flowing between operators.
//!
//! A morsel owns its schema, its column arrays, and an optional
//! selection vector. It is immutable once built — the teacher crate's
//! `RecordBatch::slice`/`.clone()` usage in `storage::MorselIterator` and
//! `topk::build_batch_from_indices` is the precedent for "derive, never
//! mutate in place" that this module generalizes with an explicit
//! selection vector on top.

use arrow::array::{Array, ArrayRef, UInt32Array};
use arrow::compute;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::schema::SchemaRef;

/// A 64-bit logical row identifier: `(morsel_sequence << 32) | row_index`.
///
/// Lets joins and aggregations refer back to an input row without copying
/// it until the final gather.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RowId(u64);

impl RowId {
    /// Build a row id from a morsel sequence number and a row index within
    /// that morsel.
    #[must_use]
    pub const fn new(morsel_sequence: u32, row_index: u32) -> Self {
        Self(((morsel_sequence as u64) << 32) | (row_index as u64))
    }

    /// The morsel sequence number this row id was minted from.
    #[must_use]
    pub const fn morsel_sequence(self) -> u32 {
        (self.0 >> 32) as u32
    }

    /// The row index within its originating morsel.
    #[must_use]
    pub const fn row_index(self) -> u32 {
        (self.0 & 0xFFFF_FFFF) as u32
    }

    /// The raw packed 64-bit value.
    #[must_use]
    pub const fn raw(self) -> u64 {
        self.0
    }

    /// Reconstruct a `RowId` from its packed representation.
    #[must_use]
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }
}

/// Non-destructive row filter over a morsel: a strictly ascending list of
/// live row indices, each `< row_count`.
#[derive(Debug, Clone)]
pub struct SelectionVector(Arc<[u32]>);

impl SelectionVector {
    /// Build a selection vector, validating ascending order and range.
    ///
    /// # Errors
    /// Returns [`Error::InvalidInput`] if the indices are not strictly
    /// ascending or any index is out of range.
    pub fn new(indices: Vec<u32>, row_count: usize) -> Result<Self> {
        let mut prev: Option<u32> = None;
        for &idx in &indices {
            if (idx as usize) >= row_count {
                return Err(Error::InvalidInput(format!(
                    "selection index {idx} out of range for row_count {row_count}"
                )));
            }
            if let Some(p) = prev {
                if idx <= p {
                    return Err(Error::InvalidInput(
                        "selection vector must be strictly ascending".to_string(),
                    ));
                }
            }
            prev = Some(idx);
        }
        Ok(Self(indices.into()))
    }

    /// The number of live rows this selection keeps.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True if the selection keeps no rows.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Borrow the underlying indices.
    #[must_use]
    pub fn indices(&self) -> &[u32] {
        &self.0
    }
}

/// A columnar batch of rows flowing between operators: the unit of
/// streaming and scheduling.
#[derive(Debug, Clone)]
pub struct Morsel {
    schema: SchemaRef,
    columns: Vec<ArrayRef>,
    row_count: usize,
    selection: Option<SelectionVector>,
}

impl Morsel {
    /// Build a new morsel from a schema and matching column arrays.
    ///
    /// # Errors
    /// Returns [`Error::SchemaMismatch`] if the column count or any
    /// column's type or length disagrees with `schema`.
    pub fn new(schema: SchemaRef, columns: Vec<ArrayRef>) -> Result<Self> {
        if columns.len() != schema.fields().len() {
            return Err(Error::SchemaMismatch(format!(
                "schema has {} fields but {} columns were supplied",
                schema.fields().len(),
                columns.len()
            )));
        }

        let row_count = columns.first().map_or(0, |c| c.len());
        for (field, column) in schema.fields().iter().zip(&columns) {
            if column.len() != row_count {
                return Err(Error::SchemaMismatch(format!(
                    "column '{}' has length {} but expected {row_count}",
                    field.name(),
                    column.len()
                )));
            }
            if column.data_type() != field.data_type() {
                return Err(Error::SchemaMismatch(format!(
                    "column '{}' has type {:?} but schema declares {:?}",
                    field.name(),
                    column.data_type(),
                    field.data_type()
                )));
            }
        }

        Ok(Self {
            schema,
            columns,
            row_count,
            selection: None,
        })
    }

    /// Attach a non-destructive selection vector. Column lengths are never
    /// shortened; downstream operators honor the selection as the
    /// authoritative set of live rows.
    ///
    /// # Errors
    /// Propagates [`SelectionVector::new`]'s validation errors.
    pub fn with_selection(&self, indices: Vec<u32>) -> Result<Self> {
        let selection = SelectionVector::new(indices, self.row_count)?;
        Ok(Self {
            schema: Arc::clone(&self.schema),
            columns: self.columns.clone(),
            row_count: self.row_count,
            selection: Some(selection),
        })
    }

    /// Collapse the selection vector by copying only the live rows. The
    /// result carries no selection vector.
    ///
    /// # Errors
    /// Returns an error if the underlying Arrow `take` kernel fails.
    pub fn materialize(&self) -> Result<Self> {
        let Some(selection) = &self.selection else {
            return Ok(self.clone());
        };

        let take_indices = UInt32Array::from(selection.indices().to_vec());
        let mut new_columns = Vec::with_capacity(self.columns.len());
        for column in &self.columns {
            new_columns.push(compute::take(column.as_ref(), &take_indices, None)?);
        }

        Ok(Self {
            schema: Arc::clone(&self.schema),
            row_count: take_indices.len(),
            columns: new_columns,
            selection: None,
        })
    }

    /// Concatenate morsels that share a schema. Inputs carrying a selection
    /// vector are materialized first, since their underlying arrays have
    /// different lengths and can't be concatenated column-wise otherwise.
    ///
    /// # Errors
    /// Returns [`Error::SchemaMismatch`] if the inputs don't share a schema,
    /// or propagates an Arrow concat failure.
    pub fn concat(morsels: &[Self]) -> Result<Self> {
        if morsels.is_empty() {
            return Err(Error::InvalidInput(
                "concat requires at least one morsel".to_string(),
            ));
        }

        let schema = Arc::clone(&morsels[0].schema);
        let mut materialized = Vec::with_capacity(morsels.len());
        for morsel in morsels {
            if morsel.schema.as_ref() != schema.as_ref() {
                return Err(Error::SchemaMismatch(
                    "all morsels passed to concat must share a schema".to_string(),
                ));
            }
            materialized.push(morsel.materialize()?);
        }

        let mut new_columns: Vec<ArrayRef> = Vec::with_capacity(schema.fields().len());
        for col_idx in 0..schema.fields().len() {
            let arrays: Vec<&dyn Array> = materialized
                .iter()
                .map(|m| m.columns[col_idx].as_ref())
                .collect();
            new_columns.push(compute::concat(&arrays)?);
        }

        Self::new(schema, new_columns)
    }

    /// The morsel's schema.
    #[must_use]
    pub fn schema(&self) -> &SchemaRef {
        &self.schema
    }

    /// The logical row count: the number of live rows under the selection
    /// vector, or all rows if none is attached.
    #[must_use]
    pub fn row_count(&self) -> usize {
        self.selection.as_ref().map_or(self.row_count, SelectionVector::len)
    }

    /// The physical (underlying array) row count, ignoring selection.
    #[must_use]
    pub fn physical_row_count(&self) -> usize {
        self.row_count
    }

    /// Borrow a column by index (physical array, full length).
    #[must_use]
    pub fn column(&self, index: usize) -> &ArrayRef {
        &self.columns[index]
    }

    /// Borrow all columns (physical arrays, full length).
    #[must_use]
    pub fn columns(&self) -> &[ArrayRef] {
        &self.columns
    }

    /// The attached selection vector, if any.
    #[must_use]
    pub fn selection(&self) -> Option<&SelectionVector> {
        self.selection.as_ref()
    }

    /// Iterate the logical (live) row indices: either the selection's
    /// indices, or the full physical range.
    pub fn live_indices(&self) -> Box<dyn Iterator<Item = u32> + '_> {
        match &self.selection {
            Some(sel) => Box::new(sel.indices().iter().copied()),
            None => Box::new(0..self.row_count as u32),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::Int32Array;
    use arrow::datatypes::{DataType, Field, Schema};

    fn schema() -> SchemaRef {
        Arc::new(Schema::new(vec![Field::new("v", DataType::Int32, false)]))
    }

    fn morsel(values: Vec<i32>) -> Morsel {
        Morsel::new(schema(), vec![Arc::new(Int32Array::from(values))]).unwrap()
    }

    #[test]
    fn row_id_packs_and_unpacks() {
        let id = RowId::new(7, 42);
        assert_eq!(id.morsel_sequence(), 7);
        assert_eq!(id.row_index(), 42);
        assert_eq!(RowId::from_raw(id.raw()), id);
    }

    #[test]
    fn new_rejects_length_mismatch() {
        let schema = Arc::new(Schema::new(vec![
            Field::new("a", DataType::Int32, false),
            Field::new("b", DataType::Int32, false),
        ]));
        let cols: Vec<ArrayRef> = vec![
            Arc::new(Int32Array::from(vec![1, 2, 3])),
            Arc::new(Int32Array::from(vec![1, 2])),
        ];
        assert!(Morsel::new(schema, cols).is_err());
    }

    #[test]
    fn selection_must_be_ascending_and_in_range() {
        let m = morsel(vec![10, 20, 30]);
        assert!(m.with_selection(vec![0, 2]).is_ok());
        assert!(m.with_selection(vec![2, 0]).is_err());
        assert!(m.with_selection(vec![0, 0]).is_err());
        assert!(m.with_selection(vec![5]).is_err());
    }

    #[test]
    fn materialize_collapses_selection() {
        let m = morsel(vec![10, 20, 30, 40]).with_selection(vec![1, 3]).unwrap();
        assert_eq!(m.row_count(), 2);
        assert_eq!(m.physical_row_count(), 4);

        let materialized = m.materialize().unwrap();
        assert!(materialized.selection().is_none());
        assert_eq!(materialized.row_count(), 2);
        let values = materialized
            .column(0)
            .as_any()
            .downcast_ref::<Int32Array>()
            .unwrap();
        assert_eq!(values.values(), &[20, 40]);
    }

    #[test]
    fn materialize_is_idempotent() {
        let m = morsel(vec![1, 2, 3]).with_selection(vec![0, 2]).unwrap();
        let once = m.materialize().unwrap();
        let twice = once.materialize().unwrap();
        assert_eq!(once.row_count(), twice.row_count());
        let a = once.column(0).as_any().downcast_ref::<Int32Array>().unwrap();
        let b = twice.column(0).as_any().downcast_ref::<Int32Array>().unwrap();
        assert_eq!(a.values(), b.values());
    }

    #[test]
    fn concat_sums_row_counts() {
        let a = morsel(vec![1, 2]);
        let b = morsel(vec![3, 4, 5]);
        let combined = Morsel::concat(&[a, b]).unwrap();
        assert_eq!(combined.row_count(), 5);
        let values = combined
            .column(0)
            .as_any()
            .downcast_ref::<Int32Array>()
            .unwrap();
        assert_eq!(values.values(), &[1, 2, 3, 4, 5]);
    }

    #[test]
    fn concat_rejects_schema_mismatch() {
        let a = morsel(vec![1]);
        let other_schema = Arc::new(Schema::new(vec![Field::new("w", DataType::Int32, false)]));
        let b = Morsel::new(other_schema, vec![Arc::new(Int32Array::from(vec![1]))]).unwrap();
        assert!(Morsel::concat(&[a, b]).is_err());
    }

    #[test]
    fn live_indices_respects_selection() {
        let m = morsel(vec![1, 2, 3]).with_selection(vec![0, 2]).unwrap();
        let indices: Vec<u32> = m.live_indices().collect();
        assert_eq!(indices, vec![0, 2]);

        let full = morsel(vec![1, 2, 3]);
        let indices: Vec<u32> = full.live_indices().collect();
        assert_eq!(indices, vec![0, 1, 2]);
    }
}
