//! Streaming simple and grouped aggregation.
//!
//! Per-type accumulator dispatch is grounded on the teacher's
//! `query/executor.rs::{sum,avg,min,max}_*` functions (one function per
//! Arrow numeric type), generalized here into a single accumulator that
//! reads any supported numeric column through one `numeric_value` helper
//! instead of four near-identical functions. The grouped variant's hash
//! table reuses [`crate::hashtable::HashTable`] exactly as described in
//! spec.md §4.6.2 ("open-addressed over 64-bit hashes with an
//! ascending-integer group_id assignment"), storing the dense `group_id`
//! in place of a row id and guarding hash collisions with an explicit key
//! equality check.

use std::sync::Arc;
use std::time::Instant;

use arrow::array::{Array, ArrayRef, BooleanArray, Float64Array, Int32Array, Int64Array};
use arrow::datatypes::{DataType, Field, Schema};
use rustc_hash::FxHashSet;

use crate::config::CountDistinctMode;
use crate::error::{Error, Result};
use crate::expr::Expr;
use crate::hashtable::HashTable;
use crate::morsel::{Morsel, RowId};
use crate::operators::keycell::{key_cell, KeyCell};
use crate::operators::{Operator, OperatorStats};
use crate::schema::SchemaRef;

/// Which reduction an [`AggregateSpec`] computes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregateFunction {
    /// Row count; counts non-null `input` values, or all rows if `input`
    /// is `None` (`COUNT(*)`).
    Count,
    /// Sum of `input`, with overflow checking for integer columns.
    Sum,
    /// Arithmetic mean of `input`; null if no non-null input was seen.
    Avg,
    /// Minimum of `input`; null until the first non-null input.
    Min,
    /// Maximum of `input`; null until the first non-null input.
    Max,
    /// Distinct cardinality of `input`, exact or approximate per
    /// [`CountDistinctMode`].
    CountDistinct,
}

/// One aggregate to compute: a function, its input expression (absent for
/// `COUNT(*)`), an optional `FILTER` predicate, and the output column
/// name.
#[derive(Debug, Clone)]
pub struct AggregateSpec {
    /// The reduction to apply.
    pub function: AggregateFunction,
    /// The value expression the function reduces over; `None` only valid
    /// for `COUNT(*)`.
    pub input: Option<Expr>,
    /// The Arrow type `input` evaluates to, supplied by the planner the
    /// same way [`GroupedAggregate::new`]'s `group_key_types` is — this
    /// operator does no static type inference of its own. Ignored for
    /// `Count`/`CountDistinct`, whose output type never depends on it.
    pub input_type: DataType,
    /// A boolean expression selecting which rows contribute to this
    /// aggregate specifically, evaluated before the accumulator update.
    pub filter: Option<Expr>,
    /// The output column's name.
    pub alias: String,
}

impl AggregateSpec {
    fn output_type(&self) -> DataType {
        match self.function {
            AggregateFunction::Count | AggregateFunction::CountDistinct => DataType::Int64,
            AggregateFunction::Avg => DataType::Float64,
            // SUM of an integer column stays exact (see `Accumulator::sum_i64`);
            // every other numeric input sums and averages as Float64.
            AggregateFunction::Sum => match self.input_type {
                DataType::Int32 | DataType::Int64 => DataType::Int64,
                _ => DataType::Float64,
            },
            // MIN/MAX preserve the input column's own type.
            AggregateFunction::Min | AggregateFunction::Max => self.input_type.clone(),
        }
    }
}

fn numeric_value(array: &ArrayRef, row: usize) -> Option<f64> {
    if array.is_null(row) {
        return None;
    }
    if let Some(a) = array.as_any().downcast_ref::<Int32Array>() {
        return Some(f64::from(a.value(row)));
    }
    if let Some(a) = array.as_any().downcast_ref::<Int64Array>() {
        return Some(a.value(row) as f64);
    }
    if let Some(a) = array.as_any().downcast_ref::<arrow::array::Float32Array>() {
        return Some(f64::from(a.value(row)));
    }
    if let Some(a) = array.as_any().downcast_ref::<Float64Array>() {
        return Some(a.value(row));
    }
    None
}

fn integer_value(array: &ArrayRef, row: usize) -> Option<i64> {
    if array.is_null(row) {
        return None;
    }
    if let Some(a) = array.as_any().downcast_ref::<Int32Array>() {
        return Some(i64::from(a.value(row)));
    }
    if let Some(a) = array.as_any().downcast_ref::<Int64Array>() {
        return Some(a.value(row));
    }
    None
}

/// One group's (or the single global group's) accumulator state for one
/// [`AggregateSpec`].
#[derive(Debug, Clone, Default)]
struct Accumulator {
    count: u64,
    sum_f64: f64,
    sum_i64: Option<i64>,
    sum_overflowed: bool,
    min: Option<crate::expr::ScalarValue>,
    max: Option<crate::expr::ScalarValue>,
    distinct_exact: Option<FxHashSet<KeyCell>>,
    distinct_hll: Option<HyperLogLog>,
}

impl Accumulator {
    fn new(function: AggregateFunction, count_distinct_mode: CountDistinctMode) -> Self {
        let mut acc = Self {
            sum_i64: Some(0),
            ..Self::default()
        };
        if matches!(function, AggregateFunction::CountDistinct) {
            match count_distinct_mode {
                CountDistinctMode::Exact => acc.distinct_exact = Some(FxHashSet::default()),
                CountDistinctMode::Approximate => acc.distinct_hll = Some(HyperLogLog::new(12)),
            }
        }
        acc
    }

    fn update_count(&mut self) {
        self.count += 1;
    }

    fn update_numeric(&mut self, value: f64, integer_value: Option<i64>) {
        self.count += 1;
        self.sum_f64 += value;
        if let (Some(current), Some(incoming)) = (self.sum_i64, integer_value) {
            match current.checked_add(incoming) {
                Some(sum) => self.sum_i64 = Some(sum),
                None => self.sum_overflowed = true,
            }
        } else {
            self.sum_i64 = None;
        }
    }

    /// Update the running extremum with one more non-null value, comparing
    /// in the column's own type rather than forcing a float comparison —
    /// `MIN`/`MAX` over `Utf8`/`Date32`/timestamp columns must work too.
    fn update_min_max(&mut self, function: AggregateFunction, value: crate::expr::ScalarValue) {
        let slot = match function {
            AggregateFunction::Min => &mut self.min,
            AggregateFunction::Max => &mut self.max,
            _ => unreachable!("update_min_max only called for Min/Max"),
        };
        *slot = Some(match slot.take() {
            None => value,
            Some(current) => {
                let keep_incoming = match function {
                    AggregateFunction::Min => compare_scalars(&value, &current) == std::cmp::Ordering::Less,
                    AggregateFunction::Max => compare_scalars(&value, &current) == std::cmp::Ordering::Greater,
                    _ => unreachable!(),
                };
                if keep_incoming {
                    value
                } else {
                    current
                }
            }
        });
    }

    fn update_distinct(&mut self, cell: KeyCell) {
        if let Some(hll) = &mut self.distinct_hll {
            hll.insert(hash_key_cells(std::slice::from_ref(&cell)));
        }
        if let Some(set) = &mut self.distinct_exact {
            set.insert(cell);
        }
    }

    fn finalize(&self, function: AggregateFunction, numeric_mode: crate::config::NumericMode) -> Result<ScalarOut> {
        match function {
            AggregateFunction::Count => Ok(ScalarOut::Int64(self.count as i64)),
            AggregateFunction::Sum => {
                if self.sum_overflowed {
                    if matches!(numeric_mode, crate::config::NumericMode::Strict) {
                        return Err(Error::Overflow("SUM overflowed i64 range".to_string()));
                    }
                    return Ok(ScalarOut::Null);
                }
                if self.count == 0 {
                    Ok(ScalarOut::Null)
                } else if let Some(sum) = self.sum_i64 {
                    Ok(ScalarOut::Int64(sum))
                } else {
                    Ok(ScalarOut::Float64(self.sum_f64))
                }
            }
            AggregateFunction::Avg => {
                if self.count == 0 {
                    Ok(ScalarOut::Null)
                } else {
                    Ok(ScalarOut::Float64(self.sum_f64 / self.count as f64))
                }
            }
            AggregateFunction::Min => Ok(self.min.clone().map_or(ScalarOut::Null, ScalarOut::Scalar)),
            AggregateFunction::Max => Ok(self.max.clone().map_or(ScalarOut::Null, ScalarOut::Scalar)),
            AggregateFunction::CountDistinct => {
                let count = self
                    .distinct_exact
                    .as_ref()
                    .map(|s| s.len() as f64)
                    .or_else(|| self.distinct_hll.as_ref().map(HyperLogLog::estimate))
                    .unwrap_or(0.0);
                Ok(ScalarOut::Int64(count.round() as i64))
            }
        }
    }
}

/// Order two scalars of the same logical type, `NaN`-aware for floats.
///
/// # Panics
/// Panics if `a`/`b` are of different variants (never happens here: both
/// always come from the same input column) or are `Null` (callers only
/// ever compare non-null extrema).
fn compare_scalars(a: &crate::expr::ScalarValue, b: &crate::expr::ScalarValue) -> std::cmp::Ordering {
    use crate::expr::ScalarValue;
    use crate::operators::sort::{total_cmp_f32, total_cmp_f64};
    match (a, b) {
        (ScalarValue::Boolean(a), ScalarValue::Boolean(b)) => a.cmp(b),
        (ScalarValue::Int32(a), ScalarValue::Int32(b)) => a.cmp(b),
        (ScalarValue::Int64(a), ScalarValue::Int64(b)) => a.cmp(b),
        (ScalarValue::Date32(a), ScalarValue::Date32(b)) => a.cmp(b),
        (ScalarValue::TimestampNanos(a), ScalarValue::TimestampNanos(b)) => a.cmp(b),
        (ScalarValue::Float32(a), ScalarValue::Float32(b)) => total_cmp_f32(*a, *b),
        (ScalarValue::Float64(a), ScalarValue::Float64(b)) => total_cmp_f64(*a, *b),
        (ScalarValue::Utf8(a), ScalarValue::Utf8(b)) => a.cmp(b),
        (a, b) => unreachable!("MIN/MAX compared mismatched scalar variants: {a:?} vs {b:?}"),
    }
}

enum ScalarOut {
    Null,
    Int64(i64),
    Float64(f64),
    Scalar(crate::expr::ScalarValue),
}

/// Simple (whole-stream, no `GROUP BY`) aggregation. Emits exactly one
/// output row at end-of-stream.
pub struct SimpleAggregate {
    input: Box<dyn Operator>,
    specs: Vec<AggregateSpec>,
    output_schema: SchemaRef,
    numeric_mode: crate::config::NumericMode,
    count_distinct_mode: CountDistinctMode,
    accumulators: Vec<Accumulator>,
    done: bool,
    stats: OperatorStats,
}

impl SimpleAggregate {
    /// Build a simple aggregation over `input` computing `specs`.
    #[must_use]
    pub fn new(
        input: Box<dyn Operator>,
        specs: Vec<AggregateSpec>,
        numeric_mode: crate::config::NumericMode,
        count_distinct_mode: CountDistinctMode,
    ) -> Self {
        let output_schema = aggregate_output_schema(&specs);
        let accumulators = specs
            .iter()
            .map(|s| Accumulator::new(s.function, count_distinct_mode))
            .collect();
        Self {
            input,
            specs,
            output_schema,
            numeric_mode,
            count_distinct_mode,
            accumulators,
            done: false,
            stats: OperatorStats::default(),
        }
    }

    fn consume(&mut self, morsel: &Morsel) -> Result<()> {
        for (spec, acc) in self.specs.iter().zip(self.accumulators.iter_mut()) {
            let filter_mask = match &spec.filter {
                Some(expr) => Some(as_boolean_owned(expr.evaluate(morsel)?)?),
                None => None,
            };

            match (&spec.function, &spec.input) {
                (AggregateFunction::Count, None) => {
                    for row in morsel.live_indices() {
                        if passes(&filter_mask, row as usize) {
                            acc.update_count();
                        }
                    }
                }
                (AggregateFunction::CountDistinct, Some(expr)) => {
                    let values = expr.evaluate(morsel)?;
                    for row in morsel.live_indices() {
                        let row = row as usize;
                        if passes(&filter_mask, row) && !values.is_null(row) {
                            acc.update_distinct(key_cell(values.as_ref(), row)?);
                        }
                    }
                }
                (AggregateFunction::Count, Some(expr)) => {
                    let values = expr.evaluate(morsel)?;
                    for row in morsel.live_indices() {
                        let row = row as usize;
                        if passes(&filter_mask, row) && !values.is_null(row) {
                            acc.update_count();
                        }
                    }
                }
                (AggregateFunction::Min | AggregateFunction::Max, Some(expr)) => {
                    let values = expr.evaluate(morsel)?;
                    for row in morsel.live_indices() {
                        let row = row as usize;
                        if !passes(&filter_mask, row) || values.is_null(row) {
                            continue;
                        }
                        acc.update_min_max(spec.function, scalar_value_at(&values, row)?);
                    }
                }
                (_, Some(expr)) => {
                    let values = expr.evaluate(morsel)?;
                    for row in morsel.live_indices() {
                        let row = row as usize;
                        if !passes(&filter_mask, row) {
                            continue;
                        }
                        if let Some(value) = numeric_value(&values, row) {
                            acc.update_numeric(value, integer_value(&values, row));
                        }
                    }
                }
                (_, None) => {
                    return Err(Error::TypeError(format!(
                        "{:?} requires an input expression",
                        spec.function
                    )))
                }
            }
        }
        Ok(())
    }
}

impl Operator for SimpleAggregate {
    fn schema(&self) -> &SchemaRef {
        &self.output_schema
    }

    fn next(&mut self) -> Result<Option<Morsel>> {
        let start = Instant::now();
        if self.done {
            self.stats.wall_time += start.elapsed();
            return Ok(None);
        }

        while let Some(morsel) = self.input.next()? {
            self.stats.record_input(&morsel);
            self.consume(&morsel)?;
        }
        self.done = true;

        let mut columns: Vec<ArrayRef> = Vec::with_capacity(self.specs.len());
        for (spec, acc) in self.specs.iter().zip(self.accumulators.iter()) {
            columns.push(scalar_out_to_array(
                acc.finalize(spec.function, self.numeric_mode)?,
                &spec.output_type(),
            ));
        }
        let output = Morsel::new(Arc::clone(&self.output_schema), columns)?;
        self.stats.record_output(&output);
        self.stats.wall_time += start.elapsed();
        Ok(Some(output))
    }

    fn statistics(&self) -> &OperatorStats {
        &self.stats
    }

    fn close(&mut self) {
        self.input.close();
    }
}

/// Hash-based `GROUP BY` aggregation.
pub struct GroupedAggregate {
    input: Box<dyn Operator>,
    group_keys: Vec<Expr>,
    group_key_types: Vec<DataType>,
    specs: Vec<AggregateSpec>,
    output_schema: SchemaRef,
    numeric_mode: crate::config::NumericMode,
    count_distinct_mode: CountDistinctMode,
    group_table: HashTable,
    group_key_cells: Vec<Vec<KeyCell>>,
    group_key_values: Vec<Vec<crate::expr::ScalarValue>>,
    accumulators: Vec<Vec<Accumulator>>,
    done: bool,
    stats: OperatorStats,
}

impl GroupedAggregate {
    /// Build a grouped aggregation over `input`, grouping by
    /// `group_keys` (whose declared output types are `group_key_types`,
    /// supplied by the planner, since this operator does no static type
    /// inference of its own) and computing `specs` per group.
    #[must_use]
    pub fn new(
        input: Box<dyn Operator>,
        group_keys: Vec<Expr>,
        group_key_types: Vec<DataType>,
        specs: Vec<AggregateSpec>,
        numeric_mode: crate::config::NumericMode,
        count_distinct_mode: CountDistinctMode,
    ) -> Self {
        let output_schema = grouped_output_schema(&group_key_types, &specs);
        Self {
            input,
            group_keys,
            group_key_types,
            specs,
            output_schema,
            numeric_mode,
            count_distinct_mode,
            group_table: HashTable::with_capacity(1024),
            group_key_cells: Vec::new(),
            group_key_values: Vec::new(),
            accumulators: Vec::new(),
            done: false,
            stats: OperatorStats::default(),
        }
    }

    fn group_id_for(&mut self, key_columns: &[ArrayRef], row: usize) -> Result<u32> {
        let cells: Vec<KeyCell> = key_columns
            .iter()
            .map(|c| key_cell(c.as_ref(), row))
            .collect::<Result<Vec<_>>>()?;
        let hash = hash_key_cells(&cells);

        if let Some(existing) = self.group_table.get(hash) {
            for row_id in existing {
                let gid = row_id.row_index();
                if self.group_key_cells[gid as usize] == cells {
                    return Ok(gid);
                }
            }
        }

        let gid = self.group_key_cells.len() as u32;
        let values: Vec<crate::expr::ScalarValue> = key_columns
            .iter()
            .map(|c| scalar_value_at(c, row))
            .collect::<Result<Vec<_>>>()?;
        self.group_key_cells.push(cells);
        self.group_key_values.push(values);
        self.accumulators.push(
            self.specs
                .iter()
                .map(|s| Accumulator::new(s.function, self.count_distinct_mode))
                .collect(),
        );
        self.group_table.insert(hash, RowId::new(0, gid));
        Ok(gid)
    }

    fn consume(&mut self, morsel: &Morsel) -> Result<()> {
        let key_columns: Result<Vec<ArrayRef>> =
            self.group_keys.iter().map(|e| e.evaluate(morsel)).collect();
        let key_columns = key_columns?;

        let mut group_ids = Vec::with_capacity(morsel.row_count());
        for row in morsel.live_indices() {
            group_ids.push(self.group_id_for(&key_columns, row as usize)?);
        }

        for (spec_idx, spec) in self.specs.iter().enumerate() {
            let filter_mask = match &spec.filter {
                Some(expr) => Some(as_boolean_owned(expr.evaluate(morsel)?)?),
                None => None,
            };
            let values = match &spec.input {
                Some(expr) => Some(expr.evaluate(morsel)?),
                None => None,
            };

            for (i, row) in morsel.live_indices().enumerate() {
                let row = row as usize;
                if !passes(&filter_mask, row) {
                    continue;
                }
                let gid = group_ids[i] as usize;
                let acc = &mut self.accumulators[gid][spec_idx];

                match (&spec.function, &values) {
                    (AggregateFunction::Count, None) => acc.update_count(),
                    (AggregateFunction::Count, Some(v)) => {
                        if !v.is_null(row) {
                            acc.update_count();
                        }
                    }
                    (AggregateFunction::CountDistinct, Some(v)) => {
                        if !v.is_null(row) {
                            acc.update_distinct(key_cell(v.as_ref(), row)?);
                        }
                    }
                    (AggregateFunction::Min | AggregateFunction::Max, Some(v)) => {
                        if !v.is_null(row) {
                            acc.update_min_max(spec.function, scalar_value_at(v, row)?);
                        }
                    }
                    (_, Some(v)) => {
                        if let Some(value) = numeric_value(v, row) {
                            acc.update_numeric(value, integer_value(v, row));
                        }
                    }
                    (_, None) => {
                        return Err(Error::TypeError(format!(
                            "{:?} requires an input expression",
                            spec.function
                        )))
                    }
                }
            }
        }
        Ok(())
    }

    fn materialize_groups(&self) -> Result<Morsel> {
        let num_groups = self.group_key_cells.len();
        let mut columns: Vec<ArrayRef> = Vec::with_capacity(self.group_keys.len() + self.specs.len());

        for key_idx in 0..self.group_keys.len() {
            columns.push(scalar_column(
                (0..num_groups).map(|g| self.group_key_values[g][key_idx].clone()),
                &self.group_key_types[key_idx],
            ));
        }

        for (spec_idx, spec) in self.specs.iter().enumerate() {
            let mut out = Vec::with_capacity(num_groups);
            for gid in 0..num_groups {
                out.push(self.accumulators[gid][spec_idx].finalize(spec.function, self.numeric_mode)?);
            }
            columns.push(scalar_outs_to_array(out, &spec.output_type()));
        }

        Morsel::new(Arc::clone(&self.output_schema), columns)
    }
}

impl Operator for GroupedAggregate {
    fn schema(&self) -> &SchemaRef {
        &self.output_schema
    }

    fn next(&mut self) -> Result<Option<Morsel>> {
        let start = Instant::now();
        if self.done {
            self.stats.wall_time += start.elapsed();
            return Ok(None);
        }

        while let Some(morsel) = self.input.next()? {
            self.stats.record_input(&morsel);
            self.consume(&morsel)?;
        }
        self.done = true;

        let output = self.materialize_groups()?;
        self.stats.record_output(&output);
        self.stats.wall_time += start.elapsed();
        Ok(Some(output))
    }

    fn statistics(&self) -> &OperatorStats {
        &self.stats
    }

    fn close(&mut self) {
        self.input.close();
    }
}

fn as_boolean_owned(array: ArrayRef) -> Result<BooleanArray> {
    array
        .as_any()
        .downcast_ref::<BooleanArray>()
        .cloned()
        .ok_or_else(|| Error::TypeError("FILTER clause must be boolean".to_string()))
}

fn passes(mask: &Option<BooleanArray>, row: usize) -> bool {
    match mask {
        None => true,
        Some(mask) => !mask.is_null(row) && mask.value(row),
    }
}

fn hash_key_cells(cells: &[KeyCell]) -> u64 {
    use rustc_hash::FxHasher;
    use std::hash::{Hash, Hasher};

    let mut hasher = FxHasher::default();
    cells.hash(&mut hasher);
    hasher.finish()
}

/// Read one cell as a typed [`crate::expr::ScalarValue`] — used both for a
/// group's first-seen key value and for the `MIN`/`MAX` extremum, which
/// must be tracked in the input column's own type rather than coerced to
/// `f64`.
///
/// # Errors
/// Returns [`Error::TypeError`] for a column type this crate doesn't carry
/// a `ScalarValue` variant for.
fn scalar_value_at(array: &ArrayRef, row: usize) -> Result<crate::expr::ScalarValue> {
    use crate::expr::ScalarValue;
    if array.is_null(row) {
        return Ok(ScalarValue::Null);
    }
    if let Some(a) = array.as_any().downcast_ref::<BooleanArray>() {
        return Ok(ScalarValue::Boolean(a.value(row)));
    }
    if let Some(a) = array.as_any().downcast_ref::<Int32Array>() {
        return Ok(ScalarValue::Int32(a.value(row)));
    }
    if let Some(a) = array.as_any().downcast_ref::<Int64Array>() {
        return Ok(ScalarValue::Int64(a.value(row)));
    }
    if let Some(a) = array.as_any().downcast_ref::<arrow::array::Float32Array>() {
        return Ok(ScalarValue::Float32(a.value(row)));
    }
    if let Some(a) = array.as_any().downcast_ref::<Float64Array>() {
        return Ok(ScalarValue::Float64(a.value(row)));
    }
    if let Some(a) = array.as_any().downcast_ref::<arrow::array::StringArray>() {
        return Ok(ScalarValue::Utf8(a.value(row).to_string()));
    }
    if let Some(a) = array.as_any().downcast_ref::<arrow::array::Date32Array>() {
        return Ok(ScalarValue::Date32(a.value(row)));
    }
    if let Some(a) = array
        .as_any()
        .downcast_ref::<arrow::array::TimestampNanosecondArray>()
    {
        return Ok(ScalarValue::TimestampNanos(a.value(row)));
    }
    Err(Error::TypeError(format!(
        "unsupported aggregate value column type: {:?}",
        array.data_type()
    )))
}

/// Build a column from per-group first-seen key values, coerced to
/// `data_type` (supplied by the planner alongside the group-key
/// expressions, since this operator infers no types of its own).
fn scalar_column(values: impl Iterator<Item = crate::expr::ScalarValue>, data_type: &DataType) -> ArrayRef {
    use crate::expr::ScalarValue;
    let values: Vec<ScalarValue> = values.collect();
    match data_type {
        DataType::Int32 => {
            let arr: Int32Array = values
                .iter()
                .map(|v| match v {
                    ScalarValue::Int32(i) => Some(*i),
                    ScalarValue::Int64(i) => Some(*i as i32),
                    _ => None,
                })
                .collect();
            Arc::new(arr)
        }
        DataType::Int64 => {
            let arr: Int64Array = values
                .iter()
                .map(|v| match v {
                    ScalarValue::Int32(i) => Some(i64::from(*i)),
                    ScalarValue::Int64(i) => Some(*i),
                    _ => None,
                })
                .collect();
            Arc::new(arr)
        }
        DataType::Float32 => {
            let arr: arrow::array::Float32Array = values
                .iter()
                .map(|v| match v {
                    ScalarValue::Float32(f) => Some(*f),
                    ScalarValue::Float64(f) => Some(*f as f32),
                    _ => None,
                })
                .collect();
            Arc::new(arr)
        }
        DataType::Float64 => {
            let arr: Float64Array = values
                .iter()
                .map(|v| match v {
                    ScalarValue::Float64(f) => Some(*f),
                    ScalarValue::Float32(f) => Some(f64::from(*f)),
                    _ => None,
                })
                .collect();
            Arc::new(arr)
        }
        DataType::Boolean => {
            let arr: BooleanArray = values
                .iter()
                .map(|v| match v {
                    ScalarValue::Boolean(b) => Some(*b),
                    _ => None,
                })
                .collect();
            Arc::new(arr)
        }
        DataType::Date32 => {
            let arr: arrow::array::Date32Array = values
                .iter()
                .map(|v| match v {
                    ScalarValue::Date32(d) => Some(*d),
                    _ => None,
                })
                .collect();
            Arc::new(arr)
        }
        DataType::Timestamp(arrow::datatypes::TimeUnit::Nanosecond, _) => {
            let arr: arrow::array::TimestampNanosecondArray = values
                .iter()
                .map(|v| match v {
                    ScalarValue::TimestampNanos(t) => Some(*t),
                    _ => None,
                })
                .collect();
            Arc::new(arr)
        }
        _ => {
            let arr: arrow::array::StringArray = values
                .iter()
                .map(|v| match v {
                    ScalarValue::Utf8(s) => Some(s.as_str()),
                    _ => None,
                })
                .collect();
            Arc::new(arr)
        }
    }
}

fn scalar_out_to_array(value: ScalarOut, data_type: &DataType) -> ArrayRef {
    scalar_outs_to_array(vec![value], data_type)
}

/// Convert finalized aggregate outputs to an output column, going through
/// [`crate::expr::ScalarValue`] and [`scalar_column`] so `MIN`/`MAX`'s
/// typed extrema and `SUM`/`COUNT`'s numeric outputs share one
/// array-building path instead of two.
fn scalar_outs_to_array(values: Vec<ScalarOut>, data_type: &DataType) -> ArrayRef {
    use crate::expr::ScalarValue;
    let scalars = values.into_iter().map(|v| match v {
        ScalarOut::Null => ScalarValue::Null,
        ScalarOut::Int64(i) => ScalarValue::Int64(i),
        ScalarOut::Float64(f) => ScalarValue::Float64(f),
        ScalarOut::Scalar(s) => s,
    });
    scalar_column(scalars, data_type)
}

fn aggregate_output_schema(specs: &[AggregateSpec]) -> SchemaRef {
    Arc::new(Schema::new(
        specs
            .iter()
            .map(|s| Field::new(&s.alias, s.output_type(), true))
            .collect::<Vec<_>>(),
    ))
}

fn grouped_output_schema(group_key_types: &[DataType], specs: &[AggregateSpec]) -> SchemaRef {
    let mut fields = Vec::with_capacity(group_key_types.len() + specs.len());
    for (i, data_type) in group_key_types.iter().enumerate() {
        fields.push(Field::new(format!("group_key_{i}"), data_type.clone(), true));
    }
    for spec in specs {
        fields.push(Field::new(&spec.alias, spec.output_type(), true));
    }
    Arc::new(Schema::new(fields))
}

/// Hand-rolled `HyperLogLog` sketch for approximate `COUNT DISTINCT`.
///
/// Loosely grounded on the `datasketches` port's register/estimate split
/// (`other_examples/…bloom-sketch.rs`) — same "array of small registers,
/// combine with a closed-form estimator" shape, adapted from a bloom
/// filter's bit array to HLL's max-leading-zero registers.
#[derive(Debug, Clone)]
struct HyperLogLog {
    registers: Vec<u8>,
    precision: u32,
}

impl HyperLogLog {
    fn new(precision: u32) -> Self {
        let m = 1usize << precision;
        Self {
            registers: vec![0; m],
            precision,
        }
    }

    fn insert(&mut self, hash: u64) {
        let m = self.registers.len();
        let index = (hash as usize) & (m - 1);
        let rest = hash >> self.precision;
        let rho = (rest.trailing_zeros() + 1).min(64 - self.precision) as u8;
        if rho > self.registers[index] {
            self.registers[index] = rho;
        }
    }

    fn estimate(&self) -> f64 {
        let m = self.registers.len() as f64;
        let alpha_m = match self.registers.len() {
            16 => 0.673,
            32 => 0.697,
            64 => 0.709,
            _ => 0.7213 / (1.0 + 1.079 / m),
        };

        let sum: f64 = self.registers.iter().map(|&r| 2f64.powi(-i32::from(r))).sum();
        let raw_estimate = alpha_m * m * m / sum;

        let zero_registers = self.registers.iter().filter(|&&r| r == 0).count();
        if raw_estimate <= 2.5 * m && zero_registers > 0 {
            m * (m / zero_registers as f64).ln()
        } else {
            raw_estimate
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NumericMode;
    use crate::reader::{Reader, VecReader};
    use arrow::array::{ArrayRef, Int32Array};
    use arrow::datatypes::{DataType, Field};

    struct ReaderOperator {
        reader: VecReader,
        stats: OperatorStats,
    }

    impl Operator for ReaderOperator {
        fn schema(&self) -> &SchemaRef {
            self.reader.schema()
        }
        fn next(&mut self) -> Result<Option<Morsel>> {
            self.reader.next()
        }
        fn statistics(&self) -> &OperatorStats {
            &self.stats
        }
    }

    fn schema() -> SchemaRef {
        Arc::new(Schema::new(vec![Field::new("v", DataType::Int32, true)]))
    }

    fn source(values: Vec<Option<i32>>) -> Box<dyn Operator> {
        let m = Morsel::new(schema(), vec![Arc::new(Int32Array::from(values)) as ArrayRef]).unwrap();
        Box::new(ReaderOperator {
            reader: VecReader::new(schema(), vec![m]),
            stats: OperatorStats::default(),
        })
    }

    #[test]
    fn simple_sum_count_avg() {
        let specs = vec![
            AggregateSpec {
                function: AggregateFunction::Sum,
                input: Some(Expr::Column(0)),
                input_type: DataType::Int32,
                filter: None,
                alias: "s".to_string(),
            },
            AggregateSpec {
                function: AggregateFunction::Count,
                input: None,
                input_type: DataType::Int32,
                filter: None,
                alias: "c".to_string(),
            },
            AggregateSpec {
                function: AggregateFunction::Avg,
                input: Some(Expr::Column(0)),
                input_type: DataType::Int32,
                filter: None,
                alias: "a".to_string(),
            },
        ];
        let mut agg = SimpleAggregate::new(
            source(vec![Some(1), Some(2), None, Some(3)]),
            specs,
            NumericMode::Lenient,
            CountDistinctMode::Exact,
        );
        let out = agg.next().unwrap().unwrap();
        assert!(agg.next().unwrap().is_none());

        let sum = out.column(0).as_any().downcast_ref::<Int64Array>().unwrap();
        assert_eq!(sum.value(0), 6);
        let count = out.column(1).as_any().downcast_ref::<Int64Array>().unwrap();
        assert_eq!(count.value(0), 4);
        let avg = out.column(2).as_any().downcast_ref::<Float64Array>().unwrap();
        assert_eq!(avg.value(0), 2.0);
    }

    #[test]
    fn min_max_null_until_first_value() {
        let specs = vec![
            AggregateSpec {
                function: AggregateFunction::Min,
                input: Some(Expr::Column(0)),
                input_type: DataType::Int32,
                filter: None,
                alias: "mn".to_string(),
            },
            AggregateSpec {
                function: AggregateFunction::Max,
                input: Some(Expr::Column(0)),
                input_type: DataType::Int32,
                filter: None,
                alias: "mx".to_string(),
            },
        ];
        let mut agg = SimpleAggregate::new(
            source(vec![None, None]),
            specs,
            NumericMode::Lenient,
            CountDistinctMode::Exact,
        );
        let out = agg.next().unwrap().unwrap();
        let min = out.column(0).as_any().downcast_ref::<Int32Array>().unwrap();
        assert!(min.is_null(0));
        let max = out.column(1).as_any().downcast_ref::<Int32Array>().unwrap();
        assert!(max.is_null(0));
    }

    #[test]
    fn count_distinct_exact() {
        let specs = vec![AggregateSpec {
            function: AggregateFunction::CountDistinct,
            input: Some(Expr::Column(0)),
            input_type: DataType::Int32,
            filter: None,
            alias: "cd".to_string(),
        }];
        let mut agg = SimpleAggregate::new(
            source(vec![Some(1), Some(1), Some(2), Some(3), None]),
            specs,
            NumericMode::Lenient,
            CountDistinctMode::Exact,
        );
        let out = agg.next().unwrap().unwrap();
        let cd = out.column(0).as_any().downcast_ref::<Int64Array>().unwrap();
        assert_eq!(cd.value(0), 3);
    }

    #[test]
    fn filter_clause_restricts_contributing_rows() {
        let specs = vec![AggregateSpec {
            function: AggregateFunction::Count,
            input: None,
            input_type: DataType::Int32,
            filter: Some(Expr::Binary(
                crate::expr::BinaryOp::Gt,
                Box::new(Expr::Column(0)),
                Box::new(Expr::Literal(crate::expr::ScalarValue::Int32(1))),
            )),
            alias: "c".to_string(),
        }];
        let mut agg = SimpleAggregate::new(
            source(vec![Some(1), Some(2), Some(3)]),
            specs,
            NumericMode::Lenient,
            CountDistinctMode::Exact,
        );
        let out = agg.next().unwrap().unwrap();
        let count = out.column(0).as_any().downcast_ref::<Int64Array>().unwrap();
        assert_eq!(count.value(0), 2);
    }

    #[test]
    fn grouped_aggregation_dense_group_ids() {
        let schema = Arc::new(Schema::new(vec![
            Field::new("k", DataType::Int32, true),
            Field::new("v", DataType::Int32, true),
        ]));
        let m = Morsel::new(
            schema.clone(),
            vec![
                Arc::new(Int32Array::from(vec![1, 1, 2])) as ArrayRef,
                Arc::new(Int32Array::from(vec![10, 20, 30])) as ArrayRef,
            ],
        )
        .unwrap();
        let input: Box<dyn Operator> = Box::new(ReaderOperator {
            reader: VecReader::new(schema, vec![m]),
            stats: OperatorStats::default(),
        });

        let specs = vec![AggregateSpec {
            function: AggregateFunction::Sum,
            input: Some(Expr::Column(1)),
            input_type: DataType::Int32,
            filter: None,
            alias: "s".to_string(),
        }];
        let mut agg = GroupedAggregate::new(
            input,
            vec![Expr::Column(0)],
            vec![DataType::Int32],
            specs,
            NumericMode::Lenient,
            CountDistinctMode::Exact,
        );
        let out = agg.next().unwrap().unwrap();
        assert_eq!(out.row_count(), 2);

        let keys = out.column(0).as_any().downcast_ref::<Int32Array>().unwrap();
        let sums = out.column(1).as_any().downcast_ref::<Int64Array>().unwrap();
        let mut pairs: Vec<(i32, i64)> = (0..2).map(|i| (keys.value(i), sums.value(i))).collect();
        pairs.sort_by_key(|(k, _)| *k);
        assert_eq!(pairs, vec![(1, 30), (2, 30)]);
    }

    #[test]
    fn min_max_over_a_string_column() {
        let schema = Arc::new(Schema::new(vec![Field::new("v", DataType::Utf8, true)]));
        let m = Morsel::new(
            schema.clone(),
            vec![Arc::new(arrow::array::StringArray::from(vec![
                Some("banana"),
                Some("apple"),
                None,
                Some("cherry"),
            ])) as ArrayRef],
        )
        .unwrap();
        let input: Box<dyn Operator> = Box::new(ReaderOperator {
            reader: VecReader::new(schema, vec![m]),
            stats: OperatorStats::default(),
        });
        let specs = vec![
            AggregateSpec {
                function: AggregateFunction::Min,
                input: Some(Expr::Column(0)),
                input_type: DataType::Utf8,
                filter: None,
                alias: "mn".to_string(),
            },
            AggregateSpec {
                function: AggregateFunction::Max,
                input: Some(Expr::Column(0)),
                input_type: DataType::Utf8,
                filter: None,
                alias: "mx".to_string(),
            },
        ];
        let mut agg = SimpleAggregate::new(input, specs, NumericMode::Lenient, CountDistinctMode::Exact);
        let out = agg.next().unwrap().unwrap();
        let min = out.column(0).as_any().downcast_ref::<arrow::array::StringArray>().unwrap();
        assert_eq!(min.value(0), "apple");
        let max = out.column(1).as_any().downcast_ref::<arrow::array::StringArray>().unwrap();
        assert_eq!(max.value(0), "cherry");
    }

    #[test]
    fn sum_of_large_i64_values_stays_exact() {
        let schema = Arc::new(Schema::new(vec![Field::new("v", DataType::Int64, true)]));
        let big = 4_500_000_000_000_000i64;
        let m = Morsel::new(
            schema.clone(),
            vec![Arc::new(Int64Array::from(vec![big, big])) as ArrayRef],
        )
        .unwrap();
        let input: Box<dyn Operator> = Box::new(ReaderOperator {
            reader: VecReader::new(schema, vec![m]),
            stats: OperatorStats::default(),
        });
        let specs = vec![AggregateSpec {
            function: AggregateFunction::Sum,
            input: Some(Expr::Column(0)),
            input_type: DataType::Int64,
            filter: None,
            alias: "s".to_string(),
        }];
        let mut agg = SimpleAggregate::new(input, specs, NumericMode::Lenient, CountDistinctMode::Exact);
        let out = agg.next().unwrap().unwrap();
        let sum = out.column(0).as_any().downcast_ref::<Int64Array>().unwrap();
        assert_eq!(sum.value(0), 2 * big);
    }

    #[test]
    fn count_distinct_exact_keys_on_value_not_hash() {
        let specs = vec![AggregateSpec {
            function: AggregateFunction::CountDistinct,
            input: Some(Expr::Column(0)),
            input_type: DataType::Int32,
            filter: None,
            alias: "cd".to_string(),
        }];
        let mut agg = SimpleAggregate::new(
            source((0..2000).map(Some).collect()),
            specs,
            NumericMode::Lenient,
            CountDistinctMode::Exact,
        );
        let out = agg.next().unwrap().unwrap();
        let cd = out.column(0).as_any().downcast_ref::<Int64Array>().unwrap();
        assert_eq!(cd.value(0), 2000);
    }

    #[test]
    fn hyperloglog_estimate_is_within_tolerance() {
        let mut hll = HyperLogLog::new(12);
        let n = 50_000u64;
        for i in 0..n {
            hll.insert(crate::bloom::hash_u64(i));
        }
        let estimate = hll.estimate();
        let error = (estimate - n as f64).abs() / n as f64;
        assert!(error < 0.05, "HLL error too high: {error}");
    }
}
