//! Stateless-ish single-input operators: Filter, Projection, Limit,
//! Distinct, Union.
//!
//! Filter and Projection are grounded on the teacher's
//! `query/executor.rs::{build_comparison_mask_*, project_columns}`
//! functions, generalized from per-type dispatch to one vectorized
//! `Expr::evaluate` call each. Both honor `ExecutionConfig::parallel`
//! (spec.md §5) by splitting a large morsel into row chunks and
//! evaluating each chunk's expressions across a `rayon` thread pool —
//! the same "read-only fan-out, serial reassembly" shape as the
//! hash-join probe (`operators::join`).

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use arrow::array::{Array, ArrayRef, BooleanArray};
use arrow::compute;

use crate::config::ExecutionConfig;
use crate::error::{Error, Result};
use crate::expr::Expr;
use crate::morsel::Morsel;
use crate::operators::keycell::{key_cell, KeyCell};
use crate::operators::{Operator, OperatorStats};
use crate::schema::SchemaRef;

/// Below this many live rows, chunking overhead outweighs any benefit
/// from spreading the work across threads.
const PARALLEL_ROW_THRESHOLD: usize = 8192;
/// Target rows per chunk when a morsel is large enough to parallelize.
const PARALLEL_CHUNK_ROWS: usize = 4096;

/// Splits `indices` (a morsel's live row indices, in order) into
/// contiguous chunks of roughly `PARALLEL_CHUNK_ROWS` rows each.
fn chunk_indices(indices: &[u32]) -> Vec<&[u32]> {
    indices.chunks(PARALLEL_CHUNK_ROWS).collect()
}

/// Evaluate `predicate` over exactly the rows named by `rows` (a subset of
/// `morsel`'s live indices) and return the ones that match. Materializes
/// the chunk first so each `rayon` worker evaluates only its own slice,
/// not the whole morsel's columns. A free function (not a method) so the
/// parallel closure calling it captures only `predicate` and `morsel`,
/// never a whole operator struct.
fn matching_indices_in_chunk(predicate: &Expr, morsel: &Morsel, rows: &[u32]) -> Result<Vec<u32>> {
    let sub = morsel.with_selection(rows.to_vec())?.materialize()?;
    let mask = predicate.evaluate(&sub)?;
    let mask = mask
        .as_any()
        .downcast_ref::<BooleanArray>()
        .ok_or_else(|| Error::TypeError("FILTER predicate must be boolean".to_string()))?;
    Ok(rows
        .iter()
        .enumerate()
        .filter(|&(i, _)| mask.value(i) && !mask.is_null(i))
        .map(|(_, &row)| row)
        .collect())
}

/// Keeps only rows for which `predicate` evaluates to non-null `true`,
/// by scanning the predicate's boolean column into a selection vector.
pub struct Filter {
    input: Box<dyn Operator>,
    predicate: Expr,
    parallel: bool,
    stats: OperatorStats,
}

impl Filter {
    /// Build a filter over `input` using `predicate`.
    #[must_use]
    pub fn new(input: Box<dyn Operator>, predicate: Expr) -> Self {
        Self {
            input,
            predicate,
            parallel: false,
            stats: OperatorStats::default(),
        }
    }

    /// Build a filter that honors `config`'s parallel-mode setting.
    #[must_use]
    pub fn with_config(input: Box<dyn Operator>, predicate: Expr, config: &ExecutionConfig) -> Self {
        Self {
            input,
            predicate,
            parallel: config.parallel,
            stats: OperatorStats::default(),
        }
    }

    fn matching_indices(&self, morsel: &Morsel) -> Result<Vec<u32>> {
        let live: Vec<u32> = morsel.live_indices().collect();
        // Bind the predicate to a local so the `rayon` closure below
        // captures only this field, not `self` as a whole — `Filter` holds
        // a `Box<dyn Operator>`, which is `Send` but not `Sync`, so a
        // closure capturing `&self` could never be shared across threads.
        let predicate = &self.predicate;
        if self.parallel && live.len() >= PARALLEL_ROW_THRESHOLD {
            use rayon::prelude::*;
            let chunks = chunk_indices(&live);
            let per_chunk: Result<Vec<Vec<u32>>> = chunks
                .into_par_iter()
                .map(|chunk| matching_indices_in_chunk(predicate, morsel, chunk))
                .collect();
            return Ok(per_chunk?.into_iter().flatten().collect());
        }

        let mask = predicate.evaluate(morsel)?;
        let mask = mask
            .as_any()
            .downcast_ref::<BooleanArray>()
            .ok_or_else(|| Error::TypeError("FILTER predicate must be boolean".to_string()))?;
        Ok(live
            .into_iter()
            .filter(|&row| mask.len() > row as usize && mask.value(row as usize) && !mask.is_null(row as usize))
            .collect())
    }
}

impl Operator for Filter {
    fn schema(&self) -> &SchemaRef {
        self.input.schema()
    }

    fn next(&mut self) -> Result<Option<Morsel>> {
        let start = Instant::now();
        loop {
            let Some(morsel) = self.input.next()? else {
                self.stats.wall_time += start.elapsed();
                return Ok(None);
            };
            self.stats.record_input(&morsel);

            let indices = self.matching_indices(&morsel)?;

            if indices.is_empty() {
                continue;
            }

            let filtered = morsel.with_selection(indices)?;
            self.stats.record_output(&filtered);
            self.stats.wall_time += start.elapsed();
            return Ok(Some(filtered));
        }
    }

    fn statistics(&self) -> &OperatorStats {
        &self.stats
    }

    fn close(&mut self) {
        self.input.close();
    }
}

/// Evaluates a fixed list of output expressions against each input morsel.
pub struct Projection {
    input: Box<dyn Operator>,
    expressions: Vec<Expr>,
    output_schema: SchemaRef,
    parallel: bool,
    stats: OperatorStats,
}

impl Projection {
    /// Build a projection over `input`, producing `output_schema` by
    /// evaluating `expressions` (one per output column, in order).
    #[must_use]
    pub fn new(input: Box<dyn Operator>, expressions: Vec<Expr>, output_schema: SchemaRef) -> Self {
        Self {
            input,
            expressions,
            output_schema,
            parallel: false,
            stats: OperatorStats::default(),
        }
    }

    /// Build a projection that honors `config`'s parallel-mode setting.
    #[must_use]
    pub fn with_config(
        input: Box<dyn Operator>,
        expressions: Vec<Expr>,
        output_schema: SchemaRef,
        config: &ExecutionConfig,
    ) -> Self {
        Self {
            input,
            expressions,
            output_schema,
            parallel: config.parallel,
            stats: OperatorStats::default(),
        }
    }

    fn evaluate_all(&self, materialized: &Morsel) -> Result<Vec<ArrayRef>> {
        if !self.parallel || materialized.row_count() < PARALLEL_ROW_THRESHOLD {
            return self.expressions.iter().map(|e| e.evaluate(materialized)).collect();
        }

        use rayon::prelude::*;
        // As in `Filter::matching_indices`: bind to a local so the closure
        // captures only `expressions`, never the whole `Projection` (whose
        // `input: Box<dyn Operator>` is `Send` but not `Sync`).
        let expressions = &self.expressions;
        let live: Vec<u32> = materialized.live_indices().collect();
        let chunks = chunk_indices(&live);
        let per_chunk: Result<Vec<Vec<ArrayRef>>> = chunks
            .into_par_iter()
            .map(|chunk| {
                let sub = materialized.with_selection(chunk.to_vec())?.materialize()?;
                expressions.iter().map(|e| e.evaluate(&sub)).collect()
            })
            .collect();
        let per_chunk = per_chunk?;

        (0..expressions.len())
            .map(|col_idx| {
                let arrays: Vec<&dyn Array> = per_chunk.iter().map(|c| c[col_idx].as_ref()).collect();
                Ok(compute::concat(&arrays)?)
            })
            .collect()
    }
}

impl Operator for Projection {
    fn schema(&self) -> &SchemaRef {
        &self.output_schema
    }

    fn next(&mut self) -> Result<Option<Morsel>> {
        let start = Instant::now();
        let Some(morsel) = self.input.next()? else {
            self.stats.wall_time += start.elapsed();
            return Ok(None);
        };
        self.stats.record_input(&morsel);

        let materialized = morsel.materialize()?;
        let columns = self.evaluate_all(&materialized)?;
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

/// Emits at most `limit` rows total, across however many morsels that
/// takes, then stops pulling from its input.
pub struct Limit {
    input: Box<dyn Operator>,
    remaining: usize,
    stats: OperatorStats,
}

impl Limit {
    /// Build a limit over `input` capping total output at `limit` rows.
    #[must_use]
    pub fn new(input: Box<dyn Operator>, limit: usize) -> Self {
        Self {
            input,
            remaining: limit,
            stats: OperatorStats::default(),
        }
    }
}

impl Operator for Limit {
    fn schema(&self) -> &SchemaRef {
        self.input.schema()
    }

    fn next(&mut self) -> Result<Option<Morsel>> {
        let start = Instant::now();
        if self.remaining == 0 {
            self.stats.wall_time += start.elapsed();
            return Ok(None);
        }

        let Some(morsel) = self.input.next()? else {
            self.stats.wall_time += start.elapsed();
            return Ok(None);
        };
        self.stats.record_input(&morsel);

        let take = morsel.row_count().min(self.remaining);
        let output = if take == morsel.row_count() {
            morsel
        } else {
            let indices: Vec<u32> = morsel.live_indices().take(take).collect();
            morsel.with_selection(indices)?
        };
        self.remaining -= take;
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

/// Special case of grouped aggregation with no aggregate functions: emits
/// each distinct row (by the given key expressions) once, in first-seen
/// order.
pub struct Distinct {
    input: Box<dyn Operator>,
    key_expressions: Vec<Expr>,
    seen: HashSet<Vec<KeyCell>>,
    stats: OperatorStats,
}

impl Distinct {
    /// Build a distinct operator over `input`, keyed by `key_expressions`
    /// (typically one `Expr::Column` per output column).
    #[must_use]
    pub fn new(input: Box<dyn Operator>, key_expressions: Vec<Expr>) -> Self {
        Self {
            input,
            key_expressions,
            seen: HashSet::new(),
            stats: OperatorStats::default(),
        }
    }
}

impl Operator for Distinct {
    fn schema(&self) -> &SchemaRef {
        self.input.schema()
    }

    fn next(&mut self) -> Result<Option<Morsel>> {
        let start = Instant::now();
        loop {
            let Some(morsel) = self.input.next()? else {
                self.stats.wall_time += start.elapsed();
                return Ok(None);
            };
            self.stats.record_input(&morsel);

            let key_columns: Result<Vec<_>> = self
                .key_expressions
                .iter()
                .map(|e| e.evaluate(&morsel))
                .collect();
            let key_columns = key_columns?;

            let mut keep = Vec::new();
            for row in morsel.live_indices() {
                let key: Vec<KeyCell> = key_columns
                    .iter()
                    .map(|col| key_cell(col.as_ref(), row as usize))
                    .collect::<Result<Vec<_>>>()?;
                if self.seen.insert(key) {
                    keep.push(row);
                }
            }

            if keep.is_empty() {
                continue;
            }

            let output = morsel.with_selection(keep)?;
            self.stats.record_output(&output);
            self.stats.wall_time += start.elapsed();
            return Ok(Some(output));
        }
    }

    fn statistics(&self) -> &OperatorStats {
        &self.stats
    }

    fn close(&mut self) {
        self.input.close();
    }
}

/// Concatenates morsels from multiple same-schema inputs, pulling them in
/// order (first input to exhaustion, then the next).
pub struct Union {
    inputs: Vec<Box<dyn Operator>>,
    current: usize,
    stats: OperatorStats,
}

impl Union {
    /// Build a union over `inputs`, which must all share a schema.
    ///
    /// # Errors
    /// Returns [`Error::SchemaMismatch`] if the inputs don't share a schema.
    pub fn new(inputs: Vec<Box<dyn Operator>>) -> Result<Self> {
        if let Some(first) = inputs.first() {
            let schema = first.schema().clone();
            for input in &inputs {
                if input.schema() != &schema {
                    return Err(Error::SchemaMismatch(
                        "UNION inputs must share a schema".to_string(),
                    ));
                }
            }
        }
        Ok(Self {
            inputs,
            current: 0,
            stats: OperatorStats::default(),
        })
    }
}

impl Operator for Union {
    fn schema(&self) -> &SchemaRef {
        self.inputs[0].schema()
    }

    fn next(&mut self) -> Result<Option<Morsel>> {
        let start = Instant::now();
        while self.current < self.inputs.len() {
            if let Some(morsel) = self.inputs[self.current].next()? {
                self.stats.record_input(&morsel);
                self.stats.record_output(&morsel);
                self.stats.wall_time += start.elapsed();
                return Ok(Some(morsel));
            }
            self.current += 1;
        }
        self.stats.wall_time += start.elapsed();
        Ok(None)
    }

    fn statistics(&self) -> &OperatorStats {
        &self.stats
    }

    fn close(&mut self) {
        for input in &mut self.inputs {
            input.close();
        }
    }
}
