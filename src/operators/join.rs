//! The hash join family: inner, left outer, semi, anti, and cross.
//!
//! Three-phase shape (build, then read-only probe, then for left outer a
//! drain of unmatched build rows) is grounded on `other_examples`'
//! `hash_join_simd.rs::SimdHashJoin` (`partition_and_build` /
//! `probe_with_simd` / `materialize`), adapted from its
//! `Vec<Vec<String>>` row representation to typed morsels and from a
//! dedicated SIMD probe routine to the crate's own [`crate::hashtable::HashTable`]
//! and [`crate::bloom::BloomFilter`]. `seen_left` uses `AtomicU64` words with
//! idempotent `fetch_or`, matching that file's lock-free matched-bitmap
//! update and the concurrency note in spec.md §5. Build-side key cells are
//! kept alongside the hash table so a probe-side hash match is confirmed
//! by actual key equality before being emitted — the hash identifies a
//! bucket, not a proof (spec.md §4.4's "digest").

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use arrow::array::{Array, ArrayRef, UInt32Array};
use arrow::compute;
use arrow::datatypes::{Field, Schema};

use crate::bloom::BloomFilter;
use crate::config::ExecutionConfig;
use crate::error::{Error, Result};
use crate::expr::Expr;
use crate::hashtable::HashTable;
use crate::morsel::{Morsel, RowId};
use crate::operators::keycell::{key_cell, KeyCell};
use crate::operators::{Operator, OperatorStats};
use crate::schema::SchemaRef;

/// Which member of the hash join family this operator implements.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinType {
    /// Emit every matching `(probe, build)` pair.
    Inner,
    /// Inner, plus every unmatched build row once with nulls on the probe side.
    LeftOuter,
    /// Emit each probe row at most once, on first match, probe columns only.
    Semi,
    /// Emit each probe row exactly once if it has no build match.
    Anti,
    /// Cartesian product; no keys.
    Cross,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Init,
    Probing,
    DrainingUnmatched,
    Done,
}

/// A hash join over a build side (pulled to completion up front) and a
/// streamed probe side.
pub struct HashJoin {
    build_input: Box<dyn Operator>,
    probe_input: Box<dyn Operator>,
    build_keys: Vec<Expr>,
    probe_keys: Vec<Expr>,
    join_type: JoinType,
    output_schema: SchemaRef,
    build_field_count: usize,
    probe_field_count: usize,
    config: ExecutionConfig,

    state: State,
    build_morsel: Option<Morsel>,
    table: Option<HashTable>,
    build_key_cells: Vec<Vec<KeyCell>>,
    bloom: Option<BloomFilter>,
    bloom_sample_done: bool,
    bloom_use: bool,
    bloom_probed: u64,
    bloom_eliminated: u64,
    seen_left: Option<Vec<AtomicU64>>,
    cross_rows_emitted: u64,

    current_probe: Option<Morsel>,
    pending: Vec<(Option<u32>, Option<u32>)>,
    drain_cursor: usize,
    stats: OperatorStats,
}

impl HashJoin {
    /// Build an inner/left-outer/semi/anti join over `build_keys`/`probe_keys`.
    #[must_use]
    pub fn new(
        build_input: Box<dyn Operator>,
        probe_input: Box<dyn Operator>,
        build_keys: Vec<Expr>,
        probe_keys: Vec<Expr>,
        join_type: JoinType,
        config: ExecutionConfig,
    ) -> Self {
        let output_schema = output_schema(build_input.schema(), probe_input.schema(), join_type);
        let build_field_count = build_input.schema().fields().len();
        let probe_field_count = probe_input.schema().fields().len();
        Self {
            build_input,
            probe_input,
            build_keys,
            probe_keys,
            join_type,
            output_schema,
            build_field_count,
            probe_field_count,
            config,
            state: State::Init,
            build_morsel: None,
            table: None,
            build_key_cells: Vec::new(),
            bloom: None,
            bloom_sample_done: false,
            bloom_use: true,
            bloom_probed: 0,
            bloom_eliminated: 0,
            seen_left: None,
            cross_rows_emitted: 0,
            current_probe: None,
            pending: Vec::new(),
            drain_cursor: 0,
            stats: OperatorStats::default(),
        }
    }

    fn build(&mut self) -> Result<()> {
        let mut morsels = Vec::new();
        while let Some(m) = self.build_input.next()? {
            self.stats.record_input(&m);
            morsels.push(m.materialize()?);
        }
        self.build_input.close();

        let build_morsel = if morsels.is_empty() {
            Morsel::new(
                Arc::clone(self.build_input.schema()),
                self.build_input
                    .schema()
                    .fields()
                    .iter()
                    .map(|f| arrow::array::new_empty_array(f.data_type()))
                    .collect(),
            )?
        } else {
            Morsel::concat(&morsels)?
        };
        let build_rows = build_morsel.row_count();

        if !matches!(self.join_type, JoinType::Cross) {
            let key_columns: Result<Vec<ArrayRef>> =
                self.build_keys.iter().map(|e| e.evaluate(&build_morsel)).collect();
            let key_columns = key_columns?;

            let mut table = HashTable::with_capacity(build_rows);
            let mut build_key_cells = Vec::with_capacity(build_rows);
            for row in 0..build_rows {
                if let Some(hash) = hash_row(&key_columns, row)? {
                    table.insert(hash, RowId::new(0, row as u32));
                    let cells: Vec<KeyCell> = key_columns
                        .iter()
                        .map(|c| key_cell(c.as_ref(), row))
                        .collect::<Result<Vec<_>>>()?;
                    build_key_cells.push(cells);
                } else {
                    build_key_cells.push(Vec::new());
                }
            }
            self.build_key_cells = build_key_cells;

            if build_rows as u64 <= crate::bloom::MAX_BUILD_KEYS {
                let mut bloom = BloomFilter::with_capacity(build_rows as u64);
                for row in 0..build_rows {
                    if let Some(hash) = hash_row(&key_columns, row)? {
                        bloom.insert(hash);
                    }
                }
                self.bloom = Some(bloom);
            }
            self.table = Some(table);
        }

        if matches!(self.join_type, JoinType::LeftOuter) {
            let words = build_rows.div_ceil(64).max(1);
            self.seen_left = Some((0..words).map(|_| AtomicU64::new(0)).collect());
        }

        self.build_morsel = Some(build_morsel);
        Ok(())
    }

    fn mark_seen(&self, build_row: u32) {
        if let Some(bitmap) = &self.seen_left {
            let word = build_row as usize / 64;
            let bit = build_row as usize % 64;
            bitmap[word].fetch_or(1 << bit, Ordering::Relaxed);
        }
    }

    fn is_seen(&self, build_row: u32) -> bool {
        self.seen_left.as_ref().is_some_and(|bitmap| {
            let word = build_row as usize / 64;
            let bit = build_row as usize % 64;
            (bitmap[word].load(Ordering::Relaxed) >> bit) & 1 == 1
        })
    }

    fn all_seen(&self) -> bool {
        let Some(bitmap) = &self.seen_left else {
            return false;
        };
        let Some(build_morsel) = &self.build_morsel else {
            return false;
        };
        let total = build_morsel.row_count();
        (0..total as u32).all(|row| self.is_seen(row))
    }

    fn pull_and_probe_next_morsel(&mut self) -> Result<bool> {
        let Some(probe_morsel) = self.probe_input.next()? else {
            return Ok(false);
        };
        self.stats.record_input(&probe_morsel);
        let probe_morsel = probe_morsel.materialize()?;

        if matches!(self.join_type, JoinType::Cross) {
            self.probe_cross(&probe_morsel)?;
        } else {
            self.probe_keyed(&probe_morsel)?;
        }

        self.current_probe = Some(probe_morsel);
        Ok(true)
    }

    fn probe_keyed(&mut self, probe_morsel: &Morsel) -> Result<()> {
        let key_columns: Result<Vec<ArrayRef>> =
            self.probe_keys.iter().map(|e| e.evaluate(probe_morsel)).collect();
        let key_columns = key_columns?;
        let probe_rows = probe_morsel.row_count();

        let hashes: Vec<Option<u64>> = (0..probe_rows)
            .map(|r| hash_row(&key_columns, r))
            .collect::<Result<Vec<_>>>()?;

        let candidate_mask: Vec<bool> = if self.bloom_use {
            if let Some(bloom) = &self.bloom {
                let present: Vec<u64> = hashes.iter().filter_map(|h| *h).collect();
                let bits = bloom.contains_many(&present);
                self.bloom_probed += present.len() as u64;
                self.bloom_eliminated += bits.iter().filter(|b| !**b).count() as u64;

                let mut bit_iter = bits.into_iter();
                hashes
                    .iter()
                    .map(|h| h.is_some() && bit_iter.next().unwrap_or(true))
                    .collect()
            } else {
                vec![true; probe_rows]
            }
        } else {
            hashes.iter().map(Option::is_some).collect()
        };

        if !self.bloom_sample_done && self.bloom_probed >= 4 * self.config.morsel_size_rows as u64
        {
            self.bloom_sample_done = true;
            if self.bloom_probed > 0 {
                let rate = self.bloom_eliminated as f64 / self.bloom_probed as f64;
                self.bloom_use = rate > 0.05;
            }
        }

        let table = self.table.as_ref().expect("build phase ran before probing");

        // The lookup itself only reads the (already built, read-only)
        // hash table and `build_key_cells` — spec.md §5's "the probe-side
        // hash table is read-only" is exactly the property that makes it
        // safe to fan this out across a rayon thread pool per row when
        // parallel mode is enabled. Emission order is restored afterward
        // by iterating `matches` in probe-row order, so morsel-internal
        // ordering (spec.md §5) is unaffected either way.
        let lookup_row = |row: usize| -> Result<Vec<u32>> {
            if !candidate_mask[row] {
                return Ok(Vec::new());
            }
            let Some(hash) = hashes[row] else {
                return Ok(Vec::new());
            };
            let Some(build_rows) = table.get(hash) else {
                return Ok(Vec::new());
            };
            let probe_cells: Vec<KeyCell> = key_columns
                .iter()
                .map(|c| key_cell(c.as_ref(), row))
                .collect::<Result<Vec<_>>>()?;
            Ok(build_rows
                .iter()
                .map(|id| id.row_index())
                .filter(|&build_idx| self.build_key_cells[build_idx as usize] == probe_cells)
                .collect())
        };

        let matches: Vec<Vec<u32>> = if self.config.parallel {
            use rayon::prelude::*;
            (0..probe_rows)
                .into_par_iter()
                .map(lookup_row)
                .collect::<Result<Vec<_>>>()?
        } else {
            (0..probe_rows).map(lookup_row).collect::<Result<Vec<_>>>()?
        };

        let mut any_match_for_row = vec![false; probe_rows];

        for (row, build_idxs) in matches.into_iter().enumerate() {
            for build_idx in build_idxs {
                // `hash` identifies the slot, not a proof of equality
                // (spec.md §4.4's "digest"); `lookup_row` already confirmed
                // actual key equality above.
                any_match_for_row[row] = true;
                match self.join_type {
                    JoinType::Inner | JoinType::LeftOuter => {
                        self.mark_seen(build_idx);
                        self.pending.push((Some(row as u32), Some(build_idx)));
                    }
                    JoinType::Semi => {
                        self.pending.push((Some(row as u32), None));
                        break;
                    }
                    JoinType::Anti => {}
                    JoinType::Cross => unreachable!("cross handled separately"),
                }
            }
        }

        if matches!(self.join_type, JoinType::Anti) {
            for row in 0..probe_rows {
                if !any_match_for_row[row] {
                    self.pending.push((Some(row as u32), None));
                }
            }
        }

        Ok(())
    }

    fn probe_cross(&mut self, probe_morsel: &Morsel) -> Result<()> {
        let build_rows = self
            .build_morsel
            .as_ref()
            .map_or(0, Morsel::row_count);
        let probe_rows = probe_morsel.row_count();
        let projected = build_rows as u64 * probe_rows as u64;

        self.cross_rows_emitted += projected;
        if self.cross_rows_emitted > self.config.cross_join_row_ceiling {
            return Err(Error::CrossJoinTooLarge {
                estimated: self.cross_rows_emitted,
                ceiling: self.config.cross_join_row_ceiling,
            });
        }

        for probe_row in 0..probe_rows as u32 {
            for build_row in 0..build_rows as u32 {
                self.pending.push((Some(probe_row), Some(build_row)));
            }
        }
        Ok(())
    }

    fn drain_pending_output(&mut self) -> Result<Option<Morsel>> {
        if self.pending.is_empty() {
            return Ok(None);
        }
        let take = self.pending.len().min(self.config.join_output_batch_rows);
        let batch: Vec<(Option<u32>, Option<u32>)> = self.pending.drain(..take).collect();
        let morsel = self.materialize_pairs(&batch)?;
        self.stats.record_output(&morsel);
        Ok(Some(morsel))
    }

    fn drain_unmatched_batch(&mut self) -> Result<Option<Morsel>> {
        let Some(build_morsel) = &self.build_morsel else {
            return Ok(None);
        };
        let total = build_morsel.row_count();
        let mut batch = Vec::new();
        while self.drain_cursor < total && batch.len() < self.config.join_output_batch_rows {
            let idx = self.drain_cursor as u32;
            self.drain_cursor += 1;
            if !self.is_seen(idx) {
                batch.push((None, Some(idx)));
            }
        }
        if batch.is_empty() {
            return Ok(None);
        }
        let morsel = self.materialize_pairs(&batch)?;
        self.stats.record_output(&morsel);
        Ok(Some(morsel))
    }

    fn materialize_pairs(&self, pairs: &[(Option<u32>, Option<u32>)]) -> Result<Morsel> {
        let probe_morsel = self.current_probe.as_ref();
        let build_morsel = self.build_morsel.as_ref();

        let probe_indices: Option<UInt32Array> = probe_morsel.map(|_| {
            UInt32Array::from(pairs.iter().map(|(p, _)| *p).collect::<Vec<_>>())
        });
        let build_indices: Option<UInt32Array> = build_morsel.map(|_| {
            UInt32Array::from(pairs.iter().map(|(_, b)| *b).collect::<Vec<_>>())
        });

        let mut columns = Vec::with_capacity(self.probe_field_count + self.build_field_count);

        let include_build = matches!(
            self.join_type,
            JoinType::Inner | JoinType::LeftOuter | JoinType::Cross
        );

        if let (Some(morsel), Some(indices)) = (probe_morsel, &probe_indices) {
            for col in morsel.columns() {
                columns.push(compute::take(col.as_ref(), indices, None)?);
            }
        } else {
            for field in self.probe_input.schema().fields() {
                columns.push(arrow::array::new_null_array(field.data_type(), pairs.len()));
            }
        }

        if include_build {
            if let (Some(morsel), Some(indices)) = (build_morsel, &build_indices) {
                for col in morsel.columns() {
                    columns.push(compute::take(col.as_ref(), indices, None)?);
                }
            } else {
                for field in self.build_input.schema().fields() {
                    columns.push(arrow::array::new_null_array(field.data_type(), pairs.len()));
                }
            }
        }

        Morsel::new(Arc::clone(&self.output_schema), columns)
    }
}

impl Operator for HashJoin {
    fn schema(&self) -> &SchemaRef {
        &self.output_schema
    }

    fn next(&mut self) -> Result<Option<Morsel>> {
        let start = Instant::now();
        loop {
            match self.state {
                State::Init => {
                    self.build()?;
                    self.state = State::Probing;
                }
                State::Probing => {
                    if let Some(morsel) = self.drain_pending_output()? {
                        self.stats.wall_time += start.elapsed();
                        return Ok(Some(morsel));
                    }
                    if self.all_seen() && matches!(self.join_type, JoinType::LeftOuter) {
                        self.probe_input.close();
                        self.state = State::DrainingUnmatched;
                        continue;
                    }
                    if !self.pull_and_probe_next_morsel()? {
                        self.state = if matches!(self.join_type, JoinType::LeftOuter) {
                            State::DrainingUnmatched
                        } else {
                            State::Done
                        };
                    }
                }
                State::DrainingUnmatched => {
                    if let Some(morsel) = self.drain_unmatched_batch()? {
                        self.stats.wall_time += start.elapsed();
                        return Ok(Some(morsel));
                    }
                    self.state = State::Done;
                }
                State::Done => {
                    self.stats.wall_time += start.elapsed();
                    return Ok(None);
                }
            }
        }
    }

    fn statistics(&self) -> &OperatorStats {
        &self.stats
    }

    fn close(&mut self) {
        self.build_input.close();
        self.probe_input.close();
        self.table = None;
        self.bloom = None;
        self.build_morsel = None;
        self.build_key_cells.clear();
        self.pending.clear();
    }
}

fn output_schema(build_schema: &Schema, probe_schema: &Schema, join_type: JoinType) -> SchemaRef {
    match join_type {
        JoinType::Semi | JoinType::Anti => Arc::new(probe_schema.clone()),
        JoinType::Inner | JoinType::LeftOuter | JoinType::Cross => {
            let mut fields: Vec<Field> = probe_schema.fields().iter().map(|f| (**f).clone()).collect();
            fields.extend(build_schema.fields().iter().map(|f| {
                let nullable = matches!(join_type, JoinType::LeftOuter) || f.is_nullable();
                (**f).clone().with_nullable(nullable)
            }));
            Arc::new(Schema::new(fields))
        }
    }
}

/// Combine a row's key columns into one 64-bit hash, or `None` if any key
/// column is null at that row (rows with a null join key never match, per
/// spec.md §4.5.1).
///
/// # Errors
/// Returns [`Error::TypeError`] if a key column's type isn't one this join
/// knows how to hash — an unrecognized type must not fall back to a
/// constant hash, since that would put every row of that type in the same
/// bucket and make them all "match" once [`key_cell`] equality is checked.
fn hash_row(columns: &[ArrayRef], row: usize) -> Result<Option<u64>> {
    use arrow::array::{
        BinaryArray, BooleanArray, Date32Array, Decimal128Array, Float32Array, Float64Array,
        Int32Array, Int64Array, StringArray, TimestampNanosecondArray,
    };
    use rustc_hash::FxHasher;
    use std::hash::Hasher;

    let mut hasher = FxHasher::default();
    for column in columns {
        if column.is_null(row) {
            return Ok(None);
        }
        if let Some(a) = column.as_any().downcast_ref::<Int32Array>() {
            hasher.write_i32(a.value(row));
        } else if let Some(a) = column.as_any().downcast_ref::<Int64Array>() {
            hasher.write_i64(a.value(row));
        } else if let Some(a) = column.as_any().downcast_ref::<Float64Array>() {
            hasher.write_u64(a.value(row).to_bits());
        } else if let Some(a) = column.as_any().downcast_ref::<Float32Array>() {
            hasher.write_u32(a.value(row).to_bits());
        } else if let Some(a) = column.as_any().downcast_ref::<Date32Array>() {
            hasher.write_i32(a.value(row));
        } else if let Some(a) = column.as_any().downcast_ref::<TimestampNanosecondArray>() {
            hasher.write_i64(a.value(row));
        } else if let Some(a) = column.as_any().downcast_ref::<Decimal128Array>() {
            hasher.write_i128(a.value(row));
        } else if let Some(a) = column.as_any().downcast_ref::<BooleanArray>() {
            hasher.write_u8(u8::from(a.value(row)));
        } else if let Some(a) = column.as_any().downcast_ref::<StringArray>() {
            hasher.write(a.value(row).as_bytes());
        } else if let Some(a) = column.as_any().downcast_ref::<BinaryArray>() {
            hasher.write(a.value(row));
        } else {
            return Err(Error::TypeError(format!(
                "unsupported join key column type: {:?}",
                column.data_type()
            )));
        }
    }
    Ok(Some(hasher.finish()))
}
