//! `Operator`: the pull-based execution tree node trait, and the
//! statistics every operator reports to the driver.

pub mod aggregate;
pub mod join;
pub(crate) mod keycell;
pub mod simple;
pub mod sort;
pub mod topk;

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::Result;
use crate::morsel::Morsel;
use crate::schema::SchemaRef;

/// Per-operator counters collected by the driver and exposed to the
/// caller at the end of a query.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OperatorStats {
    /// Morsels pulled from this operator's input(s).
    pub morsels_in: u64,
    /// Morsels emitted by this operator.
    pub morsels_out: u64,
    /// Rows pulled from this operator's input(s).
    pub rows_in: u64,
    /// Rows emitted by this operator.
    pub rows_out: u64,
    /// Cumulative wall time spent inside this operator's `next()`.
    pub wall_time: Duration,
    /// Estimated bytes processed (sum of input array memory sizes).
    pub bytes_processed: u64,
    /// Rows eliminated by a bloom filter pre-probe, if this operator is a
    /// hash join.
    pub bloom_eliminations: u64,
    /// Bytes written to spill storage, if this operator is a sort.
    pub spill_bytes: u64,
}

impl OperatorStats {
    /// Record one input morsel.
    pub fn record_input(&mut self, morsel: &Morsel) {
        self.morsels_in += 1;
        self.rows_in += morsel.row_count() as u64;
    }

    /// Record one output morsel.
    pub fn record_output(&mut self, morsel: &Morsel) {
        self.morsels_out += 1;
        self.rows_out += morsel.row_count() as u64;
    }
}

/// A node in the execution tree: pulls from its input(s) and produces
/// morsels of its own schema.
pub trait Operator: Send {
    /// The schema of every morsel this operator emits.
    fn schema(&self) -> &SchemaRef;

    /// Pull the next output morsel, or `None` at end of stream.
    ///
    /// Implementations must check the driver's cancellation flag (if any)
    /// only between morsels, never mid-morsel, and must be safe to call
    /// again after returning `None` (subsequent calls also return `None`).
    ///
    /// # Errors
    /// Propagates any failure from evaluating expressions, probing hash
    /// tables, spilling to storage, or pulling from this operator's input.
    fn next(&mut self) -> Result<Option<Morsel>>;

    /// This operator's accumulated statistics so far.
    fn statistics(&self) -> &OperatorStats;

    /// Release any resources held by this operator (hash tables, spill
    /// files). Called exactly once by the driver on every exit path.
    fn close(&mut self) {}
}
