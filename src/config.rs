//! Execution configuration.
//!
//! Config values are plain data, validated once at [`ExecutionConfigBuilder::build`]
//! and never mutated while a query is running — the same contract the
//! teacher crate gives `DatabaseBuilder`.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{Error, Result};

/// Numeric error mode: how the expression evaluator handles per-row
/// arithmetic failures (overflow, division by zero).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NumericMode {
    /// Overflow/division-by-zero fail the whole query.
    Strict,
    /// Overflow/division-by-zero produce a null for that row.
    Lenient,
}

/// COUNT DISTINCT implementation strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CountDistinctMode {
    /// Exact cardinality via a hash set of seen values.
    Exact,
    /// Approximate cardinality via `HyperLogLog` (≤ 2% error).
    Approximate,
}

/// Tunables for a single query execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionConfig {
    /// Target row count per morsel.
    pub morsel_size_rows: usize,
    /// How arithmetic errors are handled (spec.md §7).
    pub numeric_mode: NumericMode,
    /// COUNT DISTINCT strategy.
    pub count_distinct_mode: CountDistinctMode,
    /// Per-query memory budget in bytes; exceeding it fails Join/Aggregate
    /// and triggers spill for Sort.
    pub memory_limit_bytes: Option<usize>,
    /// Row-count threshold above which Sort spills partially-sorted runs.
    pub sort_spill_threshold_rows: usize,
    /// Output-row ceiling for cross joins.
    pub cross_join_row_ceiling: u64,
    /// Whether stateless operators and join probes may run across a rayon
    /// thread pool.
    pub parallel: bool,
    /// Optional wall-clock deadline for the whole query.
    pub deadline: Option<Duration>,
    /// Output morsel size cap for hash join emission.
    pub join_output_batch_rows: usize,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            morsel_size_rows: 65_536,
            numeric_mode: NumericMode::Lenient,
            count_distinct_mode: CountDistinctMode::Exact,
            memory_limit_bytes: None,
            sort_spill_threshold_rows: 1_000_000,
            cross_join_row_ceiling: 100_000_000,
            parallel: false,
            deadline: None,
            join_output_batch_rows: 65_536,
        }
    }
}

impl ExecutionConfig {
    /// Start building a config from defaults.
    #[must_use]
    pub fn builder() -> ExecutionConfigBuilder {
        ExecutionConfigBuilder::default()
    }
}

/// Fluent builder for [`ExecutionConfig`].
#[derive(Debug, Clone, Default)]
pub struct ExecutionConfigBuilder {
    inner: ExecutionConfig,
}

impl ExecutionConfigBuilder {
    /// Set the target morsel size in rows.
    #[must_use]
    pub const fn morsel_size_rows(mut self, rows: usize) -> Self {
        self.inner.morsel_size_rows = rows;
        self
    }

    /// Set strict vs. lenient numeric error handling.
    #[must_use]
    pub const fn numeric_mode(mut self, mode: NumericMode) -> Self {
        self.inner.numeric_mode = mode;
        self
    }

    /// Set the COUNT DISTINCT strategy.
    #[must_use]
    pub const fn count_distinct_mode(mut self, mode: CountDistinctMode) -> Self {
        self.inner.count_distinct_mode = mode;
        self
    }

    /// Set the per-query memory limit.
    #[must_use]
    pub const fn memory_limit_bytes(mut self, bytes: usize) -> Self {
        self.inner.memory_limit_bytes = Some(bytes);
        self
    }

    /// Set the sort spill threshold, in rows.
    #[must_use]
    pub const fn sort_spill_threshold_rows(mut self, rows: usize) -> Self {
        self.inner.sort_spill_threshold_rows = rows;
        self
    }

    /// Set the cross join row ceiling.
    #[must_use]
    pub const fn cross_join_row_ceiling(mut self, ceiling: u64) -> Self {
        self.inner.cross_join_row_ceiling = ceiling;
        self
    }

    /// Enable parallel morsel processing for stateless operators and the
    /// hash-join probe side.
    #[must_use]
    pub const fn parallel(mut self, enabled: bool) -> Self {
        self.inner.parallel = enabled;
        self
    }

    /// Set a wall-clock deadline for the query.
    #[must_use]
    pub const fn deadline(mut self, deadline: Duration) -> Self {
        self.inner.deadline = Some(deadline);
        self
    }

    /// Set the output morsel size cap for hash join emission.
    #[must_use]
    pub const fn join_output_batch_rows(mut self, rows: usize) -> Self {
        self.inner.join_output_batch_rows = rows;
        self
    }

    /// Validate and produce the final config.
    ///
    /// # Errors
    /// Returns [`Error::InvalidInput`] if any tunable is zero where that
    /// would make the corresponding operator unable to make progress.
    pub fn build(self) -> Result<ExecutionConfig> {
        let cfg = self.inner;
        if cfg.morsel_size_rows == 0 {
            return Err(Error::InvalidInput(
                "morsel_size_rows must be greater than 0".to_string(),
            ));
        }
        if cfg.join_output_batch_rows == 0 {
            return Err(Error::InvalidInput(
                "join_output_batch_rows must be greater than 0".to_string(),
            ));
        }
        if cfg.sort_spill_threshold_rows == 0 {
            return Err(Error::InvalidInput(
                "sort_spill_threshold_rows must be greater than 0".to_string(),
            ));
        }
        Ok(cfg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_build_successfully() {
        let cfg = ExecutionConfig::builder().build().unwrap();
        assert_eq!(cfg.numeric_mode, NumericMode::Lenient);
        assert!(!cfg.parallel);
    }

    #[test]
    fn zero_morsel_size_rejected() {
        let result = ExecutionConfig::builder().morsel_size_rows(0).build();
        assert!(result.is_err());
    }

    #[test]
    fn fluent_setters_compose() {
        let cfg = ExecutionConfig::builder()
            .morsel_size_rows(1_000)
            .numeric_mode(NumericMode::Strict)
            .parallel(true)
            .cross_join_row_ceiling(10)
            .build()
            .unwrap();
        assert_eq!(cfg.morsel_size_rows, 1_000);
        assert_eq!(cfg.numeric_mode, NumericMode::Strict);
        assert!(cfg.parallel);
        assert_eq!(cfg.cross_join_row_ceiling, 10);
    }
}
