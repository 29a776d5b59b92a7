//! # opteryx-core: morsel-driven execution core for an analytical engine
//!
//! A pull-based, morsel-driven dataflow engine over Apache Arrow columnar
//! batches: the hash join family (inner/left-outer/semi/anti/cross, with a
//! bloom filter pre-probe), streaming and grouped aggregation, a
//! vectorized three-valued expression evaluator, multi-key sort with
//! spill, and bounded-heap Top-N. SQL parsing, logical planning, storage
//! connectors, and query-plan caching are out of scope — this crate
//! starts from an already-compiled operator tree.
//!
//! ## Example
//!
//! ```rust,no_run
//! use opteryx_core::{Database, operators::simple::Filter, reader::{Reader, VecReader}};
//! use opteryx_core::expr::{Expr, BinaryOp, ScalarValue};
//! use opteryx_core::operators::Operator;
//!
//! # async fn run(schema: opteryx_core::schema::SchemaRef, morsels: Vec<opteryx_core::morsel::Morsel>) -> opteryx_core::Result<()> {
//! let reader = VecReader::new(schema, morsels);
//! let scan: Box<dyn Operator> = Box::new(opteryx_core::reader::ReaderAdapter::new(reader));
//! let predicate = Expr::Binary(
//!     BinaryOp::Gt,
//!     Box::new(Expr::Column(0)),
//!     Box::new(Expr::Literal(ScalarValue::Int32(0))),
//! );
//! let plan: Box<dyn Operator> = Box::new(Filter::new(scan, predicate));
//!
//! let db = Database::builder().build()?;
//! let result = db.query(plan).execute().await?;
//! println!("rows: {}", result.stats.rows_out);
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

pub mod bloom;
pub mod config;
pub mod driver;
pub mod error;
pub mod expr;
pub mod hashtable;
pub mod morsel;
pub mod operators;
pub mod reader;
pub mod schema;
pub mod spill;

pub use config::{CountDistinctMode, ExecutionConfig, ExecutionConfigBuilder, NumericMode};
pub use driver::{CancellationToken, MorselDriver};
pub use error::{Error, Result};
pub use operators::{Operator, OperatorStats};

use std::sync::Arc;

use crate::morsel::Morsel;
use crate::schema::SchemaRef;

/// Everything a caller gets back from a completed query: the output
/// morsels, the root operator's statistics, and the output schema
/// (spec.md §6's "query statistics exposed to the caller").
#[derive(Debug, Clone)]
pub struct QueryResult {
    /// The output morsels, in driver order.
    pub morsels: Vec<Morsel>,
    /// The root operator's accumulated statistics.
    pub stats: OperatorStats,
    /// The schema every morsel in `morsels` shares.
    pub schema: SchemaRef,
}

impl QueryResult {
    /// The total row count across all output morsels.
    #[must_use]
    pub fn row_count(&self) -> usize {
        self.morsels.iter().map(Morsel::row_count).sum()
    }
}

/// A query already bound to a driver, ready to run asynchronously.
///
/// `execute()` drives the synchronous [`MorselDriver`] to completion on a
/// blocking thread pool thread via [`tokio::task::spawn_blocking`] — the
/// core itself stays synchronous (spec.md §4.8/§5); this is sugar over it
/// for callers already in an async context.
pub struct QueryBuilder {
    driver: MorselDriver,
}

impl QueryBuilder {
    /// A token the caller can use to cancel this query from another task
    /// or thread while `execute()` is in flight.
    #[must_use]
    pub fn cancellation_token(&self) -> CancellationToken {
        self.driver.cancellation_token()
    }

    /// Run the query to completion.
    ///
    /// # Errors
    /// Returns [`Error::Cancelled`] if cancelled or the deadline elapsed,
    /// or propagates the first operator failure. Returns [`Error::Other`]
    /// if the blocking task itself panicked.
    pub async fn execute(self) -> Result<QueryResult> {
        let mut driver = self.driver;
        tokio::task::spawn_blocking(move || {
            let schema = driver.schema().clone();
            let morsels = driver.run()?;
            let stats = driver.statistics().clone();
            Ok(QueryResult { morsels, stats, schema })
        })
        .await
        .map_err(|e| Error::Other(format!("query task panicked: {e}")))?
    }
}

/// Entry point: binds an [`ExecutionConfig`] to queries run against it.
///
/// Mirrors the teacher crate's `Database`/`DatabaseBuilder` shape. Unlike
/// the teacher, this core never owns storage — every query takes an
/// already-built operator tree (typically rooted at a `Reader`-backed
/// scan) rather than a SQL string, since parsing and planning are out of
/// scope (spec.md §1).
#[derive(Debug, Clone)]
pub struct Database {
    config: ExecutionConfig,
}

impl Database {
    /// Start building a `Database` from default configuration.
    #[must_use]
    pub fn builder() -> DatabaseBuilder {
        DatabaseBuilder::default()
    }

    /// This database's execution configuration.
    #[must_use]
    pub const fn config(&self) -> &ExecutionConfig {
        &self.config
    }

    /// Bind an operator tree to this database's configuration, ready to
    /// run with `.execute().await`.
    #[must_use]
    pub fn query(&self, plan: Box<dyn Operator>) -> QueryBuilder {
        let mut driver = MorselDriver::new(plan);
        if let Some(deadline) = self.config.deadline {
            driver = driver.with_deadline(deadline);
        }
        QueryBuilder { driver }
    }
}

/// Fluent builder for [`Database`], delegating every setter to
/// [`ExecutionConfigBuilder`].
#[derive(Debug, Clone, Default)]
pub struct DatabaseBuilder {
    config: ExecutionConfigBuilder,
}

impl DatabaseBuilder {
    /// Set the target morsel size in rows.
    #[must_use]
    pub fn morsel_size_rows(mut self, rows: usize) -> Self {
        self.config = self.config.morsel_size_rows(rows);
        self
    }

    /// Set strict vs. lenient numeric error handling.
    #[must_use]
    pub fn numeric_mode(mut self, mode: NumericMode) -> Self {
        self.config = self.config.numeric_mode(mode);
        self
    }

    /// Set the `COUNT DISTINCT` strategy.
    #[must_use]
    pub fn count_distinct_mode(mut self, mode: CountDistinctMode) -> Self {
        self.config = self.config.count_distinct_mode(mode);
        self
    }

    /// Set the per-query memory limit, in bytes.
    #[must_use]
    pub fn memory_limit_bytes(mut self, bytes: usize) -> Self {
        self.config = self.config.memory_limit_bytes(bytes);
        self
    }

    /// Set the sort spill threshold, in rows.
    #[must_use]
    pub fn sort_spill_threshold_rows(mut self, rows: usize) -> Self {
        self.config = self.config.sort_spill_threshold_rows(rows);
        self
    }

    /// Set the cross join output row ceiling.
    #[must_use]
    pub fn cross_join_row_ceiling(mut self, ceiling: u64) -> Self {
        self.config = self.config.cross_join_row_ceiling(ceiling);
        self
    }

    /// Enable parallel morsel processing for stateless operators and the
    /// hash-join probe side.
    #[must_use]
    pub fn parallel(mut self, enabled: bool) -> Self {
        self.config = self.config.parallel(enabled);
        self
    }

    /// Set a wall-clock deadline applied to every query run against the
    /// built `Database`.
    #[must_use]
    pub fn deadline(mut self, deadline: std::time::Duration) -> Self {
        self.config = self.config.deadline(deadline);
        self
    }

    /// Set the output morsel size cap for hash join emission.
    #[must_use]
    pub fn join_output_batch_rows(mut self, rows: usize) -> Self {
        self.config = self.config.join_output_batch_rows(rows);
        self
    }

    /// Validate configuration and build the `Database`.
    ///
    /// # Errors
    /// Propagates [`ExecutionConfigBuilder::build`]'s validation errors.
    pub fn build(self) -> Result<Database> {
        Ok(Database {
            config: self.config.build()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::morsel::Morsel;
    use crate::operators::OperatorStats;
    use crate::reader::{Reader, VecReader};
    use arrow::array::{ArrayRef, Int32Array};
    use arrow::datatypes::{DataType, Field, Schema};

    struct ReaderOperator {
        reader: VecReader,
        stats: OperatorStats,
    }

    impl Operator for ReaderOperator {
        fn schema(&self) -> &SchemaRef {
            self.reader.schema()
        }
        fn next(&mut self) -> Result<Option<Morsel>> {
            let m = self.reader.next()?;
            if let Some(m) = &m {
                self.stats.record_output(m);
            }
            Ok(m)
        }
        fn statistics(&self) -> &OperatorStats {
            &self.stats
        }
    }

    fn schema() -> SchemaRef {
        Arc::new(Schema::new(vec![Field::new("v", DataType::Int32, false)]))
    }

    #[tokio::test]
    async fn query_executes_and_reports_row_count() {
        let m = Morsel::new(schema(), vec![Arc::new(Int32Array::from(vec![1, 2, 3])) as ArrayRef]).unwrap();
        let plan: Box<dyn Operator> = Box::new(ReaderOperator {
            reader: VecReader::new(schema(), vec![m]),
            stats: OperatorStats::default(),
        });

        let db = Database::builder().build().unwrap();
        let result = db.query(plan).execute().await.unwrap();
        assert_eq!(result.row_count(), 3);
        assert_eq!(result.stats.rows_out, 3);
    }

    #[tokio::test]
    async fn cancellation_token_cancels_in_flight_query() {
        let m = Morsel::new(schema(), vec![Arc::new(Int32Array::from(vec![1])) as ArrayRef]).unwrap();
        let plan: Box<dyn Operator> = Box::new(ReaderOperator {
            reader: VecReader::new(schema(), vec![m]),
            stats: OperatorStats::default(),
        });

        let db = Database::builder().build().unwrap();
        let query = db.query(plan);
        query.cancellation_token().cancel();
        let result = query.execute().await;
        assert!(result.is_err());
    }

    #[test]
    fn builder_rejects_invalid_config() {
        assert!(Database::builder().morsel_size_rows(0).build().is_err());
    }
}
