//! Error types for the execution core.
//!
//! Mirrors the taxonomy operators and the driver rely on to decide whether a
//! failure is fatal (almost always) or representable as a per-row null in
//! lenient mode (`ValueError` only).

use thiserror::Error;

/// Result type alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Execution-core error taxonomy.
///
/// Every variant is fatal to the query unless documented otherwise. Callers
/// that receive an `Error` can assume the driver has already run `close()`
/// on every operator in the tree (see [`crate::driver::MorselDriver`]).
#[derive(Error, Debug)]
pub enum Error {
    /// Name resolution failure, type mismatch, or ambiguous reference.
    #[error("schema error: {0}")]
    SchemaError(String),

    /// Two morsels or operators disagree on column count or type.
    #[error("schema mismatch: {0}")]
    SchemaMismatch(String),

    /// Arithmetic attempted between incompatible types, or an expression
    /// node was applied to a column of an unsupported type.
    #[error("type error: {0}")]
    TypeError(String),

    /// Integer overflow detected during a checked arithmetic op.
    #[error("overflow: {0}")]
    Overflow(String),

    /// Division or modulo by zero. The vectorized expression evaluator
    /// itself always takes the lenient SQL default (null for that row,
    /// see `expr::checked_div`); this variant is for callers layering a
    /// strict check on top (e.g. an aggregate's own overflow policy, see
    /// [`crate::config::NumericMode`]) that want a single typed error to
    /// raise once they observe an unexpected null.
    #[error("division by zero")]
    DivisionByZero,

    /// A `LIKE`/`REGEX` pattern failed to compile.
    #[error("regex compile error: {0}")]
    RegexCompile(String),

    /// A date/timestamp literal could not be parsed.
    #[error("unparseable date/timestamp: {0}")]
    UnparseableDate(String),

    /// `FunctionCall` referenced a name absent from the builtin registry.
    #[error("unknown function: {0}")]
    UnknownFunction(String),

    /// Memory limit exceeded, spill failure, or a wall-clock deadline fired.
    #[error("resource limit exceeded: {0}")]
    ResourceExceeded(String),

    /// Estimated cross-join output exceeded the configured row ceiling.
    #[error("cross join too large: estimated {estimated} rows exceeds ceiling {ceiling}")]
    CrossJoinTooLarge {
        /// Estimated output row count.
        estimated: u64,
        /// Configured ceiling.
        ceiling: u64,
    },

    /// Explicit cancellation or deadline expiry. Not a bug; callers should
    /// not treat this as a failure worth reporting upstream.
    #[error("query cancelled")]
    Cancelled,

    /// Connector read failure or spill I/O failure, after retries (if any)
    /// are exhausted by the connector itself.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Error surfaced by an Arrow compute kernel.
    #[error("arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    /// Invalid argument supplied directly to a public API (e.g. `k == 0`
    /// for `top_k`, or an out-of-range column index).
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Catch-all for conditions not worth a dedicated variant.
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// True for errors that represent deliberate cancellation rather than a
    /// query defect — useful for callers deciding whether to log at `warn`
    /// or treat the outcome as routine.
    #[must_use]
    pub const fn is_cancellation(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancelled_is_cancellation() {
        assert!(Error::Cancelled.is_cancellation());
        assert!(!Error::DivisionByZero.is_cancellation());
    }

    #[test]
    fn display_messages_are_human_readable() {
        assert_eq!(Error::DivisionByZero.to_string(), "division by zero");
        assert_eq!(
            Error::CrossJoinTooLarge {
                estimated: 100,
                ceiling: 10
            }
            .to_string(),
            "cross join too large: estimated 100 rows exceeds ceiling 10"
        );
    }

    #[test]
    fn io_error_converts_via_from() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
    }
}
