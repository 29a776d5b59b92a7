//! The morsel driver: owns the root of an operator tree and pulls it to
//! completion.
//!
//! Grounded on the teacher's `storage::MorselIterator` (pull one
//! bounded-size chunk at a time, track an offset, never load more than one
//! chunk ahead) and its `MAX_IN_FLIGHT_TRANSFERS`-bounded GPU transfer
//! queue (cooperative backpressure via a bounded in-flight count rather
//! than a lock), generalized from a single producer over a fixed batch
//! list to pulling an arbitrary `Operator` tree, with cooperative
//! cancellation and a wall-clock deadline added per spec.md §4.8.

use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, trace, warn};

use crate::error::{Error, Result};
use crate::morsel::Morsel;
use crate::operators::{Operator, OperatorStats};
use crate::schema::SchemaRef;

/// A shared, cloneable flag a caller can set from another thread to
/// cooperatively cancel a running query. Checked by the driver only
/// between morsels, matching every `Operator`'s own contract.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    /// Build a fresh, unset token.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Idempotent.
    pub fn cancel(&self) {
        self.0.store(true, AtomicOrdering::SeqCst);
    }

    /// True if cancellation has been requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(AtomicOrdering::SeqCst)
    }
}

/// Drives an `Operator` tree to completion, morsel by morsel.
///
/// Owns the root operator. Checks cancellation and the optional deadline
/// between morsel pulls only — never mid-morsel, matching every
/// operator's own `next()` contract (spec.md §4.8's "suspension points:
/// exactly the morsel boundary").
pub struct MorselDriver {
    root: Box<dyn Operator>,
    token: CancellationToken,
    deadline: Option<Duration>,
    started_at: Option<Instant>,
}

impl MorselDriver {
    /// Build a driver over `root`, with no deadline and a fresh
    /// cancellation token.
    #[must_use]
    pub fn new(root: Box<dyn Operator>) -> Self {
        Self {
            root,
            token: CancellationToken::new(),
            deadline: None,
            started_at: None,
        }
    }

    /// Attach a wall-clock deadline for the whole query. Checked between
    /// morsels; exceeding it cancels the query (spec.md §4.8 "Timeouts").
    #[must_use]
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Share this driver's cancellation token so another thread can call
    /// [`CancellationToken::cancel`] on it.
    #[must_use]
    pub fn cancellation_token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// The schema of every morsel this driver will emit.
    #[must_use]
    pub fn schema(&self) -> &SchemaRef {
        self.root.schema()
    }

    /// Pull the next output morsel, or `None` at end of stream or on
    /// cancellation/deadline expiry.
    ///
    /// # Errors
    /// Returns [`Error::Cancelled`] if cancellation was requested or the
    /// deadline elapsed, or propagates any failure from the operator tree.
    pub fn next(&mut self) -> Result<Option<Morsel>> {
        if self.started_at.is_none() {
            self.started_at = Some(Instant::now());
        }

        if self.token.is_cancelled() {
            debug!("driver: cancellation requested, closing operator tree");
            self.root.close();
            return Err(Error::Cancelled);
        }
        if let (Some(deadline), Some(started_at)) = (self.deadline, self.started_at) {
            if started_at.elapsed() >= deadline {
                warn!(?deadline, "driver: wall-clock deadline exceeded, cancelling");
                self.token.cancel();
                self.root.close();
                return Err(Error::Cancelled);
            }
        }

        let morsel = self.root.next();
        match &morsel {
            Ok(Some(m)) => trace!(rows = m.row_count(), "driver: pulled morsel"),
            Ok(None) => debug!("driver: operator tree exhausted"),
            Err(e) => {
                warn!(error = %e, "driver: operator tree failed, closing");
                self.root.close();
            }
        }
        morsel
    }

    /// Run the whole query to completion, collecting every output morsel.
    ///
    /// Guarantees `close()` runs on the operator tree on every exit path:
    /// success, error, or cancellation (spec.md §7's error propagation
    /// policy, and §5's "cancellation must release hash tables, bloom
    /// filters, sort spill files...before returning").
    ///
    /// # Errors
    /// Returns [`Error::Cancelled`] or propagates the first operator
    /// failure encountered.
    pub fn run(&mut self) -> Result<Vec<Morsel>> {
        let mut out = Vec::new();
        loop {
            match self.next() {
                Ok(Some(m)) => out.push(m),
                Ok(None) => {
                    self.root.close();
                    return Ok(out);
                }
                Err(e) => {
                    self.root.close();
                    return Err(e);
                }
            }
        }
    }

    /// This driver's root operator's accumulated statistics.
    ///
    /// Operators that wrap an input compose their own statistics from
    /// their children (e.g. `rows_in` reflects what they pulled); the
    /// driver does not aggregate across the tree itself, it just surfaces
    /// the root's view, which is what spec.md §6's "query statistics"
    /// exposes to the caller.
    #[must_use]
    pub fn statistics(&self) -> &OperatorStats {
        self.root.statistics()
    }
}
