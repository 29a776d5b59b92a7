//! `Reader`: the source-of-morsels trait every scan sits behind.
//!
//! Generalizes the teacher's `StorageEngine` (an in-memory
//! `Vec<RecordBatch>` with a `MorselIterator` chunking by a target byte
//! size) into a trait so the driver can pull from any connector, with
//! `VecReader` as the in-memory implementation that plays the teacher's
//! original role.

use crate::error::Result;
use crate::morsel::Morsel;
use crate::operators::{Operator, OperatorStats};
use crate::schema::SchemaRef;

/// A source of morsels. Implementors may wrap a file scan, a network
/// connector, or (as `VecReader` does) an in-memory buffer.
pub trait Reader: Send {
    /// The schema of every morsel this reader will emit.
    fn schema(&self) -> &SchemaRef;

    /// Pull the next morsel, or `None` at end of stream.
    ///
    /// # Errors
    /// Returns [`crate::error::Error::Io`] or a connector-specific decode
    /// failure.
    fn next(&mut self) -> Result<Option<Morsel>>;

    /// Release any resources (file handles, connections). Called exactly
    /// once by the driver, on both the success and failure paths.
    fn close(&mut self) {}
}

/// An in-memory `Reader` over a fixed set of morsels, chunked to a target
/// row count per morsel. Mirrors `StorageEngine::new` plus
/// `MorselIterator` from the original storage layer, minus the
/// byte-size-based chunking (callers pass already-sized morsels or rely on
/// `VecReader::chunked` to re-chunk by row count).
pub struct VecReader {
    schema: SchemaRef,
    morsels: std::vec::IntoIter<Morsel>,
}

impl VecReader {
    /// Wrap a fixed list of morsels, all sharing `schema`.
    #[must_use]
    pub fn new(schema: SchemaRef, morsels: Vec<Morsel>) -> Self {
        Self {
            schema,
            morsels: morsels.into_iter(),
        }
    }

    /// Re-chunk a single materialized morsel into a sequence of morsels of
    /// at most `rows_per_chunk` rows each.
    ///
    /// # Errors
    /// Propagates [`Morsel::with_selection`]/[`Morsel::materialize`] failures.
    pub fn chunked(morsel: &Morsel, rows_per_chunk: usize) -> Result<Self> {
        let schema = morsel.schema().clone();
        let total = morsel.row_count();
        let mut chunks = Vec::with_capacity(total.div_ceil(rows_per_chunk.max(1)));
        let mut start = 0usize;
        while start < total {
            let end = (start + rows_per_chunk).min(total);
            let indices: Vec<u32> = (start as u32..end as u32).collect();
            chunks.push(morsel.with_selection(indices)?.materialize()?);
            start = end;
        }
        Ok(Self::new(schema, chunks))
    }
}

impl Reader for VecReader {
    fn schema(&self) -> &SchemaRef {
        &self.schema
    }

    fn next(&mut self) -> Result<Option<Morsel>> {
        Ok(self.morsels.next())
    }
}

/// Bridges any [`Reader`] into the root of an `Operator` tree, so a scan
/// can sit under `Filter`/`Projection`/joins/etc. like any other operator.
pub struct ReaderAdapter<R: Reader> {
    reader: R,
    stats: OperatorStats,
}

impl<R: Reader> ReaderAdapter<R> {
    /// Wrap `reader` as an `Operator`.
    #[must_use]
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            stats: OperatorStats::default(),
        }
    }
}

impl<R: Reader> Operator for ReaderAdapter<R> {
    fn schema(&self) -> &SchemaRef {
        self.reader.schema()
    }

    fn next(&mut self) -> Result<Option<Morsel>> {
        let morsel = self.reader.next()?;
        if let Some(m) = &morsel {
            self.stats.record_output(m);
        }
        Ok(morsel)
    }

    fn statistics(&self) -> &OperatorStats {
        &self.stats
    }

    fn close(&mut self) {
        self.reader.close();
    }
}
