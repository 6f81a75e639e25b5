//! Per-stream projection cursors.
//!
//! Tracks the last applied `sequence_number` per aggregate stream so
//! projections stay idempotent under at-least-once delivery.

use std::collections::HashMap;

use parking_lot::Mutex;

use stockforge_core::AggregateId;

use super::ProjectionError;

#[derive(Debug, Default)]
pub struct StreamCursors {
    inner: Mutex<HashMap<AggregateId, u64>>,
}

impl StreamCursors {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `apply` if `seq` is the next position for the stream, then advance.
    ///
    /// - `seq <= cursor`: duplicate or replay, ignored
    /// - first envelope of a stream: any positive sequence is accepted
    /// - afterwards: strictly `cursor + 1`, anything else is a gap
    ///
    /// The cursor lock is held across `apply`, so one stream is applied by
    /// one caller at a time.
    pub fn advance(
        &self,
        aggregate_id: AggregateId,
        seq: u64,
        apply: impl FnOnce() -> Result<(), ProjectionError>,
    ) -> Result<(), ProjectionError> {
        let mut cursors = self.inner.lock();
        let last = cursors.get(&aggregate_id).copied().unwrap_or(0);

        if seq == 0 {
            return Err(ProjectionError::NonMonotonicSequence { last, found: seq });
        }
        if seq <= last {
            return Ok(());
        }
        if last != 0 && seq != last + 1 {
            return Err(ProjectionError::NonMonotonicSequence { last, found: seq });
        }

        apply()?;
        cursors.insert(aggregate_id, seq);
        Ok(())
    }

    pub fn clear(&self) {
        self.inner.lock().clear();
    }
}
