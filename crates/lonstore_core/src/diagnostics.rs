//! Diagnostics sinks for restore losses and store failures.
//!
//! Losses are not errors to the caller: the segment simply keeps its
//! application defaults. They are still reported here so hosts can log or
//! count them.

use crate::error::{LossReason, StoreError};
use crate::types::SegmentType;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Receiver of segment store diagnostics.
pub trait DiagnosticsSink: Send {
    /// A segment was restored from flash.
    fn segment_restored(&mut self, _segment: SegmentType) {}

    /// A segment could not be restored and keeps its defaults.
    fn segment_lost(&mut self, segment: SegmentType, reason: &LossReason);

    /// A segment was committed to flash.
    fn segment_stored(&mut self, _segment: SegmentType) {}

    /// A commit of a segment failed; the segment stays dirty.
    fn store_failed(&mut self, segment: SegmentType, error: &StoreError);
}

/// Sink that reports through `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl DiagnosticsSink for TracingSink {
    fn segment_restored(&mut self, segment: SegmentType) {
        debug!(%segment, "segment restored");
    }

    fn segment_lost(&mut self, segment: SegmentType, reason: &LossReason) {
        match reason {
            LossReason::NoPersistence => info!(%segment, "no persistent data, using defaults"),
            other => warn!(%segment, reason = %other, "persistent data lost, using defaults"),
        }
    }

    fn segment_stored(&mut self, segment: SegmentType) {
        debug!(%segment, "segment committed");
    }

    fn store_failed(&mut self, segment: SegmentType, err: &StoreError) {
        error!(%segment, error = %err, "segment commit failed");
    }
}

/// One recorded diagnostic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiagnosticEvent {
    /// See [`DiagnosticsSink::segment_restored`].
    Restored(SegmentType),
    /// See [`DiagnosticsSink::segment_lost`].
    Lost(SegmentType, LossReason),
    /// See [`DiagnosticsSink::segment_stored`].
    Stored(SegmentType),
    /// See [`DiagnosticsSink::store_failed`]; carries the error message.
    StoreFailed(SegmentType, String),
}

/// Sink that records every event, for tests and host tooling.
///
/// Clones share the same event list.
#[derive(Debug, Clone, Default)]
pub struct RecordingSink {
    events: Arc<Mutex<Vec<DiagnosticEvent>>>,
}

impl RecordingSink {
    /// Creates an empty recorder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of the recorded events.
    #[must_use]
    pub fn events(&self) -> Vec<DiagnosticEvent> {
        self.events.lock().clone()
    }

    /// Returns the recorded losses.
    #[must_use]
    pub fn losses(&self) -> Vec<(SegmentType, LossReason)> {
        self.events
            .lock()
            .iter()
            .filter_map(|event| match event {
                DiagnosticEvent::Lost(segment, reason) => Some((*segment, reason.clone())),
                _ => None,
            })
            .collect()
    }

    /// Clears the recorded events.
    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

impl DiagnosticsSink for RecordingSink {
    fn segment_restored(&mut self, segment: SegmentType) {
        self.events.lock().push(DiagnosticEvent::Restored(segment));
    }

    fn segment_lost(&mut self, segment: SegmentType, reason: &LossReason) {
        self.events
            .lock()
            .push(DiagnosticEvent::Lost(segment, reason.clone()));
    }

    fn segment_stored(&mut self, segment: SegmentType) {
        self.events.lock().push(DiagnosticEvent::Stored(segment));
    }

    fn store_failed(&mut self, segment: SegmentType, err: &StoreError) {
        self.events
            .lock()
            .push(DiagnosticEvent::StoreFailed(segment, err.to_string()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recording_sink_shares_events() {
        let sink = RecordingSink::new();
        let mut writer = sink.clone();

        writer.segment_stored(SegmentType::Security);
        writer.segment_lost(SegmentType::UniqueId, &LossReason::NoPersistence);

        assert_eq!(
            sink.events(),
            vec![
                DiagnosticEvent::Stored(SegmentType::Security),
                DiagnosticEvent::Lost(SegmentType::UniqueId, LossReason::NoPersistence),
            ]
        );
        assert_eq!(sink.losses().len(), 1);

        sink.clear();
        assert!(sink.events().is_empty());
    }
}
