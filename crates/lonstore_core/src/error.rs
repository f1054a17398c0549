//! Error types for lonstore core.

use crate::codec::CodecError;
use crate::ledger::{LedgerEvent, LedgerState};
use crate::types::SegmentType;
use lonstore_flash::FlashError;
use std::fmt;
use thiserror::Error;

/// Result type for core operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur in segment store operations.
///
/// Restore never returns these; its failures are reported as a
/// [`LossReason`] inside [`LoadOutcome::Lost`].
///
/// Neither the planner nor the driver panics: every operation returns one
/// of these and the caller decides whether to retry, skip or fall back.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Geometry query or device open failed.
    #[error("flash device unavailable: {reason}")]
    DeviceUnavailable {
        /// Description of the failure.
        reason: String,
    },

    /// A write larger than the capacity reserved for the segment.
    #[error("segment {segment}: {requested} bytes exceed reserved capacity of {capacity}")]
    CapacityExceeded {
        /// The segment concerned.
        segment: SegmentType,
        /// Requested size in bytes.
        requested: u64,
        /// Reserved capacity in bytes.
        capacity: u64,
    },

    /// An underlying block write or erase failed mid-stream.
    #[error("segment {segment}: write failed")]
    WriteFailure {
        /// The segment concerned.
        segment: SegmentType,
        /// The device error.
        #[source]
        source: FlashError,
    },

    /// Checksum failure or short read.
    #[error("segment {segment}: corruption: {detail}")]
    Corruption {
        /// The segment concerned.
        segment: SegmentType,
        /// Description of the corruption.
        detail: String,
    },

    /// No codec is registered for the segment.
    #[error("segment {0} is not registered")]
    UnregisteredSegment(SegmentType),

    /// The ledger cannot make the requested transition without an erase.
    #[error("segment {segment}: illegal ledger transition {event:?} from {from:?}")]
    InvalidTransition {
        /// The segment concerned.
        segment: SegmentType,
        /// The ledger state found on flash.
        from: LedgerState,
        /// The requested event.
        event: LedgerEvent,
    },

    /// Operation not permitted in the current state.
    #[error("invalid operation: {message}")]
    InvalidOperation {
        /// Description of why the operation is invalid.
        message: String,
    },

    /// Flash device error outside a write sequence.
    #[error("flash error: {0}")]
    Flash(#[from] FlashError),

    /// Codec error.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),
}

impl StoreError {
    /// Creates a device unavailable error.
    pub fn device_unavailable(reason: impl Into<String>) -> Self {
        Self::DeviceUnavailable {
            reason: reason.into(),
        }
    }

    /// Creates a write failure error.
    pub fn write_failure(segment: SegmentType, source: FlashError) -> Self {
        Self::WriteFailure { segment, source }
    }

    /// Creates a corruption error.
    pub fn corruption(segment: SegmentType, detail: impl Into<String>) -> Self {
        Self::Corruption {
            segment,
            detail: detail.into(),
        }
    }

    /// Creates an invalid operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }
}

/// Which of the two header signatures disagreed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureKind {
    /// The store format magic.
    Format,
    /// The caller-supplied application signature.
    Application,
}

impl fmt::Display for SignatureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Format => f.write_str("format"),
            Self::Application => f.write_str("application"),
        }
    }
}

/// The specific cause reported when a segment cannot be restored.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LossReason {
    /// Never committed, or an interrupted transaction was detected.
    #[error("no persistent data")]
    NoPersistence,

    /// Stored data belongs to a different format or application build.
    #[error("{kind} signature mismatch (expected {expected:#010x}, found {found:#010x})")]
    SignatureMismatch {
        /// Which signature disagreed.
        kind: SignatureKind,
        /// The expected value.
        expected: u32,
        /// The stored value.
        found: u32,
    },

    /// Stored format is newer than this reader supports.
    #[error("version {found} not supported (max {supported})")]
    VersionNotSupported {
        /// The stored version.
        found: u16,
        /// The newest supported version.
        supported: u16,
    },

    /// Checksum failure or short read.
    #[error("corruption: {detail}")]
    Corruption {
        /// Description of the corruption.
        detail: String,
    },

    /// Bytes read fine but do not match the expected in-memory layout.
    #[error("data integrity or layout change: {detail}")]
    LayoutChange {
        /// Description of the mismatch.
        detail: String,
    },
}

impl LossReason {
    /// Creates a corruption reason.
    pub fn corruption(detail: impl Into<String>) -> Self {
        Self::Corruption {
            detail: detail.into(),
        }
    }
}

/// Result of restoring one segment at boot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadOutcome {
    /// The payload was validated and handed to the codec.
    Restored,
    /// The segment keeps its application defaults.
    Lost(LossReason),
}

impl LoadOutcome {
    /// Returns whether the segment was restored.
    #[must_use]
    pub fn is_restored(&self) -> bool {
        matches!(self, Self::Restored)
    }

    /// Returns the loss reason, if any.
    #[must_use]
    pub fn loss_reason(&self) -> Option<&LossReason> {
        match self {
            Self::Restored => None,
            Self::Lost(reason) => Some(reason),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_messages_name_the_segment() {
        let err = StoreError::CapacityExceeded {
            segment: SegmentType::ApplicationData,
            requested: 300,
            capacity: 248,
        };
        assert_eq!(
            err.to_string(),
            "segment application-data: 300 bytes exceed reserved capacity of 248"
        );
    }

    #[test]
    fn corruption_helpers_keep_driver_and_restore_sides_apart() {
        let err = StoreError::corruption(SegmentType::Security, "read past capacity");
        assert_eq!(
            err.to_string(),
            "segment security: corruption: read past capacity"
        );

        let reason = LossReason::corruption("read past capacity");
        assert_eq!(reason.to_string(), "corruption: read past capacity");
        assert_eq!(
            LoadOutcome::Lost(reason.clone()).loss_reason(),
            Some(&reason)
        );
    }

    #[test]
    fn load_outcome_accessors() {
        assert!(LoadOutcome::Restored.is_restored());
        let lost = LoadOutcome::Lost(LossReason::corruption("short read"));
        assert!(!lost.is_restored());
        assert_eq!(
            lost.loss_reason(),
            Some(&LossReason::Corruption {
                detail: "short read".into()
            })
        );
    }
}
