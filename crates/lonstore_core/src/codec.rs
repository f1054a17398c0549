//! Segment codecs.
//!
//! The store never parses segment payloads. Each segment type registers a
//! [`SegmentCodec`] that produces the bytes to persist from live state and
//! applies restored bytes back to it.

use crate::header::ChecksumSpan;
use parking_lot::Mutex;
use std::sync::Arc;
use thiserror::Error;

/// Errors reported by codecs.
#[derive(Debug, Error)]
pub enum CodecError {
    /// The payload size does not match the in-memory layout.
    #[error("layout mismatch: expected {expected} bytes, got {actual}")]
    LayoutMismatch {
        /// Size the live structure expects.
        expected: usize,
        /// Size of the stored payload.
        actual: usize,
    },

    /// The payload was rejected for another reason.
    #[error("payload rejected: {0}")]
    Rejected(String),

    /// Live state could not be produced.
    #[error("state unavailable: {0}")]
    Unavailable(String),
}

/// Serializer/deserializer for one segment kind.
///
/// # Contract
///
/// - `serialize` returns a freshly owned buffer no longer than `max_size`
/// - `deserialize` borrows the payload for the call only
/// - `max_size` is stable for the process lifetime; it sizes the memory map
pub trait SegmentCodec: Send {
    /// Largest payload this codec will ever produce.
    fn max_size(&self) -> usize;

    /// Produces the payload for the current live state.
    ///
    /// # Errors
    ///
    /// Returns an error if the live state cannot be serialized.
    fn serialize(&mut self) -> Result<Vec<u8>, CodecError>;

    /// Applies a validated payload to the live state.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload does not fit the live layout. The
    /// live state must be left untouched in that case.
    fn deserialize(&mut self, bytes: &[u8]) -> Result<(), CodecError>;

    /// Which payload bytes the header checksum covers.
    fn checksum_span(&self) -> ChecksumSpan {
        ChecksumSpan::Full
    }
}

/// A codec persisting an opaque byte buffer shared with the application.
///
/// The application keeps a clone of [`BlobCodec::state`] and edits it
/// directly; the store snapshots it on commit and overwrites it on restore.
///
/// # Example
///
/// ```rust
/// use lonstore_core::{BlobCodec, SegmentCodec};
///
/// let mut codec = BlobCodec::new(32).with_layout(4);
/// codec.state().lock().extend_from_slice(&[1, 2, 3, 4]);
/// assert_eq!(codec.serialize().unwrap(), vec![1, 2, 3, 4]);
/// assert!(codec.deserialize(&[1, 2]).is_err());
/// ```
#[derive(Debug, Clone)]
pub struct BlobCodec {
    state: Arc<Mutex<Vec<u8>>>,
    max_size: usize,
    layout_len: Option<usize>,
    span: ChecksumSpan,
}

impl BlobCodec {
    /// Creates a codec with an empty buffer and the given maximum size.
    #[must_use]
    pub fn new(max_size: usize) -> Self {
        Self {
            state: Arc::new(Mutex::new(Vec::new())),
            max_size,
            layout_len: None,
            span: ChecksumSpan::Full,
        }
    }

    /// Requires restored payloads to be exactly `len` bytes.
    #[must_use]
    pub fn with_layout(mut self, len: usize) -> Self {
        self.layout_len = Some(len);
        self
    }

    /// Selects the checksum span written and expected for this segment.
    #[must_use]
    pub fn with_checksum_span(mut self, span: ChecksumSpan) -> Self {
        self.span = span;
        self
    }

    /// Returns the shared live buffer.
    #[must_use]
    pub fn state(&self) -> Arc<Mutex<Vec<u8>>> {
        Arc::clone(&self.state)
    }
}

impl SegmentCodec for BlobCodec {
    fn max_size(&self) -> usize {
        self.max_size
    }

    fn serialize(&mut self) -> Result<Vec<u8>, CodecError> {
        Ok(self.state.lock().clone())
    }

    fn deserialize(&mut self, bytes: &[u8]) -> Result<(), CodecError> {
        if let Some(expected) = self.layout_len {
            if bytes.len() != expected {
                return Err(CodecError::LayoutMismatch {
                    expected,
                    actual: bytes.len(),
                });
            }
        }
        if bytes.len() > self.max_size {
            return Err(CodecError::Rejected(format!(
                "{} bytes exceed maximum of {}",
                bytes.len(),
                self.max_size
            )));
        }

        let mut state = self.state.lock();
        state.clear();
        state.extend_from_slice(bytes);
        Ok(())
    }

    fn checksum_span(&self) -> ChecksumSpan {
        self.span
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blob_serialize_snapshots_state() {
        let mut codec = BlobCodec::new(16);
        let state = codec.state();
        state.lock().extend_from_slice(b"abc");

        let bytes = codec.serialize().unwrap();
        state.lock().push(b'd');
        assert_eq!(bytes, b"abc");
    }

    #[test]
    fn blob_deserialize_replaces_state() {
        let mut codec = BlobCodec::new(16);
        codec.state().lock().extend_from_slice(b"old contents");
        codec.deserialize(b"new").unwrap();
        assert_eq!(*codec.state().lock(), b"new");
    }

    #[test]
    fn blob_layout_mismatch_leaves_state() {
        let mut codec = BlobCodec::new(16).with_layout(4);
        codec.state().lock().extend_from_slice(&[9, 9, 9, 9]);

        let result = codec.deserialize(&[1, 2, 3]);
        assert!(matches!(
            result,
            Err(CodecError::LayoutMismatch {
                expected: 4,
                actual: 3
            })
        ));
        assert_eq!(*codec.state().lock(), vec![9, 9, 9, 9]);
    }

    #[test]
    fn blob_rejects_oversized_payload() {
        let mut codec = BlobCodec::new(2);
        assert!(matches!(
            codec.deserialize(&[0; 3]),
            Err(CodecError::Rejected(_))
        ));
    }

    #[test]
    fn blob_checksum_span_defaults_to_full() {
        assert_eq!(BlobCodec::new(1).checksum_span(), ChecksumSpan::Full);
        let legacy = BlobCodec::new(1).with_checksum_span(ChecksumSpan::ExcludeLastByte);
        assert_eq!(legacy.checksum_span(), ChecksumSpan::ExcludeLastByte);
    }
}
