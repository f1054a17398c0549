//! Error types for flash device operations.

use std::io;
use thiserror::Error;

/// Result type for flash operations.
pub type FlashResult<T> = Result<T, FlashError>;

/// Errors that can occur during flash operations.
#[derive(Debug, Error)]
pub enum FlashError {
    /// An I/O error occurred in a host-backed device.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The access falls outside the addressable region.
    #[error("access out of bounds: offset {offset:#x}, len {len}, region end {end:#x}")]
    OutOfBounds {
        /// The requested offset.
        offset: u64,
        /// The requested length.
        len: u64,
        /// The first offset past the region.
        end: u64,
    },

    /// An erase was not aligned to the erase block size.
    #[error("erase not block aligned: offset {offset:#x}, len {len}, block size {block_size}")]
    Misaligned {
        /// The requested offset.
        offset: u64,
        /// The requested length.
        len: u64,
        /// The device block size.
        block_size: u64,
    },

    /// The device was accessed without being opened.
    #[error("device is not open")]
    NotOpen,

    /// The device geometry is unusable or could not be queried.
    #[error("invalid geometry: {0}")]
    InvalidGeometry(String),

    /// A program operation failed.
    #[error("write failed at offset {offset:#x}: {reason}")]
    WriteFailed {
        /// Offset of the failing write.
        offset: u64,
        /// Description of the failure.
        reason: String,
    },

    /// An erase operation failed.
    #[error("erase failed at offset {offset:#x}: {reason}")]
    EraseFailed {
        /// Offset of the failing erase.
        offset: u64,
        /// Description of the failure.
        reason: String,
    },
}

impl FlashError {
    /// Creates an invalid geometry error.
    pub fn invalid_geometry(message: impl Into<String>) -> Self {
        Self::InvalidGeometry(message.into())
    }

    /// Creates a write failure.
    pub fn write_failed(offset: u64, reason: impl Into<String>) -> Self {
        Self::WriteFailed {
            offset,
            reason: reason.into(),
        }
    }

    /// Creates an erase failure.
    pub fn erase_failed(offset: u64, reason: impl Into<String>) -> Self {
        Self::EraseFailed {
            offset,
            reason: reason.into(),
        }
    }
}
