//! # lonstore core
//!
//! Transactional persistent segment store for block-erasable flash.
//!
//! The store saves protocol and application configuration state (network
//! image, application data, security material, ISI tables) into raw NOR-like
//! flash and restores it across power loss.
//!
//! This crate provides:
//! - A flash geometry planner assigning each segment a fixed byte range
//! - A segment driver with erase-before-write and block-split writes
//! - A transaction ledger marking each segment's data valid or in flight
//! - A persistence header with signatures, version and checksum
//! - A segment manager with guard-band deferred commits and boot restore
//!
//! ## Example
//!
//! ```rust
//! use lonstore_core::{BlobCodec, LoadOutcome, PersistenceStore, SegmentType, StoreConfig};
//! use lonstore_flash::{FlashGeometry, InMemoryFlash};
//!
//! let flash = InMemoryFlash::new(FlashGeometry::uniform(0, 256, 16)).unwrap();
//! let mut store = PersistenceStore::new(flash, StoreConfig::new().guard_band_millis(0));
//!
//! let codec = BlobCodec::new(64);
//! let state = codec.state();
//! store.register(SegmentType::ApplicationData, Box::new(codec));
//!
//! *state.lock() = vec![1, 2, 3];
//! store.mark_dirty(SegmentType::ApplicationData);
//! store.commit_check();
//!
//! state.lock().clear();
//! assert_eq!(store.restore(SegmentType::ApplicationData), LoadOutcome::Restored);
//! assert_eq!(*state.lock(), vec![1, 2, 3]);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod clock;
mod codec;
mod config;
mod diagnostics;
mod driver;
mod error;
mod header;
mod inspect;
mod layout;
mod ledger;
mod manager;
mod stats;
mod types;

pub use clock::{Clock, ManualClock, SystemClock};
pub use codec::{BlobCodec, CodecError, SegmentCodec};
pub use config::StoreConfig;
pub use diagnostics::{DiagnosticEvent, DiagnosticsSink, RecordingSink, TracingSink};
pub use driver::{HandleMode, SegmentDriver, SegmentHandle};
pub use error::{LoadOutcome, LossReason, SignatureKind, StoreError, StoreResult};
pub use header::{
    checksum, ChecksumSpan, PersistenceHeader, HEADER_SIZE, PERSISTENCE_SIGNATURE,
    PERSISTENCE_VERSION,
};
pub use inspect::{ChecksumVerdict, SegmentInspection};
pub use layout::{MapEntry, MemoryMap};
pub use ledger::{
    LedgerEvent, LedgerState, TransactionLedger, LEDGER_SIGNATURE, LEDGER_SIZE,
    STATE_INVALID, STATE_VALID,
};
pub use manager::{CommitReport, PersistenceStore, SegmentState};
pub use stats::{StatsSnapshot, StoreStats};
pub use types::SegmentType;

/// Crate version, as reported by tooling.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
