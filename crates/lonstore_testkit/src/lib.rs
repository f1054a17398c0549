//! # lonstore testkit
//!
//! Test utilities for lonstore.
//!
//! This crate provides:
//! - A fault-injecting block device wrapper (power cuts, failing opens,
//!   failing erases)
//! - Store fixtures with a manual clock and recording diagnostics
//! - Property-based test generators using proptest
//! - A power-cut harness that interrupts a store at every written byte
//!
//! ## Usage
//!
//! ```rust
//! use lonstore_core::{LoadOutcome, SegmentType};
//! use lonstore_testkit::prelude::*;
//!
//! let mut fixture = TestStore::new(&[(SegmentType::ApplicationData, 64)]);
//! fixture.set(SegmentType::ApplicationData, &[1, 2, 3]);
//! fixture.store_segment(SegmentType::ApplicationData).unwrap();
//!
//! fixture.reboot();
//! assert_eq!(fixture.restore(SegmentType::ApplicationData), LoadOutcome::Restored);
//! assert_eq!(fixture.get(SegmentType::ApplicationData), vec![1, 2, 3]);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod crash;
pub mod faulty;
pub mod fixtures;
pub mod generators;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::crash::*;
    pub use crate::faulty::*;
    pub use crate::fixtures::*;
    pub use crate::generators::*;
}

pub use crash::*;
pub use faulty::*;
pub use fixtures::*;
pub use generators::*;
