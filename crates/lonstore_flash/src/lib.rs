//! # lonstore flash
//!
//! Block-erasable flash device abstraction for lonstore.
//!
//! This crate provides the lowest-level storage abstraction: a device that
//! can only **erase whole blocks to all-ones** and **clear individual bits**.
//! Devices are opaque byte arrays - they know nothing about segments,
//! transaction ledgers or persistence headers.
//!
//! ## Design Principles
//!
//! - Devices are simple byte arrays (read, bit-clearing write, block erase)
//! - Every call reports success or failure; partial writes are failures
//! - No knowledge of lonstore on-flash formats
//! - lonstore owns all format interpretation
//!
//! ## Available Devices
//!
//! - [`InMemoryFlash`] - For testing and host simulation
//! - [`FileFlash`] - A flash image persisted in a host file
//!
//! ## Example
//!
//! ```rust
//! use lonstore_flash::{BlockDevice, FlashGeometry, InMemoryFlash};
//!
//! let mut flash = InMemoryFlash::new(FlashGeometry::uniform(0, 4096, 8)).unwrap();
//! flash.open().unwrap();
//! flash.erase(0, 4096).unwrap();
//! flash.write_at(16, &[0x12, 0x34]).unwrap();
//!
//! let mut buf = [0u8; 2];
//! flash.read_at(16, &mut buf).unwrap();
//! assert_eq!(buf, [0x12, 0x34]);
//! flash.close();
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod device;
mod error;
mod file;
mod geometry;
mod memory;

pub use device::{BlockDevice, ERASED_BYTE};
pub use error::{FlashError, FlashResult};
pub use file::FileFlash;
pub use geometry::FlashGeometry;
pub use memory::InMemoryFlash;
