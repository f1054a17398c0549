//! Block device trait definition.

use crate::error::FlashResult;
use crate::geometry::FlashGeometry;

/// Value of every byte after an erase.
pub const ERASED_BYTE: u8 = 0xFF;

/// A block-erasable, bit-clearing non-volatile memory device.
///
/// Devices are **opaque byte arrays** addressed by absolute offset. The only
/// primitives are reading, clearing bits and erasing whole blocks. lonstore
/// owns all format interpretation.
///
/// # Invariants
///
/// - `erase` sets every byte of the (block-aligned) range to [`ERASED_BYTE`]
/// - `write_at` can only change bits from 1 to 0; the stored byte becomes
///   `old & new`
/// - `read_at` returns exactly the bytes currently stored
/// - A call either succeeds or reports failure; a failed write may have
///   programmed any prefix of its data
/// - I/O is only legal between `open` and `close`
///
/// # Implementors
///
/// - [`super::InMemoryFlash`] - For testing
/// - [`super::FileFlash`] - For host-side flash images
pub trait BlockDevice: Send {
    /// Opens the device for I/O.
    ///
    /// # Errors
    ///
    /// Returns an error if the device cannot be opened.
    fn open(&mut self) -> FlashResult<()>;

    /// Closes the device. Closing a closed device is a no-op.
    fn close(&mut self);

    /// Returns the erasable-region layout of the device.
    ///
    /// # Errors
    ///
    /// Returns an error if the geometry cannot be determined.
    fn geometry(&self) -> FlashResult<FlashGeometry>;

    /// Reads `buf.len()` bytes starting at absolute `offset`.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The device is not open
    /// - The range lies outside the region
    /// - An I/O error occurs
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> FlashResult<()>;

    /// Programs `data` starting at absolute `offset`.
    ///
    /// Callers are responsible for not crossing erase-block boundaries in a
    /// single call; devices may reject or split such writes.
    ///
    /// # Errors
    ///
    /// Returns an error if the device is not open, the range is out of
    /// bounds, or the program operation fails.
    fn write_at(&mut self, offset: u64, data: &[u8]) -> FlashResult<()>;

    /// Erases `len` bytes starting at `offset`.
    ///
    /// Both `offset` (relative to the device origin) and `len` must be
    /// multiples of the block size.
    ///
    /// # Errors
    ///
    /// Returns an error if the range is misaligned, out of bounds, or the
    /// erase fails.
    fn erase(&mut self, offset: u64, len: u64) -> FlashResult<()>;
}

impl<T: BlockDevice + ?Sized> BlockDevice for Box<T> {
    fn open(&mut self) -> FlashResult<()> {
        (**self).open()
    }

    fn close(&mut self) {
        (**self).close();
    }

    fn geometry(&self) -> FlashResult<FlashGeometry> {
        (**self).geometry()
    }

    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> FlashResult<()> {
        (**self).read_at(offset, buf)
    }

    fn write_at(&mut self, offset: u64, data: &[u8]) -> FlashResult<()> {
        (**self).write_at(offset, data)
    }

    fn erase(&mut self, offset: u64, len: u64) -> FlashResult<()> {
        (**self).erase(offset, len)
    }
}
