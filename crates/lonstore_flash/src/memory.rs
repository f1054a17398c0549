//! In-memory flash device for testing and host simulation.

use crate::device::{BlockDevice, ERASED_BYTE};
use crate::error::{FlashError, FlashResult};
use crate::geometry::FlashGeometry;
use parking_lot::RwLock;
use std::sync::Arc;

#[derive(Debug)]
struct Cells {
    bytes: Vec<u8>,
    erase_counts: Vec<u32>,
    program_ops: u64,
}

/// An in-memory NOR flash device.
///
/// The cells start erased (`0xFF`). Writes AND into the stored bytes, so bits
/// can only be cleared; erases restore whole blocks to `0xFF`. A single write
/// must stay inside one erase block.
///
/// Handles created with [`InMemoryFlash::share`] see the same cells, which
/// lets a test drop a store and "reboot" a fresh one over the same memory.
///
/// # Thread Safety
///
/// The cells are behind a lock and can be shared across threads.
///
/// # Example
///
/// ```rust
/// use lonstore_flash::{BlockDevice, FlashGeometry, InMemoryFlash};
///
/// let mut flash = InMemoryFlash::new(FlashGeometry::uniform(0, 256, 4)).unwrap();
/// flash.open().unwrap();
/// flash.write_at(0, &[0x0F]).unwrap();
/// flash.write_at(0, &[0xF3]).unwrap();
///
/// let mut buf = [0u8; 1];
/// flash.read_at(0, &mut buf).unwrap();
/// assert_eq!(buf[0], 0x03);
/// ```
#[derive(Debug)]
pub struct InMemoryFlash {
    geometry: FlashGeometry,
    cells: Arc<RwLock<Cells>>,
    open: bool,
}

impl InMemoryFlash {
    /// Creates a fully erased device with the given geometry.
    ///
    /// # Errors
    ///
    /// Returns an error if the geometry is invalid.
    pub fn new(geometry: FlashGeometry) -> FlashResult<Self> {
        geometry.validate()?;
        let size = usize::try_from(geometry.region_size)
            .map_err(|_| FlashError::invalid_geometry("region too large for host memory"))?;
        let blocks = usize::try_from(geometry.block_count)
            .map_err(|_| FlashError::invalid_geometry("too many blocks"))?;

        Ok(Self {
            geometry,
            cells: Arc::new(RwLock::new(Cells {
                bytes: vec![ERASED_BYTE; size],
                erase_counts: vec![0; blocks],
                program_ops: 0,
            })),
            open: false,
        })
    }

    /// Creates a device preloaded with an existing region image.
    ///
    /// Useful for testing recovery from captured images.
    ///
    /// # Errors
    ///
    /// Returns an error if the geometry is invalid or `data` does not match
    /// the region size.
    pub fn with_data(geometry: FlashGeometry, data: Vec<u8>) -> FlashResult<Self> {
        let flash = Self::new(geometry)?;
        if data.len() as u64 != geometry.region_size {
            return Err(FlashError::invalid_geometry(format!(
                "image of {} bytes does not match region of {} bytes",
                data.len(),
                geometry.region_size
            )));
        }
        flash.cells.write().bytes = data;
        Ok(flash)
    }

    /// Returns a new, closed handle over the same cells.
    #[must_use]
    pub fn share(&self) -> Self {
        Self {
            geometry: self.geometry,
            cells: Arc::clone(&self.cells),
            open: false,
        }
    }

    /// Returns a copy of `len` bytes at absolute `offset`, bypassing open state.
    ///
    /// # Panics
    ///
    /// Panics if the range lies outside the region.
    #[must_use]
    pub fn contents(&self, offset: u64, len: usize) -> Vec<u8> {
        let start = self.index(offset);
        self.cells.read().bytes[start..start + len].to_vec()
    }

    /// Returns a copy of the whole region.
    #[must_use]
    pub fn data(&self) -> Vec<u8> {
        self.cells.read().bytes.clone()
    }

    /// Overwrites bytes at `offset` directly, ignoring NOR semantics.
    ///
    /// Simulates bit rot or a foreign writer for corruption tests.
    ///
    /// # Panics
    ///
    /// Panics if the range lies outside the region.
    pub fn inject_corruption(&self, offset: u64, bytes: &[u8]) {
        let start = self.index(offset);
        self.cells.write().bytes[start..start + bytes.len()].copy_from_slice(bytes);
    }

    /// Returns how many times the block containing `offset` was erased.
    #[must_use]
    pub fn erase_count(&self, offset: u64) -> u32 {
        let block = self.geometry.block_index(offset) as usize;
        self.cells.read().erase_counts[block]
    }

    /// Returns the total number of block erases across the region.
    #[must_use]
    pub fn total_erase_count(&self) -> u64 {
        self.cells
            .read()
            .erase_counts
            .iter()
            .map(|&c| u64::from(c))
            .sum()
    }

    /// Returns the number of successful program (write) operations.
    #[must_use]
    pub fn program_count(&self) -> u64 {
        self.cells.read().program_ops
    }

    /// Returns whether this handle is open.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.open
    }

    fn index(&self, offset: u64) -> usize {
        (offset - self.geometry.region_offset) as usize
    }

    fn check_access(&self, offset: u64, len: u64) -> FlashResult<()> {
        if !self.open {
            return Err(FlashError::NotOpen);
        }
        if !self.geometry.contains(offset, len) {
            return Err(FlashError::OutOfBounds {
                offset,
                len,
                end: self.geometry.region_end(),
            });
        }
        Ok(())
    }
}

impl BlockDevice for InMemoryFlash {
    fn open(&mut self) -> FlashResult<()> {
        self.open = true;
        Ok(())
    }

    fn close(&mut self) {
        self.open = false;
    }

    fn geometry(&self) -> FlashResult<FlashGeometry> {
        Ok(self.geometry)
    }

    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> FlashResult<()> {
        self.check_access(offset, buf.len() as u64)?;
        let start = self.index(offset);
        let cells = self.cells.read();
        buf.copy_from_slice(&cells.bytes[start..start + buf.len()]);
        Ok(())
    }

    fn write_at(&mut self, offset: u64, data: &[u8]) -> FlashResult<()> {
        self.check_access(offset, data.len() as u64)?;
        if data.is_empty() {
            return Ok(());
        }
        if data.len() as u64 > self.geometry.block_remaining(offset) {
            return Err(FlashError::write_failed(
                offset,
                "write crosses erase block boundary",
            ));
        }

        let start = self.index(offset);
        let mut cells = self.cells.write();
        for (cell, &byte) in cells.bytes[start..start + data.len()].iter_mut().zip(data) {
            *cell &= byte;
        }
        cells.program_ops += 1;
        Ok(())
    }

    fn erase(&mut self, offset: u64, len: u64) -> FlashResult<()> {
        self.check_access(offset, len)?;
        let block_size = self.geometry.block_size;
        if offset % block_size != 0 || len % block_size != 0 {
            return Err(FlashError::Misaligned {
                offset,
                len,
                block_size,
            });
        }

        let start = self.index(offset);
        let first_block = self.geometry.block_index(offset) as usize;
        let blocks = (len / block_size) as usize;

        let mut cells = self.cells.write();
        cells.bytes[start..start + len as usize].fill(ERASED_BYTE);
        for count in &mut cells.erase_counts[first_block..first_block + blocks] {
            *count += 1;
        }
        Ok(())
    }
}
