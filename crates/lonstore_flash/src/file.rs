//! File-backed flash image.

use crate::device::{BlockDevice, ERASED_BYTE};
use crate::error::{FlashError, FlashResult};
use crate::geometry::FlashGeometry;
use parking_lot::RwLock;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// A flash device whose cells live in a host file.
///
/// The file holds exactly the region image: file position 0 corresponds to
/// `geometry.region_offset`. NOR semantics are emulated - writes AND into the
/// existing bytes and erases fill blocks with `0xFF` - so images produced
/// here are bit-identical to what the target device would hold.
///
/// # Durability
///
/// Every write and erase is followed by `File::sync_data()`.
///
/// # Example
///
/// ```no_run
/// use lonstore_flash::{BlockDevice, FileFlash, FlashGeometry};
/// use std::path::Path;
///
/// let geometry = FlashGeometry::uniform(0, 4096, 16);
/// let mut flash = FileFlash::create(Path::new("nvm.img"), geometry).unwrap();
/// flash.open().unwrap();
/// flash.write_at(0, b"data").unwrap();
/// ```
#[derive(Debug)]
pub struct FileFlash {
    path: PathBuf,
    geometry: FlashGeometry,
    file: RwLock<File>,
    open: bool,
}

impl FileFlash {
    /// Creates (or truncates) an image file and fills it with erased bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the geometry is invalid or the file cannot be
    /// created.
    pub fn create(path: &Path, geometry: FlashGeometry) -> FlashResult<Self> {
        geometry.validate()?;
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;

        let block = vec![ERASED_BYTE; geometry.block_size as usize];
        for _ in 0..geometry.block_count {
            file.write_all(&block)?;
        }
        file.sync_all()?;

        Ok(Self {
            path: path.to_path_buf(),
            geometry,
            file: RwLock::new(file),
            open: false,
        })
    }

    /// Attaches to an existing image file.
    ///
    /// # Errors
    ///
    /// Returns an error if the geometry is invalid, the file cannot be opened,
    /// or its size does not match the region.
    pub fn open_image(path: &Path, geometry: FlashGeometry) -> FlashResult<Self> {
        geometry.validate()?;
        let file = OpenOptions::new().read(true).write(true).open(path)?;

        let size = file.metadata()?.len();
        if size != geometry.region_size {
            return Err(FlashError::invalid_geometry(format!(
                "image {} is {} bytes, geometry expects {}",
                path.display(),
                size,
                geometry.region_size
            )));
        }

        Ok(Self {
            path: path.to_path_buf(),
            geometry,
            file: RwLock::new(file),
            open: false,
        })
    }

    /// Returns the path to the underlying image file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn position(&self, offset: u64) -> u64 {
        offset - self.geometry.region_offset
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

impl BlockDevice for FileFlash {
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
        if buf.is_empty() {
            return Ok(());
        }

        let mut file = self.file.write();
        file.seek(SeekFrom::Start(self.position(offset)))?;
        file.read_exact(buf)?;
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

        let position = self.position(offset);
        let mut file = self.file.write();

        let mut cells = vec![0u8; data.len()];
        file.seek(SeekFrom::Start(position))?;
        file.read_exact(&mut cells)?;
        for (cell, &byte) in cells.iter_mut().zip(data) {
            *cell &= byte;
        }

        file.seek(SeekFrom::Start(position))?;
        file.write_all(&cells)?;
        file.sync_data()?;
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

        let mut file = self.file.write();
        file.seek(SeekFrom::Start(self.position(offset)))?;
        let block = vec![ERASED_BYTE; block_size as usize];
        for _ in 0..len / block_size {
            file.write_all(&block)?;
        }
        file.sync_data()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn geometry() -> FlashGeometry {
        FlashGeometry::uniform(0x2000, 128, 4)
    }

    #[test]
    fn file_create_is_erased() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nvm.img");

        let mut flash = FileFlash::create(&path, geometry()).unwrap();
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 512);

        flash.open().unwrap();
        let mut buf = [0u8; 8];
        flash.read_at(0x2000, &mut buf).unwrap();
        assert_eq!(buf, [ERASED_BYTE; 8]);
    }

    #[test]
    fn file_write_clears_bits_and_persists() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nvm.img");

        {
            let mut flash = FileFlash::create(&path, geometry()).unwrap();
            flash.open().unwrap();
            flash.write_at(0x2010, &[0xF0, 0x0F]).unwrap();
            flash.write_at(0x2010, &[0x3C, 0xFF]).unwrap();
        }

        let mut flash = FileFlash::open_image(&path, geometry()).unwrap();
        flash.open().unwrap();
        let mut buf = [0u8; 2];
        flash.read_at(0x2010, &mut buf).unwrap();
        assert_eq!(buf, [0x30, 0x0F]);
    }

    #[test]
    fn file_erase_block() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nvm.img");

        let mut flash = FileFlash::create(&path, geometry()).unwrap();
        flash.open().unwrap();
        flash.write_at(0x2080, &[0u8; 128]).unwrap();
        flash.erase(0x2080, 128).unwrap();

        let mut buf = [0u8; 128];
        flash.read_at(0x2080, &mut buf).unwrap();
        assert!(buf.iter().all(|&b| b == ERASED_BYTE));
    }

    #[test]
    fn file_open_rejects_wrong_size() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nvm.img");
        std::fs::write(&path, [0u8; 100]).unwrap();

        let result = FileFlash::open_image(&path, geometry());
        assert!(matches!(result, Err(FlashError::InvalidGeometry(_))));
    }

    #[test]
    fn file_requires_open() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nvm.img");
        let mut flash = FileFlash::create(&path, geometry()).unwrap();

        let result = flash.write_at(0x2000, &[0]);
        assert!(matches!(result, Err(FlashError::NotOpen)));
    }
}
