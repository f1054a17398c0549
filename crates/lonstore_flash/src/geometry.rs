//! Flash geometry description.

use crate::error::{FlashError, FlashResult};

/// Layout of the erasable region a device exposes to lonstore.
///
/// Offsets are absolute device offsets. Erase blocks are aligned to absolute
/// multiples of `block_size`, so `region_offset` must itself be aligned.
///
/// Any non-zero block size is valid, down to one byte. Blocks smaller than a
/// ledger or header are fine because writers split every program into runs
/// that stay inside one block (see [`FlashGeometry::block_remaining`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlashGeometry {
    /// First byte of the region usable for persistence.
    pub region_offset: u64,
    /// Size of the usable region in bytes.
    pub region_size: u64,
    /// Number of erase blocks in the region.
    pub block_count: u64,
    /// Size of one erase block in bytes.
    pub block_size: u64,
    /// Number of erasable regions reported by the device.
    pub region_count: u32,
}

impl FlashGeometry {
    /// Creates a single-region geometry of `block_count` uniform blocks.
    #[must_use]
    pub const fn uniform(region_offset: u64, block_size: u64, block_count: u64) -> Self {
        Self {
            region_offset,
            region_size: block_size * block_count,
            block_count,
            block_size,
            region_count: 1,
        }
    }

    /// Checks that the geometry is self-consistent.
    ///
    /// # Errors
    ///
    /// Returns [`FlashError::InvalidGeometry`] if the block size is zero, the
    /// region is empty or misaligned, or the block count disagrees with the
    /// region size. The minimum block size is one byte.
    pub fn validate(&self) -> FlashResult<()> {
        if self.block_size == 0 {
            return Err(FlashError::invalid_geometry("block size is zero"));
        }
        if self.region_size == 0 || self.block_count == 0 {
            return Err(FlashError::invalid_geometry("region is empty"));
        }
        if self.region_offset % self.block_size != 0 {
            return Err(FlashError::invalid_geometry(format!(
                "region offset {:#x} not aligned to block size {}",
                self.region_offset, self.block_size
            )));
        }
        if self.block_count.checked_mul(self.block_size) != Some(self.region_size) {
            return Err(FlashError::invalid_geometry(format!(
                "{} blocks of {} bytes do not cover region of {} bytes",
                self.block_count, self.block_size, self.region_size
            )));
        }
        if self.region_count == 0 {
            return Err(FlashError::invalid_geometry("no erasable regions"));
        }
        Ok(())
    }

    /// Returns the first offset past the region.
    #[must_use]
    pub const fn region_end(&self) -> u64 {
        self.region_offset + self.region_size
    }

    /// Returns whether `[offset, offset + len)` lies within the region.
    #[must_use]
    pub fn contains(&self, offset: u64, len: u64) -> bool {
        offset >= self.region_offset
            && offset
                .checked_add(len)
                .is_some_and(|end| end <= self.region_end())
    }

    /// Rounds `offset` down to the start of its erase block.
    #[must_use]
    pub const fn block_align_down(&self, offset: u64) -> u64 {
        offset - offset % self.block_size
    }

    /// Rounds `len` up to a whole number of erase blocks.
    #[must_use]
    pub const fn round_up_to_block(&self, len: u64) -> u64 {
        len.div_ceil(self.block_size) * self.block_size
    }

    /// Returns how many bytes remain in the erase block containing `offset`.
    #[must_use]
    pub const fn block_remaining(&self, offset: u64) -> u64 {
        self.block_size - offset % self.block_size
    }

    /// Returns the region-relative index of the block containing `offset`.
    #[must_use]
    pub const fn block_index(&self, offset: u64) -> u64 {
        (offset - self.region_offset) / self.block_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uniform_geometry_is_valid() {
        let geometry = FlashGeometry::uniform(0x4_0000, 4096, 16);
        assert!(geometry.validate().is_ok());
        assert_eq!(geometry.region_size, 64 * 1024);
        assert_eq!(geometry.region_end(), 0x5_0000);
    }

    #[test]
    fn zero_block_size_is_invalid() {
        let geometry = FlashGeometry {
            region_offset: 0,
            region_size: 4096,
            block_count: 1,
            block_size: 0,
            region_count: 1,
        };
        assert!(matches!(
            geometry.validate(),
            Err(FlashError::InvalidGeometry(_))
        ));
    }

    #[test]
    fn tiny_blocks_are_valid() {
        for block_size in [1, 2, 4, 7] {
            let geometry = FlashGeometry::uniform(0, block_size, 64);
            assert!(geometry.validate().is_ok(), "block size {block_size}");
            assert_eq!(geometry.block_remaining(3), block_size - 3 % block_size);
        }
    }

    #[test]
    fn misaligned_region_is_invalid() {
        let mut geometry = FlashGeometry::uniform(0, 4096, 4);
        geometry.region_offset = 100;
        assert!(geometry.validate().is_err());
    }

    #[test]
    fn block_count_must_cover_region() {
        let mut geometry = FlashGeometry::uniform(0, 4096, 4);
        geometry.block_count = 3;
        assert!(geometry.validate().is_err());
    }

    #[test]
    fn rounding_helpers() {
        let geometry = FlashGeometry::uniform(0, 256, 8);
        assert_eq!(geometry.round_up_to_block(1), 256);
        assert_eq!(geometry.round_up_to_block(256), 256);
        assert_eq!(geometry.round_up_to_block(257), 512);
        assert_eq!(geometry.block_align_down(511), 256);
        assert_eq!(geometry.block_remaining(250), 6);
        assert_eq!(geometry.block_remaining(256), 256);
        assert_eq!(geometry.block_index(700), 2);
    }

    #[test]
    fn contains_checks_both_ends() {
        let geometry = FlashGeometry::uniform(1024, 256, 4);
        assert!(geometry.contains(1024, 1024));
        assert!(!geometry.contains(1023, 1));
        assert!(!geometry.contains(2047, 2));
        assert!(!geometry.contains(u64::MAX, 2));
    }
}
