//! CLI command implementations.

pub mod erase;
pub mod format;
pub mod inspect;
pub mod verify;

use lonstore_core::{SegmentDriver, SegmentType, StoreError};
use lonstore_flash::{FileFlash, FlashError, FlashGeometry};
use std::path::PathBuf;
use thiserror::Error;

/// Region size used by `format` when none is given.
pub const DEFAULT_REGION_SIZE: u64 = 64 * 1024;

/// Errors reported by CLI commands.
#[derive(Debug, Error)]
pub enum CliError {
    /// Flash image error.
    #[error("flash image: {0}")]
    Flash(#[from] FlashError),

    /// Store error.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON output error.
    #[error("JSON output: {0}")]
    Json(#[from] serde_json::Error),

    /// Bad command-line input.
    #[error("{0}")]
    Usage(String),

    /// Verification found invalid segments.
    #[error("{0} segment(s) failed verification")]
    VerificationFailed(usize),
}

/// Output format for reporting commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text
    Text,
    /// Pretty-printed JSON
    Json,
}

/// Image location, geometry and segment registrations shared by commands.
#[derive(Debug, Clone)]
pub struct ImageArgs {
    /// Path to the image file.
    pub image: PathBuf,
    /// Erase-block size.
    pub block_size: u64,
    /// Device offset of the first image byte.
    pub region_offset: u64,
    /// Region size; the file size when absent.
    pub region_size: Option<u64>,
    /// Registered segments and their maximum payload sizes.
    pub segments: Vec<(SegmentType, usize)>,
    /// Expected application signature.
    pub app_signature: u32,
}

impl ImageArgs {
    /// Builds the geometry for a region of `region_size` bytes.
    pub fn geometry(&self, region_size: u64) -> Result<FlashGeometry, CliError> {
        if self.block_size == 0 || region_size % self.block_size != 0 {
            return Err(CliError::Usage(format!(
                "region size {region_size} is not a multiple of block size {}",
                self.block_size
            )));
        }
        let geometry = FlashGeometry::uniform(
            self.region_offset,
            self.block_size,
            region_size / self.block_size,
        );
        geometry.validate()?;
        Ok(geometry)
    }

    /// Attaches to the existing image.
    pub fn open_image(&self) -> Result<FileFlash, CliError> {
        let region_size = match self.region_size {
            Some(size) => size,
            None => std::fs::metadata(&self.image)?.len(),
        };
        let geometry = self.geometry(region_size)?;
        Ok(FileFlash::open_image(&self.image, geometry)?)
    }

    /// Attaches to the image and registers every `--segment`.
    pub fn open_driver(&self) -> Result<SegmentDriver<FileFlash>, CliError> {
        if self.segments.is_empty() {
            return Err(CliError::Usage(
                "at least one --segment <name>=<max> is required".to_string(),
            ));
        }
        let mut driver = SegmentDriver::new(self.open_image()?);
        for &(segment, max_payload) in &self.segments {
            driver.reserve(segment, max_payload);
        }
        Ok(driver)
    }

    /// Registered segments in ordinal order.
    pub fn ordered_segments(&self) -> Vec<SegmentType> {
        let mut segments: Vec<_> = self.segments.iter().map(|(s, _)| *s).collect();
        segments.sort();
        segments.dedup();
        segments
    }
}

/// Parses `<name>=<max payload bytes>`.
pub fn parse_segment_arg(arg: &str) -> Result<(SegmentType, usize), String> {
    let (name, max) = arg
        .split_once('=')
        .ok_or_else(|| format!("expected <name>=<max>, got {arg:?}"))?;
    let segment = name.trim().parse::<SegmentType>()?;
    let max = max
        .trim()
        .parse::<usize>()
        .map_err(|e| format!("invalid size {max:?}: {e}"))?;
    Ok((segment, max))
}

/// Parses a decimal or `0x`-prefixed hexadecimal `u32`.
pub fn parse_u32(value: &str) -> Result<u32, String> {
    let value = value.trim();
    let parsed = match value
        .strip_prefix("0x")
        .or_else(|| value.strip_prefix("0X"))
    {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => value.parse::<u32>(),
    };
    parsed.map_err(|e| format!("invalid value {value:?}: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn segment_arg() {
        assert_eq!(
            parse_segment_arg("application-data=64"),
            Ok((SegmentType::ApplicationData, 64))
        );
        assert!(parse_segment_arg("application-data").is_err());
        assert!(parse_segment_arg("bogus=1").is_err());
        assert!(parse_segment_arg("security=-1").is_err());
    }

    #[test]
    fn u32_values() {
        assert_eq!(parse_u32("0x1F"), Ok(31));
        assert_eq!(parse_u32("42"), Ok(42));
        assert!(parse_u32("0xZZ").is_err());
    }

    #[test]
    fn geometry_requires_whole_blocks() {
        let args = ImageArgs {
            image: PathBuf::from("unused.img"),
            block_size: 256,
            region_offset: 0,
            region_size: None,
            segments: Vec::new(),
            app_signature: 0,
        };
        assert!(args.geometry(1000).is_err());
        assert_eq!(args.geometry(1024).unwrap().block_count, 4);
    }
}
