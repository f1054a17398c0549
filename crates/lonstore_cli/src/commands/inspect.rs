//! Inspect command implementation.

use super::{CliError, ImageArgs, OutputFormat};
use lonstore_core::{
    ChecksumSpan, ChecksumVerdict, LedgerState, LoadOutcome, SegmentInspection,
    PERSISTENCE_VERSION,
};
use serde::Serialize;

/// Image inspection result.
#[derive(Debug, Serialize)]
pub struct ImageReport {
    /// Image path.
    pub image: String,
    /// Device offset of the region.
    pub region_offset: u64,
    /// Region size in bytes.
    pub region_size: u64,
    /// Erase-block size in bytes.
    pub block_size: u64,
    /// Bytes below the lowest placed segment.
    pub free_bytes: u64,
    /// Per-segment details, in ordinal order.
    pub segments: Vec<SegmentReport>,
}

/// Details of one segment.
#[derive(Debug, Serialize)]
pub struct SegmentReport {
    /// Segment name.
    pub segment: String,
    /// First byte of the segment.
    pub start: u64,
    /// Reserved bytes.
    pub reserved: u64,
    /// Capacity of the data region.
    pub max_data_size: u64,
    /// Decoded ledger state.
    pub ledger: String,
    /// Raw ledger signature word.
    pub ledger_signature: u32,
    /// Raw ledger state word.
    pub ledger_state: u32,
    /// Decoded header, if readable.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub header: Option<HeaderReport>,
    /// Checksum verdict.
    pub checksum: String,
    /// What a restore would report.
    pub status: String,
    /// Whether a restore would succeed.
    pub restorable: bool,
    /// Whether the ledger claims committed data.
    pub committed: bool,
}

/// Decoded persistence header.
#[derive(Debug, Serialize)]
pub struct HeaderReport {
    /// Payload length.
    pub length: u32,
    /// Format signature.
    pub signature: u32,
    /// Application signature.
    pub app_signature: u32,
    /// Format version.
    pub version: u16,
    /// Stored checksum.
    pub checksum: u16,
}

impl SegmentReport {
    fn from_inspection(inspection: &SegmentInspection) -> Self {
        let outcome = inspection.outcome();
        Self {
            segment: inspection.entry.segment.to_string(),
            start: inspection.entry.segment_start,
            reserved: inspection.entry.reserved,
            max_data_size: inspection.entry.max_data_size,
            ledger: inspection.ledger_state.to_string(),
            ledger_signature: inspection.ledger.signature,
            ledger_state: inspection.ledger.state,
            header: inspection.header.map(|h| HeaderReport {
                length: h.length,
                signature: h.signature,
                app_signature: h.app_signature,
                version: h.version,
                checksum: h.checksum,
            }),
            checksum: match inspection.checksum {
                ChecksumVerdict::Valid => "valid",
                ChecksumVerdict::Invalid => "invalid",
                ChecksumVerdict::NotChecked => "not checked",
            }
            .to_string(),
            status: match &outcome {
                LoadOutcome::Restored => "restorable".to_string(),
                LoadOutcome::Lost(reason) => reason.to_string(),
            },
            restorable: outcome.is_restored(),
            committed: inspection.ledger_state == LedgerState::Committed,
        }
    }
}

/// Reads the memory map and inspects every registered segment.
pub fn collect(args: &ImageArgs) -> Result<ImageReport, CliError> {
    let mut driver = args.open_driver()?;
    let mut segments = Vec::new();
    for segment in args.ordered_segments() {
        let inspection = driver.inspect(
            segment,
            args.app_signature,
            PERSISTENCE_VERSION,
            ChecksumSpan::Full,
        )?;
        segments.push(SegmentReport::from_inspection(&inspection));
    }

    let map = driver
        .memory_map()
        .ok_or_else(|| CliError::Usage("no segments mapped".to_string()))?;
    let geometry = map.geometry();
    Ok(ImageReport {
        image: args.image.display().to_string(),
        region_offset: geometry.region_offset,
        region_size: geometry.region_size,
        block_size: geometry.block_size,
        free_bytes: map.free_bytes(),
        segments,
    })
}

/// Runs the inspect command.
pub fn run(args: &ImageArgs, format: OutputFormat) -> Result<(), CliError> {
    let report = collect(args)?;
    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        OutputFormat::Text => print_text_output(&report),
    }
    Ok(())
}

fn print_text_output(report: &ImageReport) {
    println!("Image: {}", report.image);
    println!(
        "Region: {:#x}..{:#x} ({} bytes, {} byte blocks, {} free)",
        report.region_offset,
        report.region_offset + report.region_size,
        report.region_size,
        report.block_size,
        report.free_bytes
    );
    println!();
    println!(
        "{:<22} {:>10} {:>8} {:>8}  {:<17} {:>8}  status",
        "segment", "start", "reserved", "capacity", "ledger", "length"
    );
    for segment in &report.segments {
        let length = segment
            .header
            .as_ref()
            .filter(|_| segment.committed)
            .map_or_else(|| "-".to_string(), |h| h.length.to_string());
        println!(
            "{:<22} {:>#10x} {:>8} {:>8}  {:<17} {:>8}  {}",
            segment.segment,
            segment.start,
            segment.reserved,
            segment.max_data_size,
            segment.ledger,
            length,
            segment.status
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lonstore_core::{BlobCodec, PersistenceStore, SegmentType, StoreConfig};
    use tempfile::tempdir;

    #[test]
    fn report_reflects_committed_and_blank_segments() {
        let dir = tempdir().unwrap();
        let args = ImageArgs {
            image: dir.path().join("nvm.img"),
            block_size: 256,
            region_offset: 0x1000,
            region_size: Some(4096),
            segments: vec![
                (SegmentType::ApplicationData, 64),
                (SegmentType::NetworkImage, 300),
            ],
            app_signature: 0x42,
        };
        super::super::format::run(&args, false).unwrap();

        let mut store = PersistenceStore::new(
            args.open_image().unwrap(),
            StoreConfig::new().application_signature(0x42),
        );
        let codec = BlobCodec::new(64);
        *codec.state().lock() = vec![1, 2, 3];
        store.register(SegmentType::NetworkImage, Box::new(BlobCodec::new(300)));
        store.register(SegmentType::ApplicationData, Box::new(codec));
        store.store_segment(SegmentType::ApplicationData).unwrap();
        drop(store);

        let report = collect(&args).unwrap();
        assert_eq!(report.region_offset, 0x1000);
        assert_eq!(report.segments.len(), 2);

        let net = &report.segments[0];
        assert_eq!(net.segment, "network-image");
        assert!(!net.committed);
        assert!(!net.restorable);

        let app = &report.segments[1];
        assert!(app.committed);
        assert!(app.restorable);
        assert_eq!(app.header.as_ref().map(|h| h.length), Some(3));
        assert_eq!(app.checksum, "valid");

        let json = serde_json::to_string(&report).unwrap();
        assert!(json.contains("\"segment\":\"application-data\""));
    }
}
