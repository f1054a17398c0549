//! Erase command implementation.

use super::{CliError, ImageArgs};
use lonstore_core::SegmentType;

/// Runs the erase command.
pub fn run(args: &ImageArgs, segment: SegmentType) -> Result<(), CliError> {
    if !args.segments.iter().any(|(s, _)| *s == segment) {
        return Err(CliError::Usage(format!(
            "segment {segment} is not registered (add --segment {segment}=<max>)"
        )));
    }

    let mut driver = args.open_driver()?;
    let entry = driver.ensure_mapped(segment)?;
    driver.erase_segment(segment)?;

    println!(
        "Erased {segment}: {} bytes at {:#x}",
        entry.reserved, entry.segment_start
    );
    Ok(())
}
