//! Verify command implementation.

use super::inspect::{collect, SegmentReport};
use super::{CliError, ImageArgs};

/// Verification result.
#[derive(Debug, Default)]
pub struct VerifyResult {
    /// Number of segments checked.
    pub segments_checked: usize,
    /// Segments holding restorable data.
    pub valid_segments: usize,
    /// Segments with nothing committed (blank or interrupted).
    pub empty_segments: usize,
    /// Committed segments that would not restore.
    pub invalid_segments: usize,
    /// List of errors found.
    pub errors: Vec<String>,
}

impl VerifyResult {
    fn record(&mut self, segment: &SegmentReport) {
        self.segments_checked += 1;
        if segment.restorable {
            self.valid_segments += 1;
        } else if segment.committed {
            self.invalid_segments += 1;
            self.errors
                .push(format!("{}: {}", segment.segment, segment.status));
        } else {
            self.empty_segments += 1;
        }
    }

    fn is_ok(&self) -> bool {
        self.invalid_segments == 0
    }
}

/// Runs the verify command.
pub fn run(args: &ImageArgs) -> Result<(), CliError> {
    println!("Verifying flash image at {}", args.image.display());
    println!();

    let report = collect(args)?;
    let mut result = VerifyResult::default();
    for segment in &report.segments {
        result.record(segment);
        let mark = match (segment.restorable, segment.committed) {
            (true, _) => "✓",
            (false, true) => "✗",
            (false, false) => "-",
        };
        println!("  {mark} {:<22} {}", segment.segment, segment.status);
    }

    println!();
    println!(
        "{} checked, {} valid, {} empty, {} invalid",
        result.segments_checked,
        result.valid_segments,
        result.empty_segments,
        result.invalid_segments
    );
    for error in &result.errors {
        println!("  error: {error}");
    }

    if result.is_ok() {
        println!("✓ Image verification passed");
        Ok(())
    } else {
        println!("✗ Image verification failed");
        Err(CliError::VerificationFailed(result.invalid_segments))
    }
}
