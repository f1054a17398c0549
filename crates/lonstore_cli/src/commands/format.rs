//! Format command implementation.

use super::{CliError, ImageArgs, DEFAULT_REGION_SIZE};
use lonstore_flash::FileFlash;
use tracing::info;

/// Runs the format command.
pub fn run(args: &ImageArgs, force: bool) -> Result<(), CliError> {
    if args.image.exists() && !force {
        return Err(CliError::Usage(format!(
            "{} already exists (use --force to overwrite)",
            args.image.display()
        )));
    }

    let geometry = args.geometry(args.region_size.unwrap_or(DEFAULT_REGION_SIZE))?;
    FileFlash::create(&args.image, geometry)?;
    info!(image = %args.image.display(), size = geometry.region_size, "image formatted");

    println!(
        "Formatted {} ({} blocks of {} bytes at {:#x})",
        args.image.display(),
        geometry.block_count,
        geometry.block_size,
        geometry.region_offset
    );
    Ok(())
}
