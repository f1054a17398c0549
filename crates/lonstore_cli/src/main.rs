//! lonstore CLI
//!
//! Command-line tools for lonstore flash images.
//!
//! # Commands
//!
//! - `format` - Create a blank (erased) flash image
//! - `inspect` - Display the memory map and per-segment ledger and header
//! - `verify` - Check every committed segment's signatures and checksum
//! - `erase` - Erase one segment so the next boot restores defaults

mod commands;

use clap::{Parser, Subcommand};
use commands::{ImageArgs, OutputFormat};
use lonstore_core::SegmentType;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// lonstore flash image tools.
#[derive(Parser)]
#[command(name = "lonstore")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the flash image file
    #[arg(global = true, short, long)]
    image: Option<PathBuf>,

    /// Erase-block size in bytes
    #[arg(global = true, short, long, default_value_t = 4096)]
    block_size: u64,

    /// Device offset of the first image byte
    #[arg(global = true, long, default_value_t = 0)]
    region_offset: u64,

    /// Region size in bytes (defaults to the image file size)
    #[arg(global = true, long)]
    region_size: Option<u64>,

    /// Registered segment as `<name>=<max payload bytes>`; repeat per segment
    #[arg(global = true, short, long = "segment", value_parser = commands::parse_segment_arg)]
    segments: Vec<(SegmentType, usize)>,

    /// Application signature expected in headers (decimal or 0x-prefixed hex)
    #[arg(global = true, short, long, default_value = "0", value_parser = commands::parse_u32)]
    app_signature: u32,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a blank flash image
    Format {
        /// Overwrite an existing image
        #[arg(short, long)]
        force: bool,
    },

    /// Display the memory map and segment contents
    Inspect {
        /// Output format (text, json)
        #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },

    /// Verify committed segments
    Verify,

    /// Erase one segment
    Erase {
        /// Segment to erase
        target: SegmentType,
    },

    /// Show version information
    Version,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let args = |command: &str| -> Result<ImageArgs, String> {
        let image = cli
            .image
            .clone()
            .ok_or_else(|| format!("Image path required for {command}"))?;
        Ok(ImageArgs {
            image,
            block_size: cli.block_size,
            region_offset: cli.region_offset,
            region_size: cli.region_size,
            segments: cli.segments.clone(),
            app_signature: cli.app_signature,
        })
    };

    match cli.command {
        Commands::Format { force } => {
            commands::format::run(&args("format")?, force)?;
        }
        Commands::Inspect { format } => {
            commands::inspect::run(&args("inspect")?, format)?;
        }
        Commands::Verify => {
            commands::verify::run(&args("verify")?)?;
        }
        Commands::Erase { target } => {
            commands::erase::run(&args("erase")?, target)?;
        }
        Commands::Version => {
            println!("lonstore CLI v{}", env!("CARGO_PKG_VERSION"));
            println!("lonstore core v{}", lonstore_core::VERSION);
        }
    }

    Ok(())
}
