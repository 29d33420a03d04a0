//! CLI argument parsing for Rastro

use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "rastro")]
#[command(version)]
#[command(about = "Derive file provenance from a recorded syscall trace", long_about = None)]
pub struct Cli {
    /// Recorded trace to replay (JSON lines); reads stdin if omitted
    #[arg(value_name = "TRACE")]
    pub input: Option<PathBuf>,

    /// Write provenance records to FILE instead of stdout
    #[arg(short = 'o', long = "output", value_name = "FILE")]
    pub output: Option<PathBuf>,

    /// Enable debug logging on stderr
    #[arg(long)]
    pub debug: bool,
}
