use std::fs::File;
use std::io::{self, BufRead, BufReader, Write};

use anyhow::{Context, Result};
use clap::Parser;
use rastro::cli::Cli;
use rastro::engine::Engine;
use rastro::replay::{self, ReplayDirectory, ReplayMemory};
use tracing_subscriber::EnvFilter;

/// Initialize tracing subscriber for debug output
fn init_tracing(debug: bool) {
    if debug {
        tracing_subscriber::fmt()
            .with_env_filter(
                EnvFilter::from_default_env().add_directive(tracing::Level::DEBUG.into()),
            )
            .with_writer(std::io::stderr)
            .init();
    }
}

fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.debug);

    // Initialization failures are the only fatal errors; everything that
    // goes wrong mid-trace is logged and survived.
    let reader: Box<dyn BufRead> = match &args.input {
        Some(path) => Box::new(BufReader::new(
            File::open(path).with_context(|| format!("failed to open trace {}", path.display()))?,
        )),
        None => Box::new(BufReader::new(io::stdin())),
    };
    let writer: Box<dyn Write> = match &args.output {
        Some(path) => Box::new(
            File::create(path)
                .with_context(|| format!("failed to create output {}", path.display()))?,
        ),
        None => Box::new(io::stdout()),
    };

    let engine = Engine::new(ReplayDirectory::default(), ReplayMemory::default(), writer);
    let summary = replay::run(reader, engine)?;

    eprintln!(
        "[rastro: {} events replayed, {} skipped, {} provenance records]",
        summary.events, summary.skipped, summary.records
    );
    Ok(())
}
