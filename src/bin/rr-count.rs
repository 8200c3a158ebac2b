use anyhow::{Context, Result};
use clap::Parser;
use replay_log::record::{EntryKind, NUM_ENTRY_KINDS};
use replay_log::replay::LogReader;
use std::path::PathBuf;
use tracing_subscriber::filter::EnvFilter;

/// Counts entries of each kind in a nondet log and totals their bytes.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to the nondet log.
    input: PathBuf,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_env("RR_LOG"))
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let mut reader = LogReader::open(&args.input)
        .with_context(|| format!("failed to open {}", args.input.display()))?;

    let mut counts = [0u64; NUM_ENTRY_KINDS];
    let mut bytes = [0u64; NUM_ENTRY_KINDS];
    while !reader.is_drained() {
        let entry = reader.read_entry()?;
        let index = entry.kind().index();
        counts[index] += 1;
        bytes[index] += reader.bytes_read() - entry.file_pos;
    }

    for kind in EntryKind::all() {
        if counts[kind.index()] == 0 {
            continue;
        }
        println!(
            "{:<18} => {:>10} entries, {:>12} bytes",
            kind.name(),
            counts[kind.index()],
            bytes[kind.index()]
        );
    }

    Ok(())
}
