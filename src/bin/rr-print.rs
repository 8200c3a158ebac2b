use anyhow::{Context, Result};
use clap::Parser;
use replay_log::replay::LogReader;
use std::path::PathBuf;
use tracing_subscriber::filter::EnvFilter;

/// Prints a human-readable version of a nondet log to stdout.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to the nondet log.
    input: PathBuf,

    /// Also print each entry's byte offset.
    #[arg(short, long)]
    offsets: bool,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_env("RR_LOG"))
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let mut reader = LogReader::open(&args.input)
        .with_context(|| format!("failed to open {}", args.input.display()))?;

    let header = reader.last_prog_point();
    println!(
        "header: last instruction {} ({} bytes of log)",
        header.guest_instr_count,
        reader.size()
    );

    while !reader.is_drained() {
        let entry = reader.read_entry()?;
        if args.offsets {
            println!("{:>10}  {}", entry.file_pos, entry);
        } else {
            println!("{}", entry);
        }
    }

    Ok(())
}
