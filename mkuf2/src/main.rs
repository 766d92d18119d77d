//! Command-line front end: merges the given inputs and writes the UF2 image to standard output
//! or a file. Diagnostics go to standard error.

use clap::Parser;
use eyre::{Result, WrapErr};
use mkuf2::InputSpec;
use mkuf2::format::RP2040_FAMILY_ID;
use std::fs::File;
use std::io::{self, BufWriter, IsTerminal};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Command-line arguments.
#[derive(Parser)]
#[command(version, about)]
struct Args {
    /// Path where resulting UF2 will be written to. Defaults to standard output.
    #[arg(short = 'o', long)]
    output: Option<PathBuf>,
    /// Family ID stamped into every output record.
    #[arg(long, default_value_t = RP2040_FAMILY_ID, value_parser = clap_num::maybe_hex::<u32>)]
    family_id: u32,
    /// Inputs, applied in order: `PATH` for a UF2 file, `ADDR:PATH` for a flat binary loaded at
    /// hexadecimal address `ADDR`.
    #[arg(required = true)]
    inputs: Vec<InputSpec>,
}

fn main() -> Result<()> {
    color_eyre::install()?;
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(io::stderr)
        .with_ansi(io::stderr().is_terminal())
        .without_time()
        .with_target(false)
        .with_level(false)
        .init();

    let args = Args::parse();

    let pagemap = mkuf2::merge_inputs(&args.inputs)?;
    let summary = match &args.output {
        Some(path) => {
            let file = File::create(path)
                .wrap_err_with(|| format!("failed to create {}", path.display()))?;
            mkuf2::emit(&pagemap, args.family_id, BufWriter::new(file))?
        }
        None => mkuf2::emit(&pagemap, args.family_id, BufWriter::new(io::stdout().lock()))?,
    };
    tracing::debug!(
        "wrote {} records for {} of {} pages",
        summary.blocks,
        summary.pages,
        pagemap.len()
    );

    Ok(())
}
