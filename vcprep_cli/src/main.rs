//! vcprep - convert speaker recordings into coded spectral envelope segments.

use std::io::{BufRead, IsTerminal, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;
use vcprep_core::persist::resolve;
use vcprep_core::report::write_jsonl;
use vcprep_core::{CancelToken, OutputDir, Pipeline, PrepConfig, PrepError};

/// Convert wav recordings into mel-cepstral segments and per-batch archives
/// for voice-conversion training.
///
/// Files are discovered recursively under the input directory and must be
/// named `<speaker>_<utterance>.wav`. The output directory is wiped before
/// the run.
#[derive(Parser, Debug)]
#[command(name = "vcprep")]
#[command(version)]
struct Args {
    /// Directory containing the speaker recordings
    #[arg(long, default_value = "./modified_data/data/speakers")]
    input_dir: PathBuf,

    /// Directory that receives the processed archives and segments
    #[arg(long, default_value = "./modified_data/data/processed")]
    output_dir: PathBuf,

    /// TOML file overriding the default analysis settings
    #[arg(long)]
    config: Option<PathBuf>,

    /// Number of speakers processed in parallel
    #[arg(short = 'j', long)]
    workers: Option<usize>,

    /// Utterances concatenated into one batch
    #[arg(long)]
    chunk_size: Option<usize>,

    /// Segment width in analysis frames
    #[arg(long)]
    frames: Option<usize>,

    /// Only process these speakers (comma-separated)
    #[arg(long, value_delimiter = ',')]
    speakers: Option<Vec<String>>,

    /// Write a JSON Lines report of every batch to this file
    #[arg(long)]
    report: Option<PathBuf>,

    /// Wipe a non-empty output directory without asking
    #[arg(short = 'y', long)]
    yes: bool,

    /// Verbose output
    #[arg(short = 'v', long)]
    verbose: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let default_level = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_target(false)
        .init();

    let cfg = build_config(&args)?;
    let pipeline = Pipeline::new(cfg).context("invalid configuration")?;

    if let Some(report) = &args.report {
        check_report_path(report, &args.output_dir)?;
    }
    let out = acquire_output(&args.output_dir, &args.input_dir, args.yes)?;

    let cancel = CancelToken::new();
    let handler_token = cancel.clone();
    ctrlc::set_handler(move || handler_token.cancel())?;

    let summary = match pipeline.run(&args.input_dir, &out, &cancel) {
        Ok(summary) => summary,
        Err(PrepError::Cancelled) => anyhow::bail!("Interrupted"),
        Err(e) => return Err(e.into()),
    };

    if let Some(path) = &args.report {
        write_jsonl(path, &summary.reports)?;
        info!("report written to {}", path.display());
    }

    println!(
        "{} speakers, {} utterances, {} batches ({} without voiced frames), {} segments",
        summary.speakers,
        summary.utterances,
        summary.batches,
        summary.unvoiced_batches,
        summary.segments
    );
    Ok(())
}

fn build_config(args: &Args) -> Result<PrepConfig> {
    let mut cfg = match &args.config {
        Some(path) => PrepConfig::from_toml_file(path)?,
        None => PrepConfig::default(),
    };
    if let Some(workers) = args.workers {
        cfg.workers = workers;
    }
    if let Some(chunk_size) = args.chunk_size {
        cfg.chunk_size = chunk_size;
    }
    if let Some(frames) = args.frames {
        cfg.frames = frames;
    }
    if let Some(speakers) = &args.speakers {
        cfg.speakers = Some(speakers.clone());
    }
    Ok(cfg)
}

/// The output directory holds only archives and segments.
fn check_report_path(report: &Path, output: &Path) -> Result<()> {
    let report = resolve(report)?;
    let output = resolve(output)?;
    if report.starts_with(&output) {
        anyhow::bail!(
            "report {} must not be written inside the output directory {}",
            report.display(),
            output.display()
        );
    }
    Ok(())
}

/// Acquire the output directory, asking before wiping existing files when
/// attached to a terminal.
fn acquire_output(output: &Path, input: &Path, yes: bool) -> Result<OutputDir> {
    match OutputDir::acquire(output, input, yes) {
        Err(PrepError::OutputNotEmpty(path)) if std::io::stdin().is_terminal() => {
            eprint!("{} is not empty. Delete its contents? [y/N] ", path.display());
            std::io::stderr().flush()?;
            let mut answer = String::new();
            std::io::stdin().lock().read_line(&mut answer)?;
            if matches!(answer.trim(), "y" | "Y" | "yes") {
                Ok(OutputDir::acquire(output, input, true)?)
            } else {
                anyhow::bail!("aborted: output directory left untouched")
            }
        }
        other => Ok(other?),
    }
}
