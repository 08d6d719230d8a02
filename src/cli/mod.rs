use clap::{Parser, Subcommand, ValueEnum};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use tracing::{error, warn};

use crate::archive::ArchiveFormat;
use crate::config::JobConfig;
use crate::control::{Failure, JobHooks, Resolution};
use crate::PackError;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Commands,

    /// Log debug details to stderr (overridden by RUST_LOG).
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand, Clone, Debug)]
pub enum Commands {
    /// Create a new archive from specified files and directories.
    #[command(alias = "c")]
    Create {
        /// One or more input files or directories to add to the archive.
        #[arg(required = true)]
        inputs: Vec<PathBuf>,

        /// The path for the output archive, or `-` for stdout.
        #[arg(short, long)]
        output: PathBuf,

        /// Container format. [default: zip]
        #[arg(long, value_enum)]
        format: Option<ArchiveFormat>,

        /// Zstandard compression level (1-22). [default: 3]
        #[arg(long)]
        level: Option<i32>,

        /// Threads for the zstd codec of tar-zst archives. [0 = single threaded, auto = all cores]
        #[arg(long, value_parser = parse_codec_threads)]
        codec_threads: Option<u32>,

        /// Comment stored in the archive (zip only).
        #[arg(long)]
        comment: Option<String>,

        /// JSON file with job settings. Flags given on the command line win.
        #[arg(long)]
        config: Option<PathBuf>,

        /// Replace the output file if it already exists.
        #[arg(long)]
        overwrite: bool,

        /// What to do when an input cannot be read.
        #[arg(long, value_enum, default_value_t = ErrorPolicy::Skip)]
        on_error: ErrorPolicy,

        /// Attempts per input before `--on-error retry` gives up and skips it.
        #[arg(long, default_value_t = 3)]
        retries: u32,

        /// Show a progress bar on stderr.
        #[arg(long)]
        progress: bool,
    },
}

/// Non-interactive answer to the "cannot read" dialog.
#[derive(ValueEnum, Copy, Clone, Debug, PartialEq, Eq)]
pub enum ErrorPolicy {
    /// Leave the input out of the archive and continue.
    Skip,
    /// Try again, up to `--retries` times, then skip.
    Retry,
    /// Stop the whole job.
    Cancel,
}

fn parse_codec_threads(value: &str) -> Result<u32, String> {
    if value.eq_ignore_ascii_case("auto") {
        return Ok(num_cpus::get() as u32);
    }
    value.parse::<u32>().map_err(|e| format!("expected a thread count or `auto`: {e}"))
}

/// Merges the config file, the environment and explicit flags, in that order.
pub fn build_config(
    config: Option<&Path>,
    format: Option<ArchiveFormat>,
    level: Option<i32>,
    codec_threads: Option<u32>,
    comment: Option<String>,
) -> Result<JobConfig, PackError> {
    let mut job_config = match config {
        Some(path) => JobConfig::from_file(path)?,
        None => JobConfig::default(),
    };
    job_config.apply_env();
    if let Some(format) = format {
        job_config.format = format;
    }
    if let Some(level) = level {
        job_config.level = level;
    }
    if let Some(threads) = codec_threads {
        job_config.codec_threads = threads;
    }
    if comment.is_some() {
        job_config.comment = comment;
    }
    job_config.validate()?;
    Ok(job_config)
}

/// Answers the job's dialogs from command-line flags.
#[derive(Debug)]
pub struct CliHooks {
    overwrite: bool,
    policy: ErrorPolicy,
    retries: u32,
    attempts: Mutex<HashMap<PathBuf, u32>>,
}

impl CliHooks {
    pub fn new(overwrite: bool, policy: ErrorPolicy, retries: u32) -> Self {
        Self { overwrite, policy, retries, attempts: Mutex::new(HashMap::new()) }
    }
}

impl JobHooks for CliHooks {
    fn resolve_collision(&self, destination: &Path) -> Resolution {
        if self.overwrite {
            Resolution::Overwrite
        } else {
            error!(destination = %destination.display(), "output exists; pass --overwrite to replace it");
            Resolution::Cancel
        }
    }

    fn resolve_failure(&self, failure: &Failure<'_>) -> Resolution {
        warn!(path = %failure.path.display(), kind = ?failure.kind, error = %failure.error, "cannot read input");
        match self.policy {
            ErrorPolicy::Skip => Resolution::Skip,
            ErrorPolicy::Cancel => Resolution::Cancel,
            ErrorPolicy::Retry => {
                let mut attempts = self.attempts.lock().unwrap_or_else(PoisonError::into_inner);
                let count = attempts.entry(failure.path.to_path_buf()).or_insert(0);
                *count += 1;
                if *count <= self.retries {
                    Resolution::Retry
                } else {
                    Resolution::Skip
                }
            }
        }
    }

    fn report_error(&self, error: &PackError) {
        error!(error = %error, "archive creation failed");
    }
}

/// Parses command-line arguments using `clap`. Exits on `--help` or bad usage.
pub fn run() -> Args {
    Args::parse()
}
