//! Runs a parsed command line: builds the job, renders progress, reports the outcome.

use crate::archive::Destination;
use crate::cli::{self, Args, CliHooks, Commands};
use crate::control::JobState;
use crate::job::ArchiveJob;
use crate::progress::ProgressState;
use crossbeam_channel::{bounded, RecvTimeoutError};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::{Duration, Instant};
use tracing::info;

const PROGRESS_INTERVAL: Duration = Duration::from_millis(100);

pub fn run_cli_app(args: Args) -> Result<(), Box<dyn std::error::Error>> {
    match args.command {
        Commands::Create {
            inputs,
            output,
            format,
            level,
            codec_threads,
            comment,
            config,
            overwrite,
            on_error,
            retries,
            progress,
        } => {
            let config = cli::build_config(config.as_deref(), format, level, codec_threads, comment)?;
            let inputs = resolve_inputs(&inputs)?;
            let destination = if output == Path::new("-") {
                Destination::stream(io::stdout())
            } else {
                Destination::File(output)
            };
            let hooks = Arc::new(CliHooks::new(overwrite, on_error, retries));
            let job = ArchiveJob::for_paths(&inputs, destination, config, hooks)?;

            let report = if progress {
                let render = create_cli_progress_callback("create");
                run_with_progress(&job, render)?
            } else {
                job.run()?
            };

            info!(entries = report.entries, bytes = report.processed_bytes, "done");
            match report.state {
                JobState::Interrupted => return Err("archive creation was cancelled".into()),
                _ if !report.all_succeeded => {
                    return Err("some inputs could not be archived".into());
                }
                _ => {}
            }
        }
    }

    Ok(())
}

/// Inputs must exist. Their parent directories are canonicalized; the inputs
/// themselves are not, so a symlink given on the command line stays a link.
fn resolve_inputs(inputs: &[PathBuf]) -> io::Result<Vec<PathBuf>> {
    let cwd = std::env::current_dir()?;
    inputs
        .iter()
        .map(|p| {
            let abs = cwd.join(p);
            let located = abs.symlink_metadata().and_then(|_| match (abs.parent(), abs.file_name()) {
                (Some(parent), Some(name)) => Ok(parent.canonicalize()?.join(name)),
                _ => abs.canonicalize(),
            });
            located.map_err(|e| io::Error::new(e.kind(), format!("{}: {e}", p.display())))
        })
        .collect()
}

/// Runs the job while a second thread polls and renders its progress.
fn run_with_progress(
    job: &ArchiveJob,
    render: impl Fn(ProgressState) + Send + Sync,
) -> Result<crate::job::JobReport, crate::PackError> {
    let (stop_tx, stop_rx) = bounded::<()>(0);
    thread::scope(|s| {
        s.spawn(|| loop {
            render(job.progress_state());
            match stop_rx.recv_timeout(PROGRESS_INTERVAL) {
                Err(RecvTimeoutError::Timeout) => continue,
                _ => break,
            }
        });
        let report = job.run();
        drop(stop_tx);
        if report.is_ok() {
            render(job.progress_state());
        }
        report
    })
}

// --- utils for CLI progress -------------------------------------------------

fn create_cli_progress_callback(operation: &str) -> impl Fn(ProgressState) + Send + Sync + 'static {
    let operation = operation.to_string();
    let last_update = Arc::new(Mutex::new(Instant::now()));
    let prev_len = Arc::new(Mutex::new(0usize));
    let done = Arc::new(AtomicBool::new(false));

    move |state: ProgressState| {
        if done.load(Ordering::Relaxed) {
            return;
        }
        let now = Instant::now();
        // Update every 100ms to avoid terminal spam, but always show 100% completion
        let should_update = state.progress_percent >= 100.0 || {
            let mut last = last_update.lock().unwrap_or_else(PoisonError::into_inner);
            if now.duration_since(*last) >= PROGRESS_INTERVAL {
                *last = now;
                true
            } else {
                false
            }
        };

        if !should_update {
            return;
        }

        // Determine terminal width (default 80)
        let term_width = term_size::dimensions().map(|(w, _)| w).unwrap_or(80);

        let eta_str = if !state.scan_completed {
            "scanning".to_string()
        } else if state.speed_mbps > 0.0 {
            let eta_seconds = state.estimated_time_remaining().as_secs_f32();
            if eta_seconds > 60.0 {
                format!("{:.1}m", eta_seconds / 60.0)
            } else {
                format!("{:.1}s", eta_seconds)
            }
        } else {
            "--".to_string()
        };

        let build_status_line = |bw: usize| -> String {
            let filled = (((state.progress_percent / 100.0) * bw as f32) as usize).min(bw);
            let progress_bar = format!("[{}{}]", "█".repeat(filled), "░".repeat(bw - filled));
            format!(
                "[{}] {} {:.1}% | {}/{} files | {:.1} MB/s | ETA: {}",
                operation.to_uppercase(),
                progress_bar,
                state.progress_percent,
                state.processed_files,
                state.total_files,
                state.speed_mbps,
                eta_str
            )
        };

        // Shrink the bar until the line fits the terminal
        let mut bar_len: usize = 40;
        let status_line = loop {
            let line = build_status_line(bar_len);
            if line.chars().count() <= term_width || bar_len <= 10 {
                break line;
            }
            bar_len = bar_len.saturating_sub(4).max(10);
        };

        // Print to stderr to avoid interfering with an archive on stdout
        let mut line_to_print = status_line;
        {
            let mut prev = prev_len.lock().unwrap_or_else(PoisonError::into_inner);
            let len = line_to_print.chars().count();
            if *prev > len {
                line_to_print.push_str(&" ".repeat(*prev - len));
            }
            *prev = len;
        }
        eprint!("\r\x1B[2K{}", line_to_print);
        io::stderr().flush().ok();

        if state.progress_percent >= 100.0 {
            eprintln!();
            done.store(true, Ordering::Relaxed);
        }
    }
}
