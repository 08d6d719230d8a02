//! # Archive Job
//!
//! [`ArchiveJob`] wires the pipeline together for one archive:
//!
//! 1. the [`DirectoryScanner`] starts counting the input set in the background,
//! 2. the destination is checked for a collision and the writer is opened,
//!    asking the hooks to retry or cancel when that fails,
//! 3. the [`EntryProcessor`] registers every entry and returns,
//! 4. the archive writer pulls the registered entries by index,
//! 5. entries the writer never reached are resolved, the writer is closed and
//!    the scanner is joined.
//!
//! Interrupting the job (or answering `Cancel` to a dialog) is not a failure:
//! `run` then returns a report in [`JobState::Interrupted`] and nothing is
//! reported through [`JobHooks::report_error`].

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use crossbeam_channel::bounded;
use scopeguard::ScopeGuard;
use tracing::{debug, info, warn};

use crate::archive::{open_writer, ArchiveWriter, Destination, RegistryFeed};
use crate::common::base_folder;
use crate::config::JobConfig;
use crate::control::{CancelToken, Failure, FailureKind, JobControl, JobHooks, JobState, Resolution};
use crate::entry::EntryOutcome;
use crate::fsx::{LocalNode, NodeRef};
use crate::processor::EntryProcessor;
use crate::progress::{estimate, HighWaterMark, ProgressInputs, ProgressState, WorkCounters, WriterProgress};
use crate::registry::EntryRegistry;
use crate::scan::DirectoryScanner;
use crate::PackError;

/// Summary of a finished job.
#[derive(Debug, Clone)]
pub struct JobReport {
    pub state: JobState,
    /// Entries handed to the archive writer.
    pub entries: usize,
    /// `true` iff every registered entry succeeded or was skipped.
    pub all_succeeded: bool,
    /// Entries resolved without the writer reaching them.
    pub unreached: usize,
    pub processed_bytes: u64,
    pub elapsed: Duration,
}

pub struct ArchiveJob {
    roots: Vec<NodeRef>,
    base: PathBuf,
    destination: Destination,
    config: JobConfig,
    control: Arc<JobControl>,
    registry: Arc<EntryRegistry>,
    scanner: DirectoryScanner,
    processed: Arc<WorkCounters>,
    writer_progress: Arc<WriterProgress>,
    high_water: HighWaterMark,
    started: Mutex<Option<Instant>>,
}

impl ArchiveJob {
    /// Creates the job and starts scanning `roots` right away.
    ///
    /// Entry paths are `roots`' paths relative to `base`.
    pub fn new(
        roots: Vec<NodeRef>,
        base: impl Into<PathBuf>,
        destination: Destination,
        config: JobConfig,
        hooks: Arc<dyn JobHooks>,
    ) -> Result<Self, PackError> {
        config.validate()?;
        let token = CancelToken::new();
        let scanner = DirectoryScanner::start(roots.clone(), token.clone());
        Ok(Self {
            roots,
            base: base.into(),
            destination,
            config,
            control: Arc::new(JobControl::new(token, hooks)),
            registry: Arc::new(EntryRegistry::new()),
            scanner,
            processed: Arc::new(WorkCounters::new()),
            writer_progress: Arc::new(WriterProgress::new()),
            high_water: HighWaterMark::new(),
            started: Mutex::new(None),
        })
    }

    /// A job over local paths. Entries are named relative to the inputs' common parent.
    pub fn for_paths(
        inputs: &[PathBuf],
        destination: Destination,
        config: JobConfig,
        hooks: Arc<dyn JobHooks>,
    ) -> Result<Self, PackError> {
        let roots = inputs.iter().map(LocalNode::shared).collect();
        Self::new(roots, base_folder(inputs), destination, config, hooks)
    }

    pub fn registry(&self) -> &Arc<EntryRegistry> {
        &self.registry
    }

    pub fn state(&self) -> JobState {
        self.control.state()
    }

    /// Stops the scanner, the processor and the writer at their next check.
    pub fn interrupt(&self) {
        info!("interrupting archive job");
        self.control.interrupt();
        self.scanner.interrupt();
    }

    /// Overall completion in `[0, 1]`. Never decreases.
    pub fn total_percent_done(&self) -> f32 {
        let inputs = ProgressInputs {
            writer_fraction: self.writer_progress.fraction(),
            scan_completed: self.scanner.is_completed(),
            total_files: self.scanner.total_files(),
            total_bytes: self.scanner.total_bytes(),
            processed_files: self.processed.files(),
            processed_bytes: self.processed.bytes(),
        };
        self.high_water.observe(estimate(&inputs, &self.config.weights()))
    }

    pub fn progress_state(&self) -> ProgressState {
        let elapsed_time = self
            .started
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .map(|t| t.elapsed())
            .unwrap_or_default();
        let processed_bytes = self.processed.bytes().max(self.writer_progress.completed());
        let secs = elapsed_time.as_secs_f32();
        let speed_mbps = if secs > 0.0 { processed_bytes as f32 / (1024.0 * 1024.0) / secs } else { 0.0 };
        ProgressState {
            total_files: self.scanner.total_files(),
            processed_files: self.processed.files(),
            total_bytes: self.scanner.total_bytes(),
            processed_bytes,
            scan_completed: self.scanner.is_completed(),
            elapsed_time,
            speed_mbps,
            progress_percent: self.total_percent_done() * 100.0,
        }
    }

    /// Runs the job to the end on the calling thread.
    ///
    /// Returns `Err` only when the job failed; an interrupted job returns its report.
    pub fn run(&self) -> Result<JobReport, PackError> {
        let started = Instant::now();
        *self.started.lock().unwrap_or_else(PoisonError::into_inner) = Some(started);
        self.control.set_state(JobState::ScanningAndProcessing);
        info!(
            destination = %self.destination.display_name(),
            format = %self.config.format,
            inputs = self.roots.len(),
            "archive job started"
        );

        let (done_tx, done_rx) = bounded(1);
        let outcome = self.create(move |ok| {
            let _ = done_tx.send(ok);
        });

        // Whatever happened, nothing may stay unresolved.
        let interrupted = self.control.is_interrupted();
        let unreached = self.registry.resolve_pending(|| {
            EntryOutcome::failed(if interrupted { PackError::ScanInterrupted } else { PackError::WriterAborted })
        });
        if unreached > 0 {
            debug!(unreached, "resolved entries the writer never reached");
        }

        if self.control.is_interrupted() {
            self.scanner.interrupt();
        }
        self.scanner.join();

        let entries = match outcome {
            Ok(entries) => entries,
            Err(err) if self.control.is_interrupted() => {
                debug!(error = %err, "job error after interrupt");
                0
            }
            Err(err) => {
                self.control.set_state(JobState::Failed);
                warn!(error = %err, "archive job failed");
                self.control.hooks().report_error(&err);
                return Err(err);
            }
        };

        let state = if self.control.is_interrupted() { JobState::Interrupted } else { JobState::Done };
        self.control.set_state(state);
        let report = JobReport {
            state,
            entries,
            all_succeeded: done_rx.try_recv().unwrap_or(false),
            unreached,
            processed_bytes: self.processed.bytes(),
            elapsed: started.elapsed(),
        };
        info!(?state, entries, elapsed = ?report.elapsed, "archive job finished");
        Ok(report)
    }

    /// Steps 2..5. Returns the number of entries handed to the writer.
    fn create(&self, on_done: impl FnOnce(bool) + Send + 'static) -> Result<usize, PackError> {
        if !self.check_collision() {
            self.control.interrupt();
            return Ok(0);
        }
        let Some(writer) = self.open_writer()? else {
            return Ok(0);
        };
        // Close on every exit; the explicit close below surfaces its error.
        let writer = scopeguard::guard(writer, |writer| {
            if let Err(e) = writer.close() {
                debug!(error = %e, "close after early exit failed");
            }
        });

        let processor = EntryProcessor::new(
            self.registry.clone(),
            self.control.clone(),
            self.processed.clone(),
            self.base.clone(),
        );
        processor.process(&self.roots, on_done);
        let entry_count = self.registry.len();
        debug!(entry_count, "entries registered");

        let written = if self.control.is_interrupted() {
            Ok(0)
        } else {
            self.control.set_state(JobState::Writing);
            self.write(&**writer, entry_count).map(|()| entry_count)
        };

        let closed = ScopeGuard::into_inner(writer).close();
        let entries = written?;
        closed?;
        Ok(entries)
    }

    fn write(&self, writer: &dyn ArchiveWriter, entry_count: usize) -> Result<(), PackError> {
        let feed = RegistryFeed::new(self.registry.clone(), entry_count, self.writer_progress.clone());
        writer.begin_creation(entry_count)?;
        writer.create_archive(&feed)
    }

    /// `false` if the destination exists and the user did not choose to overwrite it.
    fn check_collision(&self) -> bool {
        let Some(path) = self.destination.path().filter(|p| p.exists()) else {
            return true;
        };
        match self.control.hooks().resolve_collision(path) {
            Resolution::Overwrite => {
                debug!(destination = %path.display(), "overwriting existing archive");
                true
            }
            answer => {
                info!(destination = %path.display(), ?answer, "destination exists, not overwriting");
                false
            }
        }
    }

    /// Opens the writer, rebuilding it from scratch on `Retry`. `None` once cancelled.
    fn open_writer(&self) -> Result<Option<Box<dyn ArchiveWriter>>, PackError> {
        let settings = self.config.writer_settings();
        let path = self.destination.path().unwrap_or(Path::new("-"));
        loop {
            let err = match open_writer(self.config.format, &self.destination, &settings) {
                Ok(writer) => return Ok(Some(writer)),
                Err(err @ PackError::EncoderInit { .. }) => err,
                Err(err) => return Err(err),
            };
            if self.control.is_interrupted() {
                return Ok(None);
            }
            let failure = Failure { kind: FailureKind::EncoderInit, path, error: &err };
            match self.control.hooks().resolve_failure(&failure) {
                Resolution::Retry => debug!(error = %err, "retrying archive writer construction"),
                Resolution::Cancel => {
                    self.control.interrupt();
                    return Ok(None);
                }
                Resolution::Skip | Resolution::Overwrite => return Err(err),
            }
        }
    }
}
