//! Cancellation and retry control.
//!
//! One [`CancelToken`] is shared by the scanner, the entry processor and every
//! entry's hooks. Failures are resolved through [`JobHooks`], the job's view of
//! the user-facing collision/error dialogs.

use std::io;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;

use tracing::debug;

use crate::PackError;

/// Shared interrupt flag. Cloning shares the flag.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Lifecycle of one archive job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum JobState {
    NotStarted = 0,
    ScanningAndProcessing = 1,
    Writing = 2,
    Done = 3,
    Interrupted = 4,
    Failed = 5,
}

impl JobState {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => JobState::ScanningAndProcessing,
            2 => JobState::Writing,
            3 => JobState::Done,
            4 => JobState::Interrupted,
            5 => JobState::Failed,
            _ => JobState::NotStarted,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Done | JobState::Interrupted | JobState::Failed)
    }
}

/// A user's answer to a collision or error dialog.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    Overwrite,
    Cancel,
    Retry,
    Skip,
}

/// What was being attempted when a failure happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Reading a node's attributes.
    Stat,
    /// Listing a directory's children.
    List,
    /// Opening a leaf's content.
    Read,
    /// Opening the destination or setting up the encoder.
    EncoderInit,
}

/// Context handed to [`JobHooks::resolve_failure`].
#[derive(Debug)]
pub struct Failure<'a> {
    pub kind: FailureKind,
    pub path: &'a Path,
    pub error: &'a (dyn std::error::Error + 'static),
}

/// Callbacks into the surrounding job framework (dialogs, status line).
pub trait JobHooks: Send + Sync {
    /// Notification that `path` is about to be written.
    fn next_file(&self, _path: &Path) {}

    /// Last chance to decline an entry. Declining is a skip, not a failure.
    fn accept_entry(&self, _path: &Path) -> bool {
        true
    }

    /// The destination already exists. Only [`Resolution::Overwrite`] continues.
    fn resolve_collision(&self, _destination: &Path) -> Resolution {
        Resolution::Cancel
    }

    /// Asked once per failed attempt. `Retry` re-attempts the same operation.
    fn resolve_failure(&self, failure: &Failure<'_>) -> Resolution;

    /// A job-level failure, reported once and only when not interrupted.
    fn report_error(&self, _error: &PackError) {}
}

/// Hooks that never ask: collisions cancel, failures are skipped.
#[derive(Debug, Default, Clone, Copy)]
pub struct SkipFailures;

impl JobHooks for SkipFailures {
    fn resolve_failure(&self, _failure: &Failure<'_>) -> Resolution {
        Resolution::Skip
    }
}

/// Interrupt flag, lifecycle state and failure policy of one job.
pub struct JobControl {
    token: CancelToken,
    state: AtomicU8,
    hooks: Arc<dyn JobHooks>,
}

impl JobControl {
    pub fn new(token: CancelToken, hooks: Arc<dyn JobHooks>) -> Self {
        Self { token, state: AtomicU8::new(JobState::NotStarted as u8), hooks }
    }

    pub fn token(&self) -> &CancelToken {
        &self.token
    }

    pub fn hooks(&self) -> &Arc<dyn JobHooks> {
        &self.hooks
    }

    pub fn interrupt(&self) {
        self.token.cancel();
    }

    pub fn is_interrupted(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn state(&self) -> JobState {
        JobState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn set_state(&self, state: JobState) {
        self.state.store(state as u8, Ordering::Release);
    }

    /// Runs `op` until it succeeds or the user stops retrying.
    ///
    /// Errors seen while interrupted are returned as `ErrorKind::Interrupted`
    /// without asking. `Cancel` also interrupts the job.
    pub fn retry_io<T>(
        &self,
        kind: FailureKind,
        path: &Path,
        mut op: impl FnMut() -> io::Result<T>,
    ) -> io::Result<T> {
        loop {
            let err = match op() {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };
            if self.is_interrupted() {
                debug!(path = %path.display(), error = %err, "ignoring error after interrupt");
                return Err(io::Error::new(io::ErrorKind::Interrupted, err));
            }
            let failure = Failure { kind, path, error: &err };
            match self.hooks.resolve_failure(&failure) {
                Resolution::Retry => {
                    debug!(path = %path.display(), ?kind, "retrying");
                    continue;
                }
                Resolution::Cancel => {
                    self.interrupt();
                    return Err(err);
                }
                Resolution::Skip | Resolution::Overwrite => return Err(err),
            }
        }
    }
}
