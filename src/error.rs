use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// The primary error type for all operations in the `packjob` crate.
#[derive(Debug, Error)]
pub enum PackError {
    /// The job was interrupted. Not a failure: cancellation is cooperative and expected.
    #[error("operation interrupted")]
    ScanInterrupted,

    /// An entry's `before_processing` hook declined it. Not a failure.
    #[error("entry skipped")]
    UserSkipped,

    /// The content of a leaf entry could not be opened or read.
    #[error("content of entry #{index} ('{path}') is unavailable: {source}")]
    ContentUnavailable {
        index: usize,
        path: String,
        #[source]
        source: io::Error,
    },

    /// The destination could not be opened or the encoder state could not be set up.
    #[error("cannot open archive destination '{destination}': {source}")]
    EncoderInit {
        destination: String,
        #[source]
        source: io::Error,
    },

    /// The archive writer failed while writing a specific entry into the container.
    #[error("failed to write entry #{index} ('{path}'): {source}")]
    EntryWriteFailure {
        index: usize,
        path: String,
        #[source]
        source: io::Error,
    },

    /// Copying the spooled archive to a sequential destination failed.
    #[error("failed to copy staged archive to its destination: {0}")]
    StagingCopyFailure(#[source] io::Error),

    /// A registry index was requested before it was registered.
    #[error("entry index {index} out of range (registry holds {len} entries)")]
    IndexOutOfRange { index: usize, len: usize },

    /// The entry was never reached because the writer stopped early.
    #[error("archive writer stopped before reaching this entry")]
    WriterAborted,

    /// An I/O error occurred on a specific path.
    #[error("I/O error on path '{}': {source}", path.display())]
    Io {
        #[source]
        source: io::Error,
        path: PathBuf,
    },

    /// An error occurred when trying to strip a prefix from a file path.
    #[error("could not strip prefix '{}' from path '{}'", prefix.display(), path.display())]
    StripPrefix { prefix: PathBuf, path: PathBuf },

    /// Invalid job configuration.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// An error while reading a JSON configuration file.
    #[error("configuration parse error: {0}")]
    SerdeJson(#[from] serde_json::Error),
}

impl PackError {
    /// Cancellation and user skips are part of normal control flow.
    pub fn is_expected(&self) -> bool {
        matches!(self, PackError::ScanInterrupted | PackError::UserSkipped)
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        PackError::Io { source, path: path.into() }
    }
}

impl From<io::Error> for PackError {
    fn from(err: io::Error) -> Self {
        PackError::Io { source: err, path: PathBuf::new() } // Generic path
    }
}

/// Rebuilds an `io::Error` with the same kind and message; `io::Error` is not `Clone`.
pub(crate) fn duplicate_io(err: &io::Error) -> io::Error {
    io::Error::new(err.kind(), err.to_string())
}
