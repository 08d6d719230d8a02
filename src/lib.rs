//! # packjob Core Library
//!
//! Builds archives from a set of files and directories through a small pipeline:
//!
//! - a background [`scan::DirectoryScanner`] counts how much work there is,
//! - the [`processor::EntryProcessor`] walks the inputs and registers one
//!   [`entry::EntryDescriptor`] per file or directory in an [`registry::EntryRegistry`],
//! - an [`archive::ArchiveWriter`] pulls those entries by index and writes them,
//!   reporting each entry's outcome back to its completion callback,
//! - [`control`] carries the shared interrupt flag and the retry/skip/cancel dialogs,
//! - [`progress`] folds all counters into one monotonic completion fraction.
//!
//! [`job::ArchiveJob`] drives the whole thing; the `packjob` binary is a thin
//! command line over it.
//!
//! ## Examples
//!
//! ```no_run
//! use std::path::PathBuf;
//! use std::sync::Arc;
//! use packjob::archive::Destination;
//! use packjob::config::JobConfig;
//! use packjob::control::SkipFailures;
//! use packjob::job::ArchiveJob;
//!
//! let inputs = vec![PathBuf::from("/data/photos")];
//! let job = ArchiveJob::for_paths(
//!     &inputs,
//!     Destination::File("/tmp/photos.zip".into()),
//!     JobConfig::default(),
//!     Arc::new(SkipFailures),
//! )?;
//! let report = job.run()?;
//! println!("{} entries", report.entries);
//! # Ok::<(), packjob::PackError>(())
//! ```

pub mod archive;
pub mod cli;
pub mod cli_runner;
pub mod common;
pub mod config;
pub mod control;
pub mod entry;
pub mod error;
pub mod fsx;
pub mod job;
pub mod processor;
pub mod progress;
pub mod registry;
pub mod scan;

pub use error::PackError;
