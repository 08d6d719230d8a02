//! # Archive Writers
//!
//! This module defines the contract between the job and a concrete archive format.
//!
//! A writer is **pull-based**: after [`ArchiveWriter::begin_creation`] it asks an
//! [`EntryFeed`] for entries by index, strictly `0, 1, .., N-1`:
//!
//! 1. `describe_entry(i)` - metadata only, never blocks on I/O,
//! 2. `open_content(i)` - runs the entry's `before_processing` hook, then its
//!    content source. [`PackError::UserSkipped`] means "leave this entry out and
//!    move on"; [`PackError::ContentUnavailable`] fails just this entry,
//! 3. `report_result(i, ..)` - resolves the entry's completion callback,
//! 4. `report_progress(done, total)` - byte units, as content streams through.
//!
//! [`ArchiveWriter::close`] always runs, succeeds or not, and is idempotent.
//!
//! The set of formats is closed and selected by [`ArchiveFormat`].

pub mod feed;
pub mod staging;
mod tar_writer;
mod zip_writer;

pub use feed::RegistryFeed;
pub use tar_writer::TarArchiveWriter;
pub use zip_writer::ZipArchiveWriter;

use std::fmt;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::entry::{EntryMeta, EntryOutcome};
use crate::error::duplicate_io;
use crate::PackError;

/// Supported container formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum ArchiveFormat {
    /// Zip with zstd-compressed members. Needs a seekable output.
    #[default]
    Zip,
    /// Plain, uncompressed tar.
    Tar,
    /// Tar inside a single zstd stream.
    TarZst,
}

impl ArchiveFormat {
    /// Whether the container must be written to a seekable output.
    pub fn needs_seek(self) -> bool {
        matches!(self, ArchiveFormat::Zip)
    }
}

impl fmt::Display for ArchiveFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ArchiveFormat::Zip => "zip",
            ArchiveFormat::Tar => "tar",
            ArchiveFormat::TarZst => "tar-zst",
        };
        f.write_str(name)
    }
}

/// Sequential byte sink shared with the caller.
pub type SharedStream = Arc<Mutex<dyn Write + Send>>;

/// Where the archive goes.
#[derive(Clone)]
pub enum Destination {
    /// A file, opened (and truncated) for random access.
    File(PathBuf),
    /// A sequential stream such as stdout or a pipe.
    Stream(SharedStream),
}

impl Destination {
    pub fn stream(writer: impl Write + Send + 'static) -> Self {
        Destination::Stream(Arc::new(Mutex::new(writer)))
    }

    /// The destination path, if it is a file.
    pub fn path(&self) -> Option<&Path> {
        match self {
            Destination::File(path) => Some(path),
            Destination::Stream(_) => None,
        }
    }

    pub fn display_name(&self) -> String {
        match self {
            Destination::File(path) => path.display().to_string(),
            Destination::Stream(_) => "<stream>".to_string(),
        }
    }
}

impl fmt::Debug for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Destination::File(path) => f.debug_tuple("File").field(path).finish(),
            Destination::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}

/// Encoder knobs shared by all formats.
#[derive(Debug, Clone, Default)]
pub struct WriterSettings {
    /// zstd compression level.
    pub level: i32,
    /// zstd worker threads; 0 keeps the codec single threaded.
    pub codec_threads: u32,
    pub comment: Option<String>,
}

/// The pull callbacks an archive writer drives.
pub trait EntryFeed: Sync {
    fn describe_entry(&self, index: usize) -> Result<EntryMeta, PackError>;

    /// `Ok(None)` for entries without content (directories).
    fn open_content(&self, index: usize) -> Result<Option<Box<dyn Read + Send>>, PackError>;

    fn report_result(&self, index: usize, outcome: EntryOutcome);

    fn report_progress(&self, completed: u64, total: u64);

    /// Total content bytes the writer should expect, for progress reporting.
    fn total_bytes(&self) -> u64;
}

/// Capability every archive format implements.
pub trait ArchiveWriter: Send + Sync {
    fn format(&self) -> ArchiveFormat;

    /// Sets up encoder state for `entry_count` entries.
    fn begin_creation(&self, entry_count: usize) -> Result<(), PackError>;

    /// Pulls every entry from `feed`, in index order.
    fn create_archive(&self, feed: &dyn EntryFeed) -> Result<(), PackError>;

    /// Flushes and releases everything. Second and later calls do nothing.
    fn close(&self) -> Result<(), PackError>;
}

/// Opens `destination` and builds the writer for `format`.
pub fn open_writer(
    format: ArchiveFormat,
    destination: &Destination,
    settings: &WriterSettings,
) -> Result<Box<dyn ArchiveWriter>, PackError> {
    let staged = format.needs_seek() && matches!(destination, Destination::Stream(_));
    debug!(%format, destination = %destination.display_name(), staged, "opening archive writer");
    let writer: Box<dyn ArchiveWriter> = match format {
        ArchiveFormat::Zip => Box::new(ZipArchiveWriter::open(destination, settings)?),
        ArchiveFormat::Tar | ArchiveFormat::TarZst => {
            Box::new(TarArchiveWriter::open(format, destination, settings)?)
        }
    };
    Ok(writer)
}

/// Wraps content so bytes are reported as they stream into the container.
///
/// A read error ends the content early and is kept for the entry's result,
/// so the container only ever sees a short reader.
struct ContentReader<'a> {
    inner: Box<dyn Read + Send>,
    feed: &'a dyn EntryFeed,
    position: u64,
    total: u64,
    failure: Option<io::Error>,
}

impl Read for ContentReader<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.failure.is_some() {
            return Ok(0);
        }
        match self.inner.read(buf) {
            Ok(n) => {
                if n > 0 {
                    self.position += n as u64;
                    self.feed.report_progress(self.position, self.total);
                }
                Ok(n)
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => Err(e),
            Err(e) => {
                self.failure = Some(e);
                Ok(0)
            }
        }
    }
}

/// The pull loop shared by every format.
///
/// `write_entry` gets the entry's metadata and, for entries with content, a reader.
/// The reader never fails: content that cannot be read ends early and the entry
/// is reported as failed. An error from `write_entry` itself is a container
/// failure and is fatal for the whole archive.
pub(crate) fn drive_entries(
    entry_count: usize,
    feed: &dyn EntryFeed,
    mut write_entry: impl FnMut(&EntryMeta, Option<&mut dyn Read>) -> io::Result<()>,
) -> Result<(), PackError> {
    let total = feed.total_bytes();
    let mut completed = 0u64;

    for index in 0..entry_count {
        let meta = feed.describe_entry(index)?;
        let entry_end = completed + meta.size();

        let content = match feed.open_content(index) {
            Ok(content) => content,
            Err(PackError::UserSkipped) => {
                debug!(index, entry = %meta.path, "entry skipped");
                feed.report_result(index, EntryOutcome::Skipped);
                completed = entry_end;
                feed.report_progress(completed, total);
                continue;
            }
            Err(err @ PackError::ContentUnavailable { .. }) => {
                feed.report_result(index, EntryOutcome::failed(err));
                completed = entry_end;
                feed.report_progress(completed, total);
                continue;
            }
            Err(err) => return Err(err),
        };

        let mut reader =
            content.map(|inner| ContentReader { inner, feed, position: completed, total, failure: None });
        let written = write_entry(&meta, reader.as_mut().map(|r| r as &mut dyn Read));
        let (streamed, read_failure) = reader.map_or((completed, None), |r| (r.position, r.failure));

        match (written, read_failure) {
            (Err(source), _) => {
                feed.report_result(
                    index,
                    EntryOutcome::failed(PackError::EntryWriteFailure {
                        index,
                        path: meta.path.clone(),
                        source: duplicate_io(&source),
                    }),
                );
                return Err(PackError::EntryWriteFailure { index, path: meta.path, source });
            }
            (Ok(()), Some(source)) => {
                debug!(index, entry = %meta.path, error = %source, "content failed while streaming");
                feed.report_result(
                    index,
                    EntryOutcome::failed(PackError::ContentUnavailable { index, path: meta.path, source }),
                );
            }
            (Ok(()), None) => feed.report_result(index, EntryOutcome::Success),
        }
        completed = streamed.max(entry_end);
        feed.report_progress(completed, total);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::FileAttributes;

    struct Failing;

    impl Read for Failing {
        fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::Other, "device error"))
        }
    }

    /// Feed over a fixed list. `None` content is a directory.
    struct ListFeed {
        entries: Vec<(EntryMeta, Option<&'static str>)>,
        skip: Vec<usize>,
        unavailable: Vec<usize>,
        /// Content errors after its first byte.
        broken: Vec<usize>,
        results: Mutex<Vec<(usize, bool)>>,
        progress: Mutex<Vec<u64>>,
    }

    impl ListFeed {
        fn new(entries: Vec<(&str, Option<&'static str>)>) -> Self {
            let entries = entries
                .into_iter()
                .map(|(path, content)| {
                    let attributes = match content {
                        Some(text) => FileAttributes::file(text.len() as u64, 0),
                        None => FileAttributes::directory(0),
                    };
                    (EntryMeta { path: path.to_string(), attributes }, content)
                })
                .collect();
            Self {
                entries,
                skip: vec![],
                unavailable: vec![],
                broken: vec![],
                results: Mutex::new(vec![]),
                progress: Mutex::new(vec![]),
            }
        }
    }

    impl EntryFeed for ListFeed {
        fn describe_entry(&self, index: usize) -> Result<EntryMeta, PackError> {
            Ok(self.entries[index].0.clone())
        }

        fn open_content(&self, index: usize) -> Result<Option<Box<dyn Read + Send>>, PackError> {
            if self.skip.contains(&index) {
                return Err(PackError::UserSkipped);
            }
            if self.unavailable.contains(&index) {
                return Err(PackError::ContentUnavailable {
                    index,
                    path: self.entries[index].0.path.clone(),
                    source: io::Error::new(io::ErrorKind::NotFound, "gone"),
                });
            }
            if self.broken.contains(&index) {
                let head = &self.entries[index].1.unwrap_or_default().as_bytes()[..1];
                return Ok(Some(Box::new(head.chain(Failing))));
            }
            Ok(self.entries[index].1.map(|text| Box::new(text.as_bytes()) as Box<dyn Read + Send>))
        }

        fn report_result(&self, index: usize, outcome: EntryOutcome) {
            self.results.lock().unwrap().push((index, outcome.is_ok()));
        }

        fn report_progress(&self, completed: u64, _total: u64) {
            self.progress.lock().unwrap().push(completed);
        }

        fn total_bytes(&self) -> u64 {
            self.entries.iter().map(|(m, _)| m.size()).sum()
        }
    }

    #[test]
    fn pull_loop_skips_and_fails_locally() {
        let mut feed = ListFeed::new(vec![
            ("root", None),
            ("root/a.txt", Some("0123456789")),
            ("root/b.txt", Some("01234")),
            ("root/c.txt", Some("xy")),
        ]);
        feed.skip = vec![2];
        feed.unavailable = vec![3];

        let mut written = Vec::new();
        drive_entries(4, &feed, |meta, content| {
            let mut buf = Vec::new();
            if let Some(reader) = content {
                reader.read_to_end(&mut buf)?;
            }
            written.push((meta.path.clone(), buf.len()));
            Ok(())
        })
        .unwrap();

        assert_eq!(written, [("root".to_string(), 0), ("root/a.txt".to_string(), 10)]);
        assert_eq!(*feed.results.lock().unwrap(), [(0, true), (1, true), (2, true), (3, false)]);

        let progress = feed.progress.lock().unwrap();
        assert!(progress.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(*progress.last().unwrap(), feed.total_bytes());
    }

    #[test]
    fn read_failure_mid_entry_stays_local() {
        let mut feed = ListFeed::new(vec![("a", Some("12345")), ("b", Some("67"))]);
        feed.broken = vec![0];

        let mut written = Vec::new();
        drive_entries(2, &feed, |meta, content| {
            let mut buf = Vec::new();
            if let Some(reader) = content {
                reader.read_to_end(&mut buf)?;
            }
            written.push((meta.path.clone(), buf));
            Ok(())
        })
        .unwrap();

        assert_eq!(written, [("a".to_string(), b"1".to_vec()), ("b".to_string(), b"67".to_vec())]);
        assert_eq!(*feed.results.lock().unwrap(), [(0, false), (1, true)]);
        assert_eq!(*feed.progress.lock().unwrap().last().unwrap(), 7);
    }

    #[test]
    fn container_failure_aborts_the_pass() {
        let feed = ListFeed::new(vec![("a", Some("1")), ("b", Some("2"))]);
        let err = drive_entries(2, &feed, |_, _| Err(io::Error::new(io::ErrorKind::Other, "disk full")))
            .unwrap_err();
        assert!(matches!(err, PackError::EntryWriteFailure { index: 0, .. }));
        assert_eq!(*feed.results.lock().unwrap(), [(0, false)]);
    }
}
