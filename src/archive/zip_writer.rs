//! Zip container with zstd-compressed members.

use std::fs::{File, OpenOptions};
use std::io::{self, Read};
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{Datelike, Local, TimeZone, Timelike};
use tracing::{debug, info, warn};
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipWriter};

use super::staging::Spool;
use super::{drive_entries, ArchiveFormat, ArchiveWriter, Destination, EntryFeed, WriterSettings};
use crate::entry::EntryMeta;
use crate::PackError;

/// Members of at least this size get zip64 headers.
const ZIP64_THRESHOLD: u64 = 0xFFFF_FFFF;

struct ZipState {
    zip: Option<ZipWriter<File>>,
    spool: Option<Spool>,
    entry_count: usize,
}

pub struct ZipArchiveWriter {
    destination: String,
    options: FileOptions,
    comment: Option<String>,
    state: Mutex<ZipState>,
}

impl ZipArchiveWriter {
    /// Creates (truncates) the destination file, or a spool for streams.
    pub fn open(destination: &Destination, settings: &WriterSettings) -> Result<Self, PackError> {
        let name = destination.display_name();
        let encoder_init = |source: io::Error| PackError::EncoderInit { destination: name.clone(), source };

        let (file, spool) = match destination {
            Destination::File(path) => {
                let file = OpenOptions::new()
                    .read(true)
                    .write(true)
                    .create(true)
                    .truncate(true)
                    .open(path)
                    .map_err(encoder_init)?;
                (file, None)
            }
            Destination::Stream(stream) => {
                let spool = Spool::create(stream.clone()).map_err(encoder_init)?;
                (spool.file().map_err(encoder_init)?, Some(spool))
            }
        };

        let options = FileOptions::default()
            .compression_method(CompressionMethod::Zstd)
            .compression_level(Some(settings.level));

        Ok(Self {
            destination: name,
            options,
            comment: settings.comment.clone(),
            state: Mutex::new(ZipState { zip: Some(ZipWriter::new(file)), spool, entry_count: 0 }),
        })
    }

    fn lock(&self) -> MutexGuard<'_, ZipState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn entry_options(&self, meta: &EntryMeta) -> FileOptions {
        let options = self
            .options
            .last_modified_time(zip_time(meta.attributes.modified_time))
            .large_file(meta.size() >= ZIP64_THRESHOLD);
        match meta.attributes.permissions {
            Some(mode) => options.unix_permissions(mode),
            None => options,
        }
    }
}

impl ArchiveWriter for ZipArchiveWriter {
    fn format(&self) -> ArchiveFormat {
        ArchiveFormat::Zip
    }

    fn begin_creation(&self, entry_count: usize) -> Result<(), PackError> {
        let mut state = self.lock();
        state.entry_count = entry_count;
        if let (Some(zip), Some(comment)) = (state.zip.as_mut(), &self.comment) {
            zip.set_comment(comment.clone());
        }
        Ok(())
    }

    fn create_archive(&self, feed: &dyn EntryFeed) -> Result<(), PackError> {
        let mut state = self.lock();
        let entry_count = state.entry_count;
        let zip = state.zip.as_mut().ok_or(PackError::WriterAborted)?;

        drive_entries(entry_count, feed, |meta, content| {
            let options = self.entry_options(meta);
            if meta.is_dir() {
                zip.add_directory(meta.path.as_str(), options)?;
                return Ok(());
            }
            zip.start_file(meta.path.as_str(), options)?;
            if let Some(reader) = content {
                copy_content(reader, &mut *zip, meta.size())?;
            }
            Ok(())
        })
    }

    fn close(&self) -> Result<(), PackError> {
        let mut state = self.lock();
        let Some(mut zip) = state.zip.take() else {
            return Ok(());
        };
        let spool = state.spool.take();

        let finished = zip.finish().map_err(io::Error::from);
        let file = match finished {
            Ok(file) => file,
            // Dropping the spool removes it.
            Err(source) => return Err(PackError::io(&self.destination, source)),
        };
        sync_finished(&file, &self.destination);
        drop(file);

        if let Some(spool) = spool {
            spool.deliver()?;
        }
        info!(destination = %self.destination, "zip archive closed");
        Ok(())
    }
}

/// Flushes the finished archive to disk. A failure is only logged.
fn sync_finished(file: &File, destination: &str) -> bool {
    match file.sync_all() {
        Ok(()) => true,
        Err(e) => {
            warn!(destination, error = %e, "cannot sync finished archive");
            false
        }
    }
}

/// Copies content and checks it matches the size recorded when it was scanned.
fn copy_content(reader: &mut dyn Read, out: &mut impl io::Write, expected: u64) -> io::Result<()> {
    let copied = io::copy(reader, out)?;
    if copied != expected {
        debug!(expected, copied, "entry size changed while archiving");
    }
    Ok(())
}

/// Zip timestamps are local time, 1980..=2107, two-second resolution.
fn zip_time(unix_secs: u64) -> zip::DateTime {
    let Some(local) = i64::try_from(unix_secs).ok().and_then(|s| Local.timestamp_opt(s, 0).single()) else {
        return zip::DateTime::default();
    };
    if !(1980..=2107).contains(&local.year()) {
        return zip::DateTime::default();
    }
    zip::DateTime::from_date_and_time(
        local.year() as u16,
        local.month() as u8,
        local.day() as u8,
        local.hour() as u8,
        local.minute() as u8,
        local.second() as u8,
    )
    .unwrap_or_default()
}
