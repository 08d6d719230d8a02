//! Tar containers, plain or inside one zstd stream.
//!
//! Tar never seeks, so stream destinations are written straight through.

use std::fs::File;
use std::io::{self, BufWriter, Read, Write};
use std::sync::{Mutex, MutexGuard, PoisonError};

use tar::{Builder, EntryType, Header};
use tracing::{debug, info};

use super::staging::StreamSink;
use super::{drive_entries, ArchiveFormat, ArchiveWriter, Destination, EntryFeed, WriterSettings};
use crate::entry::EntryMeta;
use crate::PackError;

type Sink = Box<dyn Write + Send>;

enum TarSink {
    Plain(Sink),
    Zstd(zstd::stream::write::Encoder<'static, Sink>),
}

impl TarSink {
    fn finish(self) -> io::Result<()> {
        let mut inner = match self {
            TarSink::Plain(inner) => inner,
            TarSink::Zstd(encoder) => encoder.finish()?,
        };
        inner.flush()
    }
}

impl Write for TarSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            TarSink::Plain(w) => w.write(buf),
            TarSink::Zstd(w) => w.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            TarSink::Plain(w) => w.flush(),
            TarSink::Zstd(w) => w.flush(),
        }
    }
}

/// Passes through exactly `remaining` bytes. Content that ends early is padded
/// with zeros so the member still matches its header.
struct ExactSize<R> {
    inner: R,
    remaining: u64,
    padding: u64,
}

impl<R: Read> ExactSize<R> {
    fn new(inner: R, size: u64) -> Self {
        Self { inner, remaining: size, padding: 0 }
    }
}

impl<R: Read> Read for ExactSize<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.remaining == 0 || buf.is_empty() {
            return Ok(0);
        }
        let max = buf.len().min(usize::try_from(self.remaining).unwrap_or(usize::MAX));
        let n = if self.padding > 0 { 0 } else { self.inner.read(&mut buf[..max])? };
        let n = if n == 0 {
            buf[..max].fill(0);
            self.padding += max as u64;
            max
        } else {
            n
        };
        self.remaining -= n as u64;
        Ok(n)
    }
}

struct TarState {
    builder: Option<Builder<TarSink>>,
    entry_count: usize,
}

pub struct TarArchiveWriter {
    format: ArchiveFormat,
    destination: String,
    state: Mutex<TarState>,
}

impl TarArchiveWriter {
    pub fn open(
        format: ArchiveFormat,
        destination: &Destination,
        settings: &WriterSettings,
    ) -> Result<Self, PackError> {
        let name = destination.display_name();
        let encoder_init = |source: io::Error| PackError::EncoderInit { destination: name.clone(), source };

        let sink: Sink = match destination {
            Destination::File(path) => {
                let file = File::create(path).map_err(encoder_init)?;
                Box::new(BufWriter::with_capacity(256 * 1024, file))
            }
            Destination::Stream(stream) => {
                Box::new(BufWriter::with_capacity(64 * 1024, StreamSink::new(stream.clone())))
            }
        };
        let sink = match format {
            ArchiveFormat::TarZst => {
                let mut encoder = zstd::stream::write::Encoder::new(sink, settings.level).map_err(encoder_init)?;
                encoder.include_checksum(true).map_err(encoder_init)?;
                if settings.codec_threads > 0 {
                    encoder.multithread(settings.codec_threads).map_err(encoder_init)?;
                }
                TarSink::Zstd(encoder)
            }
            _ => TarSink::Plain(sink),
        };
        if settings.comment.is_some() {
            debug!(%format, "archive comments are not stored in tar");
        }

        Ok(Self {
            format,
            destination: name,
            state: Mutex::new(TarState { builder: Some(Builder::new(sink)), entry_count: 0 }),
        })
    }

    fn lock(&self) -> MutexGuard<'_, TarState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn header_for(meta: &EntryMeta) -> Header {
    let mut header = Header::new_gnu();
    header.set_mtime(meta.attributes.modified_time);
    if meta.is_dir() {
        header.set_entry_type(EntryType::Directory);
        header.set_size(0);
        header.set_mode(meta.attributes.permissions.map_or(0o755, |m| m & 0o7777));
    } else {
        header.set_entry_type(EntryType::Regular);
        header.set_size(meta.size());
        header.set_mode(meta.attributes.permissions.map_or(0o644, |m| m & 0o7777));
    }
    header
}

impl ArchiveWriter for TarArchiveWriter {
    fn format(&self) -> ArchiveFormat {
        self.format
    }

    fn begin_creation(&self, entry_count: usize) -> Result<(), PackError> {
        self.lock().entry_count = entry_count;
        Ok(())
    }

    fn create_archive(&self, feed: &dyn EntryFeed) -> Result<(), PackError> {
        let mut state = self.lock();
        let entry_count = state.entry_count;
        let builder = state.builder.as_mut().ok_or(PackError::WriterAborted)?;

        drive_entries(entry_count, feed, |meta, content| {
            let mut header = header_for(meta);
            match content {
                Some(reader) if !meta.is_dir() => {
                    let mut exact = ExactSize::new(reader, meta.size());
                    builder.append_data(&mut header, &meta.path, &mut exact)?;
                    if exact.padding > 0 {
                        debug!(entry = %meta.path, padding = exact.padding, "content ended early, member padded");
                    }
                    Ok(())
                }
                _ => {
                    if !meta.is_dir() {
                        header.set_size(0);
                    }
                    builder.append_data(&mut header, &meta.path, io::empty())
                }
            }
        })
    }

    fn close(&self) -> Result<(), PackError> {
        let Some(builder) = self.lock().builder.take() else {
            return Ok(());
        };
        builder
            .into_inner()
            .and_then(TarSink::finish)
            .map_err(|source| PackError::io(&self.destination, source))?;
        info!(format = %self.format, destination = %self.destination, "tar archive closed");
        Ok(())
    }
}
