//! Spooling for sequential destinations.
//!
//! Formats that seek (zip) cannot write to a pipe. They write into a temporary
//! file instead, and [`Spool::deliver`] copies it to the real destination once,
//! when the writer closes. The temporary file is removed on drop, whether or not
//! the copy succeeded.

use std::fs::File;
use std::io::{self, Seek, SeekFrom, Write};
use std::sync::PoisonError;

use tempfile::NamedTempFile;
use tracing::debug;

use super::SharedStream;
use crate::PackError;

/// `Write` adapter over a caller-owned stream.
pub struct StreamSink(SharedStream);

impl StreamSink {
    pub fn new(stream: SharedStream) -> Self {
        Self(stream)
    }
}

impl Write for StreamSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).flush()
    }
}

/// A temporary file standing in for a sequential destination.
pub struct Spool {
    temp: NamedTempFile,
    sink: SharedStream,
}

impl Spool {
    pub fn create(sink: SharedStream) -> io::Result<Self> {
        let temp = NamedTempFile::new()?;
        debug!(spool = %temp.path().display(), "spooling archive");
        Ok(Self { temp, sink })
    }

    /// A second handle on the spool file, for the encoder to write through.
    pub fn file(&self) -> io::Result<File> {
        self.temp.reopen()
    }

    /// Copies the spooled bytes to the destination and removes the spool.
    pub fn deliver(self) -> Result<u64, PackError> {
        let Spool { temp, sink } = self;
        let copy = || -> io::Result<u64> {
            let mut file = temp.reopen()?;
            file.seek(SeekFrom::Start(0))?;
            let mut sink = sink.lock().unwrap_or_else(PoisonError::into_inner);
            let copied = io::copy(&mut file, &mut *sink)?;
            sink.flush()?;
            Ok(copied)
        };
        let copied = copy().map_err(PackError::StagingCopyFailure)?;
        debug!(bytes = copied, "spooled archive delivered");
        Ok(copied)
    }
}
