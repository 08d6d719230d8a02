//! [`EntryFeed`] over the job's entry registry.

use std::io::Read;
use std::sync::Arc;

use tracing::{trace, warn};

use super::EntryFeed;
use crate::entry::{EntryDescriptor, EntryMeta, EntryOutcome};
use crate::progress::WriterProgress;
use crate::registry::EntryRegistry;
use crate::PackError;

/// Serves the first `entry_count` registered entries to an archive writer.
///
/// The count is fixed when the feed is built, so entries registered later are
/// outside the archive and [`describe_entry`](EntryFeed::describe_entry) treats
/// their indices as out of range.
pub struct RegistryFeed {
    registry: Arc<EntryRegistry>,
    entry_count: usize,
    total_bytes: u64,
    progress: Arc<WriterProgress>,
}

impl RegistryFeed {
    pub fn new(registry: Arc<EntryRegistry>, entry_count: usize, progress: Arc<WriterProgress>) -> Self {
        let total_bytes = registry.total_size(entry_count);
        Self { registry, entry_count, total_bytes, progress }
    }

    pub fn entry_count(&self) -> usize {
        self.entry_count
    }

    fn descriptor(&self, index: usize) -> Result<Arc<EntryDescriptor>, PackError> {
        if index >= self.entry_count {
            return Err(PackError::IndexOutOfRange { index, len: self.entry_count });
        }
        self.registry.get(index)
    }
}

impl EntryFeed for RegistryFeed {
    fn describe_entry(&self, index: usize) -> Result<EntryMeta, PackError> {
        Ok(self.descriptor(index)?.meta().clone())
    }

    fn open_content(&self, index: usize) -> Result<Option<Box<dyn Read + Send>>, PackError> {
        let descriptor = self.descriptor(index)?;
        if !descriptor.should_process() {
            return Err(PackError::UserSkipped);
        }
        match descriptor.open_content() {
            None => Ok(None),
            Some(Ok(reader)) => Ok(Some(reader)),
            Some(Err(source)) => Err(PackError::ContentUnavailable {
                index,
                path: descriptor.path().to_string(),
                source,
            }),
        }
    }

    fn report_result(&self, index: usize, outcome: EntryOutcome) {
        match self.descriptor(index) {
            Ok(descriptor) => {
                if !descriptor.complete(outcome) {
                    trace!(index, "entry already resolved");
                }
            }
            Err(e) => warn!(error = %e, "result reported for unknown entry"),
        }
    }

    fn report_progress(&self, completed: u64, total: u64) {
        self.progress.update(completed, total);
    }

    fn total_bytes(&self) -> u64 {
        self.total_bytes
    }
}
