//! Append-only, index-addressed collection of entry descriptors.
//!
//! The entry processor appends; the archive writer reads indices `0..N-1` in
//! increasing order. An index equals the entry's append position.

use std::sync::{Arc, PoisonError, RwLock};

use crate::entry::{EntryDescriptor, EntryOutcome};
use crate::PackError;

#[derive(Debug, Default)]
pub struct EntryRegistry {
    entries: RwLock<Vec<Arc<EntryDescriptor>>>,
}

impl EntryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `descriptor` and returns its index.
    pub fn append(&self, descriptor: EntryDescriptor) -> usize {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        entries.push(Arc::new(descriptor));
        entries.len() - 1
    }

    pub fn get(&self, index: usize) -> Result<Arc<EntryDescriptor>, PackError> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        entries
            .get(index)
            .cloned()
            .ok_or(PackError::IndexOutOfRange { index, len: entries.len() })
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Archive paths in index order.
    pub fn paths(&self) -> Vec<String> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|e| e.path().to_string())
            .collect()
    }

    /// Sum of the snapshotted sizes of the first `count` entries.
    pub fn total_size(&self, count: usize) -> u64 {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .take(count)
            .map(|e| e.attributes().size)
            .sum()
    }

    /// Resolves every entry the writer never reported on; returns how many there were.
    pub fn resolve_pending(&self, outcome: impl Fn() -> EntryOutcome) -> usize {
        // Snapshot first: completion callbacks must run without the lock held.
        let pending: Vec<_> = self
            .entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|e| !e.is_resolved())
            .cloned()
            .collect();
        pending.iter().filter(|e| e.complete(outcome())).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::FileAttributes;
    use std::thread;

    #[test]
    fn index_equals_append_position() {
        let registry = EntryRegistry::new();
        assert_eq!(registry.append(EntryDescriptor::new("a", FileAttributes::directory(0))), 0);
        assert_eq!(registry.append(EntryDescriptor::new("a/b", FileAttributes::file(5, 0))), 1);
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.get(1).unwrap().path(), "a/b");
        assert_eq!(registry.total_size(2), 5);
    }

    #[test]
    fn get_past_the_end_fails() {
        let registry = EntryRegistry::new();
        registry.append(EntryDescriptor::new("a", FileAttributes::file(1, 0)));
        match registry.get(1) {
            Err(PackError::IndexOutOfRange { index: 1, len: 1 }) => {}
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn reader_sees_entries_appended_concurrently() {
        let registry = Arc::new(EntryRegistry::new());
        let writer = {
            let registry = registry.clone();
            thread::spawn(move || {
                for i in 0..1000 {
                    registry.append(EntryDescriptor::new(format!("f{i}"), FileAttributes::file(1, 0)));
                }
            })
        };
        let mut next = 0;
        while next < 1000 {
            if let Ok(entry) = registry.get(next) {
                assert_eq!(entry.path(), format!("f{next}"));
                next += 1;
            }
        }
        writer.join().unwrap();
    }

    #[test]
    fn resolve_pending_skips_resolved_entries() {
        let registry = EntryRegistry::new();
        registry.append(EntryDescriptor::new("a", FileAttributes::file(1, 0)));
        registry.append(EntryDescriptor::new("b", FileAttributes::file(1, 0)));
        registry.get(0).unwrap().complete(EntryOutcome::Success);

        assert_eq!(registry.resolve_pending(|| EntryOutcome::failed(PackError::WriterAborted)), 1);
        assert_eq!(registry.resolve_pending(|| EntryOutcome::Success), 0);
    }
}
