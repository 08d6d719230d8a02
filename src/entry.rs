//! Entry descriptors: one pending archive entry each.
//!
//! A descriptor is built once by the entry processor and never mutated afterwards,
//! apart from consuming its completion callback, which fires exactly once.

use std::fmt;
use std::io::{self, Read};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use crate::common::FileAttributes;
use crate::PackError;

/// Predicate evaluated right before content is pulled. `false` means "skip".
pub type BeforeProcessing = Arc<dyn Fn() -> bool + Send + Sync>;

/// Lazily invoked, fallible supplier of an entry's bytes.
pub type ContentSource = Box<dyn Fn() -> io::Result<Box<dyn Read + Send>> + Send + Sync>;

/// Completion callback, consumed on first use.
pub type OnCompletion = Box<dyn FnOnce(EntryOutcome) + Send>;

/// How an entry ended up.
#[derive(Debug, Clone)]
pub enum EntryOutcome {
    Success,
    /// `before_processing` declined the entry. Not a failure.
    Skipped,
    Failed(Arc<PackError>),
}

impl EntryOutcome {
    pub fn failed(err: PackError) -> Self {
        EntryOutcome::Failed(Arc::new(err))
    }

    /// Skips count as success for fan-in accounting.
    pub fn is_ok(&self) -> bool {
        !matches!(self, EntryOutcome::Failed(_))
    }
}

/// Pure metadata of an entry as the archive writer sees it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryMeta {
    pub path: String,
    pub attributes: FileAttributes,
}

impl EntryMeta {
    pub fn is_dir(&self) -> bool {
        self.attributes.is_dir
    }

    pub fn size(&self) -> u64 {
        self.attributes.size
    }
}

pub struct EntryDescriptor {
    meta: EntryMeta,
    before_processing: Option<BeforeProcessing>,
    content_source: Option<ContentSource>,
    on_completion: Mutex<Option<OnCompletion>>,
    resolved: AtomicBool,
}

impl EntryDescriptor {
    pub fn new(path: impl Into<String>, attributes: FileAttributes) -> Self {
        Self {
            meta: EntryMeta { path: path.into(), attributes },
            before_processing: None,
            content_source: None,
            on_completion: Mutex::new(None),
            resolved: AtomicBool::new(false),
        }
    }

    pub fn with_before_processing(mut self, before: BeforeProcessing) -> Self {
        self.before_processing = Some(before);
        self
    }

    pub fn with_content(mut self, source: ContentSource) -> Self {
        self.content_source = Some(source);
        self
    }

    pub fn on_completion(self, callback: impl FnOnce(EntryOutcome) + Send + 'static) -> Self {
        *self.on_completion.lock().unwrap_or_else(PoisonError::into_inner) = Some(Box::new(callback));
        self
    }

    pub fn meta(&self) -> &EntryMeta {
        &self.meta
    }

    pub fn path(&self) -> &str {
        &self.meta.path
    }

    pub fn attributes(&self) -> &FileAttributes {
        &self.meta.attributes
    }

    pub fn has_content(&self) -> bool {
        self.content_source.is_some()
    }

    /// Evaluates `before_processing`; an absent predicate always admits.
    pub fn should_process(&self) -> bool {
        self.before_processing.as_ref().map_or(true, |before| before())
    }

    /// Invokes the content source; `None` for directory entries.
    pub fn open_content(&self) -> Option<io::Result<Box<dyn Read + Send>>> {
        self.content_source.as_ref().map(|source| source())
    }

    /// Resolves the entry. Only the first call has an effect; returns whether it was the first.
    pub fn complete(&self, outcome: EntryOutcome) -> bool {
        if self.resolved.swap(true, Ordering::AcqRel) {
            return false;
        }
        let callback = self.on_completion.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(callback) = callback {
            callback(outcome);
        }
        true
    }

    pub fn is_resolved(&self) -> bool {
        self.resolved.load(Ordering::Acquire)
    }
}

impl fmt::Debug for EntryDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntryDescriptor")
            .field("meta", &self.meta)
            .field("has_content", &self.has_content())
            .field("resolved", &self.is_resolved())
            .finish()
    }
}
