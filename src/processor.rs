//! Entry processor: turns the input set into registered entry descriptors.
//!
//! The walk is depth-first, directory entry before its children, children in
//! listing order, so registry indices follow a predictable archive layout. It
//! runs on an explicit work stack and returns once every entry is dispatched;
//! completions arrive later from the archive writer's thread.
//!
//! Completion is tracked per directory by a [`FanIn`] group: one slot for the
//! directory's own entry, one per child, plus a guard slot held while children
//! are being counted. When the last slot resolves the group reports the AND of
//! all results to its parent group. Resolution walks up iteratively, so deep
//! trees do not grow the call stack.

use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tracing::{debug, warn};

use crate::common::relative_entry_path;
use crate::control::{FailureKind, JobControl};
use crate::entry::{BeforeProcessing, ContentSource, EntryDescriptor, EntryOutcome};
use crate::fsx::NodeRef;
use crate::progress::WorkCounters;
use crate::registry::EntryRegistry;

/// Called once with the AND of every result below it.
pub type Continuation = Box<dyn FnOnce(bool) + Send>;

enum Parent {
    Group(Arc<FanIn>),
    Callback(Continuation),
}

/// Outstanding-results counter of one directory (or of the top-level set).
pub struct FanIn {
    outstanding: AtomicUsize,
    all_ok: AtomicBool,
    parent: Mutex<Option<Parent>>,
}

impl FanIn {
    fn new(expected: usize, parent: Parent) -> Arc<Self> {
        Arc::new(Self {
            outstanding: AtomicUsize::new(expected),
            all_ok: AtomicBool::new(true),
            parent: Mutex::new(Some(parent)),
        })
    }

    /// A group whose final result goes to `continuation`, holding one guard slot.
    pub fn root(continuation: Continuation) -> Arc<Self> {
        Self::new(1, Parent::Callback(continuation))
    }

    /// A group reporting into `parent`, holding one guard slot.
    pub fn child_of(parent: &Arc<FanIn>) -> Arc<Self> {
        Self::new(1, Parent::Group(parent.clone()))
    }

    /// Reserve `more` result slots. Only valid while a slot is still held.
    pub fn expect(&self, more: usize) {
        self.outstanding.fetch_add(more, Ordering::AcqRel);
    }

    /// Resolve one slot.
    pub fn done(self: &Arc<Self>, ok: bool) {
        let mut group = Arc::clone(self);
        let mut ok = ok;
        loop {
            if !ok {
                group.all_ok.store(false, Ordering::Release);
            }
            if group.outstanding.fetch_sub(1, Ordering::AcqRel) != 1 {
                return;
            }
            let result = group.all_ok.load(Ordering::Acquire);
            let parent = group.parent.lock().unwrap_or_else(PoisonError::into_inner).take();
            match parent {
                Some(Parent::Group(next)) => {
                    group = next;
                    ok = result;
                }
                Some(Parent::Callback(continuation)) => {
                    continuation(result);
                    return;
                }
                None => return,
            }
        }
    }
}

struct Task {
    node: NodeRef,
    parent: Arc<FanIn>,
}

pub struct EntryProcessor {
    registry: Arc<EntryRegistry>,
    control: Arc<JobControl>,
    processed: Arc<WorkCounters>,
    base: PathBuf,
}

impl EntryProcessor {
    pub fn new(
        registry: Arc<EntryRegistry>,
        control: Arc<JobControl>,
        processed: Arc<WorkCounters>,
        base: impl Into<PathBuf>,
    ) -> Self {
        Self { registry, control, processed, base: base.into() }
    }

    /// Registers `roots` and everything below them.
    ///
    /// Returns once all entries are dispatched. `on_done` fires exactly once, after
    /// every registered entry has resolved, with `true` iff none of them failed.
    pub fn process(&self, roots: &[NodeRef], on_done: impl FnOnce(bool) + Send + 'static) {
        let top = FanIn::root(Box::new(on_done));
        top.expect(roots.len());
        let mut stack: Vec<Task> =
            roots.iter().rev().map(|node| Task { node: node.clone(), parent: top.clone() }).collect();
        top.done(true);

        while let Some(task) = stack.pop() {
            self.visit(task, &mut stack);
        }
    }

    fn visit(&self, task: Task, stack: &mut Vec<Task>) {
        let Task { node, parent } = task;
        if self.control.is_interrupted() {
            parent.done(false);
            return;
        }

        let path = node.path().to_path_buf();
        let attrs = match self.control.retry_io(FailureKind::Stat, &path, || node.attributes()) {
            Ok(attrs) => attrs,
            Err(e) => {
                self.log_failure(&path, &e);
                parent.done(false);
                return;
            }
        };
        let entry_path = match relative_entry_path(&self.base, &path) {
            Ok(p) => p,
            Err(e) => {
                warn!(error = %e, "cannot compute entry path");
                parent.done(false);
                return;
            }
        };
        let descriptor =
            EntryDescriptor::new(entry_path, attrs).with_before_processing(self.before_processing(&path));

        if !attrs.is_traversable_dir() {
            let descriptor = if attrs.is_dir {
                descriptor
            } else {
                descriptor.with_content(self.content_source(node))
            };
            self.register(descriptor, parent);
            return;
        }

        let group = FanIn::child_of(&parent);
        group.expect(1);
        self.register(descriptor, group.clone());

        if self.control.is_interrupted() {
            group.done(false);
            return;
        }
        match self.control.retry_io(FailureKind::List, &path, || node.children()) {
            Ok(children) => {
                group.expect(children.len());
                stack.extend(
                    children.into_iter().rev().map(|child| Task { node: child, parent: group.clone() }),
                );
                group.done(true);
            }
            Err(e) => {
                self.log_failure(&path, &e);
                group.done(false);
            }
        }
    }

    fn register(&self, descriptor: EntryDescriptor, parent: Arc<FanIn>) -> usize {
        let size = descriptor.attributes().size;
        let entry_path = descriptor.path().to_string();
        let control = self.control.clone();
        let processed = self.processed.clone();

        let descriptor = descriptor.on_completion(move |outcome| {
            processed.record_entry(size);
            let ok = match &outcome {
                EntryOutcome::Success => true,
                // Declined because of an interrupt: not a success.
                EntryOutcome::Skipped => !control.is_interrupted(),
                EntryOutcome::Failed(err) => {
                    if control.is_interrupted() || err.is_expected() {
                        debug!(entry = %entry_path, error = %err, "entry dropped");
                    } else {
                        warn!(entry = %entry_path, error = %err, "entry failed");
                    }
                    false
                }
            };
            parent.done(ok);
        });

        let index = self.registry.append(descriptor);
        debug!(index, "entry registered");
        index
    }

    fn before_processing(&self, path: &Path) -> BeforeProcessing {
        let control = self.control.clone();
        let path = path.to_path_buf();
        Arc::new(move || {
            if control.is_interrupted() {
                return false;
            }
            let hooks = control.hooks();
            hooks.next_file(&path);
            hooks.accept_entry(&path) && !control.is_interrupted()
        })
    }

    fn content_source(&self, node: NodeRef) -> ContentSource {
        let control = self.control.clone();
        Box::new(move || {
            let inner = control.retry_io(FailureKind::Read, node.path(), || node.open())?;
            let reader = CheckedRead { inner, control: control.clone(), path: node.path().to_path_buf() };
            Ok(Box::new(reader) as Box<dyn Read + Send>)
        })
    }

    fn log_failure(&self, path: &Path, err: &io::Error) {
        if err.kind() == io::ErrorKind::Interrupted {
            debug!(path = %path.display(), "skipped after interrupt");
        } else {
            warn!(path = %path.display(), error = %err, "cannot process");
        }
    }
}

/// Content reader that asks the hooks about read errors, like the open before it.
///
/// `Retry` repeats the failed read on the same handle. A give-up after the job
/// was interrupted is not reported as `ErrorKind::Interrupted`, which readers
/// treat as "try again".
struct CheckedRead {
    inner: Box<dyn Read + Send>,
    control: Arc<JobControl>,
    path: PathBuf,
}

impl Read for CheckedRead {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let Self { inner, control, path } = self;
        control
            .retry_io(FailureKind::Read, path, || loop {
                match inner.read(&mut *buf) {
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                    result => break result,
                }
            })
            .map_err(|e| match e.kind() {
                io::ErrorKind::Interrupted => io::Error::new(io::ErrorKind::Other, e),
                _ => e,
            })
    }
}
