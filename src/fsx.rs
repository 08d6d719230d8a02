//! File-set abstraction.
//!
//! The pipeline never touches `std::fs` directly: it walks [`SourceNode`]s, which
//! answer the three questions it needs (attributes, children, content). The
//! local-disk implementation is [`LocalNode`]; tests plug in in-memory trees to
//! inject failures.

use std::fmt;
use std::fs::{self, File};
use std::io::{self, BufReader, Read};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::common::FileAttributes;

/// Shared handle to a node of the input set.
pub type NodeRef = Arc<dyn SourceNode>;

/// One file-system node (file, directory or symlink) of the input set.
pub trait SourceNode: Send + Sync + fmt::Debug {
    /// Absolute (or base-relative) path used to compute the archive entry path.
    fn path(&self) -> &Path;

    /// Reads the node's attributes. Called once per visit; the result is a snapshot.
    fn attributes(&self) -> io::Result<FileAttributes>;

    /// Lists the children of a directory, in the order they should be archived.
    fn children(&self) -> io::Result<Vec<NodeRef>>;

    /// Opens the node's byte content.
    fn open(&self) -> io::Result<Box<dyn Read + Send>>;
}

/// A node backed by the local file system.
#[derive(Debug, Clone)]
pub struct LocalNode {
    path: PathBuf,
}

impl LocalNode {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn shared(path: impl Into<PathBuf>) -> NodeRef {
        Arc::new(Self::new(path))
    }
}

impl SourceNode for LocalNode {
    fn path(&self) -> &Path {
        &self.path
    }

    fn attributes(&self) -> io::Result<FileAttributes> {
        let link_meta = fs::symlink_metadata(&self.path)?;
        if !link_meta.file_type().is_symlink() {
            return Ok(FileAttributes::from_metadata(&link_meta, false));
        }
        // Follow the link for size and kind; a dangling link is archived as itself.
        match fs::metadata(&self.path) {
            Ok(target) => Ok(FileAttributes::from_metadata(&target, true)),
            Err(_) => Ok(FileAttributes::from_metadata(&link_meta, true)),
        }
    }

    fn children(&self) -> io::Result<Vec<NodeRef>> {
        let mut paths = fs::read_dir(&self.path)?
            .map(|e| e.map(|e| e.path()))
            .collect::<io::Result<Vec<_>>>()?;
        paths.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
        Ok(paths.into_iter().map(LocalNode::shared).collect())
    }

    fn open(&self) -> io::Result<Box<dyn Read + Send>> {
        let file = File::open(&self.path)?;
        Ok(Box::new(BufReader::with_capacity(256 * 1024, file)))
    }
}

/// An in-memory node, for building input sets without touching the disk.
///
/// Opening can be made to fail a number of times, and listing a directory can
/// run a callback first, which is how tests inject faults at precise points.
pub struct MemNode {
    path: PathBuf,
    attributes: FileAttributes,
    content: Vec<u8>,
    children: Vec<NodeRef>,
    open_failures: AtomicUsize,
    read_failure: Option<(u64, usize)>,
    on_list: Option<Box<dyn Fn() + Send + Sync>>,
}

impl MemNode {
    pub fn file(path: impl Into<PathBuf>, content: impl Into<Vec<u8>>) -> Self {
        let content = content.into();
        Self {
            path: path.into(),
            attributes: FileAttributes::file(content.len() as u64, 0),
            content,
            children: Vec::new(),
            open_failures: AtomicUsize::new(0),
            read_failure: None,
            on_list: None,
        }
    }

    pub fn dir(path: impl Into<PathBuf>, children: Vec<NodeRef>) -> Self {
        Self {
            path: path.into(),
            attributes: FileAttributes::directory(0),
            content: Vec::new(),
            children,
            open_failures: AtomicUsize::new(0),
            read_failure: None,
            on_list: None,
        }
    }

    /// The next `times` opens fail; `usize::MAX` fails forever.
    pub fn failing_open(self, times: usize) -> Self {
        self.open_failures.store(times, Ordering::Relaxed);
        self
    }

    /// Readers fail `times` reads once `offset` bytes are delivered, then carry
    /// on; `usize::MAX` fails forever.
    pub fn failing_read_after(mut self, offset: u64, times: usize) -> Self {
        self.read_failure = Some((offset, times));
        self
    }

    /// Runs `callback` every time the children are listed.
    pub fn on_list(mut self, callback: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_list = Some(Box::new(callback));
        self
    }

    pub fn shared(self) -> NodeRef {
        Arc::new(self)
    }
}

impl fmt::Debug for MemNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemNode")
            .field("path", &self.path)
            .field("attributes", &self.attributes)
            .field("children", &self.children.len())
            .finish()
    }
}

impl SourceNode for MemNode {
    fn path(&self) -> &Path {
        &self.path
    }

    fn attributes(&self) -> io::Result<FileAttributes> {
        Ok(self.attributes)
    }

    fn children(&self) -> io::Result<Vec<NodeRef>> {
        if let Some(callback) = &self.on_list {
            callback();
        }
        if !self.attributes.is_dir {
            return Err(io::Error::new(io::ErrorKind::Other, "not a directory"));
        }
        Ok(self.children.clone())
    }

    fn open(&self) -> io::Result<Box<dyn Read + Send>> {
        let failing = self
            .open_failures
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| match n {
                0 => None,
                usize::MAX => Some(usize::MAX),
                n => Some(n - 1),
            })
            .is_ok();
        if failing {
            return Err(io::Error::new(io::ErrorKind::PermissionDenied, "injected open failure"));
        }
        let data = io::Cursor::new(self.content.clone());
        Ok(match self.read_failure {
            Some((fail_at, failures)) => Box::new(FlakyRead { data, fail_at, failures }),
            None => Box::new(data),
        })
    }
}

struct FlakyRead {
    data: io::Cursor<Vec<u8>>,
    fail_at: u64,
    failures: usize,
}

impl Read for FlakyRead {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let position = self.data.position();
        if self.failures == 0 {
            return self.data.read(buf);
        }
        if position >= self.fail_at {
            if self.failures != usize::MAX {
                self.failures -= 1;
            }
            return Err(io::Error::new(io::ErrorKind::Other, "injected read failure"));
        }
        let limit = buf.len().min(usize::try_from(self.fail_at - position).unwrap_or(usize::MAX));
        self.data.read(&mut buf[..limit])
    }
}
