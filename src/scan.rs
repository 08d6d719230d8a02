//! Background directory scanner.
//!
//! Walks the input set on its own thread to estimate the total work of a job:
//! every node (file or directory) counts as one file, only non-directories add
//! bytes. Counts are lower bounds until [`DirectoryScanner::is_completed`]
//! turns true, and are never retracted.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};

use tracing::{debug, trace};

use crate::control::CancelToken;
use crate::fsx::NodeRef;
use crate::progress::WorkCounters;

#[derive(Debug, Default)]
struct ScanState {
    counters: WorkCounters,
    completed: AtomicBool,
}

#[derive(Debug)]
pub struct DirectoryScanner {
    state: Arc<ScanState>,
    token: CancelToken,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl DirectoryScanner {
    /// Starts scanning `roots` on a dedicated thread. Stops early once `token` is cancelled.
    pub fn start(roots: Vec<NodeRef>, token: CancelToken) -> Self {
        let state = Arc::new(ScanState::default());
        let handle = {
            let state = state.clone();
            let token = token.clone();
            thread::Builder::new()
                .name("packjob-scan".into())
                .spawn(move || scan(roots, &state, &token))
        };
        let handle = match handle {
            Ok(handle) => Some(handle),
            Err(e) => {
                // Without a thread the estimator stays in its capped scanning phase.
                tracing::warn!(error = %e, "could not spawn scanner thread");
                None
            }
        };
        Self { state, token, handle: Mutex::new(handle) }
    }

    pub fn is_completed(&self) -> bool {
        self.state.completed.load(Ordering::Acquire)
    }

    pub fn total_files(&self) -> u64 {
        self.state.counters.files()
    }

    pub fn total_bytes(&self) -> u64 {
        self.state.counters.bytes()
    }

    /// Stops the walk as soon as possible. Shares the job's interrupt flag.
    pub fn interrupt(&self) {
        self.token.cancel();
    }

    /// Waits for the scanner thread to finish.
    pub fn join(&self) {
        let handle = self.handle.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                tracing::warn!("scanner thread panicked");
            }
        }
    }
}

fn scan(roots: Vec<NodeRef>, state: &ScanState, token: &CancelToken) {
    let mut stack: Vec<NodeRef> = roots.into_iter().rev().collect();
    while let Some(node) = stack.pop() {
        if token.is_cancelled() {
            debug!(files = state.counters.files(), "scan interrupted");
            return;
        }
        let attrs = match node.attributes() {
            Ok(attrs) => attrs,
            Err(e) => {
                trace!(path = %node.path().display(), error = %e, "scan: cannot stat");
                continue;
            }
        };
        if attrs.is_traversable_dir() {
            state.counters.record_entry(0);
            match node.children() {
                Ok(children) => stack.extend(children.into_iter().rev()),
                Err(e) => trace!(path = %node.path().display(), error = %e, "scan: cannot list"),
            }
        } else {
            state.counters.record_entry(attrs.size);
        }
    }
    state.completed.store(true, Ordering::Release);
    debug!(files = state.counters.files(), bytes = state.counters.bytes(), "scan completed");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fsx::{LocalNode, MemNode};
    use std::fs::{self, File};
    use std::io::Write;
    use tempfile::tempdir;

    #[test]
    fn counts_files_and_directories() {
        let dir = tempdir().unwrap();
        let root = dir.path().join("root");
        fs::create_dir_all(root.join("sub")).unwrap();
        File::create(root.join("a.txt")).unwrap().write_all(&[1u8; 10]).unwrap();
        File::create(root.join("sub/b.txt")).unwrap().write_all(&[2u8; 5]).unwrap();

        let scanner = DirectoryScanner::start(vec![LocalNode::shared(&root)], CancelToken::new());
        scanner.join();
        assert!(scanner.is_completed());
        assert_eq!(scanner.total_files(), 4);
        assert_eq!(scanner.total_bytes(), 15);
    }

    #[test]
    fn cancelled_scan_never_completes() {
        let dir = tempdir().unwrap();
        let token = CancelToken::new();
        token.cancel();
        let scanner = DirectoryScanner::start(vec![LocalNode::shared(dir.path())], token);
        scanner.join();
        assert!(!scanner.is_completed());
        assert_eq!(scanner.total_files(), 0);
    }

    #[test]
    fn counts_stay_lower_bounds_after_cancelling_mid_walk() {
        let token = CancelToken::new();
        let cancel = token.clone();
        let root = MemNode::dir(
            "/m/root",
            vec![
                MemNode::file("/m/root/a.txt", vec![0u8; 10]).shared(),
                MemNode::dir("/m/root/sub", vec![MemNode::file("/m/root/sub/b.txt", vec![0u8; 5]).shared()])
                    .on_list(move || cancel.cancel())
                    .shared(),
                MemNode::file("/m/root/c.txt", vec![0u8; 3]).shared(),
            ],
        )
        .shared();

        let scanner = DirectoryScanner::start(vec![root], token);
        scanner.join();

        assert!(!scanner.is_completed());
        // root, a.txt and sub were counted before the cancel was seen; the full tree has 5 nodes and 18 bytes.
        let (files, bytes) = (scanner.total_files(), scanner.total_bytes());
        assert_eq!((files, bytes), (3, 10));
        assert!(files < 5 && bytes < 18);

        scanner.join();
        assert_eq!((scanner.total_files(), scanner.total_bytes()), (files, bytes));
        assert!(!scanner.is_completed());
    }

    #[test]
    fn missing_roots_are_ignored() {
        let dir = tempdir().unwrap();
        let scanner =
            DirectoryScanner::start(vec![LocalNode::shared(dir.path().join("nope"))], CancelToken::new());
        scanner.join();
        assert!(scanner.is_completed());
        assert_eq!(scanner.total_files(), 0);
    }
}
