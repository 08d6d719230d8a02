#![allow(dead_code)]

use packjob::control::{Failure, JobHooks, Resolution};
use packjob::fsx::{MemNode, NodeRef};
use packjob::PackError;
use rand::Rng;
use std::collections::VecDeque;
use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// In-memory sink standing in for stdout. Counts the writes it receives.
#[derive(Clone, Default)]
pub struct Capture {
    bytes: Arc<Mutex<Vec<u8>>>,
    writes: Arc<AtomicUsize>,
}

impl Capture {
    pub fn bytes(&self) -> Vec<u8> {
        self.bytes.lock().unwrap().clone()
    }

    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }
}

impl Write for Capture {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.bytes.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Dialog answers played back in order; `Skip` once the script runs out.
#[derive(Default)]
pub struct Scripted {
    answers: Mutex<VecDeque<Resolution>>,
    asked: Mutex<Vec<PathBuf>>,
    errors: AtomicUsize,
    declined: Vec<String>,
}

impl Scripted {
    pub fn new(answers: impl IntoIterator<Item = Resolution>) -> Self {
        Self { answers: Mutex::new(answers.into_iter().collect()), ..Self::default() }
    }

    /// Declines entries whose path ends with `name`.
    pub fn declining(mut self, name: &str) -> Self {
        self.declined.push(name.to_string());
        self
    }

    pub fn asked(&self) -> Vec<PathBuf> {
        self.asked.lock().unwrap().clone()
    }

    pub fn errors(&self) -> usize {
        self.errors.load(Ordering::SeqCst)
    }
}

impl JobHooks for Scripted {
    fn accept_entry(&self, path: &Path) -> bool {
        !self.declined.iter().any(|name| path.ends_with(name))
    }

    fn resolve_collision(&self, _destination: &Path) -> Resolution {
        Resolution::Overwrite
    }

    fn resolve_failure(&self, failure: &Failure<'_>) -> Resolution {
        self.asked.lock().unwrap().push(failure.path.to_path_buf());
        self.answers.lock().unwrap().pop_front().unwrap_or(Resolution::Skip)
    }

    fn report_error(&self, _error: &PackError) {
        self.errors.fetch_add(1, Ordering::SeqCst);
    }
}

/// `root/` with `a.txt` (10 bytes) and `sub/b.txt` (5 bytes), below `/in`.
pub fn mem_tree(a: MemNode) -> NodeRef {
    MemNode::dir(
        "/in/root",
        vec![
            a.shared(),
            MemNode::dir("/in/root/sub", vec![MemNode::file("/in/root/sub/b.txt", vec![b'b'; 5]).shared()])
                .shared(),
        ],
    )
    .shared()
}

pub fn mem_a() -> MemNode {
    MemNode::file("/in/root/a.txt", vec![b'a'; 10])
}

/// Same layout as [`mem_tree`], on disk below `dir`.
pub fn disk_tree(dir: &Path) -> PathBuf {
    let root = dir.join("root");
    fs::create_dir_all(root.join("sub")).unwrap();
    File::create(root.join("a.txt")).unwrap().write_all(&[b'a'; 10]).unwrap();
    File::create(root.join("sub/b.txt")).unwrap().write_all(&[b'b'; 5]).unwrap();
    root
}

/// A random tree of directories and files of random content below `root`.
pub fn random_tree(root: &Path, nodes: usize) {
    let mut rng = rand::thread_rng();
    fs::create_dir_all(root).unwrap();
    let mut dirs = vec![root.to_path_buf()];
    for i in 0..nodes {
        let parent = dirs[rng.gen_range(0..dirs.len())].clone();
        if rng.gen_bool(0.25) {
            let dir = parent.join(format!("d{i}"));
            fs::create_dir(&dir).unwrap();
            dirs.push(dir);
        } else {
            let mut buf = vec![0u8; rng.gen_range(0..8192)];
            rng.fill(&mut buf[..]);
            File::create(parent.join(format!("f{i}.bin"))).unwrap().write_all(&buf).unwrap();
        }
    }
}

/// `(path, content)` of every member of a plain tar stream.
pub fn tar_entries(bytes: impl Read) -> Vec<(String, Vec<u8>)> {
    let mut archive = tar::Archive::new(bytes);
    archive
        .entries()
        .unwrap()
        .map(|entry| {
            let mut entry = entry.unwrap();
            let path = entry.path().unwrap().to_string_lossy().into_owned();
            let mut data = Vec::new();
            entry.read_to_end(&mut data).unwrap();
            (path, data)
        })
        .collect()
}

pub fn tar_paths(bytes: impl Read) -> Vec<String> {
    tar_entries(bytes).into_iter().map(|(path, _)| path).collect()
}
