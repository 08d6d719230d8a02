//! Common utilities and types module.
// Shared structs, path helpers.

use std::fs;
#[cfg(unix)]
use std::os::unix::fs::PermissionsExt; // mode()
use std::path::{Component, Path, PathBuf};
use std::time::UNIX_EPOCH;

use serde::{Deserialize, Serialize};

use crate::PackError;

/// Snapshot of a file-system node's attributes, taken once when the node is registered.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FileAttributes {
    pub size: u64,
    pub modified_time: u64, // Unix timestamp
    pub is_dir: bool,
    pub is_symlink: bool,
    pub permissions: Option<u32>,
}

impl FileAttributes {
    pub fn file(size: u64, modified_time: u64) -> Self {
        Self { size, modified_time, ..Self::default() }
    }

    pub fn directory(modified_time: u64) -> Self {
        Self { modified_time, is_dir: true, ..Self::default() }
    }

    /// Builds a snapshot from `metadata`. `is_symlink` comes from the caller because
    /// the metadata passed in is usually the link target's.
    pub fn from_metadata(meta: &fs::Metadata, is_symlink: bool) -> Self {
        let modified_time = meta
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_secs())
            .unwrap_or(0);
        #[cfg(unix)]
        let permissions = Some(meta.permissions().mode());
        #[cfg(not(unix))]
        let permissions = None;

        Self {
            size: if meta.is_dir() { 0 } else { meta.len() },
            modified_time,
            is_dir: meta.is_dir(),
            is_symlink,
            permissions,
        }
    }

    /// Directories are descended into; symlinked directories are not.
    pub fn is_traversable_dir(&self) -> bool {
        self.is_dir && !self.is_symlink
    }
}

/// Normalize path by replacing backslashes with forward slashes.
/// Example: "./dir1\\dir2//file.txt" becomes "dir1/dir2/file.txt"
pub fn normalize_path(path: &str) -> String {
    let s = path.replace('\\', "/");
    let trimmed = s.strip_prefix("./").unwrap_or(&s);
    let mut res = trimmed.to_string();
    while res.contains("//") {
        res = res.replace("//", "/");
    }
    res.trim_end_matches('/').to_string()
}

/// Returns the longest common ancestor directory shared by all provided paths.
/// If the slice is empty, an empty `PathBuf` is returned.
pub fn common_parent(paths: &[PathBuf]) -> PathBuf {
    if paths.is_empty() {
        return PathBuf::new();
    }

    let mut prefix: Vec<Component> = paths[0].components().collect();
    for p in &paths[1..] {
        let comps: Vec<Component> = p.components().collect();
        let mut idx = 0usize;
        while idx < prefix.len() && idx < comps.len() && prefix[idx] == comps[idx] {
            idx += 1;
        }
        prefix.truncate(idx);
        if prefix.is_empty() {
            break;
        }
    }

    let mut out = PathBuf::new();
    for c in prefix {
        out.push(c.as_os_str());
    }
    out
}

/// The folder entry paths are made relative to: the common ancestor of the
/// inputs' parent directories, so every input keeps its own name in the archive.
pub fn base_folder(inputs: &[PathBuf]) -> PathBuf {
    let parents: Vec<PathBuf> = inputs
        .iter()
        .map(|p| p.parent().map(Path::to_path_buf).unwrap_or_default())
        .collect();
    common_parent(&parents)
}

/// Archive-relative entry path of `path` below `base`, with forward slashes.
pub fn relative_entry_path(base: &Path, path: &Path) -> Result<String, PackError> {
    let rel = path.strip_prefix(base).map_err(|_| PackError::StripPrefix {
        prefix: base.to_path_buf(),
        path: path.to_path_buf(),
    })?;
    let rel = normalize_path(&rel.to_string_lossy());
    if rel.is_empty() {
        // `path` is the base itself: fall back to its own name.
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| PackError::StripPrefix {
                prefix: base.to_path_buf(),
                path: path.to_path_buf(),
            })?;
        return Ok(name);
    }
    Ok(rel)
}
