//! Symlink resolution for directory entries
//!
//! Every entry seen during a scan is reduced to its real, non-symlink target
//! before the watcher decides whether it is a file or a directory. Broken
//! links and link loops come back as per-entry errors; callers skip the entry.

use crate::error::{Result, WatchError};
use std::fs::{self, Metadata};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

/// A directory entry reduced to its real target
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolved {
    /// Target path; differs from the entry path only for symlinks
    pub path: PathBuf,

    /// Whether the target is a directory
    pub is_dir: bool,

    /// Modification time of the target
    pub mod_time: SystemTime,
}

impl Resolved {
    fn from_metadata(path: PathBuf, metadata: &Metadata) -> Result<Self> {
        let mod_time = metadata.modified().map_err(|e| WatchError::io(&path, e))?;
        Ok(Self {
            path,
            is_dir: metadata.is_dir(),
            mod_time,
        })
    }

    /// Final path component, used for matching
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

/// Resolve `path` to its real target
///
/// Plain files and directories resolve to themselves. Symlink chains are
/// followed to the end; the returned path is the canonical target.
pub fn resolve(path: &Path) -> Result<Resolved> {
    let metadata = fs::symlink_metadata(path).map_err(|e| WatchError::io(path, e))?;

    if !metadata.file_type().is_symlink() {
        return Resolved::from_metadata(path.to_path_buf(), &metadata);
    }

    let target = fs::canonicalize(path).map_err(|e| WatchError::io(path, e))?;
    let metadata = fs::metadata(&target).map_err(|e| WatchError::io(&target, e))?;
    Resolved::from_metadata(target, &metadata)
}

/// Stat `path`, following symlinks, and return its modification time
pub fn mod_time(path: &Path) -> Result<SystemTime> {
    fs::metadata(path)
        .and_then(|m| m.modified())
        .map_err(|e| WatchError::io(path, e))
}
