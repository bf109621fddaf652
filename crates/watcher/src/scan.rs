//! Directory scanning
//!
//! A tracked directory is only listed when its own modification time has
//! advanced. Directory mtime moves on child create/remove/rename, not on
//! writes to children, so a dormant directory costs one stat per tick.
//!
//! Newly found subdirectories are staged and traversed depth-first in the
//! same pass, using an explicit stack, so a freshly created tree is fully
//! registered by the first scan that sees its root.

use crate::error::{Result, WatchError};
use crate::matcher::FileMatcher;
use crate::resolve;
use crate::state::{Outbox, TrackedState};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::{debug, info, trace};

/// Tracking state of one directory
#[derive(Debug, Clone)]
pub struct DirStat {
    last_mod_time: Option<SystemTime>,
    include_subdirectories: bool,
    matcher: FileMatcher,
}

impl DirStat {
    /// State of a directory that has never been listed
    pub fn new(include_subdirectories: bool, matcher: FileMatcher) -> Self {
        Self {
            last_mod_time: None,
            include_subdirectories,
            matcher,
        }
    }

    /// State for a discovered subdirectory, inheriting flag and matcher
    pub fn inherit(&self) -> Self {
        Self::new(self.include_subdirectories, self.matcher.clone())
    }

    /// Directory mtime at the last listing
    pub fn last_mod_time(&self) -> Option<SystemTime> {
        self.last_mod_time
    }

    /// Whether subdirectories are tracked too
    pub fn include_subdirectories(&self) -> bool {
        self.include_subdirectories
    }

    /// Matcher applied to files in this directory
    pub fn matcher(&self) -> &FileMatcher {
        &self.matcher
    }

    /// Whether a directory with modification time `mod_time` needs listing
    pub fn needs_listing(&self, mod_time: SystemTime) -> bool {
        match self.last_mod_time {
            Some(last) => mod_time > last,
            None => true,
        }
    }
}

/// List the entries of `dir`, sorted by path
///
/// Fails with [`WatchError::TooManyFiles`] once more than `limit` entries are seen.
pub fn list_dir(dir: &Path, limit: usize) -> Result<Vec<PathBuf>> {
    let mut entries = Vec::new();

    for entry in fs::read_dir(dir).map_err(|e| WatchError::io(dir, e))? {
        let entry = entry.map_err(|e| WatchError::io(dir, e))?;
        entries.push(entry.path());

        if entries.len() > limit {
            return Err(WatchError::TooManyFiles {
                path: dir.to_path_buf(),
                limit,
            });
        }
    }

    entries.sort();
    Ok(entries)
}

impl TrackedState {
    /// Rescan every tracked directory
    pub(crate) fn check_dirs(&mut self, silence_deadline: SystemTime, out: &mut Outbox) {
        for dir in self.dir_paths() {
            self.scan_tree(dir, silence_deadline, out);
        }
    }

    /// Scan `root` and every subdirectory discovered below it, depth-first
    pub(crate) fn scan_tree(&mut self, root: PathBuf, silence_deadline: SystemTime, out: &mut Outbox) {
        let mut stack = vec![root];

        while let Some(dir) = stack.pop() {
            let discovered = self.scan_dir(&dir, silence_deadline, out);
            // Reverse so the first subdirectory in name order is scanned next
            stack.extend(discovered.into_iter().rev());
        }
    }

    /// Scan one directory; returns the subdirectories it staged
    fn scan_dir(&mut self, dir: &Path, silence_deadline: SystemTime, out: &mut Outbox) -> Vec<PathBuf> {
        // Dropped earlier in this pass
        if self.dir_stat_mut(dir).is_none() {
            return Vec::new();
        }

        let mod_time = match resolve::mod_time(dir) {
            Ok(mod_time) => mod_time,
            Err(e) => {
                self.drop_dir(dir, e, out);
                return Vec::new();
            }
        };

        let parent = match self.dir_stat_mut(dir) {
            Some(stat) => {
                if !stat.needs_listing(mod_time) {
                    trace!("ignore not updated dir: {}", dir.display());
                    return Vec::new();
                }
                stat.last_mod_time = Some(mod_time);
                stat.clone()
            }
            None => return Vec::new(),
        };

        debug!("start check dir: {}", dir.display());

        let entries = match list_dir(dir, self.max_dir_entries()) {
            Ok(entries) => entries,
            Err(e) => {
                self.drop_dir(dir, e, out);
                return Vec::new();
            }
        };

        let mut discovered = Vec::new();

        for entry in entries {
            let resolved = match resolve::resolve(&entry) {
                Ok(resolved) => resolved,
                Err(e) => {
                    debug!("skip unresolvable entry: {}", e);
                    continue;
                }
            };

            if resolved.is_dir {
                if parent.include_subdirectories
                    && self.stage_dir(resolved.path.clone(), parent.inherit())
                {
                    info!("add new dir: {}", resolved.path.display());
                    out.discovered_dirs.push(resolved.path.clone());
                    discovered.push(resolved.path);
                }
                continue;
            }

            if !parent.matcher.matches(&resolved.file_name()) {
                trace!("ignore file for not match: {}", resolved.path.display());
                continue;
            }

            self.stage_file(resolved.path, resolved.mod_time, silence_deadline, out);
        }

        discovered
    }
}
