//! Tracked directories and files
//!
//! `dirs` and `files` are the authoritative maps. Anything discovered while a
//! scan or a notification is being handled lands in `new_dirs` / `new_files`
//! first and is merged at the end of the next tick. Every method here is
//! synchronous; the orchestrator holds the lock around the whole call and
//! then delivers what was collected in the [`Outbox`].

use crate::activity::{Deadlines, FileStat, Transition};
use crate::error::WatchError;
use crate::resolve;
use crate::scan::DirStat;
use crate::source::{SourceEvent, SourceOp};
use crate::{EventKind, WatchEvent};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::{debug, trace, warn};

/// Output collected while the state is locked
#[derive(Debug, Default)]
pub(crate) struct Outbox {
    pub events: Vec<WatchEvent>,
    pub errors: Vec<WatchError>,

    /// Directories that started being tracked and need a source watch
    pub discovered_dirs: Vec<PathBuf>,

    /// Directories that stopped being tracked
    pub dropped_dirs: Vec<PathBuf>,
}

impl Outbox {
    fn emit(&mut self, name: PathBuf, kind: EventKind) {
        self.events.push(WatchEvent::new(name, kind));
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
            && self.errors.is_empty()
            && self.discovered_dirs.is_empty()
            && self.dropped_dirs.is_empty()
    }
}

#[derive(Debug)]
pub(crate) struct TrackedState {
    dirs: BTreeMap<PathBuf, DirStat>,
    new_dirs: BTreeMap<PathBuf, DirStat>,
    files: BTreeMap<PathBuf, FileStat>,
    new_files: BTreeMap<PathBuf, FileStat>,
    max_dir_entries: usize,
    silence_kind: EventKind,
}

impl TrackedState {
    /// `silence_kind` is the event reported when an inactive file is evicted
    pub fn new(max_dir_entries: usize, silence_kind: EventKind) -> Self {
        Self {
            dirs: BTreeMap::new(),
            new_dirs: BTreeMap::new(),
            files: BTreeMap::new(),
            new_files: BTreeMap::new(),
            max_dir_entries,
            silence_kind,
        }
    }

    pub fn max_dir_entries(&self) -> usize {
        self.max_dir_entries
    }

    /// Authoritative directories, in path order
    pub fn dir_paths(&self) -> Vec<PathBuf> {
        self.dirs.keys().cloned().collect()
    }

    pub fn dir_stat_mut(&mut self, path: &Path) -> Option<&mut DirStat> {
        match self.dirs.get_mut(path) {
            Some(stat) => Some(stat),
            None => self.new_dirs.get_mut(path),
        }
    }

    fn dir_stat(&self, path: &Path) -> Option<&DirStat> {
        self.dirs.get(path).or_else(|| self.new_dirs.get(path))
    }

    pub fn is_dir_tracked(&self, path: &Path) -> bool {
        self.dir_stat(path).is_some()
    }

    pub fn is_file_tracked(&self, path: &Path) -> bool {
        self.files.contains_key(path) || self.new_files.contains_key(path)
    }

    /// Every tracked file, staged ones included, in path order
    pub fn tracked_files(&self) -> Vec<PathBuf> {
        let mut files: Vec<PathBuf> = self.files.keys().chain(self.new_files.keys()).cloned().collect();
        files.sort();
        files
    }

    /// Every tracked directory, staged ones included, in path order
    pub fn tracked_dirs(&self) -> Vec<PathBuf> {
        let mut dirs: Vec<PathBuf> = self.dirs.keys().chain(self.new_dirs.keys()).cloned().collect();
        dirs.sort();
        dirs
    }

    /// Register a root directory and scan it
    ///
    /// Registering a tracked directory again replaces its flag and matcher
    /// and forces a fresh listing.
    pub fn track_root(&mut self, path: PathBuf, stat: DirStat, silence_deadline: SystemTime, out: &mut Outbox) {
        self.new_dirs.remove(&path);
        self.dirs.insert(path.clone(), stat);
        out.discovered_dirs.push(path.clone());
        self.scan_tree(path, silence_deadline, out);
    }

    /// Stage a discovered directory; false if it is already known
    pub fn stage_dir(&mut self, path: PathBuf, stat: DirStat) -> bool {
        if self.is_dir_tracked(&path) {
            return false;
        }
        self.new_dirs.insert(path, stat);
        true
    }

    /// Stage a discovered file and report it created
    ///
    /// Files already known, or last written before `silence_deadline`, are
    /// left alone.
    pub fn stage_file(&mut self, path: PathBuf, mod_time: SystemTime, silence_deadline: SystemTime, out: &mut Outbox) -> bool {
        if self.is_file_tracked(&path) {
            return false;
        }

        if mod_time <= silence_deadline {
            trace!("ignore stale file: {}", path.display());
            return false;
        }

        trace!("add new file: {}", path.display());
        self.new_files.insert(path.clone(), FileStat::discovered(mod_time));
        out.emit(path, EventKind::Create);
        true
    }

    /// Stop tracking a directory after a failed stat or listing
    pub fn drop_dir(&mut self, path: &Path, err: WatchError, out: &mut Outbox) {
        let tracked = self.dirs.remove(path).is_some() | self.new_dirs.remove(path).is_some();
        if !tracked {
            return;
        }

        out.dropped_dirs.push(path.to_path_buf());

        if err.is_not_found() {
            debug!("dir disappeared: {}", path.display());
        } else if err.is_not_a_directory() {
            debug!("dir replaced by a file: {}", path.display());
        } else {
            warn!("drop dir {}: {}", path.display(), err);
            out.errors.push(err);
        }
    }

    /// Stop tracking a removed directory and everything tracked below it
    pub fn forget_dir(&mut self, path: &Path, out: &mut Outbox) {
        for map in [&mut self.dirs, &mut self.new_dirs] {
            let gone: Vec<PathBuf> = map.keys().filter(|p| p.starts_with(path)).cloned().collect();
            for dir in gone {
                map.remove(&dir);
                debug!("forget dir: {}", dir.display());
                out.dropped_dirs.push(dir);
            }
        }
    }

    /// Move staged discoveries into the authoritative maps
    pub fn merge_staged(&mut self) {
        self.dirs.append(&mut self.new_dirs);
        self.files.append(&mut self.new_files);
    }

    /// Reclassify every authoritative file
    pub fn check_files(&mut self, deadlines: &Deadlines, out: &mut Outbox) {
        let paths: Vec<PathBuf> = self.files.keys().cloned().collect();

        for path in paths {
            match resolve::mod_time(&path) {
                Ok(mod_time) => self.classify_file(&path, mod_time, deadlines, out),
                Err(e) if e.is_not_found() => {
                    self.files.remove(&path);
                    out.emit(path, EventKind::Remove);
                }
                // Kept as is, retried next tick
                Err(e) => out.errors.push(e),
            }
        }
    }

    fn classify_file(&mut self, path: &Path, mod_time: SystemTime, deadlines: &Deadlines, out: &mut Outbox) {
        let stat = match self.files.get_mut(path) {
            Some(stat) => stat,
            None => match self.new_files.get_mut(path) {
                Some(stat) => stat,
                None => return,
            },
        };

        match stat.observe(mod_time, deadlines) {
            Transition::Unchanged => {}
            Transition::BecameInactive => out.emit(path.to_path_buf(), EventKind::Inactive),
            Transition::Rewritten => out.emit(path.to_path_buf(), EventKind::Write),
            Transition::Silenced => {
                self.files.remove(path);
                self.new_files.remove(path);
                debug!("evict silent file: {}", path.display());
                out.emit(path.to_path_buf(), self.silence_kind);
            }
        }
    }

    fn remove_file(&mut self, path: &Path, out: &mut Outbox) {
        let tracked = self.files.remove(path).is_some() | self.new_files.remove(path).is_some();
        if tracked {
            out.emit(path.to_path_buf(), EventKind::Remove);
        }
    }

    /// Apply one raw source notification
    pub fn apply_notification(&mut self, event: &SourceEvent, deadlines: &Deadlines, out: &mut Outbox) {
        let path = event.path.as_path();
        let removed = matches!(event.op, SourceOp::Remove | SourceOp::Rename);

        let parent = match path.parent().and_then(|p| self.dir_stat(p)) {
            Some(stat) => stat.clone(),
            None => {
                if removed && self.is_dir_tracked(path) {
                    self.forget_dir(path, out);
                } else {
                    debug!("unexpected event: {:?}", event);
                }
                return;
            }
        };

        if removed {
            if self.is_dir_tracked(path) {
                self.forget_dir(path, out);
            } else {
                self.remove_file(path, out);
            }
            return;
        }

        if event.op == SourceOp::Chmod {
            return;
        }

        let resolved = match resolve::resolve(path) {
            Ok(resolved) => resolved,
            Err(e) if e.is_not_found() => {
                trace!("vanished before stat: {}", path.display());
                return;
            }
            Err(e) => {
                warn!("stat error: {}", e);
                return;
            }
        };

        if resolved.is_dir {
            if event.op == SourceOp::Create
                && parent.include_subdirectories()
                && self.stage_dir(resolved.path.clone(), parent.inherit())
            {
                debug!("add new dir: {}", resolved.path.display());
                out.discovered_dirs.push(resolved.path.clone());
                self.scan_tree(resolved.path, deadlines.silence, out);
            }
            return;
        }

        if !parent.matcher().matches(&resolved.file_name()) {
            return;
        }

        if self.is_file_tracked(&resolved.path) {
            self.classify_file(&resolved.path, resolved.mod_time, deadlines, out);
        } else {
            self.stage_file(resolved.path, resolved.mod_time, deadlines.silence, out);
        }
    }
}
