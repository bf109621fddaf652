//! Native OS notifications via `notify`
//!
//! Thin pass-through over `notify::RecommendedWatcher` (inotify on Linux,
//! FSEvents on macOS). Each registration is non-recursive; events are
//! filtered against the mask of the path itself or of its parent directory.

use super::{source_channels, EventMask, SourceEvent, SourceOp, SourceSinks, SourceStreams, WatchSource};
use crate::config::WatchMethod;
use crate::error::{Result, WatchError};
use async_trait::async_trait;
use notify::event::{EventKind, ModifyKind, RenameMode};
use notify::{Config as NotifyConfig, Event, RecommendedWatcher, RecursiveMode, Watcher};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

type Registrations = Arc<Mutex<HashMap<PathBuf, EventMask>>>;

/// Native notification source
pub struct NativeSource {
    watcher: Mutex<Option<RecommendedWatcher>>,
    registrations: Registrations,
}

impl NativeSource {
    /// Create the OS watcher and its event streams
    pub fn new() -> Result<(Self, SourceStreams)> {
        let (sinks, streams) = source_channels();
        let registrations: Registrations = Arc::new(Mutex::new(HashMap::new()));

        let filter = Arc::clone(&registrations);
        let watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| deliver(res, &filter, &sinks),
            NotifyConfig::default(),
        )?;

        Ok((
            Self {
                watcher: Mutex::new(Some(watcher)),
                registrations,
            },
            streams,
        ))
    }
}

#[async_trait]
impl WatchSource for NativeSource {
    fn method(&self) -> WatchMethod {
        WatchMethod::Native
    }

    fn add_watch(&self, path: &Path, mask: EventMask) -> Result<()> {
        if let Some(existing) = self.registrations.lock().get_mut(path) {
            *existing = mask;
            return Ok(());
        }

        // The registration lock must not be held here: notify's event thread
        // takes it inside the callback while `watch` waits on that thread.
        {
            let mut guard = self.watcher.lock();
            let watcher = guard.as_mut().ok_or(WatchError::Stopped)?;
            watcher
                .watch(path, RecursiveMode::NonRecursive)
                .map_err(|e| map_notify_error(e, path))?;
        }

        self.registrations.lock().insert(path.to_path_buf(), mask);
        debug!("native watch added: {} {:?}", path.display(), mask);
        Ok(())
    }

    fn remove(&self, path: &Path) -> Result<()> {
        if self.registrations.lock().remove(path).is_none() {
            return Ok(());
        }

        let mut guard = self.watcher.lock();
        let Some(watcher) = guard.as_mut() else {
            return Ok(());
        };

        match watcher.unwatch(path) {
            Ok(()) => Ok(()),
            // The OS drops watches on deleted paths by itself
            Err(e) if matches!(e.kind, notify::ErrorKind::WatchNotFound) => Ok(()),
            Err(e) => match map_notify_error(e, path) {
                err if err.is_not_found() => Ok(()),
                err => Err(err),
            },
        }
    }

    fn is_watched(&self, path: &Path) -> bool {
        self.registrations.lock().contains_key(path)
    }

    async fn close(&self) -> Result<()> {
        // Dropping the watcher stops notify's event thread
        if self.watcher.lock().take().is_some() {
            debug!("native source closed");
        }
        self.registrations.lock().clear();
        Ok(())
    }
}

fn deliver(res: notify::Result<Event>, registrations: &Registrations, sinks: &SourceSinks) {
    match res {
        Ok(event) => {
            for source_event in translate(event) {
                if !is_wanted(registrations, &source_event) {
                    continue;
                }
                if sinks.events.send(source_event).is_err() {
                    return;
                }
            }
        }
        Err(err) => {
            let path = err.paths.first().cloned().unwrap_or_default();
            warn!("native watch error: {}", err);
            let _ = sinks.errors.send(map_notify_error(err, &path));
        }
    }
}

fn is_wanted(registrations: &Registrations, event: &SourceEvent) -> bool {
    let registrations = registrations.lock();
    let mask = registrations
        .get(&event.path)
        .or_else(|| event.path.parent().and_then(|p| registrations.get(p)));

    match mask {
        Some(mask) => mask.allows(event.op),
        None => false,
    }
}

/// Map a `notify` event onto raw source events
pub(crate) fn translate(event: Event) -> Vec<SourceEvent> {
    let op = match event.kind {
        EventKind::Create(_) => SourceOp::Create,
        EventKind::Remove(_) => SourceOp::Remove,
        EventKind::Modify(ModifyKind::Name(mode)) => return translate_rename(mode, event.paths),
        EventKind::Modify(ModifyKind::Metadata(_)) => SourceOp::Chmod,
        EventKind::Modify(_) => SourceOp::Write,
        EventKind::Access(_) | EventKind::Any | EventKind::Other => return Vec::new(),
    };

    event
        .paths
        .into_iter()
        .map(|path| SourceEvent::new(path, op))
        .collect()
}

// A rename is a removal of the old name and a creation of the new one
fn translate_rename(mode: RenameMode, paths: Vec<PathBuf>) -> Vec<SourceEvent> {
    match mode {
        RenameMode::From => paths
            .into_iter()
            .map(|p| SourceEvent::new(p, SourceOp::Rename))
            .collect(),
        RenameMode::To => paths
            .into_iter()
            .map(|p| SourceEvent::new(p, SourceOp::Create))
            .collect(),
        RenameMode::Both => {
            let mut paths = paths.into_iter();
            let mut events = Vec::with_capacity(2);
            if let Some(from) = paths.next() {
                events.push(SourceEvent::new(from, SourceOp::Rename));
            }
            if let Some(to) = paths.next() {
                events.push(SourceEvent::new(to, SourceOp::Create));
            }
            events
        }
        RenameMode::Any | RenameMode::Other => paths
            .into_iter()
            .map(|p| {
                let op = if p.exists() {
                    SourceOp::Create
                } else {
                    SourceOp::Rename
                };
                SourceEvent::new(p, op)
            })
            .collect(),
    }
}

fn map_notify_error(err: notify::Error, path: &Path) -> WatchError {
    let notify::Error { kind, paths } = err;
    match kind {
        notify::ErrorKind::MaxFilesWatch => WatchError::TooManyWatches {
            path: path.to_path_buf(),
        },
        notify::ErrorKind::PathNotFound => WatchError::io(
            path,
            std::io::Error::new(std::io::ErrorKind::NotFound, "path not found"),
        ),
        notify::ErrorKind::Io(source) => WatchError::io(path, source),
        kind => WatchError::Notify(notify::Error { kind, paths }),
    }
}
