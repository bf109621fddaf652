//! Polling watch source
//!
//! Emulates native notifications by periodically re-stating every
//! registered path. A registered directory reports its direct children
//! appearing (Create), disappearing (Remove) and child files being written
//! (Write); a registered file reports Write and Remove. Registration takes a
//! silent baseline so entries that already exist are never reported as new.

use super::{source_channels, EventMask, SourceEvent, SourceOp, SourceSinks, SourceStreams, WatchSource};
use crate::config::WatchMethod;
use crate::error::{Result, WatchError};
use crate::matcher::FileMatcher;
use crate::resolve;
use crate::scan::list_dir;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, trace};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ChildStat {
    is_dir: bool,
    mod_time: SystemTime,
}

#[derive(Debug)]
struct WatchEntry {
    mask: EventMask,
    is_dir: bool,
    mod_time: SystemTime,
    children: BTreeMap<PathBuf, ChildStat>,
}

/// Registered paths and their last observed state
#[derive(Debug, Default)]
pub(crate) struct Registry {
    entries: BTreeMap<PathBuf, WatchEntry>,
}

/// Outcome of one polling pass
#[derive(Debug, Default)]
pub(crate) struct PollReport {
    pub events: Vec<SourceEvent>,
    pub errors: Vec<WatchError>,
}

impl PollReport {
    fn push(&mut self, mask: EventMask, path: PathBuf, op: SourceOp) {
        if mask.allows(op) {
            self.events.push(SourceEvent::new(path, op));
        }
    }
}

impl Registry {
    fn register(&mut self, path: &Path, mask: EventMask, matcher: &FileMatcher) -> Result<()> {
        if let Some(entry) = self.entries.get_mut(path) {
            entry.mask = mask;
            return Ok(());
        }

        let metadata = fs::metadata(path).map_err(|e| WatchError::io(path, e))?;
        let mod_time = metadata.modified().map_err(|e| WatchError::io(path, e))?;
        let children = if metadata.is_dir() {
            snapshot(path, matcher)?
        } else {
            BTreeMap::new()
        };

        self.entries.insert(
            path.to_path_buf(),
            WatchEntry {
                mask,
                is_dir: metadata.is_dir(),
                mod_time,
                children,
            },
        );
        Ok(())
    }

    fn unregister(&mut self, path: &Path) -> bool {
        self.entries.remove(path).is_some()
    }

    fn contains(&self, path: &Path) -> bool {
        self.entries.contains_key(path)
    }

    /// Re-stat every registration and diff against the cache
    pub(crate) fn poll(&mut self, matcher: &FileMatcher) -> PollReport {
        let mut report = PollReport::default();
        let paths: Vec<PathBuf> = self.entries.keys().cloned().collect();

        for path in paths {
            let mod_time = match resolve::mod_time(&path) {
                Ok(mod_time) => mod_time,
                Err(e) => {
                    if let Some(entry) = self.entries.remove(&path) {
                        if e.is_not_found() {
                            report.push(entry.mask, path, SourceOp::Remove);
                        } else {
                            report.errors.push(e);
                        }
                    }
                    continue;
                }
            };

            let Some(entry) = self.entries.get_mut(&path) else {
                continue;
            };

            if !entry.is_dir {
                if mod_time > entry.mod_time {
                    entry.mod_time = mod_time;
                    report.push(entry.mask, path, SourceOp::Write);
                }
                continue;
            }

            if mod_time != entry.mod_time {
                entry.mod_time = mod_time;
                match snapshot(&path, matcher) {
                    Ok(current) => diff_children(entry, current, &mut report),
                    Err(e) => report.errors.push(e),
                }
            } else {
                // Writes to children leave the directory mtime alone
                check_children(entry, &mut report);
            }
        }

        report
    }
}

fn snapshot(dir: &Path, matcher: &FileMatcher) -> Result<BTreeMap<PathBuf, ChildStat>> {
    let mut children = BTreeMap::new();

    for entry in list_dir(dir, usize::MAX)? {
        let resolved = match resolve::resolve(&entry) {
            Ok(resolved) => resolved,
            Err(e) => {
                debug!("read file error: {}", e);
                continue;
            }
        };

        if !resolved.is_dir && !matcher.matches_path(&entry) {
            continue;
        }

        children.insert(
            entry,
            ChildStat {
                is_dir: resolved.is_dir,
                mod_time: resolved.mod_time,
            },
        );
    }

    Ok(children)
}

fn diff_children(entry: &mut WatchEntry, current: BTreeMap<PathBuf, ChildStat>, report: &mut PollReport) {
    for (path, child) in &current {
        match entry.children.get(path) {
            None => report.push(entry.mask, path.clone(), SourceOp::Create),
            Some(previous) if !child.is_dir && child.mod_time > previous.mod_time => {
                report.push(entry.mask, path.clone(), SourceOp::Write)
            }
            Some(_) => {}
        }
    }

    for path in entry.children.keys() {
        if !current.contains_key(path) {
            report.push(entry.mask, path.clone(), SourceOp::Remove);
        }
    }

    entry.children = current;
}

fn check_children(entry: &mut WatchEntry, report: &mut PollReport) {
    let mask = entry.mask;
    for (path, child) in entry.children.iter_mut().filter(|(_, c)| !c.is_dir) {
        match resolve::mod_time(path) {
            Ok(mod_time) if mod_time > child.mod_time => {
                child.mod_time = mod_time;
                report.push(mask, path.clone(), SourceOp::Write);
            }
            Ok(_) => {}
            // Disappearance moves the directory mtime; the next pass relists
            Err(e) => trace!("child stat failed: {}", e),
        }
    }
}

/// Polling source driven by a tokio interval
pub struct PollingSource {
    registry: Arc<Mutex<Registry>>,
    matcher: FileMatcher,
    interval: Duration,
    shutdown: watch::Sender<bool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl PollingSource {
    /// Start polling every `interval`
    ///
    /// Must be called inside a Tokio runtime.
    pub fn start(interval: Duration, matcher: FileMatcher) -> (Self, SourceStreams) {
        let (sinks, streams) = source_channels();
        let registry = Arc::new(Mutex::new(Registry::default()));
        let (shutdown, shutdown_rx) = watch::channel(false);

        let task = tokio::spawn(run(
            Arc::clone(&registry),
            matcher.clone(),
            interval,
            sinks,
            shutdown_rx,
        ));

        (
            Self {
                registry,
                matcher,
                interval,
                shutdown,
                task: Mutex::new(Some(task)),
            },
            streams,
        )
    }

    /// Polling interval
    pub fn interval(&self) -> Duration {
        self.interval
    }
}

async fn run(
    registry: Arc<Mutex<Registry>>,
    matcher: FileMatcher,
    period: Duration,
    sinks: SourceSinks,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    info!("Starting polling source (interval: {:?})", period);

    loop {
        tokio::select! {
            _ = shutdown.wait_for(|stopped| *stopped) => break,
            _ = ticker.tick() => {}
        }

        let report = registry.lock().poll(&matcher);

        for event in report.events {
            if sinks.events.send(event).is_err() {
                return;
            }
        }
        for err in report.errors {
            if sinks.errors.send(err).is_err() {
                return;
            }
        }
    }

    debug!("polling source stopped");
}

#[async_trait]
impl WatchSource for PollingSource {
    fn method(&self) -> WatchMethod {
        WatchMethod::Polling
    }

    fn add_watch(&self, path: &Path, mask: EventMask) -> Result<()> {
        if *self.shutdown.borrow() {
            return Err(WatchError::Stopped);
        }
        self.registry.lock().register(path, mask, &self.matcher)
    }

    fn remove(&self, path: &Path) -> Result<()> {
        self.registry.lock().unregister(path);
        Ok(())
    }

    fn is_watched(&self, path: &Path) -> bool {
        self.registry.lock().contains(path)
    }

    async fn close(&self) -> Result<()> {
        self.shutdown.send_replace(true);
        let task = self.task.lock().take();
        if let Some(task) = task {
            let _ = task.await;
        }
        Ok(())
    }
}
