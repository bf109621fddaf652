//! File watcher orchestrator
//!
//! Owns the tracked state and the tasks that feed it:
//! - a ticker that reclassifies every tracked file and, in polling mode,
//!   rescans every tracked directory
//! - in native mode, a dispatch task applying source notifications as they
//!   arrive
//!
//! Both tasks and [`FileWatcher::watch_dir`] take the same lock and keep it
//! while their events are delivered, so the published stream follows the
//! order in which the state changed.

use crate::activity::Deadlines;
use crate::config::{WatchMethod, WatcherConfig};
use crate::error::{Result, WatchError};
use crate::matcher::FileMatcher;
use crate::scan::DirStat;
use crate::source::{open_watch_source, EventMask, SourceEvent, SourceStreams, WatchSource};
use crate::state::{Outbox, TrackedState};
use crate::{EventKind, WatchEvent};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::sync::{mpsc, watch, Mutex};
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info, trace, warn};

/// Operations a tracked directory is armed for
const DIR_EVENTS: EventMask = EventMask::CREATE_REMOVE.union(EventMask::WRITE);

/// Receiving side of a watcher
#[derive(Debug)]
pub struct WatchStreams {
    /// Semantic file events
    pub events: mpsc::Receiver<WatchEvent>,

    /// Path scoped errors; the watcher keeps running
    pub errors: mpsc::Receiver<WatchError>,
}

/// Watches directories and reports file activity
///
/// Dropping the watcher stops it.
pub struct FileWatcher {
    shared: Arc<Shared>,
    shutdown: watch::Sender<bool>,
}

struct Shared {
    config: WatcherConfig,
    state: Mutex<TrackedState>,
    source: Option<Box<dyn WatchSource>>,
    events: mpsc::Sender<WatchEvent>,
    errors: mpsc::Sender<WatchError>,
    shutdown: watch::Receiver<bool>,
}

impl FileWatcher {
    /// Create a watcher with default limits
    ///
    /// Fails if `inactive` is below [`MIN_INACTIVE_DURATION`](crate::MIN_INACTIVE_DURATION).
    /// Must be called inside a Tokio runtime.
    pub fn new(method: WatchMethod, inactive: Duration, silence: Duration) -> Result<(Self, WatchStreams)> {
        Self::with_config(WatcherConfig::new(method, inactive, silence))
    }

    /// Create a watcher from a full configuration
    pub fn with_config(config: WatcherConfig) -> Result<(Self, WatchStreams)> {
        config.validate()?;

        let (source, source_streams) = match config.method {
            WatchMethod::Native => {
                let (source, streams) = open_notification_source(&config)?;
                (Some(source), Some(streams))
            }
            WatchMethod::Polling => (None, None),
        };

        let (watcher, streams) = Self::build(config, source);
        let period = watcher.scan_interval();

        tokio::spawn(run_ticker(Arc::clone(&watcher.shared), period));
        if let Some(source_streams) = source_streams {
            tokio::spawn(run_dispatch(Arc::clone(&watcher.shared), source_streams));
        }

        info!(
            "file watcher started (method: {}, interval: {:?})",
            watcher.method(),
            period
        );
        Ok((watcher, streams))
    }

    fn build(config: WatcherConfig, source: Option<Box<dyn WatchSource>>) -> (Self, WatchStreams) {
        let (event_tx, event_rx) = mpsc::channel(config.channel_capacity);
        let (error_tx, error_rx) = mpsc::channel(config.channel_capacity);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let silence_kind = if config.emit_silence {
            EventKind::Silence
        } else {
            EventKind::Remove
        };

        let shared = Shared {
            state: Mutex::new(TrackedState::new(config.max_dir_entries, silence_kind)),
            config,
            source,
            events: event_tx,
            errors: error_tx,
            shutdown: shutdown_rx,
        };

        (
            Self {
                shared: Arc::new(shared),
                shutdown: shutdown_tx,
            },
            WatchStreams {
                events: event_rx,
                errors: error_rx,
            },
        )
    }

    /// Watch `dir`, and its subdirectories if `include_subdirectories` is set
    ///
    /// The directory is scanned before this returns, so files already present
    /// are reported created right away. Those events go through the bounded
    /// event channel: keep draining [`WatchStreams`] while this runs, or a
    /// directory with more fresh files than the channel holds blocks it.
    /// Watching a directory again replaces its matcher and recursion flag.
    pub async fn watch_dir(
        &self,
        dir: impl AsRef<Path>,
        include_subdirectories: bool,
        matcher: FileMatcher,
    ) -> Result<()> {
        if self.is_stopped() {
            return Err(WatchError::Stopped);
        }

        let dir = dir.as_ref();
        let metadata = fs::metadata(dir).map_err(|e| WatchError::io(dir, e))?;
        if !metadata.is_dir() {
            return Err(WatchError::NotADirectory(dir.to_path_buf()));
        }

        let shared = &self.shared;
        let deadlines = shared.deadlines(SystemTime::now());
        let stat = DirStat::new(include_subdirectories, matcher);

        let mut state = shared.state.lock().await;
        let mut out = Outbox::default();
        state.track_root(dir.to_path_buf(), stat, deadlines.silence, &mut out);
        shared.arm_watches(&mut state, &mut out, deadlines.silence);
        shared.deliver(out).await;

        info!("watching dir: {}", dir.display());
        Ok(())
    }

    /// Stop all watcher tasks; idempotent
    pub fn stop(&self) {
        if !self.shutdown.send_replace(true) {
            debug!("file watcher stopping");
        }
    }

    /// Whether [`stop`](Self::stop) was called
    pub fn is_stopped(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// Configured watch method
    pub fn method(&self) -> WatchMethod {
        self.shared.config.method
    }

    /// Interval between ticks
    pub fn scan_interval(&self) -> Duration {
        self.shared.config.tick_interval()
    }

    /// Tracked files, in path order
    pub async fn tracked_files(&self) -> Vec<PathBuf> {
        self.shared.state.lock().await.tracked_files()
    }

    /// Tracked directories, in path order
    pub async fn tracked_dirs(&self) -> Vec<PathBuf> {
        self.shared.state.lock().await.tracked_dirs()
    }

    /// Whether `path` is a tracked file or directory
    pub async fn is_tracked(&self, path: impl AsRef<Path>) -> bool {
        let path = path.as_ref();
        let state = self.shared.state.lock().await;
        state.is_file_tracked(path) || state.is_dir_tracked(path)
    }
}

impl Drop for FileWatcher {
    fn drop(&mut self) {
        self.stop();
    }
}

fn open_notification_source(config: &WatcherConfig) -> Result<(Box<dyn WatchSource>, SourceStreams)> {
    match open_watch_source(WatchMethod::Native, config.inactive, FileMatcher::any()) {
        Ok(opened) => Ok(opened),
        Err(e) => {
            warn!("native notifications unavailable, falling back to polling: {}", e);
            open_watch_source(WatchMethod::Polling, config.inactive, FileMatcher::any())
        }
    }
}

impl Shared {
    fn deadlines(&self, now: SystemTime) -> Deadlines {
        Deadlines::at(now, self.config.inactive, self.config.silence)
    }

    /// One scheduling pass at `now`
    async fn tick(&self, now: SystemTime) {
        let deadlines = self.deadlines(now);
        let mut state = self.state.lock().await;
        let mut out = Outbox::default();

        state.check_files(&deadlines, &mut out);
        if self.config.method == WatchMethod::Polling {
            state.check_dirs(deadlines.silence, &mut out);
        }
        self.arm_watches(&mut state, &mut out, deadlines.silence);
        state.merge_staged();

        self.deliver(out).await;
    }

    async fn handle_notification(&self, event: SourceEvent) {
        trace!("dir event: {:?}", event);

        let deadlines = self.deadlines(SystemTime::now());
        let mut state = self.state.lock().await;
        let mut out = Outbox::default();
        state.apply_notification(&event, &deadlines, &mut out);

        if !out.is_empty() {
            self.arm_watches(&mut state, &mut out, deadlines.silence);
            self.deliver(out).await;
        }
    }

    /// Arm watches for discovered directories and disarm dropped ones
    ///
    /// Each newly armed directory is scanned once more, picking up entries
    /// created after its listing but before its watch. Directories found by
    /// that scan are armed in turn.
    fn arm_watches(&self, state: &mut TrackedState, out: &mut Outbox, silence_deadline: SystemTime) {
        let Some(source) = &self.source else {
            return;
        };

        let mut dropped = std::mem::take(&mut out.dropped_dirs);
        let mut pending = std::mem::take(&mut out.discovered_dirs);

        while !dropped.is_empty() || !pending.is_empty() {
            for dir in dropped.drain(..) {
                if let Err(e) = source.remove(&dir) {
                    debug!("unwatch {} failed: {}", dir.display(), e);
                }
            }

            for dir in &pending {
                match source.add_watch(dir, DIR_EVENTS) {
                    Ok(()) => {}
                    Err(e) if e.is_not_found() => debug!("dir vanished before watch: {}", dir.display()),
                    Err(e) => {
                        error!("fs watch dir error: {}", e);
                        out.errors.push(e);
                    }
                }
            }

            let mut rescan = Outbox::default();
            for dir in pending.drain(..) {
                state.scan_tree(dir, silence_deadline, &mut rescan);
            }

            out.events.append(&mut rescan.events);
            out.errors.append(&mut rescan.errors);
            dropped = rescan.dropped_dirs;
            pending = rescan.discovered_dirs;
        }
    }

    /// Publish events, then errors
    ///
    /// Called with the state lock held.
    async fn deliver(&self, out: Outbox) {
        let mut shutdown = self.shutdown.clone();
        for event in out.events {
            if !send(&self.events, event, &mut shutdown).await {
                return;
            }
        }
        for err in out.errors {
            if !send(&self.errors, err, &mut shutdown).await {
                return;
            }
        }
    }
}

/// Send unless the watcher stops first
async fn send<T>(tx: &mpsc::Sender<T>, value: T, shutdown: &mut watch::Receiver<bool>) -> bool {
    tokio::select! {
        sent = tx.send(value) => sent.is_ok(),
        _ = stopped(shutdown) => false,
    }
}

/// Resolves once the watcher is stopped
async fn stopped(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|done| *done).await;
}

async fn run_ticker(shared: Arc<Shared>, period: Duration) {
    let mut shutdown = shared.shutdown.clone();
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = stopped(&mut shutdown) => break,
            _ = ticker.tick() => shared.tick(SystemTime::now()).await,
        }
    }

    debug!("ticker stopped");
}

async fn run_dispatch(shared: Arc<Shared>, mut streams: SourceStreams) {
    let mut shutdown = shared.shutdown.clone();

    loop {
        tokio::select! {
            _ = stopped(&mut shutdown) => break,
            event = streams.events.recv() => match event {
                Some(event) => shared.handle_notification(event).await,
                None => {
                    warn!("failed to listen watch event");
                    break;
                }
            },
            err = streams.errors.recv() => match err {
                Some(err) => {
                    error!("watch dir error: {}", err);
                    let mut shutdown = shared.shutdown.clone();
                    send(&shared.errors, err, &mut shutdown).await;
                }
                None => {
                    warn!("failed to listen error event");
                    break;
                }
            },
        }
    }

    if let Some(source) = &shared.source {
        if let Err(e) = source.close().await {
            warn!("closing watch source failed: {}", e);
        }
    }
    warn!("stop watch directory");
}

#[cfg(test)]
impl FileWatcher {
    /// Watcher without background tasks; drive it with [`tick_at`](Self::tick_at)
    fn unscheduled(config: WatcherConfig) -> (Self, WatchStreams) {
        Self::build(config, None)
    }

    fn unscheduled_with_source(config: WatcherConfig, source: Box<dyn WatchSource>) -> (Self, WatchStreams) {
        Self::build(config, Some(source))
    }

    async fn tick_at(&self, now: SystemTime) {
        self.shared.tick(now).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use filetime::{set_file_mtime, FileTime};
    use std::collections::HashSet;
    use tempfile::TempDir;

    /// Source that writes `late.txt` into each directory as it is armed
    #[derive(Default)]
    struct LateWriter {
        armed: parking_lot::Mutex<HashSet<PathBuf>>,
    }

    #[async_trait]
    impl WatchSource for LateWriter {
        fn method(&self) -> WatchMethod {
            WatchMethod::Native
        }

        fn add_watch(&self, path: &Path, _mask: EventMask) -> Result<()> {
            if self.armed.lock().insert(path.to_path_buf()) {
                fs::write(path.join("late.txt"), b"x").unwrap();
                touch_dir(path);
            }
            Ok(())
        }

        fn remove(&self, path: &Path) -> Result<()> {
            self.armed.lock().remove(path);
            Ok(())
        }

        fn is_watched(&self, path: &Path) -> bool {
            self.armed.lock().contains(path)
        }

        async fn close(&self) -> Result<()> {
            Ok(())
        }
    }

    fn secs(n: u64) -> Duration {
        Duration::from_secs(n)
    }

    fn short_config() -> WatcherConfig {
        WatcherConfig::new(WatchMethod::Polling, secs(5), secs(10))
    }

    fn drain(streams: &mut WatchStreams) -> Vec<WatchEvent> {
        let mut events = Vec::new();
        while let Ok(event) = streams.events.try_recv() {
            events.push(event);
        }
        events
    }

    // Moves the directory mtime forward so the next tick relists it
    fn touch_dir(dir: &Path) {
        let later = SystemTime::now() + secs(2);
        set_file_mtime(dir, FileTime::from_system_time(later)).unwrap();
    }

    #[tokio::test]
    async fn test_file_goes_inactive_then_removed() {
        let temp_dir = TempDir::new().unwrap();
        let file = temp_dir.path().join("a.txt");
        fs::write(&file, b"hello").unwrap();
        let start = SystemTime::now();

        let (watcher, mut streams) = FileWatcher::unscheduled(short_config());
        watcher.watch_dir(temp_dir.path(), false, FileMatcher::any()).await.unwrap();
        assert_eq!(drain(&mut streams), vec![WatchEvent::new(&file, EventKind::Create)]);

        watcher.tick_at(start + secs(2)).await;
        assert!(drain(&mut streams).is_empty());

        watcher.tick_at(start + secs(6)).await;
        assert_eq!(drain(&mut streams), vec![WatchEvent::new(&file, EventKind::Inactive)]);

        watcher.tick_at(start + secs(11)).await;
        assert_eq!(drain(&mut streams), vec![WatchEvent::new(&file, EventKind::Remove)]);
        assert!(!watcher.is_tracked(&file).await);
    }

    #[tokio::test]
    async fn test_rewrite_while_inactive_reports_write() {
        let temp_dir = TempDir::new().unwrap();
        let file = temp_dir.path().join("a.txt");
        fs::write(&file, b"hello").unwrap();
        let start = SystemTime::now();

        let (watcher, mut streams) = FileWatcher::unscheduled(short_config());
        watcher.watch_dir(temp_dir.path(), false, FileMatcher::any()).await.unwrap();
        // The first tick merges the staged file
        watcher.tick_at(start + secs(2)).await;
        watcher.tick_at(start + secs(6)).await;
        drain(&mut streams);

        set_file_mtime(&file, FileTime::from_system_time(start + secs(7))).unwrap();
        watcher.tick_at(start + secs(7)).await;
        assert_eq!(drain(&mut streams), vec![WatchEvent::new(&file, EventKind::Write)]);

        watcher.tick_at(start + secs(11)).await;
        assert!(drain(&mut streams).is_empty());
        assert!(watcher.is_tracked(&file).await);
    }

    #[tokio::test]
    async fn test_new_subdirectory_reported_in_one_tick() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();

        let (watcher, mut streams) = FileWatcher::unscheduled(short_config());
        watcher.watch_dir(root, true, FileMatcher::any()).await.unwrap();
        assert!(drain(&mut streams).is_empty());

        let sub = root.join("sub");
        fs::create_dir(&sub).unwrap();
        fs::write(sub.join("b.txt"), b"x").unwrap();
        touch_dir(root);

        watcher.tick_at(SystemTime::now()).await;
        assert_eq!(
            drain(&mut streams),
            vec![WatchEvent::new(sub.join("b.txt"), EventKind::Create)]
        );
        assert_eq!(watcher.tracked_dirs().await, vec![root.to_path_buf(), sub]);
    }

    #[tokio::test]
    async fn test_files_created_while_arming_are_reported() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        let sub = root.join("sub");
        fs::create_dir(&sub).unwrap();

        let config = WatcherConfig::new(WatchMethod::Native, secs(5), secs(10));
        let (watcher, mut streams) =
            FileWatcher::unscheduled_with_source(config, Box::new(LateWriter::default()));
        watcher.watch_dir(root, true, FileMatcher::any()).await.unwrap();

        assert_eq!(
            drain(&mut streams),
            vec![
                WatchEvent::new(root.join("late.txt"), EventKind::Create),
                WatchEvent::new(sub.join("late.txt"), EventKind::Create),
            ]
        );
        assert!(watcher.is_tracked(sub.join("late.txt")).await);
        assert!(streams.errors.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_eviction_reported_as_silence() {
        let temp_dir = TempDir::new().unwrap();
        let file = temp_dir.path().join("a.txt");
        fs::write(&file, b"hello").unwrap();
        let start = SystemTime::now();

        let config = WatcherConfig {
            emit_silence: true,
            ..short_config()
        };
        let (watcher, mut streams) = FileWatcher::unscheduled(config);
        watcher.watch_dir(temp_dir.path(), false, FileMatcher::any()).await.unwrap();
        for t in [2, 6, 11] {
            watcher.tick_at(start + secs(t)).await;
        }

        let kinds: Vec<EventKind> = drain(&mut streams).into_iter().map(|e| e.kind).collect();
        assert_eq!(kinds, vec![EventKind::Create, EventKind::Inactive, EventKind::Silence]);
    }

    #[tokio::test]
    async fn test_oversized_dir_reported_on_error_stream() {
        let temp_dir = TempDir::new().unwrap();
        for i in 0..3 {
            fs::write(temp_dir.path().join(format!("f{i}")), b"").unwrap();
        }

        let config = WatcherConfig {
            max_dir_entries: 2,
            ..short_config()
        };
        let (watcher, mut streams) = FileWatcher::unscheduled(config);
        watcher.watch_dir(temp_dir.path(), false, FileMatcher::any()).await.unwrap();

        assert!(matches!(
            streams.errors.try_recv(),
            Ok(WatchError::TooManyFiles { limit: 2, .. })
        ));
        assert!(watcher.tracked_dirs().await.is_empty());
    }

    #[tokio::test]
    async fn test_watch_dir_rejects_bad_paths() {
        let temp_dir = TempDir::new().unwrap();
        let file = temp_dir.path().join("plain.txt");
        fs::write(&file, b"x").unwrap();

        let (watcher, _streams) = FileWatcher::unscheduled(short_config());

        let missing = watcher
            .watch_dir(temp_dir.path().join("missing"), false, FileMatcher::any())
            .await;
        assert!(matches!(missing, Err(ref e) if e.is_not_found()));

        let not_dir = watcher.watch_dir(&file, false, FileMatcher::any()).await;
        assert!(matches!(not_dir, Err(WatchError::NotADirectory(_))));
    }

    #[test]
    fn test_task_futures_are_send() {
        fn assert_send<T: Send>(_: T) {}

        let (watcher, _streams) = FileWatcher::unscheduled(short_config());
        let (_sinks, source_streams) = crate::source::source_channels();

        assert_send(run_ticker(Arc::clone(&watcher.shared), secs(1)));
        assert_send(run_dispatch(Arc::clone(&watcher.shared), source_streams));
    }

    #[test]
    fn test_short_inactive_rejected() {
        let result = FileWatcher::new(WatchMethod::Polling, secs(1), secs(10));
        assert!(matches!(result, Err(WatchError::InactiveTooShort { .. })));
    }

    #[tokio::test]
    async fn test_stop_is_idempotent() {
        let temp_dir = TempDir::new().unwrap();
        let (watcher, mut streams) = FileWatcher::new(WatchMethod::Polling, secs(5), secs(10)).unwrap();
        assert_eq!(watcher.scan_interval(), secs(5) / 3);

        watcher.stop();
        watcher.stop();
        assert!(watcher.is_stopped());
        assert!(matches!(
            watcher.watch_dir(temp_dir.path(), false, FileMatcher::any()).await,
            Err(WatchError::Stopped)
        ));

        drop(watcher);
        let closed = tokio::time::timeout(secs(5), streams.events.recv()).await.unwrap();
        assert!(closed.is_none());
    }
}
