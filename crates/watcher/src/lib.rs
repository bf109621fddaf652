//! Directory watching with file activity tracking
//!
//! This crate watches directory trees and reports, per file:
//! - creation of files matching a per-directory matcher
//! - writes to files that had gone quiet
//! - files going inactive (no write for a configurable window)
//! - removal, or eviction once an inactive file stays silent long enough
//!
//! Changes are observed either through native OS notifications (with a
//! periodic backstop) or by periodic polling. Both produce the same
//! [`WatchEvent`] stream; duplicates are possible, misses are not intended.
//!
//! ```no_run
//! use std::time::Duration;
//! use watcher::{FileMatcher, FileWatcher, WatchMethod};
//!
//! # async fn run() -> watcher::Result<()> {
//! let (watcher, mut streams) = FileWatcher::new(
//!     WatchMethod::Native,
//!     Duration::from_secs(60),
//!     Duration::from_secs(480),
//! )?;
//!
//! // The initial scan reports through the stream, so start reading first
//! let printer = tokio::spawn(async move {
//!     while let Some(event) = streams.events.recv().await {
//!         println!("{} {}", event.kind, event.name.display());
//!     }
//! });
//!
//! watcher.watch_dir("/var/log/app", true, FileMatcher::suffix(".log")).await?;
//! let _ = printer.await;
//! # Ok(())
//! # }
//! ```

pub mod activity;
pub mod config;
pub mod error;
pub mod matcher;
pub mod resolve;
pub mod scan;
pub mod source;
mod state;
pub mod watcher;

use std::fmt;
use std::path::PathBuf;

// Re-exports
pub use config::{WatchMethod, WatcherConfig, MIN_INACTIVE_DURATION};
pub use error::{Result, WatchError};
pub use matcher::FileMatcher;
pub use source::{open_watch_source, EventMask, SourceEvent, SourceOp, SourceStreams, WatchSource};
pub use watcher::{FileWatcher, WatchStreams};

/// Semantic event emitted by the watcher
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WatchEvent {
    /// Path of the file (symlinks resolved)
    pub name: PathBuf,

    /// What happened
    pub kind: EventKind,
}

impl WatchEvent {
    /// Create a new watch event
    pub fn new(name: impl Into<PathBuf>, kind: EventKind) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }
}

impl fmt::Display for WatchEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.kind, self.name.display())
    }
}

/// Kind of watch event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// File started being tracked
    Create,

    /// Inactive file was written again
    Write,

    /// File disappeared, or was evicted after its silence window
    Remove,

    /// File went a full inactivity window without a write
    Inactive,

    /// File was evicted after its silence window (only with `emit_silence`)
    Silence,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EventKind::Create => "Create",
            EventKind::Write => "Write",
            EventKind::Remove => "Remove",
            EventKind::Inactive => "Inactive",
            EventKind::Silence => "Silence",
        };
        f.write_str(name)
    }
}
