//! Watch sources
//!
//! Provides a unified interface ([`WatchSource`]) over two backends:
//! - [`NativeSource`]: OS change notifications through `notify`
//! - [`PollingSource`]: periodic re-stat of registered paths
//!
//! Both deliver raw [`SourceEvent`]s for a registered path and its direct
//! children. Sources never interpret file semantics; the orchestrator does.

pub mod native;
pub mod polling;

use crate::config::{scan_interval, WatchMethod, POLL_FACTOR};
use crate::error::{Result, WatchError};
use crate::matcher::FileMatcher;
use async_trait::async_trait;
use std::fmt;
use std::ops::{BitOr, BitOrAssign};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::mpsc;

pub use native::NativeSource;
pub use polling::PollingSource;

/// Set of raw operations a registration is interested in
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct EventMask(u8);

impl EventMask {
    pub const NONE: EventMask = EventMask(0);
    pub const CREATE: EventMask = EventMask(1);
    pub const WRITE: EventMask = EventMask(1 << 1);
    pub const REMOVE: EventMask = EventMask(1 << 2);
    pub const RENAME: EventMask = EventMask(1 << 3);
    pub const CHMOD: EventMask = EventMask(1 << 4);
    pub const ALL: EventMask = EventMask(0b1_1111);

    /// Children appearing or disappearing
    pub const CREATE_REMOVE: EventMask = EventMask(1 | 1 << 2 | 1 << 3);

    /// Content changes and disappearance
    pub const WRITE_REMOVE: EventMask = EventMask(1 << 1 | 1 << 2 | 1 << 3);

    /// Union of two masks
    pub const fn union(self, other: EventMask) -> EventMask {
        EventMask(self.0 | other.0)
    }

    /// Whether every flag of `other` is set
    pub const fn contains(self, other: EventMask) -> bool {
        self.0 & other.0 == other.0
    }

    /// Whether no flag is set
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Whether events of kind `op` pass this mask
    pub fn allows(self, op: SourceOp) -> bool {
        self.contains(op.mask())
    }
}

impl BitOr for EventMask {
    type Output = EventMask;

    fn bitor(self, rhs: EventMask) -> EventMask {
        self.union(rhs)
    }
}

impl BitOrAssign for EventMask {
    fn bitor_assign(&mut self, rhs: EventMask) {
        *self = self.union(rhs);
    }
}

impl fmt::Debug for EventMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = [
            (EventMask::CREATE, "CREATE"),
            (EventMask::WRITE, "WRITE"),
            (EventMask::REMOVE, "REMOVE"),
            (EventMask::RENAME, "RENAME"),
            (EventMask::CHMOD, "CHMOD"),
        ]
        .into_iter()
        .filter(|(flag, _)| self.contains(*flag))
        .map(|(_, name)| name)
        .collect();

        write!(f, "EventMask({})", names.join(" | "))
    }
}

/// Raw operation reported by a source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SourceOp {
    Create,
    Write,
    Remove,
    Rename,
    Chmod,
}

impl SourceOp {
    /// Mask flag corresponding to this operation
    pub fn mask(self) -> EventMask {
        match self {
            SourceOp::Create => EventMask::CREATE,
            SourceOp::Write => EventMask::WRITE,
            SourceOp::Remove => EventMask::REMOVE,
            SourceOp::Rename => EventMask::RENAME,
            SourceOp::Chmod => EventMask::CHMOD,
        }
    }
}

/// Raw event from a source
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceEvent {
    /// Path the operation happened to
    pub path: PathBuf,

    /// What happened
    pub op: SourceOp,
}

impl SourceEvent {
    pub fn new(path: impl Into<PathBuf>, op: SourceOp) -> Self {
        Self {
            path: path.into(),
            op,
        }
    }
}

/// Receiving halves of a source
///
/// Unbounded: the orchestrator registers new watches from the same task
/// that drains these channels.
#[derive(Debug)]
pub struct SourceStreams {
    pub events: mpsc::UnboundedReceiver<SourceEvent>,
    pub errors: mpsc::UnboundedReceiver<WatchError>,
}

/// Sending halves of a source
#[derive(Debug, Clone)]
pub(crate) struct SourceSinks {
    pub events: mpsc::UnboundedSender<SourceEvent>,
    pub errors: mpsc::UnboundedSender<WatchError>,
}

pub(crate) fn source_channels() -> (SourceSinks, SourceStreams) {
    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let (error_tx, error_rx) = mpsc::unbounded_channel();
    (
        SourceSinks {
            events: event_tx,
            errors: error_tx,
        },
        SourceStreams {
            events: event_rx,
            errors: error_rx,
        },
    )
}

/// Change notification capability
///
/// Registrations are non-recursive: a watched directory reports operations
/// on itself and its direct children, a watched file on itself.
#[async_trait]
pub trait WatchSource: Send + Sync {
    /// Backend kind
    fn method(&self) -> WatchMethod;

    /// Register `path`; registering it again only replaces the mask
    fn add_watch(&self, path: &Path, mask: EventMask) -> Result<()>;

    /// Drop the registration for `path`
    fn remove(&self, path: &Path) -> Result<()>;

    /// Whether `path` is currently registered
    fn is_watched(&self, path: &Path) -> bool;

    /// Stop delivering events and release OS resources; idempotent
    async fn close(&self) -> Result<()>;
}

/// Open a source for `method`
///
/// The polling interval is `deadline / 2`, clamped to [1s, 60s]. The matcher
/// limits which child files the polling backend keeps in its cache; the
/// native backend reports every child. Must be called inside a Tokio runtime.
pub fn open_watch_source(
    method: WatchMethod,
    deadline: Duration,
    matcher: FileMatcher,
) -> Result<(Box<dyn WatchSource>, SourceStreams)> {
    match method {
        WatchMethod::Native => {
            let (source, streams) = NativeSource::new()?;
            Ok((Box::new(source), streams))
        }
        WatchMethod::Polling => {
            let interval = scan_interval(deadline, POLL_FACTOR);
            let (source, streams) = PollingSource::start(interval, matcher);
            Ok((Box::new(source), streams))
        }
    }
}
