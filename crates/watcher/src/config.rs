//! Watcher configuration
//!
//! Everything the orchestrator needs is carried in [`WatcherConfig`]. It can be
//! built programmatically or loaded from TOML:
//!
//! ```toml
//! method = "polling"
//! inactive_secs = 60
//! silence_secs = 480
//! max_dir_entries = 128
//! channel_capacity = 32
//! emit_silence = false
//! ```

use crate::error::{Result, WatchError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Smallest accepted inactivity window. Tick and polling intervals derive
/// from it, so shorter windows would turn into scan storms.
pub const MIN_INACTIVE_DURATION: Duration = Duration::from_secs(5);

/// Default cap on entries listed from one directory
pub const DEFAULT_MAX_DIR_ENTRIES: usize = 128;

/// Default capacity of the event and error channels
pub const DEFAULT_CHANNEL_CAPACITY: usize = 32;

const MIN_SCAN_INTERVAL: Duration = Duration::from_secs(1);
const MAX_SCAN_INTERVAL: Duration = Duration::from_secs(60);

/// Divisor applied to the inactivity window for the orchestrator tick
pub(crate) const TICK_FACTOR: u32 = 3;

/// Divisor applied to the deadline for the polling source
pub(crate) const POLL_FACTOR: u32 = 2;

/// Interval for a periodic check derived from a deadline, clamped to [1s, 60s]
pub fn scan_interval(deadline: Duration, factor: u32) -> Duration {
    (deadline / factor.max(1)).clamp(MIN_SCAN_INTERVAL, MAX_SCAN_INTERVAL)
}

/// How filesystem changes are observed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WatchMethod {
    /// OS change notifications, with the tick as an inactivity backstop
    #[default]
    Native,

    /// Scheduled re-scan of every tracked directory
    Polling,
}

impl fmt::Display for WatchMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WatchMethod::Native => f.write_str("native"),
            WatchMethod::Polling => f.write_str("polling"),
        }
    }
}

impl FromStr for WatchMethod {
    type Err = WatchError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "native" | "os" | "fs" => Ok(WatchMethod::Native),
            "polling" | "poll" | "timer" => Ok(WatchMethod::Polling),
            other => Err(WatchError::InvalidConfig(format!(
                "unknown watch method {other:?} (expected native or polling)"
            ))),
        }
    }
}

/// Configuration for a [`FileWatcher`](crate::FileWatcher)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatcherConfig {
    /// Notification strategy (default: native)
    pub method: WatchMethod,

    /// A file not written for this long is reported inactive (default: 60s)
    #[serde(rename = "inactive_secs", with = "duration_secs")]
    pub inactive: Duration,

    /// An inactive file not written for this long is evicted (default: 480s)
    #[serde(rename = "silence_secs", with = "duration_secs")]
    pub silence: Duration,

    /// Directories listing more entries than this are dropped (default: 128)
    pub max_dir_entries: usize,

    /// Capacity of the event and error channels (default: 32)
    pub channel_capacity: usize,

    /// Report evictions as `Silence` instead of `Remove` (default: false)
    pub emit_silence: bool,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            method: WatchMethod::Native,
            inactive: Duration::from_secs(60),
            silence: Duration::from_secs(8 * 60),
            max_dir_entries: DEFAULT_MAX_DIR_ENTRIES,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            emit_silence: false,
        }
    }
}

impl WatcherConfig {
    /// Configuration with the given method and lifecycle windows, defaults elsewhere
    pub fn new(method: WatchMethod, inactive: Duration, silence: Duration) -> Self {
        Self {
            method,
            inactive,
            silence,
            ..Self::default()
        }
    }

    /// Check the configuration before a watcher is built from it
    pub fn validate(&self) -> Result<()> {
        if self.inactive < MIN_INACTIVE_DURATION {
            return Err(WatchError::InactiveTooShort {
                given: self.inactive,
                minimum: MIN_INACTIVE_DURATION,
            });
        }

        if self.silence < self.inactive {
            return Err(WatchError::InvalidConfig(format!(
                "silence duration {:?} is shorter than inactive duration {:?}",
                self.silence, self.inactive
            )));
        }

        if self.max_dir_entries == 0 {
            return Err(WatchError::InvalidConfig(
                "max_dir_entries must be at least 1".to_string(),
            ));
        }

        if self.channel_capacity == 0 {
            return Err(WatchError::InvalidConfig(
                "channel_capacity must be at least 1".to_string(),
            ));
        }

        Ok(())
    }

    /// Parse and validate a TOML document
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(contents).map_err(|e| WatchError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a TOML configuration file
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| WatchError::io(path, e))?;
        Self::from_toml_str(&contents)
    }

    /// Interval of the orchestrator tick
    pub fn tick_interval(&self) -> Duration {
        scan_interval(self.inactive, TICK_FACTOR)
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}
