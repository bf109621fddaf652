//! Per-file activity state machine
//!
//! ```text
//!            no write for `inactive`              no write for `silence`
//!   Active ------------------------> Inactive ------------------------> evicted
//!     ^                                 |
//!     +------------ write --------------+
//! ```
//!
//! Disappearance is handled by the caller before the machine is consulted:
//! a file that can no longer be stat'ed is dropped and reported removed.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Cut-off instants for one classification pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deadlines {
    /// Files last written before this are inactive
    pub inactive: SystemTime,

    /// Inactive files last written before this are evicted
    pub silence: SystemTime,
}

impl Deadlines {
    /// Deadlines relative to `now`
    ///
    /// Deadlines never fall before the Unix epoch.
    pub fn at(now: SystemTime, inactive: Duration, silence: Duration) -> Self {
        Self {
            inactive: since_epoch(now, inactive),
            silence: since_epoch(now, silence),
        }
    }
}

fn since_epoch(now: SystemTime, window: Duration) -> SystemTime {
    now.checked_sub(window)
        .filter(|t| *t >= UNIX_EPOCH)
        .unwrap_or(UNIX_EPOCH)
}

/// Outcome of observing a file's modification time
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// No state change
    Unchanged,

    /// Active file went a full inactivity window without a write
    BecameInactive,

    /// Inactive file was written again
    Rewritten,

    /// Inactive file went a full silence window without a write; stop tracking it
    Silenced,
}

/// Tracking state of one file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileStat {
    last_mod_time: SystemTime,
    active: bool,
}

impl FileStat {
    /// State of a freshly discovered file
    pub fn discovered(mod_time: SystemTime) -> Self {
        Self {
            last_mod_time: mod_time,
            active: true,
        }
    }

    /// Whether the file is currently active
    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Last modification time seen
    pub fn last_mod_time(&self) -> SystemTime {
        self.last_mod_time
    }

    /// Feed the file's current modification time through the state machine
    ///
    /// On `Silenced` the stored state is left as it was; the caller drops it.
    pub fn observe(&mut self, mod_time: SystemTime, deadlines: &Deadlines) -> Transition {
        let transition = if self.active {
            if mod_time < deadlines.inactive {
                self.active = false;
                Transition::BecameInactive
            } else {
                Transition::Unchanged
            }
        } else if mod_time > self.last_mod_time {
            self.active = true;
            Transition::Rewritten
        } else if mod_time < deadlines.silence {
            return Transition::Silenced;
        } else {
            Transition::Unchanged
        };

        self.last_mod_time = mod_time;
        transition
    }
}
