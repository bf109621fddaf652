//! Error types for the watcher

use std::io;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Result type for watcher operations
pub type Result<T> = std::result::Result<T, WatchError>;

/// Errors produced while configuring or running a watcher
///
/// Configuration errors (`InactiveTooShort`, `InvalidConfig`, `NotADirectory`,
/// `EmptyMatcher`, `InvalidPattern`) are returned directly to the caller.
/// Everything else is path scoped and delivered on the error stream while the
/// watcher keeps running.
#[derive(Debug, Error)]
pub enum WatchError {
    /// Inactivity window below the supported floor
    #[error("inactive duration {given:?} is less than the minimum {minimum:?}")]
    InactiveTooShort { given: Duration, minimum: Duration },

    /// Configuration failed validation or could not be parsed
    #[error("invalid watcher configuration: {0}")]
    InvalidConfig(String),

    /// Path passed to `watch_dir` is not a directory
    #[error("not a directory: {}", .0.display())]
    NotADirectory(PathBuf),

    /// A glob matcher was built without any pattern
    #[error("file matcher needs at least one pattern")]
    EmptyMatcher,

    /// A glob pattern could not be compiled
    #[error("invalid file pattern {pattern:?}: {reason}")]
    InvalidPattern { pattern: String, reason: String },

    /// Filesystem error scoped to one path
    #[error("{}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Directory listing exceeded the configured entry limit
    #[error("too many files under directory {} (limit {limit})", path.display())]
    TooManyFiles { path: PathBuf, limit: usize },

    /// The OS refused another watch registration
    #[error("too many watches, cannot watch {}", path.display())]
    TooManyWatches { path: PathBuf },

    /// Error from the native notification backend
    #[error("notification backend error: {0}")]
    Notify(#[from] notify::Error),

    /// Watcher or source was stopped
    #[error("watcher stopped")]
    Stopped,
}

impl WatchError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        WatchError::Io {
            path: path.into(),
            source,
        }
    }

    /// Whether this is a "path vanished" error that callers treat as a removal
    pub fn is_not_found(&self) -> bool {
        matches!(self, WatchError::Io { source, .. } if source.kind() == io::ErrorKind::NotFound)
    }

    /// Whether a path expected to be a directory turned out to be something else
    pub fn is_not_a_directory(&self) -> bool {
        matches!(self, WatchError::Io { source, .. } if source.kind() == io::ErrorKind::NotADirectory)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_classification() {
        let err = WatchError::io("/gone", io::Error::from(io::ErrorKind::NotFound));
        assert!(err.is_not_found());

        let err = WatchError::io("/locked", io::Error::from(io::ErrorKind::PermissionDenied));
        assert!(!err.is_not_found());
        assert!(!WatchError::Stopped.is_not_found());

        let err = WatchError::io("/was/dir", io::Error::from(io::ErrorKind::NotADirectory));
        assert!(err.is_not_a_directory());
        assert!(!err.is_not_found());
    }

    #[test]
    fn test_error_messages_name_the_path() {
        let err = WatchError::TooManyFiles {
            path: PathBuf::from("/var/log/huge"),
            limit: 128,
        };
        assert_eq!(
            err.to_string(),
            "too many files under directory /var/log/huge (limit 128)"
        );

        let err = WatchError::InactiveTooShort {
            given: Duration::from_secs(1),
            minimum: Duration::from_secs(5),
        };
        assert!(err.to_string().contains("1s"));
    }
}
