//! File name matchers
//!
//! A matcher is attached to every tracked directory and decides which file
//! names below it are tracked at all. Matchers are cheap to clone and are
//! inherited by discovered subdirectories.
//!
//! Sources of matchers:
//! 1. Closures (`FileMatcher::new`)
//! 2. Suffix checks (`FileMatcher::suffix`, the CLI `--suffix` flag)
//! 3. Glob patterns (`FileMatcher::globs`, gitignore-style via the ignore crate)

use crate::error::{Result, WatchError};
use ignore::overrides::{Override, OverrideBuilder};
use std::fmt;
use std::path::Path;
use std::sync::Arc;

type Predicate = dyn Fn(&str) -> bool + Send + Sync;

/// Predicate over a file name
#[derive(Clone)]
pub struct FileMatcher {
    predicate: Arc<Predicate>,
    description: Arc<str>,
}

impl FileMatcher {
    /// Matcher backed by an arbitrary predicate
    pub fn new<F>(predicate: F) -> Self
    where
        F: Fn(&str) -> bool + Send + Sync + 'static,
    {
        Self {
            predicate: Arc::new(predicate),
            description: Arc::from("custom"),
        }
    }

    /// Matcher accepting every file
    pub fn any() -> Self {
        Self {
            predicate: Arc::new(|_| true),
            description: Arc::from("any"),
        }
    }

    /// Matcher accepting names ending in `suffix`; an empty suffix accepts everything
    pub fn suffix(suffix: impl Into<String>) -> Self {
        let suffix = suffix.into();
        if suffix.is_empty() {
            return Self::any();
        }

        let description = Arc::from(format!("suffix {suffix:?}"));
        Self {
            predicate: Arc::new(move |name| name.ends_with(suffix.as_str())),
            description,
        }
    }

    /// Matcher built from gitignore-style globs
    ///
    /// Plain patterns whitelist names, `!`-prefixed patterns exclude them.
    /// When at least one plain pattern is present, names matching none of
    /// them are rejected.
    pub fn globs<I, S>(patterns: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut builder = OverrideBuilder::new("/");
        let mut added = Vec::new();

        for pattern in patterns {
            let pattern = pattern.as_ref();
            builder
                .add(pattern)
                .map_err(|e| WatchError::InvalidPattern {
                    pattern: pattern.to_string(),
                    reason: e.to_string(),
                })?;
            added.push(pattern.to_string());
        }

        if added.is_empty() {
            return Err(WatchError::EmptyMatcher);
        }

        let overrides: Override = builder.build().map_err(|e| WatchError::InvalidPattern {
            pattern: added.join(","),
            reason: e.to_string(),
        })?;

        Ok(Self {
            predicate: Arc::new(move |name| !overrides.matched(name, false).is_ignore()),
            description: Arc::from(format!("globs {added:?}")),
        })
    }

    /// Whether a file name is accepted
    pub fn matches(&self, name: &str) -> bool {
        (self.predicate)(name)
    }

    /// Whether the final component of `path` is accepted
    pub fn matches_path(&self, path: &Path) -> bool {
        match path.file_name() {
            Some(name) => self.matches(&name.to_string_lossy()),
            None => false,
        }
    }
}

impl Default for FileMatcher {
    fn default() -> Self {
        Self::any()
    }
}

impl fmt::Debug for FileMatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("FileMatcher").field(&self.description).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_any_and_custom() {
        assert!(FileMatcher::any().matches("whatever.bin"));

        let only_logs = FileMatcher::new(|name| name.starts_with("app-"));
        assert!(only_logs.matches("app-1.log"));
        assert!(!only_logs.matches("db.log"));
    }

    #[test]
    fn test_suffix() {
        let matcher = FileMatcher::suffix(".log");
        assert!(matcher.matches("server.log"));
        assert!(!matcher.matches("server.log.gz"));

        // Empty suffix behaves like any()
        assert!(FileMatcher::suffix("").matches("server.log.gz"));
    }

    #[test]
    fn test_globs_whitelist_and_negation() {
        let matcher = FileMatcher::globs(["*.log", "*.txt", "!debug.log"]).unwrap();

        assert!(matcher.matches("app.log"));
        assert!(matcher.matches("notes.txt"));
        assert!(!matcher.matches("debug.log"));
        assert!(!matcher.matches("image.png"));
    }

    #[test]
    fn test_globs_only_negations_accept_the_rest() {
        let matcher = FileMatcher::globs(["!*.swp"]).unwrap();

        assert!(matcher.matches("main.rs"));
        assert!(!matcher.matches(".main.rs.swp"));
    }

    #[test]
    fn test_globs_require_a_pattern() {
        let empty: [&str; 0] = [];
        assert!(matches!(
            FileMatcher::globs(empty),
            Err(WatchError::EmptyMatcher)
        ));
    }

    #[test]
    fn test_invalid_glob_reported() {
        let err = FileMatcher::globs(["a[b"]).unwrap_err();
        assert!(matches!(err, WatchError::InvalidPattern { .. }));
    }

    #[test]
    fn test_matches_path_uses_file_name() {
        let matcher = FileMatcher::suffix(".txt");
        assert!(matcher.matches_path(Path::new("/var/data/a.txt")));
        assert!(!matcher.matches_path(Path::new("/var/data.txt/a.bin")));
        assert!(!matcher.matches_path(Path::new("/")));
    }
}
