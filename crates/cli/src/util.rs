//! Output and logging helpers

use owo_colors::OwoColorize;
use std::path::Path;
use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use watcher::{EventKind, SourceEvent, SourceOp, WatchEvent};

/// Install the global subscriber
///
/// With `log_dir`, logs go to a daily rolling `dirwatch.log` there; the
/// returned guard must be held until exit.
pub fn init_logging(level: Level, log_dir: Option<&Path>) -> Option<WorkerGuard> {
    match log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "dirwatch.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::fmt()
                .with_max_level(level)
                .with_ansi(false)
                .with_writer(writer)
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::fmt()
                .with_max_level(level)
                .with_writer(std::io::stderr)
                .init();
            None
        }
    }
}

/// One line per event, kind column colored
pub fn format_event(event: &WatchEvent) -> String {
    let label = format!("{:<8}", event.kind.to_string());
    let label = match event.kind {
        EventKind::Create => label.green().to_string(),
        EventKind::Write => label.cyan().to_string(),
        EventKind::Remove => label.red().to_string(),
        EventKind::Inactive => label.yellow().to_string(),
        EventKind::Silence => label.dimmed().to_string(),
    };

    format!("{} {}", label, event.name.display())
}

/// One line per raw source event
pub fn format_source_event(event: &SourceEvent) -> String {
    let label = format!("{:<8}", format!("{:?}", event.op));
    let label = match event.op {
        SourceOp::Create => label.green().to_string(),
        SourceOp::Write => label.cyan().to_string(),
        SourceOp::Remove | SourceOp::Rename => label.red().to_string(),
        SourceOp::Chmod => label.dimmed().to_string(),
    };

    format!("{} {}", label, event.path.display())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_event() {
        let line = format_event(&WatchEvent::new("/var/log/app.log", EventKind::Inactive));

        assert!(line.contains("Inactive"));
        assert!(line.ends_with("/var/log/app.log"));
        assert_ne!(
            format_event(&WatchEvent::new("a", EventKind::Create)),
            format_event(&WatchEvent::new("a", EventKind::Remove))
        );
    }

    #[test]
    fn test_format_source_event() {
        let line = format_source_event(&SourceEvent::new("/var/log/app.log", SourceOp::Rename));

        assert!(line.contains("Rename"));
        assert!(line.ends_with("/var/log/app.log"));
    }
}
