//! dirwatch - report file activity in a directory tree

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::Level;

mod cmd;
mod util;

/// Dirwatch - file activity in a directory tree
#[derive(Parser, Debug)]
#[command(name = "dirwatch")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, default_value = "info")]
    log_level: Level,

    /// Write logs to a daily rolling file in this directory instead of stderr
    #[arg(long, global = true, value_name = "DIR")]
    log_dir: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Watch a directory and print file Create/Write/Inactive/Remove events
    Watch(cmd::watch::WatchArgs),
    /// Print raw change notifications for a single file or directory
    Source(cmd::source::SourceArgs),
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Flushes the file writer on exit
    let _guard = util::init_logging(cli.log_level, cli.log_dir.as_deref());

    match cli.command {
        Commands::Watch(args) => cmd::watch::run(args).await,
        Commands::Source(args) => cmd::source::run(args).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use watcher::WatchMethod;

    fn watch_args(cli: Cli) -> cmd::watch::WatchArgs {
        match cli.command {
            Commands::Watch(args) => args,
            other => panic!("expected watch, got {other:?}"),
        }
    }

    #[test]
    fn test_defaults() {
        let cli = Cli::try_parse_from(["dirwatch", "watch", "/var/log"]).unwrap();

        assert_eq!(cli.log_level, Level::INFO);
        assert!(cli.log_dir.is_none());

        let watch = watch_args(cli);
        assert_eq!(watch.dir, PathBuf::from("/var/log"));
        assert!(!watch.recursive);
        assert!(watch.method.is_none());
    }

    #[test]
    fn test_all_flags() {
        let cli = Cli::try_parse_from([
            "dirwatch",
            "watch",
            "/data",
            "--method",
            "timer",
            "-r",
            "--glob",
            "*.log",
            "--glob",
            "*.out",
            "--inactive-secs",
            "30",
            "--silence-secs",
            "300",
            "--log-level",
            "debug",
            "--log-dir",
            "/tmp/logs",
        ])
        .unwrap();

        assert_eq!(cli.log_level, Level::DEBUG);
        assert_eq!(cli.log_dir, Some(PathBuf::from("/tmp/logs")));

        let watch = watch_args(cli);
        assert_eq!(watch.method, Some(WatchMethod::Polling));
        assert!(watch.recursive);
        assert_eq!(watch.glob, vec!["*.log", "*.out"]);
        assert_eq!(watch.inactive_secs, Some(30));
        assert_eq!(watch.silence_secs, Some(300));
    }

    #[test]
    fn test_source_command() {
        let cli = Cli::try_parse_from([
            "dirwatch",
            "--log-level",
            "warn",
            "source",
            "/var/log/app.log",
            "--method",
            "polling",
        ])
        .unwrap();

        assert_eq!(cli.log_level, Level::WARN);
        match cli.command {
            Commands::Source(args) => {
                assert_eq!(args.path, PathBuf::from("/var/log/app.log"));
                assert_eq!(args.method, WatchMethod::Polling);
                assert_eq!(args.deadline_secs, 60);
            }
            other => panic!("expected source, got {other:?}"),
        }
    }

    #[test]
    fn test_rejects_bad_input() {
        assert!(Cli::try_parse_from(["dirwatch"]).is_err());
        assert!(Cli::try_parse_from(["dirwatch", "watch"]).is_err());
        assert!(Cli::try_parse_from(["dirwatch", "watch", "/d", "--method", "carrier-pigeon"]).is_err());
        assert!(
            Cli::try_parse_from(["dirwatch", "watch", "/d", "--suffix", ".log", "--glob", "*.log"]).is_err()
        );
        assert!(Cli::try_parse_from(["dirwatch", "source"]).is_err());
    }
}
