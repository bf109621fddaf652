//! Print raw change notifications for one path

use crate::util;
use anyhow::{Context, Result};
use clap::Args;
use owo_colors::OwoColorize;
use std::future::Future;
use std::io;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{error, info, warn};
use watcher::{open_watch_source, EventMask, FileMatcher, SourceEvent, SourceStreams, WatchMethod};

#[derive(Args, Debug)]
pub struct SourceArgs {
    /// File or directory to watch
    pub path: PathBuf,

    /// Notification backend: native (os, fs) or polling (poll, timer)
    #[arg(long, default_value = "native")]
    pub method: WatchMethod,

    /// Polling deadline in seconds; the path is polled every half of it
    #[arg(long, value_name = "SECS", default_value_t = 60)]
    pub deadline_secs: u64,
}

impl SourceArgs {
    /// Children appearing, disappearing or changing for a directory;
    /// writes and removal for a file
    pub fn mask(&self) -> EventMask {
        if self.path.is_dir() {
            EventMask::CREATE_REMOVE | EventMask::WRITE
        } else {
            EventMask::WRITE_REMOVE
        }
    }
}

pub async fn run(args: SourceArgs) -> Result<()> {
    let deadline = Duration::from_secs(args.deadline_secs);
    let (source, streams) = open_watch_source(args.method, deadline, FileMatcher::any())
        .context("Failed to open watch source")?;

    source
        .add_watch(&args.path, args.mask())
        .with_context(|| format!("Failed to watch {}", args.path.display()))?;

    println!(
        "{} {} ({})",
        "Listening".green().bold(),
        args.path.display(),
        source.method()
    );

    let result = listen(streams, tokio::signal::ctrl_c(), |event| {
        println!("{}", util::format_source_event(event))
    })
    .await;

    source.close().await.context("Failed to close watch source")?;
    result
}

/// Report raw events until `interrupted` resolves or the source closes
async fn listen<F>(
    mut streams: SourceStreams,
    interrupted: F,
    mut on_event: impl FnMut(&SourceEvent),
) -> Result<()>
where
    F: Future<Output = io::Result<()>>,
{
    tokio::pin!(interrupted);

    loop {
        tokio::select! {
            res = &mut interrupted => {
                res.context("Failed to listen for Ctrl-C")?;
                info!("Interrupted, closing source");
                return Ok(());
            }
            event = streams.events.recv() => match event {
                Some(event) => on_event(&event),
                None => {
                    warn!("failed to listen watch event");
                    return Ok(());
                }
            },
            err = streams.errors.recv() => match err {
                Some(err) => error!("watch error: {}", err),
                None => {
                    warn!("failed to listen error event");
                    return Ok(());
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use filetime::{set_file_mtime, FileTime};
    use std::fs;
    use std::time::SystemTime;
    use tempfile::TempDir;
    use watcher::SourceOp;

    #[derive(Parser)]
    struct Harness {
        #[command(flatten)]
        args: SourceArgs,
    }

    fn parse(argv: &[&str]) -> SourceArgs {
        let mut full = vec!["dirwatch"];
        full.extend_from_slice(argv);
        Harness::try_parse_from(full).unwrap().args
    }

    #[test]
    fn test_mask_follows_path_kind() {
        let temp_dir = TempDir::new().unwrap();
        let file = temp_dir.path().join("app.log");
        fs::write(&file, b"x").unwrap();

        let dir_path = temp_dir.path().to_string_lossy().into_owned();
        let file_path = file.to_string_lossy().into_owned();

        let dir_args = parse(&[&dir_path]);
        assert_eq!(dir_args.method, WatchMethod::Native);
        assert!(dir_args.mask().allows(SourceOp::Create));

        let file_args = parse(&[&file_path, "--method", "poll"]);
        assert_eq!(file_args.method, WatchMethod::Polling);
        assert!(file_args.mask().allows(SourceOp::Write));
        assert!(!file_args.mask().allows(SourceOp::Create));
    }

    #[tokio::test]
    async fn test_listen_reports_polled_changes() {
        let temp_dir = TempDir::new().unwrap();
        let dir = temp_dir.path();

        // Two second deadline, polled every second
        let (source, streams) =
            open_watch_source(WatchMethod::Polling, Duration::from_secs(2), FileMatcher::any()).unwrap();
        source.add_watch(dir, EventMask::CREATE_REMOVE | EventMask::WRITE).unwrap();

        let created = dir.join("new.txt");
        fs::write(&created, b"x").unwrap();
        let later = SystemTime::now() + Duration::from_secs(2);
        set_file_mtime(dir, FileTime::from_system_time(later)).unwrap();

        let stop = async {
            tokio::time::sleep(Duration::from_secs(3)).await;
            Ok::<(), io::Error>(())
        };
        let mut seen = Vec::new();
        listen(streams, stop, |event| seen.push(event.clone())).await.unwrap();
        source.close().await.unwrap();

        assert!(seen.contains(&SourceEvent::new(&created, SourceOp::Create)));
    }
}
