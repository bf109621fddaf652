//! Watch a directory until interrupted

use crate::util;
use anyhow::{Context, Result};
use clap::Args;
use owo_colors::OwoColorize;
use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};
use watcher::{FileMatcher, FileWatcher, WatchEvent, WatchMethod, WatchStreams, WatcherConfig};

#[derive(Args, Debug)]
pub struct WatchArgs {
    /// Directory to watch
    pub dir: PathBuf,

    /// Watch method: native (os, fs) or polling (poll, timer)
    #[arg(long)]
    pub method: Option<WatchMethod>,

    /// Also watch subdirectories
    #[arg(short, long)]
    pub recursive: bool,

    /// Only track files whose name ends with this suffix
    #[arg(long, conflicts_with = "glob")]
    pub suffix: Option<String>,

    /// Only track files whose name matches this glob (repeatable)
    #[arg(long, value_name = "PATTERN")]
    pub glob: Vec<String>,

    /// Seconds without a write before a file is inactive (default: 60)
    #[arg(long, value_name = "SECS")]
    pub inactive_secs: Option<u64>,

    /// Seconds without a write before an inactive file is dropped (default: 480)
    #[arg(long, value_name = "SECS")]
    pub silence_secs: Option<u64>,

    /// Report dropped files as Silence rather than Remove
    #[arg(long)]
    pub emit_silence: bool,

    /// TOML configuration file; flags override its values
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,
}

impl WatchArgs {
    /// Configuration file values with flag overrides applied
    pub fn watcher_config(&self) -> Result<WatcherConfig> {
        let mut config = match &self.config {
            Some(path) => WatcherConfig::load(path)
                .with_context(|| format!("Failed to load config {}", path.display()))?,
            None => WatcherConfig::default(),
        };

        if let Some(method) = self.method {
            config.method = method;
        }
        if let Some(secs) = self.inactive_secs {
            config.inactive = Duration::from_secs(secs);
        }
        if let Some(secs) = self.silence_secs {
            config.silence = Duration::from_secs(secs);
        }
        if self.emit_silence {
            config.emit_silence = true;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn matcher(&self) -> Result<FileMatcher> {
        if !self.glob.is_empty() {
            return Ok(FileMatcher::globs(&self.glob)?);
        }

        Ok(match &self.suffix {
            Some(suffix) => FileMatcher::suffix(suffix),
            None => FileMatcher::any(),
        })
    }
}

pub async fn run(args: WatchArgs) -> Result<()> {
    let config = args.watcher_config()?;
    let matcher = args.matcher()?;

    let (watcher, mut streams) =
        FileWatcher::with_config(config).context("Failed to start file watcher")?;

    let result = watch_until(
        &watcher,
        &mut streams,
        &args.dir,
        args.recursive,
        matcher,
        tokio::signal::ctrl_c(),
        |event| println!("{}", util::format_event(event)),
    )
    .await;

    watcher.stop();
    result
}

/// Report events for `dir` until `interrupted` resolves
///
/// The streams are drained while the initial scan is still running.
async fn watch_until<F>(
    watcher: &FileWatcher,
    streams: &mut WatchStreams,
    dir: &Path,
    recursive: bool,
    matcher: FileMatcher,
    interrupted: F,
    mut on_event: impl FnMut(&WatchEvent),
) -> Result<()>
where
    F: Future<Output = io::Result<()>>,
{
    let watching = watcher.watch_dir(dir, recursive, matcher);
    tokio::pin!(watching, interrupted);
    let mut scanning = true;

    loop {
        tokio::select! {
            res = &mut watching, if scanning => {
                res.with_context(|| format!("Failed to watch {}", dir.display()))?;
                scanning = false;
                println!(
                    "{} {} ({}, tick {:?})",
                    "Watching".green().bold(),
                    dir.display(),
                    watcher.method(),
                    watcher.scan_interval()
                );
            }
            res = &mut interrupted => {
                res.context("Failed to listen for Ctrl-C")?;
                info!("Interrupted, stopping watcher");
                break;
            }
            event = streams.events.recv() => match event {
                Some(event) => on_event(&event),
                None => break,
            },
            err = streams.errors.recv() => match err {
                Some(err) => warn!("--> error: {}", err),
                None => break,
            },
        }
    }

    Ok(())
}
