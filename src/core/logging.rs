//! Tracing setup: stderr plus an optional daily-rotated log file.
//!
//! Files are named `<dir>/autoarchive.YYYY-MM-DD.log`; only the newest
//! [`MAX_LOG_FILES`] are kept.

use crate::core::error::ArchiveError;
use std::fs;
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{EnvFilter, Layer, layer::SubscriberExt, util::SubscriberInitExt};

const DEFAULT_LOG_FILTER: &str = "autoarchive=info";
const LOG_PREFIX: &str = "autoarchive";
const LOG_SUFFIX: &str = "log";
pub const MAX_LOG_FILES: usize = 14;

pub struct LogConfig<'a> {
    pub log_dir: Option<&'a Path>,
    pub verbose: bool,
}

/// Daily appender under `dir`, pruned to the newest [`MAX_LOG_FILES`].
pub fn file_appender(dir: &Path) -> Result<RollingFileAppender, ArchiveError> {
    fs::create_dir_all(dir)?;
    RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix(LOG_PREFIX)
        .filename_suffix(LOG_SUFFIX)
        .max_log_files(MAX_LOG_FILES)
        .build(dir)
        .map_err(|e| {
            ArchiveError::ConfigError(format!("cannot open log dir {}: {}", dir.display(), e))
        })
}

/// Install the global subscriber. The returned guard flushes the file
/// writer on drop, so callers hold it for the rest of the command.
pub fn init_logging(config: LogConfig<'_>) -> Result<Option<WorkerGuard>, ArchiveError> {
    let filter = || {
        if config.verbose {
            EnvFilter::new("autoarchive=debug")
        } else {
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER))
        }
    };

    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_filter(filter());

    let mut guard = None;
    let file_layer = match config.log_dir {
        Some(dir) => {
            let (writer, worker) = tracing_appender::non_blocking(file_appender(dir)?);
            guard = Some(worker);
            Some(
                tracing_subscriber::fmt::layer()
                    .with_writer(writer)
                    .with_ansi(false)
                    .with_filter(filter()),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| ArchiveError::ConfigError(format!("logging already initialised: {}", e)))?;
    Ok(guard)
}
