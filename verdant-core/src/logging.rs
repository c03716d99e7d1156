//! File logging
//!
//! One daily-rotated log file under the XDG state directory
//! (`~/.local/state/verdant/`), written through a non-blocking worker.
//! Rotation keeps at most `LoggingConfig.max_files` files on disk; the
//! filter comes from `RUST_LOG` when set, otherwise from the configured
//! level.

use crate::config::{Config, LoggingConfig};
use crate::error::{Error, Result};
use std::path::PathBuf;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Keeps the log worker alive; dropping it flushes pending writes
pub struct LoggingGuard {
    _worker: WorkerGuard,
}

fn rolling_appender(dir: &PathBuf, max_files: usize) -> Result<RollingFileAppender> {
    RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix("verdant.log")
        .max_log_files(max_files.max(1))
        .build(dir)
        .map_err(|e| Error::Config(format!("log rotation setup failed: {}", e)))
}

/// Install the global subscriber writing to the state directory.
///
/// Call once at startup and hold the returned guard for the process
/// lifetime.
pub fn init(config: &LoggingConfig) -> Result<LoggingGuard> {
    let log_dir = Config::state_dir();
    std::fs::create_dir_all(&log_dir)?;

    let appender = rolling_appender(&log_dir, config.max_files)?;
    let (writer, worker) = tracing_appender::non_blocking(appender);

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_target(true),
        )
        .init();

    tracing::info!(
        dir = %log_dir.display(),
        level = %config.level,
        max_files = config.max_files,
        "Logging started"
    );

    Ok(LoggingGuard { _worker: worker })
}

/// Subscriber for tests, writing to the captured test output
pub fn init_test() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Current log file location
pub fn log_file_path() -> PathBuf {
    Config::log_path()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_file_path() {
        assert!(log_file_path().ends_with("verdant.log"));
    }

    #[test]
    fn test_rolling_appender_from_config() {
        let dir = tempfile::tempdir().unwrap();
        let config = LoggingConfig {
            level: "debug".to_string(),
            max_files: 2,
        };
        assert!(rolling_appender(&dir.path().to_path_buf(), config.max_files).is_ok());
        // A zero cap is clamped rather than rejected
        assert!(rolling_appender(&dir.path().to_path_buf(), 0).is_ok());
    }
}
