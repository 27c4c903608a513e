//! Diagnostic logging setup
//!
//! Console output plus an optional daily-rolling file. Run output such as
//! loss curves goes through [`crate::output`] instead.

use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use crate::config::LoggingConfig;

const LOG_FILE_NAME: &str = "smoothing-harness.log";

/// Install the global subscriber. Keep the returned guard alive until exit
/// so buffered file lines are flushed.
pub fn init_logging(config: &LoggingConfig) -> Option<WorkerGuard> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    let (file_layer, guard) = match config.log_dir.as_deref().filter(|dir| writable(dir)) {
        Some(dir) => {
            // rolling::daily panics if the first file cannot be created
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_NAME);
            let (non_blocking, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_target(true);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    let (plain, json) = if config.json {
        (None, Some(tracing_subscriber::fmt::layer().json().with_target(true)))
    } else {
        (
            Some(
                tracing_subscriber::fmt::layer()
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false),
            ),
            None,
        )
    };

    let file_logging_enabled = file_layer.is_some();
    let installed = tracing_subscriber::registry()
        .with(filter)
        .with(plain)
        .with(json)
        .with(file_layer)
        .try_init();

    if installed.is_err() {
        eprintln!("Warning: a global tracing subscriber is already installed");
    } else if let (true, Some(dir)) = (file_logging_enabled, config.log_dir.as_ref()) {
        eprintln!("Logging to: {}/{}", dir.display(), LOG_FILE_NAME);
    }
    guard
}

fn writable(dir: &Path) -> bool {
    if let Err(e) = std::fs::create_dir_all(dir) {
        eprintln!(
            "Warning: Could not create log directory {} ({}), file logging disabled",
            dir.display(),
            e
        );
        return false;
    }
    let probe = dir.join(".smoothing_write_test");
    match std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&probe)
    {
        Ok(_) => {
            let _ = std::fs::remove_file(&probe);
            true
        }
        Err(e) => {
            eprintln!(
                "Warning: Could not write to log directory {} ({}), file logging disabled",
                dir.display(),
                e
            );
            false
        }
    }
}
