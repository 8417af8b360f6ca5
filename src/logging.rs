use anyhow::{Context, Result};
use camino::Utf8Path;
use std::fs;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Build the log filter: `RUST_LOG` if set, otherwise `debug` or `info`.
pub fn env_filter(debug_mode: bool) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if debug_mode {
            EnvFilter::new("debug")
        } else {
            EnvFilter::new("info")
        }
    })
}

/// Setup console logging with an optional rotating file appender.
///
/// # Arguments
/// * `debug_mode` - If true, use debug level; otherwise use info level
/// * `log_dir` - If set, also write daily rotated `music-sync.*` files there
///
/// # Returns
/// The file appender guard when file logging is enabled. It must be held for
/// the duration of the program so buffered lines are flushed.
pub fn setup_logging(debug_mode: bool, log_dir: Option<&Utf8Path>) -> Result<Option<WorkerGuard>> {
    let console_layer = tracing_subscriber::fmt::layer()
        .with_ansi(true)
        .with_target(false);

    let (file_layer, guard) = match log_dir {
        Some(log_dir) => {
            if !log_dir.exists() {
                fs::create_dir_all(log_dir)
                    .with_context(|| format!("Failed to create log directory: {}", log_dir))?;
            }

            let file_appender = rolling::daily(log_dir, "music-sync");
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

            let file_layer = tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false) // No ANSI codes in log files
                .with_target(true)
                .with_thread_ids(true)
                .with_file(true)
                .with_line_number(true);

            (Some(file_layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(env_filter(debug_mode))
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .context("Failed to initialize logging")?;

    match log_dir {
        Some(log_dir) => tracing::info!(
            "Logging initialized: dir={}, debug={}",
            log_dir,
            debug_mode
        ),
        None => tracing::debug!("Logging initialized: console only, debug={}", debug_mode),
    }

    Ok(guard)
}

#[cfg(test)]
mod tests {
    use super::*;
    use camino::Utf8PathBuf;
    use tempfile::TempDir;

    // The only test in this binary that installs the global subscriber, so
    // the first call is guaranteed to succeed.
    #[test]
    fn test_setup_logging_with_file_then_console_only() {
        let temp_dir = TempDir::new().unwrap();
        let log_dir = Utf8PathBuf::try_from(temp_dir.path().join("logs")).unwrap();

        let guard = setup_logging(false, Some(&log_dir)).unwrap();
        assert!(guard.is_some());
        assert!(log_dir.exists());

        tracing::info!("written to the rolling file");

        // A second global subscriber is refused instead of panicking
        assert!(setup_logging(true, None).is_err());
    }
}
