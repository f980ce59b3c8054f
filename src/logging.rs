use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Log file written inside the configured log directory.
const LOG_FILE_NAME: &str = "equipment-manager.log";

/// Route `tracing` output to a file. The terminal belongs to the UI, so
/// nothing is ever written to stdout or stderr. `RUST_LOG` controls the level
/// and defaults to `info`.
///
/// The returned guard flushes pending lines on drop and must live until the
/// program exits.
pub fn init_logging(log_dir: &Path) -> Result<WorkerGuard> {
    fs::create_dir_all(log_dir).context("failed to create log directory")?;

    let appender = tracing_appender::rolling::never(log_dir, LOG_FILE_NAME);
    let (writer, guard) = tracing_appender::non_blocking(appender);

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(writer).with_ansi(false))
        .with(filter)
        .try_init()
        .context("failed to install log subscriber")?;

    Ok(guard)
}
