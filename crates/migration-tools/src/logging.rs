//! Tracing setup for the `histmig` binary.
//!
//! Events always go to stderr. With `--log-file` they are also appended,
//! without ANSI colours, to the given file through a background writer.

use std::fs::OpenOptions;
use std::path::Path;

use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use crate::error::{MigrationError, MigrationResult};

/// Filter from `RUST_LOG`, falling back to `debug` or `info`.
pub fn env_filter(verbose: bool) -> EnvFilter {
    let default = if verbose { "debug" } else { "info" };
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default))
}

/// Background writer appending to `path`, created if missing.
///
/// Buffered lines are flushed when the returned guard is dropped.
pub fn file_writer(path: &Path) -> MigrationResult<(NonBlocking, WorkerGuard)> {
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|err| {
            MigrationError::Config(format!("cannot open log file {}: {err}", path.display()))
        })?;
    Ok(tracing_appender::non_blocking(file))
}

/// Install the global subscriber. Keep the guard alive until exit.
pub fn init(verbose: bool, log_file: Option<&Path>) -> MigrationResult<Option<WorkerGuard>> {
    let (file_layer, guard) = match log_file {
        Some(path) => {
            let (writer, guard) = file_writer(path)?;
            (
                Some(fmt::layer().with_ansi(false).with_writer(writer)),
                Some(guard),
            )
        }
        None => (None, None),
    };
    tracing_subscriber::registry()
        .with(env_filter(verbose))
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(file_layer)
        .init();
    Ok(guard)
}
