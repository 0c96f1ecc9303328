//! Logging bring-up for the acceleration runtime
//!
//! Installs a `tracing` subscriber described by [`LoggingConfig`]. `RUST_LOG`
//! takes precedence over the configured level.

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::EnvFilter;

use accel_common::{Error, Result};
use accel_config::{LogFormat, LoggingConfig};

/// File name prefix for rolling log files
const LOG_FILE_PREFIX: &str = "accel-runtime.log";

/// Installs the global subscriber
///
/// Returns the appender guard when logging to files; keep it alive for the
/// lifetime of the process. Calling this when a subscriber is already
/// installed leaves the existing one in place.
pub fn init(config: &LoggingConfig) -> Result<Option<WorkerGuard>> {
    let filter = build_filter(&config.level)?;

    let (writer, guard) = match &config.directory {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (non_blocking, guard) = tracing_appender::non_blocking(appender);
            (BoxMakeWriter::new(non_blocking), Some(guard))
        }
        None => (BoxMakeWriter::new(std::io::stderr), None),
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(config.with_target)
        .with_writer(writer);

    let installed = match config.format {
        LogFormat::Json => builder.json().try_init(),
        LogFormat::Pretty => builder.try_init(),
    };

    if installed.is_err() {
        tracing::debug!("A tracing subscriber is already installed; keeping it");
    }

    Ok(guard)
}

/// Builds the filter, preferring `RUST_LOG` when set
fn build_filter(level: &str) -> Result<EnvFilter> {
    match EnvFilter::try_from_default_env() {
        Ok(filter) => Ok(filter),
        Err(_) => EnvFilter::try_new(level)
            .map_err(|e| Error::Config(format!("Invalid log filter '{}': {}", level, e))),
    }
}
