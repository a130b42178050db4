//! # Logging Setup
//!
//! Installs the process-wide `tracing` subscriber:
//!
//! - an `EnvFilter` taken from `RUST_LOG`, falling back to the configured level,
//! - a console layer with targets and ANSI colors,
//! - optionally a JSON layer writing to a daily-rolling file through a
//!   non-blocking appender.
//!
//! The returned `WorkerGuard` flushes the file writer when dropped, so the
//! caller keeps it alive until shutdown.

use std::fs;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::{non_blocking, rolling};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use crate::configs::LoggingConfig;
use crate::errors::{ProviderError, Result};

/// Installs the global subscriber described by `config`.
///
/// Returns the file writer's guard when file logging is enabled.
pub fn setup_logging(config: &LoggingConfig) -> Result<Option<WorkerGuard>> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .map_err(|e| ProviderError::Config(format!("Invalid log level '{}': {}", config.level, e)))?;

    let console_layer = fmt::layer().with_target(true).with_ansi(true);

    let (file_layer, guard) = if config.file_enabled {
        fs::create_dir_all(&config.dir)?;
        let file_appender = rolling::daily(&config.dir, &config.file_prefix);
        let (writer, guard) = non_blocking(file_appender);
        let layer = fmt::layer().with_ansi(false).with_writer(writer).json();
        (Some(layer), Some(guard))
    } else {
        (None, None)
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| ProviderError::Config(format!("Logging already initialized: {}", e)))?;

    tracing::info!(level = %config.level, dir = %config.dir.display(), "Logging initialized");
    Ok(guard)
}
