//! Tracing subscriber setup
//!
//! Console output filtered by `RUST_LOG` (default `logit=info`), plus an
//! optional plain-text log file in the data directory.

use std::fs::OpenOptions;
use std::sync::Mutex;

use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

use crate::config::paths::LogItPaths;
use crate::config::settings::LogSettings;
use crate::error::{LogItError, LogItResult};

const DEFAULT_DIRECTIVE: &str = "logit=info";

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_DIRECTIVE))
}

/// Install the global subscriber
///
/// Fails if the log file cannot be opened or a subscriber is already set.
pub fn init_logging(settings: &LogSettings, paths: &LogItPaths) -> LogItResult<()> {
    let file_layer = if settings.enabled {
        paths.ensure_directories()?;
        let path = paths.data_file(&settings.filename);
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| LogItError::Io(format!("Failed to open log file {}: {}", path.display(), e)))?;
        Some(
            fmt::layer()
                .with_ansi(false)
                .with_target(false)
                .with_writer(Mutex::new(file)),
        )
    } else {
        None
    };

    tracing_subscriber::registry()
        .with(env_filter())
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .with(file_layer)
        .try_init()
        .map_err(|e| LogItError::Config(format!("Failed to initialize logging: {}", e)))
}
