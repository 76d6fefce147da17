//! Path management for LogIt
//!
//! Resolves the data directory holding the configuration file, the
//! file-based account stores, backups and the session side file.
//!
//! ## Path Resolution Order
//!
//! 1. `LOGIT_DATA_DIR` environment variable (if set)
//! 2. Unix (Linux/macOS): `$XDG_CONFIG_HOME/logit` or `~/.config/logit`
//! 3. Windows: `%APPDATA%\logit`

use std::path::{Path, PathBuf};

use crate::error::LogItError;

/// Manages all paths used by LogIt
#[derive(Debug, Clone)]
pub struct LogItPaths {
    /// Base directory for all LogIt data
    base_dir: PathBuf,
}

impl LogItPaths {
    /// Create a new LogItPaths instance
    ///
    /// # Errors
    ///
    /// Returns an error if no home or application-data directory can be
    /// determined.
    pub fn new() -> Result<Self, LogItError> {
        let base_dir = if let Ok(custom) = std::env::var("LOGIT_DATA_DIR") {
            PathBuf::from(custom)
        } else {
            resolve_default_path()?
        };

        Ok(Self { base_dir })
    }

    /// Create LogItPaths with a custom base directory (useful for testing)
    pub fn with_base_dir(base_dir: PathBuf) -> Self {
        Self { base_dir }
    }

    /// Get the base directory
    pub fn base_dir(&self) -> &PathBuf {
        &self.base_dir
    }

    /// Get the path to the settings file
    pub fn settings_file(&self) -> PathBuf {
        self.base_dir.join("config.yml")
    }

    /// Resolve a path relative to the data directory.
    ///
    /// Absolute paths are returned unchanged.
    pub fn data_file(&self, relative: impl AsRef<Path>) -> PathBuf {
        let relative = relative.as_ref();
        if relative.is_absolute() {
            relative.to_path_buf()
        } else {
            self.base_dir.join(relative)
        }
    }

    /// Ensure the base directory exists
    pub fn ensure_directories(&self) -> Result<(), LogItError> {
        std::fs::create_dir_all(&self.base_dir)
            .map_err(|e| LogItError::Io(format!("Failed to create data directory: {}", e)))?;

        Ok(())
    }

    /// Check if LogIt has been initialized (config file exists)
    pub fn is_initialized(&self) -> bool {
        self.settings_file().exists()
    }
}

/// Resolve the default data directory path based on platform
#[cfg(not(windows))]
fn resolve_default_path() -> Result<PathBuf, LogItError> {
    if let Ok(config_home) = std::env::var("XDG_CONFIG_HOME") {
        return Ok(PathBuf::from(config_home).join("logit"));
    }

    let base = directories::BaseDirs::new()
        .ok_or_else(|| LogItError::Config("Could not determine home directory".into()))?;
    Ok(base.home_dir().join(".config").join("logit"))
}

/// Resolve the default data directory path based on platform
#[cfg(windows)]
fn resolve_default_path() -> Result<PathBuf, LogItError> {
    let appdata = std::env::var("APPDATA")
        .map_err(|_| LogItError::Config("Could not determine APPDATA directory".into()))?;
    Ok(PathBuf::from(appdata).join("logit"))
}
