//! Custom error types for LogIt
//!
//! Every failure the core can report funnels into [`LogItError`]. Callers
//! decide whether a kind is fatal (schema setup, backend connection,
//! configuration) or recoverable (a single restore, a duplicate
//! registration) with [`LogItError::is_fatal`] and
//! [`LogItError::is_constraint`].

use thiserror::Error;

/// The main error type for LogIt operations
#[derive(Error, Debug)]
pub enum LogItError {
    /// The storage backend could not be reached or is misconfigured
    #[error("Connection error: {0}")]
    Connection(String),

    /// A unit or key could not be created
    #[error("Schema error: {0}")]
    Schema(String),

    /// File I/O errors (backup files, session side file, CSV units)
    #[error("I/O error: {0}")]
    Io(String),

    /// Any other backend failure
    #[error("Storage error: {0}")]
    Storage(String),

    /// A buffered batch could not be flushed
    #[error("Batch error: {0}")]
    Batch(String),

    /// Entity not found errors
    #[error("{entity_type} not found: {identifier}")]
    NotFound {
        entity_type: &'static str,
        identifier: String,
    },

    /// Duplicate entity errors
    #[error("{entity_type} already exists: {identifier}")]
    Duplicate {
        entity_type: &'static str,
        identifier: String,
    },

    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Password hashing errors
    #[error("Hashing error: {0}")]
    Hashing(String),

    /// Invalid input
    #[error("Validation error: {0}")]
    Validation(String),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(String),

    /// YAML serialization/deserialization errors
    #[error("YAML error: {0}")]
    Yaml(String),
}

impl LogItError {
    /// Create a "not found" error for accounts
    pub fn account_not_found(username: impl Into<String>) -> Self {
        Self::NotFound {
            entity_type: "Account",
            identifier: username.into(),
        }
    }

    /// Create a "duplicate" error for accounts
    pub fn account_exists(username: impl Into<String>) -> Self {
        Self::Duplicate {
            entity_type: "Account",
            identifier: username.into(),
        }
    }

    /// Create a "not found" error for backups
    pub fn backup_not_found(filename: impl Into<String>) -> Self {
        Self::NotFound {
            entity_type: "Backup",
            identifier: filename.into(),
        }
    }

    /// Check if this is a "not found" error
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Duplicate registration or a keyed operation on a missing entity
    pub fn is_constraint(&self) -> bool {
        matches!(self, Self::NotFound { .. } | Self::Duplicate { .. })
    }

    /// Errors that must stop the subsystem when raised during startup
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Connection(_) | Self::Schema(_) | Self::Config(_)
        )
    }
}

// Implement From traits for common error types

impl From<std::io::Error> for LogItError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<serde_json::Error> for LogItError {
    fn from(err: serde_json::Error) -> Self {
        Self::Json(err.to_string())
    }
}

impl From<serde_yaml::Error> for LogItError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::Yaml(err.to_string())
    }
}

impl From<rusqlite::Error> for LogItError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Storage(err.to_string())
    }
}

impl From<csv::Error> for LogItError {
    fn from(err: csv::Error) -> Self {
        Self::Storage(err.to_string())
    }
}

#[cfg(feature = "postgres")]
impl From<postgres::Error> for LogItError {
    fn from(err: postgres::Error) -> Self {
        Self::Storage(err.to_string())
    }
}

/// Result type alias for LogIt operations
pub type LogItResult<T> = Result<T, LogItError>;
