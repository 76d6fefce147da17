//! Configuration module for LogIt
//!
//! This module provides configuration management including:
//! - Data-directory path resolution
//! - The `config.yml` settings file

pub mod paths;
pub mod settings;

pub use paths::LogItPaths;
pub use settings::{Settings, StorageBackend};
