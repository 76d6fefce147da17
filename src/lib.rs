//! LogIt - account storage and session tracking for game-server login protection
//!
//! This library provides the persistence and identity core of a login
//! add-on: credentials and account attributes stored across interchangeable
//! backends, an authoritative in-memory account cache, per-player session
//! state with idle timeouts and forced login, and backup/restore of the
//! accounts unit.
//!
//! # Architecture
//!
//! The crate is organized into the following modules:
//!
//! - `config`: Configuration and path management
//! - `error`: Custom error types
//! - `storage`: Backend-agnostic units and entries (SQLite, PostgreSQL, CSV)
//! - `crypto`: Password hashing and salt generation
//! - `accounts`: The write-through account cache
//! - `session`: Session lifecycle and forced-login policy
//! - `backup`: Backup creation, retention and restore
//! - `core`: Wires everything together and runs the periodic tasks
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use logit::clock::SystemClock;
//! use logit::config::paths::LogItPaths;
//! use logit::core::LogItCore;
//!
//! let mut core = LogItCore::new(LogItPaths::new()?, Arc::new(SystemClock))?;
//! core.start()?;
//! core.accounts()?.create_account("alice", "secret", "127.0.0.1")?;
//! ```

pub mod accounts;
pub mod backup;
pub mod cli;
pub mod clock;
pub mod config;
pub mod core;
pub mod crypto;
pub mod error;
pub mod logging;
pub mod migration;
pub mod scheduler;
pub mod session;
pub mod storage;

pub use error::{LogItError, LogItResult};
