//! Backup system for LogIt
//!
//! Snapshots of the accounts unit, written as standalone SQLite files
//! regardless of the live backend.
//!
//! # Architecture
//!
//! - `BackupManager`: creates, lists, trims and schedules backups
//! - `RestoreManager`: validates and restores backups
//!
//! # Backup Format
//!
//! One SQLite database per backup holding a single unit with the same name
//! and keys as the live accounts unit. Filenames come from a chrono strftime
//! pattern (`%Y-%m-%d_%H-%M-%S.db` by default), so they sort oldest first.
//!
//! # Example
//!
//! ```rust,ignore
//! use logit::backup::BackupManager;
//!
//! let backups = BackupManager::new(accounts, clock, &paths, settings.backup.clone());
//! let path = backups.create_backup()?;
//!
//! // Later, restore from backup
//! let result = backups.restore_backup("2024-06-01_12-00-00.db")?;
//! println!("{}", result.summary());
//! ```

mod manager;
mod restore;

pub use manager::{BackupInfo, BackupManager};
pub use restore::{RestoreManager, RestoreResult, ValidationResult};
