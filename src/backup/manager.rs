//! Backup manager for LogIt
//!
//! Snapshots the accounts unit into standalone SQLite files named by a
//! timestamp format, lists and trims them, and drives the backup schedule.

use std::fmt::Write as _;
use std::fs::{self, OpenOptions};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use super::restore::{RestoreManager, RestoreResult};
use crate::accounts::AccountManager;
use crate::clock::Clock;
use crate::config::paths::LogItPaths;
use crate::config::settings::BackupSettings;
use crate::error::{LogItError, LogItResult};
use crate::storage::{BatchGuard, Entry, Key, SqliteStorage, Storage};

/// Metadata about a backup file
#[derive(Debug, Clone)]
pub struct BackupInfo {
    pub filename: String,
    pub path: PathBuf,
    pub size_bytes: u64,
    pub modified: Option<DateTime<Utc>>,
}

/// Manages backup creation, listing and retention
pub struct BackupManager {
    accounts: Arc<AccountManager>,
    clock: Arc<dyn Clock>,
    backup_dir: PathBuf,
    settings: BackupSettings,
    /// Start of the current schedule interval
    last_backup: DateTime<Utc>,
}

impl BackupManager {
    pub fn new(
        accounts: Arc<AccountManager>,
        clock: Arc<dyn Clock>,
        paths: &LogItPaths,
        settings: BackupSettings,
    ) -> Self {
        let backup_dir = paths.data_file(&settings.path);
        let last_backup = clock.now();
        Self {
            accounts,
            clock,
            backup_dir,
            settings,
            last_backup,
        }
    }

    pub fn backup_dir(&self) -> &Path {
        &self.backup_dir
    }

    fn backup_filename(&self, now: DateTime<Utc>) -> LogItResult<String> {
        let mut filename = String::new();
        write!(filename, "{}", now.format(&self.settings.filename_format)).map_err(|_| {
            LogItError::Config(format!(
                "Invalid backup filename format: {}",
                self.settings.filename_format
            ))
        })?;
        if filename.is_empty() || filename.contains(['/', '\\']) {
            return Err(LogItError::Config(format!(
                "Backup filename format yields an unusable name: {:?}",
                filename
            )));
        }
        Ok(filename)
    }

    /// Snapshot every account entry into a new backup file
    ///
    /// The live store is only read. An existing file with the same name is an
    /// error; a partially written file is removed again.
    pub fn create_backup(&self) -> LogItResult<PathBuf> {
        fs::create_dir_all(&self.backup_dir)
            .map_err(|e| LogItError::Io(format!("Failed to create backup directory: {}", e)))?;

        let filename = self.backup_filename(self.clock.now())?;
        let path = self.backup_dir.join(&filename);

        OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .map_err(|e| match e.kind() {
                ErrorKind::AlreadyExists => {
                    LogItError::Io(format!("Backup file already exists: {}", filename))
                }
                _ => LogItError::Io(format!("Failed to create backup file {}: {}", filename, e)),
            })?;

        let unit = self.accounts.unit().to_string();
        let written = self
            .accounts
            .with_storage(|live| Ok((live.get_keys(&unit)?, live.select_entries(&unit, None)?)))
            .and_then(|(keys, entries)| write_backup(&path, &unit, &keys, entries));

        match written {
            Ok(count) => {
                info!(filename = %filename, entries = count, "backup created");
                Ok(path)
            }
            Err(e) => {
                let _ = fs::remove_file(&path);
                Err(e)
            }
        }
    }

    /// Backup files in the backup directory
    ///
    /// Filenames are timestamp-formatted, so alphabetical order is oldest
    /// first. Without sorting the order is whatever the directory yields.
    pub fn get_backups(&self, sort_alphabetically: bool) -> LogItResult<Vec<BackupInfo>> {
        if !self.backup_dir.exists() {
            return Ok(Vec::new());
        }

        let mut backups = Vec::new();
        for entry in fs::read_dir(&self.backup_dir)
            .map_err(|e| LogItError::Io(format!("Failed to read backup directory: {}", e)))?
        {
            let entry = entry
                .map_err(|e| LogItError::Io(format!("Failed to read directory entry: {}", e)))?;
            let metadata = match entry.metadata() {
                Ok(metadata) if metadata.is_file() => metadata,
                _ => continue,
            };
            backups.push(BackupInfo {
                filename: entry.file_name().to_string_lossy().into_owned(),
                path: entry.path(),
                size_bytes: metadata.len(),
                modified: metadata.modified().ok().map(DateTime::<Utc>::from),
            });
        }

        if sort_alphabetically {
            backups.sort_by(|a, b| a.filename.cmp(&b.filename));
        }
        Ok(backups)
    }

    /// Path of an existing backup, or `None`
    pub fn get_backup_file(&self, filename: &str) -> Option<PathBuf> {
        if filename.is_empty() || filename.contains(['/', '\\']) || filename == ".." {
            return None;
        }
        let path = self.backup_dir.join(filename);
        path.is_file().then_some(path)
    }

    /// Delete up to `amount` backups, oldest first
    ///
    /// Returns the number of files deleted.
    pub fn remove_backups(&self, amount: usize) -> LogItResult<usize> {
        let mut removed = 0;
        for backup in self.get_backups(true)?.into_iter().take(amount) {
            fs::remove_file(&backup.path).map_err(|e| {
                LogItError::Io(format!("Failed to delete backup {}: {}", backup.filename, e))
            })?;
            removed += 1;
        }
        info!(removed, "backups removed");
        Ok(removed)
    }

    /// Restore the named backup into the live accounts unit
    pub fn restore_backup(&self, filename: &str) -> LogItResult<RestoreResult> {
        let path = self
            .get_backup_file(filename)
            .ok_or_else(|| LogItError::backup_not_found(filename))?;
        RestoreManager::new(Arc::clone(&self.accounts)).restore_from_file(&path)
    }

    /// Scheduled backup, run from the periodic task
    ///
    /// Once the configured interval has elapsed a backup is created and the
    /// directory trimmed to the retention count. Failures are logged and the
    /// interval restarts either way. Returns the new backup, if any.
    pub fn tick(&mut self) -> Option<PathBuf> {
        if !self.settings.schedule.enabled {
            return None;
        }

        let now = self.clock.now();
        let interval = match self.settings.schedule.interval() {
            Ok(interval) => interval,
            Err(e) => {
                warn!(error = %e, "scheduled backups skipped");
                return None;
            }
        };
        if now - self.last_backup < interval {
            return None;
        }
        self.last_backup = now;

        let created = match self.create_backup() {
            Ok(path) => Some(path),
            Err(e) => {
                warn!(error = %e, "scheduled backup failed");
                None
            }
        };

        if self.settings.retention > 0 {
            if let Err(e) = self.enforce_retention(self.settings.retention as usize) {
                warn!(error = %e, "failed to trim old backups");
            }
        }
        created
    }

    /// Delete the oldest backups beyond `keep`
    pub fn enforce_retention(&self, keep: usize) -> LogItResult<usize> {
        let count = self.get_backups(false)?.len();
        if count <= keep {
            return Ok(0);
        }
        self.remove_backups(count - keep)
    }
}

/// Mirror the live schema into a fresh backup file and copy every entry
fn write_backup(path: &Path, unit: &str, keys: &[Key], entries: Vec<Entry>) -> LogItResult<usize> {
    let mut backup = SqliteStorage::new(path);
    backup.connect()?;
    backup.create_unit_if_not_exists(unit, keys)?;

    let mut batch = BatchGuard::begin(&mut backup);
    for entry in entries {
        batch.add_entry(unit, entry)?;
    }
    let count = batch.commit()?;

    backup.close()?;
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accounts::AccountColumns;
    use crate::clock::ManualClock;
    use crate::crypto::{HashingAlgorithm, PasswordHasher};
    use crate::storage::CsvStorage;
    use chrono::{Duration, TimeZone};
    use tempfile::TempDir;

    struct Fixture {
        _dir: TempDir,
        paths: LogItPaths,
        accounts: Arc<AccountManager>,
        clock: ManualClock,
    }

    fn fixture() -> Fixture {
        let dir = TempDir::new().unwrap();
        let paths = LogItPaths::with_base_dir(dir.path().to_path_buf());
        let mut storage = SqliteStorage::new(paths.data_file("accounts.db"));
        storage.connect().unwrap();
        let accounts = Arc::new(AccountManager::new(
            Box::new(storage),
            "accounts",
            AccountColumns::default(),
            PasswordHasher::new(HashingAlgorithm::Sha256, true),
        ));
        accounts.initialize().unwrap();
        Fixture {
            _dir: dir,
            paths,
            accounts,
            clock: ManualClock::new(Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()),
        }
    }

    fn manager(f: &Fixture, settings: BackupSettings) -> BackupManager {
        BackupManager::new(
            Arc::clone(&f.accounts),
            Arc::new(f.clock.clone()),
            &f.paths,
            settings,
        )
    }

    #[test]
    fn test_backup_copies_every_entry() {
        let f = fixture();
        f.accounts.create_account("alice", "p1", "").unwrap();
        f.accounts.create_account("bob", "p2", "").unwrap();
        let backups = manager(&f, BackupSettings::default());

        let path = backups.create_backup().unwrap();
        assert_eq!(
            path.file_name().unwrap().to_string_lossy(),
            "2024-06-01_12-00-00.db"
        );

        let mut copy = SqliteStorage::new(&path);
        copy.connect().unwrap();
        assert_eq!(
            copy.get_keys("accounts").unwrap(),
            AccountColumns::default().keys()
        );
        assert_eq!(copy.select_entries("accounts", None).unwrap().len(), 2);
    }

    #[test]
    fn test_name_collision_is_an_error() {
        let f = fixture();
        let backups = manager(&f, BackupSettings::default());

        let first = backups.create_backup().unwrap();
        let size = fs::metadata(&first).unwrap().len();
        let err = backups.create_backup().unwrap_err();

        assert!(matches!(err, LogItError::Io(_)));
        assert_eq!(fs::metadata(&first).unwrap().len(), size);
        assert_eq!(backups.get_backups(false).unwrap().len(), 1);
    }

    #[test]
    fn test_failed_backup_leaves_no_file() {
        let dir = TempDir::new().unwrap();
        let paths = LogItPaths::with_base_dir(dir.path().to_path_buf());
        let mut storage = CsvStorage::new(paths.data_file("units"));
        storage.connect().unwrap();
        let accounts = Arc::new(AccountManager::new(
            Box::new(storage),
            "accounts",
            AccountColumns::default(),
            PasswordHasher::new(HashingAlgorithm::Plain, false),
        ));
        accounts.initialize().unwrap();
        fs::remove_file(paths.data_file("units/accounts.csv")).unwrap();

        let backups = BackupManager::new(
            accounts,
            Arc::new(ManualClock::new(Utc::now())),
            &paths,
            BackupSettings::default(),
        );
        assert!(backups.create_backup().is_err());
        assert!(backups.get_backups(false).unwrap().is_empty());
    }

    #[test]
    fn test_remove_backups_oldest_first() {
        let f = fixture();
        let backups = manager(&f, BackupSettings::default());
        for _ in 0..3 {
            backups.create_backup().unwrap();
            f.clock.advance(Duration::minutes(1));
        }

        assert_eq!(backups.remove_backups(2).unwrap(), 2);
        let left: Vec<String> = backups
            .get_backups(true)
            .unwrap()
            .into_iter()
            .map(|b| b.filename)
            .collect();
        assert_eq!(left, vec!["2024-06-01_12-02-00.db"]);

        assert_eq!(backups.remove_backups(5).unwrap(), 1);
    }

    #[test]
    fn test_get_backup_file() {
        let f = fixture();
        let backups = manager(&f, BackupSettings::default());
        let path = backups.create_backup().unwrap();

        assert_eq!(backups.get_backup_file("2024-06-01_12-00-00.db"), Some(path));
        assert_eq!(backups.get_backup_file("missing.db"), None);
        assert_eq!(backups.get_backup_file("../accounts.db"), None);
    }

    #[test]
    fn test_schedule_and_retention() {
        let f = fixture();
        let mut settings = BackupSettings::default();
        settings.schedule.enabled = true;
        settings.schedule.interval_secs = 60;
        settings.retention = 2;
        let mut backups = manager(&f, settings);

        f.clock.advance(Duration::seconds(59));
        assert!(backups.tick().is_none());

        for _ in 0..3 {
            f.clock.advance(Duration::seconds(60));
            assert!(backups.tick().is_some());
        }

        let left: Vec<String> = backups
            .get_backups(true)
            .unwrap()
            .into_iter()
            .map(|b| b.filename)
            .collect();
        assert_eq!(left, vec!["2024-06-01_12-02-59.db", "2024-06-01_12-03-59.db"]);
    }

    #[test]
    fn test_disabled_schedule_never_fires() {
        let f = fixture();
        let mut backups = manager(&f, BackupSettings::default());
        f.clock.advance(Duration::days(1));
        assert!(backups.tick().is_none());
    }

    #[test]
    fn test_out_of_range_interval_never_fires() {
        let f = fixture();
        let mut settings = BackupSettings::default();
        settings.schedule.enabled = true;
        settings.schedule.interval_secs = u64::MAX;
        let mut backups = manager(&f, settings);

        f.clock.advance(Duration::days(1));
        assert!(backups.tick().is_none());
        assert!(backups.get_backups(true).unwrap().is_empty());
    }
}
