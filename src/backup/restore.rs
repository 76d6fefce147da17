//! Backup restoration for LogIt
//!
//! Replaces the live accounts unit with the contents of a backup file.

use std::path::Path;
use std::sync::Arc;

use tracing::{error, info};

use crate::accounts::AccountManager;
use crate::error::{LogItError, LogItResult};
use crate::storage::{BatchGuard, Entry, Key, SqliteStorage, Storage};

/// Handles restoring from backups
pub struct RestoreManager {
    accounts: Arc<AccountManager>,
}

/// Keys and entries read from a backup file
struct Snapshot {
    keys: Vec<Key>,
    entries: Vec<Entry>,
}

impl RestoreManager {
    /// Create a new RestoreManager
    pub fn new(accounts: Arc<AccountManager>) -> Self {
        Self { accounts }
    }

    fn read_snapshot(&self, backup_path: &Path) -> LogItResult<Snapshot> {
        if !backup_path.is_file() {
            return Err(LogItError::backup_not_found(backup_path.display().to_string()));
        }

        let unit = self.accounts.unit();
        let mut backup = SqliteStorage::new(backup_path);
        backup.connect()?;
        if !backup.unit_exists(unit)? {
            backup.close()?;
            return Err(LogItError::Validation(format!(
                "Backup {} has no {} unit",
                backup_path.display(),
                unit
            )));
        }
        let keys = backup.get_keys(unit)?;
        let entries = backup.select_entries(unit, None)?;
        backup.close()?;
        Ok(Snapshot { keys, entries })
    }

    /// Check that a backup can be restored without touching live data
    pub fn validate_backup(&self, backup_path: &Path) -> LogItResult<ValidationResult> {
        let snapshot = self.read_snapshot(backup_path)?;
        let username = self.accounts.columns().username.as_str();
        Ok(ValidationResult {
            entry_count: snapshot.entries.len(),
            key_count: snapshot.keys.len(),
            has_username_key: snapshot
                .keys
                .iter()
                .any(|k| k.name.eq_ignore_ascii_case(username)),
        })
    }

    /// Restore the accounts unit from a backup file
    ///
    /// Every live entry is erased and the backup's entries written, all in one
    /// batch, so a failed restore leaves the live unit as it was. Keys present
    /// only in the backup are added to the live unit first. The account cache
    /// is reloaded afterwards.
    pub fn restore_from_file(&self, backup_path: &Path) -> LogItResult<RestoreResult> {
        let snapshot = self.read_snapshot(backup_path)?;
        let unit = self.accounts.unit().to_string();

        let (entries_restored, keys_added) = self.accounts.with_storage(|live| {
            let live_keys = live.get_keys(&unit)?;
            let missing: Vec<Key> = snapshot
                .keys
                .iter()
                .filter(|k| !live_keys.iter().any(|l| l.name.eq_ignore_ascii_case(&k.name)))
                .cloned()
                .collect();

            let mut batch = BatchGuard::begin(live);
            for key in &missing {
                batch.add_key(&unit, key.clone())?;
            }
            batch.erase_unit(&unit)?;
            let entries_restored = snapshot.entries.len();
            for entry in &snapshot.entries {
                batch.add_entry(&unit, live_spelling(entry, &live_keys))?;
            }
            batch.commit()?;

            Ok((
                entries_restored,
                missing.into_iter().map(|k| k.name).collect::<Vec<_>>(),
            ))
        })?;

        let accounts_loaded = self.accounts.load_accounts().map_err(|e| {
            error!(
                backup = %backup_path.display(),
                error = %e,
                "backup written to storage but the account cache still holds the previous accounts"
            );
            LogItError::Storage(format!(
                "Backup restored to storage but the account cache could not be reloaded: {}",
                e
            ))
        })?;
        info!(
            backup = %backup_path.display(),
            entries = entries_restored,
            accounts = accounts_loaded,
            "backup restored"
        );

        Ok(RestoreResult {
            entries_restored,
            keys_added,
            accounts_loaded,
        })
    }
}

/// Rename the keys of a backup entry to the live unit's spelling
///
/// Keys match case-insensitively; keys the live unit lacks keep their name.
fn live_spelling(entry: &Entry, live_keys: &[Key]) -> Entry {
    let mut renamed = Entry::new();
    for (key, value) in entry.iter() {
        let name = live_keys
            .iter()
            .find(|l| l.name.eq_ignore_ascii_case(key))
            .map_or(key, |l| l.name.as_str());
        renamed.put(name, value);
    }
    renamed
}

/// Result of a restore operation
#[derive(Debug, Default)]
pub struct RestoreResult {
    pub entries_restored: usize,
    /// Keys that existed only in the backup
    pub keys_added: Vec<String>,
    pub accounts_loaded: usize,
}

impl RestoreResult {
    /// Get a summary of what was restored
    pub fn summary(&self) -> String {
        let mut summary = format!(
            "Restored {} entries ({} accounts loaded)",
            self.entries_restored, self.accounts_loaded
        );
        if !self.keys_added.is_empty() {
            summary.push_str(&format!("; added keys: {}", self.keys_added.join(", ")));
        }
        summary
    }
}

/// Result of validating a backup
#[derive(Debug)]
pub struct ValidationResult {
    pub entry_count: usize,
    pub key_count: usize,
    pub has_username_key: bool,
}

impl ValidationResult {
    /// Check if the backup is fully valid
    pub fn is_valid(&self) -> bool {
        self.has_username_key
    }

    /// Get a summary of the validation
    pub fn summary(&self) -> String {
        if self.is_valid() {
            format!("Valid backup: {} entries, {} keys", self.entry_count, self.key_count)
        } else {
            "Invalid backup: no username key".to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accounts::AccountColumns;
    use crate::backup::BackupManager;
    use crate::clock::ManualClock;
    use crate::config::paths::LogItPaths;
    use crate::config::settings::BackupSettings;
    use crate::crypto::{HashingAlgorithm, PasswordHasher};
    use crate::storage::{BatchBuffer, CsvStorage, KeyType, Mutation};
    use chrono::{Duration, TimeZone, Utc};
    use tempfile::TempDir;

    /// Live backend wrapper that can break multi-mutation flushes or the
    /// reads that follow a successful one
    struct FaultyStorage<S> {
        inner: S,
        poison_batches: bool,
        fail_reads_after_batch: bool,
        batch_applied: bool,
    }

    impl<S> FaultyStorage<S> {
        fn new(inner: S, poison_batches: bool, fail_reads_after_batch: bool) -> Self {
            Self {
                inner,
                poison_batches,
                fail_reads_after_batch,
                batch_applied: false,
            }
        }
    }

    impl<S: Storage> Storage for FaultyStorage<S> {
        fn connect(&mut self) -> LogItResult<()> {
            self.inner.connect()
        }

        fn close(&mut self) -> LogItResult<()> {
            self.inner.close()
        }

        fn ping(&mut self) -> LogItResult<()> {
            self.inner.ping()
        }

        fn create_unit_if_not_exists(&mut self, unit: &str, keys: &[Key]) -> LogItResult<()> {
            self.inner.create_unit_if_not_exists(unit, keys)
        }

        fn unit_exists(&mut self, unit: &str) -> LogItResult<bool> {
            self.inner.unit_exists(unit)
        }

        fn get_keys(&mut self, unit: &str) -> LogItResult<Vec<Key>> {
            self.inner.get_keys(unit)
        }

        fn select_entries(&mut self, unit: &str, keys: Option<&[String]>) -> LogItResult<Vec<Entry>> {
            if self.fail_reads_after_batch && self.batch_applied {
                return Err(LogItError::Storage("read failed".into()));
            }
            self.inner.select_entries(unit, keys)
        }

        fn apply(&mut self, mutations: &[Mutation]) -> LogItResult<()> {
            if mutations.len() < 2 {
                return self.inner.apply(mutations);
            }
            let mut mutations = mutations.to_vec();
            if self.poison_batches {
                // Last in the flush, after the erase and every restored entry
                let unit = mutations[0].unit().to_string();
                mutations.push(Mutation::AddEntry {
                    unit,
                    entry: Entry::new().with("no_such_key", "x"),
                });
            }
            self.inner.apply(&mutations)?;
            self.batch_applied = true;
            Ok(())
        }

        fn batch_buffer(&self) -> &BatchBuffer {
            self.inner.batch_buffer()
        }

        fn batch_buffer_mut(&mut self) -> &mut BatchBuffer {
            self.inner.batch_buffer_mut()
        }
    }

    fn manager_over(
        dir: &TempDir,
        storage: Box<dyn Storage + Send>,
    ) -> (Arc<AccountManager>, BackupManager) {
        let paths = LogItPaths::with_base_dir(dir.path().to_path_buf());
        let accounts = Arc::new(AccountManager::new(
            storage,
            "accounts",
            AccountColumns::default(),
            PasswordHasher::new(HashingAlgorithm::Sha256, true),
        ));
        accounts.initialize().unwrap();
        let clock = ManualClock::new(Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap());
        let backups = BackupManager::new(
            Arc::clone(&accounts),
            Arc::new(clock),
            &paths,
            BackupSettings::default(),
        );
        (accounts, backups)
    }

    fn sqlite_inner(dir: &TempDir) -> SqliteStorage {
        let mut storage = SqliteStorage::new(dir.path().join("accounts.db"));
        storage.connect().unwrap();
        storage
    }

    fn csv_inner(dir: &TempDir) -> CsvStorage {
        let mut storage = CsvStorage::new(dir.path().join("csv"));
        storage.connect().unwrap();
        storage
    }

    fn setup() -> (TempDir, Arc<AccountManager>, BackupManager, ManualClock) {
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

        let clock = ManualClock::new(Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap());
        let backups = BackupManager::new(
            Arc::clone(&accounts),
            Arc::new(clock.clone()),
            &paths,
            BackupSettings::default(),
        );
        (dir, accounts, backups, clock)
    }

    fn live_entries(accounts: &AccountManager) -> Vec<Entry> {
        let mut entries = accounts
            .with_storage(|s| s.select_entries("accounts", None))
            .unwrap();
        entries.sort_by(|a, b| a.get("username").cmp(&b.get("username")));
        entries
    }

    #[test]
    fn test_restore_round_trip() {
        let (_dir, accounts, backups, _) = setup();
        accounts.create_account("alice", "p1", "10.0.0.1").unwrap();
        accounts.create_account("bob", "p2", "").unwrap();
        let before = live_entries(&accounts);
        backups.create_backup().unwrap();

        accounts.remove_account("bob").unwrap();
        accounts.change_account_password("alice", "changed").unwrap();
        accounts.create_account("carol", "p3", "").unwrap();

        let result = backups.restore_backup("2024-06-01_12-00-00.db").unwrap();
        assert_eq!(result.entries_restored, 2);
        assert_eq!(result.accounts_loaded, 2);
        assert!(result.keys_added.is_empty());

        assert_eq!(live_entries(&accounts), before);
        assert!(accounts.check_account_password("alice", "p1").unwrap());
        assert!(!accounts.is_registered("carol").unwrap());
    }

    #[test]
    fn test_restore_missing_backup() {
        let (_dir, _accounts, backups, _) = setup();
        let err = backups.restore_backup("nope.db").unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_restore_adds_backup_only_keys() {
        let (dir, accounts, _, _) = setup();
        accounts.create_account("alice", "p1", "").unwrap();

        let path = dir.path().join("external.db");
        let mut keys = AccountColumns::default().keys();
        keys.push(Key::new("nickname", KeyType::ShortText));
        let mut backup = SqliteStorage::new(&path);
        backup.connect().unwrap();
        backup.create_unit_if_not_exists("accounts", &keys).unwrap();
        backup
            .add_entry(
                "accounts",
                Entry::new()
                    .with("username", "dave")
                    .with("password", "pw")
                    .with("nickname", "D"),
            )
            .unwrap();
        backup.close().unwrap();

        let result = RestoreManager::new(Arc::clone(&accounts))
            .restore_from_file(&path)
            .unwrap();
        assert_eq!(result.keys_added, vec!["nickname".to_string()]);
        assert!(result.summary().contains("nickname"));
        assert!(accounts.is_registered("dave").unwrap());
        assert!(!accounts.is_registered("alice").unwrap());
    }

    #[test]
    fn test_validate_backup() {
        let (_dir, accounts, backups, clock) = setup();
        accounts.create_account("alice", "p1", "").unwrap();
        let path = backups.create_backup().unwrap();
        clock.advance(Duration::seconds(1));

        let validation = RestoreManager::new(accounts).validate_backup(&path).unwrap();
        assert!(validation.is_valid());
        assert_eq!(validation.entry_count, 1);
        assert_eq!(validation.key_count, AccountColumns::default().keys().len());
    }

    fn check_failed_restore_keeps_live_unit(dir: &TempDir, storage: Box<dyn Storage + Send>) {
        let (accounts, backups) = manager_over(dir, storage);
        accounts.create_account("alice", "p1", "").unwrap();
        accounts.create_account("bob", "p2", "").unwrap();
        let path = backups.create_backup().unwrap();

        accounts.remove_account("bob").unwrap();
        accounts.create_account("carol", "p3", "").unwrap();
        let entries_before = live_entries(&accounts);
        let cache_before = accounts.accounts().unwrap();

        let err = RestoreManager::new(Arc::clone(&accounts))
            .restore_from_file(&path)
            .unwrap_err();
        assert!(matches!(err, LogItError::Batch(_)));
        assert_eq!(live_entries(&accounts), entries_before);
        assert_eq!(accounts.accounts().unwrap(), cache_before);

        accounts.load_accounts().unwrap();
        assert_eq!(accounts.accounts().unwrap(), cache_before);
    }

    #[test]
    fn test_failed_restore_keeps_sqlite_unit() {
        let dir = TempDir::new().unwrap();
        let storage = FaultyStorage::new(sqlite_inner(&dir), true, false);
        check_failed_restore_keeps_live_unit(&dir, Box::new(storage));
    }

    #[test]
    fn test_failed_restore_keeps_csv_unit() {
        let dir = TempDir::new().unwrap();
        let storage = FaultyStorage::new(csv_inner(&dir), true, false);
        check_failed_restore_keeps_live_unit(&dir, Box::new(storage));
    }

    #[test]
    fn test_restore_into_csv_backend() {
        let dir = TempDir::new().unwrap();
        let (accounts, backups) = manager_over(&dir, Box::new(csv_inner(&dir)));
        accounts.create_account("alice", "p1", "10.0.0.1").unwrap();
        accounts.set_email("alice", "alice@example.com").unwrap();
        let before = live_entries(&accounts);
        let path = backups.create_backup().unwrap();

        accounts.remove_account("alice").unwrap();
        accounts.create_account("bob", "p2", "").unwrap();

        let result = RestoreManager::new(Arc::clone(&accounts))
            .restore_from_file(&path)
            .unwrap();
        assert_eq!(result.entries_restored, 1);
        assert_eq!(live_entries(&accounts), before);
        assert!(accounts.check_account_password("alice", "p1").unwrap());
        assert!(!accounts.is_registered("bob").unwrap());
    }

    #[test]
    fn test_restore_matches_keys_case_insensitively() {
        let dir = TempDir::new().unwrap();
        let (accounts, _) = manager_over(&dir, Box::new(csv_inner(&dir)));

        let path = dir.path().join("external.db");
        let mut backup = SqliteStorage::new(&path);
        backup.connect().unwrap();
        backup
            .create_unit_if_not_exists(
                "accounts",
                &[
                    Key::new("USERNAME", KeyType::ShortText),
                    Key::new("password", KeyType::LongText),
                    Key::new("EMAIL", KeyType::ShortText),
                ],
            )
            .unwrap();
        backup
            .add_entry(
                "accounts",
                Entry::new()
                    .with("USERNAME", "Erin")
                    .with("password", "pw")
                    .with("EMAIL", "erin@example.com"),
            )
            .unwrap();
        backup.close().unwrap();

        let result = RestoreManager::new(Arc::clone(&accounts))
            .restore_from_file(&path)
            .unwrap();
        assert!(result.keys_added.is_empty());
        let erin = accounts.get_account("erin").unwrap().unwrap();
        assert_eq!(erin.email, "erin@example.com");
        assert_eq!(live_entries(&accounts)[0].get("username"), Some("erin"));
    }

    #[test]
    fn test_cache_reload_failure_is_reported() {
        let dir = TempDir::new().unwrap();
        let storage = FaultyStorage::new(sqlite_inner(&dir), false, true);
        let (accounts, backups) = manager_over(&dir, Box::new(storage));
        accounts.create_account("alice", "p1", "").unwrap();
        accounts.create_account("bob", "p2", "").unwrap();
        let path = backups.create_backup().unwrap();
        accounts.remove_account("bob").unwrap();

        let err = RestoreManager::new(Arc::clone(&accounts))
            .restore_from_file(&path)
            .unwrap_err();
        assert!(err.to_string().contains("could not be reloaded"));
    }
}
