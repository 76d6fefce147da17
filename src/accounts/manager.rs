//! Account cache with write-through persistence
//!
//! [`AccountManager`] owns the accounts unit. Every mutation is written to
//! storage first and only reaches the cache once the write succeeded, so the
//! cache never shows a change storage does not have. Bulk callers open an
//! [`AccountBatch`], which buffers both sides and applies the cache changes
//! only after the storage batch committed.
//!
//! Locks are always taken in the order cache, then storage.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::{debug, info, warn};

use super::account::{
    flag_value, location_values, normalize_username, Account, AccountColumns, Location,
};
use crate::crypto::{generate_salt, PasswordHasher};
use crate::error::{LogItError, LogItResult};
use crate::storage::{reconcile_unit, BatchGuard, Entry, Key, Selector, Storage};

/// A single attribute update
#[derive(Debug, Clone, PartialEq)]
pub enum AccountChange {
    /// New salt and password hash, always written together
    Credentials { salt: String, password: String },
    Ip(String),
    Email(String),
    LastActive(i64),
    /// `None` clears the stored location
    Location(Option<Location>),
    InWaitingRoom(bool),
}

impl AccountChange {
    fn values(&self, columns: &AccountColumns) -> Entry {
        match self {
            Self::Credentials { salt, password } => Entry::new()
                .with(&columns.salt, salt)
                .with(&columns.password, password),
            Self::Ip(ip) => Entry::new().with(&columns.ip, ip),
            Self::Email(email) => Entry::new().with(&columns.email, email),
            Self::LastActive(t) => Entry::new().with(&columns.last_active, t.to_string()),
            Self::Location(location) => location_values(location.as_ref(), columns),
            Self::InWaitingRoom(flag) => Entry::new().with(&columns.in_wr, flag_value(*flag)),
        }
    }

    fn apply_to(self, account: &mut Account) {
        match self {
            Self::Credentials { salt, password } => {
                account.salt = salt;
                account.password = password;
            }
            Self::Ip(ip) => account.ip = ip,
            Self::Email(email) => account.email = email,
            Self::LastActive(t) => account.last_active = Some(t),
            Self::Location(location) => account.location = location,
            Self::InWaitingRoom(flag) => account.in_waiting_room = flag,
        }
    }
}

/// Authoritative in-memory cache of the accounts unit
pub struct AccountManager {
    storage: Mutex<Box<dyn Storage + Send>>,
    unit: String,
    columns: AccountColumns,
    hasher: PasswordHasher,
    accounts: RwLock<HashMap<String, Account>>,
}

impl AccountManager {
    /// Create a manager over a connected storage backend
    ///
    /// The cache starts empty; call [`AccountManager::initialize`] and
    /// [`AccountManager::load_accounts`] before use.
    pub fn new(
        storage: Box<dyn Storage + Send>,
        unit: impl Into<String>,
        columns: AccountColumns,
        hasher: PasswordHasher,
    ) -> Self {
        Self {
            storage: Mutex::new(storage),
            unit: unit.into(),
            columns,
            hasher,
            accounts: RwLock::new(HashMap::new()),
        }
    }

    pub fn unit(&self) -> &str {
        &self.unit
    }

    pub fn columns(&self) -> &AccountColumns {
        &self.columns
    }

    pub fn hasher(&self) -> &PasswordHasher {
        &self.hasher
    }

    fn read_cache(&self) -> LogItResult<RwLockReadGuard<'_, HashMap<String, Account>>> {
        self.accounts
            .read()
            .map_err(|e| LogItError::Storage(format!("Failed to acquire read lock: {}", e)))
    }

    fn write_cache(&self) -> LogItResult<RwLockWriteGuard<'_, HashMap<String, Account>>> {
        self.accounts
            .write()
            .map_err(|e| LogItError::Storage(format!("Failed to acquire write lock: {}", e)))
    }

    fn storage(&self) -> LogItResult<MutexGuard<'_, Box<dyn Storage + Send>>> {
        self.storage
            .lock()
            .map_err(|e| LogItError::Storage(format!("Failed to acquire storage lock: {}", e)))
    }

    fn username_selector(&self, username: &str) -> Selector {
        Selector::eq(&self.columns.username, username)
    }

    /// Create the accounts unit or add the keys it is missing
    pub fn initialize(&self) -> LogItResult<Vec<Key>> {
        let mut storage = self.storage()?;
        reconcile_unit(&mut **storage, &self.unit, &self.columns.keys())
    }

    /// Rebuild the cache from storage
    ///
    /// Stored usernames not in canonical form are rewritten first, in one
    /// batch, so every later selector matches the stored value. Entries that
    /// do not map onto an account are skipped and logged, as are repeated
    /// usernames after the first. Returns the number of accounts loaded.
    pub fn load_accounts(&self) -> LogItResult<usize> {
        let mut cache = self.write_cache()?;
        let mut storage = self.storage()?;
        let entries = storage.select_entries(&self.unit, None)?;
        self.canonicalize_usernames(&mut **storage, &entries)?;

        let mut loaded = HashMap::with_capacity(entries.len());
        let mut skipped = 0;
        for entry in &entries {
            match Account::from_entry(entry, &self.columns) {
                Ok(account) if loaded.contains_key(&account.username) => {
                    warn!(username = %account.username, "skipping duplicate account entry");
                    skipped += 1;
                }
                Ok(account) => {
                    loaded.insert(account.username.clone(), account);
                }
                Err(e) => {
                    warn!(error = %e, "skipping malformed account entry");
                    skipped += 1;
                }
            }
        }

        let count = loaded.len();
        *cache = loaded;
        info!(count, skipped, unit = %self.unit, "accounts loaded");
        Ok(count)
    }

    /// Rewrite stored usernames that differ from their normalised form
    fn canonicalize_usernames(&self, storage: &mut dyn Storage, entries: &[Entry]) -> LogItResult<()> {
        let mut renames: Vec<(&str, String)> = Vec::new();
        for raw in entries.iter().filter_map(|e| e.get(&self.columns.username)) {
            let canonical = normalize_username(raw);
            if !canonical.is_empty() && canonical != raw && !renames.iter().any(|(r, _)| *r == raw) {
                renames.push((raw, canonical));
            }
        }
        if renames.is_empty() {
            return Ok(());
        }

        let mut batch = BatchGuard::begin(storage);
        for (raw, canonical) in &renames {
            batch.update_entries(
                &self.unit,
                self.username_selector(raw),
                Entry::new().with(&self.columns.username, canonical),
            )?;
        }
        let renamed = batch.commit()?;
        info!(renamed, unit = %self.unit, "normalised stored usernames");
        Ok(())
    }

    /// Whether `username` has an account (case-insensitive)
    pub fn is_registered(&self, username: &str) -> LogItResult<bool> {
        Ok(self.read_cache()?.contains_key(&normalize_username(username)))
    }

    pub fn get_account(&self, username: &str) -> LogItResult<Option<Account>> {
        Ok(self.read_cache()?.get(&normalize_username(username)).cloned())
    }

    /// All accounts, sorted by username
    pub fn accounts(&self) -> LogItResult<Vec<Account>> {
        let mut accounts: Vec<Account> = self.read_cache()?.values().cloned().collect();
        accounts.sort_by(|a, b| a.username.cmp(&b.username));
        Ok(accounts)
    }

    pub fn count(&self) -> LogItResult<usize> {
        Ok(self.read_cache()?.len())
    }

    /// Salt and hash for a new password, honouring the salting setting
    fn hash_new_password(&self, password: &str) -> LogItResult<(String, String)> {
        if self.hasher.use_salt() {
            let salt = generate_salt();
            let hash = self.hasher.hash_salted(password, &salt)?;
            Ok((salt, hash))
        } else {
            Ok((String::new(), self.hasher.hash(password)?))
        }
    }

    fn prepare_account(&self, username: &str, password: &str, ip: &str) -> LogItResult<Account> {
        let username = normalize_username(username);
        if username.is_empty() {
            return Err(LogItError::Validation("Username cannot be empty".into()));
        }
        if username.chars().count() > 255 {
            return Err(LogItError::Validation(format!(
                "Username too long: {}",
                username
            )));
        }
        let (salt, hash) = self.hash_new_password(password)?;
        Ok(Account::new(&username, salt, hash, ip))
    }

    /// Register a new account
    ///
    /// # Errors
    ///
    /// Returns a duplicate error if the username is already registered.
    pub fn create_account(&self, username: &str, password: &str, ip: &str) -> LogItResult<Account> {
        let mut cache = self.write_cache()?;
        let account = self.prepare_account(username, password, ip)?;
        if cache.contains_key(&account.username) {
            return Err(LogItError::account_exists(&account.username));
        }

        self.storage()?
            .add_entry(&self.unit, account.to_entry(&self.columns))?;
        cache.insert(account.username.clone(), account.clone());

        info!(username = %account.username, "account created");
        Ok(account)
    }

    /// Remove an account from storage and the cache
    pub fn remove_account(&self, username: &str) -> LogItResult<()> {
        let mut cache = self.write_cache()?;
        let username = normalize_username(username);
        if !cache.contains_key(&username) {
            return Err(LogItError::account_not_found(&username));
        }

        self.storage()?
            .erase_entries(&self.unit, self.username_selector(&username))?;
        cache.remove(&username);

        info!(username = %username, "account removed");
        Ok(())
    }

    /// Apply one attribute change to an existing account
    pub fn update_account(&self, username: &str, change: AccountChange) -> LogItResult<()> {
        let mut cache = self.write_cache()?;
        let username = normalize_username(username);
        let account = cache
            .get_mut(&username)
            .ok_or_else(|| LogItError::account_not_found(&username))?;

        self.storage()?.update_entries(
            &self.unit,
            self.username_selector(&username),
            change.values(&self.columns),
        )?;
        change.apply_to(account);
        Ok(())
    }

    /// Regenerate salt and hash for a new password
    pub fn change_account_password(&self, username: &str, new_password: &str) -> LogItResult<()> {
        let (salt, password) = self.hash_new_password(new_password)?;
        self.update_account(username, AccountChange::Credentials { salt, password })?;
        info!(username = %normalize_username(username), "account password changed");
        Ok(())
    }

    /// Check a password against the stored hash
    pub fn check_account_password(&self, username: &str, password: &str) -> LogItResult<bool> {
        let account = self
            .get_account(username)?
            .ok_or_else(|| LogItError::account_not_found(normalize_username(username)))?;
        Ok(self
            .hasher
            .check_password_salted(password, &account.password, &account.salt))
    }

    pub fn set_ip(&self, username: &str, ip: &str) -> LogItResult<()> {
        self.update_account(username, AccountChange::Ip(ip.to_string()))
    }

    pub fn set_email(&self, username: &str, email: &str) -> LogItResult<()> {
        self.update_account(username, AccountChange::Email(email.to_string()))
    }

    pub fn set_last_active(&self, username: &str, timestamp: i64) -> LogItResult<()> {
        self.update_account(username, AccountChange::LastActive(timestamp))
    }

    pub fn set_location(&self, username: &str, location: Option<Location>) -> LogItResult<()> {
        self.update_account(username, AccountChange::Location(location))
    }

    pub fn set_in_waiting_room(&self, username: &str, in_waiting_room: bool) -> LogItResult<()> {
        self.update_account(username, AccountChange::InWaitingRoom(in_waiting_room))
    }

    /// Open an explicit batch scope
    ///
    /// The batch holds both locks until it is committed or dropped; the
    /// manager must not be used from the same thread in the meantime.
    pub fn begin_batch(&self) -> LogItResult<AccountBatch<'_>> {
        let cache = self.write_cache()?;
        let mut storage = self.storage()?;
        let stale = storage.clear_batch();
        if stale > 0 {
            warn!(dropped = stale, "discarding mutations left over from an unfinished batch");
        }
        storage.set_autobatch_enabled(true);
        Ok(AccountBatch {
            manager: self,
            cache,
            storage,
            overlay: HashMap::new(),
            committed: false,
        })
    }

    /// Run `f` with exclusive access to the backing storage
    ///
    /// Any batch `f` leaves open is discarded afterwards so later
    /// write-through calls are never buffered by accident.
    pub fn with_storage<R, F>(&self, f: F) -> LogItResult<R>
    where
        F: FnOnce(&mut dyn Storage) -> LogItResult<R>,
    {
        let mut storage = self.storage()?;
        let result = f(&mut **storage);
        if storage.is_autobatch_enabled() {
            let dropped = storage.clear_batch();
            storage.set_autobatch_enabled(false);
            warn!(dropped, "storage batch left open; discarded");
        }
        result
    }

    /// Keep-alive round trip to the backend
    pub fn ping(&self) -> LogItResult<()> {
        self.storage()?.ping()
    }

    /// Discard any open batch and close the backend
    pub fn close(&self) -> LogItResult<()> {
        let mut storage = self.storage()?;
        let dropped = storage.clear_batch();
        if dropped > 0 {
            warn!(dropped, "unflushed mutations discarded on close");
        }
        storage.set_autobatch_enabled(false);
        storage.close()
    }
}

/// Batched account mutations
///
/// Storage receives the mutations on [`AccountBatch::commit`]; the cache is
/// updated only if that flush succeeds. Dropping an uncommitted batch
/// discards both sides.
pub struct AccountBatch<'a> {
    manager: &'a AccountManager,
    cache: RwLockWriteGuard<'a, HashMap<String, Account>>,
    storage: MutexGuard<'a, Box<dyn Storage + Send>>,
    /// Staged cache state; `None` marks a removal
    overlay: HashMap<String, Option<Account>>,
    committed: bool,
}

impl AccountBatch<'_> {
    fn current(&self, username: &str) -> Option<&Account> {
        match self.overlay.get(username) {
            Some(staged) => staged.as_ref(),
            None => self.cache.get(username),
        }
    }

    /// Whether `username` is registered, counting staged changes
    pub fn is_registered(&self, username: &str) -> bool {
        self.current(&normalize_username(username)).is_some()
    }

    pub fn create_account(&mut self, username: &str, password: &str, ip: &str) -> LogItResult<Account> {
        let account = self.manager.prepare_account(username, password, ip)?;
        self.insert_account(account.clone())?;
        Ok(account)
    }

    /// Stage an already-built account, e.g. one read from another store
    pub fn insert_account(&mut self, account: Account) -> LogItResult<()> {
        if self.current(&account.username).is_some() {
            return Err(LogItError::account_exists(&account.username));
        }
        self.storage
            .add_entry(&self.manager.unit, account.to_entry(&self.manager.columns))?;
        self.overlay.insert(account.username.clone(), Some(account));
        Ok(())
    }

    pub fn remove_account(&mut self, username: &str) -> LogItResult<()> {
        let username = normalize_username(username);
        if self.current(&username).is_none() {
            return Err(LogItError::account_not_found(&username));
        }
        self.storage
            .erase_entries(&self.manager.unit, self.manager.username_selector(&username))?;
        self.overlay.insert(username, None);
        Ok(())
    }

    pub fn update_account(&mut self, username: &str, change: AccountChange) -> LogItResult<()> {
        let username = normalize_username(username);
        let mut account = self
            .current(&username)
            .cloned()
            .ok_or_else(|| LogItError::account_not_found(&username))?;

        self.storage.update_entries(
            &self.manager.unit,
            self.manager.username_selector(&username),
            change.values(&self.manager.columns),
        )?;
        change.apply_to(&mut account);
        self.overlay.insert(username, Some(account));
        Ok(())
    }

    pub fn change_account_password(&mut self, username: &str, new_password: &str) -> LogItResult<()> {
        let (salt, password) = self.manager.hash_new_password(new_password)?;
        self.update_account(username, AccountChange::Credentials { salt, password })
    }

    /// Number of storage mutations buffered so far
    pub fn pending(&self) -> usize {
        self.storage.pending_mutations()
    }

    /// Flush storage, then publish the staged cache changes
    pub fn commit(mut self) -> LogItResult<usize> {
        self.committed = true;
        let applied = self.storage.execute_batch()?;
        for (username, staged) in std::mem::take(&mut self.overlay) {
            match staged {
                Some(account) => {
                    self.cache.insert(username, account);
                }
                None => {
                    self.cache.remove(&username);
                }
            }
        }
        debug!(applied, "account batch committed");
        Ok(applied)
    }
}

impl Drop for AccountBatch<'_> {
    fn drop(&mut self) {
        if !self.committed {
            let dropped = self.storage.clear_batch();
            if dropped > 0 {
                debug!(dropped, "uncommitted account batch discarded");
            }
        }
        self.storage.set_autobatch_enabled(false);
    }
}
