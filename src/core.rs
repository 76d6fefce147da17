//! LogIt core
//!
//! Owns every component and hands each one the collaborators it needs. The
//! host drives it from a single thread:
//!
//! ```rust,ignore
//! let mut core = LogItCore::new(LogItPaths::new()?, Arc::new(SystemClock))?;
//! core.start()?;
//! loop {
//!     for event in core.tick() {
//!         // re-apply forced-login consequences for timed-out players
//!     }
//! }
//! ```

use std::fs;
use std::sync::Arc;

use tracing::{info, warn};

use crate::accounts::{AccountChange, AccountManager, Location};
use crate::backup::BackupManager;
use crate::clock::Clock;
use crate::config::paths::LogItPaths;
use crate::config::settings::{GlobalPassword, Settings};
use crate::crypto::{generate_salt, PasswordHasher};
use crate::error::{LogItError, LogItResult};
use crate::migration::{migrate_legacy_inventories, DiscardingSink, InventorySink};
use crate::scheduler::{Scheduler, TaskKind};
use crate::session::{ForcedLoginPolicy, Player, SessionEvent, SessionManager};
use crate::storage::{open_storage, SqliteStorage, Storage};

/// Components that only exist between `start` and `stop`
struct Running {
    accounts: Arc<AccountManager>,
    sessions: SessionManager,
    backups: BackupManager,
    policy: ForcedLoginPolicy,
    scheduler: Scheduler,
}

pub struct LogItCore {
    paths: LogItPaths,
    clock: Arc<dyn Clock>,
    settings: Settings,
    inventory_sink: Box<dyn InventorySink>,
    running: Option<Running>,
}

impl LogItCore {
    /// Core over the data directory; settings are read now and again on start
    pub fn new(paths: LogItPaths, clock: Arc<dyn Clock>) -> LogItResult<Self> {
        let settings = Settings::load_or_create(&paths)?;
        Ok(Self {
            paths,
            clock,
            settings,
            inventory_sink: Box::new(DiscardingSink),
            running: None,
        })
    }

    /// Receiver for inventories found by the legacy migration
    pub fn set_inventory_sink(&mut self, sink: Box<dyn InventorySink>) {
        self.inventory_sink = sink;
    }

    pub fn paths(&self) -> &LogItPaths {
        &self.paths
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    fn running(&self) -> LogItResult<&Running> {
        self.running
            .as_ref()
            .ok_or_else(|| LogItError::Validation("LogIt is not running".into()))
    }

    fn running_mut(&mut self) -> LogItResult<&mut Running> {
        self.running
            .as_mut()
            .ok_or_else(|| LogItError::Validation("LogIt is not running".into()))
    }

    pub fn accounts(&self) -> LogItResult<&Arc<AccountManager>> {
        Ok(&self.running()?.accounts)
    }

    pub fn sessions(&self) -> LogItResult<&SessionManager> {
        Ok(&self.running()?.sessions)
    }

    pub fn sessions_mut(&mut self) -> LogItResult<&mut SessionManager> {
        Ok(&mut self.running_mut()?.sessions)
    }

    pub fn backups(&self) -> LogItResult<&BackupManager> {
        Ok(&self.running()?.backups)
    }

    fn hasher(&self) -> LogItResult<PasswordHasher> {
        Ok(PasswordHasher::new(
            self.settings.hashing_algorithm()?,
            self.settings.password.use_salt,
        ))
    }

    /// Load settings and bring every component up
    ///
    /// Any error here is fatal for the subsystem: nothing is left running.
    pub fn start(&mut self) -> LogItResult<()> {
        if self.is_running() {
            return Ok(());
        }

        let settings = Settings::load_or_create(&self.paths)?;
        settings.validate()?;
        self.settings = settings;
        self.paths.ensure_directories()?;

        let account_settings = &self.settings.storage.accounts;
        let storage = open_storage(&account_settings.backend, &self.paths)?;
        let accounts = Arc::new(AccountManager::new(
            storage,
            account_settings.unit.clone(),
            account_settings.columns.clone(),
            self.hasher()?,
        ));
        accounts.initialize()?;
        let loaded = accounts.load_accounts()?;

        self.migrate_inventories();

        let sessions = SessionManager::new(
            Arc::clone(&accounts),
            Arc::clone(&self.clock),
            self.settings.session.lifetime()?,
        );
        let backups = BackupManager::new(
            Arc::clone(&accounts),
            Arc::clone(&self.clock),
            &self.paths,
            self.settings.backup.clone(),
        );

        self.running = Some(Running {
            accounts,
            sessions,
            backups,
            policy: ForcedLoginPolicy::from_settings(&self.settings.force_login),
            scheduler: Scheduler::from_settings(&self.settings.scheduler),
        });
        info!(
            backend = self.settings.storage.accounts.backend.name(),
            accounts = loaded,
            "LogIt started"
        );
        Ok(())
    }

    /// One-shot import of the legacy inventories unit; failures only warn
    fn migrate_inventories(&mut self) {
        let path = self.paths.data_file(&self.settings.storage.inventories.filename);
        if !path.is_file() {
            return;
        }

        let mut storage = SqliteStorage::new(&path);
        let result = storage
            .connect()
            .and_then(|_| migrate_legacy_inventories(&mut storage, self.inventory_sink.as_mut()));
        if let Err(e) = result {
            warn!(error = %e, "legacy inventory migration failed");
        }
        if let Err(e) = storage.close() {
            warn!(error = %e, "failed to close inventories store");
        }
    }

    /// Cancel every task, drop any open batch and close storage
    pub fn stop(&mut self) -> LogItResult<()> {
        let Some(mut running) = self.running.take() else {
            return Ok(());
        };
        running.scheduler.cancel_all();
        running.accounts.close()?;
        info!("LogIt stopped");
        Ok(())
    }

    /// Stop and start again, carrying alive sessions across
    ///
    /// Sessions go through the side file named in the settings; the file is
    /// deleted once imported.
    pub fn restart(&mut self) -> LogItResult<()> {
        let side_file = self.paths.data_file(&self.settings.storage.sessions.filename);
        if let Some(running) = &self.running {
            running.sessions.export_sessions(&side_file)?;
        }

        self.stop()?;
        self.start()?;

        if side_file.is_file() {
            let imported = self.sessions_mut()?.import_sessions(&side_file);
            if let Err(e) = fs::remove_file(&side_file) {
                warn!(error = %e, "failed to delete session side file");
            }
            imported?;
        }
        Ok(())
    }

    /// Run the periodic tasks due on this tick
    ///
    /// Returns the session timeouts the sweep produced; the caller applies
    /// forced-login consequences for players still connected.
    pub fn tick(&mut self) -> Vec<SessionEvent> {
        let Some(running) = self.running.as_mut() else {
            return Vec::new();
        };

        let mut events = Vec::new();
        for task in running.scheduler.advance() {
            match task {
                TaskKind::Ping => {
                    if let Err(e) = running.accounts.ping() {
                        warn!(error = %e, "storage keep-alive failed");
                    }
                }
                TaskKind::SessionSweep => events.extend(running.sessions.tick()),
                TaskKind::BackupSchedule => {
                    running.backups.tick();
                }
            }
        }
        events
    }

    /// Set the password that unlocks every account
    pub fn change_global_password(&mut self, password: &str) -> LogItResult<()> {
        let salt = generate_salt();
        let hash = self.hasher()?.hash_salted(password, &salt)?;
        self.settings.password.global_password = GlobalPassword { hash, salt };
        self.settings.save(&self.paths)?;
        info!("global password changed");
        Ok(())
    }

    pub fn check_global_password(&self, password: &str) -> LogItResult<bool> {
        let global = &self.settings.password.global_password;
        if !global.is_set() {
            return Ok(false);
        }
        Ok(self
            .hasher()?
            .check_password_salted(password, &global.hash, &global.salt))
    }

    pub fn remove_global_password(&mut self) -> LogItResult<()> {
        self.settings.password.global_password = GlobalPassword::default();
        self.settings.save(&self.paths)?;
        info!("global password removed");
        Ok(())
    }

    pub fn is_player_forced_to_login(&self, player: &dyn Player) -> LogItResult<bool> {
        Ok(self.running()?.policy.is_player_forced_to_login(player))
    }

    /// Authenticate `player` and start their session
    ///
    /// For a forced player coming back from the waiting room, returns the
    /// location persisted at logout and clears the flag.
    pub fn on_session_start(&mut self, player: &dyn Player) -> LogItResult<Option<Location>> {
        let running = self.running_mut()?;
        running.sessions.start_session(player.name())?;

        if !running.policy.is_player_forced_to_login(player) {
            return Ok(None);
        }
        let account = running
            .accounts
            .get_account(player.name())?
            .ok_or_else(|| LogItError::account_not_found(player.name()))?;
        if !account.in_waiting_room {
            return Ok(None);
        }
        running.accounts.set_in_waiting_room(player.name(), false)?;
        Ok(account.location)
    }

    /// End `player`'s session and send them to the waiting room if forced
    ///
    /// Returns `false` if there was no alive session.
    pub fn on_session_end(&mut self, player: &dyn Player) -> LogItResult<bool> {
        let ended = self.running_mut()?.sessions.end_session(player.name())?;
        self.enforce_forced_login(player)?;
        Ok(ended)
    }

    /// Forced-login consequences of a session end
    ///
    /// Also applies to timeouts reported by [`LogItCore::tick`]. A forced
    /// player's location is persisted and the waiting-room flag set.
    pub fn enforce_forced_login(&self, player: &dyn Player) -> LogItResult<()> {
        let running = self.running()?;
        if !running.policy.is_player_forced_to_login(player) {
            return Ok(());
        }
        let mut batch = running.accounts.begin_batch()?;
        batch.update_account(player.name(), AccountChange::Location(Some(player.location())))?;
        batch.update_account(player.name(), AccountChange::InWaitingRoom(true))?;
        batch.commit()?;
        Ok(())
    }
}
