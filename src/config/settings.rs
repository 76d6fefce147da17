//! User settings for LogIt
//!
//! Mirrors `config.yml`: storage backend selection, column overrides,
//! password hashing, session lifetime, backup schedule and forced-login
//! scope. Every field has a default so a partial file is always loadable.

use chrono::Duration;
use serde::{Deserialize, Serialize};

use super::paths::LogItPaths;
use crate::accounts::AccountColumns;
use crate::crypto::HashingAlgorithm;
use crate::error::LogItError;

/// Backend holding the accounts unit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StorageBackend {
    /// Embedded file-backed SQL store
    Sqlite {
        /// Database file, relative to the data directory
        filename: String,
    },
    /// Server-based SQL store
    Postgres {
        host: String,
        #[serde(default = "default_postgres_port")]
        port: u16,
        user: String,
        #[serde(default)]
        password: String,
        database: String,
    },
    /// One delimited file per unit
    Csv {
        /// Directory holding the unit files, relative to the data directory
        directory: String,
    },
}

fn default_postgres_port() -> u16 {
    5432
}

impl Default for StorageBackend {
    fn default() -> Self {
        Self::Sqlite {
            filename: "accounts.db".to_string(),
        }
    }
}

impl StorageBackend {
    /// Short backend name for log lines
    pub fn name(&self) -> &'static str {
        match self {
            Self::Sqlite { .. } => "sqlite",
            Self::Postgres { .. } => "postgres",
            Self::Csv { .. } => "csv",
        }
    }
}

/// Where and how accounts are stored
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AccountStorageSettings {
    pub backend: StorageBackend,
    /// Name of the unit (table) holding accounts
    pub unit: String,
    pub columns: AccountColumns,
}

impl Default for AccountStorageSettings {
    fn default() -> Self {
        Self {
            backend: StorageBackend::default(),
            unit: "accounts".to_string(),
            columns: AccountColumns::default(),
        }
    }
}

/// A single side file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileSettings {
    pub filename: String,
}

/// Storage section
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    pub accounts: AccountStorageSettings,
    /// Session side file used across a restart
    pub sessions: FileSettings,
    /// SQLite file that may still hold a legacy `inventories` unit
    pub inventories: FileSettings,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            accounts: AccountStorageSettings::default(),
            sessions: FileSettings {
                filename: "sessions.json".to_string(),
            },
            inventories: FileSettings {
                filename: "inventories.db".to_string(),
            },
        }
    }
}

/// Global password shared by every account
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GlobalPassword {
    pub hash: String,
    pub salt: String,
}

impl GlobalPassword {
    /// Whether a global password is configured
    pub fn is_set(&self) -> bool {
        !self.hash.is_empty()
    }
}

/// Password section
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PasswordSettings {
    /// One of `plain`, `sha-256`, `sha-384`, `sha-512`, `argon2`
    pub hashing_algorithm: String,
    pub use_salt: bool,
    pub global_password: GlobalPassword,
}

impl Default for PasswordSettings {
    fn default() -> Self {
        Self {
            hashing_algorithm: "sha-256".to_string(),
            use_salt: true,
            global_password: GlobalPassword::default(),
        }
    }
}

/// Session section
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
    /// Idle time after which a session is force-ended
    pub lifetime_secs: u64,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            lifetime_secs: 3600,
        }
    }
}

impl SessionSettings {
    pub fn lifetime(&self) -> Result<Duration, LogItError> {
        seconds("session.lifetime_secs", self.lifetime_secs)
    }
}

/// Backup schedule
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackupSchedule {
    pub enabled: bool,
    pub interval_secs: u64,
}

impl Default for BackupSchedule {
    fn default() -> Self {
        Self {
            enabled: false,
            interval_secs: 7200,
        }
    }
}

impl BackupSchedule {
    pub fn interval(&self) -> Result<Duration, LogItError> {
        seconds("backup.schedule.interval_secs", self.interval_secs)
    }
}

/// A seconds option as a duration; values chrono cannot hold are rejected
fn seconds(option: &str, secs: u64) -> Result<Duration, LogItError> {
    i64::try_from(secs)
        .ok()
        .and_then(Duration::try_seconds)
        .ok_or_else(|| LogItError::Config(format!("{} is out of range: {}", option, secs)))
}

/// Backup section
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackupSettings {
    pub schedule: BackupSchedule,
    /// Number of backups kept after a scheduled backup (0 = unlimited)
    pub retention: u32,
    /// Backup directory, relative to the data directory
    pub path: String,
    /// chrono strftime pattern for backup filenames
    pub filename_format: String,
}

impl Default for BackupSettings {
    fn default() -> Self {
        Self {
            schedule: BackupSchedule::default(),
            retention: 0,
            path: "backup".to_string(),
            filename_format: "%Y-%m-%d_%H-%M-%S.db".to_string(),
        }
    }
}

/// Forced-login section
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ForceLoginSettings {
    pub global: bool,
    pub in_worlds: Vec<String>,
    pub exempt_permission: String,
}

impl Default for ForceLoginSettings {
    fn default() -> Self {
        Self {
            global: true,
            in_worlds: Vec::new(),
            exempt_permission: "logit.force-login.exempt".to_string(),
        }
    }
}

/// Log file section
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogSettings {
    pub enabled: bool,
    pub filename: String,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            filename: "debug.log".to_string(),
        }
    }
}

/// Periods of the cooperative tasks, in scheduler ticks
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerSettings {
    pub session_period: u64,
    pub backup_period: u64,
    pub ping_period: u64,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            session_period: 20,
            backup_period: 40,
            ping_period: 2400,
        }
    }
}

/// User settings for LogIt
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Schema version for migration support
    pub schema_version: u32,
    pub storage: StorageSettings,
    pub password: PasswordSettings,
    pub session: SessionSettings,
    pub backup: BackupSettings,
    pub force_login: ForceLoginSettings,
    pub log_to_file: LogSettings,
    pub scheduler: SchedulerSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            schema_version: 1,
            storage: StorageSettings::default(),
            password: PasswordSettings::default(),
            session: SessionSettings::default(),
            backup: BackupSettings::default(),
            force_login: ForceLoginSettings::default(),
            log_to_file: LogSettings::default(),
            scheduler: SchedulerSettings::default(),
        }
    }
}

impl Settings {
    /// Load settings from disk, or create default settings if file doesn't exist
    pub fn load_or_create(paths: &LogItPaths) -> Result<Self, LogItError> {
        let settings_path = paths.settings_file();

        if settings_path.exists() {
            let contents = std::fs::read_to_string(&settings_path).map_err(|e| {
                LogItError::Io(format!("Failed to read settings file: {}", e))
            })?;

            let settings: Settings = serde_yaml::from_str(&contents).map_err(|e| {
                LogItError::Config(format!("Failed to parse settings file: {}", e))
            })?;

            Ok(settings)
        } else {
            // Don't save yet - let caller decide when to persist
            Ok(Settings::default())
        }
    }

    /// Save settings to disk
    pub fn save(&self, paths: &LogItPaths) -> Result<(), LogItError> {
        paths.ensure_directories()?;

        let contents = serde_yaml::to_string(self)
            .map_err(|e| LogItError::Config(format!("Failed to serialize settings: {}", e)))?;

        std::fs::write(paths.settings_file(), contents)
            .map_err(|e| LogItError::Io(format!("Failed to write settings file: {}", e)))?;

        Ok(())
    }

    /// Parse the configured hashing algorithm
    pub fn hashing_algorithm(&self) -> Result<HashingAlgorithm, LogItError> {
        HashingAlgorithm::parse(&self.password.hashing_algorithm).ok_or_else(|| {
            LogItError::Config(format!(
                "Unknown hashing algorithm: {}",
                self.password.hashing_algorithm
            ))
        })
    }

    /// Reject settings the core cannot run with
    pub fn validate(&self) -> Result<(), LogItError> {
        if self.storage.accounts.unit.trim().is_empty() {
            return Err(LogItError::Config("Accounts unit name is empty".into()));
        }
        if self.storage.accounts.columns.username.trim().is_empty() {
            return Err(LogItError::Config("Username column name is empty".into()));
        }
        if self.session.lifetime_secs == 0 {
            return Err(LogItError::Config("Session lifetime must be positive".into()));
        }
        self.session.lifetime()?;
        self.backup.schedule.interval()?;
        self.hashing_algorithm()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_settings() {
        let settings = Settings::default();
        assert_eq!(settings.storage.accounts.unit, "accounts");
        assert_eq!(settings.storage.accounts.backend.name(), "sqlite");
        assert!(settings.password.use_salt);
        assert_eq!(settings.session.lifetime_secs, 3600);
        assert!(settings.force_login.global);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_save_and_load() {
        let temp_dir = TempDir::new().unwrap();
        let paths = LogItPaths::with_base_dir(temp_dir.path().to_path_buf());

        let mut settings = Settings::default();
        settings.storage.accounts.backend = StorageBackend::Csv {
            directory: "csv".into(),
        };
        settings.session.lifetime_secs = 60;
        settings.force_login.in_worlds = vec!["lobby".into()];

        settings.save(&paths).unwrap();

        let loaded = Settings::load_or_create(&paths).unwrap();
        assert_eq!(loaded.storage.accounts.backend, settings.storage.accounts.backend);
        assert_eq!(loaded.session.lifetime_secs, 60);
        assert_eq!(loaded.force_login.in_worlds, vec!["lobby".to_string()]);
    }

    #[test]
    fn test_partial_yaml_uses_defaults() {
        let yaml = r#"
storage:
  accounts:
    backend:
      type: postgres
      host: db.local
      user: logit
      database: minecraft
    columns:
      username: player_name
password:
  hashing_algorithm: sha-512
"#;
        let settings: Settings = serde_yaml::from_str(yaml).unwrap();

        match &settings.storage.accounts.backend {
            StorageBackend::Postgres { host, port, .. } => {
                assert_eq!(host, "db.local");
                assert_eq!(*port, 5432);
            }
            other => panic!("unexpected backend: {:?}", other),
        }
        assert_eq!(settings.storage.accounts.columns.username, "player_name");
        assert_eq!(settings.storage.accounts.columns.email, "email");
        assert_eq!(settings.hashing_algorithm().unwrap(), HashingAlgorithm::Sha512);
        assert_eq!(settings.backup.path, "backup");
    }

    #[test]
    fn test_unknown_hashing_algorithm_is_config_error() {
        let mut settings = Settings::default();
        settings.password.hashing_algorithm = "whirlpool".into();

        let err = settings.validate().unwrap_err();
        assert!(matches!(err, LogItError::Config(_)));
        assert!(err.is_fatal());
    }

    #[test]
    fn test_zero_lifetime_rejected() {
        let mut settings = Settings::default();
        settings.session.lifetime_secs = 0;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_out_of_range_durations_rejected() {
        let mut settings = Settings::default();
        settings.session.lifetime_secs = u64::MAX;
        assert!(matches!(settings.validate(), Err(LogItError::Config(_))));

        let mut settings = Settings::default();
        settings.backup.schedule.interval_secs = i64::MAX as u64;
        assert!(settings.backup.schedule.interval().is_err());
        assert!(settings.validate().is_err());

        settings.backup.schedule.interval_secs = 86_400;
        assert_eq!(settings.backup.schedule.interval().unwrap(), Duration::days(1));
    }
}
