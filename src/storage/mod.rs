//! Storage layer for LogIt
//!
//! A [`Storage`] backend holds named units of typed keys and string-valued
//! entries. Three backends share the same batched CRUD semantics:
//!
//! - [`SqliteStorage`]: embedded SQL file, also used for every backup
//! - [`PostgresStorage`]: server SQL store (feature `postgres`)
//! - [`CsvStorage`]: one delimited file per unit
//!
//! Backends only implement the primitive operations plus [`Storage::apply`];
//! routing a mutation to the batch buffer or straight to the backend is done
//! once, in the provided methods of the trait.

pub mod batch;
pub mod csv;
pub mod entry;
pub mod file_io;
#[cfg(feature = "postgres")]
pub mod postgres;
pub mod schema;
pub mod sql;
pub mod sqlite;

pub use batch::{BatchBuffer, BatchGuard, Mutation};
pub use self::csv::CsvStorage;
pub use entry::{Entry, Key, KeyType, Selector};
#[cfg(feature = "postgres")]
pub use self::postgres::PostgresStorage;
pub use schema::reconcile_unit;
pub use sqlite::SqliteStorage;

use tracing::debug;

use crate::config::{LogItPaths, StorageBackend};
use crate::error::{LogItError, LogItResult};

/// Backend-agnostic unit/entry store
pub trait Storage {
    /// Acquire the backend connection or handle
    fn connect(&mut self) -> LogItResult<()>;

    /// Release the backend connection; a closed backend may be reconnected
    fn close(&mut self) -> LogItResult<()>;

    /// Trivial round trip, used as a keep-alive
    fn ping(&mut self) -> LogItResult<()>;

    /// Create a unit with the given keys unless it already exists
    fn create_unit_if_not_exists(&mut self, unit: &str, keys: &[Key]) -> LogItResult<()>;

    fn unit_exists(&mut self, unit: &str) -> LogItResult<bool>;

    /// Keys of an existing unit, in declaration order
    fn get_keys(&mut self, unit: &str) -> LogItResult<Vec<Key>>;

    /// Every entry of a unit, optionally projected onto `keys`
    ///
    /// Missing values are returned as empty strings.
    fn select_entries(&mut self, unit: &str, keys: Option<&[String]>) -> LogItResult<Vec<Entry>>;

    /// Apply mutations as one unit of work
    ///
    /// SQL backends run the whole slice in a single transaction. The CSV
    /// backend replaces each touched file once, after every mutation has
    /// been applied in memory.
    fn apply(&mut self, mutations: &[Mutation]) -> LogItResult<()>;

    fn batch_buffer(&self) -> &BatchBuffer;

    fn batch_buffer_mut(&mut self) -> &mut BatchBuffer;

    /// Apply a mutation now, or buffer it while autobatch is on
    fn submit(&mut self, mutation: Mutation) -> LogItResult<()> {
        if self.is_autobatch_enabled() {
            self.batch_buffer_mut().push(mutation);
            Ok(())
        } else {
            self.apply(std::slice::from_ref(&mutation))
        }
    }

    /// Append a key to an existing unit
    fn add_key(&mut self, unit: &str, key: Key) -> LogItResult<()> {
        self.submit(Mutation::AddKey {
            unit: unit.to_string(),
            key,
        })
    }

    fn add_entry(&mut self, unit: &str, entry: Entry) -> LogItResult<()> {
        self.submit(Mutation::AddEntry {
            unit: unit.to_string(),
            entry,
        })
    }

    /// Overwrite `values` in every entry matching `selector`
    fn update_entries(&mut self, unit: &str, selector: Selector, values: Entry) -> LogItResult<()> {
        self.submit(Mutation::UpdateEntries {
            unit: unit.to_string(),
            selector,
            values,
        })
    }

    /// Remove every entry matching `selector`
    fn erase_entries(&mut self, unit: &str, selector: Selector) -> LogItResult<()> {
        self.submit(Mutation::EraseEntries {
            unit: unit.to_string(),
            selector,
        })
    }

    /// Remove every entry of a unit, keeping its keys
    fn erase_unit(&mut self, unit: &str) -> LogItResult<()> {
        self.submit(Mutation::EraseUnit {
            unit: unit.to_string(),
        })
    }

    fn set_autobatch_enabled(&mut self, enabled: bool) {
        self.batch_buffer_mut().set_enabled(enabled);
    }

    fn is_autobatch_enabled(&self) -> bool {
        self.batch_buffer().is_enabled()
    }

    fn pending_mutations(&self) -> usize {
        self.batch_buffer().len()
    }

    /// Flush the batch buffer as a single unit of work
    ///
    /// The buffer is drained whether or not the flush succeeds. Returns the
    /// number of mutations applied.
    fn execute_batch(&mut self) -> LogItResult<usize> {
        let mutations = self.batch_buffer_mut().take();
        if mutations.is_empty() {
            return Ok(0);
        }
        self.apply(&mutations)
            .map_err(|e| LogItError::Batch(format!("{} mutations not applied: {}", mutations.len(), e)))?;
        debug!(count = mutations.len(), "batch executed");
        Ok(mutations.len())
    }

    /// Discard unflushed mutations, returning how many were dropped
    fn clear_batch(&mut self) -> usize {
        self.batch_buffer_mut().clear()
    }
}

/// Build and connect the configured backend
///
/// # Errors
///
/// Any failure is reported as [`LogItError::Connection`]; the caller cannot
/// run without durable storage.
pub fn open_storage(
    backend: &StorageBackend,
    paths: &LogItPaths,
) -> LogItResult<Box<dyn Storage + Send>> {
    let mut storage: Box<dyn Storage + Send> = match backend {
        StorageBackend::Sqlite { filename } => Box::new(SqliteStorage::new(paths.data_file(filename))),
        StorageBackend::Csv { directory } => Box::new(CsvStorage::new(paths.data_file(directory))),
        #[cfg(feature = "postgres")]
        StorageBackend::Postgres {
            host,
            port,
            user,
            password,
            database,
        } => Box::new(PostgresStorage::new(
            host.clone(),
            *port,
            user.clone(),
            password.clone(),
            database.clone(),
        )),
        #[cfg(not(feature = "postgres"))]
        StorageBackend::Postgres { .. } => {
            return Err(LogItError::Connection(
                "PostgreSQL support was not compiled in".into(),
            ))
        }
    };

    storage.connect().map_err(|e| match e {
        LogItError::Connection(_) => e,
        other => LogItError::Connection(other.to_string()),
    })?;
    debug!(backend = backend.name(), "storage connected");
    Ok(storage)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_open_storage_sqlite_in_data_dir() {
        let dir = TempDir::new().unwrap();
        let paths = LogItPaths::with_base_dir(dir.path().to_path_buf());

        let mut storage = open_storage(&StorageBackend::default(), &paths).unwrap();
        storage
            .create_unit_if_not_exists("accounts", &[Key::new("username", KeyType::ShortText)])
            .unwrap();
        storage.close().unwrap();

        assert!(dir.path().join("accounts.db").exists());
    }

    #[test]
    fn test_open_storage_csv() {
        let dir = TempDir::new().unwrap();
        let paths = LogItPaths::with_base_dir(dir.path().to_path_buf());
        let backend = StorageBackend::Csv {
            directory: "units".into(),
        };

        let mut storage = open_storage(&backend, &paths).unwrap();
        storage.ping().unwrap();
        assert!(dir.path().join("units").is_dir());
    }

    #[test]
    fn test_unbatched_calls_apply_immediately() {
        let dir = TempDir::new().unwrap();
        let mut storage = SqliteStorage::new(dir.path().join("a.db"));
        storage.connect().unwrap();
        storage
            .create_unit_if_not_exists("accounts", &[Key::new("username", KeyType::ShortText)])
            .unwrap();

        storage.add_entry("accounts", Entry::new().with("username", "a")).unwrap();
        assert_eq!(storage.pending_mutations(), 0);

        storage.set_autobatch_enabled(true);
        storage.add_entry("accounts", Entry::new().with("username", "b")).unwrap();
        assert_eq!(storage.pending_mutations(), 1);
        assert_eq!(storage.select_entries("accounts", None).unwrap().len(), 1);

        assert_eq!(storage.execute_batch().unwrap(), 1);
        assert_eq!(storage.select_entries("accounts", None).unwrap().len(), 2);
        storage.set_autobatch_enabled(false);
    }

    #[test]
    fn test_clear_batch_discards() {
        let mut storage = SqliteStorage::in_memory();
        storage.connect().unwrap();
        storage
            .create_unit_if_not_exists("accounts", &[Key::new("username", KeyType::ShortText)])
            .unwrap();

        storage.set_autobatch_enabled(true);
        storage.add_entry("accounts", Entry::new().with("username", "a")).unwrap();
        storage.erase_unit("accounts").unwrap();
        assert_eq!(storage.clear_batch(), 2);
        assert_eq!(storage.execute_batch().unwrap(), 0);
    }
}
