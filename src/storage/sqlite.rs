//! Embedded SQL backend
//!
//! One SQLite file holds every unit as a table. Each [`Storage::apply`] call
//! runs inside a single transaction, so a flushed batch is all-or-nothing.
//! Backup files always use this backend.

use std::path::{Path, PathBuf};
use std::time::Duration;

use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection, OptionalExtension, Transaction};
use tracing::debug;

use super::batch::{BatchBuffer, Mutation};
use super::entry::{Entry, Key, KeyType};
use super::sql::{self, Dialect};
use super::Storage;
use crate::error::{LogItError, LogItResult};

/// SQLite-backed storage
pub struct SqliteStorage {
    /// Database file; `None` for an in-memory database
    path: Option<PathBuf>,
    conn: Option<Connection>,
    batch: BatchBuffer,
}

impl SqliteStorage {
    /// Storage backed by the given database file
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
            conn: None,
            batch: BatchBuffer::default(),
        }
    }

    /// Storage backed by a private in-memory database
    pub fn in_memory() -> Self {
        Self {
            path: None,
            conn: None,
            batch: BatchBuffer::default(),
        }
    }

    /// Database file, if any
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn conn(&self) -> LogItResult<&Connection> {
        self.conn
            .as_ref()
            .ok_or_else(|| LogItError::Connection("SQLite storage is not connected".into()))
    }

    fn conn_mut(&mut self) -> LogItResult<&mut Connection> {
        self.conn
            .as_mut()
            .ok_or_else(|| LogItError::Connection("SQLite storage is not connected".into()))
    }
}

fn value_to_string(value: Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::Integer(i) => i.to_string(),
        Value::Real(f) => f.to_string(),
        Value::Text(s) => s,
        Value::Blob(b) => String::from_utf8_lossy(&b).into_owned(),
    }
}

fn read_keys(conn: &Connection, unit: &str) -> LogItResult<Vec<Key>> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", sql::quote_ident(unit)))?;
    let keys = stmt
        .query_map([], |row| {
            let name: String = row.get(1)?;
            let declared: String = row.get(2)?;
            Ok(Key::new(
                name,
                sql::key_type_from_declared(Dialect::Sqlite, &declared),
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    if keys.is_empty() {
        return Err(LogItError::Schema(format!("Unit does not exist: {}", unit)));
    }
    Ok(keys)
}

fn apply_mutation(tx: &Transaction<'_>, mutation: &Mutation) -> LogItResult<()> {
    match mutation {
        Mutation::AddKey { unit, key } => {
            tx.execute(&sql::add_key(Dialect::Sqlite, unit, key), [])?;
        }
        Mutation::AddEntry { unit, entry } => {
            if entry.is_empty() {
                return Ok(());
            }
            let columns: Vec<(&str, KeyType)> =
                entry.keys().map(|k| (k, KeyType::LongText)).collect();
            let values: Vec<&str> = entry.iter().map(|(_, v)| v).collect();
            tx.execute(
                &sql::insert(Dialect::Sqlite, unit, &columns),
                params_from_iter(values),
            )?;
        }
        Mutation::UpdateEntries {
            unit,
            selector,
            values,
        } => {
            if values.is_empty() {
                return Ok(());
            }
            let set: Vec<(&str, KeyType)> =
                values.keys().map(|k| (k, KeyType::LongText)).collect();
            let where_columns: Vec<&str> =
                selector.conditions().iter().map(|(k, _)| k.as_str()).collect();
            let params: Vec<&str> = values
                .iter()
                .map(|(_, v)| v)
                .chain(selector.conditions().iter().map(|(_, v)| v.as_str()))
                .collect();
            tx.execute(
                &sql::update(Dialect::Sqlite, unit, &set, &where_columns),
                params_from_iter(params),
            )?;
        }
        Mutation::EraseEntries { unit, selector } => {
            let where_columns: Vec<&str> =
                selector.conditions().iter().map(|(k, _)| k.as_str()).collect();
            let params: Vec<&str> =
                selector.conditions().iter().map(|(_, v)| v.as_str()).collect();
            tx.execute(
                &sql::delete(Dialect::Sqlite, unit, &where_columns),
                params_from_iter(params),
            )?;
        }
        Mutation::EraseUnit { unit } => {
            tx.execute(&sql::delete(Dialect::Sqlite, unit, &[]), [])?;
        }
    }
    Ok(())
}

impl Storage for SqliteStorage {
    fn connect(&mut self) -> LogItResult<()> {
        if self.conn.is_some() {
            return Ok(());
        }

        let conn = match &self.path {
            Some(path) => {
                if let Some(parent) = path.parent() {
                    std::fs::create_dir_all(parent).map_err(|e| {
                        LogItError::Connection(format!(
                            "Cannot create directory for {}: {}",
                            path.display(),
                            e
                        ))
                    })?;
                }
                Connection::open(path).map_err(|e| {
                    LogItError::Connection(format!("Cannot open {}: {}", path.display(), e))
                })?
            }
            None => Connection::open_in_memory()
                .map_err(|e| LogItError::Connection(e.to_string()))?,
        };

        conn.busy_timeout(Duration::from_secs(5))
            .map_err(|e| LogItError::Connection(e.to_string()))?;

        self.conn = Some(conn);
        Ok(())
    }

    fn close(&mut self) -> LogItResult<()> {
        if let Some(conn) = self.conn.take() {
            conn.close()
                .map_err(|(_, e)| LogItError::Storage(format!("Failed to close SQLite: {}", e)))?;
        }
        Ok(())
    }

    fn ping(&mut self) -> LogItResult<()> {
        self.conn()?
            .query_row("SELECT 1", [], |row| row.get::<_, i64>(0))
            .map_err(|e| LogItError::Connection(format!("SQLite ping failed: {}", e)))?;
        Ok(())
    }

    fn create_unit_if_not_exists(&mut self, unit: &str, keys: &[Key]) -> LogItResult<()> {
        if keys.is_empty() {
            return Err(LogItError::Schema(format!("Unit {} declares no keys", unit)));
        }
        self.conn()?
            .execute(&sql::create_unit(Dialect::Sqlite, unit, keys), [])
            .map_err(|e| LogItError::Schema(format!("Cannot create unit {}: {}", unit, e)))?;
        Ok(())
    }

    fn unit_exists(&mut self, unit: &str) -> LogItResult<bool> {
        let found = self
            .conn()?
            .query_row(
                "SELECT name FROM sqlite_master WHERE type = 'table' AND name = ?1",
                [unit],
                |row| row.get::<_, String>(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    fn get_keys(&mut self, unit: &str) -> LogItResult<Vec<Key>> {
        read_keys(self.conn()?, unit)
    }

    fn select_entries(&mut self, unit: &str, keys: Option<&[String]>) -> LogItResult<Vec<Entry>> {
        let conn = self.conn()?;
        let columns: Vec<String> = match keys {
            Some(keys) => keys.to_vec(),
            None => read_keys(conn, unit)?.into_iter().map(|k| k.name).collect(),
        };
        if columns.is_empty() {
            return Ok(Vec::new());
        }

        let mut stmt = conn.prepare(&sql::select(Dialect::Sqlite, unit, &columns))?;
        let entries = stmt
            .query_map([], |row| {
                let mut entry = Entry::new();
                for (i, column) in columns.iter().enumerate() {
                    let value: Value = row.get(i)?;
                    entry.put(column.clone(), value_to_string(value));
                }
                Ok(entry)
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(entries)
    }

    fn apply(&mut self, mutations: &[Mutation]) -> LogItResult<()> {
        if mutations.is_empty() {
            return Ok(());
        }
        let conn = self.conn_mut()?;
        let tx = conn.transaction()?;
        for mutation in mutations {
            apply_mutation(&tx, mutation)?;
        }
        tx.commit()?;
        debug!(count = mutations.len(), "sqlite transaction committed");
        Ok(())
    }

    fn batch_buffer(&self) -> &BatchBuffer {
        &self.batch
    }

    fn batch_buffer_mut(&mut self) -> &mut BatchBuffer {
        &mut self.batch
    }
}
