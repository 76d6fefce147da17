//! Flat-file backend
//!
//! Each unit lives in `<directory>/<unit>.csv`. The header row names the
//! keys as `name:type`; every following row is one entry, in file order.
//! A batch is applied to the in-memory tables first and each touched file
//! is then replaced atomically, once.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use tracing::debug;

use super::batch::{BatchBuffer, Mutation};
use super::entry::{Entry, Key, KeyType, Selector};
use super::file_io::write_atomic;
use super::Storage;
use crate::error::{LogItError, LogItResult};

/// CSV-file-backed storage
pub struct CsvStorage {
    directory: PathBuf,
    connected: bool,
    batch: BatchBuffer,
}

/// One unit loaded into memory
#[derive(Debug, Clone)]
struct Table {
    keys: Vec<Key>,
    rows: Vec<Vec<String>>,
}

impl Table {
    fn index_of(&self, key: &str) -> Option<usize> {
        self.keys.iter().position(|k| k.name == key)
    }

    fn row_matches(&self, row: &[String], selector: &Selector) -> bool {
        selector.conditions().iter().all(|(key, value)| {
            self.index_of(key)
                .and_then(|i| row.get(i))
                .map(String::as_str)
                .unwrap_or("")
                == value
        })
    }

    fn entry(&self, row: &[String], keys: &[String]) -> Entry {
        keys.iter()
            .map(|key| {
                let value = self
                    .index_of(key)
                    .and_then(|i| row.get(i))
                    .cloned()
                    .unwrap_or_default();
                (key.clone(), value)
            })
            .collect()
    }

    fn require_key(&self, unit: &str, key: &str) -> LogItResult<usize> {
        self.index_of(key)
            .ok_or_else(|| LogItError::Storage(format!("Unit {} has no key {}", unit, key)))
    }

    fn apply(&mut self, mutation: &Mutation) -> LogItResult<()> {
        match mutation {
            Mutation::AddKey { unit, key } => {
                if self.index_of(&key.name).is_some() {
                    return Err(LogItError::Schema(format!(
                        "Unit {} already has key {}",
                        unit, key.name
                    )));
                }
                self.keys.push(key.clone());
                for row in &mut self.rows {
                    row.push(String::new());
                }
            }
            Mutation::AddEntry { unit, entry } => {
                let mut row = vec![String::new(); self.keys.len()];
                for (key, value) in entry.iter() {
                    let i = self.require_key(unit, key)?;
                    row[i] = value.to_string();
                }
                self.rows.push(row);
            }
            Mutation::UpdateEntries {
                unit,
                selector,
                values,
            } => {
                let mut targets: Vec<(usize, String)> = Vec::with_capacity(values.len());
                for (key, value) in values.iter() {
                    targets.push((self.require_key(unit, key)?, value.to_string()));
                }
                let matching: Vec<usize> = (0..self.rows.len())
                    .filter(|&r| self.row_matches(&self.rows[r], selector))
                    .collect();
                for r in matching {
                    for (i, value) in &targets {
                        self.rows[r][*i] = value.clone();
                    }
                }
            }
            Mutation::EraseEntries { selector, .. } => {
                let keep: Vec<Vec<String>> = self
                    .rows
                    .iter()
                    .filter(|row| !self.row_matches(row, selector))
                    .cloned()
                    .collect();
                self.rows = keep;
            }
            Mutation::EraseUnit { .. } => self.rows.clear(),
        }
        Ok(())
    }
}

impl CsvStorage {
    /// Storage rooted at `directory`; created on connect
    pub fn new(directory: PathBuf) -> Self {
        Self {
            directory,
            connected: false,
            batch: BatchBuffer::default(),
        }
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    fn ensure_connected(&self) -> LogItResult<()> {
        if self.connected {
            Ok(())
        } else {
            Err(LogItError::Connection("CSV storage is not connected".into()))
        }
    }

    fn unit_path(&self, unit: &str) -> LogItResult<PathBuf> {
        if unit.is_empty() || unit.contains(['/', '\\']) || unit.starts_with('.') {
            return Err(LogItError::Validation(format!("Invalid unit name: {}", unit)));
        }
        Ok(self.directory.join(format!("{}.csv", unit)))
    }

    fn load_table(&self, unit: &str) -> LogItResult<Table> {
        self.ensure_connected()?;
        let path = self.unit_path(unit)?;
        if !path.exists() {
            return Err(LogItError::Schema(format!("Unit does not exist: {}", unit)));
        }

        let mut reader = ::csv::ReaderBuilder::new()
            .flexible(true)
            .from_path(&path)
            .map_err(|e| LogItError::Io(format!("Failed to open {}: {}", path.display(), e)))?;

        let keys: Vec<Key> = reader.headers()?.iter().map(parse_header_cell).collect();

        let mut rows = Vec::new();
        for record in reader.records() {
            let record = record?;
            let mut row: Vec<String> = record.iter().map(str::to_string).collect();
            row.resize(keys.len(), String::new());
            rows.push(row);
        }

        Ok(Table { keys, rows })
    }

    fn write_table(&self, unit: &str, table: &Table) -> LogItResult<()> {
        let path = self.unit_path(unit)?;
        write_atomic(&path, |writer| {
            let mut csv_writer = ::csv::Writer::from_writer(writer);
            csv_writer.write_record(table.keys.iter().map(header_cell))?;
            for row in &table.rows {
                csv_writer.write_record(row)?;
            }
            csv_writer.flush()?;
            Ok(())
        })
    }
}

fn header_cell(key: &Key) -> String {
    format!("{}:{}", key.name, key.key_type)
}

fn parse_header_cell(cell: &str) -> Key {
    match cell.rsplit_once(':') {
        Some((name, ty)) => match KeyType::parse(ty) {
            Some(key_type) => Key::new(name, key_type),
            None => Key::new(cell, KeyType::LongText),
        },
        None => Key::new(cell, KeyType::LongText),
    }
}

impl Storage for CsvStorage {
    fn connect(&mut self) -> LogItResult<()> {
        std::fs::create_dir_all(&self.directory).map_err(|e| {
            LogItError::Connection(format!(
                "Cannot create CSV directory {}: {}",
                self.directory.display(),
                e
            ))
        })?;
        self.connected = true;
        Ok(())
    }

    fn close(&mut self) -> LogItResult<()> {
        self.connected = false;
        Ok(())
    }

    fn ping(&mut self) -> LogItResult<()> {
        self.ensure_connected()?;
        if self.directory.is_dir() {
            Ok(())
        } else {
            Err(LogItError::Connection(format!(
                "CSV directory missing: {}",
                self.directory.display()
            )))
        }
    }

    fn create_unit_if_not_exists(&mut self, unit: &str, keys: &[Key]) -> LogItResult<()> {
        self.ensure_connected()?;
        if keys.is_empty() {
            return Err(LogItError::Schema(format!("Unit {} declares no keys", unit)));
        }
        if self.unit_path(unit)?.exists() {
            return Ok(());
        }
        let table = Table {
            keys: keys.to_vec(),
            rows: Vec::new(),
        };
        self.write_table(unit, &table)
            .map_err(|e| LogItError::Schema(format!("Cannot create unit {}: {}", unit, e)))
    }

    fn unit_exists(&mut self, unit: &str) -> LogItResult<bool> {
        self.ensure_connected()?;
        Ok(self.unit_path(unit)?.exists())
    }

    fn get_keys(&mut self, unit: &str) -> LogItResult<Vec<Key>> {
        Ok(self.load_table(unit)?.keys)
    }

    fn select_entries(&mut self, unit: &str, keys: Option<&[String]>) -> LogItResult<Vec<Entry>> {
        let table = self.load_table(unit)?;
        let all: Vec<String>;
        let keys = match keys {
            Some(keys) => keys,
            None => {
                all = table.keys.iter().map(|k| k.name.clone()).collect();
                all.as_slice()
            }
        };
        Ok(table.rows.iter().map(|row| table.entry(row, keys)).collect())
    }

    fn apply(&mut self, mutations: &[Mutation]) -> LogItResult<()> {
        // Unit name -> table, in first-touched order
        let mut touched: Vec<String> = Vec::new();
        let mut tables: HashMap<String, Table> = HashMap::new();

        for mutation in mutations {
            let unit = mutation.unit();
            if !tables.contains_key(unit) {
                tables.insert(unit.to_string(), self.load_table(unit)?);
                touched.push(unit.to_string());
            }
            if let Some(table) = tables.get_mut(unit) {
                table.apply(mutation)?;
            }
        }

        for unit in &touched {
            if let Some(table) = tables.get(unit) {
                self.write_table(unit, table)?;
            }
        }
        debug!(count = mutations.len(), units = touched.len(), "csv units rewritten");
        Ok(())
    }

    fn batch_buffer(&self) -> &BatchBuffer {
        &self.batch
    }

    fn batch_buffer_mut(&mut self) -> &mut BatchBuffer {
        &mut self.batch
    }
}
