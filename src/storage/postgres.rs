//! Server SQL backend
//!
//! Uses a blocking `postgres::Client`. Values are bound as text and cast to
//! the column type in the statement, so entries stay string-valued on the
//! way in and out.

use std::collections::HashMap;

use ::postgres::{Client, Config, GenericClient, NoTls};
use tracing::debug;

use super::batch::{BatchBuffer, Mutation};
use super::entry::{Entry, Key, KeyType};
use super::sql::{self, Dialect};
use super::Storage;
use crate::error::{LogItError, LogItResult};

/// PostgreSQL-backed storage
pub struct PostgresStorage {
    host: String,
    port: u16,
    user: String,
    password: String,
    database: String,
    client: Option<Client>,
    batch: BatchBuffer,
}

impl PostgresStorage {
    pub fn new(host: String, port: u16, user: String, password: String, database: String) -> Self {
        Self {
            host,
            port,
            user,
            password,
            database,
            client: None,
            batch: BatchBuffer::default(),
        }
    }

    fn client(&mut self) -> LogItResult<&mut Client> {
        self.client
            .as_mut()
            .ok_or_else(|| LogItError::Connection("PostgreSQL storage is not connected".into()))
    }
}

fn read_keys<C: GenericClient>(client: &mut C, unit: &str) -> LogItResult<Vec<Key>> {
    let rows = client.query(
        "SELECT column_name::TEXT, data_type::TEXT FROM information_schema.columns \
         WHERE table_schema = current_schema() AND table_name = $1 \
         ORDER BY ordinal_position",
        &[&unit],
    )?;
    if rows.is_empty() {
        return Err(LogItError::Schema(format!("Unit does not exist: {}", unit)));
    }
    Ok(rows
        .iter()
        .map(|row| {
            let name: String = row.get(0);
            let declared: String = row.get(1);
            Key::new(name, sql::key_type_from_declared(Dialect::Postgres, &declared))
        })
        .collect())
}

/// Column types of a unit, loaded once per transaction
struct KeyTypes {
    units: HashMap<String, Vec<Key>>,
}

impl KeyTypes {
    fn lookup<C: GenericClient>(
        &mut self,
        client: &mut C,
        unit: &str,
        names: &[&str],
    ) -> LogItResult<Vec<KeyType>> {
        if !self.units.contains_key(unit) {
            let keys = read_keys(client, unit)?;
            self.units.insert(unit.to_string(), keys);
        }
        let keys = self.units.get(unit).map(Vec::as_slice).unwrap_or(&[]);
        names
            .iter()
            .map(|name| {
                keys.iter()
                    .find(|k| k.name == *name)
                    .map(|k| k.key_type)
                    .ok_or_else(|| {
                        LogItError::Storage(format!("Unit {} has no key {}", unit, name))
                    })
            })
            .collect()
    }

    fn key_added(&mut self, unit: &str, key: &Key) {
        if let Some(keys) = self.units.get_mut(unit) {
            keys.push(key.clone());
        }
    }
}

fn apply_mutation<C: GenericClient>(
    tx: &mut C,
    types: &mut KeyTypes,
    mutation: &Mutation,
) -> LogItResult<()> {
    match mutation {
        Mutation::AddKey { unit, key } => {
            tx.execute(sql::add_key(Dialect::Postgres, unit, key).as_str(), &[])?;
            types.key_added(unit, key);
        }
        Mutation::AddEntry { unit, entry } => {
            if entry.is_empty() {
                return Ok(());
            }
            let names: Vec<&str> = entry.keys().collect();
            let key_types = types.lookup(tx, unit, &names)?;
            let columns: Vec<(&str, KeyType)> = names.iter().copied().zip(key_types).collect();
            let values: Vec<&str> = entry.iter().map(|(_, v)| v).collect();
            let params: Vec<&(dyn ::postgres::types::ToSql + Sync)> =
                values.iter().map(|v| v as &(dyn ::postgres::types::ToSql + Sync)).collect();
            tx.execute(sql::insert(Dialect::Postgres, unit, &columns).as_str(), &params)?;
        }
        Mutation::UpdateEntries {
            unit,
            selector,
            values,
        } => {
            if values.is_empty() {
                return Ok(());
            }
            let names: Vec<&str> = values.keys().collect();
            let key_types = types.lookup(tx, unit, &names)?;
            let set: Vec<(&str, KeyType)> = names.iter().copied().zip(key_types).collect();
            let where_columns: Vec<&str> =
                selector.conditions().iter().map(|(k, _)| k.as_str()).collect();
            let bound: Vec<&str> = values
                .iter()
                .map(|(_, v)| v)
                .chain(selector.conditions().iter().map(|(_, v)| v.as_str()))
                .collect();
            let params: Vec<&(dyn ::postgres::types::ToSql + Sync)> =
                bound.iter().map(|v| v as &(dyn ::postgres::types::ToSql + Sync)).collect();
            tx.execute(
                sql::update(Dialect::Postgres, unit, &set, &where_columns).as_str(),
                &params,
            )?;
        }
        Mutation::EraseEntries { unit, selector } => {
            let where_columns: Vec<&str> =
                selector.conditions().iter().map(|(k, _)| k.as_str()).collect();
            let bound: Vec<&str> =
                selector.conditions().iter().map(|(_, v)| v.as_str()).collect();
            let params: Vec<&(dyn ::postgres::types::ToSql + Sync)> =
                bound.iter().map(|v| v as &(dyn ::postgres::types::ToSql + Sync)).collect();
            tx.execute(
                sql::delete(Dialect::Postgres, unit, &where_columns).as_str(),
                &params,
            )?;
        }
        Mutation::EraseUnit { unit } => {
            tx.execute(sql::delete(Dialect::Postgres, unit, &[]).as_str(), &[])?;
        }
    }
    Ok(())
}

impl Storage for PostgresStorage {
    fn connect(&mut self) -> LogItResult<()> {
        if self.client.is_some() {
            return Ok(());
        }
        let client = Config::new()
            .host(&self.host)
            .port(self.port)
            .user(&self.user)
            .password(&self.password)
            .dbname(&self.database)
            .connect(NoTls)
            .map_err(|e| {
                LogItError::Connection(format!(
                    "Cannot connect to {}:{}/{}: {}",
                    self.host, self.port, self.database, e
                ))
            })?;
        self.client = Some(client);
        Ok(())
    }

    fn close(&mut self) -> LogItResult<()> {
        if let Some(client) = self.client.take() {
            client
                .close()
                .map_err(|e| LogItError::Storage(format!("Failed to close PostgreSQL: {}", e)))?;
        }
        Ok(())
    }

    fn ping(&mut self) -> LogItResult<()> {
        self.client()?
            .simple_query("SELECT 1")
            .map_err(|e| LogItError::Connection(format!("PostgreSQL ping failed: {}", e)))?;
        Ok(())
    }

    fn create_unit_if_not_exists(&mut self, unit: &str, keys: &[Key]) -> LogItResult<()> {
        if keys.is_empty() {
            return Err(LogItError::Schema(format!("Unit {} declares no keys", unit)));
        }
        self.client()?
            .batch_execute(&sql::create_unit(Dialect::Postgres, unit, keys))
            .map_err(|e| LogItError::Schema(format!("Cannot create unit {}: {}", unit, e)))
    }

    fn unit_exists(&mut self, unit: &str) -> LogItResult<bool> {
        let row = self.client()?.query_one(
            "SELECT EXISTS (SELECT 1 FROM information_schema.tables \
             WHERE table_schema = current_schema() AND table_name = $1)",
            &[&unit],
        )?;
        Ok(row.get(0))
    }

    fn get_keys(&mut self, unit: &str) -> LogItResult<Vec<Key>> {
        read_keys(self.client()?, unit)
    }

    fn select_entries(&mut self, unit: &str, keys: Option<&[String]>) -> LogItResult<Vec<Entry>> {
        let client = self.client()?;
        let columns: Vec<String> = match keys {
            Some(keys) => keys.to_vec(),
            None => read_keys(client, unit)?.into_iter().map(|k| k.name).collect(),
        };
        if columns.is_empty() {
            return Ok(Vec::new());
        }

        let rows = client.query(sql::select(Dialect::Postgres, unit, &columns).as_str(), &[])?;
        Ok(rows
            .iter()
            .map(|row| {
                columns
                    .iter()
                    .enumerate()
                    .map(|(i, column)| {
                        let value: Option<String> = row.get(i);
                        (column.clone(), value.unwrap_or_default())
                    })
                    .collect()
            })
            .collect())
    }

    fn apply(&mut self, mutations: &[Mutation]) -> LogItResult<()> {
        if mutations.is_empty() {
            return Ok(());
        }
        let client = self.client()?;
        let mut tx = client.transaction()?;
        let mut types = KeyTypes {
            units: HashMap::new(),
        };
        for mutation in mutations {
            apply_mutation(&mut tx, &mut types, mutation)?;
        }
        tx.commit()?;
        debug!(count = mutations.len(), "postgres transaction committed");
        Ok(())
    }

    fn batch_buffer(&self) -> &BatchBuffer {
        &self.batch
    }

    fn batch_buffer_mut(&mut self) -> &mut BatchBuffer {
        &mut self.batch
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unconnected() -> PostgresStorage {
        PostgresStorage::new(
            "localhost".into(),
            5432,
            "logit".into(),
            String::new(),
            "logit".into(),
        )
    }

    #[test]
    fn test_operations_require_connection() {
        let mut storage = unconnected();
        assert!(matches!(storage.ping().unwrap_err(), LogItError::Connection(_)));
        assert!(matches!(
            storage.select_entries("accounts", None).unwrap_err(),
            LogItError::Connection(_)
        ));
    }

    #[test]
    fn test_batches_buffer_without_connection() {
        let mut storage = unconnected();
        storage.set_autobatch_enabled(true);
        storage
            .add_entry("accounts", Entry::new().with("username", "alice"))
            .unwrap();
        assert_eq!(storage.pending_mutations(), 1);

        let err = storage.execute_batch().unwrap_err();
        assert!(matches!(err, LogItError::Batch(_)));
        assert_eq!(storage.pending_mutations(), 0);
    }
}
