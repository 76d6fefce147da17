//! Statement building shared by the SQL backends
//!
//! Identifiers are always double-quoted. Values are bound as text; the
//! PostgreSQL dialect casts each bound value to the column type, treating an
//! empty string as NULL, and compares columns as text so every backend sees
//! the same string-valued entries.

use super::entry::{Key, KeyType};

/// SQL flavour
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    Sqlite,
    Postgres,
}

/// Quote an identifier, doubling embedded quotes
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Column type used for a key
pub fn column_type(dialect: Dialect, key_type: KeyType) -> &'static str {
    match (dialect, key_type) {
        (_, KeyType::ShortText) => "VARCHAR(255)",
        (_, KeyType::LongText) => "TEXT",
        (Dialect::Sqlite, KeyType::Integer) => "INTEGER",
        (Dialect::Postgres, KeyType::Integer) => "BIGINT",
        (_, KeyType::Real) => "DOUBLE PRECISION",
        (Dialect::Sqlite, KeyType::Boolean) => "BOOLEAN",
        (Dialect::Postgres, KeyType::Boolean) => "INTEGER",
    }
}

/// Map a declared column type back onto a key type
///
/// Unrecognised declarations are treated as long text.
pub fn key_type_from_declared(dialect: Dialect, declared: &str) -> KeyType {
    let declared = declared.trim().to_uppercase();
    match dialect {
        Dialect::Sqlite => {
            if declared.starts_with("VARCHAR") || declared.starts_with("CHAR") {
                KeyType::ShortText
            } else if declared.starts_with("BOOL") {
                KeyType::Boolean
            } else if declared.contains("INT") {
                KeyType::Integer
            } else if declared.contains("REAL")
                || declared.contains("DOUBLE")
                || declared.contains("FLOA")
            {
                KeyType::Real
            } else {
                KeyType::LongText
            }
        }
        Dialect::Postgres => match declared.as_str() {
            "CHARACTER VARYING" | "CHARACTER" => KeyType::ShortText,
            "BIGINT" => KeyType::Integer,
            "INTEGER" | "SMALLINT" | "BOOLEAN" => KeyType::Boolean,
            "DOUBLE PRECISION" | "REAL" | "NUMERIC" => KeyType::Real,
            _ => KeyType::LongText,
        },
    }
}

fn placeholder(dialect: Dialect, index: usize) -> String {
    match dialect {
        Dialect::Sqlite => format!("?{}", index),
        Dialect::Postgres => format!("${}", index),
    }
}

/// Placeholder for a value written into a column of `key_type`
fn value_placeholder(dialect: Dialect, index: usize, key_type: KeyType) -> String {
    match dialect {
        Dialect::Sqlite => placeholder(dialect, index),
        Dialect::Postgres => match key_type {
            KeyType::ShortText | KeyType::LongText => format!("${}::TEXT", index),
            other => format!(
                "CAST(NULLIF(${}::TEXT, '') AS {})",
                index,
                column_type(dialect, other)
            ),
        },
    }
}

/// `col = value` comparison with missing values reading as empty text
fn condition(dialect: Dialect, column: &str, index: usize) -> String {
    match dialect {
        Dialect::Sqlite => format!(
            "COALESCE({}, '') = {}",
            quote_ident(column),
            placeholder(dialect, index)
        ),
        Dialect::Postgres => format!(
            "COALESCE({}::TEXT, '') = {}::TEXT",
            quote_ident(column),
            placeholder(dialect, index)
        ),
    }
}

fn where_clause(dialect: Dialect, columns: &[&str], first_index: usize) -> String {
    if columns.is_empty() {
        return String::new();
    }
    let conditions: Vec<String> = columns
        .iter()
        .enumerate()
        .map(|(i, column)| condition(dialect, column, first_index + i))
        .collect();
    format!(" WHERE {}", conditions.join(" AND "))
}

pub fn create_unit(dialect: Dialect, unit: &str, keys: &[Key]) -> String {
    let columns: Vec<String> = keys
        .iter()
        .map(|key| {
            format!(
                "{} {}",
                quote_ident(&key.name),
                column_type(dialect, key.key_type)
            )
        })
        .collect();
    format!(
        "CREATE TABLE IF NOT EXISTS {} ({})",
        quote_ident(unit),
        columns.join(", ")
    )
}

pub fn add_key(dialect: Dialect, unit: &str, key: &Key) -> String {
    format!(
        "ALTER TABLE {} ADD COLUMN {} {}",
        quote_ident(unit),
        quote_ident(&key.name),
        column_type(dialect, key.key_type)
    )
}

/// `SELECT` of every column, or of the given columns
///
/// PostgreSQL columns are cast to text so rows decode uniformly.
pub fn select(dialect: Dialect, unit: &str, columns: &[String]) -> String {
    let projection: Vec<String> = columns
        .iter()
        .map(|column| match dialect {
            Dialect::Sqlite => quote_ident(column),
            Dialect::Postgres => format!("{}::TEXT", quote_ident(column)),
        })
        .collect();
    format!("SELECT {} FROM {}", projection.join(", "), quote_ident(unit))
}

pub fn insert(dialect: Dialect, unit: &str, columns: &[(&str, KeyType)]) -> String {
    let names: Vec<String> = columns.iter().map(|(name, _)| quote_ident(name)).collect();
    let values: Vec<String> = columns
        .iter()
        .enumerate()
        .map(|(i, (_, key_type))| value_placeholder(dialect, i + 1, *key_type))
        .collect();
    format!(
        "INSERT INTO {} ({}) VALUES ({})",
        quote_ident(unit),
        names.join(", "),
        values.join(", ")
    )
}

/// `UPDATE`; the `set` values bind first, then the `where` values
pub fn update(
    dialect: Dialect,
    unit: &str,
    set: &[(&str, KeyType)],
    where_columns: &[&str],
) -> String {
    let assignments: Vec<String> = set
        .iter()
        .enumerate()
        .map(|(i, (name, key_type))| {
            format!(
                "{} = {}",
                quote_ident(name),
                value_placeholder(dialect, i + 1, *key_type)
            )
        })
        .collect();
    format!(
        "UPDATE {} SET {}{}",
        quote_ident(unit),
        assignments.join(", "),
        where_clause(dialect, where_columns, set.len() + 1)
    )
}

pub fn delete(dialect: Dialect, unit: &str, where_columns: &[&str]) -> String {
    format!(
        "DELETE FROM {}{}",
        quote_ident(unit),
        where_clause(dialect, where_columns, 1)
    )
}
