//! Startup schema reconciliation
//!
//! Brings an existing unit up to the configured key set by appending the
//! keys it lacks. Keys are never dropped, renamed or retyped.

use tracing::info;

use super::batch::BatchGuard;
use super::entry::Key;
use super::Storage;
use crate::error::{LogItError, LogItResult};

/// Create `unit` or append its missing keys, returning the keys added
///
/// A freshly created unit reports no added keys. Key names compare
/// case-insensitively. Re-running with the same key set is a no-op.
pub fn reconcile_unit<S>(storage: &mut S, unit: &str, keys: &[Key]) -> LogItResult<Vec<Key>>
where
    S: Storage + ?Sized,
{
    if !storage.unit_exists(unit)? {
        storage.create_unit_if_not_exists(unit, keys)?;
        info!(unit, keys = keys.len(), "unit created");
        return Ok(Vec::new());
    }

    let existing: Vec<String> = storage
        .get_keys(unit)?
        .into_iter()
        .map(|k| k.name.to_lowercase())
        .collect();

    let missing: Vec<Key> = keys
        .iter()
        .filter(|k| !existing.contains(&k.name.to_lowercase()))
        .cloned()
        .collect();

    if missing.is_empty() {
        return Ok(missing);
    }

    let mut batch = BatchGuard::begin(storage);
    for key in &missing {
        batch.add_key(unit, key.clone())?;
    }
    batch
        .commit()
        .map_err(|e| LogItError::Schema(format!("Cannot add keys to {}: {}", unit, e)))?;

    info!(
        unit,
        added = ?missing.iter().map(|k| k.name.as_str()).collect::<Vec<_>>(),
        "unit keys added"
    );
    Ok(missing)
}
