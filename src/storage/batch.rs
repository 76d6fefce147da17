//! Buffered mutations
//!
//! With autobatch enabled a backend records each mutating call as a
//! [`Mutation`] instead of applying it; `execute_batch` hands the whole list
//! to [`Storage::apply`] as one unit of work. [`BatchGuard`] scopes that
//! window so a batch can never be left open by an early return.

use std::ops::{Deref, DerefMut};

use tracing::{debug, warn};

use super::entry::{Entry, Key, Selector};
use super::Storage;
use crate::error::LogItResult;

/// A single row- or schema-level change
#[derive(Debug, Clone, PartialEq)]
pub enum Mutation {
    AddKey {
        unit: String,
        key: Key,
    },
    AddEntry {
        unit: String,
        entry: Entry,
    },
    UpdateEntries {
        unit: String,
        selector: Selector,
        values: Entry,
    },
    EraseEntries {
        unit: String,
        selector: Selector,
    },
    /// Remove every entry, keep the keys
    EraseUnit {
        unit: String,
    },
}

impl Mutation {
    /// Unit this mutation targets
    pub fn unit(&self) -> &str {
        match self {
            Self::AddKey { unit, .. }
            | Self::AddEntry { unit, .. }
            | Self::UpdateEntries { unit, .. }
            | Self::EraseEntries { unit, .. }
            | Self::EraseUnit { unit } => unit,
        }
    }
}

/// Autobatch flag plus the mutations recorded while it is on
#[derive(Debug, Default)]
pub struct BatchBuffer {
    enabled: bool,
    pending: Vec<Mutation>,
}

impl BatchBuffer {
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    pub fn push(&mut self, mutation: Mutation) {
        self.pending.push(mutation);
    }

    /// Drain everything buffered so far
    pub fn take(&mut self) -> Vec<Mutation> {
        std::mem::take(&mut self.pending)
    }

    /// Discard everything buffered so far, returning how much was dropped
    pub fn clear(&mut self) -> usize {
        let dropped = self.pending.len();
        self.pending.clear();
        dropped
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

/// Scoped batch window over a storage backend
///
/// Created with autobatch on and an empty buffer. [`BatchGuard::commit`]
/// flushes; dropping the guard without committing discards whatever was
/// buffered. Either way autobatch is switched off again.
///
/// ```rust,ignore
/// let mut batch = BatchGuard::begin(storage.as_mut());
/// for entry in entries {
///     batch.add_entry("accounts", entry)?;
/// }
/// batch.commit()?;
/// ```
pub struct BatchGuard<'a, S: Storage + ?Sized> {
    storage: &'a mut S,
    committed: bool,
}

impl<'a, S: Storage + ?Sized> BatchGuard<'a, S> {
    /// Open a batch window
    pub fn begin(storage: &'a mut S) -> Self {
        let stale = storage.clear_batch();
        if stale > 0 {
            warn!(dropped = stale, "discarding mutations left over from an unfinished batch");
        }
        storage.set_autobatch_enabled(true);
        Self {
            storage,
            committed: false,
        }
    }

    /// Number of mutations buffered so far
    pub fn pending(&self) -> usize {
        self.storage.pending_mutations()
    }

    /// Flush the buffered mutations as one unit of work
    ///
    /// Returns the number of mutations applied.
    pub fn commit(mut self) -> LogItResult<usize> {
        self.committed = true;
        let applied = self.storage.execute_batch()?;
        debug!(applied, "batch committed");
        Ok(applied)
    }
}

impl<S: Storage + ?Sized> Deref for BatchGuard<'_, S> {
    type Target = S;

    fn deref(&self) -> &S {
        self.storage
    }
}

impl<S: Storage + ?Sized> DerefMut for BatchGuard<'_, S> {
    fn deref_mut(&mut self) -> &mut S {
        self.storage
    }
}

impl<S: Storage + ?Sized> Drop for BatchGuard<'_, S> {
    fn drop(&mut self) {
        if !self.committed {
            let dropped = self.storage.clear_batch();
            if dropped > 0 {
                debug!(dropped, "uncommitted batch discarded");
            }
        }
        self.storage.set_autobatch_enabled(false);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{CsvStorage, KeyType};
    use tempfile::TempDir;

    fn open_csv(dir: &TempDir) -> CsvStorage {
        let mut storage = CsvStorage::new(dir.path().to_path_buf());
        storage.connect().unwrap();
        storage
            .create_unit_if_not_exists("accounts", &[Key::new("username", KeyType::ShortText)])
            .unwrap();
        storage
    }

    #[test]
    fn test_commit_applies_buffered_mutations() {
        let dir = TempDir::new().unwrap();
        let mut storage = open_csv(&dir);

        let mut batch = BatchGuard::begin(&mut storage);
        batch.add_entry("accounts", Entry::new().with("username", "a")).unwrap();
        batch.add_entry("accounts", Entry::new().with("username", "b")).unwrap();
        assert_eq!(batch.pending(), 2);
        assert_eq!(batch.commit().unwrap(), 2);

        assert!(!storage.is_autobatch_enabled());
        assert_eq!(storage.select_entries("accounts", None).unwrap().len(), 2);
    }

    #[test]
    fn test_drop_without_commit_discards() {
        let dir = TempDir::new().unwrap();
        let mut storage = open_csv(&dir);

        {
            let mut batch = BatchGuard::begin(&mut storage);
            batch.add_entry("accounts", Entry::new().with("username", "a")).unwrap();
        }

        assert!(!storage.is_autobatch_enabled());
        assert_eq!(storage.pending_mutations(), 0);
        assert!(storage.select_entries("accounts", None).unwrap().is_empty());
    }

    #[test]
    fn test_buffer_take_and_clear() {
        let mut buffer = BatchBuffer::default();
        buffer.push(Mutation::EraseUnit {
            unit: "accounts".into(),
        });
        buffer.push(Mutation::EraseUnit {
            unit: "inventories".into(),
        });

        let drained = buffer.take();
        assert_eq!(drained.len(), 2);
        assert_eq!(drained[1].unit(), "inventories");
        assert!(buffer.is_empty());

        buffer.push(Mutation::EraseUnit {
            unit: "accounts".into(),
        });
        assert_eq!(buffer.clear(), 1);
    }
}
