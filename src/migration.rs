//! Legacy inventory import
//!
//! Older releases kept player inventories in an `inventories` unit. On start
//! its entries are handed to an [`InventorySink`] once and the unit is
//! truncated.

use tracing::{debug, info};

use crate::error::LogItResult;
use crate::storage::{Entry, Storage};

pub const INVENTORIES_UNIT: &str = "inventories";

/// One row of the legacy `inventories` unit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LegacyInventory {
    pub username: String,
    pub world: String,
    pub contents: String,
    pub armor: String,
}

impl LegacyInventory {
    fn from_entry(entry: &Entry) -> Self {
        let value = |key: &str| entry.get(key).unwrap_or("").to_string();
        Self {
            username: value("username"),
            world: value("world"),
            contents: value("inv_contents"),
            armor: value("inv_armor"),
        }
    }
}

/// Receiver for migrated inventories
pub trait InventorySink {
    fn accept(&mut self, inventory: LegacyInventory) -> LogItResult<()>;
}

/// Default sink: inventory serialization lives outside the core
#[derive(Debug, Default)]
pub struct DiscardingSink;

impl InventorySink for DiscardingSink {
    fn accept(&mut self, inventory: LegacyInventory) -> LogItResult<()> {
        debug!(username = %inventory.username, world = %inventory.world, "legacy inventory discarded");
        Ok(())
    }
}

/// Hand every legacy inventory to `sink`, then erase the unit
///
/// The unit is only erased once the sink accepted every entry. Returns the
/// number of inventories migrated; zero when the unit does not exist.
pub fn migrate_legacy_inventories<S>(storage: &mut S, sink: &mut dyn InventorySink) -> LogItResult<usize>
where
    S: Storage + ?Sized,
{
    if !storage.unit_exists(INVENTORIES_UNIT)? {
        return Ok(0);
    }

    let entries = storage.select_entries(INVENTORIES_UNIT, None)?;
    let count = entries.len();
    for entry in &entries {
        sink.accept(LegacyInventory::from_entry(entry))?;
    }
    storage.erase_unit(INVENTORIES_UNIT)?;

    if count > 0 {
        info!(count, "legacy inventories migrated");
    }
    Ok(count)
}
