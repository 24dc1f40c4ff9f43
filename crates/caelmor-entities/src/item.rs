//! Item runtime instances.
//!
//! Every item is in exactly one [`ItemLocation`] and owned by the context
//! that location implies. Moves replace the location in one step; owner
//! validation against identities, NPCs, and worlds is done by the runtime
//! before [`ItemRegistry::relocate`] is called.

use std::collections::BTreeMap;

use caelmor_types::{ItemId, ItemLocation, ItemOwner, ItemRecord};
use tracing::debug;

use crate::error::EntityError;

/// Registry of all item instances.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ItemRegistry {
    items: BTreeMap<ItemId, ItemRecord>,
}

impl ItemRegistry {
    /// Create an empty registry.
    pub const fn new() -> Self {
        Self {
            items: BTreeMap::new(),
        }
    }

    /// Insert a new item.
    ///
    /// # Errors
    ///
    /// Returns [`EntityError::DuplicateItem`] if the id exists.
    pub fn insert(&mut self, record: ItemRecord) -> Result<(), EntityError> {
        if self.items.contains_key(&record.id) {
            return Err(EntityError::DuplicateItem(record.id));
        }
        self.items.insert(record.id, record);
        Ok(())
    }

    /// Look up an item.
    pub fn get(&self, id: ItemId) -> Option<&ItemRecord> {
        self.items.get(&id)
    }

    /// All items in id order.
    pub fn iter(&self) -> impl Iterator<Item = &ItemRecord> {
        self.items.values()
    }

    /// Items owned by a context, in id order.
    pub fn owned_by(&self, owner: ItemOwner) -> Vec<ItemId> {
        self.items
            .values()
            .filter(|i| i.location.owner() == owner)
            .map(|i| i.id)
            .collect()
    }

    /// Move an item to a new location, returning the old one.
    ///
    /// # Errors
    ///
    /// Returns [`EntityError::ItemNotFound`] or [`EntityError::SlotOccupied`].
    pub fn relocate(&mut self, id: ItemId, to: ItemLocation) -> Result<ItemLocation, EntityError> {
        self.check_relocation(id, to)?;
        let item = self.items.get_mut(&id).ok_or(EntityError::ItemNotFound(id))?;
        let from = item.location;
        item.location = to;
        debug!(item = %id, ?from, ?to, "Item relocated");
        Ok(from)
    }

    /// Check that an item exists and its target slot, if any, is free.
    ///
    /// # Errors
    ///
    /// Returns [`EntityError::ItemNotFound`] or [`EntityError::SlotOccupied`].
    pub fn check_relocation(&self, id: ItemId, to: ItemLocation) -> Result<(), EntityError> {
        if !self.items.contains_key(&id) {
            return Err(EntityError::ItemNotFound(id));
        }
        if let ItemLocation::Equipped { player, slot } = to {
            if let Some(other) = self
                .items
                .values()
                .find(|i| i.id != id && i.location == to)
            {
                return Err(EntityError::SlotOccupied {
                    player,
                    slot,
                    item: other.id,
                });
            }
        }
        Ok(())
    }

    /// Remove every item owned by `owner`, returning their records.
    ///
    /// Used when a world unloads: its placed items and the items its NPCs
    /// held leave the runtime together.
    pub fn take_owned_by(&mut self, owner: ItemOwner) -> Vec<ItemRecord> {
        let ids = self.owned_by(owner);
        ids.iter().filter_map(|id| self.items.remove(id)).collect()
    }

    /// Persisted records in id order.
    pub fn records(&self) -> Vec<ItemRecord> {
        self.items.values().cloned().collect()
    }
}
