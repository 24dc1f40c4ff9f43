//! Zone runtime instances.
//!
//! A zone is a structural subdivision of exactly one world. It provides
//! context (ambient values mediated by its world) and never owns entities.
//! There is deliberately no way for a zone to change its own tick
//! participation: it is always derived from the owning world.

use std::collections::BTreeMap;

use caelmor_types::{WorldId, ZoneId, ZoneRecord};

use crate::error::WorldError;

/// Runtime state of one zone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ZoneRuntime {
    id: ZoneId,
    world: WorldId,
    name: String,
    context: BTreeMap<String, i64>,
}

impl ZoneRuntime {
    /// Create an empty zone owned by `world`.
    pub fn new(id: ZoneId, world: WorldId, name: impl Into<String>) -> Self {
        Self {
            id,
            world,
            name: name.into(),
            context: BTreeMap::new(),
        }
    }

    /// Rebuild a zone from its persisted record.
    pub fn from_record(record: &ZoneRecord, world: WorldId) -> Self {
        Self {
            id: record.id,
            world,
            name: record.name.clone(),
            context: record.context.iter().cloned().collect(),
        }
    }

    /// Capture the persisted record for this zone.
    pub fn to_record(&self) -> ZoneRecord {
        ZoneRecord {
            id: self.id,
            name: self.name.clone(),
            context: self
                .context
                .iter()
                .map(|(k, v)| (k.clone(), *v))
                .collect(),
        }
    }

    /// Zone identity.
    pub const fn id(&self) -> ZoneId {
        self.id
    }

    /// Owning world.
    pub const fn world(&self) -> WorldId {
        self.world
    }

    /// Human-readable name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Read a context value (0 when unset).
    pub fn context_value(&self, key: &str) -> i64 {
        self.context.get(key).copied().unwrap_or(0)
    }

    /// All context values in key order.
    pub const fn context(&self) -> &BTreeMap<String, i64> {
        &self.context
    }

    /// Apply a context delta. Only the owning world calls this, through
    /// cross-zone mediation.
    pub(crate) fn apply_delta(&mut self, key: &str, delta: i64) -> Result<i64, WorldError> {
        let current = self.context_value(key);
        let next = current
            .checked_add(delta)
            .ok_or_else(|| WorldError::ContextOverflow {
                zone: self.id,
                key: key.to_owned(),
            })?;
        self.context.insert(key.to_owned(), next);
        Ok(next)
    }
}
