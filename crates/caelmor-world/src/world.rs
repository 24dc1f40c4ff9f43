//! World runtime instances.
//!
//! A [`WorldRuntime`] is the highest authority boundary below the server
//! process. It exclusively owns its zones and decides whether they take
//! part in ticks.

use std::collections::BTreeMap;

use caelmor_types::{WorldId, WorldRecord, WorldState, ZoneId};

use crate::error::WorldError;
use crate::zone::ZoneRuntime;

/// Runtime state of one world and the zones it owns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorldRuntime {
    id: WorldId,
    name: String,
    state: WorldState,
    default_zone: ZoneId,
    zones: BTreeMap<ZoneId, ZoneRuntime>,
}

impl WorldRuntime {
    /// Build a world from its persisted record. The world starts `Loaded`
    /// and does not tick until explicitly activated.
    ///
    /// # Errors
    ///
    /// Returns [`WorldError::InvalidComposition`] if the record has no zones
    /// or its default zone is not one of them, and
    /// [`WorldError::DuplicateZone`] if a zone id repeats.
    pub fn from_record(record: &WorldRecord) -> Result<Self, WorldError> {
        let mut zones = BTreeMap::new();
        for zone in &record.zones {
            if zones
                .insert(zone.id, ZoneRuntime::from_record(zone, record.id))
                .is_some()
            {
                return Err(WorldError::DuplicateZone(zone.id));
            }
        }
        if !zones.contains_key(&record.default_zone) {
            return Err(WorldError::InvalidComposition(record.id));
        }
        Ok(Self {
            id: record.id,
            name: record.name.clone(),
            state: WorldState::Loaded,
            default_zone: record.default_zone,
            zones,
        })
    }

    /// Capture the persisted structural record. Lifecycle state is runtime
    /// only and is not part of the record.
    pub fn to_record(&self) -> WorldRecord {
        WorldRecord {
            id: self.id,
            name: self.name.clone(),
            default_zone: self.default_zone,
            zones: self.zones.values().map(ZoneRuntime::to_record).collect(),
        }
    }

    /// World identity.
    pub const fn id(&self) -> WorldId {
        self.id
    }

    /// Human-readable name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current lifecycle state.
    pub const fn state(&self) -> WorldState {
        self.state
    }

    /// Zone that receives entities without a prior residency.
    pub const fn default_zone(&self) -> ZoneId {
        self.default_zone
    }

    /// Whether this world (and therefore each of its zones) takes part in
    /// ticks.
    pub const fn is_participating(&self) -> bool {
        matches!(self.state, WorldState::Active)
    }

    /// Look up an owned zone.
    pub fn zone(&self, id: ZoneId) -> Option<&ZoneRuntime> {
        self.zones.get(&id)
    }

    /// Whether this world owns the zone.
    pub fn owns_zone(&self, id: ZoneId) -> bool {
        self.zones.contains_key(&id)
    }

    /// Owned zones in id order.
    pub fn zones(&self) -> impl Iterator<Item = &ZoneRuntime> {
        self.zones.values()
    }

    pub(crate) fn zone_mut(&mut self, id: ZoneId) -> Option<&mut ZoneRuntime> {
        self.zones.get_mut(&id)
    }

    /// Drive the world lifecycle state machine.
    pub(crate) fn transition(&mut self, next: WorldState) -> Result<(), WorldError> {
        if !self.state.can_transition_to(next) {
            return Err(WorldError::IllegalTransition {
                world: self.id,
                from: self.state,
                to: next,
            });
        }
        self.state = next;
        Ok(())
    }

    /// Destroy all zones, returning their ids in order.
    pub(crate) fn destroy_zones(&mut self) -> Vec<ZoneId> {
        let ids = self.zones.keys().copied().collect();
        self.zones.clear();
        ids
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use caelmor_types::ZoneRecord;

    use super::*;

    fn record() -> WorldRecord {
        WorldRecord {
            id: WorldId::from_u128(1),
            name: "Caelmor".to_owned(),
            default_zone: ZoneId::from_u128(10),
            zones: vec![
                ZoneRecord {
                    id: ZoneId::from_u128(10),
                    name: "Gate".to_owned(),
                    context: Vec::new(),
                },
                ZoneRecord {
                    id: ZoneId::from_u128(11),
                    name: "Market".to_owned(),
                    context: vec![("crowd".to_owned(), 4)],
                },
            ],
        }
    }

    #[test]
    fn restored_world_is_loaded_not_active() {
        let world = WorldRuntime::from_record(&record()).unwrap();
        assert_eq!(world.state(), WorldState::Loaded);
        assert!(!world.is_participating());
    }

    #[test]
    fn record_roundtrip() {
        let world = WorldRuntime::from_record(&record()).unwrap();
        assert_eq!(world.to_record(), record());
    }

    #[test]
    fn foreign_default_zone_rejected() {
        let mut bad = record();
        bad.default_zone = ZoneId::from_u128(99);
        assert_eq!(
            WorldRuntime::from_record(&bad),
            Err(WorldError::InvalidComposition(WorldId::from_u128(1)))
        );
    }

    #[test]
    fn unloaded_world_cannot_reactivate() {
        let mut world = WorldRuntime::from_record(&record()).unwrap();
        world.transition(WorldState::Active).unwrap();
        world.transition(WorldState::Unloaded).unwrap();
        assert!(world.transition(WorldState::Active).is_err());
    }
}
