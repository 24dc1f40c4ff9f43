//! NPC runtime lifecycle: `Spawned -> Active <-> Dormant -> Despawned`.
//!
//! NPCs are world-owned and independent of any player. Activation requires
//! world attachment and zone residency; those gates are checked by the
//! runtime against the world registry before [`NpcRegistry::transition`]
//! is called.

use std::collections::BTreeMap;

use caelmor_types::{EntityVitals, NpcId, NpcRecord, NpcState, WorldId, ZoneId};
use tracing::{debug, info};

use crate::error::EntityError;

/// Runtime state of one NPC.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NpcRuntime {
    /// Identity.
    pub id: NpcId,
    /// Owning world.
    pub world: WorldId,
    /// Zone the NPC resides in while active.
    pub home_zone: ZoneId,
    /// Content definition reference.
    pub definition: String,
    /// Lifecycle state.
    pub state: NpcState,
    /// Live vitals.
    pub vitals: EntityVitals,
    /// Whether this NPC is designated for persistence.
    pub persistent: bool,
}

impl NpcRuntime {
    /// Capture the persisted record.
    pub fn to_record(&self) -> NpcRecord {
        NpcRecord {
            id: self.id,
            world: self.world,
            home_zone: self.home_zone,
            definition: self.definition.clone(),
            vitals: self.vitals,
        }
    }
}

/// Registry of NPCs in every loaded world.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NpcRegistry {
    npcs: BTreeMap<NpcId, NpcRuntime>,
}

impl NpcRegistry {
    /// Create an empty registry.
    pub const fn new() -> Self {
        Self {
            npcs: BTreeMap::new(),
        }
    }

    /// Add an NPC in the `Spawned` state.
    ///
    /// # Errors
    ///
    /// Returns [`EntityError::DuplicateNpc`] if the id exists.
    pub fn spawn(&mut self, record: NpcRecord, persistent: bool) -> Result<(), EntityError> {
        if self.npcs.contains_key(&record.id) {
            return Err(EntityError::DuplicateNpc(record.id));
        }
        debug!(npc = %record.id, world = %record.world, "NPC spawned");
        self.npcs.insert(
            record.id,
            NpcRuntime {
                id: record.id,
                world: record.world,
                home_zone: record.home_zone,
                definition: record.definition,
                state: NpcState::Spawned,
                vitals: record.vitals,
                persistent,
            },
        );
        Ok(())
    }

    /// Look up an NPC.
    pub fn get(&self, id: NpcId) -> Option<&NpcRuntime> {
        self.npcs.get(&id)
    }

    /// All NPCs in id order.
    pub fn iter(&self) -> impl Iterator<Item = &NpcRuntime> {
        self.npcs.values()
    }

    /// Check a transition without applying it.
    ///
    /// # Errors
    ///
    /// Returns [`EntityError::NpcNotFound`] or
    /// [`EntityError::IllegalNpcTransition`].
    pub fn check_transition(&self, id: NpcId, next: NpcState) -> Result<&NpcRuntime, EntityError> {
        let npc = self.npcs.get(&id).ok_or(EntityError::NpcNotFound(id))?;
        if !npc.state.can_transition_to(next) {
            return Err(EntityError::IllegalNpcTransition {
                npc: id,
                from: npc.state,
                to: next,
            });
        }
        Ok(npc)
    }

    /// The single driver of the NPC state machine.
    ///
    /// # Errors
    ///
    /// See [`Self::check_transition`].
    pub fn transition(&mut self, id: NpcId, next: NpcState) -> Result<NpcState, EntityError> {
        let from = self.check_transition(id, next)?.state;
        if let Some(npc) = self.npcs.get_mut(&id) {
            npc.state = next;
        }
        info!(npc = %id, ?from, to = ?next, "NPC transitioned");
        Ok(from)
    }

    /// Overwrite the live vitals of an NPC.
    ///
    /// # Errors
    ///
    /// Returns [`EntityError::NpcNotFound`].
    pub fn set_vitals(&mut self, id: NpcId, vitals: EntityVitals) -> Result<(), EntityError> {
        let npc = self.npcs.get_mut(&id).ok_or(EntityError::NpcNotFound(id))?;
        npc.vitals = vitals;
        Ok(())
    }

    /// Move an NPC's home to another zone of its world.
    ///
    /// # Errors
    ///
    /// Returns [`EntityError::NpcNotFound`].
    pub fn set_home_zone(&mut self, id: NpcId, zone: ZoneId) -> Result<(), EntityError> {
        let npc = self.npcs.get_mut(&id).ok_or(EntityError::NpcNotFound(id))?;
        npc.home_zone = zone;
        Ok(())
    }

    /// Despawn and remove every NPC owned by `world`, in id order.
    pub fn despawn_world(&mut self, world: WorldId) -> Vec<NpcId> {
        let owned: Vec<NpcId> = self
            .npcs
            .values()
            .filter(|n| n.world == world)
            .map(|n| n.id)
            .collect();
        for id in &owned {
            self.npcs.remove(id);
        }
        if !owned.is_empty() {
            info!(%world, count = owned.len(), "World NPCs despawned");
        }
        owned
    }

    /// Remove NPCs in the absorbing `Despawned` state.
    pub fn prune_despawned(&mut self) -> usize {
        let before = self.npcs.len();
        self.npcs.retain(|_, n| n.state != NpcState::Despawned);
        before.saturating_sub(self.npcs.len())
    }

    /// Persisted records of designated, non-despawned NPCs in id order.
    pub fn records(&self) -> Vec<NpcRecord> {
        self.npcs
            .values()
            .filter(|n| n.persistent && n.state != NpcState::Despawned)
            .map(NpcRuntime::to_record)
            .collect()
    }
}
