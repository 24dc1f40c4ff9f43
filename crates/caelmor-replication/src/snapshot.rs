//! Immutable per-world observational records.
//!
//! A [`WorldSnapshot`] captures one world at exactly one committed tick:
//! zone composition and the observable state of every entity the world
//! hosts. It reads the arena pinned by that commit, so boundary
//! transitions applied afterwards are not visible until the next tick
//! commits. It never carries intents, queued transitions, or persistence
//! markers, and it is never used for restore.

use caelmor_core::Runtime;
use caelmor_types::{
    EntityKey, GridPos, ItemLocation, NpcState, SessionState, TickPhase, WorldId, WorldState,
    ZoneId,
};
use serde::Serialize;

use crate::error::ReplicationError;

/// Observable lifecycle of a snapshot entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Presence {
    /// A player session.
    Session(SessionState),
    /// An NPC.
    Npc(NpcState),
    /// An item placed in the world.
    Placed,
}

/// Observable state of one entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EntityView {
    /// The entity.
    pub entity: EntityKey,
    /// Lifecycle presence.
    pub presence: Presence,
    /// Resident zone, if any.
    pub zone: Option<ZoneId>,
    /// Grid position.
    pub position: GridPos,
    /// Health, for entities that have it.
    pub health: Option<u32>,
}

/// Observable state of one zone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ZoneView {
    /// The zone.
    pub zone: ZoneId,
    /// Display name.
    pub name: String,
    /// Context values sorted by key.
    pub context: Vec<(String, i64)>,
}

/// Finalized state of one world at one committed tick.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorldSnapshot {
    tick: u64,
    world: WorldId,
    state: WorldState,
    zones: Vec<ZoneView>,
    entities: Vec<EntityView>,
}

impl WorldSnapshot {
    /// Capture `world` as the last commit left it. The runtime must sit at
    /// a boundary.
    pub(crate) fn capture(runtime: &Runtime, world: WorldId) -> Result<Self, ReplicationError> {
        if runtime.phase() != TickPhase::Boundary {
            return Err(ReplicationError::NotFinalized(runtime.phase()));
        }
        let arena = runtime
            .committed_arena()
            .ok_or(ReplicationError::NoCommittedTick)?;
        let worlds = arena.worlds();
        let Some(record) = worlds.world(world).filter(|w| w.is_participating()) else {
            return Err(ReplicationError::WorldNotParticipating(world));
        };
        let zone_of = |entity| worlds.residency(entity).map(|r| r.zone);

        let zones = record
            .zones()
            .map(|z| ZoneView {
                zone: z.id(),
                name: z.name().to_owned(),
                context: z.context().iter().map(|(k, v)| (k.clone(), *v)).collect(),
            })
            .collect();

        let mut entities: Vec<EntityView> = arena
            .sessions()
            .activated()
            .filter(|s| s.world == Some(world))
            .map(|s| {
                let entity = EntityKey::Player(s.player);
                EntityView {
                    entity,
                    presence: Presence::Session(s.state),
                    zone: zone_of(entity),
                    position: s.vitals.position,
                    health: Some(s.vitals.health),
                }
            })
            .collect();
        entities.extend(arena.npcs().iter().filter(|n| n.world == world).map(|n| {
            let entity = EntityKey::Npc(n.id);
            EntityView {
                entity,
                presence: Presence::Npc(n.state),
                zone: zone_of(entity),
                position: n.vitals.position,
                health: Some(n.vitals.health),
            }
        }));
        entities.extend(arena.items().iter().filter_map(|item| match item.location {
            ItemLocation::WorldPlacement {
                world: placed,
                zone,
                position,
            } if placed == world => Some(EntityView {
                entity: EntityKey::Item(item.id),
                presence: Presence::Placed,
                zone: Some(zone),
                position,
                health: None,
            }),
            _ => None,
        }));
        entities.sort_by_key(|e| e.entity);

        Ok(Self {
            tick: runtime.tick(),
            world,
            state: record.state(),
            zones,
            entities,
        })
    }

    /// The committed tick this snapshot observes.
    pub const fn tick(&self) -> u64 {
        self.tick
    }

    /// The world scope.
    pub const fn world(&self) -> WorldId {
        self.world
    }

    /// World lifecycle state.
    pub const fn state(&self) -> WorldState {
        self.state
    }

    /// Zones in id order.
    pub fn zones(&self) -> &[ZoneView] {
        &self.zones
    }

    /// Entities in entity-key order.
    pub fn entities(&self) -> &[EntityView] {
        &self.entities
    }

    /// Look up one entity.
    pub fn entity(&self, entity: EntityKey) -> Option<&EntityView> {
        self.entities
            .binary_search_by_key(&entity, |e| e.entity)
            .ok()
            .and_then(|i| self.entities.get(i))
    }

    /// Canonical JSON encoding.
    pub fn encode(&self) -> Result<Vec<u8>, ReplicationError> {
        Ok(serde_json::to_vec(self)?)
    }
}
