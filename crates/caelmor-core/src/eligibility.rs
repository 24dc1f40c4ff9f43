//! Pre-tick gate evaluation.
//!
//! The eligible set is computed once per tick, after boundary transitions
//! are applied, and is immutable until the tick closes. Only players with an
//! activated session and NPCs in the `Active` state are simulated, and both
//! must hold exactly one residency in a tick-participating world.

use std::collections::{BTreeMap, BTreeSet};

use caelmor_types::{EntityKey, NpcState, WorldId, ZoneId};
use caelmor_world::Residency;
use tracing::debug;

use crate::arena::Arena;
use crate::error::TickError;

/// The frozen set of entities simulated in one tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EligibleSet {
    tick: u64,
    members: BTreeMap<EntityKey, Residency>,
    settling: BTreeSet<EntityKey>,
}

impl EligibleSet {
    /// Evaluate every lifecycle and residency gate against `arena`.
    ///
    /// `settling` lists entities whose residency changed at the boundary
    /// opening this tick. They are simulated but excluded from zone-scoped
    /// evaluation until the next tick.
    ///
    /// # Errors
    ///
    /// Returns [`TickError::GateInvariant`] if an activated session or an
    /// active NPC lacks the world or residency its state requires.
    pub(crate) fn freeze(
        tick: u64,
        arena: &Arena,
        settling: BTreeSet<EntityKey>,
    ) -> Result<Self, TickError> {
        let mut members = BTreeMap::new();

        for session in arena.sessions().activated() {
            let key = EntityKey::Player(session.player);
            let world = session.world.ok_or_else(|| TickError::GateInvariant {
                entity: key,
                reason: "activated without a world".to_owned(),
            })?;
            members.insert(key, gate(arena, key, world)?);
        }

        for npc in arena.npcs().iter().filter(|n| n.state == NpcState::Active) {
            let key = EntityKey::Npc(npc.id);
            members.insert(key, gate(arena, key, npc.world)?);
        }

        let settling = settling
            .into_iter()
            .filter(|key| members.contains_key(key))
            .collect::<BTreeSet<_>>();
        debug!(
            tick,
            eligible = members.len(),
            settling = settling.len(),
            "Eligible set frozen"
        );
        Ok(Self {
            tick,
            members,
            settling,
        })
    }

    /// The tick this set belongs to.
    pub const fn tick(&self) -> u64 {
        self.tick
    }

    /// Whether an entity is simulated this tick.
    pub fn contains(&self, entity: EntityKey) -> bool {
        self.members.contains_key(&entity)
    }

    /// The residency an entity holds for the whole tick.
    pub fn residency(&self, entity: EntityKey) -> Option<Residency> {
        self.members.get(&entity).copied()
    }

    /// Whether the entity changed zone at this tick's boundary.
    pub fn is_settling(&self, entity: EntityKey) -> bool {
        self.settling.contains(&entity)
    }

    /// Entities still settling from a boundary residency change.
    pub(crate) fn settling(&self) -> impl Iterator<Item = EntityKey> + '_ {
        self.settling.iter().copied()
    }

    /// Members in stable execution order.
    pub fn iter(&self) -> impl Iterator<Item = (EntityKey, Residency)> + '_ {
        self.members.iter().map(|(k, r)| (*k, *r))
    }

    /// Members resident in `zone` that take part in zone-scoped evaluation.
    pub fn zone_members(&self, zone: ZoneId) -> impl Iterator<Item = EntityKey> + '_ {
        self.members
            .iter()
            .filter(move |(k, r)| r.zone == zone && !self.settling.contains(*k))
            .map(|(k, _)| *k)
    }

    /// Number of simulated entities.
    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// Whether nothing is simulated.
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

fn gate(arena: &Arena, entity: EntityKey, world: WorldId) -> Result<Residency, TickError> {
    if !arena.worlds().is_available(world) {
        return Err(TickError::GateInvariant {
            entity,
            reason: format!("world {world} is not tick-participating"),
        });
    }
    match arena.worlds().residency(entity) {
        Some(residency) if residency.world == world => Ok(residency),
        Some(residency) => Err(TickError::GateInvariant {
            entity,
            reason: format!("resides in world {} instead of {world}", residency.world),
        }),
        None => Err(TickError::GateInvariant {
            entity,
            reason: "no zone residency".to_owned(),
        }),
    }
}
