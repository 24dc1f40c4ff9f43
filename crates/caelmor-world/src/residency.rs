//! Zone residency bookkeeping.
//!
//! Every resident entity maps to exactly one `(world, zone)` pair. The map
//! structure makes "more than one residency" unrepresentable; the registry
//! is responsible for never leaving an eligible entity with none.

use std::collections::{BTreeMap, BTreeSet};

use caelmor_types::{EntityKey, WorldId, ZoneId};

/// An entity's exclusive association with one zone of one world.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Residency {
    /// World the entity is attached to.
    pub world: WorldId,
    /// Zone inside that world.
    pub zone: ZoneId,
}

/// Forward and reverse residency indices.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResidencyTable {
    by_entity: BTreeMap<EntityKey, Residency>,
    by_zone: BTreeMap<ZoneId, BTreeSet<EntityKey>>,
}

impl ResidencyTable {
    /// Create an empty table.
    pub const fn new() -> Self {
        Self {
            by_entity: BTreeMap::new(),
            by_zone: BTreeMap::new(),
        }
    }

    /// Residency of `entity`, if any.
    pub fn get(&self, entity: EntityKey) -> Option<Residency> {
        self.by_entity.get(&entity).copied()
    }

    /// Entities resident in `zone`, in key order.
    pub fn residents(&self, zone: ZoneId) -> impl Iterator<Item = EntityKey> + '_ {
        self.by_zone.get(&zone).into_iter().flatten().copied()
    }

    /// Number of resident entities.
    pub fn len(&self) -> usize {
        self.by_entity.len()
    }

    /// Whether no entity is resident anywhere.
    pub fn is_empty(&self) -> bool {
        self.by_entity.is_empty()
    }

    /// All residencies in entity order.
    pub fn iter(&self) -> impl Iterator<Item = (EntityKey, Residency)> + '_ {
        self.by_entity.iter().map(|(k, r)| (*k, *r))
    }

    /// Replace the residency of `entity` in one step, returning the prior one.
    pub(crate) fn set(&mut self, entity: EntityKey, residency: Residency) -> Option<Residency> {
        let prior = self.by_entity.insert(entity, residency);
        if let Some(old) = prior {
            self.unindex(entity, old.zone);
        }
        self.by_zone.entry(residency.zone).or_default().insert(entity);
        prior
    }

    /// Remove the residency of `entity`, returning it.
    pub(crate) fn clear(&mut self, entity: EntityKey) -> Option<Residency> {
        let prior = self.by_entity.remove(&entity);
        if let Some(old) = prior {
            self.unindex(entity, old.zone);
        }
        prior
    }

    /// Remove every residency in `world`, returning the affected entities.
    pub(crate) fn clear_world(&mut self, world: WorldId) -> Vec<EntityKey> {
        let affected: Vec<EntityKey> = self
            .by_entity
            .iter()
            .filter(|(_, r)| r.world == world)
            .map(|(k, _)| *k)
            .collect();
        for entity in &affected {
            self.clear(*entity);
        }
        affected
    }

    fn unindex(&mut self, entity: EntityKey, zone: ZoneId) {
        let now_empty = self.by_zone.get_mut(&zone).is_some_and(|set| {
            set.remove(&entity);
            set.is_empty()
        });
        if now_empty {
            self.by_zone.remove(&zone);
        }
    }
}

#[cfg(test)]
mod tests {
    use caelmor_types::{NpcId, PlayerId};

    use super::*;

    #[test]
    fn set_replaces_prior_residency() {
        let mut table = ResidencyTable::new();
        let entity = EntityKey::Player(PlayerId::from_u128(1));
        let world = WorldId::from_u128(1);
        let a = ZoneId::from_u128(10);
        let b = ZoneId::from_u128(11);

        table.set(entity, Residency { world, zone: a });
        let prior = table.set(entity, Residency { world, zone: b });

        assert_eq!(prior.map(|r| r.zone), Some(a));
        assert_eq!(table.residents(a).count(), 0);
        assert_eq!(table.residents(b).collect::<Vec<_>>(), vec![entity]);
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn clear_world_removes_only_that_world() {
        let mut table = ResidencyTable::new();
        let w1 = WorldId::from_u128(1);
        let w2 = WorldId::from_u128(2);
        let e1 = EntityKey::Npc(NpcId::from_u128(1));
        let e2 = EntityKey::Npc(NpcId::from_u128(2));
        table.set(e1, Residency { world: w1, zone: ZoneId::from_u128(10) });
        table.set(e2, Residency { world: w2, zone: ZoneId::from_u128(20) });

        assert_eq!(table.clear_world(w1), vec![e1]);
        assert!(table.get(e1).is_none());
        assert!(table.get(e2).is_some());
    }
}
