//! The world registry: world ownership, zone residency, and mediation.
//!
//! Authority flows strictly downward: the registry (acting for the server)
//! creates, activates, and unloads worlds; worlds own zones; zones only
//! provide context. Every residency change goes through the registry,
//! which rejects anything that would break exclusivity or cross world
//! boundaries without touching existing state.

use std::collections::BTreeMap;

use caelmor_types::{EntityKey, WorldId, WorldRecord, WorldState, ZoneId};
use tracing::{debug, info};

use crate::error::WorldError;
use crate::mediation::{MediationPlan, ZoneEffect, canonical_order};
use crate::residency::{Residency, ResidencyTable};
use crate::world::WorldRuntime;
use crate::zone::ZoneRuntime;

/// Outcome of unloading a world.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnloadReport {
    /// The unloaded world.
    pub world: WorldId,
    /// Zones destroyed, in id order.
    pub zones: Vec<ZoneId>,
    /// Entities whose residency was discarded, in key order.
    pub evicted: Vec<EntityKey>,
}

/// All loaded worlds, their zones, and the residency table.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorldRegistry {
    worlds: BTreeMap<WorldId, WorldRuntime>,
    zone_owner: BTreeMap<ZoneId, WorldId>,
    residency: ResidencyTable,
}

impl WorldRegistry {
    /// Create an empty registry.
    pub const fn new() -> Self {
        Self {
            worlds: BTreeMap::new(),
            zone_owner: BTreeMap::new(),
            residency: ResidencyTable::new(),
        }
    }

    // -----------------------------------------------------------------------
    // World lifecycle
    // -----------------------------------------------------------------------

    /// Load a world from its structural record. The world starts `Loaded`.
    ///
    /// # Errors
    ///
    /// Returns [`WorldError::DuplicateWorld`] or [`WorldError::DuplicateZone`]
    /// if ids collide with loaded worlds, or a composition error from
    /// [`WorldRuntime::from_record`].
    pub fn load_world(&mut self, record: &WorldRecord) -> Result<(), WorldError> {
        if self.worlds.contains_key(&record.id) {
            return Err(WorldError::DuplicateWorld(record.id));
        }
        let world = WorldRuntime::from_record(record)?;
        if let Some(zone) = world.zones().find(|z| self.zone_owner.contains_key(&z.id())) {
            return Err(WorldError::DuplicateZone(zone.id()));
        }
        for zone in world.zones() {
            self.zone_owner.insert(zone.id(), world.id());
        }
        info!(world = %record.id, zones = record.zones.len(), "World loaded");
        self.worlds.insert(record.id, world);
        Ok(())
    }

    /// Make a loaded world tick-participating.
    ///
    /// # Errors
    ///
    /// Returns [`WorldError::WorldNotFound`] or
    /// [`WorldError::IllegalTransition`].
    pub fn activate_world(&mut self, id: WorldId) -> Result<(), WorldError> {
        let world = self.worlds.get_mut(&id).ok_or(WorldError::WorldNotFound(id))?;
        world.transition(WorldState::Active)?;
        info!(world = %id, "World activated");
        Ok(())
    }

    /// Unload a world: destroy its zones, then discard every residency in
    /// it. The caller despawns world-owned NPCs afterwards, in the order of
    /// [`UnloadReport::evicted`].
    ///
    /// # Errors
    ///
    /// Returns [`WorldError::WorldNotFound`] if the world is not loaded.
    pub fn unload_world(&mut self, id: WorldId) -> Result<UnloadReport, WorldError> {
        let mut world = self.worlds.remove(&id).ok_or(WorldError::WorldNotFound(id))?;
        if let Err(err) = world.transition(WorldState::Unloaded) {
            self.worlds.insert(id, world);
            return Err(err);
        }
        let zones = world.destroy_zones();
        for zone in &zones {
            self.zone_owner.remove(zone);
        }
        let evicted = self.residency.clear_world(id);
        info!(
            world = %id,
            zones = zones.len(),
            evicted = evicted.len(),
            "World unloaded"
        );
        Ok(UnloadReport {
            world: id,
            zones,
            evicted,
        })
    }

    /// Look up a loaded world.
    pub fn world(&self, id: WorldId) -> Option<&WorldRuntime> {
        self.worlds.get(&id)
    }

    /// Loaded worlds in id order.
    pub fn worlds(&self) -> impl Iterator<Item = &WorldRuntime> {
        self.worlds.values()
    }

    /// Whether the world exists and is tick-participating.
    pub fn is_available(&self, id: WorldId) -> bool {
        self.worlds.get(&id).is_some_and(WorldRuntime::is_participating)
    }

    /// Owning world of a zone.
    pub fn zone_world(&self, zone: ZoneId) -> Option<WorldId> {
        self.zone_owner.get(&zone).copied()
    }

    /// Look up a zone through its owning world.
    pub fn zone(&self, zone: ZoneId) -> Option<&ZoneRuntime> {
        let world = self.zone_owner.get(&zone)?;
        self.worlds.get(world)?.zone(zone)
    }

    /// Whether a zone takes part in the current tick. Always inherited from
    /// the owning world.
    pub fn zone_participates(&self, zone: ZoneId) -> bool {
        self.zone_world(zone).is_some_and(|w| self.is_available(w))
    }

    /// Structural records of every loaded world, in id order.
    pub fn records(&self) -> Vec<WorldRecord> {
        self.worlds.values().map(WorldRuntime::to_record).collect()
    }

    // -----------------------------------------------------------------------
    // Residency
    // -----------------------------------------------------------------------

    /// The residency table (read-only).
    pub const fn residency_table(&self) -> &ResidencyTable {
        &self.residency
    }

    /// Residency of an entity.
    pub fn residency(&self, entity: EntityKey) -> Option<Residency> {
        self.residency.get(entity)
    }

    /// Entities resident in `zone`, in key order.
    pub fn residents(&self, zone: ZoneId) -> impl Iterator<Item = EntityKey> + '_ {
        self.residency.residents(zone)
    }

    /// Attach an entity to a world and assign its zone in one step, so no
    /// "attached but zoneless" state is ever observable.
    ///
    /// The preferred zone is used when the world owns it; otherwise the
    /// world's default zone is chosen.
    ///
    /// # Errors
    ///
    /// Returns [`WorldError::WorldNotFound`] or
    /// [`WorldError::WorldUnavailable`] if the world cannot accept entities,
    /// and [`WorldError::CrossWorldResidency`] if the entity already resides
    /// in a different world.
    pub fn attach_world(
        &mut self,
        entity: EntityKey,
        world: WorldId,
        preferred_zone: Option<ZoneId>,
    ) -> Result<Residency, WorldError> {
        let runtime = self.worlds.get(&world).ok_or(WorldError::WorldNotFound(world))?;
        if !runtime.is_participating() {
            return Err(WorldError::WorldUnavailable {
                world,
                state: runtime.state(),
            });
        }
        let zone = preferred_zone
            .filter(|z| runtime.owns_zone(*z))
            .unwrap_or_else(|| runtime.default_zone());
        self.check_same_world(entity, world)?;
        let residency = Residency { world, zone };
        self.residency.set(entity, residency);
        debug!(%entity, %world, %zone, "World attached");
        Ok(residency)
    }

    /// Assign an entity to a zone, replacing any prior residency in the same
    /// world.
    ///
    /// # Errors
    ///
    /// Returns [`WorldError::UnknownZone`] if no loaded world owns the zone,
    /// [`WorldError::WorldUnavailable`] if the owning world is not active, and
    /// [`WorldError::CrossWorldResidency`] if the entity resides elsewhere.
    pub fn assign_residency(
        &mut self,
        entity: EntityKey,
        zone: ZoneId,
    ) -> Result<Residency, WorldError> {
        let residency = self.check_assignment(entity, zone)?;
        self.residency.set(entity, residency);
        debug!(%entity, %zone, "Residency assigned");
        Ok(residency)
    }

    /// Validate an assignment without applying it.
    ///
    /// # Errors
    ///
    /// Same as [`Self::assign_residency`].
    pub fn check_assignment(&self, entity: EntityKey, zone: ZoneId) -> Result<Residency, WorldError> {
        let world = self.zone_world(zone).ok_or(WorldError::UnknownZone(zone))?;
        if let Some(runtime) = self.worlds.get(&world) {
            if !runtime.is_participating() {
                return Err(WorldError::WorldUnavailable {
                    world,
                    state: runtime.state(),
                });
            }
        }
        self.check_same_world(entity, world)?;
        Ok(Residency { world, zone })
    }

    /// Place a residency without the availability check. Used for world
    /// placed items while a world is still `Loaded` after restore.
    ///
    /// # Errors
    ///
    /// Returns [`WorldError::ZoneNotFound`] if the world does not own the
    /// zone and [`WorldError::CrossWorldResidency`] on a world mismatch.
    pub fn place(
        &mut self,
        entity: EntityKey,
        world: WorldId,
        zone: ZoneId,
    ) -> Result<Residency, WorldError> {
        let runtime = self.worlds.get(&world).ok_or(WorldError::WorldNotFound(world))?;
        if !runtime.owns_zone(zone) {
            return Err(WorldError::ZoneNotFound { world, zone });
        }
        self.check_same_world(entity, world)?;
        let residency = Residency { world, zone };
        self.residency.set(entity, residency);
        Ok(residency)
    }

    /// Release an entity's residency (deactivation, despawn, pickup).
    pub fn release_residency(&mut self, entity: EntityKey) -> Option<Residency> {
        let prior = self.residency.clear(entity);
        if let Some(r) = prior {
            debug!(%entity, zone = %r.zone, "Residency released");
        }
        prior
    }

    fn check_same_world(&self, entity: EntityKey, world: WorldId) -> Result<(), WorldError> {
        match self.residency.get(entity) {
            Some(current) if current.world != world => Err(WorldError::CrossWorldResidency {
                entity,
                current: current.world,
                requested: world,
            }),
            _ => Ok(()),
        }
    }

    // -----------------------------------------------------------------------
    // Cross-zone mediation
    // -----------------------------------------------------------------------

    /// Validate and order cross-zone effects without applying them.
    ///
    /// Effects are sorted canonically, so repeated runs with the same set of
    /// effects produce the same outcome regardless of emission order.
    ///
    /// # Errors
    ///
    /// Returns [`WorldError::UnknownZone`] for an unowned zone,
    /// [`WorldError::UnmediatedEffect`] when origin and target belong to
    /// different worlds, [`WorldError::WorldUnavailable`] when the world is
    /// not ticking, and [`WorldError::ContextOverflow`] on overflow.
    pub fn plan_cross_zone(&self, effects: Vec<ZoneEffect>) -> Result<MediationPlan, WorldError> {
        let mut plan = MediationPlan::default();
        for effect in canonical_order(effects) {
            let origin_world = self
                .zone_world(effect.origin)
                .ok_or(WorldError::UnknownZone(effect.origin))?;
            let target_world = self
                .zone_world(effect.target)
                .ok_or(WorldError::UnknownZone(effect.target))?;
            if origin_world != target_world {
                return Err(WorldError::UnmediatedEffect {
                    origin: effect.origin,
                    target: effect.target,
                });
            }
            if !self.is_available(target_world) {
                let state = self
                    .worlds
                    .get(&target_world)
                    .map_or(WorldState::Unloaded, WorldRuntime::state);
                return Err(WorldError::WorldUnavailable {
                    world: target_world,
                    state,
                });
            }
            let slot = (target_world, effect.target, effect.key.clone());
            let current = match plan.writes.get(&slot) {
                Some(value) => *value,
                None => self
                    .zone(effect.target)
                    .map_or(0, |z| z.context_value(&effect.key)),
            };
            let next = current
                .checked_add(effect.delta)
                .ok_or_else(|| WorldError::ContextOverflow {
                    zone: effect.target,
                    key: effect.key.clone(),
                })?;
            plan.writes.insert(slot, next);
            plan.ordered.push(effect);
        }
        Ok(plan)
    }

    /// Apply a plan produced by [`Self::plan_cross_zone`] against this same
    /// registry state.
    ///
    /// # Errors
    ///
    /// Only fails if the registry changed since planning, which the tick
    /// scheduler rules out.
    pub fn apply_cross_zone(&mut self, plan: &MediationPlan) -> Result<(), WorldError> {
        for ((world, zone, key), value) in &plan.writes {
            let runtime = self
                .worlds
                .get_mut(world)
                .ok_or(WorldError::WorldNotFound(*world))?;
            let target = runtime.zone_mut(*zone).ok_or(WorldError::ZoneNotFound {
                world: *world,
                zone: *zone,
            })?;
            let current = target.context_value(key);
            let delta = value.checked_sub(current).ok_or_else(|| WorldError::ContextOverflow {
                zone: *zone,
                key: key.clone(),
            })?;
            target.apply_delta(key, delta)?;
        }
        Ok(())
    }

    /// Plan and apply in one step.
    ///
    /// # Errors
    ///
    /// See [`Self::plan_cross_zone`].
    pub fn mediate_cross_zone(&mut self, effects: Vec<ZoneEffect>) -> Result<MediationPlan, WorldError> {
        let plan = self.plan_cross_zone(effects)?;
        self.apply_cross_zone(&plan)?;
        Ok(plan)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use caelmor_types::{ErrorKind, NpcId, PlayerId, ZoneRecord};

    use super::*;

    fn world_record(world: u128, zones: &[u128]) -> WorldRecord {
        WorldRecord {
            id: WorldId::from_u128(world),
            name: format!("world-{world}"),
            default_zone: ZoneId::from_u128(zones.first().copied().unwrap_or(0)),
            zones: zones
                .iter()
                .map(|z| ZoneRecord {
                    id: ZoneId::from_u128(*z),
                    name: format!("zone-{z}"),
                    context: Vec::new(),
                })
                .collect(),
        }
    }

    fn active_registry() -> WorldRegistry {
        let mut registry = WorldRegistry::new();
        registry.load_world(&world_record(1, &[10, 11])).unwrap();
        registry.load_world(&world_record(2, &[20])).unwrap();
        registry.activate_world(WorldId::from_u128(1)).unwrap();
        registry.activate_world(WorldId::from_u128(2)).unwrap();
        registry
    }

    fn player(n: u128) -> EntityKey {
        EntityKey::Player(PlayerId::from_u128(n))
    }

    #[test]
    fn zones_inherit_participation_from_world() {
        let mut registry = WorldRegistry::new();
        registry.load_world(&world_record(1, &[10])).unwrap();
        assert!(!registry.zone_participates(ZoneId::from_u128(10)));
        registry.activate_world(WorldId::from_u128(1)).unwrap();
        assert!(registry.zone_participates(ZoneId::from_u128(10)));
    }

    #[test]
    fn duplicate_zone_across_worlds_rejected() {
        let mut registry = WorldRegistry::new();
        registry.load_world(&world_record(1, &[10])).unwrap();
        let err = registry.load_world(&world_record(2, &[10])).unwrap_err();
        assert_eq!(err, WorldError::DuplicateZone(ZoneId::from_u128(10)));
        assert!(registry.world(WorldId::from_u128(2)).is_none());
    }

    #[test]
    fn attach_falls_back_to_default_zone() {
        let mut registry = active_registry();
        let residency = registry
            .attach_world(player(1), WorldId::from_u128(1), Some(ZoneId::from_u128(20)))
            .unwrap();
        assert_eq!(residency.zone, ZoneId::from_u128(10));
    }

    #[test]
    fn attach_to_loaded_world_fails_without_effect() {
        let mut registry = WorldRegistry::new();
        registry.load_world(&world_record(1, &[10])).unwrap();
        let err = registry
            .attach_world(player(1), WorldId::from_u128(1), None)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PreconditionRejected);
        assert!(registry.residency(player(1)).is_none());
    }

    #[test]
    fn cross_world_residency_rejected_and_unchanged() {
        let mut registry = active_registry();
        registry.assign_residency(player(1), ZoneId::from_u128(10)).unwrap();
        let err = registry
            .assign_residency(player(1), ZoneId::from_u128(20))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AuthorityViolation);
        assert_eq!(
            registry.residency(player(1)).map(|r| r.zone),
            Some(ZoneId::from_u128(10))
        );
    }

    #[test]
    fn unload_destroys_zones_and_residency() {
        let mut registry = active_registry();
        let npc = EntityKey::Npc(NpcId::from_u128(5));
        registry.assign_residency(npc, ZoneId::from_u128(11)).unwrap();
        registry.assign_residency(player(1), ZoneId::from_u128(20)).unwrap();

        let report = registry.unload_world(WorldId::from_u128(1)).unwrap();
        assert_eq!(report.zones, vec![ZoneId::from_u128(10), ZoneId::from_u128(11)]);
        assert_eq!(report.evicted, vec![npc]);
        assert!(registry.zone(ZoneId::from_u128(10)).is_none());
        assert!(registry.residency(player(1)).is_some());
    }

    #[test]
    fn mediation_is_order_independent() {
        let effects = vec![
            ZoneEffect {
                origin: ZoneId::from_u128(10),
                target: ZoneId::from_u128(11),
                source: player(2),
                key: "alarm".to_owned(),
                delta: 2,
            },
            ZoneEffect {
                origin: ZoneId::from_u128(11),
                target: ZoneId::from_u128(11),
                source: player(1),
                key: "alarm".to_owned(),
                delta: -1,
            },
        ];
        let mut forward = active_registry();
        let mut reverse = active_registry();
        let a = forward.mediate_cross_zone(effects.clone()).unwrap();
        let b = reverse
            .mediate_cross_zone(effects.into_iter().rev().collect())
            .unwrap();
        assert_eq!(a.ordered_effects(), b.ordered_effects());
        assert_eq!(forward, reverse);
        assert_eq!(
            forward.zone(ZoneId::from_u128(11)).map(|z| z.context_value("alarm")),
            Some(1)
        );
    }

    #[test]
    fn cross_world_effect_rejected() {
        let registry = active_registry();
        let err = registry
            .plan_cross_zone(vec![ZoneEffect {
                origin: ZoneId::from_u128(10),
                target: ZoneId::from_u128(20),
                source: player(1),
                key: "k".to_owned(),
                delta: 1,
            }])
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AuthorityViolation);
    }
}
