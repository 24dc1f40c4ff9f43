//! The single-writer arena holding every piece of authoritative state.
//!
//! Cross-entity relationships are keys resolved through the arena, never
//! owning references, so despawn and unload are plain removals. Every
//! transition method validates before it mutates; the runtime additionally
//! applies each transition to a staged copy and swaps it in only on success.

use std::collections::BTreeMap;

use caelmor_entities::{
    EntityError, IdentityRegistry, ItemRegistry, NpcRegistry, NpcRuntime, QuestRegistry,
    SessionRegistry,
};
use caelmor_types::{
    EntityKey, EntityVitals, GridPos, ItemId, ItemLocation, ItemOwner, ItemRecord, NpcId, NpcRecord,
    NpcState, PersistSystem, PersistedTruth, PlayerId, PlayerSave, QuestRecord, QuestState,
    SessionId, SessionState, WorldId, WorldRecord, ZoneId,
};
use caelmor_world::{Residency, WorldError, WorldRegistry};
use tracing::{debug, info};

use crate::error::TickError;
use crate::requests::BoundaryRequest;

/// Persisted truth kept for an unloaded world so saves stay consistent
/// with the player saves that still reference it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetainedWorld {
    record: WorldRecord,
    npcs: Vec<NpcRecord>,
    items: Vec<ItemRecord>,
}

impl RetainedWorld {
    /// Structural record of the unloaded world.
    pub const fn record(&self) -> &WorldRecord {
        &self.record
    }
}

/// What applying one transition changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct Applied {
    /// Entities whose residency changed.
    pub settling: Vec<EntityKey>,
    /// Persisted systems touched.
    pub dirty: Vec<PersistSystem>,
}

impl Applied {
    fn settled(entity: EntityKey) -> Self {
        Self {
            settling: vec![entity],
            dirty: Vec::new(),
        }
    }

    fn dirtied(system: PersistSystem) -> Self {
        Self {
            settling: Vec::new(),
            dirty: vec![system],
        }
    }
}

/// All authoritative runtime state.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Arena {
    pub(crate) identities: IdentityRegistry,
    pub(crate) sessions: SessionRegistry,
    pub(crate) worlds: WorldRegistry,
    pub(crate) npcs: NpcRegistry,
    pub(crate) items: ItemRegistry,
    pub(crate) quests: QuestRegistry,
    pub(crate) unloaded: BTreeMap<WorldId, RetainedWorld>,
}

impl Arena {
    /// Create an empty arena.
    pub const fn new() -> Self {
        Self {
            identities: IdentityRegistry::new(),
            sessions: SessionRegistry::new(),
            worlds: WorldRegistry::new(),
            npcs: NpcRegistry::new(),
            items: ItemRegistry::new(),
            quests: QuestRegistry::new(),
            unloaded: BTreeMap::new(),
        }
    }

    /// Player identities and saves.
    pub const fn identities(&self) -> &IdentityRegistry {
        &self.identities
    }

    /// Player sessions.
    pub const fn sessions(&self) -> &SessionRegistry {
        &self.sessions
    }

    /// Worlds, zones, and residency.
    pub const fn worlds(&self) -> &WorldRegistry {
        &self.worlds
    }

    /// NPC runtime instances.
    pub const fn npcs(&self) -> &NpcRegistry {
        &self.npcs
    }

    /// Item runtime instances.
    pub const fn items(&self) -> &ItemRegistry {
        &self.items
    }

    /// Quest instances.
    pub const fn quests(&self) -> &QuestRegistry {
        &self.quests
    }

    /// Unloaded worlds whose persisted truth is retained.
    pub fn retained(&self, world: WorldId) -> Option<&RetainedWorld> {
        self.unloaded.get(&world)
    }

    /// Simulated vitals of a live player or NPC.
    pub fn vitals(&self, entity: EntityKey) -> Option<EntityVitals> {
        match entity {
            EntityKey::Player(player) => self.sessions.active_session(player).map(|s| s.vitals),
            EntityKey::Npc(npc) => self
                .npcs
                .get(npc)
                .filter(|n| n.state != NpcState::Despawned)
                .map(|n| n.vitals),
            EntityKey::Item(_) => None,
        }
    }

    // -----------------------------------------------------------------------
    // Direct operations (boundary only, guarded by the runtime)
    // -----------------------------------------------------------------------

    pub(crate) fn register_identity(&mut self, save: PlayerSave) -> Result<(), TickError> {
        self.check_save_location(&save)?;
        self.identities.register(save)?;
        Ok(())
    }

    pub(crate) fn load_world(&mut self, record: &WorldRecord) -> Result<(), TickError> {
        if self.unloaded.contains_key(&record.id) {
            return Err(WorldError::DuplicateWorld(record.id).into());
        }
        self.worlds.load_world(record)?;
        Ok(())
    }

    pub(crate) fn reload_world(&mut self, id: WorldId) -> Result<Applied, TickError> {
        let retained = self.unloaded.remove(&id).ok_or(WorldError::WorldNotFound(id))?;
        self.worlds.load_world(&retained.record)?;
        for npc in retained.npcs {
            self.npcs.spawn(npc, true)?;
        }
        for item in retained.items {
            self.insert_item(item)?;
        }
        info!(world = %id, "Retained world reloaded");
        Ok(Applied {
            settling: Vec::new(),
            dirty: vec![PersistSystem::WorldZone, PersistSystem::Npc, PersistSystem::Item],
        })
    }

    pub(crate) fn create_item(&mut self, record: ItemRecord) -> Result<(), TickError> {
        self.check_item_location(record.location)?;
        self.insert_item(record)
    }

    pub(crate) fn grant_quest(&mut self, record: QuestRecord) -> Result<(), TickError> {
        if !self.identities.is_valid(record.owner) {
            return Err(EntityError::UnknownIdentity(record.owner).into());
        }
        if record.state == QuestState::Uninitialized && record.progress != 0 {
            return Err(EntityError::QuestNotActive {
                quest: record.id,
                state: record.state,
            }
            .into());
        }
        self.quests.insert(record)?;
        Ok(())
    }

    fn insert_item(&mut self, record: ItemRecord) -> Result<(), TickError> {
        let (id, location) = (record.id, record.location);
        self.items.insert(record)?;
        self.items.check_relocation(id, location)?;
        if let ItemLocation::WorldPlacement { world, zone, .. } = location {
            self.worlds.place(EntityKey::Item(id), world, zone)?;
        }
        Ok(())
    }

    /// Check that an item location names a live owner.
    pub(crate) fn check_item_location(&self, location: ItemLocation) -> Result<(), TickError> {
        match location.owner() {
            ItemOwner::Player(player) => {
                if !self.identities.is_valid(player) {
                    return Err(EntityError::UnknownIdentity(player).into());
                }
            }
            ItemOwner::Npc(npc) => {
                self.live_npc(npc)?;
            }
            ItemOwner::World(world) => {
                let ItemLocation::WorldPlacement { zone, .. } = location else {
                    return Err(WorldError::WorldNotFound(world).into());
                };
                let runtime = self.worlds.world(world).ok_or(WorldError::WorldNotFound(world))?;
                if !runtime.owns_zone(zone) {
                    return Err(WorldError::ZoneNotFound { world, zone }.into());
                }
            }
        }
        Ok(())
    }

    fn check_save_location(&self, save: &PlayerSave) -> Result<(), TickError> {
        let owned = self
            .worlds
            .world(save.world)
            .map(|w| w.owns_zone(save.zone))
            .or_else(|| {
                self.unloaded
                    .get(&save.world)
                    .map(|r| r.record.zones.iter().any(|z| z.id == save.zone))
            });
        match owned {
            Some(true) => Ok(()),
            Some(false) => Err(WorldError::ZoneNotFound {
                world: save.world,
                zone: save.zone,
            }
            .into()),
            None => Err(WorldError::WorldNotFound(save.world).into()),
        }
    }

    fn live_npc(&self, id: NpcId) -> Result<&NpcRuntime, EntityError> {
        self.npcs
            .get(id)
            .filter(|n| n.state != NpcState::Despawned)
            .ok_or(EntityError::NpcNotFound(id))
    }

    // -----------------------------------------------------------------------
    // Boundary transitions
    // -----------------------------------------------------------------------

    /// Apply one boundary transition.
    ///
    /// On error the arena may be partially changed; callers apply to a
    /// staged copy.
    pub(crate) fn apply(&mut self, request: &BoundaryRequest) -> Result<Applied, TickError> {
        match request {
            BoundaryRequest::ActivateSession { session, world } => {
                self.activate_session(*session, *world)
            }
            BoundaryRequest::DeactivateSession { session } => {
                let never_activated = self
                    .sessions
                    .get(*session)
                    .is_some_and(|s| s.state == SessionState::Created);
                if never_activated {
                    // Nothing to write back; the connection is simply discarded.
                    self.sessions.terminate(*session)?;
                    Ok(Applied::default())
                } else {
                    self.deactivate_session(*session, None)?;
                    Ok(Applied::dirtied(PersistSystem::IdentitySave))
                }
            }
            BoundaryRequest::TerminateSession { session } => {
                self.sessions.terminate(*session)?;
                Ok(Applied::default())
            }
            BoundaryRequest::AssignResidency { entity, zone } => {
                self.assign_residency(*entity, *zone)
            }
            BoundaryRequest::SpawnNpc { record, persistent } => {
                self.spawn_npc(record.clone(), *persistent)
            }
            BoundaryRequest::ActivateNpc { npc } => self.activate_npc(*npc),
            BoundaryRequest::SuspendNpc { npc } => self.suspend_npc(*npc),
            BoundaryRequest::DespawnNpc { npc } => self.despawn_npc(*npc),
            BoundaryRequest::MoveItem { item, to } => {
                self.move_item(*item, *to)?;
                Ok(Applied::dirtied(PersistSystem::Item))
            }
            BoundaryRequest::TransitionQuest { quest, to } => {
                self.quests.transition(*quest, *to)?;
                Ok(Applied::dirtied(PersistSystem::Quest))
            }
            BoundaryRequest::UnloadWorld { world } => self.unload_world(*world),
        }
    }

    fn activate_session(&mut self, id: SessionId, world: WorldId) -> Result<Applied, TickError> {
        let player = self
            .sessions
            .get(id)
            .ok_or(EntityError::SessionNotFound(id))?
            .player;
        let save = self.identities.save(player)?.clone();
        self.sessions.check_transition(id, SessionState::Activated)?;

        let same_world = save.world == world;
        let entity = EntityKey::Player(player);
        let residency = self
            .worlds
            .attach_world(entity, world, same_world.then_some(save.zone))?;
        let vitals = if same_world && residency.zone == save.zone {
            save.vitals
        } else {
            EntityVitals {
                position: GridPos::default(),
                health: save.vitals.health,
            }
        };
        self.sessions.activate(id, world, vitals)?;
        Ok(Applied::settled(entity))
    }

    /// Deactivate a session and write its runtime state back into the save.
    ///
    /// `residency` overrides the released residency when the world was
    /// unloaded first.
    fn deactivate_session(
        &mut self,
        id: SessionId,
        residency: Option<Residency>,
    ) -> Result<PlayerId, TickError> {
        let last = self.sessions.deactivate(id)?;
        let entity = EntityKey::Player(last.player);
        let released = self.worlds.release_residency(entity);
        if let Some(place) = residency.or(released) {
            let mut save = self.identities.save(last.player)?.clone();
            save.world = place.world;
            save.zone = place.zone;
            save.vitals = last.vitals;
            self.identities.write_back(save)?;
            debug!(player = %last.player, zone = %place.zone, "Session state written back to save");
        }
        Ok(last.player)
    }

    fn assign_residency(&mut self, entity: EntityKey, zone: ZoneId) -> Result<Applied, TickError> {
        match entity {
            EntityKey::Player(player) => {
                if self.sessions.active_session(player).is_none() {
                    return Err(TickError::NoActiveSession(player));
                }
                self.worlds.assign_residency(entity, zone)?;
                Ok(Applied::settled(entity))
            }
            EntityKey::Npc(id) => {
                let npc = self.live_npc(id)?;
                let (world, active, persistent) =
                    (npc.world, npc.state == NpcState::Active, npc.persistent);
                if self.worlds.zone_world(zone) != Some(world) {
                    return Err(WorldError::ZoneNotFound { world, zone }.into());
                }
                let mut applied = Applied::default();
                if active {
                    self.worlds.assign_residency(entity, zone)?;
                    applied.settling.push(entity);
                }
                self.npcs.set_home_zone(id, zone)?;
                if persistent {
                    applied.dirty.push(PersistSystem::Npc);
                }
                Ok(applied)
            }
            EntityKey::Item(id) => {
                let item = self.items.get(id).ok_or(EntityError::ItemNotFound(id))?;
                let ItemLocation::WorldPlacement {
                    world, position, ..
                } = item.location
                else {
                    return Err(WorldError::NoResidency(entity).into());
                };
                self.move_item(
                    id,
                    ItemLocation::WorldPlacement {
                        world,
                        zone,
                        position,
                    },
                )?;
                Ok(Applied {
                    settling: vec![entity],
                    dirty: vec![PersistSystem::Item],
                })
            }
        }
    }

    fn spawn_npc(&mut self, record: NpcRecord, persistent: bool) -> Result<Applied, TickError> {
        let world = self
            .worlds
            .world(record.world)
            .ok_or(WorldError::WorldNotFound(record.world))?;
        if !world.owns_zone(record.home_zone) {
            return Err(WorldError::ZoneNotFound {
                world: record.world,
                zone: record.home_zone,
            }
            .into());
        }
        self.npcs.spawn(record, persistent)?;
        Ok(if persistent {
            Applied::dirtied(PersistSystem::Npc)
        } else {
            Applied::default()
        })
    }

    fn activate_npc(&mut self, id: NpcId) -> Result<Applied, TickError> {
        let zone = self.npcs.check_transition(id, NpcState::Active)?.home_zone;
        let entity = EntityKey::Npc(id);
        self.worlds.assign_residency(entity, zone)?;
        self.npcs.transition(id, NpcState::Active)?;
        Ok(Applied::settled(entity))
    }

    fn suspend_npc(&mut self, id: NpcId) -> Result<Applied, TickError> {
        let persistent = self.npcs.check_transition(id, NpcState::Dormant)?.persistent;
        if let Some(residency) = self.worlds.release_residency(EntityKey::Npc(id)) {
            self.npcs.set_home_zone(id, residency.zone)?;
        }
        self.npcs.transition(id, NpcState::Dormant)?;
        Ok(if persistent {
            Applied::dirtied(PersistSystem::Npc)
        } else {
            Applied::default()
        })
    }

    fn despawn_npc(&mut self, id: NpcId) -> Result<Applied, TickError> {
        let npc = self.npcs.check_transition(id, NpcState::Despawned)?;
        let (world, home, position, persistent) =
            (npc.world, npc.home_zone, npc.vitals.position, npc.persistent);
        let entity = EntityKey::Npc(id);
        let zone = self.worlds.residency(entity).map_or(home, |r| r.zone);

        let held = self.items.owned_by(ItemOwner::Npc(id));
        for item in &held {
            self.move_item(
                *item,
                ItemLocation::WorldPlacement {
                    world,
                    zone,
                    position,
                },
            )?;
        }
        self.worlds.release_residency(entity);
        self.npcs.transition(id, NpcState::Despawned)?;
        self.npcs.prune_despawned();

        let mut applied = Applied::default();
        if persistent {
            applied.dirty.push(PersistSystem::Npc);
        }
        if !held.is_empty() {
            applied.dirty.push(PersistSystem::Item);
            debug!(npc = %id, dropped = held.len(), "NPC items dropped into its zone");
        }
        Ok(applied)
    }

    fn move_item(&mut self, id: ItemId, to: ItemLocation) -> Result<(), TickError> {
        self.check_item_location(to)?;
        self.items.relocate(id, to)?;
        let entity = EntityKey::Item(id);
        self.worlds.release_residency(entity);
        if let ItemLocation::WorldPlacement { world, zone, .. } = to {
            self.worlds.place(entity, world, zone)?;
        }
        Ok(())
    }

    /// Unload cascade: zones, then world-owned NPCs, then world-placed items
    /// and residencies, then the sessions attached to the world.
    fn unload_world(&mut self, id: WorldId) -> Result<Applied, TickError> {
        let record = self
            .worlds
            .world(id)
            .ok_or(WorldError::WorldNotFound(id))?
            .to_record();
        let attached: Vec<(SessionId, Option<Residency>)> = self
            .sessions
            .attached_to(id)
            .into_iter()
            .filter_map(|s| self.sessions.get(s))
            .map(|s| (s.id, self.worlds.residency(EntityKey::Player(s.player))))
            .collect();
        let persistent_npcs: Vec<NpcRecord> = self
            .npcs
            .iter()
            .filter(|n| n.world == id && n.persistent && n.state != NpcState::Despawned)
            .map(NpcRuntime::to_record)
            .collect();

        let report = self.worlds.unload_world(id)?;
        let despawned = self.npcs.despawn_world(id);

        let mut retained_items = self.items.take_owned_by(ItemOwner::World(id));
        for npc in &despawned {
            let held = self.items.take_owned_by(ItemOwner::Npc(*npc));
            if persistent_npcs.iter().any(|n| n.id == *npc) {
                retained_items.extend(held);
            }
        }
        retained_items.sort_by_key(|i| i.id);

        for (session, residency) in attached {
            self.deactivate_session(session, residency)?;
        }

        info!(
            world = %id,
            zones = report.zones.len(),
            npcs = despawned.len(),
            items = retained_items.len(),
            "World unload cascade complete"
        );
        self.unloaded.insert(
            id,
            RetainedWorld {
                record,
                npcs: persistent_npcs,
                items: retained_items,
            },
        );
        Ok(Applied::dirtied(PersistSystem::IdentitySave))
    }

    // -----------------------------------------------------------------------
    // Persisted truth
    // -----------------------------------------------------------------------

    /// Append this arena's contribution for one persisted system.
    pub(crate) fn contribute(&self, system: PersistSystem, truth: &mut PersistedTruth) {
        match system {
            PersistSystem::IdentitySave => truth.players.extend(self.identities.records()),
            PersistSystem::WorldZone => {
                truth.worlds.extend(self.worlds.records());
                truth
                    .worlds
                    .extend(self.unloaded.values().map(|r| r.record.clone()));
            }
            PersistSystem::Npc => {
                truth.npcs.extend(self.npcs.records());
                truth
                    .npcs
                    .extend(self.unloaded.values().flat_map(|r| r.npcs.iter().cloned()));
            }
            PersistSystem::Item => {
                // Items carried by transient NPCs share their holder's fate.
                truth.items.extend(
                    self.items
                        .iter()
                        .filter(|i| match i.location.owner() {
                            ItemOwner::Npc(npc) => self.npcs.get(npc).is_some_and(|n| n.persistent),
                            ItemOwner::Player(_) | ItemOwner::World(_) => true,
                        })
                        .cloned(),
                );
                truth
                    .items
                    .extend(self.unloaded.values().flat_map(|r| r.items.iter().cloned()));
            }
            PersistSystem::Quest => truth.quests.extend(self.quests.records()),
        }
    }

    /// Rebuild an arena from validated persisted truth, in dependency order.
    ///
    /// Worlds come back `Loaded` and NPCs `Spawned`. No session exists.
    pub(crate) fn from_truth(truth: PersistedTruth) -> Result<Self, TickError> {
        let mut arena = Self::new();
        for world in &truth.worlds {
            arena.worlds.load_world(world)?;
        }
        for save in truth.players {
            arena.identities.register(save)?;
        }
        for npc in truth.npcs {
            arena.npcs.spawn(npc, true)?;
        }
        for item in truth.items {
            arena.insert_item(item)?;
        }
        for quest in truth.quests {
            arena.quests.insert(quest)?;
        }
        Ok(arena)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use caelmor_types::{EquipSlot, ZoneRecord};

    use super::*;

    fn world() -> WorldRecord {
        WorldRecord {
            id: WorldId::from_u128(1),
            name: "w1".to_owned(),
            default_zone: ZoneId::from_u128(1),
            zones: vec![
                ZoneRecord {
                    id: ZoneId::from_u128(1),
                    name: "z1".to_owned(),
                    context: Vec::new(),
                },
                ZoneRecord {
                    id: ZoneId::from_u128(7),
                    name: "z7".to_owned(),
                    context: Vec::new(),
                },
            ],
        }
    }

    fn npc(n: u128) -> NpcRecord {
        NpcRecord {
            id: NpcId::from_u128(n),
            world: WorldId::from_u128(1),
            home_zone: ZoneId::from_u128(7),
            definition: "guard".to_owned(),
            vitals: EntityVitals::default(),
        }
    }

    fn seeded() -> Arena {
        let mut arena = Arena::new();
        arena.load_world(&world()).unwrap();
        arena.worlds.activate_world(WorldId::from_u128(1)).unwrap();
        arena
            .register_identity(PlayerSave {
                player: PlayerId::from_u128(1),
                display_name: "p1".to_owned(),
                world: WorldId::from_u128(1),
                zone: ZoneId::from_u128(7),
                vitals: EntityVitals::default(),
            })
            .unwrap();
        arena
    }

    #[test]
    fn identity_save_must_reference_an_owned_zone() {
        let mut arena = seeded();
        let err = arena
            .register_identity(PlayerSave {
                player: PlayerId::from_u128(2),
                display_name: "p2".to_owned(),
                world: WorldId::from_u128(1),
                zone: ZoneId::from_u128(99),
                vitals: EntityVitals::default(),
            })
            .unwrap_err();
        assert!(matches!(err, TickError::World(WorldError::ZoneNotFound { .. })));
    }

    #[test]
    fn activation_attaches_world_and_prior_zone_together() {
        let mut arena = seeded();
        let session = arena.sessions.create(PlayerId::from_u128(1)).unwrap();
        let applied = arena
            .apply(&BoundaryRequest::ActivateSession {
                session,
                world: WorldId::from_u128(1),
            })
            .unwrap();
        let key = EntityKey::Player(PlayerId::from_u128(1));
        assert_eq!(applied.settling, vec![key]);
        assert_eq!(arena.worlds.residency(key).map(|r| r.zone), Some(ZoneId::from_u128(7)));
        assert_eq!(
            arena.sessions.get(session).map(|s| s.state),
            Some(SessionState::Activated)
        );
    }

    #[test]
    fn disconnecting_a_never_activated_session_discards_it() {
        let mut arena = seeded();
        let session = arena.sessions.create(PlayerId::from_u128(1)).unwrap();
        let applied = arena
            .apply(&BoundaryRequest::DeactivateSession { session })
            .unwrap();
        assert!(applied.dirty.is_empty());
        assert!(arena.sessions.get(session).is_none());
        assert!(arena.sessions.is_empty());
    }

    #[test]
    fn despawned_npc_drops_items_into_its_zone() {
        let mut arena = seeded();
        arena.apply(&BoundaryRequest::SpawnNpc { record: npc(1), persistent: true }).unwrap();
        arena.apply(&BoundaryRequest::ActivateNpc { npc: NpcId::from_u128(1) }).unwrap();
        arena
            .create_item(ItemRecord {
                id: ItemId::from_u128(1),
                definition: "key".to_owned(),
                location: ItemLocation::NpcPossession {
                    npc: NpcId::from_u128(1),
                },
            })
            .unwrap();

        let applied = arena
            .apply(&BoundaryRequest::DespawnNpc { npc: NpcId::from_u128(1) })
            .unwrap();
        assert!(applied.dirty.contains(&PersistSystem::Item));
        assert!(arena.npcs.get(NpcId::from_u128(1)).is_none());
        let item = arena.items.get(ItemId::from_u128(1)).unwrap();
        assert!(matches!(
            item.location,
            ItemLocation::WorldPlacement { zone, .. } if zone == ZoneId::from_u128(7)
        ));
        assert!(arena.worlds.residency(EntityKey::Item(ItemId::from_u128(1))).is_some());
    }

    #[test]
    fn equipping_into_taken_slot_is_rejected() {
        let mut arena = seeded();
        let player = PlayerId::from_u128(1);
        let slot = ItemLocation::Equipped {
            player,
            slot: EquipSlot::MainHand,
        };
        for n in 1..=2 {
            arena
                .create_item(ItemRecord {
                    id: ItemId::from_u128(n),
                    definition: "sword".to_owned(),
                    location: ItemLocation::Inventory { player },
                })
                .unwrap();
        }
        arena.apply(&BoundaryRequest::MoveItem { item: ItemId::from_u128(1), to: slot }).unwrap();
        let err = arena
            .apply(&BoundaryRequest::MoveItem { item: ItemId::from_u128(2), to: slot })
            .unwrap_err();
        assert!(matches!(err, TickError::Entity(EntityError::SlotOccupied { .. })));
    }

    #[test]
    fn unload_cascade_retains_persisted_truth() {
        let mut arena = seeded();
        let session = arena.sessions.create(PlayerId::from_u128(1)).unwrap();
        arena
            .apply(&BoundaryRequest::ActivateSession { session, world: WorldId::from_u128(1) })
            .unwrap();
        arena.apply(&BoundaryRequest::SpawnNpc { record: npc(1), persistent: true }).unwrap();
        arena.apply(&BoundaryRequest::SpawnNpc { record: npc(2), persistent: false }).unwrap();

        arena
            .apply(&BoundaryRequest::UnloadWorld { world: WorldId::from_u128(1) })
            .unwrap();
        assert!(arena.worlds.world(WorldId::from_u128(1)).is_none());
        assert_eq!(arena.npcs.iter().count(), 0);
        assert!(!arena.sessions.any_activated());
        assert!(arena.worlds.residency_table().is_empty());

        let mut truth = PersistedTruth::default();
        for system in PersistSystem::ORDER {
            arena.contribute(system, &mut truth);
        }
        assert_eq!(truth.worlds.len(), 1);
        assert_eq!(truth.npcs.iter().map(|n| n.id).collect::<Vec<_>>(), vec![NpcId::from_u128(1)]);

        arena.reload_world(WorldId::from_u128(1)).unwrap();
        assert_eq!(
            arena.npcs.get(NpcId::from_u128(1)).map(|n| n.state),
            Some(NpcState::Spawned)
        );
    }
}
