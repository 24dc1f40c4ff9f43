//! The runtime: the arena plus the clock, queues, and dirty tracking.
//!
//! The runtime is owned by the simulation task and is the only writer of
//! authoritative state. Every lifecycle, residency, item, or quest change
//! goes through one of two doors:
//!
//! - [`Runtime::request`] queues a transition from any phase. It is
//!   checked immediately and applied at the next tick boundary.
//! - The direct operations ([`Runtime::apply_now`], [`Runtime::load_world`],
//!   ...) apply at once, but only while the clock sits at a boundary.
//!
//! Either way the transition runs against a staged copy of the arena that
//! replaces the live arena only when the whole transition succeeded.
//!
//! The arena published by the last commit is pinned separately. Boundary
//! transitions replace the live arena, never the pinned one, so observers
//! of a committed tick see exactly what that tick committed.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use caelmor_entities::EntityError;
use caelmor_persist::{
    PersistenceCoordinator, SaveOperation, SaveParticipant, SaveReceipt, StorageBackend,
    ValidatedTruth,
};
use caelmor_types::{
    EntityKey, ErrorKind, Intent, ItemRecord, PersistSystem, PlayerId, PlayerInput, PlayerSave,
    QuestRecord, SessionId, SessionState, TickPhase, WorldId, WorldRecord,
};
use caelmor_world::WorldError;
use tracing::{debug, info, warn};

use crate::arena::{Applied, Arena};
use crate::clock::{ClockError, TickClock};
use crate::error::TickError;
use crate::participants::RuntimeParticipant;
use crate::requests::{BoundaryRequest, InputQueue, QueuedRequest, RequestQueue};
use crate::tick::OpenTick;

/// A queued request that could not be applied at its boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RejectedRequest {
    /// Request sequence number.
    pub seq: u64,
    /// The request.
    pub request: BoundaryRequest,
    /// Taxonomy of the rejection.
    pub kind: ErrorKind,
    /// Human-readable reason.
    pub reason: String,
}

/// Outcome of applying the boundary request queue.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BoundaryReport {
    /// Sequence numbers applied, in order.
    pub applied: Vec<u64>,
    /// Requests rejected at the boundary.
    pub rejected: Vec<RejectedRequest>,
}

impl BoundaryReport {
    fn absorb(&mut self, other: Self) {
        self.applied.extend(other.applied);
        self.rejected.extend(other.rejected);
    }
}

/// Authoritative runtime state and its tick-boundary discipline.
#[derive(Debug)]
pub struct Runtime {
    pub(crate) clock: TickClock,
    pub(crate) arena: Arc<Arena>,
    /// Arena as published by the last commit in this process.
    committed: Option<Arc<Arena>>,
    pub(crate) requests: RequestQueue,
    pub(crate) inputs: InputQueue,
    pub(crate) open: Option<OpenTick>,
    /// Entities whose residency changed since the last freeze.
    pub(crate) settling: BTreeSet<EntityKey>,
    /// Boundary outcomes not yet reported by a tick.
    pub(crate) boundary: BoundaryReport,
    dirty: BTreeMap<PersistSystem, u64>,
    revision: u64,
}

impl Runtime {
    /// Create an empty runtime at tick 0.
    ///
    /// # Errors
    ///
    /// Returns a clock error if the tick rate is out of range.
    pub fn new(tick_rate_hz: u32) -> Result<Self, TickError> {
        Ok(Self::with_parts(TickClock::new(tick_rate_hz)?, Arena::new()))
    }

    fn with_parts(clock: TickClock, arena: Arena) -> Self {
        Self {
            clock,
            arena: Arc::new(arena),
            committed: None,
            requests: RequestQueue::new(),
            inputs: InputQueue::new(),
            open: None,
            settling: BTreeSet::new(),
            boundary: BoundaryReport {
                applied: Vec::new(),
                rejected: Vec::new(),
            },
            dirty: BTreeMap::new(),
            revision: 0,
        }
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    /// Last committed tick.
    pub const fn tick(&self) -> u64 {
        self.clock.tick()
    }

    /// Current phase.
    pub const fn phase(&self) -> TickPhase {
        self.clock.phase()
    }

    /// The tick clock.
    pub const fn clock(&self) -> &TickClock {
        &self.clock
    }

    /// Live authoritative state, including boundary transitions applied
    /// since the last commit.
    pub fn arena(&self) -> &Arena {
        &self.arena
    }

    /// State exactly as the last commit left it, or `None` before the
    /// first commit of this process (a restored runtime included).
    pub fn committed_arena(&self) -> Option<&Arena> {
        self.committed.as_deref()
    }

    /// Publish `arena` as the new live and committed state.
    pub(crate) fn publish_commit(&mut self, arena: Arena) {
        self.arena = Arc::new(arena);
        self.committed = Some(Arc::clone(&self.arena));
    }

    /// Requests waiting for the next boundary.
    pub fn pending_requests(&self) -> &[QueuedRequest] {
        self.requests.pending()
    }

    /// Monotonic counter bumped whenever persisted truth changes.
    pub const fn revision(&self) -> u64 {
        self.revision
    }

    /// Persisted systems changed since the last successful save.
    pub fn dirty_systems(&self) -> BTreeSet<PersistSystem> {
        self.dirty.keys().copied().collect()
    }

    /// Whether anything changed after `revision`.
    pub fn dirty_since(&self, revision: u64) -> bool {
        self.dirty.values().any(|r| *r > revision)
    }

    pub(crate) fn mark_dirty(&mut self, system: PersistSystem) {
        self.revision = self.revision.saturating_add(1);
        self.dirty.insert(system, self.revision);
    }

    /// Forget dirty marks up to `revision` after a save of that revision
    /// committed elsewhere.
    pub fn mark_saved(&mut self, revision: u64) {
        self.dirty.retain(|_, r| *r > revision);
    }

    fn ensure_boundary(&self, operation: &'static str) -> Result<(), TickError> {
        let phase = self.clock.phase();
        if phase == TickPhase::Boundary {
            Ok(())
        } else {
            Err(TickError::OutsideBoundary { operation, phase })
        }
    }

    /// Run `transition` on a staged copy and swap it in on success.
    fn stage(
        &mut self,
        operation: &'static str,
        transition: impl FnOnce(&mut Arena) -> Result<Applied, TickError>,
    ) -> Result<(), TickError> {
        self.ensure_boundary(operation)?;
        let mut staged = Arena::clone(&self.arena);
        let applied = transition(&mut staged)?;
        self.arena = Arc::new(staged);
        self.settling.extend(applied.settling);
        for system in applied.dirty {
            self.mark_dirty(system);
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Direct operations (boundary only)
    // -----------------------------------------------------------------------

    /// Register a player identity with its save.
    ///
    /// # Errors
    ///
    /// Rejected mid-tick, for duplicate identities, and when the save names
    /// a zone its world does not own.
    pub fn register_identity(&mut self, save: PlayerSave) -> Result<(), TickError> {
        self.stage("register_identity", |arena| {
            arena.register_identity(save)?;
            Ok(Applied {
                settling: Vec::new(),
                dirty: vec![PersistSystem::IdentitySave],
            })
        })
    }

    /// Load a world in the `Loaded` state.
    ///
    /// # Errors
    ///
    /// Rejected mid-tick and for colliding world or zone ids.
    pub fn load_world(&mut self, record: &WorldRecord) -> Result<(), TickError> {
        self.stage("load_world", |arena| {
            arena.load_world(record)?;
            Ok(Applied {
                settling: Vec::new(),
                dirty: vec![PersistSystem::WorldZone],
            })
        })
    }

    /// Reload an unloaded world from its retained truth. NPCs come back
    /// `Spawned`.
    ///
    /// # Errors
    ///
    /// Rejected mid-tick or if nothing is retained for the world.
    pub fn reload_world(&mut self, world: WorldId) -> Result<(), TickError> {
        self.stage("reload_world", |arena| arena.reload_world(world))
    }

    /// Make a loaded world tick-participating.
    ///
    /// # Errors
    ///
    /// Rejected mid-tick or for an illegal world transition.
    pub fn activate_world(&mut self, world: WorldId) -> Result<(), TickError> {
        self.stage("activate_world", |arena| {
            arena.worlds.activate_world(world)?;
            Ok(Applied::default())
        })
    }

    /// Unload a world now, running the full cascade.
    ///
    /// # Errors
    ///
    /// Rejected mid-tick or if the world is not loaded.
    pub fn unload_world(&mut self, world: WorldId) -> Result<(), TickError> {
        self.apply_now(BoundaryRequest::UnloadWorld { world })
    }

    /// Create an item at a validated location.
    ///
    /// # Errors
    ///
    /// Rejected mid-tick, for duplicate ids, and for locations without a
    /// live owner.
    pub fn create_item(&mut self, record: ItemRecord) -> Result<(), TickError> {
        self.stage("create_item", |arena| {
            arena.create_item(record)?;
            Ok(Applied {
                settling: Vec::new(),
                dirty: vec![PersistSystem::Item],
            })
        })
    }

    /// Grant a quest to a player identity.
    ///
    /// # Errors
    ///
    /// Rejected mid-tick, for unknown owners, and for duplicate ids.
    pub fn grant_quest(&mut self, record: QuestRecord) -> Result<(), TickError> {
        self.stage("grant_quest", |arena| {
            arena.grant_quest(record)?;
            Ok(Applied {
                settling: Vec::new(),
                dirty: vec![PersistSystem::Quest],
            })
        })
    }

    /// Apply a transition immediately. The clock must be at a boundary.
    ///
    /// # Errors
    ///
    /// [`TickError::OutsideBoundary`] while a tick is open, otherwise the
    /// transition's own precondition failure.
    pub fn apply_now(&mut self, request: BoundaryRequest) -> Result<(), TickError> {
        self.stage("apply_now", |arena| arena.apply(&request))
    }

    // -----------------------------------------------------------------------
    // Sessions and inputs (any phase)
    // -----------------------------------------------------------------------

    /// Open a new, inactive session for a player.
    ///
    /// Session creation does not affect eligibility, so it is allowed in
    /// any phase.
    ///
    /// # Errors
    ///
    /// Rejected when the identity is unknown or has no save. No session is
    /// created in that case.
    pub fn connect(&mut self, player: PlayerId) -> Result<SessionId, TickError> {
        if !self.arena.identities.is_valid(player) {
            return Err(EntityError::UnknownIdentity(player).into());
        }
        self.arena.identities.save(player)?;
        Ok(Arc::make_mut(&mut self.arena).sessions.create(player)?)
    }

    /// Queue activation of a session in a world.
    ///
    /// # Errors
    ///
    /// See [`Self::request`].
    pub fn request_activation(
        &mut self,
        session: SessionId,
        world: WorldId,
    ) -> Result<u64, TickError> {
        self.request(BoundaryRequest::ActivateSession { session, world })
    }

    /// Queue deactivation of a session. The session keeps participating
    /// until the next boundary. A session that never activated is discarded
    /// there instead.
    ///
    /// # Errors
    ///
    /// See [`Self::request`].
    pub fn disconnect(&mut self, session: SessionId) -> Result<u64, TickError> {
        self.request(BoundaryRequest::DeactivateSession { session })
    }

    /// Submit a player intent. Returns the tick that will consume it.
    ///
    /// At a boundary the input targets the upcoming tick. While a tick is
    /// open it targets the tick after, never the open one.
    ///
    /// # Errors
    ///
    /// [`TickError::NoActiveSession`] without an activated session, and
    /// [`TickError::DuplicateInput`] for a second input in the same tick.
    pub fn submit_input(&mut self, player: PlayerId, intent: Intent) -> Result<u64, TickError> {
        if self.arena.sessions.active_session(player).is_none() {
            return Err(TickError::NoActiveSession(player));
        }
        let upcoming = self.clock.upcoming()?;
        let tick = if self.clock.is_mid_tick() {
            upcoming.checked_add(1).ok_or(ClockError::TickOverflow)?
        } else {
            upcoming
        };
        self.inputs.submit(PlayerInput {
            player,
            tick,
            intent,
        })?;
        Ok(tick)
    }

    // -----------------------------------------------------------------------
    // Boundary requests
    // -----------------------------------------------------------------------

    /// Queue a transition for the next boundary. Returns its sequence.
    ///
    /// # Errors
    ///
    /// Preconditions that no queued request could satisfy are rejected
    /// immediately and nothing is queued.
    pub fn request(&mut self, request: BoundaryRequest) -> Result<u64, TickError> {
        self.precheck(&request)?;
        let seq = self.requests.push(self.clock.tick(), request);
        debug!(seq, phase = ?self.clock.phase(), "Boundary request queued");
        Ok(seq)
    }

    fn precheck(&self, request: &BoundaryRequest) -> Result<(), TickError> {
        let arena: &Arena = &self.arena;
        match request {
            BoundaryRequest::ActivateSession { session, world } => {
                let player = arena
                    .sessions
                    .get(*session)
                    .ok_or(EntityError::SessionNotFound(*session))?
                    .player;
                arena.identities.save(player)?;
                arena
                    .sessions
                    .check_transition(*session, SessionState::Activated)?;
                let runtime = arena.worlds.world(*world).ok_or(WorldError::WorldNotFound(*world))?;
                if !runtime.is_participating() {
                    return Err(WorldError::WorldUnavailable {
                        world: *world,
                        state: runtime.state(),
                    }
                    .into());
                }
            }
            BoundaryRequest::DeactivateSession { session }
            | BoundaryRequest::TerminateSession { session } => {
                arena
                    .sessions
                    .get(*session)
                    .ok_or(EntityError::SessionNotFound(*session))?;
            }
            BoundaryRequest::AssignResidency { zone, .. } => {
                arena
                    .worlds
                    .zone_world(*zone)
                    .ok_or(WorldError::UnknownZone(*zone))?;
            }
            BoundaryRequest::SpawnNpc { record, .. } => {
                let world = arena
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
                if arena.npcs.get(record.id).is_some() {
                    return Err(EntityError::DuplicateNpc(record.id).into());
                }
            }
            BoundaryRequest::ActivateNpc { npc }
            | BoundaryRequest::SuspendNpc { npc }
            | BoundaryRequest::DespawnNpc { npc } => {
                let spawning = self.requests.pending().iter().any(|q| {
                    matches!(&q.request, BoundaryRequest::SpawnNpc { record, .. } if record.id == *npc)
                });
                if arena.npcs.get(*npc).is_none() && !spawning {
                    return Err(EntityError::NpcNotFound(*npc).into());
                }
            }
            BoundaryRequest::MoveItem { item, to } => {
                arena.items.get(*item).ok_or(EntityError::ItemNotFound(*item))?;
                arena.check_item_location(*to)?;
            }
            BoundaryRequest::TransitionQuest { quest, .. } => {
                arena.quests.get(*quest).ok_or(EntityError::QuestNotFound(*quest))?;
            }
            BoundaryRequest::UnloadWorld { world } => {
                arena.worlds.world(*world).ok_or(WorldError::WorldNotFound(*world))?;
            }
        }
        Ok(())
    }

    /// Apply every queued request in sequence order.
    ///
    /// Duplicate session activations in the same batch are resolved first:
    /// the lowest session sequence per player wins. Each request is applied
    /// to a staged copy, so a rejected request leaves state untouched.
    ///
    /// # Errors
    ///
    /// [`TickError::OutsideBoundary`] while a tick is open. Individual
    /// rejections are reported, not returned.
    pub fn apply_boundary(&mut self) -> Result<BoundaryReport, TickError> {
        self.ensure_boundary("apply_boundary")?;
        let queued = self.requests.drain();
        let mut report = BoundaryReport::default();
        if queued.is_empty() {
            return Ok(report);
        }

        let activations: Vec<SessionId> = queued
            .iter()
            .filter_map(|q| match q.request {
                BoundaryRequest::ActivateSession { session, .. } => Some(session),
                _ => None,
            })
            .collect();
        let mut lost: BTreeMap<SessionId, EntityError> = self
            .arena
            .sessions
            .resolve_activations(&activations)
            .rejected
            .into_iter()
            .collect();

        for queued_request in queued {
            let QueuedRequest { seq, request, .. } = queued_request;
            let lost_tiebreak = match &request {
                BoundaryRequest::ActivateSession { session, .. } => lost.remove(session),
                _ => None,
            };
            let outcome = match lost_tiebreak {
                Some(err) => Err(TickError::from(err)),
                None => {
                    let mut staged = Arena::clone(&self.arena);
                    staged.apply(&request).map(|applied| (staged, applied))
                }
            };
            match outcome {
                Ok((staged, applied)) => {
                    self.arena = Arc::new(staged);
                    self.settling.extend(applied.settling);
                    for system in applied.dirty {
                        self.mark_dirty(system);
                    }
                    report.applied.push(seq);
                }
                Err(err) => {
                    warn!(seq, error = %err, kind = ?err.kind(), "Boundary request rejected");
                    report.rejected.push(RejectedRequest {
                        seq,
                        request,
                        kind: err.kind(),
                        reason: err.to_string(),
                    });
                }
            }
        }

        info!(
            tick = self.clock.tick(),
            applied = report.applied.len(),
            rejected = report.rejected.len(),
            "Boundary transitions applied"
        );
        self.boundary.absorb(report.clone());
        Ok(report)
    }

    // -----------------------------------------------------------------------
    // Save and restore
    // -----------------------------------------------------------------------

    /// One save participant per persisted system.
    pub fn save_participants(&self) -> Vec<RuntimeParticipant<'_>> {
        PersistSystem::ORDER
            .iter()
            .map(|system| RuntimeParticipant::new(self, *system))
            .collect()
    }

    /// Poll every participant and capture an immutable payload.
    ///
    /// The returned operation is `AllReady` and can be committed on any
    /// thread.
    ///
    /// # Errors
    ///
    /// Fails as a whole if any participant is not save-ready.
    pub fn prepare_save(&self) -> Result<SaveOperation, TickError> {
        let mut op = SaveOperation::request(self.clock.tick());
        let participants = self.save_participants();
        let refs: Vec<&dyn SaveParticipant> = participants
            .iter()
            .map(|p| p as &dyn SaveParticipant)
            .collect();
        if let Err(err) = op.poll(&refs) {
            op.roll_back()?;
            return Err(err.into());
        }
        Ok(op)
    }

    /// Save synchronously and clear dirty marks.
    ///
    /// # Errors
    ///
    /// See [`Self::prepare_save`] and [`PersistenceCoordinator::commit`].
    pub fn save<S: StorageBackend>(
        &mut self,
        coordinator: &mut PersistenceCoordinator<S>,
    ) -> Result<SaveReceipt, TickError> {
        let revision = self.revision;
        let mut op = self.prepare_save()?;
        let receipt = coordinator.commit(&mut op)?;
        self.mark_saved(revision);
        Ok(receipt)
    }

    /// Rebuild a runtime from validated truth, resuming at `tick`.
    ///
    /// Nothing is active afterwards: worlds are `Loaded`, NPCs `Spawned`,
    /// and no session exists.
    ///
    /// # Errors
    ///
    /// Returns a clock error for a bad rate, or a registry error if the
    /// truth cannot be rebuilt.
    pub fn from_restored(
        truth: ValidatedTruth,
        tick: u64,
        tick_rate_hz: u32,
    ) -> Result<Self, TickError> {
        let clock = TickClock::resume_at(tick, tick_rate_hz)?;
        let arena = Arena::from_truth(truth.into_inner())?;
        info!(tick, "Runtime restored");
        Ok(Self::with_parts(clock, arena))
    }

    /// Restore from the coordinator's last committed save, if any.
    ///
    /// # Errors
    ///
    /// Any validation failure rejects the whole restore.
    pub fn restore<S: StorageBackend>(
        coordinator: &PersistenceCoordinator<S>,
        tick_rate_hz: u32,
    ) -> Result<Option<Self>, TickError> {
        match coordinator.restore()? {
            Some((envelope, truth)) => {
                Self::from_restored(truth, envelope.tick, tick_rate_hz).map(Some)
            }
            None => Ok(None),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use caelmor_persist::{MemoryStore, PersistError};
    use caelmor_types::{EntityVitals, NpcId, NpcRecord, ZoneId, ZoneRecord};

    use super::*;

    fn world() -> WorldRecord {
        WorldRecord {
            id: WorldId::from_u128(1),
            name: "w1".to_owned(),
            default_zone: ZoneId::from_u128(1),
            zones: vec![ZoneRecord {
                id: ZoneId::from_u128(1),
                name: "z1".to_owned(),
                context: Vec::new(),
            }],
        }
    }

    fn runtime() -> Runtime {
        let mut runtime = Runtime::new(10).unwrap();
        runtime.load_world(&world()).unwrap();
        runtime.activate_world(WorldId::from_u128(1)).unwrap();
        runtime
            .register_identity(PlayerSave {
                player: PlayerId::from_u128(1),
                display_name: "p1".to_owned(),
                world: WorldId::from_u128(1),
                zone: ZoneId::from_u128(1),
                vitals: EntityVitals::default(),
            })
            .unwrap();
        runtime
    }

    #[test]
    fn unknown_identity_cannot_connect() {
        let mut runtime = runtime();
        let err = runtime.connect(PlayerId::from_u128(9)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PreconditionRejected);
        assert_eq!(runtime.arena().sessions().iter().count(), 0);
    }

    #[test]
    fn activation_against_unavailable_world_fails_synchronously() {
        let mut runtime = runtime();
        runtime
            .load_world(&WorldRecord {
                id: WorldId::from_u128(2),
                name: "w2".to_owned(),
                default_zone: ZoneId::from_u128(2),
                zones: vec![ZoneRecord {
                    id: ZoneId::from_u128(2),
                    name: "z2".to_owned(),
                    context: Vec::new(),
                }],
            })
            .unwrap();
        let session = runtime.connect(PlayerId::from_u128(1)).unwrap();
        let err = runtime
            .request_activation(session, WorldId::from_u128(2))
            .unwrap_err();
        assert!(matches!(err, TickError::World(WorldError::WorldUnavailable { .. })));
        assert!(runtime.pending_requests().is_empty());
    }

    #[test]
    fn duplicate_activations_resolve_to_lowest_session() {
        let mut runtime = runtime();
        let player = PlayerId::from_u128(1);
        let first = runtime.connect(player).unwrap();
        let second = runtime.connect(player).unwrap();
        runtime.request_activation(second, WorldId::from_u128(1)).unwrap();
        runtime.request_activation(first, WorldId::from_u128(1)).unwrap();

        let report = runtime.apply_boundary().unwrap();
        assert_eq!(report.applied.len(), 1);
        assert_eq!(report.rejected.len(), 1);
        assert_eq!(
            runtime.arena().sessions().active_session(player).map(|s| s.id),
            Some(first)
        );
        assert_eq!(runtime.arena().sessions().active_count(player), 1);
    }

    #[test]
    fn rejected_request_leaves_state_unchanged() {
        let mut runtime = runtime();
        runtime
            .request(BoundaryRequest::SpawnNpc {
                record: NpcRecord {
                    id: NpcId::from_u128(1),
                    world: WorldId::from_u128(1),
                    home_zone: ZoneId::from_u128(1),
                    definition: "guard".to_owned(),
                    vitals: EntityVitals::default(),
                },
                persistent: true,
            })
            .unwrap();
        runtime.request(BoundaryRequest::ActivateNpc { npc: NpcId::from_u128(1) }).unwrap();
        runtime.request(BoundaryRequest::ActivateNpc { npc: NpcId::from_u128(1) }).unwrap();
        let before_second = {
            let mut scratch = runtime.arena().clone();
            for q in runtime.pending_requests().iter().take(2) {
                scratch.apply(&q.request).unwrap();
            }
            scratch
        };

        let report = runtime.apply_boundary().unwrap();
        assert_eq!(report.applied.len(), 2);
        assert_eq!(report.rejected.len(), 1);
        assert_eq!(runtime.arena(), &before_second);
    }

    #[test]
    fn save_rejected_while_a_session_is_active() {
        let mut runtime = runtime();
        let session = runtime.connect(PlayerId::from_u128(1)).unwrap();
        runtime.request_activation(session, WorldId::from_u128(1)).unwrap();
        runtime.apply_boundary().unwrap();

        let mut coordinator = PersistenceCoordinator::open(MemoryStore::new()).unwrap();
        let err = runtime.save(&mut coordinator).unwrap_err();
        assert!(matches!(
            err,
            TickError::Persist(PersistError::NotReady {
                system: PersistSystem::IdentitySave,
                ..
            })
        ));
        assert!(coordinator.store().committed().is_none());

        runtime.disconnect(session).unwrap();
        runtime.apply_boundary().unwrap();
        assert_eq!(
            runtime.arena().sessions().get(session).map(|s| s.state),
            Some(SessionState::Deactivated)
        );
        let receipt = runtime.save(&mut coordinator).unwrap();
        assert_eq!(receipt.generation, 1);
        assert!(runtime.dirty_systems().is_empty());
    }
}
