//! Tick cycle: gate evaluation, simulation execution, and commit.
//!
//! Each tick runs through the phases tracked by the [`TickClock`]:
//!
//! 1. **Boundary** -- queued transitions are applied in request order.
//! 2. **Pre-Tick Gate Evaluation** -- the eligible set is frozen and player
//!    inputs for this tick are bound to eligible players.
//! 3. **Simulation Execution** -- NPC perceptions are built, the
//!    [`DecisionSource`] supplies intents, and every [`SimulationSystem`]
//!    stages writes against committed state. Nothing is applied yet.
//! 4. **Post-Tick Finalization** -- staged writes are applied to a copy of
//!    the arena, which replaces the live arena in one step. Only then may
//!    snapshots be generated and persisted systems marked dirty.
//!
//! Any failure aborts the tick with nothing committed and returns the clock
//! to the boundary of the same tick number.
//!
//! [`TickClock`]: crate::clock::TickClock

use std::collections::{BTreeMap, BTreeSet};

use caelmor_types::{
    EntityKey, EntityVitals, Intent, NpcState, PersistSystem, QuestId, QuestState, TickPhase,
    ZoneId,
};
use serde::Serialize;
use tracing::{debug, error};

use crate::arena::Arena;
use crate::clock::ClockError;
use crate::decision::{DecisionSource, perceive};
use crate::eligibility::EligibleSet;
use crate::error::TickError;
use crate::requests::BoundaryRequest;
use crate::runtime::{RejectedRequest, Runtime};
use crate::system::{ExecutionContext, IntentSystem, SimulationSystem, TickWrites};

/// One-shot hook that fails the next commit after `n` writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommitFault {
    after_writes: usize,
}

impl CommitFault {
    /// Fail once `n` writes have been applied to the staged copy.
    pub const fn after_writes(n: usize) -> Self {
        Self { after_writes: n }
    }
}

/// The pluggable parts of the tick cycle.
pub struct TickPipeline {
    decisions: Box<dyn DecisionSource>,
    systems: Vec<Box<dyn SimulationSystem>>,
    verify_determinism: bool,
    commit_fault: Option<CommitFault>,
}

impl std::fmt::Debug for TickPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TickPipeline")
            .field(
                "systems",
                &self.systems.iter().map(|s| s.name()).collect::<Vec<_>>(),
            )
            .field("verify_determinism", &self.verify_determinism)
            .field("commit_fault", &self.commit_fault)
            .finish_non_exhaustive()
    }
}

impl TickPipeline {
    /// Pipeline with the built-in [`IntentSystem`].
    pub fn new(decisions: Box<dyn DecisionSource>) -> Self {
        Self {
            decisions,
            systems: vec![Box::new(IntentSystem)],
            verify_determinism: false,
            commit_fault: None,
        }
    }

    /// Append a system. Systems run in insertion order.
    #[must_use]
    pub fn with_system(mut self, system: Box<dyn SimulationSystem>) -> Self {
        self.systems.push(system);
        self
    }

    /// Re-execute every tick and compare staged results.
    #[must_use]
    pub const fn verify_determinism(mut self, verify: bool) -> Self {
        self.verify_determinism = verify;
        self
    }

    /// Arm a commit fault for the next commit that reaches it.
    pub const fn inject_commit_fault(&mut self, fault: CommitFault) {
        self.commit_fault = Some(fault);
    }
}

/// State of the tick between gate evaluation and commit.
#[derive(Debug)]
pub(crate) struct OpenTick {
    eligible: EligibleSet,
    inputs: BTreeMap<EntityKey, Intent>,
    staged: Option<TickWrites>,
}

/// Summary of a committed tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TickReport {
    /// The committed tick.
    pub tick: u64,
    /// Number of simulated entities.
    pub eligible: usize,
    /// Boundary requests applied before this tick.
    pub applied_requests: Vec<u64>,
    /// Boundary requests rejected before this tick.
    pub rejected_requests: Vec<RejectedRequest>,
    /// Entities whose vitals changed.
    pub entity_writes: usize,
    /// Quests whose progress changed.
    pub quest_writes: usize,
    /// Cross-zone effects mediated.
    pub zone_effects: usize,
    /// Requests queued for the next boundary.
    pub emitted_requests: usize,
    /// Persisted systems this tick touched.
    pub dirty: Vec<PersistSystem>,
    /// FNV-1a digest of the committed state.
    pub digest: u64,
}

impl Runtime {
    /// The eligible set of the open tick.
    pub fn eligible(&self) -> Option<&EligibleSet> {
        self.open.as_ref().map(|o| &o.eligible)
    }

    /// Apply the boundary and freeze the eligible set for the upcoming
    /// tick.
    ///
    /// # Errors
    ///
    /// [`TickError::OutsideBoundary`] if a tick is already open, or
    /// [`TickError::GateInvariant`] if an eligible entity lacks its world
    /// or residency. The latter aborts the tick.
    pub fn begin_tick(&mut self) -> Result<&EligibleSet, TickError> {
        self.apply_boundary()?;
        let tick = self.clock.upcoming()?;
        self.clock.enter(TickPhase::GateEvaluation)?;

        let eligible = match EligibleSet::freeze(tick, &self.arena, self.settling.clone()) {
            Ok(eligible) => eligible,
            Err(err) => {
                error!(tick, error = %err, "Gate evaluation failed");
                self.clock.abort();
                return Err(err);
            }
        };
        self.settling.clear();

        let mut inputs = BTreeMap::new();
        for (player, intent) in self.inputs.take_for(tick) {
            let key = EntityKey::Player(player);
            if eligible.contains(key) {
                inputs.insert(key, intent);
            } else {
                debug!(tick, %player, "Input for ineligible player discarded");
            }
        }

        self.clock.enter(TickPhase::Executing)?;
        let open = self.open.insert(OpenTick {
            eligible,
            inputs,
            staged: None,
        });
        Ok(&open.eligible)
    }

    /// Run decisions and every system over the frozen eligible set.
    ///
    /// # Errors
    ///
    /// Decision failures, authority violations, and determinism violations
    /// abort the tick.
    pub fn execute(&mut self, pipeline: &mut TickPipeline) -> Result<(), TickError> {
        self.expect_phase(TickPhase::Executing, TickPhase::Finalizing)?;
        let result = match self.open.as_ref() {
            Some(open) => stage_writes(&self.arena, open, pipeline),
            None => Err(no_open_tick(self.clock.phase())),
        };
        match result {
            Ok(writes) => {
                if let Some(open) = self.open.as_mut() {
                    open.staged = Some(writes);
                }
                self.clock.enter(TickPhase::Finalizing)?;
                Ok(())
            }
            Err(err) => Err(self.abort_tick(err)),
        }
    }

    /// Atomically publish the staged writes.
    ///
    /// Writes are applied to a copy of the arena. The copy replaces the
    /// live arena only after every write succeeded, so a failure leaves
    /// the last committed state untouched.
    ///
    /// # Errors
    ///
    /// Any write failure or an armed [`CommitFault`] aborts the tick.
    pub fn commit_tick(&mut self, pipeline: &mut TickPipeline) -> Result<TickReport, TickError> {
        self.expect_phase(TickPhase::Finalizing, TickPhase::Boundary)?;
        let Some(open) = self.open.take() else {
            return Err(no_open_tick(self.clock.phase()));
        };
        let OpenTick {
            eligible, staged, ..
        } = open;
        let Some(writes) = staged else {
            return Err(self.abort_tick(no_open_tick(self.clock.phase())));
        };
        let tick = eligible.tick();

        let fault = pipeline.commit_fault.take();
        let staged = apply_writes(&self.arena, tick, &writes, fault).and_then(|(arena, applied)| {
            let digest = digest(tick, &arena, &writes.requests)?;
            Ok((arena, applied, digest))
        });
        let (arena, applied, digest) = match staged {
            Ok(staged) => staged,
            Err(err) => {
                self.settling.extend(eligible.settling());
                return Err(self.abort_tick(err));
            }
        };
        if fault.is_some_and(|f| applied < f.after_writes) {
            pipeline.commit_fault = fault;
        }
        if let Err(err) = self.clock.commit() {
            self.settling.extend(eligible.settling());
            return Err(self.abort_tick(err.into()));
        }
        self.publish_commit(arena);

        // --- Release downstream work ---
        let mut dirty = BTreeSet::new();
        if writes.entities.keys().any(|k| match k {
            EntityKey::Npc(id) => self.arena.npcs().get(*id).is_some_and(|n| n.persistent),
            EntityKey::Player(_) | EntityKey::Item(_) => false,
        }) {
            dirty.insert(PersistSystem::Npc);
        }
        if !writes.quest_progress.is_empty() {
            dirty.insert(PersistSystem::Quest);
        }
        if !writes.zone_effects.is_empty() {
            dirty.insert(PersistSystem::WorldZone);
        }
        for system in &dirty {
            self.mark_dirty(*system);
        }
        for request in writes.requests.iter().cloned() {
            self.requests.push(tick, request);
        }

        let boundary = std::mem::take(&mut self.boundary);
        let report = TickReport {
            tick,
            eligible: eligible.len(),
            applied_requests: boundary.applied,
            rejected_requests: boundary.rejected,
            entity_writes: writes.entities.len(),
            quest_writes: writes.quest_progress.len(),
            zone_effects: writes.zone_effects.len(),
            emitted_requests: writes.requests.len(),
            dirty: dirty.into_iter().collect(),
            digest,
        };
        debug!(
            tick,
            eligible = report.eligible,
            entity_writes = report.entity_writes,
            digest = report.digest,
            "Tick committed"
        );
        Ok(report)
    }

    /// Run one complete tick.
    ///
    /// # Errors
    ///
    /// See [`Self::begin_tick`], [`Self::execute`], and
    /// [`Self::commit_tick`].
    pub fn run_tick(&mut self, pipeline: &mut TickPipeline) -> Result<TickReport, TickError> {
        self.begin_tick()?;
        self.execute(pipeline)?;
        self.commit_tick(pipeline)
    }

    fn expect_phase(&self, expected: TickPhase, next: TickPhase) -> Result<(), TickError> {
        let phase = self.clock.phase();
        if phase == expected {
            Ok(())
        } else {
            Err(ClockError::PhaseOrder {
                from: phase,
                to: next,
            }
            .into())
        }
    }

    fn abort_tick(&mut self, err: TickError) -> TickError {
        error!(
            tick = self.clock.tick().saturating_add(1),
            phase = ?self.clock.phase(),
            kind = ?err.kind(),
            error = %err,
            "Tick aborted, nothing committed"
        );
        if let Some(open) = self.open.take() {
            self.settling.extend(open.eligible.settling());
        }
        self.clock.abort();
        err
    }
}

const fn no_open_tick(phase: TickPhase) -> TickError {
    TickError::Clock(ClockError::PhaseOrder {
        from: phase,
        to: TickPhase::Finalizing,
    })
}

fn stage_writes(
    arena: &Arena,
    open: &OpenTick,
    pipeline: &mut TickPipeline,
) -> Result<TickWrites, TickError> {
    let tick = open.eligible.tick();
    let perceptions = perceive(&ExecutionContext::new(
        tick,
        arena,
        &open.eligible,
        &open.inputs,
    ));
    let decided = pipeline.decisions.collect_intents(tick, &perceptions)?;

    let mut intents = open.inputs.clone();
    for (npc, intent) in decided {
        if !perceptions.contains_key(&npc) {
            return Err(TickError::NotEligible {
                system: "decisions",
                entity: EntityKey::Npc(npc),
            });
        }
        intents.insert(EntityKey::Npc(npc), intent);
    }

    let ctx = ExecutionContext::new(tick, arena, &open.eligible, &intents);
    let writes = run_systems(&pipeline.systems, &ctx)?;
    if pipeline.verify_determinism && run_systems(&pipeline.systems, &ctx)? != writes {
        return Err(TickError::Nondeterministic { tick });
    }
    Ok(writes)
}

fn run_systems(
    systems: &[Box<dyn SimulationSystem>],
    ctx: &ExecutionContext<'_>,
) -> Result<TickWrites, TickError> {
    let mut all = TickWrites::default();
    for system in systems {
        let mut writes = TickWrites::default();
        system.execute(ctx, &mut writes)?;
        writes.check_authority(system.name(), ctx)?;
        all.merge(writes);
    }
    Ok(all)
}

/// Apply staged writes to a copy of `arena`: entity vitals, then quest
/// progress, then mediated zone effects.
fn apply_writes(
    arena: &Arena,
    tick: u64,
    writes: &TickWrites,
    fault: Option<CommitFault>,
) -> Result<(Arena, usize), TickError> {
    let mut staged = arena.clone();
    let mut applied: usize = 0;
    let check = |applied: usize| match fault {
        Some(f) if applied >= f.after_writes => Err(TickError::CommitFault { tick, applied }),
        _ => Ok(()),
    };

    for (entity, write) in &writes.entities {
        check(applied)?;
        match entity {
            EntityKey::Player(player) => staged.sessions.set_vitals(*player, write.vitals)?,
            EntityKey::Npc(npc) => staged.npcs.set_vitals(*npc, write.vitals)?,
            EntityKey::Item(_) => {
                return Err(TickError::NotEligible {
                    system: "commit",
                    entity: *entity,
                });
            }
        }
        applied = applied.saturating_add(1);
    }

    for (quest, delta) in &writes.quest_progress {
        check(applied)?;
        let next = staged.quests.check_progress(*quest, *delta)?;
        staged.quests.set_progress(*quest, next)?;
        applied = applied.saturating_add(1);
    }

    if !writes.zone_effects.is_empty() {
        let plan = staged.worlds.plan_cross_zone(writes.zone_effects.clone())?;
        for _ in plan.ordered_effects() {
            check(applied)?;
            applied = applied.saturating_add(1);
        }
        staged.worlds.apply_cross_zone(&plan)?;
    }

    Ok((staged, applied))
}

/// Canonical view of committed state hashed into the tick digest.
#[derive(Serialize)]
struct DigestView<'a> {
    tick: u64,
    entities: Vec<(EntityKey, EntityVitals, Option<NpcState>)>,
    residency: Vec<(EntityKey, ZoneId)>,
    zones: Vec<(ZoneId, Vec<(&'a str, i64)>)>,
    quests: Vec<(QuestId, QuestState, u32)>,
    requests: &'a [BoundaryRequest],
}

fn digest(tick: u64, arena: &Arena, requests: &[BoundaryRequest]) -> Result<u64, TickError> {
    let mut entities: Vec<_> = arena
        .sessions()
        .activated()
        .map(|s| (EntityKey::Player(s.player), s.vitals, None))
        .collect();
    entities.extend(
        arena
            .npcs()
            .iter()
            .map(|n| (EntityKey::Npc(n.id), n.vitals, Some(n.state))),
    );
    entities.sort_by_key(|(k, _, _)| *k);

    let view = DigestView {
        tick,
        entities,
        residency: arena
            .worlds()
            .residency_table()
            .iter()
            .map(|(k, r)| (k, r.zone))
            .collect(),
        zones: arena
            .worlds()
            .worlds()
            .flat_map(|w| w.zones())
            .map(|z| {
                (
                    z.id(),
                    z.context().iter().map(|(k, v)| (k.as_str(), *v)).collect(),
                )
            })
            .collect(),
        quests: arena
            .quests()
            .records()
            .into_iter()
            .map(|q| (q.id, q.state, q.progress))
            .collect(),
        requests,
    };
    let encoded = serde_json::to_vec(&view)?;
    Ok(fnv1a(&encoded))
}

/// FNV-1a, 64-bit.
fn fnv1a(bytes: &[u8]) -> u64 {
    const OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0100_0000_01b3;
    bytes.iter().fold(OFFSET, |hash, byte| {
        (hash ^ u64::from(*byte)).wrapping_mul(PRIME)
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use caelmor_types::{
        ErrorKind, GridPos, NpcId, NpcRecord, PlayerId, PlayerSave, QuestRecord, WorldId,
        WorldRecord, ZoneRecord,
    };

    use super::*;
    use crate::decision::IdleDecisionSource;
    use crate::system::QuestProgress;

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
                    id: ZoneId::from_u128(2),
                    name: "z2".to_owned(),
                    context: Vec::new(),
                },
            ],
        }
    }

    fn runtime_with_npc() -> Runtime {
        let mut runtime = Runtime::new(10).unwrap();
        runtime.load_world(&world()).unwrap();
        runtime.activate_world(WorldId::from_u128(1)).unwrap();
        runtime
            .apply_now(BoundaryRequest::SpawnNpc {
                record: NpcRecord {
                    id: NpcId::from_u128(1),
                    world: WorldId::from_u128(1),
                    home_zone: ZoneId::from_u128(1),
                    definition: "guard".to_owned(),
                    vitals: EntityVitals {
                        position: GridPos::new(0, 0),
                        health: 50,
                    },
                },
                persistent: true,
            })
            .unwrap();
        runtime
            .apply_now(BoundaryRequest::ActivateNpc {
                npc: NpcId::from_u128(1),
            })
            .unwrap();
        runtime
    }

    struct Scripted(BTreeMap<NpcId, Intent>);

    impl DecisionSource for Scripted {
        fn collect_intents(
            &mut self,
            _tick: u64,
            _perceptions: &BTreeMap<NpcId, crate::decision::Perception>,
        ) -> Result<BTreeMap<NpcId, Intent>, crate::decision::DecisionError> {
            Ok(self.0.clone())
        }
    }

    fn scripted(intent: Intent) -> TickPipeline {
        let mut intents = BTreeMap::new();
        intents.insert(NpcId::from_u128(1), intent);
        TickPipeline::new(Box::new(Scripted(intents)))
    }

    #[test]
    fn phases_cannot_be_skipped() {
        let mut runtime = runtime_with_npc();
        let mut pipeline = TickPipeline::new(Box::new(IdleDecisionSource::new()));
        let err = runtime.commit_tick(&mut pipeline).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::OrderingViolation);
        assert_eq!(runtime.tick(), 0);

        runtime.begin_tick().unwrap();
        assert!(runtime.begin_tick().is_err());
        let err = runtime.load_world(&world()).unwrap_err();
        assert!(matches!(err, TickError::OutsideBoundary { .. }));
    }

    #[test]
    fn move_intent_commits_one_step() {
        let mut runtime = runtime_with_npc();
        let mut pipeline = scripted(Intent::MoveTo {
            target: GridPos::new(3, 0),
        });
        let report = runtime.run_tick(&mut pipeline).unwrap();
        assert_eq!(report.tick, 1);
        assert_eq!(report.entity_writes, 1);
        assert_eq!(report.dirty, vec![PersistSystem::Npc]);
        assert_eq!(
            runtime.arena().vitals(EntityKey::Npc(NpcId::from_u128(1))).map(|v| v.position),
            Some(GridPos::new(1, 0))
        );
    }

    #[test]
    fn settling_npc_transfer_skips_zone_effect_then_moves_at_boundary() {
        let mut runtime = runtime_with_npc();
        let mut pipeline = scripted(Intent::TransferZone {
            zone: ZoneId::from_u128(2),
        });
        // Tick 1: the NPC was just activated, so it is settling.
        let first = runtime.run_tick(&mut pipeline).unwrap();
        assert_eq!(first.zone_effects, 0);
        assert_eq!(first.emitted_requests, 1);
        let key = EntityKey::Npc(NpcId::from_u128(1));
        assert_eq!(
            runtime.arena().worlds().residency(key).map(|r| r.zone),
            Some(ZoneId::from_u128(1))
        );

        // Tick 2: the transfer applies at the boundary before gate evaluation.
        let eligible = runtime.begin_tick().unwrap();
        assert_eq!(eligible.residency(key).map(|r| r.zone), Some(ZoneId::from_u128(2)));
        assert!(eligible.is_settling(key));
    }

    #[test]
    fn decision_for_unknown_npc_aborts_tick() {
        let mut runtime = runtime_with_npc();
        let mut intents = BTreeMap::new();
        intents.insert(NpcId::from_u128(99), Intent::Rest);
        let mut pipeline = TickPipeline::new(Box::new(Scripted(intents)));
        let before = runtime.arena().clone();
        let err = runtime.run_tick(&mut pipeline).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AuthorityViolation);
        assert_eq!(runtime.tick(), 0);
        assert_eq!(runtime.phase(), TickPhase::Boundary);
        assert_eq!(runtime.arena(), &before);
    }

    struct Flaky;

    impl SimulationSystem for Flaky {
        fn name(&self) -> &'static str {
            "flaky"
        }

        fn execute(
            &self,
            ctx: &ExecutionContext<'_>,
            writes: &mut TickWrites,
        ) -> Result<(), TickError> {
            // Reads a process-global counter: different on every call.
            static CALLS: std::sync::atomic::AtomicU32 = std::sync::atomic::AtomicU32::new(0);
            let n = CALLS.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
            for (entity, _) in ctx.eligible().iter() {
                if let Some(vitals) = ctx.vitals(entity) {
                    writes.set_vitals(entity, EntityVitals { health: n, ..vitals });
                }
            }
            Ok(())
        }
    }

    #[test]
    fn verification_catches_nondeterministic_system() {
        let mut runtime = runtime_with_npc();
        let mut pipeline = TickPipeline::new(Box::new(IdleDecisionSource::new()))
            .with_system(Box::new(Flaky))
            .verify_determinism(true);
        let err = runtime.run_tick(&mut pipeline).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DeterminismViolation);
        assert_eq!(runtime.tick(), 0);
    }

    struct Questing;

    impl SimulationSystem for Questing {
        fn name(&self) -> &'static str {
            "questing"
        }

        fn execute(
            &self,
            ctx: &ExecutionContext<'_>,
            writes: &mut TickWrites,
        ) -> Result<(), TickError> {
            // Credits a quest whose owner is not eligible.
            for quest in ctx.quests_of(PlayerId::from_u128(1)) {
                writes.add_quest_progress(QuestProgress {
                    quest: quest.id,
                    delta: 1,
                });
            }
            Ok(())
        }
    }

    #[test]
    fn quest_write_for_ineligible_owner_is_authority_violation() {
        let mut runtime = runtime_with_npc();
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
            .grant_quest(QuestRecord {
                id: QuestId::from_u128(1),
                owner: PlayerId::from_u128(1),
                definition: "q".to_owned(),
                state: QuestState::Active,
                progress: 0,
            })
            .unwrap();
        let mut pipeline =
            TickPipeline::new(Box::new(IdleDecisionSource::new())).with_system(Box::new(Questing));
        let err = runtime.run_tick(&mut pipeline).unwrap_err();
        assert!(matches!(err, TickError::NotEligible { system: "questing", .. }));
    }

    #[test]
    fn fnv1a_matches_reference_vectors() {
        assert_eq!(fnv1a(b""), 0xcbf2_9ce4_8422_2325);
        assert_eq!(fnv1a(b"a"), 0xaf63_dc4c_8601_ec8c);
    }
}
