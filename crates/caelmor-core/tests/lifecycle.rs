//! Integration tests for the tick boundary discipline.
//!
//! Covers the full activate, simulate, disconnect, save, and restore
//! scenario, single active sessions under duplicate connection attempts,
//! residency exclusivity, and transitions requested mid-tick.

#![allow(clippy::unwrap_used)]

use std::collections::BTreeMap;

use caelmor_core::decision::{DecisionError, Perception};
use caelmor_core::{
    BoundaryRequest, DecisionSource, IdleDecisionSource, Runtime, TickPipeline,
    WanderDecisionSource,
};
use caelmor_persist::{MemoryStore, PersistenceCoordinator};
use caelmor_types::{
    EntityKey, EntityVitals, ErrorKind, GridPos, Intent, ItemId, ItemLocation, ItemRecord, NpcId,
    NpcRecord, NpcState, PlayerId, PlayerSave, QuestId, QuestRecord, QuestState, SessionState,
    TickPhase, WorldId, WorldRecord, ZoneId, ZoneRecord,
};

const W1: WorldId = WorldId::from_u128(1);
const Z1: ZoneId = ZoneId::from_u128(1);
const Z7: ZoneId = ZoneId::from_u128(7);
const P1: PlayerId = PlayerId::from_u128(1);
const N1: NpcId = NpcId::from_u128(1);
const N2: NpcId = NpcId::from_u128(2);

fn zone(id: ZoneId, name: &str) -> ZoneRecord {
    ZoneRecord {
        id,
        name: name.to_owned(),
        context: Vec::new(),
    }
}

fn npc(id: NpcId, x: i32) -> BoundaryRequest {
    BoundaryRequest::SpawnNpc {
        record: NpcRecord {
            id,
            world: W1,
            home_zone: Z1,
            definition: "villager".to_owned(),
            vitals: EntityVitals {
                position: GridPos::new(x, 0),
                health: 60,
            },
        },
        persistent: true,
    }
}

/// W1 with zones Z1 and Z7, P1 saved in Z7, two active NPCs in Z1, one
/// placed item, and one active quest.
fn seeded() -> Runtime {
    let mut runtime = Runtime::new(10).unwrap();
    runtime
        .load_world(&WorldRecord {
            id: W1,
            name: "W1".to_owned(),
            default_zone: Z1,
            zones: vec![zone(Z1, "Z1"), zone(Z7, "Z7")],
        })
        .unwrap();
    runtime.activate_world(W1).unwrap();
    runtime
        .register_identity(PlayerSave {
            player: P1,
            display_name: "P1".to_owned(),
            world: W1,
            zone: Z7,
            vitals: EntityVitals {
                position: GridPos::new(2, 3),
                health: 80,
            },
        })
        .unwrap();
    for (id, x) in [(N1, 0), (N2, 5)] {
        runtime.apply_now(npc(id, x)).unwrap();
        runtime
            .apply_now(BoundaryRequest::ActivateNpc { npc: id })
            .unwrap();
    }
    runtime
        .create_item(ItemRecord {
            id: ItemId::from_u128(1),
            definition: "lantern".to_owned(),
            location: ItemLocation::WorldPlacement {
                world: W1,
                zone: Z7,
                position: GridPos::new(1, 1),
            },
        })
        .unwrap();
    runtime
        .grant_quest(QuestRecord {
            id: QuestId::from_u128(1),
            owner: P1,
            definition: "find-the-lantern".to_owned(),
            state: QuestState::Active,
            progress: 0,
        })
        .unwrap();
    runtime
}

fn idle() -> TickPipeline {
    TickPipeline::new(Box::new(IdleDecisionSource::new())).verify_determinism(true)
}

#[test]
fn activate_simulate_disconnect_save_restore() {
    let mut runtime = seeded();
    let mut pipeline = idle();

    let session = runtime.connect(P1).unwrap();
    runtime.request_activation(session, W1).unwrap();
    assert_eq!(
        runtime.arena().sessions().get(session).map(|s| s.state),
        Some(SessionState::Created)
    );

    for expected in 1..=5 {
        let report = runtime.run_tick(&mut pipeline).unwrap();
        assert_eq!(report.tick, expected);
        assert!(report.rejected_requests.is_empty());
    }
    let player = EntityKey::Player(P1);
    assert_eq!(
        runtime.arena().sessions().get(session).map(|s| s.state),
        Some(SessionState::Activated)
    );
    assert_eq!(
        runtime.arena().worlds().residency(player).map(|r| r.zone),
        Some(Z7)
    );

    // Tick 6: disconnect while the tick is executing.
    assert!(runtime.begin_tick().unwrap().contains(player));
    assert_eq!(runtime.phase(), TickPhase::Executing);
    runtime.disconnect(session).unwrap();
    assert_eq!(
        runtime.arena().sessions().get(session).map(|s| s.state),
        Some(SessionState::Activated)
    );
    runtime.execute(&mut pipeline).unwrap();
    let report = runtime.commit_tick(&mut pipeline).unwrap();
    assert_eq!(report.tick, 6);
    assert_eq!(
        runtime.arena().sessions().get(session).map(|s| s.state),
        Some(SessionState::Activated)
    );

    // Saving is refused while the session is still active.
    let err = runtime.prepare_save().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::PersistenceInconsistency);

    // The 6 -> 7 boundary deactivates it.
    let boundary = runtime.apply_boundary().unwrap();
    assert_eq!(boundary.applied.len(), 1);
    assert_eq!(
        runtime.arena().sessions().get(session).map(|s| s.state),
        Some(SessionState::Deactivated)
    );
    assert!(runtime.arena().worlds().residency(player).is_none());

    let store = MemoryStore::new();
    let mut coordinator = PersistenceCoordinator::open(store.clone()).unwrap();
    let receipt = runtime.save(&mut coordinator).unwrap();
    assert_eq!(receipt.tick, 6);
    assert_eq!(receipt.generation, 1);
    assert!(runtime.dirty_systems().is_empty());

    let restored = Runtime::restore(&coordinator, 10).unwrap().unwrap();
    assert_eq!(restored.tick(), 6);
    assert_eq!(restored.phase(), TickPhase::Boundary);
    assert_eq!(restored.arena().sessions().iter().count(), 0);
    assert!(restored.pending_requests().is_empty());
    assert!(restored
        .arena()
        .npcs()
        .iter()
        .all(|n| n.state == NpcState::Spawned));

    let before = runtime.prepare_save().unwrap();
    let after = restored.prepare_save().unwrap();
    assert_eq!(before.payload(), after.payload());
    assert_eq!(
        store.committed().map(|e| e.truth.clone()).as_ref(),
        after.payload()
    );
    let save = restored.arena().identities().save(P1).unwrap();
    assert_eq!(save.zone, Z7);
    assert_eq!(save.vitals.position, GridPos::new(2, 3));
}

#[test]
fn duplicate_connection_attempts_activate_one_session() {
    let mut runtime = seeded();
    let mut pipeline = idle();
    let sessions: Vec<_> = (0..4).map(|_| runtime.connect(P1).unwrap()).collect();
    for session in sessions.iter().rev() {
        runtime.request_activation(*session, W1).unwrap();
    }

    let report = runtime.run_tick(&mut pipeline).unwrap();
    assert_eq!(report.rejected_requests.len(), 3);
    assert_eq!(runtime.arena().sessions().active_count(P1), 1);
    assert_eq!(
        runtime.arena().sessions().active_session(P1).map(|s| s.id),
        sessions.first().copied()
    );

    // A late attempt while one is active is rejected at the boundary.
    let late = runtime.connect(P1).unwrap();
    runtime.request_activation(late, W1).unwrap();
    let report = runtime.run_tick(&mut pipeline).unwrap();
    assert_eq!(report.rejected_requests.len(), 1);
    assert_eq!(
        report.rejected_requests.first().map(|r| r.kind),
        Some(ErrorKind::PreconditionRejected)
    );
    assert_eq!(runtime.arena().sessions().active_count(P1), 1);
}

#[test]
fn every_participating_entity_has_exactly_one_residency() {
    let mut runtime = seeded();
    let session = runtime.connect(P1).unwrap();
    runtime.request_activation(session, W1).unwrap();
    let mut pipeline = TickPipeline::new(Box::new(WanderDecisionSource::new(7, 3)));

    for _ in 0..40 {
        runtime.run_tick(&mut pipeline).unwrap();
        let arena = runtime.arena();
        for npc in arena.npcs().iter().filter(|n| n.state == NpcState::Active) {
            let residency = arena.worlds().residency(EntityKey::Npc(npc.id)).unwrap();
            assert_eq!(residency.world, W1);
            assert_eq!(residency.zone, npc.home_zone);
        }
        for session in arena.sessions().activated() {
            assert!(arena.worlds().residency(EntityKey::Player(session.player)).is_some());
        }
        let table = arena.worlds().residency_table();
        let mut seen = BTreeMap::new();
        for (entity, residency) in table.iter() {
            assert!(seen.insert(entity, residency.zone).is_none());
        }
    }
}

/// Keeps every perceived NPC idle.
struct AllIdle;

impl DecisionSource for AllIdle {
    fn collect_intents(
        &mut self,
        _tick: u64,
        perceptions: &BTreeMap<NpcId, Perception>,
    ) -> Result<BTreeMap<NpcId, Intent>, DecisionError> {
        Ok(perceptions.keys().map(|id| (*id, Intent::Idle)).collect())
    }
}

#[test]
fn transitions_requested_mid_tick_apply_at_next_boundary() {
    let mut runtime = seeded();
    let mut pipeline = TickPipeline::new(Box::new(AllIdle));
    runtime.run_tick(&mut pipeline).unwrap();

    let frozen = runtime.begin_tick().unwrap().clone();
    assert!(frozen.contains(EntityKey::Npc(N1)));
    runtime
        .request(BoundaryRequest::DespawnNpc { npc: N1 })
        .unwrap();
    runtime
        .request(BoundaryRequest::AssignResidency {
            entity: EntityKey::Npc(N2),
            zone: Z7,
        })
        .unwrap();
    assert_eq!(runtime.eligible(), Some(&frozen));
    assert!(runtime.apply_now(BoundaryRequest::SuspendNpc { npc: N2 }).is_err());

    runtime.execute(&mut pipeline).unwrap();
    assert_eq!(runtime.eligible(), Some(&frozen));
    let report = runtime.commit_tick(&mut pipeline).unwrap();
    assert_eq!(report.eligible, frozen.len());
    assert!(runtime.arena().npcs().get(N1).is_some());
    assert_eq!(
        runtime.arena().worlds().residency(EntityKey::Npc(N2)).map(|r| r.zone),
        Some(Z1)
    );

    let next = runtime.begin_tick().unwrap();
    assert!(!next.contains(EntityKey::Npc(N1)));
    assert_eq!(next.residency(EntityKey::Npc(N2)).map(|r| r.zone), Some(Z7));
    assert!(next.is_settling(EntityKey::Npc(N2)));
    assert!(runtime.arena().npcs().get(N1).is_none());
}

#[test]
fn inputs_submitted_mid_tick_wait_for_the_next_tick() {
    let mut runtime = seeded();
    let mut pipeline = idle();
    let session = runtime.connect(P1).unwrap();
    runtime.request_activation(session, W1).unwrap();
    runtime.run_tick(&mut pipeline).unwrap();

    runtime.begin_tick().unwrap();
    let target = GridPos::new(9, 3);
    let consumed_in = runtime
        .submit_input(P1, Intent::MoveTo { target })
        .unwrap();
    assert_eq!(consumed_in, 3);
    runtime.execute(&mut pipeline).unwrap();
    let report = runtime.commit_tick(&mut pipeline).unwrap();
    assert_eq!(report.entity_writes, 0);

    let report = runtime.run_tick(&mut pipeline).unwrap();
    assert_eq!(report.tick, 3);
    assert_eq!(report.entity_writes, 1);
    assert_eq!(
        runtime.arena().vitals(EntityKey::Player(P1)).map(|v| v.position),
        Some(GridPos::new(3, 3))
    );
}

#[test]
fn unloading_a_world_deactivates_its_sessions() {
    let mut runtime = seeded();
    let mut pipeline = idle();
    let session = runtime.connect(P1).unwrap();
    runtime.request_activation(session, W1).unwrap();
    runtime.run_tick(&mut pipeline).unwrap();

    runtime
        .request(BoundaryRequest::UnloadWorld { world: W1 })
        .unwrap();
    let report = runtime.run_tick(&mut pipeline).unwrap();
    assert_eq!(report.eligible, 0);
    assert_eq!(
        runtime.arena().sessions().get(session).map(|s| s.state),
        Some(SessionState::Deactivated)
    );
    assert_eq!(runtime.arena().npcs().iter().count(), 0);
    assert!(runtime.arena().retained(W1).is_some());
    assert!(runtime.arena().worlds().residency_table().is_empty());
    assert!(runtime.connect(P1).is_ok());
}

#[test]
fn reconnect_cycles_do_not_accumulate_sessions() {
    let mut runtime = seeded();
    let mut pipeline = idle();
    for _ in 0..50 {
        let session = runtime.connect(P1).unwrap();
        runtime.request_activation(session, W1).unwrap();
        runtime.run_tick(&mut pipeline).unwrap();
        runtime.disconnect(session).unwrap();
        runtime.run_tick(&mut pipeline).unwrap();
        runtime
            .request(BoundaryRequest::TerminateSession { session })
            .unwrap();
        runtime.run_tick(&mut pipeline).unwrap();
    }

    // A connection that never activated is dropped on disconnect.
    let abandoned = runtime.connect(P1).unwrap();
    runtime.disconnect(abandoned).unwrap();
    let report = runtime.run_tick(&mut pipeline).unwrap();
    assert!(report.rejected_requests.is_empty());

    assert!(runtime.arena().sessions().is_empty());
    assert_eq!(runtime.arena().sessions().active_count(P1), 0);
}
