//! Simulation systems and the staged writes they produce.
//!
//! Systems run during Simulation Execution. They see committed state through
//! a read-only [`ExecutionContext`] and describe their results as
//! [`TickWrites`]. Nothing is applied until the scheduler commits the tick.
//! Lifecycle, residency, and persistence are never written directly: a
//! system that wants an entity to change zone emits a boundary request.

use std::collections::BTreeMap;

use caelmor_entities::NpcRuntime;
use caelmor_types::{
    EntityKey, EntityVitals, Intent, MAX_HEALTH, NpcId, PlayerId, QuestId, QuestRecord, WorldId,
    ZoneId,
};
use caelmor_world::{ZoneEffect, ZoneRuntime};
use tracing::debug;

use crate::arena::Arena;
use crate::eligibility::EligibleSet;
use crate::error::TickError;
use crate::requests::BoundaryRequest;

/// Health recovered by one `Rest` intent.
pub const REST_RECOVERY: u32 = 5;

/// Context key counted by zone transfers.
pub const ARRIVALS_KEY: &str = "arrivals";

/// Read-only view of committed state for one tick.
#[derive(Debug, Clone, Copy)]
pub struct ExecutionContext<'a> {
    tick: u64,
    arena: &'a Arena,
    eligible: &'a EligibleSet,
    intents: &'a BTreeMap<EntityKey, Intent>,
}

impl<'a> ExecutionContext<'a> {
    pub(crate) const fn new(
        tick: u64,
        arena: &'a Arena,
        eligible: &'a EligibleSet,
        intents: &'a BTreeMap<EntityKey, Intent>,
    ) -> Self {
        Self {
            tick,
            arena,
            eligible,
            intents,
        }
    }

    /// The tick being executed.
    pub const fn tick(&self) -> u64 {
        self.tick
    }

    /// The frozen eligible set.
    pub const fn eligible(&self) -> &'a EligibleSet {
        self.eligible
    }

    /// The intent an entity consumes this tick, if any.
    pub fn intent(&self, entity: EntityKey) -> Option<Intent> {
        self.intents.get(&entity).copied()
    }

    /// Committed vitals of an eligible entity.
    pub fn vitals(&self, entity: EntityKey) -> Option<EntityVitals> {
        if !self.eligible.contains(entity) {
            return None;
        }
        self.arena.vitals(entity)
    }

    /// A committed NPC.
    pub fn npc(&self, id: NpcId) -> Option<&'a NpcRuntime> {
        self.arena.npcs().get(id)
    }

    /// A committed zone.
    pub fn zone(&self, zone: ZoneId) -> Option<&'a ZoneRuntime> {
        self.arena.worlds().zone(zone)
    }

    /// Owning world of a zone.
    pub fn zone_world(&self, zone: ZoneId) -> Option<WorldId> {
        self.arena.worlds().zone_world(zone)
    }

    /// Other zones of the world an entity resides in, in id order.
    pub fn sibling_zones(&self, entity: EntityKey) -> Vec<ZoneId> {
        let Some(residency) = self.eligible.residency(entity) else {
            return Vec::new();
        };
        self.arena
            .worlds()
            .world(residency.world)
            .map(|w| {
                w.zones()
                    .map(ZoneRuntime::id)
                    .filter(|z| *z != residency.zone)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Eligible entities sharing the entity's zone, excluding itself.
    ///
    /// Empty while the entity is settling into a new zone.
    pub fn zone_mates(&self, entity: EntityKey) -> Vec<EntityKey> {
        if self.eligible.is_settling(entity) {
            return Vec::new();
        }
        let Some(residency) = self.eligible.residency(entity) else {
            return Vec::new();
        };
        self.eligible
            .zone_members(residency.zone)
            .filter(|k| *k != entity)
            .collect()
    }

    /// Quests owned by a player.
    pub fn quests_of(&self, player: PlayerId) -> Vec<&'a QuestRecord> {
        self.arena.quests().owned_by(player)
    }

    pub(crate) fn quest_owner(&self, quest: QuestId) -> Option<PlayerId> {
        self.arena.quests().get(quest).map(|q| q.owner)
    }
}

/// A staged write to an entity's simulated state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntityWrite {
    /// New vitals.
    pub vitals: EntityVitals,
}

/// A staged quest progress increment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuestProgress {
    /// The quest.
    pub quest: QuestId,
    /// Progress to add.
    pub delta: u32,
}

/// Staged results of one tick's execution.
///
/// When two systems write the same entity, the later system in pipeline
/// order wins.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickWrites {
    pub(crate) entities: BTreeMap<EntityKey, EntityWrite>,
    pub(crate) quest_progress: BTreeMap<QuestId, u32>,
    pub(crate) zone_effects: Vec<ZoneEffect>,
    pub(crate) requests: Vec<BoundaryRequest>,
}

impl TickWrites {
    /// Stage new vitals for an entity.
    pub fn set_vitals(&mut self, entity: EntityKey, vitals: EntityVitals) {
        self.entities.insert(entity, EntityWrite { vitals });
    }

    /// Stage quest progress.
    pub fn add_quest_progress(&mut self, progress: QuestProgress) {
        let slot = self.quest_progress.entry(progress.quest).or_insert(0);
        *slot = slot.saturating_add(progress.delta);
    }

    /// Stage a cross-zone effect for world mediation at commit.
    pub fn emit_zone_effect(&mut self, effect: ZoneEffect) {
        self.zone_effects.push(effect);
    }

    /// Ask for a transition at the boundary after this tick.
    pub fn request_boundary(&mut self, request: BoundaryRequest) {
        self.requests.push(request);
    }

    /// Staged vitals.
    pub fn entity_writes(&self) -> impl Iterator<Item = (EntityKey, EntityWrite)> + '_ {
        self.entities.iter().map(|(k, w)| (*k, *w))
    }

    /// Staged boundary requests.
    pub fn requests(&self) -> &[BoundaryRequest] {
        &self.requests
    }

    /// Whether nothing was staged.
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
            && self.quest_progress.is_empty()
            && self.zone_effects.is_empty()
            && self.requests.is_empty()
    }

    pub(crate) fn merge(&mut self, other: Self) {
        self.entities.extend(other.entities);
        for (quest, delta) in other.quest_progress {
            self.add_quest_progress(QuestProgress { quest, delta });
        }
        self.zone_effects.extend(other.zone_effects);
        self.requests.extend(other.requests);
    }

    /// Reject anything a system staged outside its authority.
    pub(crate) fn check_authority(
        &self,
        system: &'static str,
        ctx: &ExecutionContext<'_>,
    ) -> Result<(), TickError> {
        let eligible = ctx.eligible();
        if let Some(entity) = self.entities.keys().find(|k| !eligible.contains(**k)) {
            return Err(TickError::NotEligible {
                system,
                entity: *entity,
            });
        }
        for quest in self.quest_progress.keys() {
            let owner = ctx.quest_owner(*quest).map(EntityKey::Player);
            match owner {
                Some(entity) if eligible.contains(entity) => {}
                Some(entity) => return Err(TickError::NotEligible { system, entity }),
                None => {
                    return Err(caelmor_entities::EntityError::QuestNotFound(*quest).into());
                }
            }
        }
        for effect in &self.zone_effects {
            let resident = eligible
                .residency(effect.source)
                .is_some_and(|r| r.zone == effect.origin);
            if !resident || eligible.is_settling(effect.source) {
                return Err(TickError::ForeignZoneEffect {
                    system,
                    entity: effect.source,
                    zone: effect.origin,
                });
            }
        }
        for request in &self.requests {
            if let BoundaryRequest::AssignResidency { entity, .. } = request {
                if !eligible.contains(*entity) {
                    return Err(TickError::NotEligible {
                        system,
                        entity: *entity,
                    });
                }
            }
        }
        Ok(())
    }
}

/// A gameplay system run during Simulation Execution.
///
/// Implementations must be pure functions of the context: the scheduler may
/// run them twice per tick to verify determinism.
pub trait SimulationSystem: Send {
    /// Stable name used in error reports.
    fn name(&self) -> &'static str;

    /// Stage this system's results for the tick.
    ///
    /// # Errors
    ///
    /// Returning an error aborts the whole tick.
    fn execute(&self, ctx: &ExecutionContext<'_>, writes: &mut TickWrites) -> Result<(), TickError>;
}

/// Applies the intent each eligible entity consumes this tick.
#[derive(Debug, Clone, Copy, Default)]
pub struct IntentSystem;

impl SimulationSystem for IntentSystem {
    fn name(&self) -> &'static str {
        "intents"
    }

    fn execute(&self, ctx: &ExecutionContext<'_>, writes: &mut TickWrites) -> Result<(), TickError> {
        for (entity, residency) in ctx.eligible().iter() {
            let (Some(intent), Some(vitals)) = (ctx.intent(entity), ctx.vitals(entity)) else {
                continue;
            };
            match intent {
                Intent::Idle => {}
                Intent::MoveTo { target } => {
                    let position = vitals.position.step_toward(target);
                    if position != vitals.position {
                        writes.set_vitals(entity, EntityVitals { position, ..vitals });
                    }
                }
                Intent::Rest => {
                    let health = vitals.health.saturating_add(REST_RECOVERY).min(MAX_HEALTH);
                    if health != vitals.health {
                        writes.set_vitals(entity, EntityVitals { health, ..vitals });
                    }
                }
                Intent::TransferZone { zone } => {
                    if zone == residency.zone || ctx.zone_world(zone) != Some(residency.world) {
                        debug!(%entity, %zone, "Transfer intent ignored");
                        continue;
                    }
                    writes.request_boundary(BoundaryRequest::AssignResidency { entity, zone });
                    if !ctx.eligible().is_settling(entity) {
                        writes.emit_zone_effect(ZoneEffect {
                            origin: residency.zone,
                            target: zone,
                            source: entity,
                            key: ARRIVALS_KEY.to_owned(),
                            delta: 1,
                        });
                    }
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::collections::BTreeSet;

    use caelmor_types::{GridPos, NpcRecord, WorldRecord, ZoneRecord};

    use super::*;
    use crate::runtime::Runtime;

    const NPC: NpcId = NpcId::from_u128(1);

    fn runtime(health: u32) -> Runtime {
        let mut runtime = Runtime::new(10).unwrap();
        runtime
            .load_world(&WorldRecord {
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
            })
            .unwrap();
        runtime.activate_world(WorldId::from_u128(1)).unwrap();
        runtime
            .apply_now(BoundaryRequest::SpawnNpc {
                record: NpcRecord {
                    id: NPC,
                    world: WorldId::from_u128(1),
                    home_zone: ZoneId::from_u128(1),
                    definition: "guard".to_owned(),
                    vitals: EntityVitals {
                        position: GridPos::new(0, 0),
                        health,
                    },
                },
                persistent: false,
            })
            .unwrap();
        runtime
            .apply_now(BoundaryRequest::ActivateNpc { npc: NPC })
            .unwrap();
        runtime
    }

    fn run(runtime: &Runtime, intent: Intent, settling: bool) -> Result<TickWrites, TickError> {
        let key = EntityKey::Npc(NPC);
        let settling = if settling {
            BTreeSet::from([key])
        } else {
            BTreeSet::new()
        };
        let eligible = EligibleSet::freeze(1, runtime.arena(), settling).unwrap();
        let intents = BTreeMap::from([(key, intent)]);
        let ctx = ExecutionContext::new(1, runtime.arena(), &eligible, &intents);
        let mut writes = TickWrites::default();
        IntentSystem.execute(&ctx, &mut writes)?;
        writes.check_authority("intents", &ctx)?;
        Ok(writes)
    }

    #[test]
    fn rest_recovers_up_to_max_health() {
        let hurt = runtime(MAX_HEALTH.saturating_sub(2));
        let writes = run(&hurt, Intent::Rest, false).unwrap();
        let (_, write) = writes.entity_writes().next().unwrap();
        assert_eq!(write.vitals.health, MAX_HEALTH);

        let full = runtime(MAX_HEALTH);
        assert!(run(&full, Intent::Rest, false).unwrap().is_empty());
    }

    #[test]
    fn transfer_requests_residency_and_counts_arrival() {
        let runtime = runtime(MAX_HEALTH);
        let writes = run(
            &runtime,
            Intent::TransferZone {
                zone: ZoneId::from_u128(2),
            },
            false,
        )
        .unwrap();
        assert_eq!(
            writes.requests(),
            &[BoundaryRequest::AssignResidency {
                entity: EntityKey::Npc(NPC),
                zone: ZoneId::from_u128(2),
            }]
        );
        assert_eq!(writes.zone_effects.len(), 1);
    }

    #[test]
    fn transfer_to_current_zone_is_ignored() {
        let runtime = runtime(MAX_HEALTH);
        let writes = run(
            &runtime,
            Intent::TransferZone {
                zone: ZoneId::from_u128(1),
            },
            false,
        )
        .unwrap();
        assert!(writes.is_empty());
    }

    #[test]
    fn effect_from_settling_entity_is_rejected() {
        let runtime = runtime(MAX_HEALTH);
        let key = EntityKey::Npc(NPC);
        let eligible =
            EligibleSet::freeze(1, runtime.arena(), BTreeSet::from([key])).unwrap();
        let intents = BTreeMap::new();
        let ctx = ExecutionContext::new(1, runtime.arena(), &eligible, &intents);
        let mut writes = TickWrites::default();
        writes.emit_zone_effect(ZoneEffect {
            origin: ZoneId::from_u128(1),
            target: ZoneId::from_u128(2),
            source: key,
            key: ARRIVALS_KEY.to_owned(),
            delta: 1,
        });
        let err = writes.check_authority("test", &ctx).unwrap_err();
        assert!(matches!(err, TickError::ForeignZoneEffect { system: "test", .. }));
    }

    #[test]
    fn later_system_wins_entity_write() {
        let key = EntityKey::Npc(NPC);
        let mut first = TickWrites::default();
        first.set_vitals(key, EntityVitals::default());
        let mut second = TickWrites::default();
        let vitals = EntityVitals {
            position: GridPos::new(4, 4),
            health: 1,
        };
        second.set_vitals(key, vitals);
        first.merge(second);
        assert_eq!(first.entity_writes().next().map(|(_, w)| w.vitals), Some(vitals));
    }
}
