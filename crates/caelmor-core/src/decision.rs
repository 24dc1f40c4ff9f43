//! The decision boundary between the runtime core and NPC behavior.
//!
//! Once per tick, after the eligible set is frozen, the scheduler presents
//! every eligible NPC with a read-only [`Perception`] and asks the
//! [`DecisionSource`] for at most one [`Intent`] per NPC. Intents are only
//! descriptions: the [`IntentSystem`](crate::system::IntentSystem) consumes
//! them during execution. Unconsumed intents are never stored, so a restore
//! always starts with none.

use std::collections::BTreeMap;

use caelmor_types::{EntityKey, EntityVitals, GridPos, Intent, MAX_HEALTH, NpcId, ZoneId};

use crate::system::ExecutionContext;

/// Errors that can occur during the decision phase.
#[derive(Debug, thiserror::Error)]
pub enum DecisionError {
    /// An internal error in the decision source.
    #[error("decision source error: {message}")]
    Internal {
        /// Description of the error.
        message: String,
    },
}

/// What one NPC may know about the current tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Perception {
    /// The tick being decided.
    pub tick: u64,
    /// The perceiving NPC.
    pub npc: NpcId,
    /// Content definition reference.
    pub definition: String,
    /// Committed vitals.
    pub vitals: EntityVitals,
    /// Zone surroundings. `None` while the NPC is settling into a new zone.
    pub zone: Option<ZoneView>,
}

/// Read-only view of the NPC's resident zone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ZoneView {
    /// The resident zone.
    pub zone: ZoneId,
    /// Zone context values in key order.
    pub context: Vec<(String, i64)>,
    /// Eligible zone-mates and their positions, in key order.
    pub neighbours: Vec<(EntityKey, GridPos)>,
    /// Other zones of the same world, in id order.
    pub sibling_zones: Vec<ZoneId>,
}

/// A source of NPC intents.
///
/// Implementations must be deterministic functions of `tick` and the
/// perceptions: no wall clock, no unseeded randomness.
pub trait DecisionSource: Send {
    /// Collect intents for the given tick.
    ///
    /// NPCs missing from the returned map stay idle. Returning an intent for
    /// an NPC that was not perceived aborts the tick.
    ///
    /// # Errors
    ///
    /// Returns [`DecisionError`] if the decision process fails entirely.
    fn collect_intents(
        &mut self,
        tick: u64,
        perceptions: &BTreeMap<NpcId, Perception>,
    ) -> Result<BTreeMap<NpcId, Intent>, DecisionError>;
}

/// A decision source that never acts.
#[derive(Debug, Clone, Copy, Default)]
pub struct IdleDecisionSource;

impl IdleDecisionSource {
    /// Create a new idle decision source.
    pub const fn new() -> Self {
        Self
    }
}

impl DecisionSource for IdleDecisionSource {
    fn collect_intents(
        &mut self,
        _tick: u64,
        _perceptions: &BTreeMap<NpcId, Perception>,
    ) -> Result<BTreeMap<NpcId, Intent>, DecisionError> {
        Ok(BTreeMap::new())
    }
}

/// Seeded wandering: short random walks, rest when hurt, and the occasional
/// move to a neighbouring zone.
#[derive(Debug, Clone, Copy)]
pub struct WanderDecisionSource {
    seed: u64,
    radius: u32,
}

impl WanderDecisionSource {
    /// Create a wandering source. `radius` bounds each walk target around
    /// the NPC's current position.
    pub const fn new(seed: u64, radius: u32) -> Self {
        Self { seed, radius }
    }

    fn decide(&self, tick: u64, perception: &Perception) -> Intent {
        let (hi, lo) = perception.npc.into_inner().as_u64_pair();
        let roll = deterministic_random(self.seed ^ hi ^ lo.rotate_left(32), tick);

        if perception.vitals.health < MAX_HEALTH / 2 {
            return Intent::Rest;
        }
        match roll & 0x7 {
            0..=3 => {
                let here = perception.vitals.position;
                let target = GridPos::new(
                    here.x.saturating_add(offset(roll >> 8, self.radius)),
                    here.y.saturating_add(offset(roll >> 24, self.radius)),
                );
                Intent::MoveTo { target }
            }
            4 => perception
                .zone
                .as_ref()
                .and_then(|view| pick(&view.sibling_zones, roll >> 40))
                .map_or(Intent::Idle, |zone| Intent::TransferZone { zone }),
            _ => Intent::Idle,
        }
    }
}

impl DecisionSource for WanderDecisionSource {
    fn collect_intents(
        &mut self,
        tick: u64,
        perceptions: &BTreeMap<NpcId, Perception>,
    ) -> Result<BTreeMap<NpcId, Intent>, DecisionError> {
        Ok(perceptions
            .iter()
            .map(|(id, perception)| (*id, self.decide(tick, perception)))
            .collect())
    }
}

/// Build perceptions for every eligible NPC, in id order.
pub fn perceive(ctx: &ExecutionContext<'_>) -> BTreeMap<NpcId, Perception> {
    let mut perceptions = BTreeMap::new();
    for (entity, residency) in ctx.eligible().iter() {
        let EntityKey::Npc(id) = entity else {
            continue;
        };
        let (Some(npc), Some(vitals)) = (ctx.npc(id), ctx.vitals(entity)) else {
            continue;
        };
        let zone = if ctx.eligible().is_settling(entity) {
            None
        } else {
            Some(ZoneView {
                zone: residency.zone,
                context: ctx
                    .zone(residency.zone)
                    .map(|z| z.context().iter().map(|(k, v)| (k.clone(), *v)).collect())
                    .unwrap_or_default(),
                neighbours: ctx
                    .zone_mates(entity)
                    .into_iter()
                    .filter_map(|mate| ctx.vitals(mate).map(|v| (mate, v.position)))
                    .collect(),
                sibling_zones: ctx.sibling_zones(entity),
            })
        };
        perceptions.insert(
            id,
            Perception {
                tick: ctx.tick(),
                npc: id,
                definition: npc.definition.clone(),
                vitals,
                zone,
            },
        );
    }
    perceptions
}

/// Deterministic xorshift64 step over `(seed, tick)`.
const fn deterministic_random(seed: u64, tick: u64) -> u64 {
    let mut state = seed.wrapping_add(tick.wrapping_mul(0x517c_c1b7_2722_0a95));

    // xorshift requires non-zero input.
    if state == 0 {
        state = 0xdead_beef_cafe_babe;
    }

    state ^= state << 13;
    state ^= state >> 7;
    state ^= state << 17;

    state
}

/// Map random bits onto `-radius..=radius`.
fn offset(bits: u64, radius: u32) -> i32 {
    let span = u64::from(radius).saturating_mul(2).saturating_add(1);
    let step = bits.checked_rem(span).unwrap_or(0);
    let step = i64::try_from(step).unwrap_or(0);
    i32::try_from(step.saturating_sub(i64::from(radius))).unwrap_or(0)
}

fn pick(zones: &[ZoneId], bits: u64) -> Option<ZoneId> {
    let len = u64::try_from(zones.len()).ok()?;
    let index = usize::try_from(bits.checked_rem(len)?).ok()?;
    zones.get(index).copied()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn perception(npc: u128, health: u32, siblings: Vec<ZoneId>) -> Perception {
        Perception {
            tick: 1,
            npc: NpcId::from_u128(npc),
            definition: "wolf".to_owned(),
            vitals: EntityVitals {
                position: GridPos::new(5, 5),
                health,
            },
            zone: Some(ZoneView {
                zone: ZoneId::from_u128(1),
                context: Vec::new(),
                neighbours: Vec::new(),
                sibling_zones: siblings,
            }),
        }
    }

    #[test]
    fn deterministic_random_is_reproducible() {
        assert_eq!(deterministic_random(42, 100), deterministic_random(42, 100));
        assert_ne!(deterministic_random(42, 100), deterministic_random(42, 101));
        assert_ne!(deterministic_random(0, 0), 0);
    }

    #[test]
    fn offset_stays_within_radius() {
        for bits in 0..200_u64 {
            let step = offset(bits.wrapping_mul(0x9e37_79b9), 3);
            assert!((-3..=3).contains(&step));
        }
        assert_eq!(offset(12345, 0), 0);
    }

    #[test]
    fn idle_source_returns_nothing() {
        let mut source = IdleDecisionSource::new();
        let mut perceptions = BTreeMap::new();
        perceptions.insert(NpcId::from_u128(1), perception(1, MAX_HEALTH, Vec::new()));
        assert!(source.collect_intents(1, &perceptions).unwrap().is_empty());
    }

    #[test]
    fn wander_is_deterministic_per_seed_tick_and_npc() {
        let mut perceptions = BTreeMap::new();
        for n in 1..=8 {
            perceptions.insert(
                NpcId::from_u128(n),
                perception(n, MAX_HEALTH, vec![ZoneId::from_u128(2)]),
            );
        }
        let mut a = WanderDecisionSource::new(7, 2);
        let mut b = WanderDecisionSource::new(7, 2);
        for tick in 0..20 {
            assert_eq!(
                a.collect_intents(tick, &perceptions).unwrap(),
                b.collect_intents(tick, &perceptions).unwrap()
            );
        }
    }

    #[test]
    fn wander_rests_when_hurt_and_stays_in_world() {
        let mut source = WanderDecisionSource::new(1, 2);
        let mut perceptions = BTreeMap::new();
        perceptions.insert(NpcId::from_u128(1), perception(1, 10, Vec::new()));
        perceptions.insert(NpcId::from_u128(2), perception(2, MAX_HEALTH, Vec::new()));
        for tick in 0..50 {
            let intents = source.collect_intents(tick, &perceptions).unwrap();
            assert_eq!(intents.get(&NpcId::from_u128(1)), Some(&Intent::Rest));
            assert!(!matches!(
                intents.get(&NpcId::from_u128(2)),
                Some(Intent::TransferZone { .. })
            ));
        }
    }
}
