//! Persisted records and the observable entity state they carry.
//!
//! Records hold only structural truth sufficient for restore without
//! replay. Nothing here is an event log, a history, or intermediate
//! execution state. Collections are stored as vectors sorted by id so the
//! encoded form is canonical.

use serde::{Deserialize, Serialize};

use crate::enums::{EquipSlot, QuestState};
use crate::ids::{ItemId, NpcId, PlayerId, QuestId, WorldId, ZoneId};

/// Maximum health of any simulated entity.
pub const MAX_HEALTH: u32 = 100;

/// Integer position inside a zone.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct GridPos {
    /// East-west coordinate.
    pub x: i32,
    /// North-south coordinate.
    pub y: i32,
}

impl GridPos {
    /// Create a position.
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    /// Move one tile toward `target`, x axis first. Saturates at bounds.
    pub const fn step_toward(self, target: Self) -> Self {
        if self.x < target.x {
            Self::new(self.x.saturating_add(1), self.y)
        } else if self.x > target.x {
            Self::new(self.x.saturating_sub(1), self.y)
        } else if self.y < target.y {
            Self::new(self.x, self.y.saturating_add(1))
        } else if self.y > target.y {
            Self::new(self.x, self.y.saturating_sub(1))
        } else {
            self
        }
    }
}

/// Simulated per-entity state committed at the end of each tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntityVitals {
    /// Position inside the entity's resident zone.
    pub position: GridPos,
    /// Current health (0..=[`MAX_HEALTH`]).
    pub health: u32,
}

impl Default for EntityVitals {
    fn default() -> Self {
        Self {
            position: GridPos::default(),
            health: MAX_HEALTH,
        }
    }
}

/// Persisted authoritative truth for one player identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerSave {
    /// The identity this save belongs to. One-to-one.
    pub player: PlayerId,
    /// Display name chosen at creation.
    pub display_name: String,
    /// World the player last resided in.
    pub world: WorldId,
    /// Zone the player last resided in.
    pub zone: ZoneId,
    /// Vitals at the last legal save boundary.
    pub vitals: EntityVitals,
}

/// Persisted composition of one zone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ZoneRecord {
    /// Zone identity.
    pub id: ZoneId,
    /// Human-readable name.
    pub name: String,
    /// Zone context values (ambient state mediated by the world).
    pub context: Vec<(String, i64)>,
}

/// Persisted structural state of one world, including its zones.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorldRecord {
    /// World identity.
    pub id: WorldId,
    /// Human-readable name.
    pub name: String,
    /// Zone that receives entities with no prior residency.
    pub default_zone: ZoneId,
    /// Owned zones, sorted by id.
    pub zones: Vec<ZoneRecord>,
}

/// Persisted state of a designated NPC.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NpcRecord {
    /// NPC identity.
    pub id: NpcId,
    /// Owning world.
    pub world: WorldId,
    /// Zone the NPC resides in when active.
    pub home_zone: ZoneId,
    /// Immutable content definition reference.
    pub definition: String,
    /// Vitals at the last legal save boundary.
    pub vitals: EntityVitals,
}

/// The one location an item occupies. Owner follows from the location.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ItemLocation {
    /// Carried in a player's inventory.
    Inventory {
        /// Owning player.
        player: PlayerId,
    },
    /// Equipped by a player.
    Equipped {
        /// Owning player.
        player: PlayerId,
        /// Slot occupied.
        slot: EquipSlot,
    },
    /// Held by an NPC.
    NpcPossession {
        /// Owning NPC.
        npc: NpcId,
    },
    /// Placed in a world zone, owned by the world.
    WorldPlacement {
        /// Owning world.
        world: WorldId,
        /// Resident zone.
        zone: ZoneId,
        /// Position in the zone.
        position: GridPos,
    },
}

impl ItemLocation {
    /// The owning context of an item at this location.
    pub const fn owner(self) -> ItemOwner {
        match self {
            Self::Inventory { player } | Self::Equipped { player, .. } => ItemOwner::Player(player),
            Self::NpcPossession { npc } => ItemOwner::Npc(npc),
            Self::WorldPlacement { world, .. } => ItemOwner::World(world),
        }
    }
}

/// The context that owns an item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ItemOwner {
    /// A player identity.
    Player(PlayerId),
    /// An NPC.
    Npc(NpcId),
    /// A world.
    World(WorldId),
}

/// Persisted state of one item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemRecord {
    /// Item identity.
    pub id: ItemId,
    /// Immutable content definition reference.
    pub definition: String,
    /// Current location.
    pub location: ItemLocation,
}

/// Persisted state of one quest instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuestRecord {
    /// Quest identity.
    pub id: QuestId,
    /// Owning player identity.
    pub owner: PlayerId,
    /// Immutable content definition reference.
    pub definition: String,
    /// Current state.
    pub state: QuestState,
    /// Objective progress counter.
    pub progress: u32,
}

/// The union of all persisted truth across participating systems.
///
/// Each vector is sorted by id. Two equal values describe observably equal
/// persisted state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedTruth {
    /// One save per player identity.
    pub players: Vec<PlayerSave>,
    /// One record per world, with zone composition.
    pub worlds: Vec<WorldRecord>,
    /// Designated NPC records.
    pub npcs: Vec<NpcRecord>,
    /// Item records.
    pub items: Vec<ItemRecord>,
    /// Quest records.
    pub quests: Vec<QuestRecord>,
}

impl PersistedTruth {
    /// Whether no system holds any record.
    pub fn is_empty(&self) -> bool {
        self.players.is_empty()
            && self.worlds.is_empty()
            && self.npcs.is_empty()
            && self.items.is_empty()
            && self.quests.is_empty()
    }

    /// Sort every collection by id so equal states encode identically.
    pub fn canonicalize(&mut self) {
        self.players.sort_by_key(|p| p.player);
        self.worlds.sort_by_key(|w| w.id);
        for world in &mut self.worlds {
            world.zones.sort_by_key(|z| z.id);
        }
        self.npcs.sort_by_key(|n| n.id);
        self.items.sort_by_key(|i| i.id);
        self.quests.sort_by_key(|q| q.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn step_toward_moves_x_before_y() {
        let start = GridPos::new(0, 0);
        let target = GridPos::new(2, 1);
        let first = start.step_toward(target);
        assert_eq!(first, GridPos::new(1, 0));
        let second = first.step_toward(target);
        let third = second.step_toward(target);
        assert_eq!(third, GridPos::new(2, 1));
        assert_eq!(third.step_toward(target), target);
    }

    #[test]
    fn item_owner_follows_location() {
        let player = PlayerId::from_u128(1);
        let loc = ItemLocation::Equipped {
            player,
            slot: EquipSlot::MainHand,
        };
        assert_eq!(loc.owner(), ItemOwner::Player(player));
    }

    #[test]
    fn canonicalize_sorts_records() {
        let mut truth = PersistedTruth {
            quests: vec![
                QuestRecord {
                    id: QuestId::from_u128(2),
                    owner: PlayerId::from_u128(1),
                    definition: "b".to_owned(),
                    state: QuestState::Active,
                    progress: 0,
                },
                QuestRecord {
                    id: QuestId::from_u128(1),
                    owner: PlayerId::from_u128(1),
                    definition: "a".to_owned(),
                    state: QuestState::Uninitialized,
                    progress: 0,
                },
            ],
            ..PersistedTruth::default()
        };
        truth.canonicalize();
        assert_eq!(truth.quests.first().map(|q| q.id), Some(QuestId::from_u128(1)));
        assert!(!truth.is_empty());
    }
}
