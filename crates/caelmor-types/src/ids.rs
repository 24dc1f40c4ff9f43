//! Type-safe identifier wrappers.
//!
//! Persisted identities (players, worlds, zones, NPCs, items, quests) wrap a
//! [`Uuid`] assigned by the server. Runtime-only handles (sessions,
//! observers) are plain sequence numbers allocated by the runtime and never
//! persisted.
//!
//! All identifiers are totally ordered. That order is the stable execution
//! order used inside a tick, so it must never depend on insertion order or
//! hashing.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Generates a newtype wrapper around [`Uuid`] with standard derives.
macro_rules! define_id {
    (
        $(#[$meta:meta])*
        $name:ident
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        pub struct $name(pub Uuid);

        impl $name {
            /// Create a new server-assigned identifier using UUID v7.
            pub fn new() -> Self {
                Self(Uuid::now_v7())
            }

            /// Build an identifier from a fixed integer (restore, fixtures).
            pub const fn from_u128(value: u128) -> Self {
                Self(Uuid::from_u128(value))
            }

            /// Return the inner [`Uuid`] value.
            pub const fn into_inner(self) -> Uuid {
                self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl core::fmt::Display for $name {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<Uuid> for $name {
            fn from(id: Uuid) -> Self {
                Self(id)
            }
        }

        impl From<$name> for Uuid {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

/// Generates a runtime-only sequence handle around `u64`.
macro_rules! define_seq {
    (
        $(#[$meta:meta])*
        $name:ident
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        pub struct $name(pub u64);

        impl $name {
            /// Return the raw sequence number.
            pub const fn get(self) -> u64 {
                self.0
            }
        }

        impl core::fmt::Display for $name {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                write!(f, "{}#{}", stringify!($name), self.0)
            }
        }
    };
}

define_id! {
    /// Globally unique, immutable identity of one player.
    PlayerId
}

define_id! {
    /// Identifier of a world runtime instance.
    WorldId
}

define_id! {
    /// Identifier of a zone within exactly one world.
    ZoneId
}

define_id! {
    /// Identifier of an NPC runtime instance.
    NpcId
}

define_id! {
    /// Identifier of an item runtime instance.
    ItemId
}

define_id! {
    /// Identifier of a quest instance.
    QuestId
}

define_seq! {
    /// Runtime handle for a player session.
    ///
    /// Allocated in connection-attempt order, which makes it the tiebreak
    /// for duplicate activation attempts.
    SessionId
}

define_seq! {
    /// Runtime handle for a replication observer.
    ObserverId
}

/// Key of any entity that can hold zone residency or be simulated.
///
/// Ordering is by variant first (players, then NPCs, then items) and by
/// identifier second.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum EntityKey {
    /// A player, represented at runtime by its single active session.
    Player(PlayerId),
    /// A world-owned NPC.
    Npc(NpcId),
    /// A world-placed item.
    Item(ItemId),
}

impl EntityKey {
    /// Whether this entity kind participates in tick simulation.
    ///
    /// World-placed items hold residency but are never simulated.
    pub const fn is_simulated(self) -> bool {
        matches!(self, Self::Player(_) | Self::Npc(_))
    }
}

impl core::fmt::Display for EntityKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Player(id) => write!(f, "player:{id}"),
            Self::Npc(id) => write!(f, "npc:{id}"),
            Self::Item(id) => write!(f, "item:{id}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_ids_are_stable() {
        assert_eq!(PlayerId::from_u128(7), PlayerId::from_u128(7));
        assert_ne!(PlayerId::from_u128(7).into_inner(), Uuid::nil());
    }

    #[test]
    fn entity_keys_order_players_before_npcs() {
        let player = EntityKey::Player(PlayerId::from_u128(9));
        let npc = EntityKey::Npc(NpcId::from_u128(1));
        assert!(player < npc);
    }

    #[test]
    fn id_roundtrip_serde() {
        let original = ZoneId::from_u128(42);
        let json = serde_json::to_string(&original).ok();
        assert!(json.is_some());
        let restored: Result<ZoneId, _> = serde_json::from_str(json.as_deref().unwrap_or(""));
        assert_eq!(restored.ok(), Some(original));
    }

    #[test]
    fn session_display_includes_sequence() {
        assert_eq!(SessionId(3).to_string(), "SessionId#3");
    }
}
