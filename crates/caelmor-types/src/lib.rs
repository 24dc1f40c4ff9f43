//! Shared type definitions for the Caelmor runtime core.
//!
//! This crate is the single source of truth for identifiers, lifecycle
//! states, persisted records, and the error taxonomy used across the
//! workspace.
//!
//! # Modules
//!
//! - [`ids`] -- Typed identifiers for persisted entities and runtime handles
//! - [`enums`] -- Lifecycle states with transition tables, tick phases,
//!   the persistence dependency graph, and the error taxonomy
//! - [`records`] -- Persisted records and observable entity state
//! - [`intent`] -- Intents consumed during simulation execution

pub mod enums;
pub mod ids;
pub mod intent;
pub mod records;

pub use enums::{
    EquipSlot, ErrorKind, NpcState, PersistRejection, PersistSystem, QuestState, SessionState,
    TickPhase, WorldState,
};
pub use ids::{EntityKey, ItemId, NpcId, ObserverId, PlayerId, QuestId, SessionId, WorldId, ZoneId};
pub use intent::{Intent, PlayerInput};
pub use records::{
    EntityVitals, GridPos, ItemLocation, ItemOwner, ItemRecord, MAX_HEALTH, NpcRecord,
    PersistedTruth, PlayerSave, QuestRecord, WorldRecord, ZoneRecord,
};
