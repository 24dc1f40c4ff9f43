//! Entity lifecycle state machines for the Caelmor runtime core.
//!
//! Each registry owns one kind of entity and exposes a single driver per
//! state machine. The registries never decide *when* a transition happens:
//! the tick scheduler in `caelmor-core` applies them only at tick
//! boundaries.
//!
//! # Modules
//!
//! - [`error`] -- [`EntityError`] for every registry.
//! - [`identity`] -- Player identities and loaded saves.
//! - [`session`] -- Player session lifecycle and duplicate activation tiebreak.
//! - [`npc`] -- NPC lifecycle.
//! - [`item`] -- Item locations and ownership.
//! - [`quest`] -- Quest lifecycle and progress.

pub mod error;
pub mod identity;
pub mod item;
pub mod npc;
pub mod quest;
pub mod session;

pub use error::EntityError;
pub use identity::IdentityRegistry;
pub use item::ItemRegistry;
pub use npc::{NpcRegistry, NpcRuntime};
pub use quest::QuestRegistry;
pub use session::{ActivationResolution, PlayerSession, SessionRegistry};
