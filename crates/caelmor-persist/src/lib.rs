//! Cross-system persistence for the Caelmor runtime core.
//!
//! Saves are atomic across every participating system: either every
//! participant is at a legal boundary and the whole payload is committed,
//! or nothing is written. Restores validate each system in the fixed
//! dependency order `IdentitySave -> WorldZone -> Npc -> Item -> Quest` and
//! fail closed on the first missing or contradictory record.
//!
//! # Modules
//!
//! - [`participant`] -- The [`SaveParticipant`] contract
//! - [`coordinator`] -- Save state machine and [`PersistenceCoordinator`]
//! - [`restore`] -- Staged restore validation
//! - [`backend`] -- [`StorageBackend`] with memory and JSON file stores
//! - [`error`] -- [`PersistError`]

pub mod backend;
pub mod coordinator;
pub mod error;
pub mod participant;
pub mod restore;

pub use backend::{JsonFileStore, MemoryStore, SaveEnvelope, StorageBackend};
pub use coordinator::{PersistenceCoordinator, SaveOperation, SaveReceipt, SaveState};
pub use error::PersistError;
pub use participant::SaveParticipant;
pub use restore::{StagedRestore, ValidatedTruth, restore_in_order};
