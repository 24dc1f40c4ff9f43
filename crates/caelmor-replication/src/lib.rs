//! Snapshot and replication gateway for the Caelmor runtime core.
//!
//! Replication is a read-only projection of committed state. Snapshots are
//! produced from a shared reference to the runtime at a tick boundary,
//! frozen behind an [`Arc`](std::sync::Arc), and handed to transport over
//! a broadcast channel. Nothing in this crate can write to the runtime.
//!
//! # Modules
//!
//! - [`snapshot`] -- [`WorldSnapshot`]: the immutable per-world record.
//! - [`gateway`] -- [`ReplicationGateway`]: generation, join, leave.
//! - [`error`] -- [`ReplicationError`].

pub mod error;
pub mod gateway;
pub mod snapshot;

pub use error::ReplicationError;
pub use gateway::ReplicationGateway;
pub use snapshot::{EntityView, Presence, WorldSnapshot, ZoneView};
