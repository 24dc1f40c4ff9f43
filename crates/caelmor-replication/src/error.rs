//! Error types for snapshot generation and observer management.

use caelmor_types::{ErrorKind, ObserverId, TickPhase, WorldId};

/// Errors raised by the replication gateway.
#[derive(Debug, thiserror::Error)]
pub enum ReplicationError {
    /// Snapshots may only observe finalized state.
    #[error("snapshot requested in phase {0:?}; only committed state may be observed")]
    NotFinalized(TickPhase),

    /// No tick has been committed yet.
    #[error("no committed tick to snapshot")]
    NoCommittedTick,

    /// A snapshot for this tick and world already exists.
    #[error("snapshot for tick {tick} of world {world} already generated")]
    Duplicate {
        /// The tick.
        tick: u64,
        /// The world scope.
        world: WorldId,
    },

    /// The world is not loaded or not tick-participating.
    #[error("world {0} is not tick-participating")]
    WorldNotParticipating(WorldId),

    /// The observer never joined or has left.
    #[error("observer {0} is not joined")]
    UnknownObserver(ObserverId),

    /// Canonical encoding failed.
    #[error("snapshot encoding failed: {0}")]
    Encoding(#[from] serde_json::Error),
}

impl ReplicationError {
    /// Map this error onto the shared taxonomy.
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFinalized(_) | Self::NoCommittedTick | Self::Duplicate { .. } => {
                ErrorKind::OrderingViolation
            }
            Self::WorldNotParticipating(_) | Self::UnknownObserver(_) => {
                ErrorKind::PreconditionRejected
            }
            Self::Encoding(_) => ErrorKind::DeterminismViolation,
        }
    }
}
