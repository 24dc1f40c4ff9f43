//! Error types for the `caelmor-world` crate.
//!
//! All fallible operations in this crate return [`WorldError`]. Every
//! variant maps onto the shared [`ErrorKind`] taxonomy.

use caelmor_types::{EntityKey, ErrorKind, WorldId, WorldState, ZoneId};

/// Errors that can occur during world and zone operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WorldError {
    /// A world was not found.
    #[error("world not found: {0}")]
    WorldNotFound(WorldId),

    /// A zone was not found in the given world.
    #[error("zone {zone} not found in world {world}")]
    ZoneNotFound {
        /// The world searched.
        world: WorldId,
        /// The missing zone.
        zone: ZoneId,
    },

    /// A zone id is not registered with any loaded world.
    #[error("zone {0} is not owned by any loaded world")]
    UnknownZone(ZoneId),

    /// The world is not in a state that allows the operation.
    #[error("world {world} is {state:?}, not available")]
    WorldUnavailable {
        /// The world.
        world: WorldId,
        /// Its current state.
        state: WorldState,
    },

    /// Illegal world lifecycle transition.
    #[error("illegal world transition {from:?} -> {to:?} for {world}")]
    IllegalTransition {
        /// The world.
        world: WorldId,
        /// Current state.
        from: WorldState,
        /// Requested state.
        to: WorldState,
    },

    /// A world with this id is already loaded.
    #[error("duplicate world id: {0}")]
    DuplicateWorld(WorldId),

    /// A zone id is already owned by some world.
    #[error("duplicate zone id: {0}")]
    DuplicateZone(ZoneId),

    /// A world was defined without any zones or with a foreign default zone.
    #[error("world {0} has no valid default zone")]
    InvalidComposition(WorldId),

    /// Residency would span two worlds.
    #[error("{entity} resides in world {current}, cannot reside in {requested}")]
    CrossWorldResidency {
        /// The entity.
        entity: EntityKey,
        /// World of the existing residency.
        current: WorldId,
        /// World of the requested zone.
        requested: WorldId,
    },

    /// The entity has no residency.
    #[error("{0} has no zone residency")]
    NoResidency(EntityKey),

    /// A cross-zone effect was not mediated by the owning world.
    #[error("effect from zone {origin} to zone {target} crosses world authority")]
    UnmediatedEffect {
        /// Originating zone.
        origin: ZoneId,
        /// Target zone.
        target: ZoneId,
    },

    /// Arithmetic overflow while applying a zone context delta.
    #[error("zone context overflow for key {key} in zone {zone}")]
    ContextOverflow {
        /// The zone.
        zone: ZoneId,
        /// The context key.
        key: String,
    },
}

impl WorldError {
    /// Map this error onto the shared taxonomy.
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::WorldNotFound(_)
            | Self::ZoneNotFound { .. }
            | Self::UnknownZone(_)
            | Self::WorldUnavailable { .. }
            | Self::IllegalTransition { .. }
            | Self::DuplicateWorld(_)
            | Self::DuplicateZone(_)
            | Self::InvalidComposition(_)
            | Self::NoResidency(_)
            | Self::ContextOverflow { .. } => ErrorKind::PreconditionRejected,
            Self::CrossWorldResidency { .. } | Self::UnmediatedEffect { .. } => {
                ErrorKind::AuthorityViolation
            }
        }
    }
}
