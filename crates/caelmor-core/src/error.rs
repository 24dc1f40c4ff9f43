//! Error types for the tick scheduler and runtime arena.
//!
//! Errors from the lower layers are wrapped unchanged so their taxonomy
//! survives. Every variant maps onto [`ErrorKind`] through
//! [`TickError::kind`].

use caelmor_entities::EntityError;
use caelmor_persist::PersistError;
use caelmor_types::{EntityKey, ErrorKind, PlayerId, TickPhase, ZoneId};
use caelmor_world::WorldError;

use crate::clock::ClockError;
use crate::decision::DecisionError;

/// Errors raised by runtime operations and tick execution.
#[derive(Debug, thiserror::Error)]
pub enum TickError {
    /// A world or zone operation was rejected.
    #[error(transparent)]
    World(#[from] WorldError),

    /// An entity lifecycle operation was rejected.
    #[error(transparent)]
    Entity(#[from] EntityError),

    /// A save or restore was rejected.
    #[error(transparent)]
    Persist(#[from] PersistError),

    /// The tick clock refused a phase change.
    #[error(transparent)]
    Clock(#[from] ClockError),

    /// The decision source failed as a whole.
    #[error(transparent)]
    Decision(#[from] DecisionError),

    /// A boundary-only operation was attempted while a tick is open.
    #[error("{operation} is only legal at a tick boundary (phase {phase:?})")]
    OutsideBoundary {
        /// The rejected operation.
        operation: &'static str,
        /// The phase at the time of the attempt.
        phase: TickPhase,
    },

    /// An entity passed the lifecycle gate without the state it requires.
    #[error("eligibility gate failed for {entity}: {reason}")]
    GateInvariant {
        /// The entity.
        entity: EntityKey,
        /// What was missing.
        reason: String,
    },

    /// A simulation system wrote to an entity outside the eligible set.
    #[error("system {system} wrote to {entity}, which is not eligible this tick")]
    NotEligible {
        /// The offending system.
        system: &'static str,
        /// The target entity.
        entity: EntityKey,
    },

    /// A zone effect did not originate in its source's resident zone.
    #[error("system {system} emitted an effect from zone {zone} not resided in by {entity}")]
    ForeignZoneEffect {
        /// The offending system.
        system: &'static str,
        /// The claimed source entity.
        entity: EntityKey,
        /// The claimed origin zone.
        zone: ZoneId,
    },

    /// Two executions over the same frozen inputs disagreed.
    #[error("tick {tick} produced different results on re-execution")]
    Nondeterministic {
        /// The tick.
        tick: u64,
    },

    /// The commit was failed on purpose by a fault hook.
    #[error("injected commit fault in tick {tick} after {applied} writes")]
    CommitFault {
        /// The tick.
        tick: u64,
        /// Writes applied to the staged copy before the fault.
        applied: usize,
    },

    /// The player has no activated session.
    #[error("player {0} has no activated session")]
    NoActiveSession(PlayerId),

    /// The player already submitted an input for that tick.
    #[error("player {player} already submitted input for tick {tick}")]
    DuplicateInput {
        /// The player.
        player: PlayerId,
        /// The tick the input targets.
        tick: u64,
    },

    /// The committed results could not be encoded for digesting.
    #[error("failed to encode tick results: {0}")]
    Encoding(#[from] serde_json::Error),
}

impl TickError {
    /// Map this error onto the shared taxonomy.
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::World(err) => err.kind(),
            Self::Entity(err) => err.kind(),
            Self::Persist(err) => err.kind(),
            Self::Clock(_) | Self::OutsideBoundary { .. } | Self::CommitFault { .. } => {
                ErrorKind::OrderingViolation
            }
            Self::Decision(_)
            | Self::GateInvariant { .. }
            | Self::NoActiveSession(_)
            | Self::DuplicateInput { .. } => ErrorKind::PreconditionRejected,
            Self::NotEligible { .. } | Self::ForeignZoneEffect { .. } => {
                ErrorKind::AuthorityViolation
            }
            Self::Nondeterministic { .. } | Self::Encoding(_) => ErrorKind::DeterminismViolation,
        }
    }
}
