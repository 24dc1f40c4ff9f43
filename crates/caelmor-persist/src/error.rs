//! Error types for the persistence layer.
//!
//! Every save or restore failure rejects the whole operation. The
//! [`PersistRejection`] returned by [`PersistError::rejection`] names which
//! of the three rejection classes applies.

use caelmor_types::{ErrorKind, PersistRejection, PersistSystem};

use crate::coordinator::SaveState;

/// Errors raised by the persistence coordinator and storage backends.
#[derive(Debug, thiserror::Error)]
pub enum PersistError {
    /// A participant is not at a legal save boundary.
    #[error("{system:?} not ready to persist: {reason}")]
    NotReady {
        /// The participant that refused.
        system: PersistSystem,
        /// Why it is not ready.
        reason: String,
    },

    /// A participating system was not offered to the save.
    #[error("participant {0:?} missing from save")]
    MissingParticipant(PersistSystem),

    /// The same system was offered twice.
    #[error("participant {0:?} offered twice")]
    DuplicateParticipant(PersistSystem),

    /// Persisted data violates an invariant.
    #[error("{system:?} state inconsistent: {reason}")]
    Inconsistent {
        /// The system whose data failed validation.
        system: PersistSystem,
        /// What is wrong.
        reason: String,
    },

    /// A system was restored before one of its prerequisites.
    #[error("{system:?} restored before prerequisite {prerequisite:?}")]
    OutOfOrder {
        /// The system being restored.
        system: PersistSystem,
        /// The prerequisite that has not been restored.
        prerequisite: PersistSystem,
    },

    /// Restore finished without staging every system.
    #[error("restore incomplete: {0:?} never staged")]
    RestoreIncomplete(PersistSystem),

    /// The save operation was driven out of order.
    #[error("illegal save transition {from:?} -> {to:?}")]
    IllegalTransition {
        /// Current state.
        from: SaveState,
        /// Requested state.
        to: SaveState,
    },

    /// The generation counter overflowed.
    #[error("save generation overflow")]
    GenerationOverflow,

    /// The storage backend refused the write.
    #[error("storage backend error: {0}")]
    Storage(String),

    /// An I/O error from a file-backed store.
    #[error("storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A payload could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl PersistError {
    /// The rejection class of this error, if it describes rejected state.
    pub const fn rejection(&self) -> Option<PersistRejection> {
        match self {
            Self::NotReady { .. } | Self::MissingParticipant(_) | Self::RestoreIncomplete(_) => {
                Some(PersistRejection::RejectedIncomplete)
            }
            Self::DuplicateParticipant(_) | Self::Inconsistent { .. } => {
                Some(PersistRejection::RejectedInconsistent)
            }
            Self::OutOfOrder { .. } => Some(PersistRejection::RejectedOutOfOrder),
            Self::IllegalTransition { .. }
            | Self::GenerationOverflow
            | Self::Storage(_)
            | Self::Io(_)
            | Self::Serialization(_) => None,
        }
    }

    /// Map this error onto the shared taxonomy.
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::IllegalTransition { .. } => ErrorKind::OrderingViolation,
            _ => ErrorKind::PersistenceInconsistency,
        }
    }
}
