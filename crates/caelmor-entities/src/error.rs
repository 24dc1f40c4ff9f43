//! Error types for the `caelmor-entities` crate.

use caelmor_types::{
    EquipSlot, ErrorKind, ItemId, NpcId, NpcState, PlayerId, QuestId, QuestState, SessionId,
    SessionState,
};

/// Errors raised by entity lifecycle operations.
///
/// Every rejection leaves the registry it came from untouched.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EntityError {
    /// The player identity is unknown.
    #[error("unknown player identity: {0}")]
    UnknownIdentity(PlayerId),

    /// An identity with this id already exists.
    #[error("duplicate player identity: {0}")]
    DuplicateIdentity(PlayerId),

    /// No save is loaded for the identity.
    #[error("no save loaded for player {0}")]
    MissingSave(PlayerId),

    /// The session does not exist.
    #[error("session not found: {0}")]
    SessionNotFound(SessionId),

    /// Illegal session transition.
    #[error("illegal session transition {from:?} -> {to:?} for {session}")]
    IllegalSessionTransition {
        /// The session.
        session: SessionId,
        /// Current state.
        from: SessionState,
        /// Requested state.
        to: SessionState,
    },

    /// Another session for the same identity is already active or won the
    /// activation tiebreak.
    #[error("player {player} already has active session {active}")]
    DuplicateActiveSession {
        /// The identity.
        player: PlayerId,
        /// The session that holds (or won) activation.
        active: SessionId,
    },

    /// Session sequence numbers are exhausted.
    #[error("session sequence exhausted")]
    SequenceExhausted,

    /// The NPC does not exist.
    #[error("npc not found: {0}")]
    NpcNotFound(NpcId),

    /// An NPC with this id already exists.
    #[error("duplicate npc id: {0}")]
    DuplicateNpc(NpcId),

    /// Illegal NPC transition.
    #[error("illegal npc transition {from:?} -> {to:?} for {npc}")]
    IllegalNpcTransition {
        /// The NPC.
        npc: NpcId,
        /// Current state.
        from: NpcState,
        /// Requested state.
        to: NpcState,
    },

    /// The item does not exist.
    #[error("item not found: {0}")]
    ItemNotFound(ItemId),

    /// An item with this id already exists.
    #[error("duplicate item id: {0}")]
    DuplicateItem(ItemId),

    /// The equipment slot is already taken.
    #[error("player {player} already has {item} in {slot:?}")]
    SlotOccupied {
        /// The player.
        player: PlayerId,
        /// The slot.
        slot: EquipSlot,
        /// The item occupying it.
        item: ItemId,
    },

    /// The quest does not exist.
    #[error("quest not found: {0}")]
    QuestNotFound(QuestId),

    /// A quest with this id already exists.
    #[error("duplicate quest id: {0}")]
    DuplicateQuest(QuestId),

    /// Illegal quest transition.
    #[error("illegal quest transition {from:?} -> {to:?} for {quest}")]
    IllegalQuestTransition {
        /// The quest.
        quest: QuestId,
        /// Current state.
        from: QuestState,
        /// Requested state.
        to: QuestState,
    },

    /// Progress can only change on an active quest.
    #[error("quest {quest} is {state:?}, not active")]
    QuestNotActive {
        /// The quest.
        quest: QuestId,
        /// Its current state.
        state: QuestState,
    },

    /// Progress counter overflow.
    #[error("quest {0} progress overflow")]
    ProgressOverflow(QuestId),
}

impl EntityError {
    /// Map this error onto the shared taxonomy.
    pub const fn kind(&self) -> ErrorKind {
        ErrorKind::PreconditionRejected
    }
}
