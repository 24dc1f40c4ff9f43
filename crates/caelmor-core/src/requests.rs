//! Boundary request queue and player input queue.
//!
//! Lifecycle, residency, item, and quest changes may be requested at any
//! time but are only applied at the next tick boundary, in request order.
//! Player inputs are stamped with the tick that will consume them.

use std::collections::{BTreeMap, BTreeSet};

use caelmor_types::{
    EntityKey, Intent, ItemId, ItemLocation, NpcId, NpcRecord, PersistSystem, PlayerId,
    PlayerInput, QuestId, QuestState, SessionId, WorldId, ZoneId,
};
use serde::Serialize;

use crate::error::TickError;

/// A transition that may only be applied at a tick boundary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum BoundaryRequest {
    /// Activate a session in a world, attaching world and zone atomically.
    ActivateSession {
        /// The session.
        session: SessionId,
        /// Target world.
        world: WorldId,
    },
    /// Deactivate a session and write its state back into the save.
    DeactivateSession {
        /// The session.
        session: SessionId,
    },
    /// Terminate an inactive session.
    TerminateSession {
        /// The session.
        session: SessionId,
    },
    /// Move an entity to another zone of its world.
    AssignResidency {
        /// The entity.
        entity: EntityKey,
        /// Destination zone.
        zone: ZoneId,
    },
    /// Spawn an NPC into a loaded world.
    SpawnNpc {
        /// The NPC record.
        record: NpcRecord,
        /// Whether the NPC is designated for persistence.
        persistent: bool,
    },
    /// Activate an NPC in its home zone.
    ActivateNpc {
        /// The NPC.
        npc: NpcId,
    },
    /// Move an active NPC to `Dormant`.
    SuspendNpc {
        /// The NPC.
        npc: NpcId,
    },
    /// Despawn an NPC. Items it holds drop into its zone.
    DespawnNpc {
        /// The NPC.
        npc: NpcId,
    },
    /// Move an item to a new location.
    MoveItem {
        /// The item.
        item: ItemId,
        /// New location.
        to: ItemLocation,
    },
    /// Drive a quest to a new state.
    TransitionQuest {
        /// The quest.
        quest: QuestId,
        /// Target state.
        to: QuestState,
    },
    /// Unload a world and everything it owns.
    UnloadWorld {
        /// The world.
        world: WorldId,
    },
}

impl BoundaryRequest {
    /// The persisted system this request changes.
    pub const fn system(&self) -> PersistSystem {
        match self {
            Self::ActivateSession { .. }
            | Self::DeactivateSession { .. }
            | Self::TerminateSession { .. } => PersistSystem::IdentitySave,
            Self::AssignResidency { .. } | Self::UnloadWorld { .. } => PersistSystem::WorldZone,
            Self::SpawnNpc { .. }
            | Self::ActivateNpc { .. }
            | Self::SuspendNpc { .. }
            | Self::DespawnNpc { .. } => PersistSystem::Npc,
            Self::MoveItem { .. } => PersistSystem::Item,
            Self::TransitionQuest { .. } => PersistSystem::Quest,
        }
    }
}

/// A request waiting for the next boundary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueuedRequest {
    /// Global request sequence number.
    pub seq: u64,
    /// Last committed tick when the request was made.
    pub requested_after: u64,
    /// The request.
    pub request: BoundaryRequest,
}

/// FIFO of boundary requests ordered by sequence number.
#[derive(Debug, Clone, Default)]
pub struct RequestQueue {
    pending: Vec<QueuedRequest>,
    next_seq: u64,
}

impl RequestQueue {
    /// Create an empty queue.
    pub const fn new() -> Self {
        Self {
            pending: Vec::new(),
            next_seq: 0,
        }
    }

    /// Append a request. Returns its sequence number.
    pub fn push(&mut self, requested_after: u64, request: BoundaryRequest) -> u64 {
        let seq = self.next_seq;
        self.next_seq = self.next_seq.saturating_add(1);
        self.pending.push(QueuedRequest {
            seq,
            requested_after,
            request,
        });
        seq
    }

    /// Take every pending request in sequence order.
    pub fn drain(&mut self) -> Vec<QueuedRequest> {
        std::mem::take(&mut self.pending)
    }

    /// Pending requests in sequence order.
    pub fn pending(&self) -> &[QueuedRequest] {
        &self.pending
    }

    /// Number of pending requests.
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// Whether nothing is pending.
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Persisted systems with a pending transition.
    pub fn pending_systems(&self) -> BTreeSet<PersistSystem> {
        self.pending.iter().map(|q| q.request.system()).collect()
    }

    /// Whether a session has a pending transition.
    pub fn has_session_transition(&self, session: SessionId) -> bool {
        self.pending.iter().any(|q| match q.request {
            BoundaryRequest::ActivateSession { session: s, .. }
            | BoundaryRequest::DeactivateSession { session: s }
            | BoundaryRequest::TerminateSession { session: s } => s == session,
            _ => false,
        })
    }
}

/// Player inputs keyed by `(tick, player)`.
#[derive(Debug, Clone, Default)]
pub struct InputQueue {
    inputs: BTreeMap<(u64, PlayerId), Intent>,
}

impl InputQueue {
    /// Create an empty queue.
    pub const fn new() -> Self {
        Self {
            inputs: BTreeMap::new(),
        }
    }

    /// Queue an input. At most one input per player per tick.
    ///
    /// # Errors
    ///
    /// Returns [`TickError::DuplicateInput`] if the slot is taken.
    pub fn submit(&mut self, input: PlayerInput) -> Result<(), TickError> {
        let key = (input.tick, input.player);
        if self.inputs.contains_key(&key) {
            return Err(TickError::DuplicateInput {
                player: input.player,
                tick: input.tick,
            });
        }
        self.inputs.insert(key, input.intent);
        Ok(())
    }

    /// Remove and return inputs for `tick`, dropping any older stragglers.
    pub fn take_for(&mut self, tick: u64) -> BTreeMap<PlayerId, Intent> {
        let later = self.inputs.split_off(&(tick.saturating_add(1), PlayerId::from_u128(0)));
        let current = std::mem::replace(&mut self.inputs, later);
        current
            .into_iter()
            .filter(|((t, _), _)| *t == tick)
            .map(|((_, player), intent)| (player, intent))
            .collect()
    }

    /// Number of queued inputs.
    pub fn len(&self) -> usize {
        self.inputs.len()
    }

    /// Whether no inputs are queued.
    pub fn is_empty(&self) -> bool {
        self.inputs.is_empty()
    }
}
