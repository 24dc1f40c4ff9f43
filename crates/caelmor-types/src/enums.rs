//! Enumeration types for the Caelmor runtime core.
//!
//! Lifecycle enums carry their legal transition tables so that every state
//! machine in the workspace is checked against a single table rather than
//! scattered conditionals.

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Lifecycle states
// ---------------------------------------------------------------------------

/// Lifecycle state of a player session.
///
/// `Terminated` is absorbing. `Deactivated` sessions may be activated again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum SessionState {
    /// Created but not yet participating.
    Created,
    /// Bound to a world and zone, participating in ticks.
    Activated,
    /// Inactive; identity and save untouched.
    Deactivated,
    /// Final. Never reactivated.
    Terminated,
}

impl SessionState {
    /// Whether `self -> next` is a legal transition.
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Created | Self::Deactivated, Self::Activated)
                | (Self::Activated, Self::Deactivated)
                | (Self::Created | Self::Deactivated, Self::Terminated)
        )
    }

    /// Whether this state is absorbing.
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Terminated)
    }
}

/// Lifecycle state of an NPC runtime instance.
///
/// `Despawned` is absorbing. `Active` and `Dormant` may alternate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum NpcState {
    /// Exists in a world but has not yet entered simulation.
    Spawned,
    /// Simulated each tick while resident in a zone.
    Active,
    /// Exists but excluded from simulation.
    Dormant,
    /// Removed. Never returns.
    Despawned,
}

impl NpcState {
    /// Whether `self -> next` is a legal transition.
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Spawned | Self::Dormant, Self::Active)
                | (Self::Active, Self::Dormant)
                | (Self::Spawned | Self::Active | Self::Dormant, Self::Despawned)
        )
    }

    /// Whether this state is absorbing.
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Despawned)
    }
}

/// Lifecycle state of a world runtime instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum WorldState {
    /// Created or restored; zones exist but nothing ticks.
    Loaded,
    /// Tick-participating. Zones inherit participation.
    Active,
    /// Destroyed along with its zones and NPCs.
    Unloaded,
}

impl WorldState {
    /// Whether `self -> next` is a legal transition.
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Loaded, Self::Active) | (Self::Loaded | Self::Active, Self::Unloaded)
        )
    }
}

/// State of a quest instance. Terminal states are absorbing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum QuestState {
    /// Known to the player but not started.
    Uninitialized,
    /// In progress.
    Active,
    /// Finished successfully.
    Completed,
    /// Finished unsuccessfully.
    Failed,
    /// Given up by the player.
    Abandoned,
}

impl QuestState {
    /// Whether `self -> next` is a legal transition.
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Uninitialized, Self::Active)
                | (Self::Active, Self::Completed | Self::Failed | Self::Abandoned)
        )
    }

    /// Whether this state is absorbing.
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Abandoned)
    }
}

/// Equipment slot for an equipped item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum EquipSlot {
    /// Primary hand.
    MainHand,
    /// Secondary hand.
    OffHand,
    /// Body armor.
    Body,
    /// Head armor.
    Head,
}

// ---------------------------------------------------------------------------
// Tick phases
// ---------------------------------------------------------------------------

/// Phase of the tick scheduler.
///
/// The only legal cycle is
/// `Boundary -> GateEvaluation -> Executing -> Finalizing -> Boundary`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum TickPhase {
    /// Between ticks. Boundary transitions and saves are legal here.
    Boundary,
    /// Pre-tick gate evaluation; the eligible set is being frozen.
    GateEvaluation,
    /// Simulation execution over the frozen eligible set.
    Executing,
    /// Post-tick finalization (commit).
    Finalizing,
}

impl TickPhase {
    /// The phase that must follow `self`.
    pub const fn next(self) -> Self {
        match self {
            Self::Boundary => Self::GateEvaluation,
            Self::GateEvaluation => Self::Executing,
            Self::Executing => Self::Finalizing,
            Self::Finalizing => Self::Boundary,
        }
    }

    /// Whether a tick is currently open.
    pub const fn is_mid_tick(self) -> bool {
        !matches!(self, Self::Boundary)
    }
}

// ---------------------------------------------------------------------------
// Persistence graph
// ---------------------------------------------------------------------------

/// A participant system in cross-system persistence.
///
/// Declaration order is the restore order. The dependency graph is fixed:
/// each system depends only on systems declared before it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum PersistSystem {
    /// Player identities and their saves.
    IdentitySave,
    /// Worlds and their zone composition.
    WorldZone,
    /// Designated NPC state.
    Npc,
    /// Item state.
    Item,
    /// Quest state.
    Quest,
}

impl PersistSystem {
    /// Fixed restore (and capture) order.
    pub const ORDER: [Self; 5] = [
        Self::IdentitySave,
        Self::WorldZone,
        Self::Npc,
        Self::Item,
        Self::Quest,
    ];

    /// Direct prerequisites of this system.
    pub const fn prerequisites(self) -> &'static [Self] {
        match self {
            Self::IdentitySave => &[],
            Self::WorldZone => &[Self::IdentitySave],
            Self::Npc => &[Self::WorldZone],
            Self::Item => &[Self::IdentitySave, Self::WorldZone, Self::Npc],
            Self::Quest => &[Self::IdentitySave],
        }
    }

    /// Position of this system in [`Self::ORDER`].
    pub const fn rank(self) -> usize {
        self as usize
    }
}

/// Compile-time check that every prerequisite precedes its dependent in
/// [`PersistSystem::ORDER`], which also rules out cycles.
#[allow(clippy::indexing_slicing, clippy::arithmetic_side_effects)]
const fn persist_graph_is_topological() -> bool {
    let mut i = 0;
    while i < PersistSystem::ORDER.len() {
        let system = PersistSystem::ORDER[i];
        if system.rank() != i {
            return false;
        }
        let prereqs = system.prerequisites();
        let mut j = 0;
        while j < prereqs.len() {
            if prereqs[j].rank() >= i {
                return false;
            }
            j += 1;
        }
        i += 1;
    }
    true
}

const _: () = assert!(persist_graph_is_topological());

// ---------------------------------------------------------------------------
// Error taxonomy
// ---------------------------------------------------------------------------

/// Shared error taxonomy. Every crate-level error maps onto one of these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    /// A required gate was unmet; the operation was a no-op.
    PreconditionRejected,
    /// A tick-bound operation was attempted outside its legal boundary.
    OrderingViolation,
    /// Simulation was non-reproducible or used a forbidden input.
    DeterminismViolation,
    /// Save or restore found incomplete or contradictory state.
    PersistenceInconsistency,
    /// A lower layer tried to mutate state owned by a higher layer.
    AuthorityViolation,
}

/// Why a save or restore operation was rejected as a whole.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum PersistRejection {
    /// A participant was not at a legal save boundary.
    RejectedIncomplete,
    /// Persisted data violates an invariant.
    RejectedInconsistent,
    /// A dependency was restored before its prerequisite.
    RejectedOutOfOrder,
}
