//! Structural intents emitted by decision systems and player input.
//!
//! An intent never executes anything by itself. The simulation consumes at
//! most one intent per entity per tick during execution.

use serde::{Deserialize, Serialize};

use crate::ids::{PlayerId, ZoneId};
use crate::records::GridPos;

/// A prospective action for one simulated entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Intent {
    /// Do nothing this tick.
    Idle,
    /// Step one tile toward a target position in the current zone.
    MoveTo {
        /// Destination inside the resident zone.
        target: GridPos,
    },
    /// Recover health.
    Rest,
    /// Ask the world to move this entity to another zone at the next boundary.
    TransferZone {
        /// Requested destination zone (must belong to the same world).
        zone: ZoneId,
    },
}

/// An intent submitted by a connected player.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerInput {
    /// Submitting player.
    pub player: PlayerId,
    /// The tick this input is consumed in.
    pub tick: u64,
    /// What the player wants to do.
    pub intent: Intent,
}
