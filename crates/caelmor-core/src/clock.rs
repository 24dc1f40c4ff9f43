//! Tick clock and phase tracking.
//!
//! The clock is the single source of truth for simulated time. It counts
//! committed ticks and enforces the phase cycle
//! `Boundary -> GateEvaluation -> Executing -> Finalizing -> Boundary`.
//! Wall-clock time never enters simulation; the tick rate only tells the
//! runner how long to wait between ticks.

use std::time::Duration;

use caelmor_types::TickPhase;

/// Lowest accepted tick rate.
pub const MIN_TICK_RATE_HZ: u32 = 1;

/// Highest accepted tick rate.
pub const MAX_TICK_RATE_HZ: u32 = 1000;

/// Errors raised by clock operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClockError {
    /// Tick counter would overflow.
    #[error("tick counter overflow: cannot advance beyond u64::MAX")]
    TickOverflow,

    /// Tick rate outside `1..=1000` Hz.
    #[error("invalid tick rate {hz} Hz (expected 1..=1000)")]
    InvalidRate {
        /// The rejected rate.
        hz: u32,
    },

    /// A phase was entered out of order.
    #[error("phase {to:?} cannot follow {from:?}")]
    PhaseOrder {
        /// Current phase.
        from: TickPhase,
        /// Requested phase.
        to: TickPhase,
    },
}

/// Fixed-step tick clock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TickClock {
    /// Last committed tick (0 before the first tick).
    tick: u64,

    /// Current phase.
    phase: TickPhase,

    /// Configured tick rate.
    tick_rate_hz: u32,
}

impl TickClock {
    /// Create a clock at tick 0.
    ///
    /// # Errors
    ///
    /// Returns [`ClockError::InvalidRate`] if the rate is out of range.
    pub const fn new(tick_rate_hz: u32) -> Result<Self, ClockError> {
        Self::resume_at(0, tick_rate_hz)
    }

    /// Create a clock continuing after an already committed tick (restore).
    ///
    /// # Errors
    ///
    /// Returns [`ClockError::InvalidRate`] if the rate is out of range.
    pub const fn resume_at(tick: u64, tick_rate_hz: u32) -> Result<Self, ClockError> {
        if tick_rate_hz < MIN_TICK_RATE_HZ || tick_rate_hz > MAX_TICK_RATE_HZ {
            return Err(ClockError::InvalidRate { hz: tick_rate_hz });
        }
        Ok(Self {
            tick,
            phase: TickPhase::Boundary,
            tick_rate_hz,
        })
    }

    /// Last committed tick.
    pub const fn tick(&self) -> u64 {
        self.tick
    }

    /// The tick that is open, or would open next.
    ///
    /// # Errors
    ///
    /// Returns [`ClockError::TickOverflow`] at `u64::MAX`.
    pub const fn upcoming(&self) -> Result<u64, ClockError> {
        match self.tick.checked_add(1) {
            Some(next) => Ok(next),
            None => Err(ClockError::TickOverflow),
        }
    }

    /// Current phase.
    pub const fn phase(&self) -> TickPhase {
        self.phase
    }

    /// Whether a tick is open.
    pub const fn is_mid_tick(&self) -> bool {
        self.phase.is_mid_tick()
    }

    /// Configured tick rate.
    pub const fn tick_rate_hz(&self) -> u32 {
        self.tick_rate_hz
    }

    /// Real-time length of one tick.
    pub fn tick_duration(&self) -> Duration {
        let nanos = 1_000_000_000_u64
            .checked_div(u64::from(self.tick_rate_hz))
            .unwrap_or(1_000_000_000);
        Duration::from_nanos(nanos)
    }

    /// Move to the next phase.
    ///
    /// # Errors
    ///
    /// Returns [`ClockError::PhaseOrder`] unless `next` follows the current
    /// phase.
    pub fn enter(&mut self, next: TickPhase) -> Result<(), ClockError> {
        if self.phase.next() != next {
            return Err(ClockError::PhaseOrder {
                from: self.phase,
                to: next,
            });
        }
        if next == TickPhase::Boundary {
            return Err(ClockError::PhaseOrder {
                from: self.phase,
                to: next,
            });
        }
        self.phase = next;
        Ok(())
    }

    /// Close the open tick as committed. Returns the committed tick.
    ///
    /// # Errors
    ///
    /// Returns [`ClockError::PhaseOrder`] unless finalizing, or
    /// [`ClockError::TickOverflow`].
    pub fn commit(&mut self) -> Result<u64, ClockError> {
        if self.phase != TickPhase::Finalizing {
            return Err(ClockError::PhaseOrder {
                from: self.phase,
                to: TickPhase::Boundary,
            });
        }
        self.tick = self.upcoming()?;
        self.phase = TickPhase::Boundary;
        Ok(self.tick)
    }

    /// Close the open tick without committing it.
    pub const fn abort(&mut self) {
        self.phase = TickPhase::Boundary;
    }
}
