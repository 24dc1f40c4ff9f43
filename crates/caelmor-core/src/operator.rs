//! Operator control of a running shard.
//!
//! [`OperatorState`] is shared (behind an `Arc`) between the tick loop and
//! whoever drives it: a signal handler, an admin task, a test. Controls
//! take effect at the next tick boundary. A tick that already started
//! always runs to commit or abort.

use std::sync::OnceLock;
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;

/// Why a simulation run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SimulationEndReason {
    /// The configured tick budget was used up.
    MaxTicksReached,
    /// An operator asked the shard to stop.
    OperatorStop,
    /// A tick aborted and the run was abandoned.
    TickAborted,
}

/// What the loop should do at its next boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
enum Mode {
    Running = 0,
    Paused = 1,
    Stopping = 2,
}

impl Mode {
    const fn from_raw(raw: u8) -> Self {
        match raw {
            1 => Self::Paused,
            2 => Self::Stopping,
            _ => Self::Running,
        }
    }
}

/// Shared run controls and progress counters.
#[derive(Debug)]
pub struct OperatorState {
    mode: AtomicU8,
    /// Wakes a paused loop on resume or stop.
    wake: Notify,
    ticks_run: AtomicU64,
    /// Ticks to run before ending (0 = unbounded).
    max_ticks: u64,
    started_at: DateTime<Utc>,
    /// Set once, by whichever condition ends the run first.
    end_reason: OnceLock<SimulationEndReason>,
}

impl OperatorState {
    /// Controls for a run of at most `max_ticks` ticks. Zero means run
    /// until stopped.
    pub fn new(max_ticks: u64) -> Self {
        Self {
            mode: AtomicU8::new(Mode::Running as u8),
            wake: Notify::new(),
            ticks_run: AtomicU64::new(0),
            max_ticks,
            started_at: Utc::now(),
            end_reason: OnceLock::new(),
        }
    }

    fn mode(&self) -> Mode {
        Mode::from_raw(self.mode.load(Ordering::Acquire))
    }

    /// Whether the loop is held at a boundary.
    pub fn is_paused(&self) -> bool {
        self.mode() == Mode::Paused
    }

    /// Hold the loop at the next boundary. Ignored once stopping.
    pub fn pause(&self) {
        let _ = self.mode.compare_exchange(
            Mode::Running as u8,
            Mode::Paused as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
    }

    /// Release a paused loop. Ignored unless paused.
    pub fn resume(&self) {
        if self
            .mode
            .compare_exchange(
                Mode::Paused as u8,
                Mode::Running as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
        {
            self.wake.notify_one();
        }
    }

    /// Park until resumed or stopped. Returns at once when running.
    pub async fn wait_while_paused(&self) {
        while self.mode() == Mode::Paused {
            self.wake.notified().await;
        }
    }

    /// End the run at the next boundary. Overrides a pause.
    pub fn request_stop(&self) {
        self.mode.store(Mode::Stopping as u8, Ordering::Release);
        self.wake.notify_one();
    }

    /// Whether a stop was requested.
    pub fn is_stop_requested(&self) -> bool {
        self.mode() == Mode::Stopping
    }

    /// Count one committed tick.
    pub fn record_tick(&self) {
        self.ticks_run.fetch_add(1, Ordering::AcqRel);
    }

    /// Ticks committed under these controls.
    pub fn ticks_run(&self) -> u64 {
        self.ticks_run.load(Ordering::Acquire)
    }

    /// Whether the tick budget is used up.
    pub fn tick_limit_reached(&self) -> bool {
        self.max_ticks > 0 && self.ticks_run() >= self.max_ticks
    }

    /// The tick budget (0 = unbounded).
    pub const fn max_ticks(&self) -> u64 {
        self.max_ticks
    }

    /// Record why the run ended. Later calls keep the first reason.
    pub fn finish(&self, reason: SimulationEndReason) -> SimulationEndReason {
        *self.end_reason.get_or_init(|| reason)
    }

    /// Why the run ended, once it has.
    pub fn end_reason(&self) -> Option<SimulationEndReason> {
        self.end_reason.get().copied()
    }

    /// Wall-clock seconds since the controls were created. Informational
    /// only; nothing in the simulation reads it.
    pub fn uptime_seconds(&self) -> u64 {
        let secs = Utc::now()
            .signed_duration_since(self.started_at)
            .num_seconds();
        u64::try_from(secs).unwrap_or(0)
    }
}
