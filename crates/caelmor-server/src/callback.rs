//! Tick callback that publishes snapshots and schedules autosaves.
//!
//! Runs at each boundary after commit. Snapshots go to the replication
//! gateway. Every `autosave_interval_ticks` committed ticks, if persisted
//! truth changed, a save is prepared and handed to the writer thread. A
//! full writer queue skips the save rather than stall the loop.

use std::sync::mpsc::{SyncSender, TrySendError};

use caelmor_core::{Runtime, TickCallback, TickError, TickReport};
use caelmor_persist::PersistError;
use caelmor_replication::ReplicationGateway;
use tracing::{debug, warn};

use crate::save_writer::SaveRequest;

/// Autosave schedule and hand-off channel.
#[derive(Debug)]
pub struct Autosave {
    interval_ticks: u64,
    last_handed_off: u64,
    tx: SyncSender<SaveRequest>,
}

impl Autosave {
    /// Save every `interval_ticks` committed ticks. Zero disables autosave.
    /// `saved_revision` is the runtime revision already on disk.
    pub const fn new(interval_ticks: u64, saved_revision: u64, tx: SyncSender<SaveRequest>) -> Self {
        Self {
            interval_ticks,
            last_handed_off: saved_revision,
            tx,
        }
    }

    fn is_due(&self, tick: u64) -> bool {
        self.interval_ticks > 0 && tick.checked_rem(self.interval_ticks) == Some(0)
    }

    /// Prepare and hand off a save if one is due. Returns whether a save
    /// was handed to the writer.
    pub fn maybe_save(&mut self, runtime: &Runtime) -> bool {
        let tick = runtime.tick();
        if !self.is_due(tick) {
            return false;
        }
        if !runtime.dirty_since(self.last_handed_off) {
            debug!(tick, "Autosave skipped, nothing changed");
            return false;
        }

        let revision = runtime.revision();
        let op = match runtime.prepare_save() {
            Ok(op) => op,
            Err(TickError::Persist(err @ PersistError::NotReady { .. })) => {
                debug!(tick, reason = %err, "Autosave deferred");
                return false;
            }
            Err(err) => {
                warn!(tick, error = %err, "Autosave could not be prepared");
                return false;
            }
        };

        match self.tx.try_send(SaveRequest { revision, op }) {
            Ok(()) => {
                self.last_handed_off = revision;
                debug!(tick, revision, "Autosave handed to writer");
                true
            }
            Err(TrySendError::Full(_)) => {
                warn!(tick, "Save writer busy, autosave skipped");
                false
            }
            Err(TrySendError::Disconnected(_)) => {
                warn!(tick, "Save writer gone, autosave skipped");
                false
            }
        }
    }
}

/// Callback wired into the simulation loop by the server binary.
#[derive(Debug)]
pub struct ServerCallback {
    gateway: ReplicationGateway,
    autosave: Option<Autosave>,
    snapshots: u64,
}

impl ServerCallback {
    /// Create a callback publishing through `gateway`.
    pub const fn new(gateway: ReplicationGateway, autosave: Option<Autosave>) -> Self {
        Self {
            gateway,
            autosave,
            snapshots: 0,
        }
    }

    /// The replication gateway.
    pub const fn gateway(&self) -> &ReplicationGateway {
        &self.gateway
    }

    /// Snapshots generated so far.
    pub const fn snapshots(&self) -> u64 {
        self.snapshots
    }

    /// Drop the autosave channel so the writer can drain and exit.
    pub fn close_autosave(&mut self) {
        self.autosave = None;
    }
}

impl TickCallback for ServerCallback {
    fn on_tick(&mut self, report: &TickReport, runtime: &Runtime) {
        match self.gateway.generate_all(runtime) {
            Ok(snapshots) => {
                self.snapshots = self.snapshots.saturating_add(snapshots.len() as u64);
            }
            Err(err) => {
                warn!(tick = report.tick, error = %err, "Snapshot generation failed");
            }
        }

        if let Some(autosave) = &mut self.autosave {
            autosave.maybe_save(runtime);
        }

        debug!(
            tick = report.tick,
            eligible = report.eligible,
            entity_writes = report.entity_writes,
            dirty = ?report.dirty,
            "Tick published"
        );
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::mpsc;

    use caelmor_core::{IdleDecisionSource, TickPipeline};

    use super::*;
    use crate::seed;

    fn running() -> (Runtime, TickPipeline) {
        let mut runtime = Runtime::new(10).unwrap();
        seed::seed_runtime(&mut runtime).unwrap();
        seed::activate_everything(&mut runtime).unwrap();
        (
            runtime,
            TickPipeline::new(Box::new(IdleDecisionSource::new())),
        )
    }

    #[test]
    fn each_tick_publishes_one_snapshot_per_world() {
        let (mut runtime, mut pipeline) = running();
        let mut callback = ServerCallback::new(ReplicationGateway::new(4), None);
        for _ in 0..3 {
            let report = runtime.run_tick(&mut pipeline).unwrap();
            callback.on_tick(&report, &runtime);
        }
        assert_eq!(callback.snapshots(), 3);
        let latest = callback.gateway().latest(seed::VALE).unwrap();
        assert_eq!(latest.tick(), 3);
    }

    #[test]
    fn autosave_runs_on_interval_when_dirty() {
        let (mut runtime, mut pipeline) = running();
        let (tx, rx) = mpsc::sync_channel(4);
        let mut autosave = Autosave::new(2, 0, tx);

        let _ = runtime.run_tick(&mut pipeline).unwrap();
        assert!(!autosave.maybe_save(&runtime), "tick 1 is not due");

        let _ = runtime.run_tick(&mut pipeline).unwrap();
        assert!(autosave.maybe_save(&runtime), "seeding left truth dirty");
        let handed = rx.try_recv().unwrap();
        assert_eq!(handed.op.tick(), 2);
        assert_eq!(handed.revision, runtime.revision());

        // Idle NPCs change nothing persisted.
        let _ = runtime.run_tick(&mut pipeline).unwrap();
        let _ = runtime.run_tick(&mut pipeline).unwrap();
        assert!(!autosave.maybe_save(&runtime));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn full_writer_queue_skips_without_blocking() {
        let (mut runtime, mut pipeline) = running();
        let (tx, _rx) = mpsc::sync_channel(0);
        let mut autosave = Autosave::new(1, 0, tx);
        let _ = runtime.run_tick(&mut pipeline).unwrap();
        assert!(!autosave.maybe_save(&runtime));
    }

    #[test]
    fn zero_interval_disables_autosave() {
        let (mut runtime, mut pipeline) = running();
        let (tx, rx) = mpsc::sync_channel(4);
        let mut autosave = Autosave::new(0, 0, tx);
        let _ = runtime.run_tick(&mut pipeline).unwrap();
        assert!(!autosave.maybe_save(&runtime));
        assert!(rx.try_recv().is_err());
    }
}
