//! Background save writer.
//!
//! The tick loop captures an immutable [`SaveOperation`] at a boundary and
//! hands it over a bounded channel. A dedicated thread owns the
//! [`PersistenceCoordinator`] and commits each operation, so storage I/O
//! never runs on the simulation path.

use std::sync::mpsc;
use std::thread;

use caelmor_persist::{PersistenceCoordinator, SaveOperation, StorageBackend};
use tracing::{info, warn};

use crate::error::ServerError;

/// Pending saves the writer may hold before the tick loop starts skipping.
pub const SAVE_QUEUE_DEPTH: usize = 2;

/// A prepared save and the runtime revision it captured.
#[derive(Debug)]
pub struct SaveRequest {
    /// Runtime revision at capture time.
    pub revision: u64,
    /// The `AllReady` operation to commit.
    pub op: SaveOperation,
}

/// What the writer hands back when its channel closes.
#[derive(Debug)]
pub struct WriterOutcome<S> {
    /// The coordinator, for a final synchronous save.
    pub coordinator: PersistenceCoordinator<S>,
    /// Highest revision committed by the writer, if any.
    pub committed_revision: Option<u64>,
    /// Saves that were rolled back.
    pub failed: u64,
}

/// Handle to a running writer thread.
#[derive(Debug)]
pub struct SaveWriter<S> {
    worker: thread::JoinHandle<WriterOutcome<S>>,
}

impl<S: StorageBackend + 'static> SaveWriter<S> {
    /// Start the writer thread. Returns the handle and the sender the tick
    /// loop should use.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::SaveWriter`] if the thread cannot be spawned.
    pub fn spawn(
        coordinator: PersistenceCoordinator<S>,
    ) -> Result<(Self, mpsc::SyncSender<SaveRequest>), ServerError> {
        let (tx, rx) = mpsc::sync_channel::<SaveRequest>(SAVE_QUEUE_DEPTH);
        let worker = thread::Builder::new()
            .name("caelmor-save-writer".to_owned())
            .spawn(move || write_loop(coordinator, &rx))
            .map_err(|err| ServerError::SaveWriter {
                message: err.to_string(),
            })?;
        Ok((Self { worker }, tx))
    }

    /// Wait for the writer to drain. Every sender must be dropped first.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::SaveWriter`] if the thread panicked.
    pub fn join(self) -> Result<WriterOutcome<S>, ServerError> {
        self.worker.join().map_err(|_err| ServerError::SaveWriter {
            message: "save writer thread panicked".to_owned(),
        })
    }
}

fn write_loop<S: StorageBackend>(
    mut coordinator: PersistenceCoordinator<S>,
    rx: &mpsc::Receiver<SaveRequest>,
) -> WriterOutcome<S> {
    let mut committed_revision = None;
    let mut failed = 0_u64;
    while let Ok(SaveRequest { revision, mut op }) = rx.recv() {
        match coordinator.commit(&mut op) {
            Ok(receipt) => {
                committed_revision = Some(revision);
                info!(
                    generation = receipt.generation,
                    tick = receipt.tick,
                    revision,
                    "Autosave written"
                );
            }
            Err(err) => {
                failed = failed.saturating_add(1);
                warn!(tick = op.tick(), error = %err, "Autosave failed, previous save kept");
            }
        }
    }
    WriterOutcome {
        coordinator,
        committed_revision,
        failed,
    }
}
