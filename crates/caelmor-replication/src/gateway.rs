//! The replication gateway: snapshot generation and observer admission.
//!
//! The gateway keeps the most recent snapshot per world and nothing else.
//! Joining or reconnecting observers are handed that snapshot only: no
//! history, no replay of missed ticks. Leaving revokes observation at
//! once. None of these operations take a mutable reference to the
//! runtime, so observers cannot influence simulation.

use std::collections::BTreeMap;
use std::sync::Arc;

use caelmor_core::Runtime;
use caelmor_types::{ObserverId, WorldId};
use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::error::ReplicationError;
use crate::snapshot::WorldSnapshot;

/// Snapshot scope bookkeeping and observer registry.
#[derive(Debug)]
pub struct ReplicationGateway {
    /// Last tick snapshotted per world. Ticks only move forward, so any
    /// tick at or below this value was already generated.
    last_tick: BTreeMap<WorldId, u64>,
    latest: BTreeMap<WorldId, Arc<WorldSnapshot>>,
    observers: BTreeMap<ObserverId, WorldId>,
    next_observer: u64,
    tx: broadcast::Sender<Arc<WorldSnapshot>>,
}

impl ReplicationGateway {
    /// Create a gateway whose broadcast channel buffers `capacity`
    /// snapshots per slow receiver.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self {
            last_tick: BTreeMap::new(),
            latest: BTreeMap::new(),
            observers: BTreeMap::new(),
            next_observer: 0,
            tx,
        }
    }

    // -----------------------------------------------------------------------
    // Generation
    // -----------------------------------------------------------------------

    /// Generate the snapshot of `world` for the runtime's last committed
    /// tick and publish it.
    ///
    /// # Errors
    ///
    /// Rejected mid-tick, before the first commit of this process, for a
    /// world that did not participate in that commit, and for a
    /// `(tick, world)` already generated.
    pub fn generate_snapshot(
        &mut self,
        runtime: &Runtime,
        world: WorldId,
    ) -> Result<Arc<WorldSnapshot>, ReplicationError> {
        if runtime.committed_arena().is_none() {
            return Err(ReplicationError::NoCommittedTick);
        }
        let tick = runtime.tick();
        if self.last_tick.get(&world).is_some_and(|last| *last >= tick) {
            return Err(ReplicationError::Duplicate { tick, world });
        }
        let snapshot = Arc::new(WorldSnapshot::capture(runtime, world)?);
        self.last_tick.insert(world, tick);
        self.latest.insert(world, Arc::clone(&snapshot));

        // Zero receivers is not an error: simulation never waits on them.
        let receivers = self.tx.send(Arc::clone(&snapshot)).unwrap_or(0);
        debug!(
            tick,
            %world,
            entities = snapshot.entities().len(),
            receivers,
            "Snapshot generated"
        );
        Ok(snapshot)
    }

    /// Generate one snapshot per world that participated in the last
    /// commit.
    ///
    /// # Errors
    ///
    /// See [`Self::generate_snapshot`]. Worlds already snapshotted for
    /// this tick are an error, not skipped.
    pub fn generate_all(
        &mut self,
        runtime: &Runtime,
    ) -> Result<Vec<Arc<WorldSnapshot>>, ReplicationError> {
        let worlds: Vec<WorldId> = runtime
            .committed_arena()
            .ok_or(ReplicationError::NoCommittedTick)?
            .worlds()
            .worlds()
            .filter(|w| w.is_participating())
            .map(|w| w.id())
            .collect();
        worlds
            .into_iter()
            .map(|world| self.generate_snapshot(runtime, world))
            .collect()
    }

    /// Most recent snapshot of `world`.
    pub fn latest(&self, world: WorldId) -> Option<Arc<WorldSnapshot>> {
        self.latest.get(&world).cloned()
    }

    /// Subscribe to every snapshot generated from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<WorldSnapshot>> {
        self.tx.subscribe()
    }

    // -----------------------------------------------------------------------
    // Observers
    // -----------------------------------------------------------------------

    /// Admit an observer of `world`. Returns its handle and the most recent
    /// snapshot, if one exists yet.
    pub fn join(&mut self, world: WorldId) -> (ObserverId, Option<Arc<WorldSnapshot>>) {
        let id = ObserverId(self.next_observer);
        self.next_observer = self.next_observer.saturating_add(1);
        self.observers.insert(id, world);
        info!(observer = %id, %world, observers = self.observers.len(), "Observer joined");
        (id, self.latest(world))
    }

    /// Resume a joined observer after a transport drop. Only the most
    /// recent snapshot is returned; missed ticks are not replayed.
    ///
    /// # Errors
    ///
    /// [`ReplicationError::UnknownObserver`] if the observer left.
    pub fn reconnect(
        &self,
        observer: ObserverId,
    ) -> Result<Option<Arc<WorldSnapshot>>, ReplicationError> {
        let world = self.observed_world(observer)?;
        debug!(%observer, %world, "Observer reconnected");
        Ok(self.latest(world))
    }

    /// Revoke an observer immediately.
    ///
    /// # Errors
    ///
    /// [`ReplicationError::UnknownObserver`] if it never joined or already
    /// left.
    pub fn leave(&mut self, observer: ObserverId) -> Result<(), ReplicationError> {
        let world = self
            .observers
            .remove(&observer)
            .ok_or(ReplicationError::UnknownObserver(observer))?;
        info!(%observer, %world, observers = self.observers.len(), "Observer left");
        Ok(())
    }

    /// Current snapshot for an observer.
    ///
    /// # Errors
    ///
    /// [`ReplicationError::UnknownObserver`] once the observer has left.
    pub fn observe(
        &self,
        observer: ObserverId,
    ) -> Result<Option<Arc<WorldSnapshot>>, ReplicationError> {
        Ok(self.latest(self.observed_world(observer)?))
    }

    /// Number of joined observers.
    pub fn observer_count(&self) -> usize {
        self.observers.len()
    }

    fn observed_world(&self, observer: ObserverId) -> Result<WorldId, ReplicationError> {
        self.observers
            .get(&observer)
            .copied()
            .ok_or(ReplicationError::UnknownObserver(observer))
    }
}
