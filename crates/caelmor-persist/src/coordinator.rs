//! Atomic cross-system save.
//!
//! A save is a [`SaveOperation`] driven through
//! `Requested -> ParticipantsPolled -> AllReady | AnyFailed -> Committed | RolledBack`.
//! Polling happens on the simulation thread between ticks and yields an
//! immutable payload. Committing that payload to storage can happen on any
//! thread because it never touches runtime state.

use caelmor_types::{PersistSystem, PersistedTruth};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::backend::{SaveEnvelope, StorageBackend};
use crate::error::PersistError;
use crate::participant::SaveParticipant;
use crate::restore::{self, ValidatedTruth};

/// State of one save operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SaveState {
    /// Save requested, nothing polled yet.
    Requested,
    /// Every participant has answered.
    ParticipantsPolled,
    /// Every participant is ready and the payload is assembled.
    AllReady,
    /// At least one participant refused.
    AnyFailed,
    /// The payload is the committed save.
    Committed,
    /// Nothing was written.
    RolledBack,
}

impl SaveState {
    /// Whether `self -> next` is a legal transition.
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Requested, Self::ParticipantsPolled)
                | (Self::ParticipantsPolled, Self::AllReady | Self::AnyFailed)
                | (Self::AllReady, Self::Committed | Self::RolledBack)
                | (Self::AnyFailed, Self::RolledBack)
        )
    }

    /// Whether the operation has finished.
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Committed | Self::RolledBack)
    }
}

/// One save, from request to commit or rollback.
#[derive(Debug, Clone)]
pub struct SaveOperation {
    tick: u64,
    state: SaveState,
    truth: Option<PersistedTruth>,
}

impl SaveOperation {
    /// Request a save of the state committed at `tick`.
    pub const fn request(tick: u64) -> Self {
        Self {
            tick,
            state: SaveState::Requested,
            truth: None,
        }
    }

    /// Current state.
    pub const fn state(&self) -> SaveState {
        self.state
    }

    /// The tick this save captures.
    pub const fn tick(&self) -> u64 {
        self.tick
    }

    /// The assembled payload, once every participant was ready.
    pub const fn payload(&self) -> Option<&PersistedTruth> {
        self.truth.as_ref()
    }

    fn advance(&mut self, next: SaveState) -> Result<(), PersistError> {
        if !self.state.can_transition_to(next) {
            return Err(PersistError::IllegalTransition {
                from: self.state,
                to: next,
            });
        }
        self.state = next;
        Ok(())
    }

    /// Poll every participant, then collect their records in graph order.
    ///
    /// Exactly one participant per [`PersistSystem`] must be offered. If any
    /// participant is missing or not ready the operation ends in
    /// `AnyFailed` and nothing is collected.
    ///
    /// # Errors
    ///
    /// Returns [`PersistError::MissingParticipant`],
    /// [`PersistError::DuplicateParticipant`], or [`PersistError::NotReady`]
    /// on refusal, and [`PersistError::IllegalTransition`] if the operation
    /// was already polled.
    pub fn poll(&mut self, participants: &[&dyn SaveParticipant]) -> Result<(), PersistError> {
        self.advance(SaveState::ParticipantsPolled)?;

        let mut ordered: Vec<&dyn SaveParticipant> = Vec::with_capacity(participants.len());
        let mut failure = None;
        for system in PersistSystem::ORDER {
            let mut matching = participants.iter().filter(|p| p.system() == system);
            match (matching.next(), matching.next()) {
                (None, _) => {
                    failure.get_or_insert(PersistError::MissingParticipant(system));
                }
                (Some(_), Some(_)) => {
                    failure.get_or_insert(PersistError::DuplicateParticipant(system));
                }
                (Some(participant), None) => {
                    if let Err(reason) = participant.check_ready() {
                        failure.get_or_insert(PersistError::NotReady { system, reason });
                    }
                    ordered.push(*participant);
                }
            }
        }

        if let Some(err) = failure {
            self.advance(SaveState::AnyFailed)?;
            warn!(tick = self.tick, error = %err, "Save rejected at poll");
            return Err(err);
        }

        let mut truth = PersistedTruth::default();
        for participant in ordered {
            participant.contribute(&mut truth);
        }
        truth.canonicalize();
        self.truth = Some(truth);
        self.advance(SaveState::AllReady)
    }

    /// Abandon the operation without writing.
    ///
    /// # Errors
    ///
    /// Returns [`PersistError::IllegalTransition`] if the operation is not
    /// in `AllReady` or `AnyFailed`.
    pub fn roll_back(&mut self) -> Result<(), PersistError> {
        self.advance(SaveState::RolledBack)?;
        self.truth = None;
        Ok(())
    }
}

/// Receipt of a committed save.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SaveReceipt {
    /// Generation assigned to the save.
    pub generation: u64,
    /// Tick the save captured.
    pub tick: u64,
}

/// Owns a storage backend and assigns save generations.
#[derive(Debug)]
pub struct PersistenceCoordinator<S> {
    store: S,
    generation: u64,
}

impl<S: StorageBackend> PersistenceCoordinator<S> {
    /// Open a coordinator over `store`, continuing from its last generation.
    ///
    /// # Errors
    ///
    /// Returns [`PersistError`] if the committed save cannot be read.
    pub fn open(store: S) -> Result<Self, PersistError> {
        let generation = store.read()?.map_or(0, |envelope| envelope.generation);
        Ok(Self { store, generation })
    }

    /// Generation of the last committed save (0 if none).
    pub const fn generation(&self) -> u64 {
        self.generation
    }

    /// The underlying store.
    pub const fn store(&self) -> &S {
        &self.store
    }

    /// Write an `AllReady` operation to storage.
    ///
    /// On a storage failure the operation is rolled back and the previous
    /// save remains the committed one.
    ///
    /// # Errors
    ///
    /// Returns [`PersistError::IllegalTransition`] if the operation is not
    /// `AllReady`, or the storage error that caused the rollback.
    pub fn commit(&mut self, op: &mut SaveOperation) -> Result<SaveReceipt, PersistError> {
        if !op.state.can_transition_to(SaveState::Committed) {
            return Err(PersistError::IllegalTransition {
                from: op.state,
                to: SaveState::Committed,
            });
        }
        let Some(truth) = op.truth.take() else {
            return Err(PersistError::IllegalTransition {
                from: op.state,
                to: SaveState::Committed,
            });
        };
        let generation = self
            .generation
            .checked_add(1)
            .ok_or(PersistError::GenerationOverflow)?;
        let envelope = SaveEnvelope {
            generation,
            tick: op.tick,
            saved_at: Utc::now(),
            truth,
        };

        match self.store.write(&envelope) {
            Ok(()) => {
                op.truth = Some(envelope.truth);
                op.advance(SaveState::Committed)?;
                self.generation = generation;
                info!(generation, tick = op.tick, "Save committed");
                Ok(SaveReceipt {
                    generation,
                    tick: op.tick,
                })
            }
            Err(err) => {
                op.truth = Some(envelope.truth);
                op.roll_back()?;
                warn!(generation, tick = op.tick, error = %err, "Save rolled back");
                Err(err)
            }
        }
    }

    /// Poll, collect, and commit in one call.
    ///
    /// # Errors
    ///
    /// See [`SaveOperation::poll`] and [`Self::commit`].
    pub fn save(
        &mut self,
        tick: u64,
        participants: &[&dyn SaveParticipant],
    ) -> Result<SaveReceipt, PersistError> {
        let mut op = SaveOperation::request(tick);
        if let Err(err) = op.poll(participants) {
            op.roll_back()?;
            return Err(err);
        }
        self.commit(&mut op)
    }

    /// Read the committed save and validate it in dependency order.
    ///
    /// Returns `None` when nothing was ever saved.
    ///
    /// # Errors
    ///
    /// Returns the first restore rejection; nothing is partially restored.
    pub fn restore(&self) -> Result<Option<(SaveEnvelope, ValidatedTruth)>, PersistError> {
        let Some(envelope) = self.store.read()? else {
            return Ok(None);
        };
        let validated = restore::restore_in_order(envelope.truth.clone())?;
        info!(
            generation = envelope.generation,
            tick = envelope.tick,
            "Persisted truth validated for restore"
        );
        Ok(Some((envelope, validated)))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use caelmor_types::{EntityVitals, PersistRejection, PlayerId, PlayerSave, WorldId, ZoneId};

    use super::*;
    use crate::backend::MemoryStore;

    struct Fixed {
        system: PersistSystem,
        ready: bool,
    }

    impl SaveParticipant for Fixed {
        fn system(&self) -> PersistSystem {
            self.system
        }

        fn check_ready(&self) -> Result<(), String> {
            if self.ready {
                Ok(())
            } else {
                Err("mid-transition".to_owned())
            }
        }

        fn contribute(&self, truth: &mut PersistedTruth) {
            if self.system == PersistSystem::IdentitySave {
                truth.players.push(PlayerSave {
                    player: PlayerId::from_u128(1),
                    display_name: "p1".to_owned(),
                    world: WorldId::from_u128(1),
                    zone: ZoneId::from_u128(7),
                    vitals: EntityVitals::default(),
                });
            }
        }
    }

    fn all_ready() -> Vec<Fixed> {
        PersistSystem::ORDER
            .iter()
            .map(|&system| Fixed { system, ready: true })
            .collect()
    }

    fn as_dyn(list: &[Fixed]) -> Vec<&dyn SaveParticipant> {
        list.iter().map(|p| p as &dyn SaveParticipant).collect()
    }

    #[test]
    fn save_follows_state_machine() {
        let participants = all_ready();
        let mut op = SaveOperation::request(5);
        op.poll(&as_dyn(&participants)).unwrap();
        assert_eq!(op.state(), SaveState::AllReady);

        let mut coordinator = PersistenceCoordinator::open(MemoryStore::new()).unwrap();
        let receipt = coordinator.commit(&mut op).unwrap();
        assert_eq!(receipt.generation, 1);
        assert_eq!(op.state(), SaveState::Committed);
        assert!(coordinator.commit(&mut op).is_err());
    }

    #[test]
    fn one_unready_participant_rejects_whole_save() {
        let mut participants = all_ready();
        if let Some(p) = participants.get_mut(3) {
            p.ready = false;
        }
        let store = MemoryStore::new();
        let mut coordinator = PersistenceCoordinator::open(store.clone()).unwrap();
        let err = coordinator.save(1, &as_dyn(&participants)).unwrap_err();
        assert_eq!(err.rejection(), Some(PersistRejection::RejectedIncomplete));
        assert!(store.read().unwrap().is_none());
    }

    #[test]
    fn missing_participant_is_incomplete() {
        let participants: Vec<Fixed> = all_ready().into_iter().skip(1).collect();
        let mut op = SaveOperation::request(1);
        let err = op.poll(&as_dyn(&participants)).unwrap_err();
        assert!(matches!(err, PersistError::MissingParticipant(PersistSystem::IdentitySave)));
        assert_eq!(op.state(), SaveState::AnyFailed);
        assert!(op.payload().is_none());
    }

    #[test]
    fn storage_failure_rolls_back() {
        let participants = all_ready();
        let mut store = MemoryStore::new();
        let mut coordinator = PersistenceCoordinator::open(store.clone()).unwrap();
        coordinator.save(1, &as_dyn(&participants)).unwrap();

        store.set_fail_writes(true);
        let mut failing = PersistenceCoordinator::open(store.clone()).unwrap();
        let mut op = SaveOperation::request(2);
        op.poll(&as_dyn(&participants)).unwrap();
        assert!(failing.commit(&mut op).is_err());
        assert_eq!(op.state(), SaveState::RolledBack);
        assert_eq!(store.read().unwrap().map(|e| e.tick), Some(1));
    }
}
