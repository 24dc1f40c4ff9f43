//! Player session lifecycle.
//!
//! Sessions are ephemeral: `Created -> Activated -> Deactivated ->
//! Terminated`, never persisted as authoritative truth. A terminated session
//! is dropped from the registry; its sequence number is never reused.
//!
//! At most one session per identity is `Activated` at any time. When several
//! sessions for the same identity ask to activate at the same boundary, the
//! lowest session sequence number (the earliest connection attempt) wins.
//! Client signalling never influences the outcome.

use std::collections::{BTreeMap, BTreeSet};

use caelmor_types::{EntityVitals, PlayerId, SessionId, SessionState, WorldId};
use tracing::{debug, info};

use crate::error::EntityError;

/// Runtime state of one player session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayerSession {
    /// Sequence handle (connection-attempt order).
    pub id: SessionId,
    /// The identity this session binds.
    pub player: PlayerId,
    /// Lifecycle state.
    pub state: SessionState,
    /// World attached while activated.
    pub world: Option<WorldId>,
    /// Live vitals while activated.
    pub vitals: EntityVitals,
}

/// Result of resolving a batch of activation requests.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActivationResolution {
    /// Sessions allowed to activate, in sequence order.
    pub winners: Vec<SessionId>,
    /// Sessions rejected, with the reason.
    pub rejected: Vec<(SessionId, EntityError)>,
}

/// Registry of all sessions and the single-active index.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionRegistry {
    sessions: BTreeMap<SessionId, PlayerSession>,
    active: BTreeMap<PlayerId, SessionId>,
    next_seq: u64,
}

impl SessionRegistry {
    /// Create an empty registry.
    pub const fn new() -> Self {
        Self {
            sessions: BTreeMap::new(),
            active: BTreeMap::new(),
            next_seq: 0,
        }
    }

    /// Create a session in the inactive `Created` state.
    ///
    /// Identity validation happens before this call; see the runtime's
    /// `connect`.
    ///
    /// # Errors
    ///
    /// Returns [`EntityError::SequenceExhausted`] if no sequence numbers
    /// remain.
    pub fn create(&mut self, player: PlayerId) -> Result<SessionId, EntityError> {
        let id = SessionId(self.next_seq);
        self.next_seq = self
            .next_seq
            .checked_add(1)
            .ok_or(EntityError::SequenceExhausted)?;
        self.sessions.insert(
            id,
            PlayerSession {
                id,
                player,
                state: SessionState::Created,
                world: None,
                vitals: EntityVitals::default(),
            },
        );
        debug!(session = %id, %player, "Session created");
        Ok(id)
    }

    /// Look up a session.
    pub fn get(&self, id: SessionId) -> Option<&PlayerSession> {
        self.sessions.get(&id)
    }

    /// The activated session of an identity, if any.
    pub fn active_session(&self, player: PlayerId) -> Option<&PlayerSession> {
        self.active.get(&player).and_then(|id| self.sessions.get(id))
    }

    /// Number of activated sessions for an identity (0 or 1).
    pub fn active_count(&self, player: PlayerId) -> usize {
        self.sessions
            .values()
            .filter(|s| s.player == player && s.state == SessionState::Activated)
            .count()
    }

    /// All activated sessions in player order.
    pub fn activated(&self) -> impl Iterator<Item = &PlayerSession> {
        self.active.values().filter_map(|id| self.sessions.get(id))
    }

    /// All sessions in sequence order.
    pub fn iter(&self) -> impl Iterator<Item = &PlayerSession> {
        self.sessions.values()
    }

    /// Whether any session is activated.
    pub fn any_activated(&self) -> bool {
        !self.active.is_empty()
    }

    /// Check that a session could legally move to `next`.
    ///
    /// # Errors
    ///
    /// Returns [`EntityError::SessionNotFound`] or
    /// [`EntityError::IllegalSessionTransition`].
    pub fn check_transition(&self, id: SessionId, next: SessionState) -> Result<(), EntityError> {
        let session = self.sessions.get(&id).ok_or(EntityError::SessionNotFound(id))?;
        if !session.state.can_transition_to(next) {
            return Err(EntityError::IllegalSessionTransition {
                session: id,
                from: session.state,
                to: next,
            });
        }
        if next == SessionState::Activated {
            if let Some(active) = self.active.get(&session.player) {
                return Err(EntityError::DuplicateActiveSession {
                    player: session.player,
                    active: *active,
                });
            }
        }
        Ok(())
    }

    /// Resolve a batch of activation requests deterministically.
    ///
    /// Requests are grouped by identity; within a group the lowest session
    /// sequence wins and the rest are rejected. A group whose identity
    /// already has an activated session is rejected entirely.
    pub fn resolve_activations(&self, requests: &[SessionId]) -> ActivationResolution {
        let mut by_player: BTreeMap<PlayerId, BTreeSet<SessionId>> = BTreeMap::new();
        let mut resolution = ActivationResolution::default();

        for id in requests {
            match self.sessions.get(id) {
                Some(session) => {
                    by_player.entry(session.player).or_default().insert(*id);
                }
                None => resolution
                    .rejected
                    .push((*id, EntityError::SessionNotFound(*id))),
            }
        }

        for (player, candidates) in by_player {
            let mut winner: Option<SessionId> = None;
            for id in candidates {
                let outcome = match winner {
                    Some(active) => Err(EntityError::DuplicateActiveSession { player, active }),
                    None => self.check_transition(id, SessionState::Activated),
                };
                match outcome {
                    Ok(()) => winner = Some(id),
                    Err(err) => resolution.rejected.push((id, err)),
                }
            }
            if let Some(id) = winner {
                resolution.winners.push(id);
            }
        }

        resolution.winners.sort_unstable();
        resolution.rejected.sort_by_key(|(id, _)| *id);
        resolution
    }

    /// Activate a session bound to `world` with the given starting vitals.
    ///
    /// # Errors
    ///
    /// See [`Self::check_transition`].
    pub fn activate(
        &mut self,
        id: SessionId,
        world: WorldId,
        vitals: EntityVitals,
    ) -> Result<(), EntityError> {
        self.check_transition(id, SessionState::Activated)?;
        let session = self.sessions.get_mut(&id).ok_or(EntityError::SessionNotFound(id))?;
        session.state = SessionState::Activated;
        session.world = Some(world);
        session.vitals = vitals;
        self.active.insert(session.player, id);
        info!(session = %id, player = %session.player, %world, "Session activated");
        Ok(())
    }

    /// Deactivate a session, returning its final runtime state so the
    /// caller can write it back into the player's save.
    ///
    /// # Errors
    ///
    /// See [`Self::check_transition`].
    pub fn deactivate(&mut self, id: SessionId) -> Result<PlayerSession, EntityError> {
        self.check_transition(id, SessionState::Deactivated)?;
        let session = self.sessions.get_mut(&id).ok_or(EntityError::SessionNotFound(id))?;
        let last = session.clone();
        session.state = SessionState::Deactivated;
        session.world = None;
        self.active.remove(&session.player);
        info!(session = %id, player = %session.player, "Session deactivated");
        Ok(last)
    }

    /// Terminate a session and drop it. Final and irreversible: later
    /// lookups of `id` report [`EntityError::SessionNotFound`].
    ///
    /// # Errors
    ///
    /// See [`Self::check_transition`].
    pub fn terminate(&mut self, id: SessionId) -> Result<(), EntityError> {
        self.check_transition(id, SessionState::Terminated)?;
        let session = self.sessions.remove(&id).ok_or(EntityError::SessionNotFound(id))?;
        info!(session = %id, player = %session.player, "Session terminated");
        Ok(())
    }

    /// Number of sessions held, in any live state.
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Whether no session is held.
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Overwrite the live vitals of the activated session of `player`.
    ///
    /// # Errors
    ///
    /// Returns [`EntityError::UnknownIdentity`] if the player has no
    /// activated session.
    pub fn set_vitals(&mut self, player: PlayerId, vitals: EntityVitals) -> Result<(), EntityError> {
        let id = self
            .active
            .get(&player)
            .ok_or(EntityError::UnknownIdentity(player))?;
        let session = self.sessions.get_mut(id).ok_or(EntityError::SessionNotFound(*id))?;
        session.vitals = vitals;
        Ok(())
    }

    /// Sessions attached to `world`, in sequence order.
    pub fn attached_to(&self, world: WorldId) -> Vec<SessionId> {
        self.sessions
            .values()
            .filter(|s| s.world == Some(world))
            .map(|s| s.id)
            .collect()
    }
}
