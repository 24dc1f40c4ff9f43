//! Quest instances: `Uninitialized -> Active -> {Completed | Failed | Abandoned}`.
//!
//! Quests are owned by a player identity, never by a session or a world,
//! and have no zone residency.

use std::collections::BTreeMap;

use caelmor_types::{PlayerId, QuestId, QuestRecord, QuestState};
use tracing::info;

use crate::error::EntityError;

/// Registry of quest instances.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QuestRegistry {
    quests: BTreeMap<QuestId, QuestRecord>,
}

impl QuestRegistry {
    /// Create an empty registry.
    pub const fn new() -> Self {
        Self {
            quests: BTreeMap::new(),
        }
    }

    /// Insert a quest.
    ///
    /// # Errors
    ///
    /// Returns [`EntityError::DuplicateQuest`] if the id exists.
    pub fn insert(&mut self, record: QuestRecord) -> Result<(), EntityError> {
        if self.quests.contains_key(&record.id) {
            return Err(EntityError::DuplicateQuest(record.id));
        }
        self.quests.insert(record.id, record);
        Ok(())
    }

    /// Look up a quest.
    pub fn get(&self, id: QuestId) -> Option<&QuestRecord> {
        self.quests.get(&id)
    }

    /// Quests owned by `player`, in id order.
    pub fn owned_by(&self, player: PlayerId) -> Vec<&QuestRecord> {
        self.quests.values().filter(|q| q.owner == player).collect()
    }

    /// Check a transition without applying it.
    ///
    /// # Errors
    ///
    /// Returns [`EntityError::QuestNotFound`] or
    /// [`EntityError::IllegalQuestTransition`].
    pub fn check_transition(&self, id: QuestId, next: QuestState) -> Result<&QuestRecord, EntityError> {
        let quest = self.quests.get(&id).ok_or(EntityError::QuestNotFound(id))?;
        if !quest.state.can_transition_to(next) {
            return Err(EntityError::IllegalQuestTransition {
                quest: id,
                from: quest.state,
                to: next,
            });
        }
        Ok(quest)
    }

    /// The single driver of the quest state machine.
    ///
    /// # Errors
    ///
    /// See [`Self::check_transition`].
    pub fn transition(&mut self, id: QuestId, next: QuestState) -> Result<QuestState, EntityError> {
        let from = self.check_transition(id, next)?.state;
        if let Some(quest) = self.quests.get_mut(&id) {
            quest.state = next;
        }
        info!(quest = %id, ?from, to = ?next, "Quest transitioned");
        Ok(from)
    }

    /// Compute progress after adding `delta`, without applying it.
    ///
    /// # Errors
    ///
    /// Returns [`EntityError::QuestNotActive`] unless the quest is active and
    /// [`EntityError::ProgressOverflow`] on overflow.
    pub fn check_progress(&self, id: QuestId, delta: u32) -> Result<u32, EntityError> {
        let quest = self.quests.get(&id).ok_or(EntityError::QuestNotFound(id))?;
        if quest.state != QuestState::Active {
            return Err(EntityError::QuestNotActive {
                quest: id,
                state: quest.state,
            });
        }
        quest
            .progress
            .checked_add(delta)
            .ok_or(EntityError::ProgressOverflow(id))
    }

    /// Set progress to a value validated by [`Self::check_progress`].
    ///
    /// # Errors
    ///
    /// Returns [`EntityError::QuestNotFound`].
    pub fn set_progress(&mut self, id: QuestId, progress: u32) -> Result<(), EntityError> {
        let quest = self.quests.get_mut(&id).ok_or(EntityError::QuestNotFound(id))?;
        quest.progress = progress;
        Ok(())
    }

    /// Persisted records in id order.
    pub fn records(&self) -> Vec<QuestRecord> {
        self.quests.values().cloned().collect()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn quest() -> QuestRecord {
        QuestRecord {
            id: QuestId::from_u128(1),
            owner: PlayerId::from_u128(1),
            definition: "lost-lantern".to_owned(),
            state: QuestState::Uninitialized,
            progress: 0,
        }
    }

    #[test]
    fn progress_requires_active_quest() {
        let mut registry = QuestRegistry::new();
        registry.insert(quest()).unwrap();
        let id = QuestId::from_u128(1);
        assert!(registry.check_progress(id, 1).is_err());
        registry.transition(id, QuestState::Active).unwrap();
        assert_eq!(registry.check_progress(id, 3).unwrap(), 3);
    }

    #[test]
    fn completed_quest_absorbs() {
        let mut registry = QuestRegistry::new();
        registry.insert(quest()).unwrap();
        let id = QuestId::from_u128(1);
        registry.transition(id, QuestState::Active).unwrap();
        registry.transition(id, QuestState::Completed).unwrap();
        assert!(registry.transition(id, QuestState::Abandoned).is_err());
        assert_eq!(registry.get(id).map(|q| q.state), Some(QuestState::Completed));
    }
}
