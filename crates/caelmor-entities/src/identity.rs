//! Player identities and their loaded saves.
//!
//! Identities are server-assigned and immutable. Each owns exactly one
//! [`PlayerSave`]. A save is only rewritten at a legal boundary, which the
//! tick scheduler enforces before calling [`IdentityRegistry::write_back`].

use std::collections::BTreeMap;

use caelmor_types::{PlayerId, PlayerSave};
use tracing::debug;

use crate::error::EntityError;

/// Registry of known identities and their saves.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IdentityRegistry {
    saves: BTreeMap<PlayerId, PlayerSave>,
}

impl IdentityRegistry {
    /// Create an empty registry.
    pub const fn new() -> Self {
        Self {
            saves: BTreeMap::new(),
        }
    }

    /// Register an identity together with its save.
    ///
    /// # Errors
    ///
    /// Returns [`EntityError::DuplicateIdentity`] if the identity exists.
    pub fn register(&mut self, save: PlayerSave) -> Result<(), EntityError> {
        if self.saves.contains_key(&save.player) {
            return Err(EntityError::DuplicateIdentity(save.player));
        }
        debug!(player = %save.player, "Identity registered");
        self.saves.insert(save.player, save);
        Ok(())
    }

    /// Whether the identity is known.
    pub fn is_valid(&self, player: PlayerId) -> bool {
        self.saves.contains_key(&player)
    }

    /// The loaded save of an identity.
    ///
    /// # Errors
    ///
    /// Returns [`EntityError::MissingSave`] if none is loaded.
    pub fn save(&self, player: PlayerId) -> Result<&PlayerSave, EntityError> {
        self.saves.get(&player).ok_or(EntityError::MissingSave(player))
    }

    /// Replace the save of an existing identity.
    ///
    /// # Errors
    ///
    /// Returns [`EntityError::UnknownIdentity`] if the identity is unknown.
    pub fn write_back(&mut self, save: PlayerSave) -> Result<(), EntityError> {
        let slot = self
            .saves
            .get_mut(&save.player)
            .ok_or(EntityError::UnknownIdentity(save.player))?;
        *slot = save;
        Ok(())
    }

    /// Number of identities.
    pub fn len(&self) -> usize {
        self.saves.len()
    }

    /// Whether there are no identities.
    pub fn is_empty(&self) -> bool {
        self.saves.is_empty()
    }

    /// All saves in identity order.
    pub fn records(&self) -> Vec<PlayerSave> {
        self.saves.values().cloned().collect()
    }
}
