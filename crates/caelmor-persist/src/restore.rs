//! Dependency-ordered restore validation.
//!
//! Restore stages one [`PersistSystem`] at a time. A stage is only accepted
//! once all of its prerequisites have been staged, and each stage validates
//! its records against everything staged before it. Any failure discards the
//! whole restore, so nothing downstream ever sees a partially validated
//! payload.

use std::collections::{BTreeMap, BTreeSet};

use caelmor_types::{
    EquipSlot, ItemLocation, MAX_HEALTH, NpcId, PersistSystem, PersistedTruth, PlayerId,
    QuestState, WorldId, ZoneId,
};
use tracing::debug;

use crate::error::PersistError;

/// Persisted truth that passed every restore stage.
///
/// Only [`StagedRestore::finish`] constructs this type, so holding one proves
/// the payload is complete and consistent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedTruth(PersistedTruth);

impl ValidatedTruth {
    /// Borrow the validated records.
    pub const fn truth(&self) -> &PersistedTruth {
        &self.0
    }

    /// Take the validated records.
    pub fn into_inner(self) -> PersistedTruth {
        self.0
    }
}

/// A restore in progress.
#[derive(Debug)]
pub struct StagedRestore {
    truth: PersistedTruth,
    staged: BTreeSet<PersistSystem>,
    players: BTreeSet<PlayerId>,
    zone_world: BTreeMap<ZoneId, WorldId>,
    npcs: BTreeSet<NpcId>,
}

impl StagedRestore {
    /// Begin restoring `truth`.
    pub fn new(mut truth: PersistedTruth) -> Self {
        truth.canonicalize();
        Self {
            truth,
            staged: BTreeSet::new(),
            players: BTreeSet::new(),
            zone_world: BTreeMap::new(),
            npcs: BTreeSet::new(),
        }
    }

    /// Systems staged so far.
    pub fn staged(&self) -> impl Iterator<Item = PersistSystem> + '_ {
        self.staged.iter().copied()
    }

    /// Validate and accept one system.
    ///
    /// # Errors
    ///
    /// Returns [`PersistError::OutOfOrder`] if a prerequisite has not been
    /// staged, or [`PersistError::Inconsistent`] if the records violate an
    /// invariant.
    pub fn stage(&mut self, system: PersistSystem) -> Result<(), PersistError> {
        if let Some(&prerequisite) = system
            .prerequisites()
            .iter()
            .find(|p| !self.staged.contains(*p))
        {
            return Err(PersistError::OutOfOrder {
                system,
                prerequisite,
            });
        }
        if self.staged.contains(&system) {
            return Err(inconsistent(system, "staged twice"));
        }

        match system {
            PersistSystem::IdentitySave => self.stage_identities()?,
            PersistSystem::WorldZone => self.stage_worlds()?,
            PersistSystem::Npc => self.stage_npcs()?,
            PersistSystem::Item => self.stage_items()?,
            PersistSystem::Quest => self.stage_quests()?,
        }
        self.staged.insert(system);
        debug!(?system, "Restore stage validated");
        Ok(())
    }

    /// Finish the restore.
    ///
    /// # Errors
    ///
    /// Returns [`PersistError::RestoreIncomplete`] if any system was not
    /// staged.
    pub fn finish(self) -> Result<ValidatedTruth, PersistError> {
        if let Some(&missing) = PersistSystem::ORDER
            .iter()
            .find(|s| !self.staged.contains(*s))
        {
            return Err(PersistError::RestoreIncomplete(missing));
        }
        Ok(ValidatedTruth(self.truth))
    }

    fn stage_identities(&mut self) -> Result<(), PersistError> {
        let system = PersistSystem::IdentitySave;
        for save in &self.truth.players {
            if !self.players.insert(save.player) {
                return Err(inconsistent(system, format!("duplicate player {}", save.player)));
            }
            if save.vitals.health > MAX_HEALTH {
                return Err(inconsistent(system, format!("player {} health out of range", save.player)));
            }
        }
        Ok(())
    }

    fn stage_worlds(&mut self) -> Result<(), PersistError> {
        let system = PersistSystem::WorldZone;
        let mut worlds = BTreeSet::new();
        for world in &self.truth.worlds {
            if !worlds.insert(world.id) {
                return Err(inconsistent(system, format!("duplicate world {}", world.id)));
            }
            for zone in &world.zones {
                if self.zone_world.insert(zone.id, world.id).is_some() {
                    return Err(inconsistent(system, format!("zone {} owned twice", zone.id)));
                }
                let mut keys = BTreeSet::new();
                if let Some((key, _)) = zone.context.iter().find(|(k, _)| !keys.insert(k)) {
                    return Err(inconsistent(
                        system,
                        format!("zone {} repeats context key {key}", zone.id),
                    ));
                }
            }
            if self.zone_world.get(&world.default_zone) != Some(&world.id) {
                return Err(inconsistent(
                    system,
                    format!("world {} default zone {} not owned", world.id, world.default_zone),
                ));
            }
        }
        for save in &self.truth.players {
            if self.zone_world.get(&save.zone) != Some(&save.world) {
                return Err(inconsistent(
                    system,
                    format!(
                        "player {} resides in zone {} outside world {}",
                        save.player, save.zone, save.world
                    ),
                ));
            }
        }
        Ok(())
    }

    fn stage_npcs(&mut self) -> Result<(), PersistError> {
        let system = PersistSystem::Npc;
        for npc in &self.truth.npcs {
            if !self.npcs.insert(npc.id) {
                return Err(inconsistent(system, format!("duplicate npc {}", npc.id)));
            }
            match self.zone_world.get(&npc.home_zone) {
                Some(world) if *world == npc.world => {}
                _ => {
                    return Err(inconsistent(
                        system,
                        format!(
                            "npc {} references absent world {} or zone {}",
                            npc.id, npc.world, npc.home_zone
                        ),
                    ));
                }
            }
            if npc.vitals.health > MAX_HEALTH {
                return Err(inconsistent(system, format!("npc {} health out of range", npc.id)));
            }
        }
        Ok(())
    }

    fn stage_items(&self) -> Result<(), PersistError> {
        let system = PersistSystem::Item;
        let mut ids = BTreeSet::new();
        let mut slots: BTreeSet<(PlayerId, EquipSlot)> = BTreeSet::new();
        for item in &self.truth.items {
            if !ids.insert(item.id) {
                return Err(inconsistent(system, format!("duplicate item {}", item.id)));
            }
            let valid_owner = match item.location {
                ItemLocation::Inventory { player } => self.players.contains(&player),
                ItemLocation::Equipped { player, slot } => {
                    if !slots.insert((player, slot)) {
                        return Err(inconsistent(
                            system,
                            format!("player {player} has two items in {slot:?}"),
                        ));
                    }
                    self.players.contains(&player)
                }
                ItemLocation::NpcPossession { npc } => self.npcs.contains(&npc),
                ItemLocation::WorldPlacement { world, zone, .. } => {
                    self.zone_world.get(&zone) == Some(&world)
                }
            };
            if !valid_owner {
                return Err(inconsistent(
                    system,
                    format!("item {} has no valid owner at {:?}", item.id, item.location),
                ));
            }
        }
        Ok(())
    }

    fn stage_quests(&self) -> Result<(), PersistError> {
        let system = PersistSystem::Quest;
        let mut ids = BTreeSet::new();
        for quest in &self.truth.quests {
            if !ids.insert(quest.id) {
                return Err(inconsistent(system, format!("duplicate quest {}", quest.id)));
            }
            if !self.players.contains(&quest.owner) {
                return Err(inconsistent(
                    system,
                    format!("quest {} owner {} unknown", quest.id, quest.owner),
                ));
            }
            if quest.state == QuestState::Uninitialized && quest.progress != 0 {
                return Err(inconsistent(
                    system,
                    format!("quest {} has progress before activation", quest.id),
                ));
            }
        }
        Ok(())
    }
}

/// Stage every system in [`PersistSystem::ORDER`].
///
/// # Errors
///
/// Returns the first stage rejection.
pub fn restore_in_order(truth: PersistedTruth) -> Result<ValidatedTruth, PersistError> {
    let mut restore = StagedRestore::new(truth);
    for system in PersistSystem::ORDER {
        restore.stage(system)?;
    }
    restore.finish()
}

fn inconsistent(system: PersistSystem, reason: impl Into<String>) -> PersistError {
    PersistError::Inconsistent {
        system,
        reason: reason.into(),
    }
}
