//! Save participants backed by the live runtime.

use caelmor_persist::SaveParticipant;
use caelmor_types::{PersistSystem, PersistedTruth, TickPhase};

use crate::runtime::Runtime;

/// One persisted system's view of the runtime during a save poll.
#[derive(Debug, Clone, Copy)]
pub struct RuntimeParticipant<'a> {
    runtime: &'a Runtime,
    system: PersistSystem,
}

impl<'a> RuntimeParticipant<'a> {
    /// Participant for `system`.
    pub const fn new(runtime: &'a Runtime, system: PersistSystem) -> Self {
        Self { runtime, system }
    }
}

impl SaveParticipant for RuntimeParticipant<'_> {
    fn system(&self) -> PersistSystem {
        self.system
    }

    fn check_ready(&self) -> Result<(), String> {
        let phase = self.runtime.phase();
        if phase != TickPhase::Boundary {
            return Err(format!("tick open in phase {phase:?}"));
        }
        if self
            .runtime
            .requests
            .pending_systems()
            .contains(&self.system)
        {
            return Err("transition pending for the next boundary".to_owned());
        }
        // A PlayerSave may only be written while its session is inactive.
        if self.system == PersistSystem::IdentitySave
            && self.runtime.arena().sessions().any_activated()
        {
            return Err("a session is activated".to_owned());
        }
        Ok(())
    }

    fn contribute(&self, truth: &mut PersistedTruth) {
        self.runtime.arena().contribute(self.system, truth);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use caelmor_types::{NpcId, WorldId, WorldRecord, ZoneId, ZoneRecord};

    use super::*;
    use crate::requests::BoundaryRequest;

    #[test]
    fn pending_transition_blocks_only_its_system() {
        let mut runtime = Runtime::new(10).unwrap();
        runtime
            .load_world(&WorldRecord {
                id: WorldId::from_u128(1),
                name: "w1".to_owned(),
                default_zone: ZoneId::from_u128(1),
                zones: vec![ZoneRecord {
                    id: ZoneId::from_u128(1),
                    name: "z1".to_owned(),
                    context: Vec::new(),
                }],
            })
            .unwrap();
        runtime
            .request(BoundaryRequest::UnloadWorld {
                world: WorldId::from_u128(1),
            })
            .unwrap();

        let world = RuntimeParticipant::new(&runtime, PersistSystem::WorldZone);
        let npc = RuntimeParticipant::new(&runtime, PersistSystem::Npc);
        assert!(world.check_ready().is_err());
        assert!(npc.check_ready().is_ok());

        let mut truth = PersistedTruth::default();
        world.contribute(&mut truth);
        assert_eq!(truth.worlds.len(), 1);
        assert!(runtime.arena().npcs().get(NpcId::from_u128(1)).is_none());
    }
}
