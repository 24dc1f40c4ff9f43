//! Starter content for a fresh save and activation of restored content.
//!
//! A restore leaves every world `Loaded` and every NPC `Spawned`; nothing
//! ticks until [`activate_everything`] runs at the first boundary.

use caelmor_core::{BoundaryRequest, Runtime, TickError};
use caelmor_types::{
    EntityVitals, GridPos, ItemId, ItemLocation, ItemRecord, NpcId, NpcRecord, NpcState, WorldId,
    WorldRecord, WorldState, ZoneId, ZoneRecord,
};
use tracing::info;

/// The starter world.
pub const VALE: WorldId = WorldId::from_u128(0xCAE1_0001);
/// Riverside hamlet, the default zone.
pub const HAMLET: ZoneId = ZoneId::from_u128(0xCAE1_0101);
/// Wooded ridge north of the hamlet.
pub const RIDGE: ZoneId = ZoneId::from_u128(0xCAE1_0102);
/// Flooded quarry to the east.
pub const QUARRY: ZoneId = ZoneId::from_u128(0xCAE1_0103);

/// Summary of what [`seed_runtime`] created.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeedSummary {
    /// Zones in the starter world.
    pub zones: usize,
    /// NPCs spawned.
    pub npcs: usize,
    /// Items placed.
    pub items: usize,
}

fn zone(id: ZoneId, name: &str, context: &[(&str, i64)]) -> ZoneRecord {
    ZoneRecord {
        id,
        name: name.to_owned(),
        context: context
            .iter()
            .map(|(key, value)| ((*key).to_owned(), *value))
            .collect(),
    }
}

/// The starter world: one world, three zones.
pub fn starting_world() -> WorldRecord {
    WorldRecord {
        id: VALE,
        name: "Caelmor Vale".to_owned(),
        default_zone: HAMLET,
        zones: vec![
            zone(HAMLET, "Riverside Hamlet", &[("lantern_light", 3)]),
            zone(RIDGE, "Wooded Ridge", &[("fog", 2)]),
            zone(QUARRY, "Flooded Quarry", &[("water_level", 5)]),
        ],
    }
}

/// Seed NPCs, spread across the starter zones.
pub fn starting_npcs() -> Vec<NpcRecord> {
    let roster: [(u128, ZoneId, &str, i32, i32); 6] = [
        (1, HAMLET, "ferryman", 0, 0),
        (2, HAMLET, "lamplighter", 4, 1),
        (3, RIDGE, "woodcutter", -3, 6),
        (4, RIDGE, "herbalist", 2, 8),
        (5, QUARRY, "diver", 9, -2),
        (6, QUARRY, "stonemason", 7, 3),
    ];
    roster
        .iter()
        .map(|(n, home_zone, definition, x, y)| NpcRecord {
            id: NpcId::from_u128(0xCAE1_1000_u128 | n),
            world: VALE,
            home_zone: *home_zone,
            definition: (*definition).to_owned(),
            vitals: EntityVitals {
                position: GridPos::new(*x, *y),
                ..EntityVitals::default()
            },
        })
        .collect()
}

/// World-placed items in the starter zones.
pub fn starting_items() -> Vec<ItemRecord> {
    vec![
        ItemRecord {
            id: ItemId::from_u128(0xCAE1_2001),
            definition: "lantern".to_owned(),
            location: ItemLocation::WorldPlacement {
                world: VALE,
                zone: HAMLET,
                position: GridPos::new(1, 1),
            },
        },
        ItemRecord {
            id: ItemId::from_u128(0xCAE1_2002),
            definition: "rope-coil".to_owned(),
            location: ItemLocation::WorldPlacement {
                world: VALE,
                zone: QUARRY,
                position: GridPos::new(8, 0),
            },
        },
    ]
}

/// Load the starter world into an empty runtime and spawn its content.
///
/// Everything is left inactive; call [`activate_everything`] afterwards.
///
/// # Errors
///
/// Returns the first rejected transition.
pub fn seed_runtime(runtime: &mut Runtime) -> Result<SeedSummary, TickError> {
    let world = starting_world();
    runtime.load_world(&world)?;

    let npcs = starting_npcs();
    let npc_count = npcs.len();
    for record in npcs {
        runtime.apply_now(BoundaryRequest::SpawnNpc {
            record,
            persistent: true,
        })?;
    }

    let items = starting_items();
    let item_count = items.len();
    for record in items {
        runtime.create_item(record)?;
    }

    let summary = SeedSummary {
        zones: world.zones.len(),
        npcs: npc_count,
        items: item_count,
    };
    info!(
        world = %world.id,
        zones = summary.zones,
        npcs = summary.npcs,
        items = summary.items,
        "Starter world seeded"
    );
    Ok(summary)
}

/// Activate every loaded world, then every spawned or dormant NPC.
///
/// Returns `(worlds, npcs)` activated.
///
/// # Errors
///
/// Returns the first rejected activation.
pub fn activate_everything(runtime: &mut Runtime) -> Result<(usize, usize), TickError> {
    let worlds: Vec<WorldId> = runtime
        .arena()
        .worlds()
        .worlds()
        .filter(|w| w.state() == WorldState::Loaded)
        .map(|w| w.id())
        .collect();
    for world in &worlds {
        runtime.activate_world(*world)?;
    }

    let npcs: Vec<NpcId> = runtime
        .arena()
        .npcs()
        .iter()
        .filter(|npc| matches!(npc.state, NpcState::Spawned | NpcState::Dormant))
        .map(|npc| npc.id)
        .collect();
    for npc in &npcs {
        runtime.apply_now(BoundaryRequest::ActivateNpc { npc: *npc })?;
    }

    info!(
        worlds = worlds.len(),
        npcs = npcs.len(),
        "World content activated"
    );
    Ok((worlds.len(), npcs.len()))
}
