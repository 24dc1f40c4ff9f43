//! Caelmor server binary.
//!
//! Wires the tick scheduler, the persisted world, the autosave writer,
//! and snapshot publishing together, then runs the simulation loop until
//! the tick limit is reached or the operator stops it.
//!
//! # Startup Sequence
//!
//! 1. Load configuration from `caelmor-config.yaml`
//! 2. Initialize structured logging (tracing)
//! 3. Open the save store and restore, or seed a starter world
//! 4. Activate worlds and NPCs
//! 5. Build the tick pipeline
//! 6. Start the save writer
//! 7. Create operator state and hook Ctrl-C
//! 8. Run the simulation loop
//! 9. Drain the writer and write a final save
//! 10. Log the result

mod callback;
mod error;
mod save_writer;
mod seed;

use std::path::Path;
use std::sync::Arc;

use caelmor_core::config::LoggingSection;
use caelmor_core::runner::log_simulation_end;
use caelmor_core::{
    OperatorState, Runtime, ServerConfig, TickPipeline, WanderDecisionSource, run_simulation,
};
use caelmor_persist::{JsonFileStore, PersistenceCoordinator};
use caelmor_replication::ReplicationGateway;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::callback::{Autosave, ServerCallback};
use crate::error::ServerError;
use crate::save_writer::SaveWriter;

/// Config file, relative to the working directory.
const CONFIG_PATH: &str = "caelmor-config.yaml";

/// How far a wandering NPC may aim from where it stands.
const WANDER_RADIUS: u32 = 3;

/// Application entry point.
///
/// # Errors
///
/// Returns an error if any initialization step or the simulation fails.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 1. Load configuration.
    let (config, from_file) = load_config()?;

    // 2. Initialize structured logging.
    init_logging(&config.logging);
    info!(
        server = config.server.name,
        tick_rate_hz = config.server.tick_rate_hz,
        max_ticks = config.server.max_ticks,
        from_file,
        "caelmor-server starting"
    );

    // 3. Restore the last save, or seed a fresh world.
    let tick_rate_hz = config.server.tick_rate_hz;
    let store_path = &config.persistence.store_path;
    let mut coordinator = PersistenceCoordinator::open(JsonFileStore::new(store_path.clone()))?;
    let mut runtime = if let Some(restored) = Runtime::restore(&coordinator, tick_rate_hz)? {
        info!(
            path = %store_path.display(),
            generation = coordinator.generation(),
            tick = restored.tick(),
            "Save restored"
        );
        restored
    } else {
        info!(path = %store_path.display(), "No save found, seeding starter world");
        let mut fresh = Runtime::new(tick_rate_hz)?;
        seed::seed_runtime(&mut fresh)?;
        let receipt = fresh.save(&mut coordinator)?;
        info!(generation = receipt.generation, "Starter world saved");
        fresh
    };
    let saved_revision = runtime.revision();

    // 4. Activate worlds and NPCs.
    seed::activate_everything(&mut runtime)?;

    // 5. Build the tick pipeline.
    let mut pipeline = TickPipeline::new(Box::new(WanderDecisionSource::new(
        config.simulation.world_seed,
        WANDER_RADIUS,
    )))
    .verify_determinism(config.simulation.verify_determinism);
    info!(
        world_seed = config.simulation.world_seed,
        verify_determinism = config.simulation.verify_determinism,
        "Tick pipeline ready"
    );

    // 6. Start the save writer.
    let (writer, save_tx) = SaveWriter::spawn(coordinator)?;
    let autosave = Autosave::new(
        config.persistence.autosave_interval_ticks,
        saved_revision,
        save_tx,
    );
    let mut callback = ServerCallback::new(
        ReplicationGateway::new(config.replication.broadcast_capacity),
        Some(autosave),
    );

    // 7. Create operator state.
    let operator = Arc::new(OperatorState::new(config.server.max_ticks));
    {
        let operator = Arc::clone(&operator);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Ctrl-C received, stopping after the current tick");
                operator.request_stop();
            }
        });
    }

    // 8. Run the simulation.
    let run = run_simulation(&mut runtime, &mut pipeline, &operator, &mut callback).await;

    // 9. Drain the writer, then save whatever it has not.
    callback.close_autosave();
    let outcome = tokio::task::spawn_blocking(move || writer.join())
        .await
        .map_err(|err| ServerError::SaveWriter {
            message: err.to_string(),
        })??;
    if let Some(revision) = outcome.committed_revision {
        runtime.mark_saved(revision);
    }
    let mut coordinator = outcome.coordinator;
    if runtime.dirty_systems().is_empty() {
        info!(generation = coordinator.generation(), "Nothing left to save");
    } else {
        match runtime.save(&mut coordinator) {
            Ok(receipt) => info!(
                generation = receipt.generation,
                tick = receipt.tick,
                "Final save written"
            ),
            Err(err) => warn!(error = %err, "Final save failed, previous save kept"),
        }
    }

    // 10. Log results.
    let result = run.map_err(ServerError::from)?;
    log_simulation_end(&result);
    info!(
        end_reason = ?result.end_reason,
        total_ticks = result.total_ticks,
        snapshots = callback.snapshots(),
        observers = callback.gateway().observer_count(),
        failed_autosaves = outcome.failed,
        uptime_seconds = operator.uptime_seconds(),
        "caelmor-server shutdown complete"
    );

    Ok(())
}

/// Load `caelmor-config.yaml` from the working directory.
///
/// Falls back to defaults (with environment overrides) when the file
/// does not exist. The flag reports whether the file was used.
fn load_config() -> Result<(ServerConfig, bool), ServerError> {
    let config_path = Path::new(CONFIG_PATH);
    if config_path.exists() {
        Ok((ServerConfig::from_file(config_path)?, true))
    } else {
        let mut config = ServerConfig::default();
        config.apply_env_overrides()?;
        config.validate()?;
        Ok((config, false))
    }
}

/// Install the global subscriber. `RUST_LOG` wins over the config level.
fn init_logging(logging: &LoggingSection) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);
    if logging.json {
        builder.json().init();
    } else {
        builder.init();
    }
}
