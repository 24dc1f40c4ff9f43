//! End-to-end tests for the server binary.
//!
//! Runs the built binary in a scratch directory with a bounded tick count,
//! then runs it again to check that the second process resumes from the
//! first one's save instead of reseeding.

#![allow(clippy::unwrap_used)]

use std::path::Path;
use std::process::Command;

use serde_json::Value;

const CONFIG: &str = r#"
server:
  name: "restart-test"
  tick_rate_hz: 1000
  max_ticks: 20
simulation:
  world_seed: 7
  verify_determinism: true
persistence:
  autosave_interval_ticks: 5
logging:
  level: "warn"
"#;

fn run_server(dir: &Path, store: &Path) {
    let status = Command::new(env!("CARGO_BIN_EXE_caelmor-server"))
        .current_dir(dir)
        .env("CAELMOR_STORE_PATH", store)
        .env_remove("CAELMOR_TICK_RATE_HZ")
        .env_remove("RUST_LOG")
        .status()
        .unwrap();
    assert!(status.success(), "server exited with {status}");
}

fn read_save(store: &Path) -> Value {
    serde_json::from_str(&std::fs::read_to_string(store).unwrap()).unwrap()
}

fn as_u64(value: &Value) -> u64 {
    value.as_u64().unwrap()
}

#[test]
fn second_run_resumes_from_first_save() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("caelmor-config.yaml"), CONFIG).unwrap();
    let store = dir.path().join("saves").join("vale.json");

    run_server(dir.path(), &store);
    let first = read_save(&store);
    let first_generation = as_u64(&first["generation"]);
    let first_tick = as_u64(&first["tick"]);
    assert!(first_generation >= 2, "seed save plus at least one more");
    assert!(first_tick > 0 && first_tick <= 20);
    assert_eq!(first["truth"]["worlds"].as_array().unwrap().len(), 1);
    assert_eq!(first["truth"]["npcs"].as_array().unwrap().len(), 6);
    assert_eq!(first["truth"]["items"].as_array().unwrap().len(), 2);

    run_server(dir.path(), &store);
    let second = read_save(&store);
    assert!(as_u64(&second["generation"]) > first_generation);
    let second_tick = as_u64(&second["tick"]);
    assert!(second_tick > first_tick && second_tick <= 40);
    assert_eq!(second["truth"]["npcs"].as_array().unwrap().len(), 6);
    assert!(!store.with_file_name("vale.json.tmp").exists());
}

#[test]
fn missing_config_file_uses_defaults_with_overrides() {
    let dir = tempfile::tempdir().unwrap();
    let store = dir.path().join("default.json");
    let output = Command::new(env!("CARGO_BIN_EXE_caelmor-server"))
        .current_dir(dir.path())
        .env("CAELMOR_STORE_PATH", &store)
        .env("CAELMOR_TICK_RATE_HZ", "0")
        .env_remove("RUST_LOG")
        .output()
        .unwrap();
    assert!(!output.status.success(), "a zero tick rate must be rejected");
    assert!(!store.exists(), "nothing is written before config is valid");
}
