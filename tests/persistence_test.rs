mod helpers;

use helpers::run_conversation;
use mnema::cli::{load_engine, save_engine};
use mnema::config::MnemaConfig;
use mnema::engine::message::Role;

#[test]
fn state_file_round_trip_resumes_the_conversation() {
    let dir = tempfile::tempdir().unwrap();
    let state_path = dir.path().join("state.json");
    let config = MnemaConfig::default();

    let mut engine = load_engine(&config, &state_path).unwrap();
    run_conversation(
        &mut engine,
        &[
            (Role::User, "Why does the importer choke on UTF-16 files?"),
            (
                Role::Assistant,
                "The importer chokes on UTF-16 because it assumes UTF-8 without sniffing",
            ),
        ],
    );
    save_engine(&engine, &state_path).unwrap();
    assert!(state_path.exists());

    let resumed = load_engine(&config, &state_path).unwrap();
    assert_eq!(resumed.tree().len(), engine.tree().len());
    assert_eq!(resumed.graph().len(), engine.graph().len());
    assert_eq!(resumed.current_version(), engine.current_version());
    resumed.tree().check_invariants().unwrap();
}

#[test]
fn resumed_engine_keeps_ingesting() {
    let dir = tempfile::tempdir().unwrap();
    let state_path = dir.path().join("state.json");
    let config = MnemaConfig::default();

    let mut engine = load_engine(&config, &state_path).unwrap();
    run_conversation(
        &mut engine,
        &[(Role::User, "first session covered the retry policy")],
    );
    save_engine(&engine, &state_path).unwrap();

    let mut resumed = load_engine(&config, &state_path).unwrap();
    run_conversation(
        &mut resumed,
        &[(Role::User, "second session revisits the retry policy backoff")],
    );
    assert_eq!(resumed.tree().len(), 2);
    assert_eq!(resumed.current_version(), engine.current_version() + 1);
}

#[test]
fn missing_state_file_starts_fresh() {
    let dir = tempfile::tempdir().unwrap();
    let state_path = dir.path().join("nonexistent").join("state.json");
    let engine = load_engine(&MnemaConfig::default(), &state_path).unwrap();
    assert!(engine.tree().is_empty());
    assert_eq!(engine.current_version(), 1);
}

#[test]
fn save_creates_missing_parent_directories() {
    let dir = tempfile::tempdir().unwrap();
    let state_path = dir.path().join("nested").join("deeper").join("state.json");
    let engine = load_engine(&MnemaConfig::default(), &state_path).unwrap();
    save_engine(&engine, &state_path).unwrap();
    assert!(state_path.exists());
}
