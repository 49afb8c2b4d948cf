//! Smoke tests over the command implementations, exercised the way
//! `main.rs` calls them but without going through `clap` parsing.

use std::io::Write;

#[test]
fn init_provisions_engine_directory_and_default_files() {
    let dir = tempfile::tempdir().unwrap();
    engine_cli::run_init(dir.path()).unwrap();

    assert!(dir.path().join(".engine").is_dir());
    assert!(dir.path().join(".engine/config.toml").exists());
    assert!(dir.path().join(".engine/features.db").exists());
    assert!(dir.path().join(".engine/providers.json").exists());
}

#[test]
fn create_then_list_then_status_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    engine_cli::run_init(dir.path()).unwrap();

    let batch_path = dir.path().join("batch.json");
    let mut f = std::fs::File::create(&batch_path).unwrap();
    write!(
        f,
        r#"[
            {{"category": "core", "name": "f0", "description": "d"}},
            {{"category": "core", "name": "f1", "description": "d", "depends_on_indices": [0]}}
        ]"#
    )
    .unwrap();

    engine_cli::run_create(dir.path(), &batch_path).unwrap();
    // list/status/ready/blocked/graph all just need to not error against a
    // freshly populated backlog.
    engine_cli::run_list(dir.path()).unwrap();
    engine_cli::run_status(dir.path()).unwrap();
    engine_cli::run_ready(dir.path(), 10).unwrap();
    engine_cli::run_blocked(dir.path(), 10).unwrap();
    engine_cli::run_graph(dir.path()).unwrap();
}

#[test]
fn create_rejects_an_empty_batch() {
    let dir = tempfile::tempdir().unwrap();
    engine_cli::run_init(dir.path()).unwrap();

    let batch_path = dir.path().join("empty.json");
    std::fs::write(&batch_path, "[]").unwrap();

    let err = engine_cli::run_create(dir.path(), &batch_path).unwrap_err();
    assert!(err.to_string().contains("empty"));
}

#[test]
fn memory_store_then_recall_round_trips_through_the_cli_layer() {
    let dir = tempfile::tempdir().unwrap();
    engine_cli::run_init(dir.path()).unwrap();

    engine_cli::run_memory(
        dir.path(),
        engine_cli::cli::MemoryCommand::Store {
            category: "decision".into(),
            key: "auth-strategy".into(),
            value: "oauth2".into(),
            feature_id: None,
        },
    )
    .unwrap();

    engine_cli::run_memory(
        dir.path(),
        engine_cli::cli::MemoryCommand::Recall { category: Some("decision".into()), feature_id: None },
    )
    .unwrap();
}

#[test]
fn providers_list_reports_the_seeded_defaults() {
    let dir = tempfile::tempdir().unwrap();
    engine_cli::run_init(dir.path()).unwrap();
    let config = engine::EngineConfig::load(dir.path()).unwrap();
    engine_cli::run_providers(dir.path(), &config, engine_cli::cli::ProviderCommand::List).unwrap();
    engine_cli::run_providers(
        dir.path(),
        &config,
        engine_cli::cli::ProviderCommand::Use { name: "claude-api".into() },
    )
    .unwrap();
}
