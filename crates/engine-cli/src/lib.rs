//! Command implementations for the `engine` binary.
//!
//! Each `run_*` function takes already-parsed arguments plus a resolved
//! project directory and talks to `engine::Store`/`engine::Supervisor`
//! directly. `main.rs` owns argument parsing and process exit codes;
//! everything here returns `anyhow::Result` so command bodies can use
//! `?` freely against both `engine::EngineError` and `serde_json` failures.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use engine::store::{MemoryCategory, NewFeature};
use engine::{EngineConfig, ProjectLock, ProviderCatalog, Store, Supervisor};

pub mod cli;

use cli::{DependCommand, MemoryCommand, ProviderCommand};

fn db_path(project_dir: &Path) -> PathBuf {
    project_dir.join(".engine/features.db")
}

fn open_store(project_dir: &Path) -> Result<Store> {
    Store::open(&db_path(project_dir)).context("opening backlog store")
}

/// Provision `.engine/` under `project_dir`: the sqlite file (created on
/// first open), a default `config.toml`, and a default `providers.json`.
pub fn run_init(project_dir: &Path) -> Result<()> {
    let engine_dir = project_dir.join(".engine");
    std::fs::create_dir_all(&engine_dir).context("creating .engine directory")?;

    let config_path = engine_dir.join("config.toml");
    if !config_path.exists() {
        let config = EngineConfig::default();
        let text = toml::to_string_pretty(&config).context("serializing default config")?;
        std::fs::write(&config_path, text).context("writing config.toml")?;
    }

    // Opening the store creates the sqlite file and runs migrations.
    let _ = open_store(project_dir)?;

    let providers_path = project_dir.join(&EngineConfig::default().providers_file);
    let _ = ProviderCatalog::load(&providers_path)?;

    println!("initialized project at {}", project_dir.display());
    Ok(())
}

/// Start the orchestrator loop and block until the backlog is complete
/// or shutdown is requested (Ctrl-C).
pub async fn run_supervisor(project_dir: PathBuf, entrypoint: PathBuf) -> Result<()> {
    let mut supervisor = Supervisor::new(project_dir, entrypoint).context("starting orchestrator")?;

    let mut events = supervisor.events().subscribe_structured();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            tracing::info!(event = event.event_type(), "{:?}", event);
        }
    });

    tokio::select! {
        outcome = supervisor.run() => {
            let outcome = outcome.context("orchestrator loop")?;
            println!("run finished: {outcome:?}");
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutdown requested");
            supervisor.request_shutdown();
            supervisor.run().await.context("draining on shutdown")?;
        }
    }
    Ok(())
}

/// Bulk-create features from a JSON file shaped as a list of objects
/// `{category, name, description, steps, depends_on_indices}`.
pub fn run_create(project_dir: &Path, from_file: &Path) -> Result<()> {
    #[derive(serde::Deserialize)]
    struct RawEntry {
        category: String,
        name: String,
        description: String,
        #[serde(default)]
        steps: Vec<String>,
        #[serde(default)]
        depends_on_indices: Vec<usize>,
    }

    let text = std::fs::read_to_string(from_file)
        .with_context(|| format!("reading {}", from_file.display()))?;
    let raw: Vec<RawEntry> = serde_json::from_str(&text).context("parsing feature batch")?;
    if raw.is_empty() {
        bail!("feature batch is empty");
    }

    let entries: Vec<NewFeature> = raw
        .into_iter()
        .map(|e| NewFeature {
            category: e.category,
            name: e.name,
            description: e.description,
            steps: e.steps,
            depends_on_indices: e.depends_on_indices,
        })
        .collect();

    let mut store = open_store(project_dir)?;
    let outcome = store.create_features_bulk(&entries)?;
    println!(
        "created {} features ({} with dependencies)",
        outcome.created.len(),
        outcome.with_dependencies
    );
    Ok(())
}

pub fn run_list(project_dir: &Path) -> Result<()> {
    let store = open_store(project_dir)?;
    for f in store.list_all()? {
        println!(
            "#{:<5} [{}] {}{}  {}",
            f.id,
            if f.passes { "x" } else if f.in_progress { "~" } else { " " },
            f.name,
            if f.dependencies.is_empty() { String::new() } else { format!(" deps={:?}", f.dependencies) },
            f.category,
        );
    }
    Ok(())
}

pub fn run_status(project_dir: &Path) -> Result<()> {
    let store = open_store(project_dir)?;
    let stats = store.get_stats()?;
    println!("total: {}", stats.total);
    println!("passing: {}", stats.passing);
    println!("in_progress: {}", stats.in_progress);
    if stats.total > 0 {
        println!("progress: {:.1}%", 100.0 * stats.passing as f64 / stats.total as f64);
    }
    Ok(())
}

pub fn run_ready(project_dir: &Path, limit: usize) -> Result<()> {
    let store = open_store(project_dir)?;
    for f in store.ready_features(limit)? {
        println!("#{} {} ({})", f.id, f.name, f.category);
    }
    Ok(())
}

pub fn run_blocked(project_dir: &Path, limit: usize) -> Result<()> {
    let store = open_store(project_dir)?;
    for b in store.blocked_features(limit)? {
        println!("#{} {} blocked by {:?}", b.feature.id, b.feature.name, b.blocking);
    }
    Ok(())
}

pub fn run_graph(project_dir: &Path) -> Result<()> {
    let store = open_store(project_dir)?;
    let graph = store.graph()?;
    let text = serde_json::to_string_pretty(&graph).context("serializing graph")?;
    println!("{text}");
    Ok(())
}

pub fn run_skip(project_dir: &Path, id: i64) -> Result<()> {
    let mut store = open_store(project_dir)?;
    store.skip(id)?;
    println!("feature #{id} moved to back of queue");
    Ok(())
}

pub fn run_depend(project_dir: &Path, command: DependCommand) -> Result<()> {
    let mut store = open_store(project_dir)?;
    match command {
        DependCommand::Add { feature_id, depends_on } => {
            store.add_dependency(feature_id, depends_on)?;
            println!("feature #{feature_id} now depends on #{depends_on}");
        }
        DependCommand::Remove { feature_id, depends_on } => {
            store.remove_dependency(feature_id, depends_on)?;
            println!("feature #{feature_id} no longer depends on #{depends_on}");
        }
        DependCommand::Set { feature_id, depends_on } => {
            store.set_dependencies(feature_id, &depends_on)?;
            println!("feature #{feature_id} dependencies set to {depends_on:?}");
        }
    }
    Ok(())
}

pub fn run_memory(project_dir: &Path, command: MemoryCommand) -> Result<()> {
    let mut store = open_store(project_dir)?;
    match command {
        MemoryCommand::Store { category, key, value, feature_id } => {
            let category = parse_category(&category)?;
            let id = store.store_memory(category, &key, &value, feature_id)?;
            println!("stored memory #{id}");
        }
        MemoryCommand::Recall { category, feature_id } => {
            let entries = match feature_id {
                Some(id) => store.recall_memory_for_feature(id)?,
                None => store.recall_memory(parse_category(&category.context("category is required without --feature-id")?)?)?,
            };
            for e in entries {
                println!("[{}] {} = {}", e.category, e.memory_key, e.value);
            }
        }
    }
    Ok(())
}

fn parse_category(s: &str) -> Result<MemoryCategory> {
    Ok(match s {
        "decision" => MemoryCategory::Decision,
        "pattern" => MemoryCategory::Pattern,
        "learning" => MemoryCategory::Learning,
        "architecture" => MemoryCategory::Architecture,
        "spec_constraint" => MemoryCategory::SpecConstraint,
        other => bail!("unknown memory category '{other}'"),
    })
}

pub fn run_providers(project_dir: &Path, config: &EngineConfig, command: ProviderCommand) -> Result<()> {
    let providers_path = project_dir.join(&config.providers_file);
    match command {
        ProviderCommand::List => {
            let catalog = ProviderCatalog::load(&providers_path)?;
            for (name, profile) in &catalog.profiles {
                let active = catalog.active.as_deref() == Some(name.as_str());
                println!(
                    "{}{} — {} (credentials: {})",
                    if active { "* " } else { "  " },
                    name,
                    profile.description,
                    if profile.has_credentials() { "ok" } else { "missing" },
                );
            }
        }
        ProviderCommand::Use { name } => {
            let mut catalog = ProviderCatalog::load(&providers_path)?;
            if !catalog.profiles.contains_key(&name) {
                bail!("no such provider profile '{name}'");
            }
            catalog.active = Some(name.clone());
            catalog.save(&providers_path)?;
            println!("active provider set to {name}");
        }
    }
    Ok(())
}

/// Diagnose whether this project's lock is currently held by a live
/// orchestrator, without itself taking the lock.
pub fn run_lock_status(project_dir: &Path) -> Result<()> {
    match ProjectLock::acquire(project_dir) {
        Ok(_lock) => println!("lock is free (acquired and released as a probe)"),
        Err(e) => println!("lock is held: {e}"),
    }
    Ok(())
}
