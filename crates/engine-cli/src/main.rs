use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use engine::EngineConfig;
use engine_cli::cli::{Args, Command};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let project_dir = args
        .project_dir
        .unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));

    match args.command {
        Command::Init => engine_cli::run_init(&project_dir)?,
        Command::Run { entrypoint } => engine_cli::run_supervisor(project_dir, entrypoint).await?,
        Command::Create { from_file } => engine_cli::run_create(&project_dir, &from_file)?,
        Command::List => engine_cli::run_list(&project_dir)?,
        Command::Status => engine_cli::run_status(&project_dir)?,
        Command::Ready { limit } => engine_cli::run_ready(&project_dir, limit)?,
        Command::Blocked { limit } => engine_cli::run_blocked(&project_dir, limit)?,
        Command::Graph => engine_cli::run_graph(&project_dir)?,
        Command::Skip { feature_id } => engine_cli::run_skip(&project_dir, feature_id)?,
        Command::Depend { command } => engine_cli::run_depend(&project_dir, command)?,
        Command::Memory { command } => engine_cli::run_memory(&project_dir, command)?,
        Command::Providers { command } => {
            let config = EngineConfig::load(&project_dir)?.apply_env();
            engine_cli::run_providers(&project_dir, &config, command)?
        }
        Command::LockStatus => engine_cli::run_lock_status(&project_dir)?,
    }

    Ok(())
}
