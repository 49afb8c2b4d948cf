//! Clap argument surface for the `engine` binary.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Project directory; defaults to the current directory.
    #[arg(long, global = true)]
    pub project_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Provision `.engine/` (config, providers, backlog database) under the project directory.
    Init,

    /// Start the orchestrator loop and block until the backlog is complete or interrupted.
    Run {
        /// Path to the worker entrypoint executable.
        #[arg(long)]
        entrypoint: PathBuf,
    },

    /// Bulk-create features from a JSON file.
    Create {
        /// JSON file containing a list of feature entries.
        #[arg(long)]
        from_file: PathBuf,
    },

    /// List every feature in the backlog.
    List,

    /// Print aggregate backlog counters.
    Status,

    /// List features currently eligible for dispatch.
    Ready {
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },

    /// List features blocked on an unmet dependency.
    Blocked {
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },

    /// Print the dependency graph as JSON.
    Graph,

    /// Move a feature to the back of the priority queue.
    Skip {
        feature_id: i64,
    },

    /// Mutate a feature's dependency edges.
    Depend {
        #[command(subcommand)]
        command: DependCommand,
    },

    /// Store or recall an agent memory slot.
    Memory {
        #[command(subcommand)]
        command: MemoryCommand,
    },

    /// Inspect or switch the active provider profile.
    Providers {
        #[command(subcommand)]
        command: ProviderCommand,
    },

    /// Report whether the project lock is currently held.
    LockStatus,
}

#[derive(Subcommand, Debug)]
pub enum DependCommand {
    /// Add a single dependency edge.
    Add {
        feature_id: i64,
        depends_on: i64,
    },
    /// Remove a single dependency edge.
    Remove {
        feature_id: i64,
        depends_on: i64,
    },
    /// Replace a feature's full dependency set.
    Set {
        feature_id: i64,
        #[arg(required = true)]
        depends_on: Vec<i64>,
    },
}

#[derive(Subcommand, Debug)]
pub enum MemoryCommand {
    /// Store a value in a named memory slot.
    Store {
        category: String,
        key: String,
        value: String,
        #[arg(long)]
        feature_id: Option<i64>,
    },
    /// Recall current memory slot values, either by category or by feature.
    Recall {
        #[arg(long)]
        category: Option<String>,
        #[arg(long)]
        feature_id: Option<i64>,
    },
}

#[derive(Subcommand, Debug)]
pub enum ProviderCommand {
    /// List configured provider profiles.
    List,
    /// Switch the active provider profile.
    Use { name: String },
}
