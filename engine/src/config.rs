//! Layered configuration (§10.3).
//!
//! Resolution order, lowest to highest priority: compiled defaults, an
//! optional `.engine/config.toml` under the project directory, then
//! `ENGINE_*` environment variables, then CLI flags. This module only
//! owns the first two layers plus the merge; env/CLI overlay is applied
//! by the caller (`engine-cli`) since only it knows about `clap`.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Global concurrency cap `C` on live coding/testing/reviewer workers.
    pub max_concurrency: usize,
    /// Ratio cap testing:coding ≤ R.
    pub testing_to_coding_ratio: f64,
    /// Whether `reviewer` workers are ever spawned.
    pub review_mode: bool,
    /// Feature batch size handed to a single `coding` worker.
    pub batch_size: usize,
    /// Seconds between orchestrator ticks.
    pub tick_interval_secs: u64,
    /// Total shutdown budget in seconds before remaining workers are killed.
    pub shutdown_budget_secs: u64,
    /// Path (relative to the project dir) to the providers catalog.
    pub providers_file: PathBuf,
    /// Consecutive non-rate-limit errors for a role's gate before the
    /// in-flight feature is reported as a permanent per-feature failure.
    pub max_retries: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 4,
            testing_to_coding_ratio: 0.5,
            review_mode: false,
            batch_size: 1,
            tick_interval_secs: 1,
            shutdown_budget_secs: 30,
            providers_file: PathBuf::from(".engine/providers.json"),
            max_retries: 5,
        }
    }
}

const CONFIG_RELATIVE_PATH: &str = ".engine/config.toml";

impl EngineConfig {
    /// Load defaults layered with `<project_dir>/.engine/config.toml`
    /// if present. A missing file is not an error; a malformed one is.
    pub fn load(project_dir: &Path) -> EngineResult<Self> {
        let path = project_dir.join(CONFIG_RELATIVE_PATH);
        if !path.exists() {
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(&path)?;
        toml::from_str(&text).map_err(|e| EngineError::Config { message: format!("{}: {e}", path.display()) })
    }

    /// Apply `ENGINE_*` environment variable overrides on top of the
    /// file-resolved config. Unknown `ENGINE_*` vars are ignored rather
    /// than rejected, since operators may export vars destined for the
    /// worker subprocess, not the orchestrator itself.
    pub fn apply_env(mut self) -> Self {
        if let Ok(v) = std::env::var("ENGINE_MAX_CONCURRENCY") {
            if let Ok(parsed) = v.parse() {
                self.max_concurrency = parsed;
            }
        }
        if let Ok(v) = std::env::var("ENGINE_TESTING_TO_CODING_RATIO") {
            if let Ok(parsed) = v.parse() {
                self.testing_to_coding_ratio = parsed;
            }
        }
        if let Ok(v) = std::env::var("ENGINE_REVIEW_MODE") {
            self.review_mode = matches!(v.as_str(), "1" | "true" | "yes");
        }
        if let Ok(v) = std::env::var("ENGINE_BATCH_SIZE") {
            if let Ok(parsed) = v.parse() {
                self.batch_size = parsed;
            }
        }
        if let Ok(v) = std::env::var("ENGINE_MAX_RETRIES") {
            if let Ok(parsed) = v.parse() {
                self.max_retries = parsed;
            }
        }
        self
    }
}
