//! The event multiplexer's closed grammar (§4.F).
//!
//! Every worker line is exposed to raw-log subscribers verbatim
//! (redacted). A line additionally matching one of the known prefixes
//! also produces a structured `EngineEvent` for subscribers that only
//! care about feature-tagged activity, spawn confirmations, and
//! terminal markers. Unknown lines only ever reach raw-log subscribers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::worker::Role;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminalOutcome {
    Completed,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event")]
pub enum EngineEvent {
    /// `[Feature #N] ...` — tagged activity for feature N.
    #[serde(rename = "feature_activity")]
    FeatureActivity { feature_id: i64, message: String, timestamp: DateTime<Utc> },

    /// `Started <role> agent for feature #N` — spawn confirmation.
    #[serde(rename = "spawn_confirmed")]
    SpawnConfirmed { role: Role, feature_id: Option<i64>, timestamp: DateTime<Utc> },

    /// `Feature #N <role> (completed|failed)` — terminal marker.
    #[serde(rename = "terminal")]
    Terminal { feature_id: i64, role: Role, outcome: TerminalOutcome, timestamp: DateTime<Utc> },

    /// The orchestrator's own decision log
    /// (`At max capacity`, `Spawning loop: R ready, S slots`), fed to a
    /// separate observability-only channel.
    #[serde(rename = "orchestrator_state")]
    OrchestratorState { message: String, timestamp: DateTime<Utc> },
}

impl EngineEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::FeatureActivity { .. } => "feature_activity",
            Self::SpawnConfirmed { .. } => "spawn_confirmed",
            Self::Terminal { .. } => "terminal",
            Self::OrchestratorState { .. } => "orchestrator_state",
        }
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            Self::FeatureActivity { timestamp, .. }
            | Self::SpawnConfirmed { timestamp, .. }
            | Self::Terminal { timestamp, .. }
            | Self::OrchestratorState { timestamp, .. } => *timestamp,
        }
    }

    pub fn feature_id(&self) -> Option<i64> {
        match self {
            Self::FeatureActivity { feature_id, .. } => Some(*feature_id),
            Self::SpawnConfirmed { feature_id, .. } => *feature_id,
            Self::Terminal { feature_id, .. } => Some(*feature_id),
            Self::OrchestratorState { .. } => None,
        }
    }
}

/// A sanitized raw line, always produced alongside whatever structured
/// event (if any) it also matched.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawLine {
    pub feature_id: Option<i64>,
    pub role: Option<Role>,
    pub line: String,
    pub timestamp: DateTime<Utc>,
}
