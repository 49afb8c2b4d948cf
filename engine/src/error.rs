//! Crate-wide error taxonomy.
//!
//! The store, resolver, worker abstraction, and orchestrator all return
//! `Result<T, EngineError>`. Call sites match on [`EngineError::kind`]
//! rather than on variant identity or message text, so the four-way
//! taxonomy (transient / constraint / fatal / programmer) stays a single
//! dispatch point instead of being re-derived at every call site.

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias used throughout the crate.
pub type EngineResult<T> = Result<T, EngineError>;

/// Which of the four error classes a given [`EngineError`] belongs to.
///
/// See the error handling design: transient errors are retried locally,
/// constraint violations cause the offending feature to be skipped,
/// fatal errors terminate the orchestrator loop, and programmer errors
/// are returned to the offending caller without affecting anything else.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Transient,
    Constraint,
    Fatal,
    Programmer,
}

#[derive(Error, Debug)]
pub enum EngineError {
    /// The backlog store could not acquire its write lock within the
    /// configured timeout.
    #[error("store lock timed out after {waited_ms}ms")]
    LockTimeout { waited_ms: u64 },

    /// A worker process crashed or exited with a non-zero status during
    /// otherwise-normal operation.
    #[error("worker for feature {feature_id:?} crashed: {message}")]
    WorkerCrashed {
        feature_id: Option<i64>,
        message: String,
    },

    /// A worker signalled (or the store detected) that an upstream LLM
    /// provider is rate-limiting requests.
    #[error("rate limited, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    /// The requested feature, dependency, or memory row does not exist.
    #[error("not found: {what}")]
    NotFound { what: String },

    /// A dependency-graph or state-machine constraint was violated:
    /// self-reference, cycle, dependency count limit, or an operation
    /// attempted against a feature in the wrong state.
    #[error("constraint violation: {message}")]
    Constraint { message: String },

    /// A feature transitioned into a terminal failure state after
    /// exhausting retries (surfaced but non-fatal to the orchestrator).
    #[error("feature {feature_id} permanently failed: {message}")]
    PermanentFeatureFailure { feature_id: i64, message: String },

    /// The initializer role could not produce any features, the store
    /// failed to open, or the project lock is held by a live competitor.
    #[error("fatal: {message}")]
    Fatal { message: String },

    /// Cycle insertion, forward dependency reference, or an unknown
    /// role name — caller error, never affects other in-flight work.
    #[error("programmer error: {message}")]
    Programmer { message: String },

    /// Another orchestrator already holds the project lock.
    #[error("project already has a running orchestrator (pid {pid})")]
    AlreadyRunning { pid: u32 },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("invalid configuration: {message}")]
    Config { message: String },

    #[error("path has no parent directory: {0}")]
    NoParentDir(PathBuf),
}

impl EngineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::LockTimeout { .. } | Self::WorkerCrashed { .. } | Self::RateLimited { .. } => {
                ErrorKind::Transient
            }
            Self::NotFound { .. } | Self::Constraint { .. } | Self::PermanentFeatureFailure { .. } => {
                ErrorKind::Constraint
            }
            Self::Fatal { .. } | Self::AlreadyRunning { .. } | Self::Config { .. } => {
                ErrorKind::Fatal
            }
            Self::Programmer { .. } => ErrorKind::Programmer,
            Self::Io(_) | Self::Sqlite(_) | Self::NoParentDir(_) => ErrorKind::Transient,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Transient
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound { what: what.into() }
    }

    pub fn constraint(message: impl Into<String>) -> Self {
        Self::Constraint {
            message: message.into(),
        }
    }

    pub fn programmer(message: impl Into<String>) -> Self {
        Self::Programmer {
            message: message.into(),
        }
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        Self::Fatal {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_groups_match_taxonomy() {
        assert_eq!(EngineError::LockTimeout { waited_ms: 1 }.kind(), ErrorKind::Transient);
        assert_eq!(EngineError::not_found("feature 9").kind(), ErrorKind::Constraint);
        assert_eq!(EngineError::fatal("store open failed").kind(), ErrorKind::Fatal);
        assert_eq!(EngineError::programmer("cycle").kind(), ErrorKind::Programmer);
    }

    #[test]
    fn only_transient_is_retryable() {
        assert!(EngineError::RateLimited { retry_after_secs: 5 }.is_retryable());
        assert!(!EngineError::constraint("dup edge").is_retryable());
        assert!(!EngineError::fatal("x").is_retryable());
    }
}
