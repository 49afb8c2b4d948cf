//! Worker roles and their fixed per-variant tables (§4.C).
//!
//! The original implementation dispatches on string role names through
//! per-role lookup dictionaries; here the lookup tables become static
//! match arms over a closed enum, so an unknown role is a compile error
//! rather than a missing-dictionary-key runtime surprise.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Initializer,
    Coding,
    Testing,
    Reviewer,
    /// A variant of `Initializer` that only writes memories, never
    /// creates features.
    Architect,
}

/// The upstream model tier a role's prompt is sized for. Resolved to a
/// concrete model id by the active provider profile (`crate::provider`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelTier {
    Initializer,
    Coding,
    Testing,
}

/// Feature-store operations a role's worker is permitted to invoke over
/// the local IPC surface (§6). Enforced by the IPC dispatcher, not by
/// the worker itself — a worker is an untrusted subprocess.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreOp {
    CreateBulk,
    Create,
    AddDependency,
    SetDependencies,
    GetById,
    GetSummary,
    ClaimAndGet,
    MarkInProgress,
    MarkPassing,
    MarkFailing,
    MarkForReview,
    Skip,
    ClearInProgress,
    Approve,
    Reject,
    MemoryStore,
    MemoryRecall,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Initializer => "initializer",
            Self::Coding => "coding",
            Self::Testing => "testing",
            Self::Reviewer => "reviewer",
            Self::Architect => "architect",
        }
    }

    pub fn max_turns(self) -> u32 {
        match self {
            Self::Initializer => 300,
            Self::Coding => 300,
            Self::Testing => 100,
            Self::Reviewer => 50,
            Self::Architect => 200,
        }
    }

    pub fn model_tier(self) -> ModelTier {
        match self {
            Self::Initializer | Self::Architect => ModelTier::Initializer,
            Self::Coding | Self::Reviewer => ModelTier::Coding,
            Self::Testing => ModelTier::Testing,
        }
    }

    pub fn allowed_ops(self) -> &'static [StoreOp] {
        use StoreOp::*;
        match self {
            Self::Initializer => &[CreateBulk, Create, AddDependency, SetDependencies, MemoryStore, MemoryRecall],
            Self::Coding => &[
                GetById,
                GetSummary,
                ClaimAndGet,
                MarkInProgress,
                MarkPassing,
                MarkFailing,
                MarkForReview,
                Skip,
                ClearInProgress,
                MemoryStore,
                MemoryRecall,
            ],
            Self::Testing => &[GetById, GetSummary, MarkPassing, MarkFailing],
            Self::Reviewer => &[GetById, GetSummary, Approve, Reject, MemoryRecall],
            Self::Architect => &[MemoryStore, MemoryRecall],
        }
    }

    pub fn permits(self, op: StoreOp) -> bool {
        self.allowed_ops().contains(&op)
    }
}
