//! Backlog store, dependency scheduler, and parallel worker orchestrator
//! for autonomous coding sessions.
//!
//! This crate is the "engine" described by the orchestration design: it
//! owns the durable feature backlog (`store`), the pure dependency
//! resolver layered over it (`store::scheduler`, `store::dependency`),
//! the worker subprocess abstraction (`worker`), the rate-limit/error
//! backoff policy (`backoff`), the event multiplexer (`events`), the
//! cross-process project lock (`lock`), and the supervisor loop that
//! ties them together (`orchestrator`).
//!
//! Everything outside this crate — the control plane, the web UI,
//! planning-tool sync, the LLM dialogue itself — is an external
//! collaborator; this crate only knows about the worker subprocess
//! contract described in `worker` and `provider`.

#![allow(clippy::uninlined_format_args)]

pub mod backoff;
pub mod config;
pub mod error;
pub mod events;
pub mod lock;
pub mod orchestrator;
pub mod provider;
pub mod store;
pub mod worker;

pub use config::EngineConfig;
pub use error::{EngineError, EngineResult, ErrorKind};
pub use lock::ProjectLock;
pub use orchestrator::{RunOutcome, Supervisor};
pub use provider::{ProviderCatalog, ProviderProfile};
pub use store::{Feature, NewFeature, Store};
pub use worker::{Assignment, Role};
