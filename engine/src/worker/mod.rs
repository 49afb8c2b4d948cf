//! Worker abstraction (§4.C): roles, subprocess lifecycle, and output
//! redaction.

pub mod process;
pub mod redact;
pub mod role;

pub use process::{Assignment, CompletionReport, LaunchSpec, WorkerHandle, WorkerStatus};
pub use redact::sanitize_output;
pub use role::{ModelTier, Role, StoreOp};
