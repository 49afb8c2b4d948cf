//! Event multiplexer (§4.F): raw-line and structured-event fanout over
//! worker output, plus the regex grammar that promotes a line into a
//! structured `EngineEvent`.

pub mod bus;
pub mod parse;
pub mod types;

pub use bus::{EventBus, FeatureFilteredReceiver, SharedEventBus};
pub use parse::{orchestrator_state, parse_line};
pub use types::{EngineEvent, RawLine, TerminalOutcome};
