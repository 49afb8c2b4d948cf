//! Regex-driven parser for the closed event grammar (§4.F). Applied to
//! already-redacted lines; never the reverse order, so a credential
//! that happened to look like a feature tag can't leak through here
//! first.

use std::sync::OnceLock;

use chrono::Utc;
use regex::Regex;

use super::types::{EngineEvent, TerminalOutcome};
use crate::worker::Role;

fn feature_activity_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\[Feature #(\d+)\]\s*(.*)$").expect("static pattern"))
}

fn spawn_confirmed_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)^Started (\w+) agent(?: for feature #(\d+))?").expect("static pattern"))
}

fn terminal_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)^Feature #(\d+) (\w+) \((completed|failed)\)").expect("static pattern"))
}

fn role_from_str(s: &str) -> Option<Role> {
    match s.to_ascii_lowercase().as_str() {
        "initializer" => Some(Role::Initializer),
        "coding" => Some(Role::Coding),
        "testing" => Some(Role::Testing),
        "reviewer" => Some(Role::Reviewer),
        "architect" => Some(Role::Architect),
        _ => None,
    }
}

/// Parse a single sanitized line into a structured event, if it matches
/// the grammar. Returns `None` for lines that should only go to
/// raw-log subscribers.
pub fn parse_line(line: &str) -> Option<EngineEvent> {
    let now = Utc::now();

    if let Some(caps) = terminal_re().captures(line) {
        let feature_id: i64 = caps[1].parse().ok()?;
        let role = role_from_str(&caps[2])?;
        let outcome = if caps[3].eq_ignore_ascii_case("completed") { TerminalOutcome::Completed } else { TerminalOutcome::Failed };
        return Some(EngineEvent::Terminal { feature_id, role, outcome, timestamp: now });
    }

    if let Some(caps) = spawn_confirmed_re().captures(line) {
        let role = role_from_str(&caps[1])?;
        let feature_id = caps.get(2).and_then(|m| m.as_str().parse().ok());
        return Some(EngineEvent::SpawnConfirmed { role, feature_id, timestamp: now });
    }

    if let Some(caps) = feature_activity_re().captures(line) {
        let feature_id: i64 = caps[1].parse().ok()?;
        let message = caps[2].to_string();
        return Some(EngineEvent::FeatureActivity { feature_id, message, timestamp: now });
    }

    None
}

/// Orchestrator decision logs feed the observability-only channel
/// directly rather than being parsed from worker output; this wraps
/// one as an `EngineEvent` for convenience at the call sites that emit
/// them (the orchestrator loop, not the worker reader task).
pub fn orchestrator_state(message: impl Into<String>) -> EngineEvent {
    EngineEvent::OrchestratorState { message: message.into(), timestamp: Utc::now() }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_feature_activity_tag() {
        let event = parse_line("[Feature #42] running test suite").unwrap();
        match event {
            EngineEvent::FeatureActivity { feature_id, message, .. } => {
                assert_eq!(feature_id, 42);
                assert_eq!(message, "running test suite");
            }
            _ => panic!("expected FeatureActivity"),
        }
    }

    #[test]
    fn parses_spawn_confirmation() {
        let event = parse_line("Started coding agent for feature #7").unwrap();
        match event {
            EngineEvent::SpawnConfirmed { role, feature_id, .. } => {
                assert_eq!(role, Role::Coding);
                assert_eq!(feature_id, Some(7));
            }
            _ => panic!("expected SpawnConfirmed"),
        }
    }

    #[test]
    fn parses_terminal_marker() {
        let event = parse_line("Feature #3 testing (failed)").unwrap();
        match event {
            EngineEvent::Terminal { feature_id, role, outcome, .. } => {
                assert_eq!(feature_id, 3);
                assert_eq!(role, Role::Testing);
                assert_eq!(outcome, TerminalOutcome::Failed);
            }
            _ => panic!("expected Terminal"),
        }
    }

    #[test]
    fn unknown_lines_produce_no_event() {
        assert!(parse_line("just some ordinary compiler output").is_none());
    }
}
