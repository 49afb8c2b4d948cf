//! Credential redaction, the event grammar, and the backoff policy
//! wired together the way the orchestrator actually drives them: a raw
//! worker line goes through `sanitize_output` before a subscriber ever
//! sees it, and a rate-limit-shaped line both matches the backoff
//! predicate and fails to parse as any other structured event.

use engine::backoff::{extract_retry_hint, is_rate_limit_signal, BackoffState};
use engine::events::{parse_line, EventBus};
use engine::worker::redact::sanitize_output;
use std::time::Duration;

#[tokio::test]
async fn redacted_line_reaches_subscribers_without_the_credential() {
    let bus = EventBus::new().shared();
    let mut raw_rx = bus.subscribe_raw();

    let leaked = "oops, using token=sk-ant0123456789012345678901234 for this call";
    let sanitized = sanitize_output(leaked);
    assert!(!sanitized.contains("sk-ant0123456789012345678901234"));

    bus.publish_raw(engine::events::RawLine {
        feature_id: Some(3),
        role: None,
        line: sanitized,
        timestamp: chrono::Utc::now(),
    });

    let received = raw_rx.recv().await.unwrap();
    assert!(received.line.contains("[REDACTED]"));
    assert!(!received.line.contains("sk-ant0123456789012345678901234"));
}

#[test]
fn rate_limit_line_is_not_also_a_terminal_or_activity_event() {
    let line = "rate limit exceeded, retry after 12 seconds";
    assert!(is_rate_limit_signal(line));
    assert_eq!(extract_retry_hint(line), Some(Duration::from_secs(12)));
    assert!(parse_line(line).is_none());
}

#[test]
fn success_after_rate_limit_and_error_resets_both_counters_independently() {
    let mut state = BackoffState::default();
    state.on_rate_limited(Some(Duration::from_secs(5)), 0.0);
    state.on_error();
    assert_eq!(state.error_attempts(), 1);

    state.on_success();
    assert_eq!(state.error_attempts(), 0);

    // A subsequent lone error does not inherit the old rate-limit delay.
    let delay = state.on_error();
    assert_eq!(delay, Duration::from_secs(30));
}

#[test]
fn terminal_marker_is_parsed_with_role_and_outcome() {
    let event = parse_line("Feature #7 coding (completed)").unwrap();
    match event {
        engine::events::EngineEvent::Terminal { feature_id, role, outcome, .. } => {
            assert_eq!(feature_id, 7);
            assert_eq!(role, engine::worker::Role::Coding);
            assert_eq!(outcome, engine::events::TerminalOutcome::Completed);
        }
        other => panic!("expected Terminal, got {other:?}"),
    }
}
