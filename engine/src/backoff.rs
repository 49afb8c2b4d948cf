//! Rate-limit and error backoff policy (§4.D).
//!
//! Two independent counters per worker role: an exponential backoff
//! driven by rate-limit signals, and a linear backoff driven by plain
//! errors. A success resets both; a rate-limit event never touches the
//! error counter and vice versa.

use std::str::FromStr;
use std::time::Duration;

use chrono::{FixedOffset, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use regex::Regex;
use std::sync::OnceLock;

const RATE_LIMIT_BASE: Duration = Duration::from_secs(1);
const RATE_LIMIT_CAP: Duration = Duration::from_secs(60);
const RATE_LIMIT_SATURATION_ATTEMPT: u32 = 10;
const ERROR_LINEAR_STEP_SECS: u64 = 30;
const ERROR_CAP: Duration = Duration::from_secs(300);
const RETRY_AFTER_MIN: Duration = Duration::from_secs(1);
const RETRY_AFTER_MAX: Duration = Duration::from_secs(24 * 60 * 60);

fn rate_limit_patterns() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)rate.?limit(ed|\s+exceeded)?|quota\s+exceeded|\b429\b|try again in").expect("static pattern")
    })
}

fn retry_after_seconds_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)retry.?after\D{0,5}(\d+)\s*second").expect("static pattern"))
}

fn reset_at_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)reset\s+at\s+(\d{1,2}):(\d{2})\s*\(([A-Za-z0-9/_:+\-]+)\)").expect("static pattern")
    })
}

/// Resolve a captured zone token — either an IANA name (`America/New_York`),
/// `UTC`/`Z`, or a numeric offset (`+09:00`, `-0500`) — to a `FixedOffset`.
/// IANA zones are resolved against `on_date` so DST is honored for the
/// specific day the reset falls on, not today's offset.
fn resolve_zone(tz_str: &str, on_date: chrono::NaiveDate) -> Option<FixedOffset> {
    if tz_str.eq_ignore_ascii_case("UTC") || tz_str.eq_ignore_ascii_case("Z") {
        return Some(FixedOffset::east_opt(0).expect("zero offset is valid"));
    }
    if let Ok(tz) = Tz::from_str(tz_str) {
        let noon = on_date.and_hms_opt(12, 0, 0)?;
        return Some(tz.offset_from_local_datetime(&noon).single()?.fix());
    }
    parse_numeric_offset(tz_str)
}

/// Parses `+HH:MM`, `-HH:MM`, `+HHMM`, or `-HHMM` into a `FixedOffset`.
fn parse_numeric_offset(s: &str) -> Option<FixedOffset> {
    let (sign, rest) = match s.as_bytes().first()? {
        b'+' => (1, &s[1..]),
        b'-' => (-1, &s[1..]),
        _ => return None,
    };
    let digits: String = rest.chars().filter(|c| *c != ':').collect();
    if digits.len() != 4 || !digits.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    let hours: i32 = digits[0..2].parse().ok()?;
    let minutes: i32 = digits[2..4].parse().ok()?;
    let total_secs = sign * (hours * 3600 + minutes * 60);
    FixedOffset::east_opt(total_secs)
}

/// True if `line` matches the rate-limit predicate. Case-insensitive
/// and idempotent: re-applying it to an already-matched line still
/// matches.
pub fn is_rate_limit_signal(line: &str) -> bool {
    rate_limit_patterns().is_match(line)
}

/// An explicit delay hint extracted from a rate-limit line, if present.
/// Absolute "reset at" times in the past are rolled forward by one day,
/// matching a daily quota reset window.
pub fn extract_retry_hint(line: &str) -> Option<Duration> {
    if let Some(caps) = retry_after_seconds_pattern().captures(line) {
        let secs: u64 = caps[1].parse().ok()?;
        return Some(clamp_retry(Duration::from_secs(secs)));
    }
    if let Some(caps) = reset_at_pattern().captures(line) {
        let hour: u32 = caps[1].parse().ok()?;
        let minute: u32 = caps[2].parse().ok()?;
        let tz_str = &caps[3];
        let time = NaiveTime::from_hms_opt(hour, minute, 0)?;
        let now = Utc::now();

        // Resolve against today's date in the stated zone first; if the
        // zone's offset changes around midnight (DST edge) this is off by
        // at most the offset delta, which the day-roll-forward below
        // already has to tolerate for the ordinary case of a past time.
        let offset = resolve_zone(tz_str, now.date_naive())?;
        let mut candidate = offset.from_local_datetime(&now.date_naive().and_time(time)).single()?.with_timezone(&Utc);
        if candidate <= now {
            let next_day = (now.date_naive() + chrono::Duration::days(1)).and_time(time);
            let next_offset = resolve_zone(tz_str, now.date_naive() + chrono::Duration::days(1))?;
            candidate = next_offset.from_local_datetime(&next_day).single()?.with_timezone(&Utc);
        }
        let delay = (candidate - now).to_std().ok()?;
        return Some(clamp_retry(delay));
    }
    None
}

fn clamp_retry(d: Duration) -> Duration {
    d.clamp(RETRY_AFTER_MIN, RETRY_AFTER_MAX)
}

/// Exponential backoff with jitter, saturating once `attempt` reaches
/// `RATE_LIMIT_SATURATION_ATTEMPT`. `jitter_frac` is a caller-supplied
/// value in `[-0.1, 0.1]` so the computation stays deterministic and
/// testable; callers source it from a real RNG.
pub fn rate_limit_delay(attempt: u32, jitter_frac: f64) -> Duration {
    let capped_attempt = attempt.min(RATE_LIMIT_SATURATION_ATTEMPT);
    let base = RATE_LIMIT_BASE.as_secs_f64() * 2f64.powi(capped_attempt as i32);
    let nominal = base.min(RATE_LIMIT_CAP.as_secs_f64());
    let jittered = nominal * (1.0 + jitter_frac.clamp(-0.1, 0.1));
    Duration::from_secs_f64(jittered.max(0.0))
}

/// Linear backoff for plain (non-rate-limit) worker errors.
pub fn error_delay(attempt: u32) -> Duration {
    let secs = ERROR_LINEAR_STEP_SECS.saturating_mul(attempt as u64);
    Duration::from_secs(secs).min(ERROR_CAP)
}

/// Per-role backoff state. Lives on the orchestrator's `Supervisor`,
/// one instance per live role slot.
#[derive(Debug, Default, Clone, Copy)]
pub struct BackoffState {
    rate_limit_attempt: u32,
    error_attempt: u32,
}

pub enum BackoffOutcome {
    RateLimited(Duration),
    Error(Duration),
}

impl BackoffState {
    pub fn on_success(&mut self) {
        self.rate_limit_attempt = 0;
        self.error_attempt = 0;
    }

    pub fn on_rate_limited(&mut self, hint: Option<Duration>, jitter_frac: f64) -> Duration {
        let delay = hint.unwrap_or_else(|| rate_limit_delay(self.rate_limit_attempt, jitter_frac));
        self.rate_limit_attempt = self.rate_limit_attempt.saturating_add(1);
        delay
    }

    pub fn on_error(&mut self) -> Duration {
        let delay = error_delay(self.error_attempt);
        self.error_attempt = self.error_attempt.saturating_add(1);
        delay
    }

    pub fn error_attempts(&self) -> u32 {
        self.error_attempt
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, Timelike};

    #[test]
    fn detects_rate_limit_lines_case_insensitively() {
        assert!(is_rate_limit_signal("Rate limit exceeded, retry after 7 seconds"));
        assert!(is_rate_limit_signal("HTTP 429 too many requests"));
        assert!(!is_rate_limit_signal("feature #4 passed all tests"));
    }

    #[test]
    fn extracts_retry_after_seconds() {
        let hint = extract_retry_hint("rate limit exceeded, retry after 7 seconds").unwrap();
        assert_eq!(hint, Duration::from_secs(7));
    }

    #[test]
    fn saturates_above_ten_attempts_within_jitter_band() {
        let d = rate_limit_delay(25, 0.1);
        assert!(d.as_secs_f64() <= RATE_LIMIT_CAP.as_secs_f64() * 1.1 + 0.001);
        assert!(d.as_secs_f64() >= RATE_LIMIT_CAP.as_secs_f64() * 0.9);
    }

    #[test]
    fn error_backoff_is_linear_and_caps() {
        assert_eq!(error_delay(1), Duration::from_secs(30));
        assert_eq!(error_delay(4), Duration::from_secs(120));
        assert_eq!(error_delay(100), ERROR_CAP);
    }

    #[test]
    fn resolves_numeric_offset_with_colon() {
        let day = NaiveDate::from_ymd_opt(2026, 7, 28).unwrap();
        let offset = resolve_zone("+05:00", day).unwrap();
        assert_eq!(offset.local_minus_utc(), 5 * 3600);
    }

    #[test]
    fn resolves_numeric_offset_without_colon() {
        let day = NaiveDate::from_ymd_opt(2026, 7, 28).unwrap();
        let offset = resolve_zone("-0500", day).unwrap();
        assert_eq!(offset.local_minus_utc(), -5 * 3600);
    }

    #[test]
    fn resolves_iana_zone_respecting_dst() {
        // America/New_York is UTC-4 (EDT) in July and UTC-5 (EST) in January.
        let summer = resolve_zone("America/New_York", NaiveDate::from_ymd_opt(2026, 7, 28).unwrap()).unwrap();
        assert_eq!(summer.local_minus_utc(), -4 * 3600);
        let winter = resolve_zone("America/New_York", NaiveDate::from_ymd_opt(2026, 1, 15).unwrap()).unwrap();
        assert_eq!(winter.local_minus_utc(), -5 * 3600);
    }

    #[test]
    fn extract_retry_hint_reset_at_honors_stated_timezone() {
        // A "reset at" two hours from now, stated explicitly in UTC, must
        // produce a delay of roughly two hours — not some other value
        // that would result from silently treating the hour as local time
        // or discarding the zone capture entirely.
        let now = Utc::now();
        let target = now + chrono::Duration::hours(2);
        let line = format!("reset at {:02}:{:02} (UTC)", target.hour(), target.minute());
        let hint = extract_retry_hint(&line).unwrap().as_secs_f64();
        assert!(hint > 0.0 && hint <= 2.5 * 3600.0, "hint was {hint}s");
    }

    #[test]
    fn extract_retry_hint_reset_at_differs_by_offset() {
        // The same wall-clock hour stated against two different offsets
        // must resolve to two different instants, proving the captured
        // zone is actually consumed rather than discarded.
        let now = Utc::now();
        let hour = (now.hour() + 1) % 24;
        let utc_line = format!("reset at {hour:02}:00 (UTC)");
        let plus_five_line = format!("reset at {hour:02}:00 (+05:00)");
        let utc_hint = extract_retry_hint(&utc_line).unwrap();
        let offset_hint = extract_retry_hint(&plus_five_line).unwrap();
        assert_ne!(utc_hint, offset_hint);
    }

    #[test]
    fn success_resets_both_counters_independently() {
        let mut state = BackoffState::default();
        state.on_rate_limited(None, 0.0);
        state.on_error();
        assert_eq!(state.rate_limit_attempt, 1);
        assert_eq!(state.error_attempt, 1);
        state.on_success();
        assert_eq!(state.rate_limit_attempt, 0);
        assert_eq!(state.error_attempt, 0);
    }
}
