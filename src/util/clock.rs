//! Wall-clock helpers and human-readable duration parsing.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use chrono::{DateTime, Utc};

/// Milliseconds since the Unix epoch.
#[must_use]
pub fn now_ms() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or_default()
}

/// Current UTC timestamp.
#[must_use]
pub fn now_utc() -> DateTime<Utc> {
    Utc::now()
}

/// Wall-clock source for calendar schedules and fire timestamps.
///
/// Production code uses [`SystemClock`]; tests inject a clock that follows
/// tokio's paused time.
pub trait Clock: Send + Sync + std::fmt::Debug {
    /// Current UTC time.
    fn now(&self) -> DateTime<Utc>;
}

/// Clock backed by the system time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        now_utc()
    }
}

/// Parse a compact duration such as `"500ms"`, `"30s"`, `"5m"`, `"2h"` or `"1d"`.
///
/// Whitespace between the number and the unit is allowed. Returns `None` for
/// unknown units, empty input, or a zero-length duration.
#[must_use]
pub fn parse_duration(input: &str) -> Option<Duration> {
    let trimmed = input.trim();
    let split = trimmed
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(trimmed.len());
    let (digits, unit) = trimmed.split_at(split);
    let value: u64 = digits.parse().ok()?;
    let unit = unit.trim().to_ascii_lowercase();

    let duration = match unit.as_str() {
        "ms" => Duration::from_millis(value),
        "s" | "sec" | "secs" | "second" | "seconds" => Duration::from_secs(value),
        "m" | "min" | "mins" | "minute" | "minutes" => Duration::from_secs(value.checked_mul(60)?),
        "h" | "hr" | "hrs" | "hour" | "hours" => Duration::from_secs(value.checked_mul(3_600)?),
        "d" | "day" | "days" => Duration::from_secs(value.checked_mul(86_400)?),
        _ => return None,
    };

    if duration.is_zero() {
        None
    } else {
        Some(duration)
    }
}

/// Convert a signed chrono span into fractional hours, clamped at zero.
#[must_use]
pub fn span_hours(span: chrono::TimeDelta) -> f64 {
    let ms = span.num_milliseconds().max(0);
    #[allow(clippy::cast_precision_loss)]
    let hours = ms as f64 / 3_600_000.0;
    hours
}
