//! Tests for shared utilities

use std::time::Duration;

use chrono::TimeDelta;
use shardkeeper::util::{new_run_id, now_ms, parse_duration, span_hours, LogLevel};

#[test]
fn test_now_ms_is_positive() {
    assert!(now_ms() > 0);
}

#[test]
fn test_run_ids_unique() {
    assert_ne!(new_run_id(), new_run_id());
}

#[test]
fn test_parse_duration_long_units() {
    assert_eq!(parse_duration("5 minutes"), Some(Duration::from_secs(300)));
    assert_eq!(parse_duration("1 hour"), Some(Duration::from_secs(3_600)));
    assert_eq!(parse_duration("forever"), None);
}

#[test]
fn test_span_hours_clamps_negative() {
    assert!((span_hours(TimeDelta::minutes(90)) - 1.5).abs() < f64::EPSILON);
    assert!(span_hours(TimeDelta::hours(-3)).abs() < f64::EPSILON);
}

#[test]
fn test_log_level_serializes_lowercase() {
    assert_eq!(serde_json::to_string(&LogLevel::Error).unwrap(), "\"error\"");
    assert_eq!(LogLevel::Info.to_string(), "info");
}
