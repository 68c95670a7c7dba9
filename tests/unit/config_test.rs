//! Tests for configuration validation

use shardkeeper::config::{AccrualPolicy, AutomationConfig, BuiltinJobsConfig, JobRunnerConfig};

#[test]
fn test_runner_config_defaults_valid() {
    let cfg = JobRunnerConfig::new();
    assert!(cfg.max_workers >= 8);
    assert!(cfg.validate().is_ok());
}

#[test]
fn test_runner_config_invalid_max_workers() {
    let cfg = JobRunnerConfig::new().with_max_workers(0);
    assert!(cfg.validate().is_err());
}

#[test]
fn test_runner_config_invalid_stack_size() {
    let cfg = JobRunnerConfig::new().with_thread_stack_size(1024);
    assert!(cfg.validate().is_err());
}

#[test]
fn test_runner_config_invalid_message_buffer() {
    let cfg = JobRunnerConfig::new().with_message_buffer(0);
    assert!(cfg.validate().is_err());
}

#[test]
fn test_accrual_policy_defaults() {
    let policy = AccrualPolicy::default();
    assert_eq!(policy.base_yield, 1);
    assert!((policy.base_catch_up_hours - 2.0).abs() < f64::EPSILON);
    assert!((policy.catch_up_hours_per_tier - 1.0).abs() < f64::EPSILON);
    assert_eq!(policy.active_counter, "base");
    assert!(policy.validate().is_ok());
}

#[test]
fn test_accrual_policy_rejects_negative_window() {
    let policy = AccrualPolicy {
        base_catch_up_hours: -1.0,
        ..AccrualPolicy::default()
    };
    assert!(policy.validate().is_err());
}

#[test]
fn test_accrual_policy_rejects_zero_retries() {
    let policy = AccrualPolicy {
        max_transaction_retries: 0,
        ..AccrualPolicy::default()
    };
    assert!(policy.validate().is_err());
}

#[test]
fn test_builtin_jobs_reject_bad_schedule() {
    let jobs = BuiltinJobsConfig {
        workers: "whenever".to_string(),
        ..BuiltinJobsConfig::default()
    };
    let err = jobs.validate().unwrap_err();
    assert!(err.contains("workers"));
}

#[test]
fn test_automation_config_from_json() {
    let json = r#"{
        "runner": { "max_workers": 4 },
        "accrual": { "base_yield": 5, "active_counter": "clicks" },
        "orchestrator": { "accrual_sweep_secs": 0 },
        "jobs": { "workers": "10m" }
    }"#;

    let cfg = AutomationConfig::from_json_str(json).unwrap();
    assert_eq!(cfg.runner.max_workers, 4);
    assert_eq!(cfg.accrual.base_yield, 5);
    assert_eq!(cfg.accrual.active_counter, "clicks");
    assert_eq!(cfg.accrual.max_transaction_retries, 8);
    assert_eq!(cfg.orchestrator.accrual_sweep_secs, 0);
    assert_eq!(cfg.jobs.workers, "10m");
    assert_eq!(cfg.jobs.purge_usernames, "at 3:00am");
}

#[test]
fn test_automation_config_empty_json_uses_defaults() {
    let cfg = AutomationConfig::from_json_str("{}").unwrap();
    assert_eq!(cfg.orchestrator.accrual_sweep_secs, 3_600);
    assert_eq!(cfg.jobs.top_global, "at 12:00am");
}

#[test]
fn test_automation_config_invalid_json() {
    let err = AutomationConfig::from_json_str("{ not json").unwrap_err();
    assert!(err.starts_with("parse error"));
}

#[test]
fn test_automation_config_invalid_section() {
    let err = AutomationConfig::from_json_str(r#"{ "runner": { "max_workers": 0 } }"#).unwrap_err();
    assert!(err.starts_with("runner invalid"));
}
