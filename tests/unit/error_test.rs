//! Tests for error types

use shardkeeper::core::{AutomationError, Severity};

#[test]
fn test_configuration_error() {
    let err = AutomationError::Configuration("SHARD_INDEX is not set".to_string());
    assert_eq!(format!("{err}"), "configuration error: SHARD_INDEX is not set");
    assert_eq!(err.severity(), Severity::Fatal);
    assert!(!err.is_retryable());
}

#[test]
fn test_duplicate_registration_error() {
    let err = AutomationError::DuplicateRegistration("task `cache`".to_string());
    assert_eq!(format!("{err}"), "duplicate registration: task `cache`");
    assert_eq!(err.severity(), Severity::Fatal);
}

#[test]
fn test_handler_fault_error() {
    let err = AutomationError::HandlerFault {
        task: "refresh".to_string(),
        reason: "boom".to_string(),
    };
    assert_eq!(format!("{err}"), "handler fault in task `refresh`: boom");
    assert_eq!(err.severity(), Severity::Recoverable);
}

#[test]
fn test_job_worker_crash_error() {
    let err = AutomationError::JobWorkerCrash {
        job: "workers".to_string(),
        reason: "index out of bounds".to_string(),
    };
    assert_eq!(format!("{err}"), "job worker crashed for `workers`: index out of bounds");
    assert_eq!(err.severity(), Severity::Recoverable);
}

#[test]
fn test_accrual_integrity_is_degraded() {
    let err = AutomationError::AccrualIntegrity {
        account_id: "a1".to_string(),
        upgrade_id: "ghost".to_string(),
    };
    assert_eq!(format!("{err}"), "unknown upgrade `ghost` on account `a1`");
    assert_eq!(err.severity(), Severity::Degraded);
    assert!(!err.is_retryable());
}

#[test]
fn test_persistence_conflict_is_retryable() {
    let err = AutomationError::PersistenceConflict("a1".to_string());
    assert_eq!(format!("{err}"), "persistence conflict on account `a1`");
    assert_eq!(err.severity(), Severity::Retryable);
    assert!(err.is_retryable());
}

#[test]
fn test_shut_down_error() {
    let err = AutomationError::ShutDown;
    assert_eq!(format!("{err}"), "shut down");
    assert!(!err.is_retryable());
}

#[test]
fn test_backend_error() {
    let err = AutomationError::Backend("connection failed".to_string());
    assert_eq!(format!("{err}"), "backend error: connection failed");
    assert!(err.is_retryable());
}

#[test]
fn test_error_converts_into_anyhow() {
    let err: anyhow::Error = AutomationError::NotRegistered("job `x`".to_string()).into();
    assert!(err.downcast_ref::<AutomationError>().is_some());
}
