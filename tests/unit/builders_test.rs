//! Tests for assembling the automation stack

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{TimeDelta, Utc};
use shardkeeper::builders::{
    build_automation, Automation, MaintenanceJobs, ACCRUAL_SWEEP_TASK, PURGE_USERNAMES_JOB,
    TOP_GLOBAL_JOB, WORKERS_JOB,
};
use shardkeeper::config::AutomationConfig;
use shardkeeper::core::{
    AccountStore, AccrualAccount, AccrualEngine, AppResult, AutomationError, AutomationResult,
    ClusterCoordinator, InMemoryLogSink, JobContext, Schedule, ShardDescriptor, UpgradeCatalog,
    UpgradeCategory, UpgradeDefinition, UpgradeOwnership,
};
use shardkeeper::infra::InMemoryAccountStore;
use shardkeeper::util::{AccountId, LogLevel};

fn engine(cfg: &AutomationConfig) -> Arc<AccrualEngine<InMemoryAccountStore>> {
    Arc::new(
        AccrualEngine::new(
            InMemoryAccountStore::new(),
            Arc::new(UpgradeCatalog::default()),
            cfg.accrual.clone(),
        )
        .unwrap(),
    )
}

fn coordinator(index: u32) -> Arc<ClusterCoordinator> {
    Arc::new(ClusterCoordinator::new(ShardDescriptor::new(index, 2, "test").unwrap()))
}

async fn noop(_ctx: JobContext) -> AppResult<()> {
    Ok(())
}

#[test]
fn test_builtin_jobs_registered() {
    let cfg = AutomationConfig::default();
    let automation = build_automation(
        &cfg,
        coordinator(0),
        engine(&cfg),
        InMemoryLogSink::new(16),
        MaintenanceJobs::new(),
    )
    .unwrap();

    let sweep = automation.orchestrator.task(ACCRUAL_SWEEP_TASK).unwrap();
    assert!(sweep.singleton_global);
    assert_eq!(sweep.period.as_secs(), 3_600);

    let workers = automation.runner.history(WORKERS_JOB).unwrap();
    assert_eq!(workers.schedule, Schedule::every(std::time::Duration::from_secs(300)).unwrap());
    assert!(automation.runner.history(PURGE_USERNAMES_JOB).is_none());
    assert!(automation.runner.history(TOP_GLOBAL_JOB).is_none());
    automation.shutdown();
}

#[test]
fn test_maintenance_jobs_registered_when_supplied() {
    let cfg = AutomationConfig::default();
    let automation = build_automation(
        &cfg,
        coordinator(1),
        engine(&cfg),
        InMemoryLogSink::new(16),
        MaintenanceJobs::new().with_purge_usernames(noop).with_top_global(noop),
    )
    .unwrap();

    let purge = automation.runner.history(PURGE_USERNAMES_JOB).unwrap();
    assert_eq!(purge.schedule, Schedule::daily_at(3, 0).unwrap());
    let top = automation.runner.history(TOP_GLOBAL_JOB).unwrap();
    assert_eq!(top.schedule, Schedule::daily_at(0, 0).unwrap());
    assert_eq!(automation.runner.histories().len(), 3);
    automation.shutdown();
}

#[test]
fn test_sweep_disabled_by_zero_period() {
    let mut cfg = AutomationConfig::default();
    cfg.orchestrator.accrual_sweep_secs = 0;
    let automation = build_automation(
        &cfg,
        coordinator(0),
        engine(&cfg),
        InMemoryLogSink::new(16),
        MaintenanceJobs::new(),
    )
    .unwrap();
    assert!(automation.orchestrator.snapshot().is_empty());
    automation.shutdown();
}

#[test]
fn test_invalid_config_rejected() {
    let mut cfg = AutomationConfig::default();
    cfg.jobs.top_global = "sometime".to_string();
    let err = build_automation(
        &cfg,
        coordinator(0),
        engine(&AutomationConfig::default()),
        InMemoryLogSink::new(16),
        MaintenanceJobs::new(),
    )
    .unwrap_err();
    assert!(matches!(err, AutomationError::Configuration(_)));
}

/// Engine holding one account with two hours of unswept oven output (2/h).
fn seeded_engine(cfg: &AutomationConfig) -> Arc<AccrualEngine<InMemoryAccountStore>> {
    let mut alice = AccrualAccount::new("alice", Utc::now() - TimeDelta::hours(2));
    alice.owned_upgrades.push(UpgradeOwnership {
        upgrade_id: "oven".into(),
        quantity: 1,
    });
    Arc::new(
        AccrualEngine::new(
            InMemoryAccountStore::with_accounts([alice]),
            Arc::new(
                UpgradeCatalog::new([UpgradeDefinition::new("oven", UpgradeCategory::PassiveRate, 2.0)])
                    .unwrap(),
            ),
            cfg.accrual.clone(),
        )
        .unwrap(),
    )
}

fn oven_stored<S: AccountStore>(automation: &Automation<S>) -> Option<u64> {
    automation
        .engine
        .account("alice")
        .unwrap()
        .and_then(|a| a.stored_counters.get("oven").copied())
}

/// Let the test runtime make progress until `cond` holds.
///
/// The sweep runs on the blocking pool, so real time has to pass as well.
async fn settle(mut cond: impl FnMut() -> bool) -> bool {
    for _ in 0..1_000 {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(2));
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    cond()
}

/// Poll on the real clock; job slots run on OS threads.
fn wait_until(mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    cond()
}

#[tokio::test(start_paused = true)]
async fn test_accrual_sweep_credits_accounts_on_primary_only() {
    let mut cfg = AutomationConfig::default();
    cfg.orchestrator.accrual_sweep_secs = 60;
    let primary = build_automation(
        &cfg,
        coordinator(0),
        seeded_engine(&cfg),
        InMemoryLogSink::new(16),
        MaintenanceJobs::new(),
    )
    .unwrap();
    let secondary = build_automation(
        &cfg,
        coordinator(1),
        seeded_engine(&cfg),
        InMemoryLogSink::new(16),
        MaintenanceJobs::new(),
    )
    .unwrap();
    primary.start().unwrap();
    secondary.start().unwrap();

    tokio::time::sleep(Duration::from_secs(61)).await;
    assert!(settle(|| oven_stored(&primary) == Some(4)).await);

    let sweep = primary.orchestrator.task(ACCRUAL_SWEEP_TASK).unwrap();
    assert!(sweep.armed);
    assert!(sweep.fires >= 1);
    assert_eq!(sweep.faults, 0);

    // Past several more periods the secondary still never swept.
    tokio::time::sleep(Duration::from_secs(180)).await;
    let idle = secondary.orchestrator.task(ACCRUAL_SWEEP_TASK).unwrap();
    assert!(!idle.armed);
    assert_eq!(idle.fires, 0);
    assert_eq!(oven_stored(&secondary), None);
    // Later sweeps found nothing new to credit.
    assert_eq!(oven_stored(&primary), Some(4));

    primary.shutdown();
    secondary.shutdown();
}

#[tokio::test(start_paused = true)]
async fn test_workers_job_credits_and_reports() {
    let mut cfg = AutomationConfig::default();
    cfg.orchestrator.accrual_sweep_secs = 0;
    let sink = InMemoryLogSink::new(16);
    let automation = build_automation(
        &cfg,
        coordinator(1),
        seeded_engine(&cfg),
        sink.clone(),
        MaintenanceJobs::new(),
    )
    .unwrap();
    automation.start().unwrap();

    for _ in 0..6 {
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert!(wait_until(|| !automation.runner.history(WORKERS_JOB).unwrap().running));
    }
    assert!(wait_until(|| {
        let workers = automation.runner.history(WORKERS_JOB).unwrap();
        workers.fires == 1 && !workers.running
    }));
    assert_eq!(oven_stored(&automation), Some(4));
    assert!(automation.runner.history(WORKERS_JOB).unwrap().last_error.is_none());

    automation.shutdown();
    let messages = sink.messages_for(WORKERS_JOB);
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].level, LogLevel::Info);
    assert_eq!(messages[0].message, "credited 4 across 1 of 1 accounts");
}

/// Store whose account listing is unavailable.
struct UnlistableStore;

impl AccountStore for UnlistableStore {
    fn load(&self, _account_id: &str) -> AutomationResult<Option<AccrualAccount>> {
        Ok(None)
    }

    fn commit(&self, _account: &AccrualAccount, _expected_version: Option<u64>) -> AutomationResult<u64> {
        Ok(1)
    }

    fn account_ids(&self) -> AutomationResult<Vec<AccountId>> {
        Err(AutomationError::Backend("account index unavailable".into()))
    }
}

#[tokio::test(start_paused = true)]
async fn test_builtin_jobs_surface_store_failures() {
    let mut cfg = AutomationConfig::default();
    cfg.orchestrator.accrual_sweep_secs = 60;
    let engine = Arc::new(
        AccrualEngine::new(UnlistableStore, Arc::new(UpgradeCatalog::default()), cfg.accrual.clone()).unwrap(),
    );
    let automation = build_automation(
        &cfg,
        coordinator(0),
        engine,
        InMemoryLogSink::new(16),
        MaintenanceJobs::new(),
    )
    .unwrap();
    automation.start().unwrap();

    tokio::time::sleep(Duration::from_secs(61)).await;
    assert!(settle(|| automation.orchestrator.task(ACCRUAL_SWEEP_TASK).unwrap().faults >= 1).await);
    assert!(automation.orchestrator.is_running());

    assert!(automation.runner.trigger(WORKERS_JOB).unwrap());
    assert!(wait_until(|| automation.runner.history(WORKERS_JOB).unwrap().failures == 1));
    let workers = automation.runner.history(WORKERS_JOB).unwrap();
    assert!(workers.last_error.unwrap().contains("account index unavailable"));
    assert_eq!(workers.crashes, 0);

    automation.shutdown();
}
