//! Tests for the user-facing API surface

use std::sync::Arc;

use chrono::{TimeDelta, Utc};
use shardkeeper::builders::{build_automation, MaintenanceJobs};
use shardkeeper::config::{AccrualPolicy, AutomationConfig};
use shardkeeper::core::{
    AccountStore, AccrualAccount, AccrualEngine, AutomationError, AutomationResult,
    ClusterCoordinator, InMemoryLogSink, ShardDescriptor, UpgradeCatalog, UpgradeCategory,
    UpgradeDefinition, UpgradeOwnership,
};
use shardkeeper::infra::InMemoryAccountStore;
use shardkeeper::runtime::{claim_response, health, preview, TRY_AGAIN_MESSAGE};
use shardkeeper::util::AccountId;

fn catalog() -> Arc<UpgradeCatalog> {
    Arc::new(
        UpgradeCatalog::new([UpgradeDefinition::new("oven", UpgradeCategory::PassiveRate, 2.0)]).unwrap(),
    )
}

/// Store whose commits always lose the race.
struct AlwaysConflicting(InMemoryAccountStore);

impl AccountStore for AlwaysConflicting {
    fn load(&self, account_id: &str) -> AutomationResult<Option<AccrualAccount>> {
        self.0.load(account_id)
    }

    fn commit(&self, account: &AccrualAccount, _expected: Option<u64>) -> AutomationResult<u64> {
        Err(AutomationError::PersistenceConflict(account.account_id.clone()))
    }

    fn account_ids(&self) -> AutomationResult<Vec<AccountId>> {
        self.0.account_ids()
    }
}

#[test]
fn test_claim_response_success() {
    let mut account = AccrualAccount::new("a1", Utc::now());
    account.stored_counters.insert("oven".into(), 24);
    account.stored_counters.insert("base".into(), 3);
    let engine = AccrualEngine::new(
        InMemoryAccountStore::with_accounts([account]),
        catalog(),
        AccrualPolicy::default(),
    )
    .unwrap();

    let response = claim_response(&engine, "a1");
    assert!(response.ok);
    assert_eq!(response.total_credited, 27);
    assert_eq!(response.breakdown, vec!["oven +24".to_string(), "base +3".to_string()]);
    assert_eq!(response.message, "Claimed 27.");
}

#[test]
fn test_claim_response_nothing_to_claim() {
    let engine = AccrualEngine::new(InMemoryAccountStore::new(), catalog(), AccrualPolicy::default()).unwrap();
    let response = claim_response(&engine, "nobody");
    assert!(response.ok);
    assert_eq!(response.total_credited, 0);
    assert!(response.breakdown.is_empty());
}

#[test]
fn test_claim_conflict_maps_to_try_again() {
    let mut account = AccrualAccount::new("a1", Utc::now());
    account.stored_counters.insert("oven".into(), 5);
    let engine = AccrualEngine::new(
        AlwaysConflicting(InMemoryAccountStore::with_accounts([account])),
        catalog(),
        AccrualPolicy::default(),
    )
    .unwrap();

    let response = claim_response(&engine, "a1");
    assert!(!response.ok);
    assert_eq!(response.total_credited, 0);
    assert_eq!(response.message, TRY_AGAIN_MESSAGE);
    let json = serde_json::to_value(&response).unwrap();
    assert_eq!(json["totalCredited"], 0);
}

#[test]
fn test_preview_does_not_write() {
    let now = Utc::now();
    let mut account = AccrualAccount::new("a1", now - TimeDelta::hours(1));
    account.owned_upgrades.push(UpgradeOwnership {
        upgrade_id: "oven".into(),
        quantity: 1,
    });
    let engine = AccrualEngine::new(
        InMemoryAccountStore::with_accounts([account.clone()]),
        catalog(),
        AccrualPolicy::default(),
    )
    .unwrap();

    let shown = preview(&engine, "a1", now).unwrap().unwrap();
    assert_eq!(shown.pending, 2);
    assert_eq!(shown.elapsed_secs, 3_600);
    assert_eq!(shown.max_catch_up_secs, 7_200);
    assert_eq!(engine.account("a1").unwrap().unwrap(), account);
    assert!(preview(&engine, "nobody", now).unwrap().is_none());
}

#[test]
fn test_health_before_start() {
    let cfg = AutomationConfig::default();
    let engine = Arc::new(AccrualEngine::new(InMemoryAccountStore::new(), catalog(), cfg.accrual.clone()).unwrap());
    let automation = build_automation(
        &cfg,
        Arc::new(ClusterCoordinator::new(ShardDescriptor::new(0, 1, "solo").unwrap())),
        engine,
        InMemoryLogSink::new(8),
        MaintenanceJobs::new(),
    )
    .unwrap();

    let report = health(&automation);
    assert!(!report.ok);
    assert!(report.primary);
    assert_eq!(report.cluster_id, "solo");
    assert_eq!(report.tasks.len(), 1);
    assert_eq!(report.jobs.len(), 1);
    automation.shutdown();
}
