//! Time-bounded resource accrual with capped catch-up and idempotent claims.
//!
//! `compute_accrual` is a pure function of an account snapshot, the upgrade
//! catalog, the policy and a timestamp. Passive earnings depend on elapsed
//! time and are credited by the scheduled sweeps; the active yield is earned
//! per action and only credited through `perform_action`. Every mutation goes through
//! `AccrualEngine`, which wraps it in an optimistic read-modify-write
//! transaction against an `AccountStore`: load the account with its version,
//! apply the change to the copy, commit only if the version is unchanged,
//! retry otherwise.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::AccrualPolicy;
use crate::core::{AutomationError, AutomationResult};
use crate::util::clock::span_hours;
use crate::util::serde::AccountId;

/// What an upgrade does to its owner's accrual.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum UpgradeCategory {
    /// Earns `magnitude` per hour per unit owned.
    PassiveRate,
    /// Adds `magnitude` per unit to the multiplier on the base yield.
    PerUnitMultiplier,
    /// Extends the catch-up window by `magnitude` hours per unit.
    Capacity,
    /// Raises every storage cap by `magnitude` times its base per unit.
    Storage,
}

/// Reference data describing one upgrade.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpgradeDefinition {
    /// Catalog identifier.
    pub id: String,
    /// Effect category.
    pub category: UpgradeCategory,
    /// Effect size per unit.
    pub magnitude: f64,
    /// Units one owned passive-rate upgrade can hold in its stored counter
    /// before it stops filling. `None` means unbounded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_storage: Option<u64>,
}

impl UpgradeDefinition {
    /// Convenience constructor.
    pub fn new(id: impl Into<String>, category: UpgradeCategory, magnitude: f64) -> Self {
        Self {
            id: id.into(),
            category,
            magnitude,
            max_storage: None,
        }
    }

    /// Cap the stored counter this upgrade fills at `units` per owned unit.
    #[must_use]
    pub fn with_max_storage(mut self, units: u64) -> Self {
        self.max_storage = Some(units);
        self
    }
}

/// Read-only upgrade catalog supplied at startup.
#[derive(Debug, Clone, Default)]
pub struct UpgradeCatalog {
    upgrades: HashMap<String, UpgradeDefinition>,
}

impl UpgradeCatalog {
    /// Build a catalog from definitions.
    ///
    /// # Errors
    ///
    /// Returns `AutomationError::Configuration` for duplicate ids or a
    /// negative or non-finite magnitude.
    pub fn new(definitions: impl IntoIterator<Item = UpgradeDefinition>) -> AutomationResult<Self> {
        let mut upgrades = HashMap::new();
        for def in definitions {
            if !def.magnitude.is_finite() || def.magnitude < 0.0 {
                return Err(AutomationError::Configuration(format!(
                    "upgrade `{}` has invalid magnitude {}",
                    def.id, def.magnitude
                )));
            }
            if upgrades.contains_key(&def.id) {
                return Err(AutomationError::Configuration(format!(
                    "upgrade `{}` defined twice",
                    def.id
                )));
            }
            upgrades.insert(def.id.clone(), def);
        }
        Ok(Self { upgrades })
    }

    /// Look up an upgrade.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<&UpgradeDefinition> {
        self.upgrades.get(id)
    }

    /// Number of defined upgrades.
    #[must_use]
    pub fn len(&self) -> usize {
        self.upgrades.len()
    }

    /// True if no upgrades are defined.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.upgrades.is_empty()
    }
}

/// How many units of an upgrade an account owns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpgradeOwnership {
    /// Catalog identifier.
    pub upgrade_id: String,
    /// Units owned.
    pub quantity: u64,
}

/// Persisted economy state of one account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccrualAccount {
    /// Account identifier.
    pub account_id: AccountId,
    /// Time up to which passive earnings have been credited.
    pub last_accrual_timestamp: DateTime<Utc>,
    /// Premium tier; each tier extends the catch-up window.
    pub tier: u32,
    /// Owned upgrades.
    pub owned_upgrades: Vec<UpgradeOwnership>,
    /// Stored, unclaimed resources per sub-account.
    pub stored_counters: BTreeMap<String, u64>,
    /// Spendable balance.
    pub main_balance: u64,
    /// Optimistic concurrency version, bumped by every commit.
    pub version: u64,
}

impl AccrualAccount {
    /// A fresh account whose accrual clock starts at `created_at`.
    pub fn new(account_id: impl Into<AccountId>, created_at: DateTime<Utc>) -> Self {
        Self {
            account_id: account_id.into(),
            last_accrual_timestamp: created_at,
            tier: 0,
            owned_upgrades: Vec::new(),
            stored_counters: BTreeMap::new(),
            main_balance: 0,
            version: 0,
        }
    }

    /// Sum of all stored counters.
    #[must_use]
    pub fn stored_total(&self) -> u64 {
        self.stored_counters.values().fold(0, |acc, v| acc.saturating_add(*v))
    }

    /// Units owned of one upgrade.
    #[must_use]
    pub fn quantity_of(&self, upgrade_id: &str) -> u64 {
        self.owned_upgrades
            .iter()
            .filter(|o| o.upgrade_id == upgrade_id)
            .map(|o| o.quantity)
            .sum()
    }
}

/// Passive earnings of one upgrade.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AccrualBucket {
    /// Upgrade that produced the earnings; also the stored counter credited.
    pub upgrade_id: String,
    /// Whole units earned.
    pub amount: u64,
}

/// Result of `compute_accrual`.
#[derive(Debug, Clone, PartialEq)]
pub struct AccrualOutcome {
    /// Time credited, after clamping to the catch-up window.
    pub elapsed: TimeDelta,
    /// The account's catch-up window.
    pub max_catch_up_window: TimeDelta,
    /// Passive earnings per upgrade, largest first; zero buckets omitted.
    pub buckets: Vec<AccrualBucket>,
    /// Sum of per-unit multiplier contributions.
    pub multiplier: f64,
    /// `floor(base_yield * multiplier)`.
    pub active: u64,
    /// Sum of passive buckets.
    pub passive: u64,
    /// `active + passive`.
    pub total: u64,
    /// Upgrade ids missing from the catalog; they contributed nothing.
    pub unknown_upgrades: Vec<String>,
    /// Stored counters that reached their storage cap; earnings past the cap are dropped.
    pub full_counters: Vec<String>,
}

impl AccrualOutcome {
    /// The part of this outcome that accrues with time: the active yield is dropped.
    #[must_use]
    pub fn passive_only(mut self) -> Self {
        self.active = 0;
        self.total = self.passive;
        self
    }
}

/// One line of a claim payout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PayoutLine {
    /// Stored counter the amount came from.
    pub sub_account: String,
    /// Amount moved to the main balance.
    pub amount: u64,
}

impl fmt::Display for PayoutLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} +{}", self.sub_account, self.amount)
    }
}

/// Result of a claim.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClaimReceipt {
    /// Amount credited to the main balance.
    pub total_credited: u64,
    /// Human-readable payout lines, largest first.
    pub breakdown: Vec<String>,
    /// Structured payout lines, largest first.
    #[serde(skip)]
    pub lines: Vec<PayoutLine>,
}

/// Aggregate result of applying accrual to every stored account.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    /// Accounts visited.
    pub accounts: usize,
    /// Accounts that received a non-zero credit.
    pub credited_accounts: usize,
    /// Total units credited.
    pub total_credited: u64,
    /// Accounts skipped after exhausting transaction retries.
    pub conflicts: usize,
    /// Accounts skipped because of another storage error.
    pub failures: usize,
}

/// Persistence contract for accrual accounts.
///
/// Implementations must make `commit` an atomic compare-and-swap on the
/// account version.
pub trait AccountStore: Send + Sync {
    /// Load an account snapshot.
    ///
    /// # Errors
    ///
    /// Backend failures.
    fn load(&self, account_id: &str) -> AutomationResult<Option<AccrualAccount>>;

    /// Store `account` iff the stored version equals `expected_version`
    /// (`None`: the account must not exist yet). Returns the new version.
    ///
    /// # Errors
    ///
    /// `AutomationError::PersistenceConflict` on a version mismatch, or a
    /// backend failure.
    fn commit(&self, account: &AccrualAccount, expected_version: Option<u64>) -> AutomationResult<u64>;

    /// Ids of every stored account.
    ///
    /// # Errors
    ///
    /// Backend failures.
    fn account_ids(&self) -> AutomationResult<Vec<AccountId>>;
}

impl<S: AccountStore + ?Sized> AccountStore for Arc<S> {
    fn load(&self, account_id: &str) -> AutomationResult<Option<AccrualAccount>> {
        (**self).load(account_id)
    }

    fn commit(&self, account: &AccrualAccount, expected_version: Option<u64>) -> AutomationResult<u64> {
        (**self).commit(account, expected_version)
    }

    fn account_ids(&self) -> AutomationResult<Vec<AccountId>> {
        (**self).account_ids()
    }
}

/// Catch-up window of an account: base hours, plus tier hours, plus capacity upgrades.
///
/// Never shrinks as capacity upgrades are added, since magnitudes are non-negative.
#[must_use]
pub fn max_catch_up_window(
    account: &AccrualAccount,
    catalog: &UpgradeCatalog,
    policy: &AccrualPolicy,
) -> TimeDelta {
    let mut hours = policy.catch_up_hours_per_tier.mul_add(
        f64::from(account.tier),
        policy.base_catch_up_hours,
    );
    for owned in &account.owned_upgrades {
        if let Some(def) = catalog.get(&owned.upgrade_id) {
            if def.category == UpgradeCategory::Capacity {
                hours += def.magnitude * as_f64(owned.quantity);
            }
        }
    }
    hours_to_delta(hours)
}

/// Storage cap of the counter filled by `upgrade_id`, or `None` if unbounded.
///
/// The cap is the upgrade's `max_storage` per owned unit, raised by every
/// owned storage upgrade.
#[must_use]
pub fn storage_cap(account: &AccrualAccount, upgrade_id: &str, catalog: &UpgradeCatalog) -> Option<u64> {
    let base = catalog.get(upgrade_id)?.max_storage?;
    let boost = storage_boost(account, catalog);
    Some(floor_units(
        as_f64(base) * as_f64(account.quantity_of(upgrade_id)) * (1.0 + boost),
    ))
}

fn storage_boost(account: &AccrualAccount, catalog: &UpgradeCatalog) -> f64 {
    account
        .owned_upgrades
        .iter()
        .filter_map(|owned| {
            catalog
                .get(&owned.upgrade_id)
                .filter(|def| def.category == UpgradeCategory::Storage)
                .map(|def| def.magnitude * as_f64(owned.quantity))
        })
        .sum()
}

/// Compute what an account has earned at `now`, without mutating anything.
///
/// Passive buckets are clamped to the headroom left under each counter's
/// storage cap.
#[must_use]
pub fn compute_accrual(
    account: &AccrualAccount,
    now: DateTime<Utc>,
    catalog: &UpgradeCatalog,
    policy: &AccrualPolicy,
) -> AccrualOutcome {
    let window = max_catch_up_window(account, catalog, policy);
    let elapsed = (now - account.last_accrual_timestamp).clamp(TimeDelta::zero(), window);
    let elapsed_hours = span_hours(elapsed);

    let mut buckets = Vec::new();
    let mut multiplier = 0.0_f64;
    let mut unknown_upgrades = Vec::new();
    let mut full_counters = Vec::new();

    for owned in &account.owned_upgrades {
        let Some(def) = catalog.get(&owned.upgrade_id) else {
            let warning = AutomationError::AccrualIntegrity {
                account_id: account.account_id.clone(),
                upgrade_id: owned.upgrade_id.clone(),
            };
            warn!(account = %account.account_id, error = %warning, "treating unknown upgrade as zero contribution");
            unknown_upgrades.push(owned.upgrade_id.clone());
            continue;
        };
        match def.category {
            UpgradeCategory::PassiveRate => {
                let mut amount = floor_units(as_f64(owned.quantity) * def.magnitude * elapsed_hours);
                if let Some(cap) = storage_cap(account, &owned.upgrade_id, catalog) {
                    let stored = account.stored_counters.get(&owned.upgrade_id).copied().unwrap_or(0);
                    let headroom = cap.saturating_sub(stored);
                    if amount >= headroom {
                        amount = headroom;
                        full_counters.push(owned.upgrade_id.clone());
                    }
                }
                if amount > 0 {
                    buckets.push(AccrualBucket {
                        upgrade_id: owned.upgrade_id.clone(),
                        amount,
                    });
                }
            }
            UpgradeCategory::PerUnitMultiplier => {
                multiplier += as_f64(owned.quantity) * def.magnitude;
            }
            UpgradeCategory::Capacity | UpgradeCategory::Storage => {}
        }
    }

    buckets.sort_by(|a, b| b.amount.cmp(&a.amount).then_with(|| a.upgrade_id.cmp(&b.upgrade_id)));
    let passive = buckets.iter().fold(0_u64, |acc, b| acc.saturating_add(b.amount));
    let active = floor_units(as_f64(policy.base_yield) * multiplier);

    AccrualOutcome {
        elapsed,
        max_catch_up_window: window,
        buckets,
        multiplier,
        active,
        passive,
        total: active.saturating_add(passive),
        unknown_upgrades,
        full_counters,
    }
}

#[allow(clippy::cast_precision_loss)]
fn as_f64(value: u64) -> f64 {
    value as f64
}

/// Floor a non-negative quantity into whole units; NaN and negatives become 0.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn floor_units(value: f64) -> u64 {
    if value.is_finite() && value > 0.0 {
        value.floor() as u64
    } else {
        0
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
fn hours_to_delta(hours: f64) -> TimeDelta {
    if !hours.is_finite() || hours <= 0.0 {
        return TimeDelta::zero();
    }
    let ms = (hours * 3_600_000.0).round();
    if ms >= i64::MAX as f64 {
        TimeDelta::MAX
    } else {
        TimeDelta::milliseconds(ms as i64)
    }
}

/// What to do when a transaction targets an account that does not exist.
#[derive(Debug, Clone, Copy)]
enum Missing {
    Create(DateTime<Utc>),
    Skip,
}

/// Transactional front end for accrual, claims and upgrade ownership.
pub struct AccrualEngine<S> {
    store: S,
    catalog: Arc<UpgradeCatalog>,
    policy: AccrualPolicy,
}

impl<S: AccountStore> AccrualEngine<S> {
    /// Create an engine over a store and catalog.
    ///
    /// # Errors
    ///
    /// Returns `AutomationError::Configuration` for an invalid policy.
    pub fn new(store: S, catalog: Arc<UpgradeCatalog>, policy: AccrualPolicy) -> AutomationResult<Self> {
        policy.validate().map_err(AutomationError::Configuration)?;
        Ok(Self {
            store,
            catalog,
            policy,
        })
    }

    /// The accrual policy in force.
    #[must_use]
    pub const fn policy(&self) -> &AccrualPolicy {
        &self.policy
    }

    /// The upgrade catalog.
    #[must_use]
    pub fn catalog(&self) -> &UpgradeCatalog {
        &self.catalog
    }

    /// The backing store.
    #[must_use]
    pub const fn store(&self) -> &S {
        &self.store
    }

    /// Pure accrual computation using this engine's catalog and policy.
    #[must_use]
    pub fn compute_accrual(&self, account: &AccrualAccount, now: DateTime<Utc>) -> AccrualOutcome {
        compute_accrual(account, now, &self.catalog, &self.policy)
    }

    /// Read an account snapshot.
    ///
    /// # Errors
    ///
    /// Store failures.
    pub fn account(&self, account_id: &str) -> AutomationResult<Option<AccrualAccount>> {
        self.store.load(account_id)
    }

    /// Credit passive earnings accrued up to `now`.
    ///
    /// This is the time-driven step run by the sweeps. Passive buckets go to
    /// the counter named after their upgrade; the active yield is left to
    /// `perform_action`, so repeated sweeps credit nothing twice. The accrual
    /// timestamp only advances when something was credited, so an account
    /// that earned nothing keeps its full catch-up eligibility.
    ///
    /// The returned outcome describes what was credited: its `active` is 0.
    ///
    /// # Errors
    ///
    /// `AutomationError::PersistenceConflict` once retries are exhausted, or a
    /// store failure.
    pub fn apply_accrual(&self, account_id: &str, now: DateTime<Utc>) -> AutomationResult<AccrualOutcome> {
        let outcome = self.credit_accrual(account_id, now, false)?;
        debug!(account = %account_id, passive = outcome.passive, "accrual applied");
        Ok(outcome)
    }

    /// Credit one action: the active yield plus passive earnings accrued up to `now`.
    ///
    /// The active yield goes to the policy's active counter on every call.
    /// The accrual timestamp follows the same rule as `apply_accrual` and
    /// only advances when passive earnings were credited.
    ///
    /// # Errors
    ///
    /// `AutomationError::PersistenceConflict` once retries are exhausted, or a
    /// store failure.
    pub fn perform_action(&self, account_id: &str, now: DateTime<Utc>) -> AutomationResult<AccrualOutcome> {
        let outcome = self.credit_accrual(account_id, now, true)?;
        debug!(
            account = %account_id,
            total = outcome.total,
            passive = outcome.passive,
            active = outcome.active,
            "action credited"
        );
        Ok(outcome)
    }

    fn credit_accrual(&self, account_id: &str, now: DateTime<Utc>, with_active: bool) -> AutomationResult<AccrualOutcome> {
        let outcome = self.transact(account_id, Missing::Create(now), |account| {
            let mut outcome = self.compute_accrual(account, now);
            if !with_active {
                outcome = outcome.passive_only();
            }
            if outcome.total == 0 {
                return Ok((outcome, false));
            }

            for bucket in &outcome.buckets {
                credit(&mut account.stored_counters, &bucket.upgrade_id, bucket.amount);
            }
            if outcome.active > 0 {
                credit(&mut account.stored_counters, &self.policy.active_counter, outcome.active);
            }
            if outcome.passive > 0 {
                account.last_accrual_timestamp = account.last_accrual_timestamp.max(now);
            }
            Ok((outcome, true))
        })?;

        // Missing::Create always yields a value.
        outcome.ok_or_else(|| AutomationError::Backend(format!("account `{account_id}` vanished")))
    }

    /// Move every stored counter into the main balance.
    ///
    /// All-or-nothing: either every counter is zeroed and the balance credited
    /// by their sum, or nothing changes. An account with nothing stored (or
    /// no account at all) yields an empty receipt and no write.
    ///
    /// # Errors
    ///
    /// `AutomationError::PersistenceConflict` once retries are exhausted, or a
    /// store failure.
    pub fn claim(&self, account_id: &str) -> AutomationResult<ClaimReceipt> {
        let receipt = self.transact(account_id, Missing::Skip, |account| {
            let mut lines: Vec<PayoutLine> = account
                .stored_counters
                .iter()
                .filter(|(_, amount)| **amount > 0)
                .map(|(sub_account, amount)| PayoutLine {
                    sub_account: sub_account.clone(),
                    amount: *amount,
                })
                .collect();
            if lines.is_empty() {
                return Ok((ClaimReceipt::default(), false));
            }

            lines.sort_by(|a, b| b.amount.cmp(&a.amount).then_with(|| a.sub_account.cmp(&b.sub_account)));
            let total = lines.iter().fold(0_u64, |acc, l| acc.saturating_add(l.amount));

            for amount in account.stored_counters.values_mut() {
                *amount = 0;
            }
            account.main_balance = account.main_balance.saturating_add(total);

            Ok((
                ClaimReceipt {
                    total_credited: total,
                    breakdown: lines.iter().map(ToString::to_string).collect(),
                    lines,
                },
                true,
            ))
        })?;

        let receipt = receipt.unwrap_or_default();
        if receipt.total_credited > 0 {
            info!(account = %account_id, total = receipt.total_credited, "stored resources claimed");
        }
        Ok(receipt)
    }

    /// Add one unit of an upgrade to an account, creating the account if needed.
    ///
    /// Returns the new quantity owned.
    ///
    /// # Errors
    ///
    /// - `AutomationError::AccrualIntegrity` if the upgrade is not in the catalog
    /// - `AutomationError::PersistenceConflict` once retries are exhausted
    pub fn grant_upgrade(&self, account_id: &str, upgrade_id: &str, now: DateTime<Utc>) -> AutomationResult<u64> {
        if self.catalog.get(upgrade_id).is_none() {
            return Err(AutomationError::AccrualIntegrity {
                account_id: account_id.to_string(),
                upgrade_id: upgrade_id.to_string(),
            });
        }

        let quantity = self.transact(account_id, Missing::Create(now), |account| {
            let quantity = match account
                .owned_upgrades
                .iter_mut()
                .find(|o| o.upgrade_id == upgrade_id)
            {
                Some(owned) => {
                    owned.quantity = owned.quantity.saturating_add(1);
                    owned.quantity
                }
                None => {
                    account.owned_upgrades.push(UpgradeOwnership {
                        upgrade_id: upgrade_id.to_string(),
                        quantity: 1,
                    });
                    1
                }
            };
            Ok((quantity, true))
        })?;
        Ok(quantity.unwrap_or(1))
    }

    /// Set an account's premium tier, creating the account if needed.
    ///
    /// # Errors
    ///
    /// `AutomationError::PersistenceConflict` once retries are exhausted, or a
    /// store failure.
    pub fn set_tier(&self, account_id: &str, tier: u32, now: DateTime<Utc>) -> AutomationResult<()> {
        self.transact(account_id, Missing::Create(now), |account| {
            let changed = account.tier != tier;
            account.tier = tier;
            Ok(((), changed))
        })?;
        Ok(())
    }

    /// Apply passive accrual to every stored account.
    ///
    /// Per-account conflicts and failures are counted and logged; the sweep
    /// carries on with the next account.
    ///
    /// # Errors
    ///
    /// Only if the account list itself cannot be read.
    pub fn apply_all(&self, now: DateTime<Utc>) -> AutomationResult<SweepReport> {
        let ids = self.store.account_ids()?;
        let mut report = SweepReport {
            accounts: ids.len(),
            ..SweepReport::default()
        };

        for id in ids {
            match self.apply_accrual(&id, now) {
                Ok(outcome) if outcome.total > 0 => {
                    report.credited_accounts += 1;
                    report.total_credited = report.total_credited.saturating_add(outcome.total);
                }
                Ok(_) => {}
                Err(AutomationError::PersistenceConflict(_)) => {
                    report.conflicts += 1;
                    warn!(account = %id, "accrual sweep skipped account after repeated conflicts");
                }
                Err(e) => {
                    report.failures += 1;
                    warn!(account = %id, error = %e, "accrual sweep failed for account");
                }
            }
        }

        info!(
            accounts = report.accounts,
            credited = report.credited_accounts,
            total = report.total_credited,
            conflicts = report.conflicts,
            "accrual sweep finished"
        );
        Ok(report)
    }

    /// Optimistic read-modify-write.
    ///
    /// `f` mutates a private copy and reports whether it changed anything.
    /// Unchanged existing accounts are not written; new accounts are always
    /// created. Returns `None` for a missing account under `Missing::Skip`.
    fn transact<T, F>(&self, account_id: &str, missing: Missing, mut f: F) -> AutomationResult<Option<T>>
    where
        F: FnMut(&mut AccrualAccount) -> AutomationResult<(T, bool)>,
    {
        for attempt in 1..=self.policy.max_transaction_retries {
            let (mut account, expected) = match (self.store.load(account_id)?, missing) {
                (Some(account), _) => {
                    let version = account.version;
                    (account, Some(version))
                }
                (None, Missing::Create(at)) => (AccrualAccount::new(account_id, at), None),
                (None, Missing::Skip) => return Ok(None),
            };

            let (value, dirty) = f(&mut account)?;
            if !dirty && expected.is_some() {
                return Ok(Some(value));
            }

            match self.store.commit(&account, expected) {
                Ok(_) => return Ok(Some(value)),
                Err(AutomationError::PersistenceConflict(_)) => {
                    debug!(account = %account_id, attempt, "transaction conflict; retrying");
                }
                Err(e) => return Err(e),
            }
        }

        warn!(
            account = %account_id,
            attempts = self.policy.max_transaction_retries,
            "transaction retries exhausted"
        );
        Err(AutomationError::PersistenceConflict(account_id.to_string()))
    }
}

impl<S> fmt::Debug for AccrualEngine<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccrualEngine")
            .field("upgrades", &self.catalog.len())
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

fn credit(counters: &mut BTreeMap<String, u64>, counter: &str, amount: u64) {
    let slot = counters.entry(counter.to_string()).or_default();
    *slot = slot.saturating_add(amount);
}
