//! In-memory account store with versioned compare-and-swap commits.

use std::collections::HashMap;

use parking_lot::RwLock;

use crate::core::accrual::{AccountStore, AccrualAccount};
use crate::core::{AutomationError, AutomationResult};
use crate::util::serde::AccountId;

/// Account store backed by a `HashMap` behind a read-write lock.
///
/// Reads clone the account; commits take the write lock, check the version,
/// and store the account with `version + 1`.
#[derive(Debug, Default)]
pub struct InMemoryAccountStore {
    accounts: RwLock<HashMap<AccountId, AccrualAccount>>,
}

impl InMemoryAccountStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed accounts directly, bypassing version checks.
    #[must_use]
    pub fn with_accounts(accounts: impl IntoIterator<Item = AccrualAccount>) -> Self {
        let store = Self::new();
        {
            let mut guard = store.accounts.write();
            for account in accounts {
                guard.insert(account.account_id.clone(), account);
            }
        }
        store
    }

    /// Number of stored accounts.
    #[must_use]
    pub fn len(&self) -> usize {
        self.accounts.read().len()
    }

    /// True if no accounts are stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.accounts.read().is_empty()
    }
}

impl AccountStore for InMemoryAccountStore {
    fn load(&self, account_id: &str) -> AutomationResult<Option<AccrualAccount>> {
        Ok(self.accounts.read().get(account_id).cloned())
    }

    fn commit(&self, account: &AccrualAccount, expected_version: Option<u64>) -> AutomationResult<u64> {
        let mut guard = self.accounts.write();
        let current = guard.get(&account.account_id).map(|a| a.version);
        if current != expected_version {
            return Err(AutomationError::PersistenceConflict(account.account_id.clone()));
        }

        let version = expected_version.map_or(1, |v| v.wrapping_add(1));
        let mut stored = account.clone();
        stored.version = version;
        guard.insert(stored.account_id.clone(), stored);
        Ok(version)
    }

    fn account_ids(&self) -> AutomationResult<Vec<AccountId>> {
        let mut ids: Vec<AccountId> = self.accounts.read().keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }
}
