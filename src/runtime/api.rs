//! API-facing response models.
//!
//! Failures never leak internals to users: any error from the engine turns
//! into a generic "try again" response and is logged with its severity.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::builders::Automation;
use crate::core::{AccountStore, AccrualEngine, AutomationError, JobHistory, TaskSnapshot};

/// Message shown to users when a claim or accrual fails.
pub const TRY_AGAIN_MESSAGE: &str = "Something went wrong, please try again.";

/// Claim result returned to users.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClaimResponse {
    /// False when the claim failed and should be retried.
    pub ok: bool,
    /// Amount moved to the main balance.
    pub total_credited: u64,
    /// Payout lines, largest first.
    pub breakdown: Vec<String>,
    /// Human-readable summary.
    pub message: String,
}

impl ClaimResponse {
    fn try_again() -> Self {
        Self {
            ok: false,
            total_credited: 0,
            breakdown: Vec::new(),
            message: TRY_AGAIN_MESSAGE.to_string(),
        }
    }
}

/// What an account would collect if accrual were applied now.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccrualPreview {
    /// Account identifier.
    pub account_id: String,
    /// Units an action now would credit, active yield included.
    pub pending: u64,
    /// Units already stored and claimable.
    pub stored: u64,
    /// Seconds of earnings counted, after clamping.
    pub elapsed_secs: i64,
    /// Catch-up window in seconds.
    pub max_catch_up_secs: i64,
}

/// Shard health payload.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Health {
    /// True while the orchestrator is running.
    pub ok: bool,
    /// Cluster identifier of this shard.
    pub cluster_id: String,
    /// Whether this shard runs singleton tasks.
    pub primary: bool,
    /// Orchestrator task states.
    pub tasks: Vec<TaskSnapshot>,
    /// Job runner histories.
    pub jobs: Vec<JobHistory>,
}

/// Claim stored resources and shape the result for users.
pub fn claim_response<S: AccountStore>(engine: &AccrualEngine<S>, account_id: &str) -> ClaimResponse {
    match engine.claim(account_id) {
        Ok(receipt) if receipt.total_credited == 0 => ClaimResponse {
            ok: true,
            total_credited: 0,
            breakdown: Vec::new(),
            message: "Nothing to claim yet.".to_string(),
        },
        Ok(receipt) => ClaimResponse {
            ok: true,
            message: format!("Claimed {}.", receipt.total_credited),
            total_credited: receipt.total_credited,
            breakdown: receipt.breakdown,
        },
        Err(e) => {
            log_failure(account_id, &e);
            ClaimResponse::try_again()
        }
    }
}

/// Preview pending accrual without writing anything.
///
/// # Errors
///
/// Returns `TRY_AGAIN_MESSAGE` if the account cannot be read.
pub fn preview<S: AccountStore>(
    engine: &AccrualEngine<S>,
    account_id: &str,
    now: DateTime<Utc>,
) -> Result<Option<AccrualPreview>, String> {
    let account = engine.account(account_id).map_err(|e| {
        log_failure(account_id, &e);
        TRY_AGAIN_MESSAGE.to_string()
    })?;
    Ok(account.map(|account| {
        let outcome = engine.compute_accrual(&account, now);
        AccrualPreview {
            stored: account.stored_total(),
            account_id: account.account_id,
            pending: outcome.total,
            elapsed_secs: outcome.elapsed.num_seconds(),
            max_catch_up_secs: outcome.max_catch_up_window.num_seconds(),
        }
    }))
}

/// Build the health payload for one shard.
pub fn health<S>(automation: &Automation<S>) -> Health {
    let coordinator = automation.orchestrator.coordinator();
    Health {
        ok: automation.orchestrator.is_running(),
        cluster_id: coordinator.cluster_id().to_string(),
        primary: coordinator.is_primary(),
        tasks: automation.orchestrator.snapshot(),
        jobs: automation.runner.histories(),
    }
}

fn log_failure(account_id: &str, error: &AutomationError) {
    warn!(
        account = %account_id,
        error = %error,
        severity = ?error.severity(),
        retryable = error.is_retryable(),
        "request failed; asking user to try again"
    );
}
