//! Automation configuration structures.

use serde::{Deserialize, Serialize};

use crate::core::job_runner::Schedule;

/// Worker pool settings for the isolated job runner.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct JobRunnerConfig {
    /// Maximum number of worker slots (one per registered job).
    pub max_workers: usize,
    /// Stack size of each worker thread in bytes.
    pub thread_stack_size: usize,
    /// Capacity of the channel carrying worker messages to the log sink.
    pub message_buffer: usize,
    /// Seconds to wait for each worker thread during shutdown before detaching it.
    pub shutdown_grace_secs: u64,
}

impl Default for JobRunnerConfig {
    fn default() -> Self {
        Self {
            max_workers: (num_cpus::get() * 2).max(8),
            thread_stack_size: 2 * 1024 * 1024,
            message_buffer: 1024,
            shutdown_grace_secs: 2,
        }
    }
}

impl JobRunnerConfig {
    /// Default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the maximum number of worker slots.
    #[must_use]
    pub const fn with_max_workers(mut self, max_workers: usize) -> Self {
        self.max_workers = max_workers;
        self
    }

    /// Set the worker thread stack size.
    #[must_use]
    pub const fn with_thread_stack_size(mut self, bytes: usize) -> Self {
        self.thread_stack_size = bytes;
        self
    }

    /// Set the worker message buffer capacity.
    #[must_use]
    pub const fn with_message_buffer(mut self, capacity: usize) -> Self {
        self.message_buffer = capacity;
        self
    }

    /// Validate runner configuration values.
    ///
    /// # Errors
    ///
    /// Returns a description of the first invalid field.
    pub fn validate(&self) -> Result<(), String> {
        if self.max_workers == 0 {
            return Err("max_workers must be greater than 0".into());
        }
        if self.thread_stack_size < 64 * 1024 {
            return Err("thread_stack_size must be at least 64 KiB".into());
        }
        if self.message_buffer == 0 {
            return Err("message_buffer must be greater than 0".into());
        }
        Ok(())
    }
}

/// Economy parameters for the accrual engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AccrualPolicy {
    /// Base per-action yield scaled by the per-unit multiplier.
    pub base_yield: u64,
    /// Catch-up window every account gets, in hours.
    pub base_catch_up_hours: f64,
    /// Extra catch-up hours per premium tier.
    pub catch_up_hours_per_tier: f64,
    /// Stored counter credited with the active (multiplier) yield.
    pub active_counter: String,
    /// Optimistic transaction attempts before reporting a conflict.
    pub max_transaction_retries: u32,
}

impl Default for AccrualPolicy {
    fn default() -> Self {
        Self {
            base_yield: 1,
            base_catch_up_hours: 2.0,
            catch_up_hours_per_tier: 1.0,
            active_counter: "base".into(),
            max_transaction_retries: 8,
        }
    }
}

impl AccrualPolicy {
    /// Validate accrual policy values.
    ///
    /// # Errors
    ///
    /// Returns a description of the first invalid field.
    pub fn validate(&self) -> Result<(), String> {
        if !self.base_catch_up_hours.is_finite() || self.base_catch_up_hours < 0.0 {
            return Err("base_catch_up_hours must be a non-negative number".into());
        }
        if !self.catch_up_hours_per_tier.is_finite() || self.catch_up_hours_per_tier < 0.0 {
            return Err("catch_up_hours_per_tier must be a non-negative number".into());
        }
        if self.active_counter.trim().is_empty() {
            return Err("active_counter must not be empty".into());
        }
        if self.max_transaction_retries == 0 {
            return Err("max_transaction_retries must be greater than 0".into());
        }
        Ok(())
    }
}

/// In-process recurring tasks owned by the orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Period of the singleton accrual sweep in seconds; 0 disables it.
    pub accrual_sweep_secs: u64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            accrual_sweep_secs: 3_600,
        }
    }
}

/// Schedules for the built-in runner jobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BuiltinJobsConfig {
    /// Schedule of the `workers` accrual job.
    pub workers: String,
    /// Schedule of the `purge-usernames` maintenance job.
    pub purge_usernames: String,
    /// Schedule of the `top-global` leaderboard job.
    pub top_global: String,
}

impl Default for BuiltinJobsConfig {
    fn default() -> Self {
        Self {
            workers: "5m".into(),
            purge_usernames: "at 3:00am".into(),
            top_global: "at 12:00am".into(),
        }
    }
}

impl BuiltinJobsConfig {
    /// Validate that every schedule expression parses.
    ///
    /// # Errors
    ///
    /// Returns a description of the first invalid schedule.
    pub fn validate(&self) -> Result<(), String> {
        for (name, expr) in [
            ("workers", &self.workers),
            ("purge_usernames", &self.purge_usernames),
            ("top_global", &self.top_global),
        ] {
            Schedule::parse(expr).map_err(|e| format!("job `{name}`: {e}"))?;
        }
        Ok(())
    }
}

/// Root automation configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AutomationConfig {
    /// Job runner worker pool.
    pub runner: JobRunnerConfig,
    /// Accrual engine parameters.
    pub accrual: AccrualPolicy,
    /// Orchestrator tasks.
    pub orchestrator: OrchestratorConfig,
    /// Built-in job schedules.
    pub jobs: BuiltinJobsConfig,
}

impl AutomationConfig {
    /// Validate every section.
    ///
    /// # Errors
    ///
    /// Returns the first failing section and reason.
    pub fn validate(&self) -> Result<(), String> {
        self.runner.validate().map_err(|e| format!("runner invalid: {e}"))?;
        self.accrual.validate().map_err(|e| format!("accrual invalid: {e}"))?;
        self.jobs.validate().map_err(|e| format!("jobs invalid: {e}"))?;
        Ok(())
    }

    /// Parse automation configuration from a JSON string and validate.
    ///
    /// # Errors
    ///
    /// Returns a parse or validation message.
    pub fn from_json_str(input: &str) -> Result<Self, String> {
        let cfg: Self = serde_json::from_str(input).map_err(|e| format!("parse error: {e}"))?;
        cfg.validate()?;
        Ok(cfg)
    }
}
