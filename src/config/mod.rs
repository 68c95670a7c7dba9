//! Configuration models for the job runner, accrual policy and built-in jobs.

pub mod automation;

pub use automation::{
    AccrualPolicy, AutomationConfig, BuiltinJobsConfig, JobRunnerConfig, OrchestratorConfig,
};
