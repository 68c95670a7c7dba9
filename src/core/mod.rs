//! Scheduling, job isolation and accrual.

pub mod accrual;
pub mod cluster;
pub mod error;
pub mod executor;
pub mod job_runner;
pub mod log_sink;
pub mod orchestrator;
pub(crate) mod ticker;

pub use accrual::{
    compute_accrual, max_catch_up_window, storage_cap, AccountStore, AccrualAccount, AccrualBucket,
    AccrualEngine, AccrualOutcome, ClaimReceipt, PayoutLine, SweepReport, UpgradeCatalog,
    UpgradeCategory, UpgradeDefinition, UpgradeOwnership,
};
pub use cluster::{ClusterCoordinator, ShardDescriptor};
pub use error::{AppResult, AutomationError, AutomationResult, Severity};
pub use executor::{JobContext, JobEntryPoint, TaskContext, TaskHandler};
pub use job_runner::{JobHistory, JobRunner, Schedule};
pub use log_sink::{build_job_message, InMemoryLogSink, JobLogSink, JobMessage, TracingLogSink};
pub use orchestrator::{IntervalOrchestrator, TaskSnapshot};
