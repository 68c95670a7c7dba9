//! Builders to assemble automation components from configuration.

pub mod automation_builder;

pub use automation_builder::{
    build_automation, Automation, MaintenanceJobs, ACCRUAL_SWEEP_TASK, PURGE_USERNAMES_JOB,
    TOP_GLOBAL_JOB, WORKERS_JOB,
};
