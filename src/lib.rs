//! # Shardkeeper
//!
//! Background automation for a sharded, long-running service process.
//!
//! Every shard process runs its own copy of this crate. Three subsystems cover
//! the work that happens without a user request:
//!
//! - **Interval orchestrator**: lightweight recurring callbacks on a fixed,
//!   drift-free period. Tasks flagged `singleton_global` only run on the
//!   primary shard (index 0), so cluster-wide work happens exactly once.
//! - **Isolated job runner**: heavier jobs on dedicated worker threads with
//!   their own runtimes. A crashing job kills only its own slot, which is
//!   restarted on the job's next fire.
//! - **Accrual engine**: offline economy earnings with a capped catch-up
//!   window and an all-or-nothing claim, both running as optimistic
//!   transactions so no credit is lost or doubled.
//!
//! ## Getting started
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use shardkeeper::builders::{build_automation, MaintenanceJobs};
//! use shardkeeper::config::AutomationConfig;
//! use shardkeeper::core::{AccrualEngine, ClusterCoordinator, TracingLogSink, UpgradeCatalog};
//! use shardkeeper::infra::InMemoryAccountStore;
//!
//! shardkeeper::util::init_tracing();
//! let cfg = AutomationConfig::default();
//! let coordinator = Arc::new(ClusterCoordinator::from_env()?);
//! let catalog = Arc::new(UpgradeCatalog::new(my_upgrades)?);
//! let engine = Arc::new(AccrualEngine::new(InMemoryAccountStore::new(), catalog, cfg.accrual.clone())?);
//!
//! let automation = build_automation(&cfg, coordinator, engine, TracingLogSink, MaintenanceJobs::new())?;
//! automation.start()?;
//! ```
//!
//! For complete scenarios, see:
//! - `tests/orchestrator_test.rs` - drift, singleton gating and fault isolation
//! - `tests/job_runner_test.rs` - worker slots, crashes and restarts
//! - `tests/accrual_test.rs` - catch-up clamping and concurrent claims

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

/// Scheduling, job isolation and accrual.
pub mod core;
/// Configuration models for the runner, accrual policy and built-in jobs.
pub mod config;
/// Builders to assemble automation components from configuration.
pub mod builders;
/// Infrastructure adapters for account storage.
pub mod infra;
/// User-facing API surface.
pub mod runtime;
/// Shared utilities.
pub mod util;
