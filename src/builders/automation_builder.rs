//! Wire the orchestrator, job runner and accrual engine together.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::config::AutomationConfig;
use crate::core::{
    AccountStore, AccrualEngine, AppResult, AutomationError, AutomationResult, ClusterCoordinator,
    IntervalOrchestrator, JobContext, JobEntryPoint, JobLogSink, JobRunner, Schedule, TaskContext,
};

/// Orchestrator task applying accrual to every account on the primary shard.
pub const ACCRUAL_SWEEP_TASK: &str = "accrual-sweep";
/// Runner job applying accrual to every account.
pub const WORKERS_JOB: &str = "workers";
/// Runner job purging stale usernames.
pub const PURGE_USERNAMES_JOB: &str = "purge-usernames";
/// Runner job rebuilding the global leaderboard.
pub const TOP_GLOBAL_JOB: &str = "top-global";

/// Caller-supplied maintenance entry points. Absent jobs are not registered.
#[derive(Default)]
pub struct MaintenanceJobs {
    /// Body of the `purge-usernames` job.
    pub purge_usernames: Option<Arc<dyn JobEntryPoint>>,
    /// Body of the `top-global` job.
    pub top_global: Option<Arc<dyn JobEntryPoint>>,
}

impl MaintenanceJobs {
    /// No maintenance jobs.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Supply the `purge-usernames` body.
    #[must_use]
    pub fn with_purge_usernames<E: JobEntryPoint>(mut self, entry: E) -> Self {
        self.purge_usernames = Some(Arc::new(entry));
        self
    }

    /// Supply the `top-global` body.
    #[must_use]
    pub fn with_top_global<E: JobEntryPoint>(mut self, entry: E) -> Self {
        self.top_global = Some(Arc::new(entry));
        self
    }
}

impl fmt::Debug for MaintenanceJobs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MaintenanceJobs")
            .field("purge_usernames", &self.purge_usernames.is_some())
            .field("top_global", &self.top_global.is_some())
            .finish()
    }
}

/// Assembled automation for one shard.
#[derive(Debug)]
pub struct Automation<S> {
    /// Interval orchestrator.
    pub orchestrator: IntervalOrchestrator,
    /// Isolated job runner.
    pub runner: JobRunner,
    /// Accrual engine shared with the built-in jobs.
    pub engine: Arc<AccrualEngine<S>>,
}

impl<S> Automation<S> {
    /// Start the orchestrator and the runner.
    ///
    /// # Errors
    ///
    /// As `IntervalOrchestrator::start` and `JobRunner::start`.
    pub fn start(&self) -> AutomationResult<()> {
        self.orchestrator.start()?;
        self.runner.start()
    }

    /// Stop scheduling and join the worker slots.
    pub fn shutdown(&self) {
        self.orchestrator.shutdown();
        self.runner.shutdown();
    }
}

/// Build the automation stack from configuration and register the built-in jobs.
///
/// # Errors
///
/// - `AutomationError::Configuration` for invalid configuration
/// - any registration error from the orchestrator or runner
pub fn build_automation<S, L>(
    cfg: &AutomationConfig,
    coordinator: Arc<ClusterCoordinator>,
    engine: Arc<AccrualEngine<S>>,
    sink: L,
    maintenance: MaintenanceJobs,
) -> AutomationResult<Automation<S>>
where
    S: AccountStore + 'static,
    L: JobLogSink + 'static,
{
    cfg.validate()
        .map_err(|e| AutomationError::Configuration(format!("config invalid: {e}")))?;

    let orchestrator = IntervalOrchestrator::new(coordinator);
    if cfg.orchestrator.accrual_sweep_secs > 0 {
        let engine = Arc::clone(&engine);
        orchestrator.register(
            ACCRUAL_SWEEP_TASK,
            Duration::from_secs(cfg.orchestrator.accrual_sweep_secs),
            move |ctx: TaskContext| {
                let engine = Arc::clone(&engine);
                async move {
                    tokio::task::spawn_blocking(move || engine.apply_all(ctx.fired_at)).await??;
                    AppResult::Ok(())
                }
            },
            true,
        )?;
    }

    let runner = JobRunner::new(cfg.runner.clone(), sink)?;
    {
        let engine = Arc::clone(&engine);
        runner.register(
            WORKERS_JOB,
            Schedule::parse(&cfg.jobs.workers)?,
            move |ctx: JobContext| {
                let engine = Arc::clone(&engine);
                async move {
                    let report = engine.apply_all(ctx.fired_at())?;
                    ctx.info(format!(
                        "credited {} across {} of {} accounts",
                        report.total_credited, report.credited_accounts, report.accounts
                    ));
                    if report.conflicts > 0 {
                        ctx.error(format!("{} accounts skipped after conflicts", report.conflicts));
                    }
                    AppResult::Ok(())
                }
            },
        )?;
    }

    let mut registered = vec![WORKERS_JOB];
    if let Some(entry) = maintenance.purge_usernames {
        runner.register(PURGE_USERNAMES_JOB, Schedule::parse(&cfg.jobs.purge_usernames)?, shared(entry))?;
        registered.push(PURGE_USERNAMES_JOB);
    }
    if let Some(entry) = maintenance.top_global {
        runner.register(TOP_GLOBAL_JOB, Schedule::parse(&cfg.jobs.top_global)?, shared(entry))?;
        registered.push(TOP_GLOBAL_JOB);
    }

    info!(
        sweep_secs = cfg.orchestrator.accrual_sweep_secs,
        jobs = ?registered,
        "automation assembled"
    );

    Ok(Automation {
        orchestrator,
        runner,
        engine,
    })
}

type JobFuture = Pin<Box<dyn Future<Output = AppResult<()>> + Send>>;

fn shared(entry: Arc<dyn JobEntryPoint>) -> impl Fn(JobContext) -> JobFuture + Send + Sync + 'static {
    move |ctx: JobContext| {
        let entry = Arc::clone(&entry);
        Box::pin(async move { entry.run(ctx).await }) as JobFuture
    }
}
