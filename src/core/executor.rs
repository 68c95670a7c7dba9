//! Handler and entry-point traits for scheduled work.

use std::future::Future;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use crossbeam_channel::Sender;

use crate::core::log_sink::{build_job_message, JobMessage};
use crate::core::AppResult;
use crate::util::serde::{LogLevel, RunId};

/// Context passed to an orchestrator task handler on every firing.
#[derive(Debug, Clone)]
pub struct TaskContext {
    /// Registered task name.
    pub task: String,
    /// Identifier of this firing.
    pub run_id: RunId,
    /// Cluster identifier of the shard running the task.
    pub cluster_id: String,
    /// Wall-clock time the firing was dispatched.
    pub fired_at: DateTime<Utc>,
}

/// Abstraction for a recurring in-process callback.
///
/// Any `Fn(TaskContext) -> impl Future<Output = AppResult<()>>` closure is a
/// handler.
///
/// # Example
///
/// ```rust,ignore
/// orchestrator.register("refresh-cache", Duration::from_secs(60), |ctx: TaskContext| async move {
///     tracing::info!(task = %ctx.task, "refreshing");
///     Ok(())
/// }, false)?;
/// ```
#[async_trait]
pub trait TaskHandler: Send + Sync + 'static {
    /// Run one firing. Errors are logged as handler faults and do not stop the task.
    async fn run(&self, ctx: TaskContext) -> AppResult<()>;
}

#[async_trait]
impl<F, Fut> TaskHandler for F
where
    F: Fn(TaskContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = AppResult<()>> + Send + 'static,
{
    async fn run(&self, ctx: TaskContext) -> AppResult<()> {
        (self)(ctx).await
    }
}

/// Context passed to a job entry point inside its worker slot.
///
/// Messages emitted here cross the worker boundary and reach the runner's
/// log sink; the entry point never touches the sink directly.
#[derive(Debug, Clone)]
pub struct JobContext {
    job_name: String,
    run_id: RunId,
    fired_at: DateTime<Utc>,
    outbox: Sender<JobMessage>,
}

impl JobContext {
    pub(crate) fn new(
        job_name: String,
        run_id: RunId,
        fired_at: DateTime<Utc>,
        outbox: Sender<JobMessage>,
    ) -> Self {
        Self {
            job_name,
            run_id,
            fired_at,
            outbox,
        }
    }

    /// Name of the running job.
    #[must_use]
    pub fn job_name(&self) -> &str {
        &self.job_name
    }

    /// Identifier of this firing.
    #[must_use]
    pub const fn run_id(&self) -> RunId {
        self.run_id
    }

    /// Wall-clock time the firing was dispatched.
    #[must_use]
    pub const fn fired_at(&self) -> DateTime<Utc> {
        self.fired_at
    }

    /// Emit an info-level message to the log sink.
    pub fn info(&self, message: impl Into<String>) {
        self.emit(LogLevel::Info, message.into());
    }

    /// Emit an error-level message to the log sink.
    pub fn error(&self, message: impl Into<String>) {
        self.emit(LogLevel::Error, message.into());
    }

    fn emit(&self, level: LogLevel, message: String) {
        let msg = build_job_message(self.job_name.clone(), level, message, self.run_id);
        if self.outbox.send(msg).is_err() {
            tracing::debug!(job = %self.job_name, "log forwarder gone, dropping job message");
        }
    }
}

/// Entry point of an isolated job.
///
/// Runs on a dedicated worker thread with its own single-threaded tokio
/// runtime, so blocking work here never stalls the shard's event loop.
#[async_trait]
pub trait JobEntryPoint: Send + Sync + 'static {
    /// Run one firing of the job.
    async fn run(&self, ctx: JobContext) -> AppResult<()>;
}

#[async_trait]
impl<F, Fut> JobEntryPoint for F
where
    F: Fn(JobContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = AppResult<()>> + Send + 'static,
{
    async fn run(&self, ctx: JobContext) -> AppResult<()> {
        (self)(ctx).await
    }
}
