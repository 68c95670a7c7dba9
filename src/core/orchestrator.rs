//! In-process interval orchestrator with singleton gating.
//!
//! Every registered task gets its own firing loop. The next fire instant is
//! always the previous *scheduled* instant plus the period, so handler
//! latency and timer jitter never accumulate into drift. A task has at most
//! one invocation in flight; a firing that finds the previous invocation
//! still running is skipped, not queued.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::core::cluster::ClusterCoordinator;
use crate::core::error::panic_reason;
use crate::core::executor::{TaskContext, TaskHandler};
use crate::core::ticker::Ticker;
use crate::core::{AutomationError, AutomationResult};
use crate::util::clock::now_utc;
use crate::util::serde::new_run_id;

/// Per-task counters shared between the registry and the firing loop.
#[derive(Debug, Default)]
struct TaskState {
    in_flight: AtomicBool,
    armed: AtomicBool,
    fires: AtomicU64,
    skipped: AtomicU64,
    faults: AtomicU64,
    last_run: Mutex<Option<DateTime<Utc>>>,
}

impl TaskState {
    /// Record a firing time, never moving `last_run` backwards.
    fn mark_run(&self, at: DateTime<Utc>) {
        let mut last = self.last_run.lock();
        if last.is_none_or(|prev| at > prev) {
            *last = Some(at);
        }
    }
}

/// A registered recurring task.
#[derive(Clone)]
struct ScheduledTask {
    name: String,
    period: Duration,
    singleton_global: bool,
    handler: Arc<dyn TaskHandler>,
    state: Arc<TaskState>,
}

/// Point-in-time view of one task's schedule and history.
#[derive(Debug, Clone, Serialize)]
pub struct TaskSnapshot {
    /// Registered name.
    pub name: String,
    /// Firing period.
    pub period: Duration,
    /// Whether the task only runs on the primary shard.
    pub singleton_global: bool,
    /// Whether a firing loop is active for this task on this shard.
    pub armed: bool,
    /// Number of dispatched invocations.
    pub fires: u64,
    /// Number of firings skipped because the previous invocation was still running
    /// or the loop fell behind.
    pub skipped: u64,
    /// Number of invocations that failed or panicked.
    pub faults: u64,
    /// Wall-clock time of the latest dispatched invocation.
    pub last_run: Option<DateTime<Utc>>,
}

/// Recurring-task scheduler owned by one shard process.
///
/// Construct once at startup, register tasks, then `start()`. Singleton
/// tasks are registered everywhere but only armed when the coordinator
/// reports this shard as primary.
pub struct IntervalOrchestrator {
    coordinator: Arc<ClusterCoordinator>,
    tasks: Mutex<HashMap<String, ScheduledTask>>,
    loops: Mutex<Vec<JoinHandle<()>>>,
    started: AtomicBool,
    shutdown: Arc<AtomicBool>,
}

impl IntervalOrchestrator {
    /// Create an orchestrator bound to this shard's coordinator.
    #[must_use]
    pub fn new(coordinator: Arc<ClusterCoordinator>) -> Self {
        Self {
            coordinator,
            tasks: Mutex::new(HashMap::new()),
            loops: Mutex::new(Vec::new()),
            started: AtomicBool::new(false),
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Register a recurring task.
    ///
    /// Tasks registered after `start()` are armed immediately.
    ///
    /// # Errors
    ///
    /// - `AutomationError::DuplicateRegistration` if the name is taken
    /// - `AutomationError::Configuration` for a zero period
    /// - `AutomationError::ShutDown` after `shutdown()`
    pub fn register<H>(
        &self,
        name: impl Into<String>,
        period: Duration,
        handler: H,
        singleton_global: bool,
    ) -> AutomationResult<()>
    where
        H: TaskHandler,
    {
        let name = name.into();
        if period.is_zero() {
            return Err(AutomationError::Configuration(format!(
                "task `{name}` has a zero period"
            )));
        }
        if self.shutdown.load(Ordering::Acquire) {
            return Err(AutomationError::ShutDown);
        }

        let task = ScheduledTask {
            name: name.clone(),
            period,
            singleton_global,
            handler: Arc::new(handler),
            state: Arc::new(TaskState::default()),
        };

        {
            let mut tasks = self.tasks.lock();
            if tasks.contains_key(&name) {
                return Err(AutomationError::DuplicateRegistration(format!("task `{name}`")));
            }
            tasks.insert(name.clone(), task.clone());
        }

        debug!(task = %name, ?period, singleton_global, "task registered");

        if self.started.load(Ordering::Acquire) {
            self.arm(task);
        }
        Ok(())
    }

    /// Arm every registered task and return immediately.
    ///
    /// Calling `start()` twice is a no-op.
    ///
    /// # Errors
    ///
    /// - `AutomationError::Configuration` when called outside a tokio runtime
    /// - `AutomationError::ShutDown` after `shutdown()`
    pub fn start(&self) -> AutomationResult<()> {
        if self.shutdown.load(Ordering::Acquire) {
            return Err(AutomationError::ShutDown);
        }
        if tokio::runtime::Handle::try_current().is_err() {
            return Err(AutomationError::Configuration(
                "interval orchestrator must be started inside a tokio runtime".into(),
            ));
        }
        if self.started.swap(true, Ordering::AcqRel) {
            warn!("interval orchestrator already started");
            return Ok(());
        }

        let tasks: Vec<ScheduledTask> = self.tasks.lock().values().cloned().collect();
        let count = tasks.len();
        for task in tasks {
            self.arm(task);
        }

        info!(
            cluster = %self.coordinator.cluster_id(),
            primary = self.coordinator.is_primary(),
            tasks = count,
            "interval orchestrator started"
        );
        Ok(())
    }

    /// Stop every firing loop. In-flight invocations run to completion.
    pub fn shutdown(&self) {
        if self.shutdown.swap(true, Ordering::AcqRel) {
            return;
        }
        let mut loops = self.loops.lock();
        for handle in loops.drain(..) {
            handle.abort();
        }
        for task in self.tasks.lock().values() {
            task.state.armed.store(false, Ordering::Release);
        }
        info!(cluster = %self.coordinator.cluster_id(), "interval orchestrator shut down");
    }

    /// Shard identity this orchestrator gates singleton tasks on.
    #[must_use]
    pub fn coordinator(&self) -> &ClusterCoordinator {
        &self.coordinator
    }

    /// Whether `start()` has run and `shutdown()` has not.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.started.load(Ordering::Acquire) && !self.shutdown.load(Ordering::Acquire)
    }

    /// Snapshot of one task, if registered.
    #[must_use]
    pub fn task(&self, name: &str) -> Option<TaskSnapshot> {
        self.tasks.lock().get(name).map(snapshot_of)
    }

    /// Snapshot of every registered task, sorted by name.
    #[must_use]
    pub fn snapshot(&self) -> Vec<TaskSnapshot> {
        let mut all: Vec<TaskSnapshot> = self.tasks.lock().values().map(snapshot_of).collect();
        all.sort_by(|a, b| a.name.cmp(&b.name));
        all
    }

    fn arm(&self, task: ScheduledTask) {
        if task.singleton_global && !self.coordinator.is_primary() {
            debug!(
                task = %task.name,
                shard_index = self.coordinator.shard().shard_index,
                "singleton task not armed on non-primary shard"
            );
            return;
        }

        task.state.armed.store(true, Ordering::Release);
        let cluster_id = self.coordinator.cluster_id().to_string();
        let shutdown = Arc::clone(&self.shutdown);
        let handle = tokio::spawn(firing_loop(task, cluster_id, shutdown));
        self.loops.lock().push(handle);
    }
}

impl Drop for IntervalOrchestrator {
    fn drop(&mut self) {
        if !self.shutdown.swap(true, Ordering::AcqRel) {
            for handle in self.loops.get_mut().drain(..) {
                handle.abort();
            }
        }
    }
}

impl std::fmt::Debug for IntervalOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IntervalOrchestrator")
            .field("cluster_id", &self.coordinator.cluster_id())
            .field("tasks", &self.tasks.lock().len())
            .field("running", &self.is_running())
            .finish()
    }
}

fn snapshot_of(task: &ScheduledTask) -> TaskSnapshot {
    TaskSnapshot {
        name: task.name.clone(),
        period: task.period,
        singleton_global: task.singleton_global,
        armed: task.state.armed.load(Ordering::Acquire),
        fires: task.state.fires.load(Ordering::Relaxed),
        skipped: task.state.skipped.load(Ordering::Relaxed),
        faults: task.state.faults.load(Ordering::Relaxed),
        last_run: *task.state.last_run.lock(),
    }
}

/// Drive one task: sleep to the next scheduled instant, dispatch, repeat.
async fn firing_loop(task: ScheduledTask, cluster_id: String, shutdown: Arc<AtomicBool>) {
    let mut ticker = Ticker::new(task.period);

    loop {
        let missed = ticker.tick().await;
        if shutdown.load(Ordering::Acquire) {
            break;
        }
        if missed > 0 {
            task.state.skipped.fetch_add(missed, Ordering::Relaxed);
            warn!(task = %task.name, missed, "firing loop fell behind; skipping missed ticks");
        }
        dispatch(&task, &cluster_id);
    }

    debug!(task = %task.name, "firing loop stopped");
}

/// Start one invocation unless the previous one is still running.
fn dispatch(task: &ScheduledTask, cluster_id: &str) {
    if task.state.in_flight.swap(true, Ordering::AcqRel) {
        task.state.skipped.fetch_add(1, Ordering::Relaxed);
        warn!(task = %task.name, "previous invocation still running; firing skipped");
        return;
    }

    let fired_at = now_utc();
    task.state.fires.fetch_add(1, Ordering::Relaxed);
    task.state.mark_run(fired_at);

    let ctx = TaskContext {
        task: task.name.clone(),
        run_id: new_run_id(),
        cluster_id: cluster_id.to_string(),
        fired_at,
    };
    let handler = Arc::clone(&task.handler);
    let state = Arc::clone(&task.state);
    let name = task.name.clone();

    tokio::spawn(async move {
        let run_id = ctx.run_id;
        // Run the handler in its own task so a panic is caught at the join point.
        let outcome = tokio::spawn(async move { handler.run(ctx).await }).await;

        let fault = match outcome {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(format!("{e:#}")),
            Err(join_err) if join_err.is_panic() => {
                Some(format!("panicked: {}", panic_reason(&*join_err.into_panic())))
            }
            Err(join_err) => Some(format!("cancelled: {join_err}")),
        };

        match fault {
            None => debug!(task = %name, %run_id, "task invocation completed"),
            Some(reason) => {
                state.faults.fetch_add(1, Ordering::Relaxed);
                let fault = AutomationError::HandlerFault {
                    task: name.clone(),
                    reason,
                };
                error!(task = %name, %run_id, error = %fault, "task handler fault");
            }
        }

        state.in_flight.store(false, Ordering::Release);
    });
}
