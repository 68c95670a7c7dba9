//! Isolated job runner with supervised worker slots.
//!
//! Jobs are heavier, crash-resilient periodic work kept off the shard's
//! event-handling path. Each registered job owns one worker slot: a
//! dedicated OS thread with its own single-threaded tokio runtime. Timers run
//! on the caller's runtime and only hand fires to slots, so `start()` never
//! waits on job completion.
//!
//! # Key Features
//!
//! - **Isolation**: a panicking entry point kills only its own slot
//! - **Supervised restart**: a dead slot is replaced on the job's next fire
//! - **Bounded**: at most `max_workers` slots, one in-flight run per job
//! - **Structured output**: workers emit `JobMessage`s forwarded to a `JobLogSink`
//!
//! # Example
//!
//! ```rust,ignore
//! use shardkeeper::core::{JobRunner, JobContext, Schedule, TracingLogSink};
//! use shardkeeper::config::JobRunnerConfig;
//!
//! let runner = JobRunner::new(JobRunnerConfig::new(), TracingLogSink)?;
//! runner.register("workers", Schedule::parse("5m")?, |ctx: JobContext| async move {
//!     ctx.info("tick");
//!     Ok(())
//! })?;
//! runner.start()?;
//! ```

mod schedule;
mod slot;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use chrono::{DateTime, Utc};
use crossbeam_channel::{bounded, Receiver, Sender};
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::config::JobRunnerConfig;
use crate::core::executor::JobEntryPoint;
use crate::core::log_sink::{JobLogSink, JobMessage};
use crate::core::ticker::Ticker;
use crate::core::{AutomationError, AutomationResult};
use crate::util::clock::{Clock, SystemClock};
use crate::util::serde::new_run_id;

pub use schedule::Schedule;
use slot::{spawn_slot, Fire, Offer, SlotSpec, WorkerSlot};

/// Execution history shared between the runner, its timer and the job's slot.
#[derive(Debug, Default)]
pub(crate) struct JobState {
    pub busy: AtomicBool,
    pub fires: AtomicU64,
    pub skipped: AtomicU64,
    pub failures: AtomicU64,
    pub crashes: AtomicU64,
    pub restarts: AtomicU64,
    pub last_run: Mutex<Option<DateTime<Utc>>>,
    pub last_error: Mutex<Option<String>>,
}

impl JobState {
    fn mark_run(&self, at: DateTime<Utc>) {
        let mut last = self.last_run.lock();
        if last.is_none_or(|prev| at > prev) {
            *last = Some(at);
        }
    }
}

/// Point-in-time execution history of one job.
#[derive(Debug, Clone, Serialize)]
pub struct JobHistory {
    /// Registered name.
    pub name: String,
    /// Schedule the job fires on.
    pub schedule: Schedule,
    /// Dispatch time of the most recent run.
    pub last_run: Option<DateTime<Utc>>,
    /// Error of the most recent run, `None` if it succeeded.
    pub last_error: Option<String>,
    /// Runs handed to the worker slot.
    pub fires: u64,
    /// Fires dropped because a run was still in progress or the timer fell behind.
    pub skipped: u64,
    /// Runs whose entry point returned an error.
    pub failures: u64,
    /// Runs that crashed the worker slot.
    pub crashes: u64,
    /// Times the worker slot was replaced after a crash.
    pub restarts: u64,
    /// Whether a run is in progress, or a crashed slot is waiting for its restart.
    pub running: bool,
}

/// A registered job and its worker slot.
#[derive(Clone)]
struct JobEntry {
    name: String,
    schedule: Schedule,
    spec: SlotSpec,
    slot: Arc<Mutex<Option<WorkerSlot>>>,
    clock: Arc<dyn Clock>,
    shutdown: Arc<AtomicBool>,
}

impl JobEntry {
    fn history(&self) -> JobHistory {
        let state = &self.spec.state;
        JobHistory {
            name: self.name.clone(),
            schedule: self.schedule.clone(),
            last_run: *state.last_run.lock(),
            last_error: state.last_error.lock().clone(),
            fires: state.fires.load(Ordering::Relaxed),
            skipped: state.skipped.load(Ordering::Relaxed),
            failures: state.failures.load(Ordering::Relaxed),
            crashes: state.crashes.load(Ordering::Relaxed),
            restarts: state.restarts.load(Ordering::Relaxed),
            running: state.busy.load(Ordering::Acquire),
        }
    }
}

/// Runner for calendar and interval jobs in isolated worker slots.
pub struct JobRunner {
    config: JobRunnerConfig,
    jobs: Mutex<HashMap<String, JobEntry>>,
    outbox: Sender<JobMessage>,
    stop_forwarder: Mutex<Option<Sender<()>>>,
    forwarder: Mutex<Option<thread::JoinHandle<()>>>,
    timers: Mutex<Vec<tokio::task::JoinHandle<()>>>,
    clock: Arc<dyn Clock>,
    started: AtomicBool,
    shutdown: Arc<AtomicBool>,
}

impl JobRunner {
    /// Create a runner that forwards worker messages to `sink`.
    ///
    /// # Errors
    ///
    /// - `AutomationError::Configuration` if the configuration is invalid
    /// - `AutomationError::Backend` if the log forwarder thread cannot be spawned
    pub fn new<S>(config: JobRunnerConfig, sink: S) -> AutomationResult<Self>
    where
        S: JobLogSink + 'static,
    {
        config.validate().map_err(AutomationError::Configuration)?;

        let (outbox, inbox) = bounded::<JobMessage>(config.message_buffer);
        let (stop_tx, stop_rx) = bounded::<()>(0);
        let forwarder = spawn_forwarder(inbox, stop_rx, Box::new(sink))
            .map_err(|e| AutomationError::Backend(format!("log forwarder: {e}")))?;

        info!(
            max_workers = config.max_workers,
            message_buffer = config.message_buffer,
            "job runner initialized"
        );

        Ok(Self {
            config,
            jobs: Mutex::new(HashMap::new()),
            outbox,
            stop_forwarder: Mutex::new(Some(stop_tx)),
            forwarder: Mutex::new(Some(forwarder)),
            timers: Mutex::new(Vec::new()),
            clock: Arc::new(SystemClock),
            started: AtomicBool::new(false),
            shutdown: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Use `clock` for calendar schedules and fire timestamps.
    #[must_use]
    pub fn with_clock<C: Clock + 'static>(mut self, clock: C) -> Self {
        let clock: Arc<dyn Clock> = Arc::new(clock);
        for job in self.jobs.get_mut().values_mut() {
            job.clock = Arc::clone(&clock);
        }
        self.clock = clock;
        self
    }

    /// Register a job. Jobs registered after `start()` are armed immediately.
    ///
    /// # Errors
    ///
    /// - `AutomationError::DuplicateRegistration` if the name is taken
    /// - `AutomationError::Configuration` if every worker slot is allocated
    /// - `AutomationError::ShutDown` after `shutdown()`
    pub fn register<E>(
        &self,
        name: impl Into<String>,
        schedule: Schedule,
        entry: E,
    ) -> AutomationResult<()>
    where
        E: JobEntryPoint,
    {
        let name = name.into();
        if self.shutdown.load(Ordering::Acquire) {
            return Err(AutomationError::ShutDown);
        }

        let job = JobEntry {
            name: name.clone(),
            schedule,
            spec: SlotSpec {
                job_name: name.clone(),
                entry: Arc::new(entry),
                state: Arc::new(JobState::default()),
                outbox: self.outbox.clone(),
                stack_size: self.config.thread_stack_size,
            },
            slot: Arc::new(Mutex::new(None)),
            clock: Arc::clone(&self.clock),
            shutdown: Arc::clone(&self.shutdown),
        };

        {
            let mut jobs = self.jobs.lock();
            if jobs.contains_key(&name) {
                return Err(AutomationError::DuplicateRegistration(format!("job `{name}`")));
            }
            if jobs.len() >= self.config.max_workers {
                return Err(AutomationError::Configuration(format!(
                    "cannot register job `{name}`: all {} worker slots allocated",
                    self.config.max_workers
                )));
            }
            jobs.insert(name.clone(), job.clone());
        }

        debug!(job = %name, schedule = %job.schedule, "job registered");

        if self.started.load(Ordering::Acquire) {
            self.arm(job);
        }
        Ok(())
    }

    /// Register a job from a schedule expression such as `"5m"` or `"at 3:00am"`.
    ///
    /// # Errors
    ///
    /// As `register`, plus `AutomationError::Configuration` for a bad expression.
    pub fn register_expr<E>(&self, name: impl Into<String>, expr: &str, entry: E) -> AutomationResult<()>
    where
        E: JobEntryPoint,
    {
        self.register(name, Schedule::parse(expr)?, entry)
    }

    /// Arm every registered job and return immediately.
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
                "job runner must be started inside a tokio runtime".into(),
            ));
        }
        if self.started.swap(true, Ordering::AcqRel) {
            warn!("job runner already started");
            return Ok(());
        }

        let jobs: Vec<JobEntry> = self.jobs.lock().values().cloned().collect();
        let count = jobs.len();
        for job in jobs {
            self.arm(job);
        }
        info!(jobs = count, "job runner started");
        Ok(())
    }

    /// Fire a job now, outside its schedule. Honors the one-run-per-job rule.
    ///
    /// Returns `true` if the run was handed to the worker slot.
    ///
    /// # Errors
    ///
    /// - `AutomationError::NotRegistered` for an unknown job
    /// - `AutomationError::ShutDown` after `shutdown()`
    pub fn trigger(&self, name: &str) -> AutomationResult<bool> {
        if self.shutdown.load(Ordering::Acquire) {
            return Err(AutomationError::ShutDown);
        }
        let job = self
            .jobs
            .lock()
            .get(name)
            .cloned()
            .ok_or_else(|| AutomationError::NotRegistered(format!("job `{name}`")))?;
        Ok(dispatch(&job))
    }

    /// History of one job, if registered.
    #[must_use]
    pub fn history(&self, name: &str) -> Option<JobHistory> {
        self.jobs.lock().get(name).map(JobEntry::history)
    }

    /// History of every job, sorted by name.
    #[must_use]
    pub fn histories(&self) -> Vec<JobHistory> {
        let mut all: Vec<JobHistory> = self.jobs.lock().values().map(JobEntry::history).collect();
        all.sort_by(|a, b| a.name.cmp(&b.name));
        all
    }

    /// Disarm timers, stop worker slots and flush the log forwarder.
    ///
    /// Each worker gets `shutdown_grace_secs` to finish its current run before
    /// it is detached.
    pub fn shutdown(&self) {
        if self.shutdown.swap(true, Ordering::AcqRel) {
            return;
        }
        info!("shutting down job runner");

        for timer in self.timers.lock().drain(..) {
            timer.abort();
        }

        let slots: Vec<(String, WorkerSlot)> = self
            .jobs
            .lock()
            .values()
            .filter_map(|job| job.slot.lock().take().map(|slot| (job.name.clone(), slot)))
            .collect();
        let grace = Duration::from_secs(self.config.shutdown_grace_secs);
        let slot_count = slots.len();
        for (name, slot) in slots {
            join_with_grace(slot.close(), grace, &name);
        }

        // Slots are gone; let the forwarder drain what they emitted and exit.
        self.stop_forwarder.lock().take();
        if let Some(forwarder) = self.forwarder.lock().take() {
            join_with_grace(forwarder, grace, "log-forwarder");
        }

        info!(slots = slot_count, "job runner shut down complete");
    }

    fn arm(&self, job: JobEntry) {
        ensure_slot(&job);
        let handle = tokio::spawn(timer_loop(job));
        self.timers.lock().push(handle);
    }
}

impl Drop for JobRunner {
    fn drop(&mut self) {
        // Signal shutdown but don't join: explicit shutdown() is the graceful path.
        if !self.shutdown.swap(true, Ordering::AcqRel) {
            for timer in self.timers.get_mut().drain(..) {
                timer.abort();
            }
            for job in self.jobs.get_mut().values() {
                if let Some(slot) = job.slot.lock().take() {
                    drop(slot.close());
                }
            }
            self.stop_forwarder.get_mut().take();
            debug!("JobRunner dropped without explicit shutdown - workers will be detached");
        }
    }
}

impl std::fmt::Debug for JobRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobRunner")
            .field("config", &self.config)
            .field("clock", &self.clock)
            .field("jobs", &self.jobs.lock().len())
            .field("started", &self.started.load(Ordering::Relaxed))
            .field("shutdown", &self.shutdown.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

/// Make sure the job has a live slot, replacing a dead one.
///
/// Returns `false` if no slot could be spawned or the runner is shutting down.
fn ensure_slot(job: &JobEntry) -> bool {
    let mut slot = job.slot.lock();
    // Checked under the slot lock: shutdown sets the flag before taking slots.
    if job.shutdown.load(Ordering::Acquire) {
        return false;
    }
    if slot.as_ref().is_some_and(|s| !s.is_finished()) {
        return true;
    }

    let generation = match slot.take() {
        Some(dead) => {
            let generation = dead.generation() + 1;
            // The thread has already exited; this join does not block.
            let _ = dead.close().join();
            job.spec.state.restarts.fetch_add(1, Ordering::Relaxed);
            // A crashed slot leaves its busy flag set so no fire is lost to a dying thread.
            job.spec.state.busy.store(false, Ordering::Release);
            warn!(job = %job.name, generation, "restarting worker slot");
            generation
        }
        None => 0,
    };

    match spawn_slot(&job.spec, generation) {
        Ok(fresh) => {
            *slot = Some(fresh);
            true
        }
        Err(e) => {
            error!(job = %job.name, error = %e, "failed to spawn worker slot");
            false
        }
    }
}

/// Hand one fire to the job's slot. Returns `true` if the run was accepted.
fn dispatch(job: &JobEntry) -> bool {
    let state = &job.spec.state;
    if job.shutdown.load(Ordering::Acquire) {
        return false;
    }
    if !ensure_slot(job) {
        state.skipped.fetch_add(1, Ordering::Relaxed);
        return false;
    }

    if state.busy.swap(true, Ordering::AcqRel) {
        state.skipped.fetch_add(1, Ordering::Relaxed);
        warn!(job = %job.name, "previous run still in progress; fire skipped");
        return false;
    }

    let fire = Fire {
        run_id: new_run_id(),
        fired_at: job.clock.now(),
    };

    let offer = match job.slot.lock().as_ref() {
        Some(worker) => worker.offer(fire),
        None => Offer::Rejected(fire),
    };

    match offer {
        Offer::Accepted => {
            state.fires.fetch_add(1, Ordering::Relaxed);
            state.mark_run(fire.fired_at);
            debug!(job = %job.name, run_id = %fire.run_id, "job fired");
            true
        }
        Offer::Rejected(fire) => {
            state.busy.store(false, Ordering::Release);
            state.skipped.fetch_add(1, Ordering::Relaxed);
            warn!(job = %job.name, run_id = %fire.run_id, "worker slot refused fire");
            false
        }
    }
}

/// Next calendar target strictly after `floor`, and how long to wait for it from `now`.
fn calendar_wait(schedule: &Schedule, floor: DateTime<Utc>, now: DateTime<Utc>) -> (DateTime<Utc>, Duration) {
    let target = schedule.next_after(floor);
    let wait = (target - now).to_std().unwrap_or(Duration::ZERO);
    (target, wait)
}

/// Fire a job on its schedule until the runner shuts down.
async fn timer_loop(job: JobEntry) {
    let shutdown = Arc::clone(&job.shutdown);
    match job.schedule {
        Schedule::Interval { every } => {
            let mut ticker = Ticker::new(every);
            loop {
                let missed = ticker.tick().await;
                if shutdown.load(Ordering::Acquire) {
                    break;
                }
                if missed > 0 {
                    job.spec.state.skipped.fetch_add(missed, Ordering::Relaxed);
                    warn!(job = %job.name, missed, "job timer fell behind; skipping missed fires");
                }
                dispatch(&job);
            }
        }
        Schedule::DailyAt { .. } => {
            let mut floor = job.clock.now();
            loop {
                let (target, wait) = calendar_wait(&job.schedule, floor, job.clock.now());
                debug!(job = %job.name, next = %target, "calendar job armed");
                tokio::time::sleep(wait).await;
                if shutdown.load(Ordering::Acquire) {
                    break;
                }
                dispatch(&job);
                floor = target.max(job.clock.now());
            }
        }
    }
    debug!(job = %job.name, "job timer stopped");
}

fn spawn_forwarder(
    inbox: Receiver<JobMessage>,
    stop: Receiver<()>,
    mut sink: Box<dyn JobLogSink>,
) -> std::io::Result<thread::JoinHandle<()>> {
    thread::Builder::new()
        .name("job-log-forwarder".into())
        .spawn(move || loop {
            let keep_going = crossbeam_channel::select! {
                recv(inbox) -> msg => match msg {
                    Ok(msg) => {
                        sink.record(msg);
                        true
                    }
                    Err(_) => false,
                },
                recv(stop) -> _ => {
                    for msg in inbox.try_iter() {
                        sink.record(msg);
                    }
                    false
                }
            };
            if !keep_going {
                break;
            }
        })
}

/// Join a thread, detaching it if it does not exit within `grace`.
fn join_with_grace(handle: thread::JoinHandle<()>, grace: Duration, label: &str) {
    let (tx, rx) = bounded::<bool>(1);
    let joiner = thread::spawn(move || {
        let _ = tx.send(handle.join().is_ok());
    });

    match rx.recv_timeout(grace) {
        Ok(true) => {
            debug!(thread = label, "worker joined successfully");
            let _ = joiner.join();
        }
        Ok(false) => {
            warn!(thread = label, "worker panicked during shutdown");
            let _ = joiner.join();
        }
        Err(_) => {
            warn!(thread = label, "worker did not exit within grace period - detaching");
        }
    }
}
