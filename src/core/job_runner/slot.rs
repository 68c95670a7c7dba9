//! Worker slots: one dedicated OS thread per job.
//!
//! Each slot owns a single-threaded tokio runtime, so an entry point that
//! blocks or spins never touches the shard's main runtime. A panic inside
//! an entry point is caught at the slot boundary, recorded as a worker crash,
//! and ends the slot; the runner spawns a fresh slot on the job's next fire.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

use chrono::{DateTime, Utc};
use crossbeam_channel::{bounded, Sender, TrySendError};
use tracing::{debug, error, warn};

use crate::core::error::panic_reason;
use crate::core::executor::{JobContext, JobEntryPoint};
use crate::core::log_sink::JobMessage;
use crate::core::AutomationError;
use crate::util::serde::RunId;

use super::JobState;

/// One firing handed to a slot.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Fire {
    pub run_id: RunId,
    pub fired_at: DateTime<Utc>,
}

/// Outcome of offering a fire to a slot.
pub(crate) enum Offer {
    Accepted,
    /// The slot is gone or still holds a pending fire; the fire comes back.
    Rejected(Fire),
}

/// Handle to a running worker thread.
pub(crate) struct WorkerSlot {
    generation: u64,
    fire_tx: Sender<Fire>,
    handle: JoinHandle<()>,
}

impl WorkerSlot {
    /// Generation number; increments each time the job's slot is restarted.
    pub(crate) const fn generation(&self) -> u64 {
        self.generation
    }

    /// True once the worker thread has exited (crash or shutdown).
    pub(crate) fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Hand a fire to the worker without blocking.
    pub(crate) fn offer(&self, fire: Fire) -> Offer {
        match self.fire_tx.try_send(fire) {
            Ok(()) => Offer::Accepted,
            Err(TrySendError::Full(fire) | TrySendError::Disconnected(fire)) => Offer::Rejected(fire),
        }
    }

    /// Close the fire channel and hand back the thread handle for joining.
    pub(crate) fn close(self) -> JoinHandle<()> {
        drop(self.fire_tx);
        self.handle
    }
}

/// Everything a slot needs to run one job.
#[derive(Clone)]
pub(crate) struct SlotSpec {
    pub job_name: String,
    pub entry: Arc<dyn JobEntryPoint>,
    pub state: Arc<JobState>,
    pub outbox: Sender<JobMessage>,
    pub stack_size: usize,
}

/// Spawn a worker thread for a job.
pub(crate) fn spawn_slot(spec: &SlotSpec, generation: u64) -> std::io::Result<WorkerSlot> {
    // Capacity 1: the runner's busy flag already guarantees a single in-flight fire.
    let (fire_tx, fire_rx) = bounded::<Fire>(1);
    let SlotSpec {
        job_name,
        entry,
        state,
        outbox,
        stack_size,
    } = spec.clone();

    let handle = thread::Builder::new()
        .name(format!("job-{job_name}-{generation}"))
        .stack_size(stack_size)
        .spawn(move || {
            debug!(job = %job_name, generation, "worker slot started");

            let rt = match tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
            {
                Ok(rt) => rt,
                Err(e) => {
                    error!(job = %job_name, error = %e, "failed to create worker runtime");
                    return;
                }
            };

            // Blocks until a fire arrives; exits when the runner drops the sender.
            while let Ok(fire) = fire_rx.recv() {
                let ctx = JobContext::new(job_name.clone(), fire.run_id, fire.fired_at, outbox.clone());
                let started = Instant::now();

                let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
                    rt.block_on(entry.run(ctx.clone()))
                }));

                match outcome {
                    Ok(Ok(())) => {
                        *state.last_error.lock() = None;
                        debug!(
                            job = %job_name,
                            run_id = %fire.run_id,
                            elapsed_ms = started.elapsed().as_millis(),
                            "job run completed"
                        );
                    }
                    Ok(Err(e)) => {
                        let reason = format!("{e:#}");
                        state.failures.fetch_add(1, Ordering::Relaxed);
                        warn!(job = %job_name, run_id = %fire.run_id, error = %reason, "job run failed");
                        ctx.error(reason.clone());
                        *state.last_error.lock() = Some(reason);
                    }
                    Err(payload) => {
                        let crash = AutomationError::JobWorkerCrash {
                            job: job_name.clone(),
                            reason: panic_reason(&*payload),
                        };
                        state.crashes.fetch_add(1, Ordering::Relaxed);
                        error!(
                            job = %job_name,
                            run_id = %fire.run_id,
                            generation,
                            error = %crash,
                            "job worker crashed; slot restarts on next fire"
                        );
                        ctx.error(crash.to_string());
                        *state.last_error.lock() = Some(crash.to_string());
                        // Leave `busy` set: the runner clears it when it replaces this slot.
                        break;
                    }
                }

                state.busy.store(false, Ordering::Release);
            }

            debug!(job = %job_name, generation, "worker slot exiting");
        })?;

    Ok(WorkerSlot {
        generation,
        fire_tx,
        handle,
    })
}
