//! Job log sink implementations.
//!
//! Worker slots never log directly: they emit `JobMessage`s that the runner
//! forwards to a sink. The tracing sink is the production default; the
//! in-memory sink keeps a bounded buffer for tests and diagnostics.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::util::clock::now_ms;
use crate::util::serde::{LogLevel, RunId};

/// Structured message crossing the job worker boundary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobMessage {
    /// Job that produced the message.
    pub job_name: String,
    /// Message severity.
    pub level: LogLevel,
    /// Free-form text.
    pub message: String,
    /// Firing that produced the message.
    pub run_id: RunId,
    /// Timestamp milliseconds.
    pub created_at_ms: u128,
}

/// Log sink abstraction for job worker output.
pub trait JobLogSink: Send {
    /// Record a worker message.
    fn record(&mut self, message: JobMessage);
}

/// Sink that forwards worker messages to `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingLogSink;

impl JobLogSink for TracingLogSink {
    fn record(&mut self, message: JobMessage) {
        match message.level {
            LogLevel::Info => tracing::info!(
                job = %message.job_name,
                run_id = %message.run_id,
                "[{}] {}",
                message.job_name,
                message.message
            ),
            LogLevel::Error => tracing::error!(
                job = %message.job_name,
                run_id = %message.run_id,
                "[{}] {}",
                message.job_name,
                message.message
            ),
        }
    }
}

/// In-memory sink with a bounded buffer.
///
/// Clones share the same buffer, so a test can hand one clone to the runner
/// and inspect the other.
#[derive(Debug, Clone)]
pub struct InMemoryLogSink {
    messages: Arc<Mutex<VecDeque<JobMessage>>>,
    max_messages: usize,
}

impl InMemoryLogSink {
    /// Create a new in-memory sink with a bounded buffer.
    #[must_use]
    pub fn new(max_messages: usize) -> Self {
        Self {
            messages: Arc::new(Mutex::new(VecDeque::with_capacity(max_messages.min(1024)))),
            max_messages,
        }
    }

    /// Retrieve a snapshot of stored messages.
    #[must_use]
    pub fn messages(&self) -> Vec<JobMessage> {
        self.messages.lock().iter().cloned().collect()
    }

    /// Messages emitted by one job.
    #[must_use]
    pub fn messages_for(&self, job_name: &str) -> Vec<JobMessage> {
        self.messages
            .lock()
            .iter()
            .filter(|m| m.job_name == job_name)
            .cloned()
            .collect()
    }
}

impl JobLogSink for InMemoryLogSink {
    fn record(&mut self, message: JobMessage) {
        let mut messages = self.messages.lock();
        if messages.len() >= self.max_messages {
            messages.pop_front();
        }
        messages.push_back(message);
    }
}

/// Helper to build a job message from context.
pub fn build_job_message(
    job_name: impl Into<String>,
    level: LogLevel,
    message: impl Into<String>,
    run_id: RunId,
) -> JobMessage {
    JobMessage {
        job_name: job_name.into(),
        level,
        message: message.into(),
        run_id,
        created_at_ms: now_ms(),
    }
}
