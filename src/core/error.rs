//! Error types for scheduler, job runner and accrual operations.

use thiserror::Error;

/// How an error should be treated by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// The process must not start (or the call site is a programmer error).
    Fatal,
    /// Logged; the owning schedule keeps running.
    Recoverable,
    /// Work continued with a reduced result.
    Degraded,
    /// The caller may retry the same operation.
    Retryable,
}

/// Errors produced by automation components.
#[derive(Debug, Error)]
pub enum AutomationError {
    /// Startup configuration is missing or invalid.
    #[error("configuration error: {0}")]
    Configuration(String),
    /// A task or job name is already registered.
    #[error("duplicate registration: {0}")]
    DuplicateRegistration(String),
    /// A task handler returned an error or panicked.
    #[error("handler fault in task `{task}`: {reason}")]
    HandlerFault {
        /// Task name.
        task: String,
        /// Error or panic message.
        reason: String,
    },
    /// A job worker slot died while running its entry point.
    #[error("job worker crashed for `{job}`: {reason}")]
    JobWorkerCrash {
        /// Job name.
        job: String,
        /// Panic message, if one could be recovered.
        reason: String,
    },
    /// An account references an upgrade id missing from the catalog.
    #[error("unknown upgrade `{upgrade_id}` on account `{account_id}`")]
    AccrualIntegrity {
        /// Account holding the reference.
        account_id: String,
        /// The unresolved upgrade id.
        upgrade_id: String,
    },
    /// Optimistic version check failed after all retries.
    #[error("persistence conflict on account `{0}`")]
    PersistenceConflict(String),
    /// Lookup of an unregistered task or job.
    #[error("not registered: {0}")]
    NotRegistered(String),
    /// The component has been shut down.
    #[error("shut down")]
    ShutDown,
    /// Backend-specific failure with context.
    #[error("backend error: {0}")]
    Backend(String),
}

impl AutomationError {
    /// Classify the error per the automation error table.
    #[must_use]
    pub const fn severity(&self) -> Severity {
        match self {
            Self::Configuration(_) | Self::DuplicateRegistration(_) | Self::NotRegistered(_) => {
                Severity::Fatal
            }
            Self::HandlerFault { .. } | Self::JobWorkerCrash { .. } | Self::ShutDown => {
                Severity::Recoverable
            }
            Self::AccrualIntegrity { .. } => Severity::Degraded,
            Self::PersistenceConflict(_) | Self::Backend(_) => Severity::Retryable,
        }
    }

    /// Whether the caller should retry the failed operation.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self.severity(), Severity::Retryable)
    }
}

/// Application-facing result using anyhow for higher-level contexts.
pub type AppResult<T> = Result<T, anyhow::Error>;

/// Result alias for automation component operations.
pub type AutomationResult<T> = Result<T, AutomationError>;

/// Best-effort extraction of a panic message from a panic payload.
pub(crate) fn panic_reason(payload: &(dyn std::any::Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string panic payload".to_string())
}
