//! Small serializable identifiers shared across modules.

use serde::{Deserialize, Serialize};

/// Identifier of an account in the economy simulation.
pub type AccountId = String;

/// Identifier of a single task or job firing, used to correlate log lines.
pub type RunId = uuid::Uuid;

/// Allocate a fresh run identifier.
#[must_use]
pub fn new_run_id() -> RunId {
    uuid::Uuid::new_v4()
}

/// Severity carried by job worker messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Informational progress output.
    Info,
    /// A failure reported by the job.
    Error,
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Info => write!(f, "info"),
            Self::Error => write!(f, "error"),
        }
    }
}
