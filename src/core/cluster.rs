//! Shard identity and the static primary-shard rule.

use serde::{Deserialize, Serialize};

use crate::core::{AutomationError, AutomationResult};

/// Environment variable holding this process's shard index.
pub const SHARD_INDEX_ENV: &str = "SHARD_INDEX";
/// Environment variable holding the total number of shards.
pub const SHARD_COUNT_ENV: &str = "SHARD_COUNT";
/// Optional environment variable overriding the cluster identifier.
pub const CLUSTER_ID_ENV: &str = "CLUSTER_ID";

/// Identity of one shard process. Immutable after startup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardDescriptor {
    /// Zero-based index of this shard.
    pub shard_index: u32,
    /// Total number of shards in the deployment.
    pub shard_count: u32,
    /// Identifier used to correlate logs from this process.
    pub cluster_id: String,
}

impl ShardDescriptor {
    /// Build and validate a descriptor.
    ///
    /// # Errors
    ///
    /// Returns `AutomationError::Configuration` if the count is zero or the
    /// index is out of range.
    pub fn new(
        shard_index: u32,
        shard_count: u32,
        cluster_id: impl Into<String>,
    ) -> AutomationResult<Self> {
        if shard_count == 0 {
            return Err(AutomationError::Configuration(
                "shard count must be greater than 0".into(),
            ));
        }
        if shard_index >= shard_count {
            return Err(AutomationError::Configuration(format!(
                "shard index {shard_index} out of range for {shard_count} shards"
            )));
        }
        let cluster_id = cluster_id.into();
        if cluster_id.trim().is_empty() {
            return Err(AutomationError::Configuration("cluster id must not be empty".into()));
        }
        Ok(Self {
            shard_index,
            shard_count,
            cluster_id,
        })
    }
}

/// Exposes shard identity and decides which shard runs singleton work.
///
/// The primary is fixed at deployment: shard 0. There is no election and no
/// failover.
#[derive(Debug, Clone)]
pub struct ClusterCoordinator {
    shard: ShardDescriptor,
}

impl ClusterCoordinator {
    /// Wrap an already validated descriptor.
    #[must_use]
    pub const fn new(shard: ShardDescriptor) -> Self {
        Self { shard }
    }

    /// Read shard identity from the process environment (and `.env`, if present).
    ///
    /// # Errors
    ///
    /// Returns `AutomationError::Configuration` when the identity is missing or
    /// malformed. Callers are expected to abort startup.
    pub fn from_env() -> AutomationResult<Self> {
        // A missing .env file is normal in production.
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Resolve shard identity through an arbitrary key lookup.
    ///
    /// # Errors
    ///
    /// Returns `AutomationError::Configuration` when a required key is missing
    /// or does not parse.
    pub fn from_lookup<F>(lookup: F) -> AutomationResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let shard_index = read_u32(&lookup, SHARD_INDEX_ENV)?;
        let shard_count = read_u32(&lookup, SHARD_COUNT_ENV)?;
        let cluster_id = lookup(CLUSTER_ID_ENV)
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| format!("cluster-{shard_index}"));

        let shard = ShardDescriptor::new(shard_index, shard_count, cluster_id)?;
        tracing::info!(
            cluster = %shard.cluster_id,
            shard_index = shard.shard_index,
            shard_count = shard.shard_count,
            primary = shard.shard_index == 0,
            "shard identity resolved"
        );
        Ok(Self::new(shard))
    }

    /// True iff this process is shard 0.
    #[must_use]
    pub const fn is_primary(&self) -> bool {
        self.shard.shard_index == 0
    }

    /// Stable identifier for log correlation.
    #[must_use]
    pub fn cluster_id(&self) -> &str {
        &self.shard.cluster_id
    }

    /// The underlying shard descriptor.
    #[must_use]
    pub const fn shard(&self) -> &ShardDescriptor {
        &self.shard
    }
}

fn read_u32<F>(lookup: &F, key: &str) -> AutomationResult<u32>
where
    F: Fn(&str) -> Option<String>,
{
    let raw = lookup(key)
        .ok_or_else(|| AutomationError::Configuration(format!("{key} is not set")))?;
    raw.trim()
        .parse::<u32>()
        .map_err(|e| AutomationError::Configuration(format!("{key}=`{raw}` is not a shard number: {e}")))
}
