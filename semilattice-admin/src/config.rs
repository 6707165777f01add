//! Mirror configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Timeouts and defaults for a [`ClusterMirror`](crate::ClusterMirror).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MirrorConfig {
    /// Upper bound for a single request to one node.
    pub request_timeout_secs: u64,
    /// Pause between attempts of any fixed-interval poll (ms).
    pub retry_interval_ms: u64,
    /// Consistency budget for the first synchronization.
    pub bootstrap_timeout_secs: u64,
    /// Consistency budget for the synchronization after each mutation.
    pub mutation_timeout_secs: u64,
    /// How long to wait for a table's blueprint to be satisfied.
    pub blueprint_timeout_secs: u64,
    /// How long a new table may take to answer distribution queries.
    pub table_ready_timeout_secs: u64,
    /// Primary key for tables created without one.
    pub default_primary_key: String,
    /// Database for tables created without one.
    pub default_database: String,
}

impl Default for MirrorConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: 120,
            retry_interval_ms: 1_000,
            bootstrap_timeout_secs: 30,
            mutation_timeout_secs: 10,
            blueprint_timeout_secs: 600,
            table_ready_timeout_secs: 90,
            default_primary_key: "id".to_string(),
            default_database: "test".to_string(),
        }
    }
}

impl MirrorConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn retry_interval(&self) -> Duration {
        Duration::from_millis(self.retry_interval_ms)
    }

    pub fn bootstrap_timeout(&self) -> Duration {
        Duration::from_secs(self.bootstrap_timeout_secs)
    }

    pub fn mutation_timeout(&self) -> Duration {
        Duration::from_secs(self.mutation_timeout_secs)
    }

    pub fn blueprint_timeout(&self) -> Duration {
        Duration::from_secs(self.blueprint_timeout_secs)
    }

    pub fn table_ready_timeout(&self) -> Duration {
        Duration::from_secs(self.table_ready_timeout_secs)
    }

    /// Number of poll attempts that fit in `budget`. Always at least one.
    pub fn attempts_for(&self, budget: Duration) -> u32 {
        let interval = self.retry_interval_ms.max(1) as u128;
        let attempts = budget.as_millis().div_ceil(interval);
        attempts.clamp(1, u32::MAX as u128) as u32
    }
}
