//! Orchestrator configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::discovery::DiscoverySource;

/// Configuration for the acquisition orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Interval between metadata status checks of one job (milliseconds).
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,

    /// Pool-wide deadline, counted from submission (milliseconds).
    /// Jobs still waiting for metadata when it expires get a fallback name.
    #[serde(default = "default_pool_timeout")]
    pub pool_timeout_ms: u64,

    /// Indexer this orchestrator searches.
    #[serde(default)]
    pub source: DiscoverySource,
}

fn default_poll_interval() -> u64 {
    1000 // 1 second
}

fn default_pool_timeout() -> u64 {
    60_000 // 60 seconds
}

impl OrchestratorConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn pool_timeout(&self) -> Duration {
        Duration::from_millis(self.pool_timeout_ms)
    }
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval(),
            pool_timeout_ms: default_pool_timeout(),
            source: DiscoverySource::default(),
        }
    }
}
