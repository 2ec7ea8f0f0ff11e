use std::time::Duration;

use serde::Deserialize;

use courier_gateway::BackgroundConfig;

use super::HealthConfig;

/// Configuration for the dispatch workers.
#[derive(Debug, Deserialize)]
pub struct BackgroundSection {
    /// Dispatch workers in this process. Zero runs the API only.
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// How often each worker claims due actions (milliseconds).
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
    /// How often abandoned claims are released (seconds).
    #[serde(default = "default_reclaim_interval")]
    pub reclaim_interval_seconds: u64,
    /// Age after which a claim counts as abandoned (seconds).
    #[serde(default = "default_claim_timeout")]
    pub claim_timeout_seconds: u64,
}

impl Default for BackgroundSection {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            poll_interval_ms: default_poll_interval(),
            reclaim_interval_seconds: default_reclaim_interval(),
            claim_timeout_seconds: default_claim_timeout(),
        }
    }
}

impl BackgroundSection {
    pub fn claim_timeout(&self) -> Duration {
        Duration::from_secs(self.claim_timeout_seconds)
    }

    /// Config for worker `index`. Only the first worker probes and reclaims.
    pub fn worker_config(&self, index: usize, health: &HealthConfig) -> BackgroundConfig {
        BackgroundConfig {
            dispatch_interval: Duration::from_millis(self.poll_interval_ms.max(1)),
            probe_interval: Duration::from_secs(health.interval_seconds.max(1)),
            reclaim_interval: Duration::from_secs(self.reclaim_interval_seconds.max(1)),
            enable_probes: index == 0 && health.enabled,
            enable_reclaim: index == 0,
            ..BackgroundConfig::default()
        }
    }
}

fn default_workers() -> usize {
    1
}

fn default_poll_interval() -> u64 {
    1000
}

fn default_reclaim_interval() -> u64 {
    30
}

fn default_claim_timeout() -> u64 {
    300
}
