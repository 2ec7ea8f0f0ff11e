use std::time::Duration;

use serde::Deserialize;

use courier_gateway::ProberConfig;

/// Health probe configuration.
#[derive(Debug, Deserialize)]
pub struct HealthConfig {
    /// Whether the first worker probes the send functions.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default = "default_interval")]
    pub interval_seconds: u64,
    /// Consecutive failed probes tolerated; one more raises an alert.
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            interval_seconds: default_interval(),
            failure_threshold: default_failure_threshold(),
            timeout_ms: default_timeout_ms(),
        }
    }
}

impl HealthConfig {
    pub fn to_prober_config(&self) -> ProberConfig {
        ProberConfig {
            timeout: Duration::from_millis(self.timeout_ms),
            failure_threshold: self.failure_threshold,
        }
    }
}

fn default_enabled() -> bool {
    true
}

fn default_interval() -> u64 {
    60
}

fn default_failure_threshold() -> u32 {
    3
}

fn default_timeout_ms() -> u64 {
    5000
}
