use std::collections::HashMap;
use std::time::Duration;

use serde::Deserialize;

use courier_core::Channel;
use courier_executor::{ExecutorConfig, RetryStrategy};

/// Configuration for the dispatch executor.
///
/// Unset fields keep the library defaults.
#[derive(Debug, Default, Deserialize)]
pub struct ExecutorSection {
    /// Attempts per action before it is dead-lettered.
    pub max_attempts: Option<u32>,
    /// Deadline for one call to a send function, in milliseconds.
    pub call_timeout_ms: Option<u64>,
    /// Rows claimed per dispatch pass.
    pub claim_batch_size: Option<usize>,
    /// In-flight calls per channel unless overridden below.
    pub default_concurrency: Option<usize>,
    /// Per-channel in-flight limits, e.g. `sms = 2`.
    #[serde(default)]
    pub channel_concurrency: HashMap<Channel, usize>,
    /// Exponential backoff between attempts.
    pub backoff: Option<BackoffSection>,
}

/// Exponential backoff settings.
#[derive(Debug, Deserialize)]
pub struct BackoffSection {
    #[serde(default = "default_base_ms")]
    pub base_ms: u64,
    #[serde(default = "default_max_ms")]
    pub max_ms: u64,
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
    #[serde(default = "default_jitter")]
    pub jitter: bool,
}

impl ExecutorSection {
    /// Build the library config, taking the claim timeout from the
    /// background section.
    pub fn to_executor_config(&self, claim_timeout: Duration) -> ExecutorConfig {
        let mut config = ExecutorConfig {
            claim_timeout,
            ..ExecutorConfig::default()
        };
        if let Some(max_attempts) = self.max_attempts {
            config.max_attempts = max_attempts;
        }
        if let Some(ms) = self.call_timeout_ms {
            config.call_timeout = Duration::from_millis(ms);
        }
        if let Some(size) = self.claim_batch_size {
            config.claim_batch_size = size;
        }
        if let Some(concurrency) = self.default_concurrency {
            config.default_concurrency = concurrency;
        }
        config
            .channel_concurrency
            .extend(self.channel_concurrency.iter().map(|(c, n)| (*c, *n)));
        if let Some(backoff) = &self.backoff {
            config.retry_strategy = RetryStrategy::Exponential {
                base: Duration::from_millis(backoff.base_ms),
                max: Duration::from_millis(backoff.max_ms),
                multiplier: backoff.multiplier,
                jitter: backoff.jitter,
            };
        }
        config
    }
}

fn default_base_ms() -> u64 {
    10_000
}

fn default_max_ms() -> u64 {
    30 * 60 * 1000
}

fn default_multiplier() -> f64 {
    2.0
}

fn default_jitter() -> bool {
    true
}
