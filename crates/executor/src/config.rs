use std::collections::HashMap;
use std::time::Duration;

use courier_core::Channel;

use crate::error::ExecutorError;
use crate::retry::RetryStrategy;

/// Configuration for dispatching actions.
///
/// # Examples
///
/// ```
/// use courier_executor::ExecutorConfig;
///
/// let config = ExecutorConfig::default();
/// assert_eq!(config.max_attempts, 5);
/// assert_eq!(config.default_concurrency, 10);
/// ```
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Attempts allowed per attempt window before an action is dead-lettered.
    pub max_attempts: u32,
    /// Backoff applied after each transient failure.
    pub retry_strategy: RetryStrategy,
    /// Maximum wall-clock time for one remote call. Elapsed calls are
    /// classified as transient failures.
    pub call_timeout: Duration,
    /// Concurrent calls allowed per channel when no override is set.
    pub default_concurrency: usize,
    /// Per-channel concurrency overrides.
    pub channel_concurrency: HashMap<Channel, usize>,
    /// Rows claimed per dispatch pass.
    pub claim_batch_size: usize,
    /// A claim older than this is considered abandoned by its worker.
    pub claim_timeout: Duration,
}

impl ExecutorConfig {
    /// Concurrency cap for `channel`.
    pub fn concurrency_for(&self, channel: Channel) -> usize {
        self.channel_concurrency
            .get(&channel)
            .copied()
            .unwrap_or(self.default_concurrency)
    }

    pub fn validate(&self) -> Result<(), ExecutorError> {
        if self.max_attempts == 0 {
            return Err(ExecutorError::InvalidConfig(
                "max_attempts must be at least 1".into(),
            ));
        }
        if self.call_timeout.is_zero() {
            return Err(ExecutorError::InvalidConfig(
                "call_timeout must be positive".into(),
            ));
        }
        if self.claim_batch_size == 0 {
            return Err(ExecutorError::InvalidConfig(
                "claim_batch_size must be at least 1".into(),
            ));
        }
        if let Some(channel) = Channel::ALL
            .into_iter()
            .find(|c| self.concurrency_for(*c) == 0)
        {
            return Err(ExecutorError::InvalidConfig(format!(
                "concurrency for {channel} must be at least 1"
            )));
        }
        if self.claim_timeout <= self.call_timeout {
            return Err(ExecutorError::InvalidConfig(
                "claim_timeout must exceed call_timeout".into(),
            ));
        }
        self.retry_strategy
            .validate()
            .map_err(ExecutorError::InvalidConfig)
    }
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            retry_strategy: RetryStrategy::default(),
            call_timeout: Duration::from_secs(30),
            default_concurrency: 10,
            channel_concurrency: HashMap::new(),
            claim_batch_size: 25,
            claim_timeout: Duration::from_secs(300),
        }
    }
}
