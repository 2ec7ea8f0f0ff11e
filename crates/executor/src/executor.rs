use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use courier_core::{Channel, DispatchRequest};
use courier_provider::{DynProvider, ProviderError};
use tokio::sync::Semaphore;
use tracing::{debug, instrument, warn};

use crate::classify::{AttemptOutcome, FailureClass, classify};
use crate::config::ExecutorConfig;

/// One classified remote call and how long it took.
#[derive(Debug, Clone)]
pub struct CallReport {
    pub outcome: AttemptOutcome,
    /// Time spent in the remote call, excluding the wait for a pool slot.
    pub latency: Duration,
}

/// Issues remote calls through bounded per-channel pools.
///
/// Each channel owns a semaphore sized by
/// [`ExecutorConfig::concurrency_for`], so a degraded provider on one channel
/// cannot starve the others. Every call is wrapped in
/// [`ExecutorConfig::call_timeout`].
pub struct DispatchExecutor {
    config: ExecutorConfig,
    pools: HashMap<Channel, Arc<Semaphore>>,
}

impl DispatchExecutor {
    pub fn new(config: ExecutorConfig) -> Self {
        let pools = Channel::ALL
            .into_iter()
            .map(|channel| {
                let permits = config.concurrency_for(channel).max(1);
                (channel, Arc::new(Semaphore::new(permits)))
            })
            .collect();
        Self { config, pools }
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    /// Free slots in `channel`'s pool.
    pub fn available_permits(&self, channel: Channel) -> usize {
        self.pools
            .get(&channel)
            .map_or(0, |pool| pool.available_permits())
    }

    /// Make one call to `provider` and classify the result.
    ///
    /// Never retries; retry scheduling belongs to the queue.
    #[instrument(
        skip(self, request, provider),
        fields(channel = %request.channel, request_id = %request.request_id)
    )]
    pub async fn attempt(
        &self,
        request: &DispatchRequest,
        provider: &dyn DynProvider,
    ) -> CallReport {
        let Some(pool) = self.pools.get(&request.channel) else {
            return CallReport {
                outcome: AttemptOutcome::permanent(
                    "NO_POOL",
                    format!("no dispatch pool for channel {}", request.channel),
                ),
                latency: Duration::ZERO,
            };
        };
        // Cancel-safe: dropping the future while waiting never takes a permit.
        let Ok(_permit) = pool.acquire().await else {
            return CallReport {
                outcome: AttemptOutcome::Failed {
                    class: FailureClass::Transient,
                    code: "POOL_CLOSED".into(),
                    message: format!("dispatch pool for {} is closed", request.channel),
                    http_status: None,
                },
                latency: Duration::ZERO,
            };
        };

        let started = Instant::now();
        let timeout = self.config.call_timeout;
        let result = match tokio::time::timeout(timeout, provider.call(request)).await {
            Ok(result) => result,
            Err(_elapsed) => Err(ProviderError::Timeout(timeout)),
        };
        let latency = started.elapsed();

        let outcome = classify(result);
        match &outcome {
            AttemptOutcome::Delivered { status, .. } => {
                debug!(function = provider.name(), status, ?latency, "call delivered");
            }
            AttemptOutcome::Failed {
                class, code, message, ..
            } => {
                warn!(
                    function = provider.name(),
                    %class,
                    code = %code,
                    error = %message,
                    ?latency,
                    "call failed"
                );
            }
        }
        CallReport { outcome, latency }
    }
}
