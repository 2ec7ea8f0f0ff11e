use std::sync::Arc;

use courier_audit::LogStore;
use courier_executor::{DispatchExecutor, ExecutorConfig};
use courier_provider::{DynProvider, ProviderRegistry};
use courier_state::{AutomationRegistry, QueueStore};

use crate::dlq::DeadLetterManager;
use crate::error::GatewayError;
use crate::gateway::Gateway;
use crate::harness::TestHarness;
use crate::logger::AutomationLogger;
use crate::metrics::GatewayMetrics;
use crate::prober::{HealthProber, ProberConfig};

/// Fluent builder for constructing a [`Gateway`] instance.
///
/// A [`QueueStore`], an [`AutomationRegistry`] and a [`LogStore`] must be
/// supplied. Providers default to none and the executor and prober to their
/// default configurations.
#[derive(Default)]
pub struct GatewayBuilder {
    queue: Option<Arc<dyn QueueStore>>,
    registry: Option<Arc<dyn AutomationRegistry>>,
    logs: Option<Arc<dyn LogStore>>,
    providers: ProviderRegistry,
    executor_config: ExecutorConfig,
    prober_config: ProberConfig,
}

impl GatewayBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the queue store implementation.
    #[must_use]
    pub fn queue(mut self, queue: Arc<dyn QueueStore>) -> Self {
        self.queue = Some(queue);
        self
    }

    /// Set the automation and trigger registry.
    #[must_use]
    pub fn registry(mut self, registry: Arc<dyn AutomationRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Set the automation log store.
    #[must_use]
    pub fn logs(mut self, logs: Arc<dyn LogStore>) -> Self {
        self.logs = Some(logs);
        self
    }

    /// Register a send function under its channel.
    #[must_use]
    pub fn provider(mut self, provider: Arc<dyn DynProvider>) -> Self {
        self.providers.register(provider);
        self
    }

    /// Replace the whole provider registry.
    #[must_use]
    pub fn providers(mut self, providers: ProviderRegistry) -> Self {
        self.providers = providers;
        self
    }

    /// Set the executor configuration (attempts, backoff, pools, timeouts).
    #[must_use]
    pub fn executor_config(mut self, config: ExecutorConfig) -> Self {
        self.executor_config = config;
        self
    }

    #[must_use]
    pub fn prober_config(mut self, config: ProberConfig) -> Self {
        self.prober_config = config;
        self
    }

    /// Consume the builder and produce a [`Gateway`].
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Configuration`] if a required store is missing
    /// or the executor configuration is invalid.
    pub fn build(self) -> Result<Gateway, GatewayError> {
        let queue = self
            .queue
            .ok_or_else(|| GatewayError::Configuration("queue store is required".into()))?;
        let registry = self
            .registry
            .ok_or_else(|| GatewayError::Configuration("automation registry is required".into()))?;
        let logs = self
            .logs
            .ok_or_else(|| GatewayError::Configuration("log store is required".into()))?;
        self.executor_config
            .validate()
            .map_err(|e| GatewayError::Configuration(e.to_string()))?;

        let metrics = Arc::new(GatewayMetrics::default());
        let providers = Arc::new(self.providers);
        let executor = Arc::new(DispatchExecutor::new(self.executor_config));
        let logger = AutomationLogger::new(logs, Arc::clone(&metrics));
        let dlq = DeadLetterManager::new(Arc::clone(&queue), logger.clone());
        let prober = Arc::new(HealthProber::new(
            Arc::clone(&providers),
            logger.clone(),
            Arc::clone(&metrics),
            self.prober_config,
        ));
        let harness = TestHarness::new(
            Arc::clone(&providers),
            Arc::clone(&executor),
            Arc::clone(&metrics),
        );

        Ok(Gateway {
            queue,
            registry,
            providers,
            executor,
            logger,
            metrics,
            dlq,
            prober,
            harness,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use courier_audit_memory::MemoryLogStore;
    use courier_state_memory::{MemoryQueueStore, MemoryRegistry};

    #[test]
    fn stores_are_required() {
        let err = GatewayBuilder::new().build().unwrap_err();
        assert!(err.to_string().contains("queue store is required"));

        let err = GatewayBuilder::new()
            .queue(Arc::new(MemoryQueueStore::new()))
            .registry(Arc::new(MemoryRegistry::new()))
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("log store is required"));
    }

    #[test]
    fn invalid_executor_config_is_rejected() {
        let err = GatewayBuilder::new()
            .queue(Arc::new(MemoryQueueStore::new()))
            .registry(Arc::new(MemoryRegistry::new()))
            .logs(Arc::new(MemoryLogStore::new()))
            .executor_config(ExecutorConfig {
                claim_batch_size: 0,
                ..ExecutorConfig::default()
            })
            .build()
            .unwrap_err();
        assert!(matches!(err, GatewayError::Configuration(_)));
    }
}
