use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use futures::future::join_all;
use tracing::debug;

use courier_audit::{AutomationLogEntry, LogStore};
use courier_audit_memory::MemoryLogStore;
use courier_core::{
    ActionId, ActionStatus, AutomationDefinition, AutomationId, Channel, ChannelMessage,
    EventPayload, PendingAction, TriggerDefinition,
};
use courier_executor::ExecutorConfig;
use courier_gateway::{
    DispatchReport, EnqueueOutcome, EnqueueRequest, Gateway, GatewayBuilder, ProberConfig,
};
use courier_provider::DynProvider;
use courier_state::{AutomationRegistry, QueueFilter, QueueStore};
use courier_state_memory::{MemoryQueueStore, MemoryRegistry};

use crate::error::SimulationError;
use crate::provider::ScriptedProvider;

/// Builder for [`SimulationHarness`].
pub struct SimulationHarnessBuilder {
    nodes: usize,
    executor_config: ExecutorConfig,
    prober_config: ProberConfig,
    providers: Vec<Arc<ScriptedProvider>>,
    automations: Vec<AutomationDefinition>,
    triggers: Vec<TriggerDefinition>,
    log_store: Option<Arc<dyn LogStore>>,
}

impl Default for SimulationHarnessBuilder {
    fn default() -> Self {
        Self {
            nodes: 1,
            executor_config: ExecutorConfig::default(),
            prober_config: ProberConfig::default(),
            providers: Vec::new(),
            automations: Vec::new(),
            triggers: Vec::new(),
            log_store: None,
        }
    }
}

impl SimulationHarnessBuilder {
    /// Number of gateways sharing the stores; each one stands for a worker
    /// process.
    #[must_use]
    pub fn nodes(mut self, nodes: usize) -> Self {
        self.nodes = nodes.max(1);
        self
    }

    #[must_use]
    pub fn executor_config(mut self, config: ExecutorConfig) -> Self {
        self.executor_config = config;
        self
    }

    #[must_use]
    pub fn max_attempts(mut self, max_attempts: u32) -> Self {
        self.executor_config.max_attempts = max_attempts;
        self
    }

    #[must_use]
    pub fn prober_config(mut self, config: ProberConfig) -> Self {
        self.prober_config = config;
        self
    }

    #[must_use]
    pub fn provider(mut self, provider: ScriptedProvider) -> Self {
        self.providers.push(Arc::new(provider));
        self
    }

    #[must_use]
    pub fn automation(mut self, automation: AutomationDefinition) -> Self {
        self.automations.push(automation);
        self
    }

    #[must_use]
    pub fn trigger(mut self, trigger: TriggerDefinition) -> Self {
        self.triggers.push(trigger);
        self
    }

    /// Use `store` for automation logs instead of a fresh in-memory store.
    #[must_use]
    pub fn log_store(mut self, store: Arc<dyn LogStore>) -> Self {
        self.log_store = Some(store);
        self
    }

    pub async fn build(self) -> Result<SimulationHarness, SimulationError> {
        let queue = Arc::new(MemoryQueueStore::new());
        let registry = Arc::new(MemoryRegistry::new());
        for automation in self.automations {
            registry.put_automation(automation).await?;
        }
        for trigger in self.triggers {
            registry.put_trigger(trigger).await?;
        }
        let logs: Arc<dyn LogStore> = match self.log_store {
            Some(store) => store,
            None => Arc::new(MemoryLogStore::new()),
        };

        let mut nodes = Vec::with_capacity(self.nodes);
        for _ in 0..self.nodes {
            let mut builder = GatewayBuilder::new()
                .queue(queue.clone())
                .registry(registry.clone())
                .logs(Arc::clone(&logs))
                .executor_config(self.executor_config.clone())
                .prober_config(self.prober_config.clone());
            for provider in &self.providers {
                let provider: Arc<dyn DynProvider> = provider.clone();
                builder = builder.provider(provider);
            }
            nodes.push(Arc::new(builder.build()?));
        }

        let providers = self
            .providers
            .into_iter()
            .map(|p| (DynProvider::channel(p.as_ref()), p))
            .collect();
        debug!(nodes = nodes.len(), "simulation harness started");
        Ok(SimulationHarness {
            nodes,
            queue,
            registry,
            logs,
            providers,
        })
    }
}

/// Several gateways over one shared in-memory queue, registry and log
/// store, with scripted send functions.
///
/// Time is passed explicitly to the dispatch methods, so retry schedules can
/// be walked without waiting.
pub struct SimulationHarness {
    nodes: Vec<Arc<Gateway>>,
    queue: Arc<MemoryQueueStore>,
    registry: Arc<MemoryRegistry>,
    logs: Arc<dyn LogStore>,
    providers: HashMap<Channel, Arc<ScriptedProvider>>,
}

impl SimulationHarness {
    pub fn builder() -> SimulationHarnessBuilder {
        SimulationHarnessBuilder::default()
    }

    /// The first node.
    pub fn gateway(&self) -> &Arc<Gateway> {
        &self.nodes[0]
    }

    pub fn nodes(&self) -> &[Arc<Gateway>] {
        &self.nodes
    }

    pub fn queue(&self) -> &Arc<MemoryQueueStore> {
        &self.queue
    }

    pub fn registry(&self) -> &Arc<MemoryRegistry> {
        &self.registry
    }

    pub fn logs(&self) -> &Arc<dyn LogStore> {
        &self.logs
    }

    pub fn provider(&self, channel: Channel) -> Option<&Arc<ScriptedProvider>> {
        self.providers.get(&channel)
    }

    pub async fn enqueue(
        &self,
        request: EnqueueRequest,
    ) -> Result<EnqueueOutcome, SimulationError> {
        Ok(self.gateway().enqueue(request).await?)
    }

    /// Enqueue `message` under `key` and return the new row.
    pub async fn send(
        &self,
        message: ChannelMessage,
        key: &str,
    ) -> Result<PendingAction, SimulationError> {
        self.schedule(EnqueueRequest::new(EventPayload::new(message)).with_key(key))
            .await
    }

    /// Enqueue `message` for `automation` under `key` and return the new row.
    pub async fn send_for(
        &self,
        automation: &str,
        message: ChannelMessage,
        key: &str,
    ) -> Result<PendingAction, SimulationError> {
        let payload = EventPayload::new(message).with_automation(automation);
        self.schedule(EnqueueRequest::new(payload).with_key(key))
            .await
    }

    async fn schedule(&self, request: EnqueueRequest) -> Result<PendingAction, SimulationError> {
        match self.enqueue(request).await? {
            EnqueueOutcome::Scheduled(row) => Ok(row),
            EnqueueOutcome::AlreadyScheduled(id) => Err(SimulationError::Unexpected(format!(
                "key already scheduled as {id}"
            ))),
        }
    }

    /// One dispatch pass on the first node.
    pub async fn dispatch_at(&self, now: DateTime<Utc>) -> Result<DispatchReport, SimulationError> {
        Ok(self.gateway().dispatch_due_at(now).await?)
    }

    /// One dispatch pass on every node at once.
    pub async fn dispatch_concurrently(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<DispatchReport>, SimulationError> {
        let passes = self.nodes.iter().map(|node| node.dispatch_due_at(now));
        join_all(passes)
            .await
            .into_iter()
            .map(|r| r.map_err(SimulationError::from))
            .collect()
    }

    /// Dispatch repeatedly, stepping the clock by `step` between passes,
    /// until nothing is left to claim or `max_passes` is reached.
    ///
    /// Returns the clock value after the last pass.
    pub async fn drain(
        &self,
        start: DateTime<Utc>,
        step: Duration,
        max_passes: usize,
    ) -> Result<DateTime<Utc>, SimulationError> {
        let mut now = start;
        for _ in 0..max_passes {
            self.dispatch_at(now).await?;
            if self.pending().await? == 0 {
                return Ok(now);
            }
            now += step;
        }
        Err(SimulationError::Unexpected(format!(
            "{} action(s) still pending after {max_passes} passes",
            self.pending().await?
        )))
    }

    /// Rows that are queued, retrying or claimed.
    pub async fn pending(&self) -> Result<u64, SimulationError> {
        let filter = QueueFilter {
            statuses: vec![
                ActionStatus::Queued,
                ActionStatus::Retrying,
                ActionStatus::Dispatching,
            ],
            limit: Some(1),
            ..QueueFilter::default()
        };
        Ok(self.queue.list(&filter).await?.total)
    }

    pub async fn action(&self, id: &ActionId) -> Result<PendingAction, SimulationError> {
        Ok(self.gateway().get_action(id).await?)
    }

    /// The log row of the action's current attempt window.
    pub async fn log_for(
        &self,
        action: &PendingAction,
    ) -> Result<Option<AutomationLogEntry>, SimulationError> {
        Ok(self.logs.get(&action.log_id()).await?)
    }

    pub async fn automation(&self, id: &str) -> Result<AutomationDefinition, SimulationError> {
        self.registry
            .get_automation(&AutomationId::new(id))
            .await?
            .ok_or_else(|| SimulationError::Unexpected(format!("automation {id} missing")))
    }
}

impl std::fmt::Debug for SimulationHarness {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimulationHarness")
            .field("nodes", &self.nodes.len())
            .field("providers", &self.providers.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}
