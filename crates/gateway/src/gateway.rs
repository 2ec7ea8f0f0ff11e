use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use courier_audit::Severity;
use courier_core::{
    ActionId, AutomationId, Channel, ChannelMessage, EventPayload, IdempotencyKey, NewAction,
    PendingAction, TriggerId,
};
use courier_executor::DispatchExecutor;
use courier_provider::ProviderRegistry;
use courier_state::{AutomationRegistry, QueueStore, StateError};

use crate::dlq::DeadLetterManager;
use crate::error::GatewayError;
use crate::harness::TestHarness;
use crate::logger::AutomationLogger;
use crate::metrics::GatewayMetrics;
use crate::prober::HealthProber;

fn default_event_source() -> String {
    "manual".to_owned()
}

fn default_event_type() -> String {
    "send".to_owned()
}

/// A request to schedule one outbound message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnqueueRequest {
    #[serde(default = "default_event_source")]
    pub event_source: String,
    #[serde(default = "default_event_type")]
    pub event_type: String,
    pub payload: EventPayload,
    /// Generated when absent.
    #[serde(default)]
    pub idempotency_key: Option<IdempotencyKey>,
    /// Falls back to the executor's `max_attempts`.
    #[serde(default)]
    pub max_attempts: Option<u32>,
    #[serde(default)]
    pub not_before: Option<DateTime<Utc>>,
}

impl EnqueueRequest {
    pub fn new(payload: EventPayload) -> Self {
        Self {
            event_source: default_event_source(),
            event_type: default_event_type(),
            payload,
            idempotency_key: None,
            max_attempts: None,
            not_before: None,
        }
    }

    #[must_use]
    pub fn with_key(mut self, key: impl Into<IdempotencyKey>) -> Self {
        self.idempotency_key = Some(key.into());
        self
    }

    #[must_use]
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }
}

/// Result of an enqueue: a new row, or the row already holding the key.
#[derive(Debug, Clone, PartialEq)]
pub enum EnqueueOutcome {
    Scheduled(PendingAction),
    AlreadyScheduled(ActionId),
}

impl EnqueueOutcome {
    pub fn id(&self) -> &ActionId {
        match self {
            Self::Scheduled(action) => &action.id,
            Self::AlreadyScheduled(id) => id,
        }
    }

    pub fn is_scheduled(&self) -> bool {
        matches!(self, Self::Scheduled(_))
    }
}

/// Input for firing a trigger by hand.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FireTrigger {
    pub message: ChannelMessage,
    #[serde(default)]
    pub profile_id: Option<String>,
    #[serde(default)]
    pub idempotency_key: Option<IdempotencyKey>,
}

/// The dispatch pipeline: enqueue, claim and dispatch, plus the operator
/// components that share its stores.
///
/// Construct with [`GatewayBuilder`](crate::GatewayBuilder).
pub struct Gateway {
    pub(crate) queue: Arc<dyn QueueStore>,
    pub(crate) registry: Arc<dyn AutomationRegistry>,
    pub(crate) providers: Arc<ProviderRegistry>,
    pub(crate) executor: Arc<DispatchExecutor>,
    pub(crate) logger: AutomationLogger,
    pub(crate) metrics: Arc<GatewayMetrics>,
    pub(crate) dlq: DeadLetterManager,
    pub(crate) prober: Arc<HealthProber>,
    pub(crate) harness: TestHarness,
}

impl std::fmt::Debug for Gateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gateway")
            .field("providers", &self.providers)
            .field("executor", self.executor.config())
            .finish_non_exhaustive()
    }
}

impl Gateway {
    /// Schedule a message.
    ///
    /// A key already in the queue yields [`EnqueueOutcome::AlreadyScheduled`]
    /// rather than an error. Keys in a reserved namespace, invalid payloads
    /// and payloads naming an unknown, inactive or mismatched automation are
    /// rejected before anything is written.
    #[instrument(skip(self, request), fields(event_source = %request.event_source))]
    pub async fn enqueue(&self, request: EnqueueRequest) -> Result<EnqueueOutcome, GatewayError> {
        let key = request
            .idempotency_key
            .unwrap_or_else(IdempotencyKey::generate);
        if key.is_reserved() {
            return Err(GatewayError::ReservedKey(key));
        }
        request.payload.validate()?;
        if let Some(automation_id) = &request.payload.automation_id {
            self.check_automation(automation_id, request.payload.channel())
                .await?;
        }

        let max_attempts = request
            .max_attempts
            .unwrap_or(self.executor.config().max_attempts)
            .max(1);
        let action = NewAction {
            event_source: request.event_source,
            event_type: request.event_type,
            event_payload: request.payload,
            idempotency_key: key,
            max_attempts,
            not_before: request.not_before,
        };

        match self.queue.enqueue(action, Utc::now()).await {
            Ok(row) => {
                self.metrics.increment_enqueued();
                info!(
                    action_id = %row.id,
                    channel = %row.channel(),
                    idempotency_key = %row.idempotency_key,
                    next_run_at = %row.next_run_at,
                    "action scheduled"
                );
                Ok(EnqueueOutcome::Scheduled(row))
            }
            Err(StateError::DuplicateIdempotencyKey { key, existing }) => {
                self.metrics.increment_duplicates();
                info!(idempotency_key = %key, action_id = %existing, "action already scheduled");
                Ok(EnqueueOutcome::AlreadyScheduled(existing))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Enqueue a message on behalf of a trigger and stamp its last-fired
    /// time.
    #[instrument(skip(self, fire), fields(trigger_id = %trigger_id))]
    pub async fn fire_trigger(
        &self,
        trigger_id: &TriggerId,
        fire: FireTrigger,
    ) -> Result<EnqueueOutcome, GatewayError> {
        let trigger = self
            .registry
            .get_trigger(trigger_id)
            .await?
            .ok_or_else(|| GatewayError::NotFound(format!("trigger {trigger_id}")))?;
        if !trigger.is_active {
            return Err(GatewayError::Inactive(format!("trigger {trigger_id}")));
        }

        let mut payload = EventPayload::new(fire.message).with_automation(trigger.automation_id);
        payload.profile_id = fire.profile_id;
        let request = EnqueueRequest {
            event_source: format!("trigger:{trigger_id}"),
            event_type: trigger.trigger_type.as_str().to_owned(),
            payload,
            idempotency_key: fire.idempotency_key,
            max_attempts: None,
            not_before: None,
        };
        let outcome = self.enqueue(request).await?;

        if outcome.is_scheduled() {
            match self.registry.mark_trigger_fired(trigger_id, Utc::now()).await {
                Ok(true) => {}
                Ok(false) => warn!(%trigger_id, "trigger vanished before it could be stamped"),
                Err(e) => {
                    self.logger
                        .log_system_error(
                            "gateway:fire_trigger",
                            format!("failed to stamp trigger {trigger_id}: {e}"),
                            Severity::Warning,
                        )
                        .await;
                }
            }
        }
        Ok(outcome)
    }

    pub async fn get_action(&self, id: &ActionId) -> Result<PendingAction, GatewayError> {
        self.queue
            .get(id)
            .await?
            .ok_or_else(|| GatewayError::NotFound(format!("action {id}")))
    }

    async fn check_automation(
        &self,
        id: &AutomationId,
        channel: Channel,
    ) -> Result<(), GatewayError> {
        let automation = self
            .registry
            .get_automation(id)
            .await?
            .ok_or_else(|| GatewayError::NotFound(format!("automation {id}")))?;
        if !automation.is_active {
            return Err(GatewayError::Inactive(format!("automation {id}")));
        }
        if automation.automation_type != channel {
            return Err(GatewayError::ChannelMismatch {
                automation: id.clone(),
                expected: automation.automation_type,
                actual: channel,
            });
        }
        Ok(())
    }

    pub fn queue(&self) -> &Arc<dyn QueueStore> {
        &self.queue
    }

    pub fn registry(&self) -> &Arc<dyn AutomationRegistry> {
        &self.registry
    }

    pub fn providers(&self) -> &ProviderRegistry {
        &self.providers
    }

    pub fn executor(&self) -> &DispatchExecutor {
        &self.executor
    }

    pub fn logger(&self) -> &AutomationLogger {
        &self.logger
    }

    pub fn metrics(&self) -> &GatewayMetrics {
        &self.metrics
    }

    pub fn dlq(&self) -> &DeadLetterManager {
        &self.dlq
    }

    pub fn prober(&self) -> &Arc<HealthProber> {
        &self.prober
    }

    pub fn harness(&self) -> &TestHarness {
        &self.harness
    }
}
