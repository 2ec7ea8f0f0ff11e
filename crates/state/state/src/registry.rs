use async_trait::async_trait;
use chrono::{DateTime, Utc};
use courier_core::{AutomationDefinition, AutomationId, TriggerDefinition, TriggerId};

use crate::error::StateError;

/// Storage for automation and trigger definitions.
///
/// Definitions are edited by operators outside the pipeline; the pipeline
/// reads them and maintains the execution counters.
#[async_trait]
pub trait AutomationRegistry: Send + Sync {
    /// Insert or replace an automation.
    async fn put_automation(&self, automation: AutomationDefinition) -> Result<(), StateError>;

    async fn get_automation(
        &self,
        id: &AutomationId,
    ) -> Result<Option<AutomationDefinition>, StateError>;

    async fn list_automations(&self) -> Result<Vec<AutomationDefinition>, StateError>;

    /// Atomically increment `execution_count` and set `last_executed_at`.
    ///
    /// Called once per delivered action. Returns `false` if the automation
    /// does not exist.
    async fn record_delivery(
        &self,
        id: &AutomationId,
        at: DateTime<Utc>,
    ) -> Result<bool, StateError>;

    async fn put_trigger(&self, trigger: TriggerDefinition) -> Result<(), StateError>;

    async fn get_trigger(&self, id: &TriggerId) -> Result<Option<TriggerDefinition>, StateError>;

    async fn list_triggers(&self) -> Result<Vec<TriggerDefinition>, StateError>;

    /// Record that a trigger fired. Returns `false` if it does not exist.
    async fn mark_trigger_fired(&self, id: &TriggerId, at: DateTime<Utc>)
    -> Result<bool, StateError>;
}
