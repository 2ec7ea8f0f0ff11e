use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;

use courier_core::{AutomationDefinition, AutomationId, TriggerDefinition, TriggerId};
use courier_state::{AutomationRegistry, StateError};

/// In-memory [`AutomationRegistry`].
#[derive(Debug, Default)]
pub struct MemoryRegistry {
    automations: DashMap<AutomationId, AutomationDefinition>,
    triggers: DashMap<TriggerId, TriggerDefinition>,
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AutomationRegistry for MemoryRegistry {
    async fn put_automation(&self, automation: AutomationDefinition) -> Result<(), StateError> {
        self.automations.insert(automation.id.clone(), automation);
        Ok(())
    }

    async fn get_automation(
        &self,
        id: &AutomationId,
    ) -> Result<Option<AutomationDefinition>, StateError> {
        Ok(self.automations.get(id).map(|a| a.clone()))
    }

    async fn list_automations(&self) -> Result<Vec<AutomationDefinition>, StateError> {
        let mut all: Vec<_> = self.automations.iter().map(|a| a.clone()).collect();
        all.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(all)
    }

    async fn record_delivery(
        &self,
        id: &AutomationId,
        at: DateTime<Utc>,
    ) -> Result<bool, StateError> {
        Ok(match self.automations.get_mut(id) {
            Some(mut automation) => {
                automation.execution_count += 1;
                automation.last_executed_at = Some(at);
                true
            }
            None => false,
        })
    }

    async fn put_trigger(&self, trigger: TriggerDefinition) -> Result<(), StateError> {
        self.triggers.insert(trigger.id.clone(), trigger);
        Ok(())
    }

    async fn get_trigger(&self, id: &TriggerId) -> Result<Option<TriggerDefinition>, StateError> {
        Ok(self.triggers.get(id).map(|t| t.clone()))
    }

    async fn list_triggers(&self) -> Result<Vec<TriggerDefinition>, StateError> {
        let mut all: Vec<_> = self.triggers.iter().map(|t| t.clone()).collect();
        all.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(all)
    }

    async fn mark_trigger_fired(
        &self,
        id: &TriggerId,
        at: DateTime<Utc>,
    ) -> Result<bool, StateError> {
        Ok(match self.triggers.get_mut(id) {
            Some(mut trigger) => {
                trigger.last_fired_at = Some(at);
                true
            }
            None => false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use courier_state::testing::run_registry_conformance_tests;

    #[tokio::test]
    async fn conformance() {
        let registry = MemoryRegistry::new();
        run_registry_conformance_tests(&registry).await.unwrap();
    }
}
