use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};

use courier_core::{
    AutomationDefinition, AutomationId, TriggerDefinition, TriggerId, UnknownVariant,
};
use courier_state::{AutomationRegistry, StateError};

use crate::config::PostgresConfig;
use crate::migrations;
use crate::pool::{backend, connect};

/// PostgreSQL-backed [`AutomationRegistry`].
pub struct PostgresRegistry {
    pool: PgPool,
    config: Arc<PostgresConfig>,
}

impl PostgresRegistry {
    pub async fn new(config: PostgresConfig) -> Result<Self, StateError> {
        let pool = connect(&config).await?;
        Self::from_pool(pool, config).await
    }

    pub async fn from_pool(pool: PgPool, config: PostgresConfig) -> Result<Self, StateError> {
        migrations::run_migrations(&pool, &config)
            .await
            .map_err(backend)?;
        Ok(Self {
            pool,
            config: Arc::new(config),
        })
    }
}

#[async_trait]
impl AutomationRegistry for PostgresRegistry {
    async fn put_automation(&self, automation: AutomationDefinition) -> Result<(), StateError> {
        let table = self.config.automations_table();
        let query = format!(
            "INSERT INTO {table} (id, action_name, automation_type, segment_id, is_active, \
             execution_count, last_executed_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7) \
             ON CONFLICT (id) DO UPDATE SET \
             action_name = EXCLUDED.action_name, \
             automation_type = EXCLUDED.automation_type, \
             segment_id = EXCLUDED.segment_id, \
             is_active = EXCLUDED.is_active, \
             execution_count = EXCLUDED.execution_count, \
             last_executed_at = EXCLUDED.last_executed_at"
        );
        sqlx::query(&query)
            .bind(automation.id.as_str())
            .bind(&automation.action_name)
            .bind(automation.automation_type.as_str())
            .bind(automation.segment_id.as_deref())
            .bind(automation.is_active)
            .bind(i64::try_from(automation.execution_count).unwrap_or(i64::MAX))
            .bind(automation.last_executed_at)
            .execute(&self.pool)
            .await
            .map_err(backend)?;
        Ok(())
    }

    async fn get_automation(
        &self,
        id: &AutomationId,
    ) -> Result<Option<AutomationDefinition>, StateError> {
        let table = self.config.automations_table();
        let query = format!("SELECT * FROM {table} WHERE id = $1");
        let row = sqlx::query(&query)
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?;
        row.as_ref().map(decode_automation).transpose()
    }

    async fn list_automations(&self) -> Result<Vec<AutomationDefinition>, StateError> {
        let table = self.config.automations_table();
        let query = format!("SELECT * FROM {table} ORDER BY id");
        let rows = sqlx::query(&query)
            .fetch_all(&self.pool)
            .await
            .map_err(backend)?;
        rows.iter().map(decode_automation).collect()
    }

    async fn record_delivery(
        &self,
        id: &AutomationId,
        at: DateTime<Utc>,
    ) -> Result<bool, StateError> {
        let table = self.config.automations_table();
        // Increment in place so concurrent deliveries never lose a count.
        let query = format!(
            "UPDATE {table} SET execution_count = execution_count + 1, last_executed_at = $2 \
             WHERE id = $1"
        );
        let result = sqlx::query(&query)
            .bind(id.as_str())
            .bind(at)
            .execute(&self.pool)
            .await
            .map_err(backend)?;
        Ok(result.rows_affected() > 0)
    }

    async fn put_trigger(&self, trigger: TriggerDefinition) -> Result<(), StateError> {
        let table = self.config.triggers_table();
        let query = format!(
            "INSERT INTO {table} (id, trigger_type, automation_id, trigger_config, is_active, \
             next_trigger_at, last_fired_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7) \
             ON CONFLICT (id) DO UPDATE SET \
             trigger_type = EXCLUDED.trigger_type, \
             automation_id = EXCLUDED.automation_id, \
             trigger_config = EXCLUDED.trigger_config, \
             is_active = EXCLUDED.is_active, \
             next_trigger_at = EXCLUDED.next_trigger_at, \
             last_fired_at = EXCLUDED.last_fired_at"
        );
        sqlx::query(&query)
            .bind(trigger.id.as_str())
            .bind(trigger.trigger_type.as_str())
            .bind(trigger.automation_id.as_str())
            .bind(&trigger.trigger_config)
            .bind(trigger.is_active)
            .bind(trigger.next_trigger_at)
            .bind(trigger.last_fired_at)
            .execute(&self.pool)
            .await
            .map_err(backend)?;
        Ok(())
    }

    async fn get_trigger(&self, id: &TriggerId) -> Result<Option<TriggerDefinition>, StateError> {
        let table = self.config.triggers_table();
        let query = format!("SELECT * FROM {table} WHERE id = $1");
        let row = sqlx::query(&query)
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?;
        row.as_ref().map(decode_trigger).transpose()
    }

    async fn list_triggers(&self) -> Result<Vec<TriggerDefinition>, StateError> {
        let table = self.config.triggers_table();
        let query = format!("SELECT * FROM {table} ORDER BY id");
        let rows = sqlx::query(&query)
            .fetch_all(&self.pool)
            .await
            .map_err(backend)?;
        rows.iter().map(decode_trigger).collect()
    }

    async fn mark_trigger_fired(
        &self,
        id: &TriggerId,
        at: DateTime<Utc>,
    ) -> Result<bool, StateError> {
        let table = self.config.triggers_table();
        let query = format!("UPDATE {table} SET last_fired_at = $2 WHERE id = $1");
        let result = sqlx::query(&query)
            .bind(id.as_str())
            .bind(at)
            .execute(&self.pool)
            .await
            .map_err(backend)?;
        Ok(result.rows_affected() > 0)
    }
}

fn unknown(e: UnknownVariant) -> StateError {
    StateError::Serialization(e.to_string())
}

fn decode_automation(row: &PgRow) -> Result<AutomationDefinition, StateError> {
    let channel: String = row.try_get("automation_type").map_err(backend)?;
    let count: i64 = row.try_get("execution_count").map_err(backend)?;
    Ok(AutomationDefinition {
        id: AutomationId::new(row.try_get::<String, _>("id").map_err(backend)?),
        action_name: row.try_get("action_name").map_err(backend)?,
        automation_type: channel.parse().map_err(unknown)?,
        segment_id: row.try_get("segment_id").map_err(backend)?,
        is_active: row.try_get("is_active").map_err(backend)?,
        execution_count: u64::try_from(count).unwrap_or_default(),
        last_executed_at: row.try_get("last_executed_at").map_err(backend)?,
    })
}

fn decode_trigger(row: &PgRow) -> Result<TriggerDefinition, StateError> {
    let trigger_type: String = row.try_get("trigger_type").map_err(backend)?;
    Ok(TriggerDefinition {
        id: TriggerId::new(row.try_get::<String, _>("id").map_err(backend)?),
        trigger_type: trigger_type.parse().map_err(unknown)?,
        automation_id: AutomationId::new(
            row.try_get::<String, _>("automation_id").map_err(backend)?,
        ),
        trigger_config: row.try_get("trigger_config").map_err(backend)?,
        is_active: row.try_get("is_active").map_err(backend)?,
        next_trigger_at: row.try_get("next_trigger_at").map_err(backend)?,
        last_fired_at: row.try_get("last_fired_at").map_err(backend)?,
    })
}

#[cfg(all(test, feature = "integration"))]
mod integration_tests {
    use super::*;

    #[tokio::test]
    async fn registry_conformance() {
        let config = PostgresConfig {
            url: std::env::var("DATABASE_URL")
                .unwrap_or_else(|_| "postgres://localhost:5432/courier_test".to_string()),
            table_prefix: format!("test_{}_", uuid::Uuid::new_v4().simple()),
            ..PostgresConfig::default()
        };
        let registry = PostgresRegistry::new(config)
            .await
            .expect("pool creation should succeed");
        courier_state::testing::run_registry_conformance_tests(&registry)
            .await
            .expect("conformance tests should pass");
    }
}
