use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, QueryBuilder, Row};
use tracing::debug;

use courier_core::{ActionId, IdempotencyKey, NewAction, PendingAction, UnknownVariant};
use courier_state::{
    QueueFilter, QueuePage, QueueStore, QueueTransition, StateError, release_stale_claim,
};

use crate::config::PostgresConfig;
use crate::migrations;
use crate::pool::{backend, connect};

/// PostgreSQL-backed [`QueueStore`].
///
/// Claims use `FOR UPDATE SKIP LOCKED`, so any number of workers in any
/// number of processes can poll the same table and each due row is handed
/// to exactly one of them. Transitions lock the row, check its current
/// status and write the result back in one transaction.
pub struct PostgresQueueStore {
    pool: PgPool,
    config: Arc<PostgresConfig>,
}

impl PostgresQueueStore {
    /// Connect, create the pool and run migrations.
    pub async fn new(config: PostgresConfig) -> Result<Self, StateError> {
        let pool = connect(&config).await?;
        Self::from_pool(pool, config).await
    }

    /// Build from an existing pool. Runs migrations on creation.
    pub async fn from_pool(pool: PgPool, config: PostgresConfig) -> Result<Self, StateError> {
        migrations::run_migrations(&pool, &config)
            .await
            .map_err(backend)?;
        Ok(Self {
            pool,
            config: Arc::new(config),
        })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Persist the mutable columns of `row`.
    async fn write_back(
        &self,
        conn: &mut sqlx::PgConnection,
        row: &PendingAction,
    ) -> Result<(), StateError> {
        let table = self.config.queue_table();
        let query = format!(
            "UPDATE {table} SET status = $2, attempts = $3, next_run_at = $4, \
             last_error = $5, generation = $6, claimed_at = $7, updated_at = $8 \
             WHERE id = $1"
        );
        sqlx::query(&query)
            .bind(row.id.as_str())
            .bind(row.status.as_str())
            .bind(to_i32(row.attempts))
            .bind(row.next_run_at)
            .bind(row.last_error.as_deref())
            .bind(to_i32(row.generation))
            .bind(row.claimed_at)
            .bind(row.updated_at)
            .execute(conn)
            .await
            .map_err(backend)?;
        Ok(())
    }
}

#[async_trait]
impl QueueStore for PostgresQueueStore {
    async fn enqueue(
        &self,
        action: NewAction,
        now: DateTime<Utc>,
    ) -> Result<PendingAction, StateError> {
        let row = action.into_pending(now);
        let payload = serde_json::to_value(&row.event_payload)
            .map_err(|e| StateError::Serialization(e.to_string()))?;
        let table = self.config.queue_table();

        let insert = format!(
            "INSERT INTO {table} (id, event_source, event_type, event_payload, channel, status, \
             attempts, max_attempts, next_run_at, idempotency_key, last_error, generation, \
             claimed_at, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15) \
             ON CONFLICT (idempotency_key) DO NOTHING"
        );
        let inserted = sqlx::query(&insert)
            .bind(row.id.as_str())
            .bind(&row.event_source)
            .bind(&row.event_type)
            .bind(payload)
            .bind(row.channel().as_str())
            .bind(row.status.as_str())
            .bind(to_i32(row.attempts))
            .bind(to_i32(row.max_attempts))
            .bind(row.next_run_at)
            .bind(row.idempotency_key.as_str())
            .bind(row.last_error.as_deref())
            .bind(to_i32(row.generation))
            .bind(row.claimed_at)
            .bind(row.created_at)
            .bind(row.updated_at)
            .execute(&self.pool)
            .await
            .map_err(backend)?;

        if inserted.rows_affected() == 1 {
            return Ok(row);
        }

        let lookup = format!("SELECT id FROM {table} WHERE idempotency_key = $1");
        let existing: Option<String> = sqlx::query_scalar(&lookup)
            .bind(row.idempotency_key.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?;
        match existing {
            Some(id) => Err(StateError::DuplicateIdempotencyKey {
                key: row.idempotency_key,
                existing: ActionId::new(id),
            }),
            None => Err(StateError::Backend(format!(
                "insert for idempotency key {} conflicted but no row exists",
                row.idempotency_key
            ))),
        }
    }

    async fn get(&self, id: &ActionId) -> Result<Option<PendingAction>, StateError> {
        let table = self.config.queue_table();
        let query = format!("SELECT * FROM {table} WHERE id = $1");
        let row = sqlx::query(&query)
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?;
        row.as_ref().map(decode_action).transpose()
    }

    async fn get_by_idempotency_key(
        &self,
        key: &IdempotencyKey,
    ) -> Result<Option<PendingAction>, StateError> {
        let table = self.config.queue_table();
        let query = format!("SELECT * FROM {table} WHERE idempotency_key = $1");
        let row = sqlx::query(&query)
            .bind(key.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?;
        row.as_ref().map(decode_action).transpose()
    }

    async fn claim_next(
        &self,
        limit: usize,
        now: DateTime<Utc>,
    ) -> Result<Vec<PendingAction>, StateError> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let table = self.config.queue_table();
        // Rows locked by a concurrent claimer are skipped, not waited on.
        let query = format!(
            "WITH due AS ( \
                SELECT id FROM {table} \
                WHERE status IN ('queued', 'retrying') AND next_run_at <= $1 \
                ORDER BY next_run_at, created_at, id \
                LIMIT $2 \
                FOR UPDATE SKIP LOCKED \
             ) \
             UPDATE {table} AS q \
             SET status = 'dispatching', claimed_at = $1, updated_at = $1 \
             FROM due WHERE q.id = due.id \
             RETURNING q.*"
        );
        let rows = sqlx::query(&query)
            .bind(now)
            .bind(i64::try_from(limit).unwrap_or(i64::MAX))
            .fetch_all(&self.pool)
            .await
            .map_err(backend)?;

        let mut claimed = rows
            .iter()
            .map(decode_action)
            .collect::<Result<Vec<_>, _>>()?;
        // RETURNING does not preserve the CTE's order.
        claimed.sort_by(|a, b| {
            (a.next_run_at, a.created_at, &a.id).cmp(&(b.next_run_at, b.created_at, &b.id))
        });
        if !claimed.is_empty() {
            debug!(count = claimed.len(), "claimed due actions");
        }
        Ok(claimed)
    }

    async fn apply(
        &self,
        id: &ActionId,
        transition: QueueTransition,
        now: DateTime<Utc>,
    ) -> Result<PendingAction, StateError> {
        let table = self.config.queue_table();
        let mut tx = self.pool.begin().await.map_err(backend)?;

        let select = format!("SELECT * FROM {table} WHERE id = $1 FOR UPDATE");
        let current = sqlx::query(&select)
            .bind(id.as_str())
            .fetch_optional(&mut *tx)
            .await
            .map_err(backend)?;
        let Some(current) = current else {
            return Err(StateError::NotFound(format!("action {id}")));
        };

        let mut row = decode_action(&current)?;
        transition.apply(&mut row, now)?;
        self.write_back(&mut tx, &row).await?;
        tx.commit().await.map_err(backend)?;
        Ok(row)
    }

    async fn list(&self, filter: &QueueFilter) -> Result<QueuePage, StateError> {
        let table = self.config.queue_table();
        let limit = filter.effective_limit();
        let offset = filter.effective_offset();

        let mut count = QueryBuilder::<Postgres>::new(format!("SELECT COUNT(*) FROM {table}"));
        push_filter(&mut count, filter);
        let total: i64 = count
            .build()
            .fetch_one(&self.pool)
            .await
            .map_err(backend)?
            .try_get(0)
            .map_err(backend)?;

        let mut page = QueryBuilder::<Postgres>::new(format!("SELECT * FROM {table}"));
        push_filter(&mut page, filter);
        page.push(" ORDER BY updated_at DESC, id DESC LIMIT ")
            .push_bind(i64::try_from(limit).unwrap_or(i64::MAX))
            .push(" OFFSET ")
            .push_bind(i64::try_from(offset).unwrap_or(i64::MAX));
        let rows = page
            .build()
            .fetch_all(&self.pool)
            .await
            .map_err(backend)?;

        Ok(QueuePage {
            actions: rows.iter().map(decode_action).collect::<Result<_, _>>()?,
            total: u64::try_from(total).unwrap_or_default(),
            limit,
            offset,
        })
    }

    async fn reclaim_stale(
        &self,
        claimed_before: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Vec<PendingAction>, StateError> {
        let table = self.config.queue_table();
        let mut tx = self.pool.begin().await.map_err(backend)?;

        let select = format!(
            "SELECT * FROM {table} \
             WHERE status = 'dispatching' AND claimed_at < $1 \
             ORDER BY claimed_at \
             FOR UPDATE SKIP LOCKED"
        );
        let rows = sqlx::query(&select)
            .bind(claimed_before)
            .fetch_all(&mut *tx)
            .await
            .map_err(backend)?;

        let mut released = Vec::with_capacity(rows.len());
        for row in &rows {
            let mut action = decode_action(row)?;
            release_stale_claim(&mut action, now);
            self.write_back(&mut tx, &action).await?;
            released.push(action);
        }
        tx.commit().await.map_err(backend)?;
        Ok(released)
    }
}

fn push_filter(builder: &mut QueryBuilder<'_, Postgres>, filter: &QueueFilter) {
    builder.push(" WHERE TRUE");
    if !filter.statuses.is_empty() {
        let statuses: Vec<String> = filter
            .statuses
            .iter()
            .map(|s| s.as_str().to_owned())
            .collect();
        builder.push(" AND status = ANY(").push_bind(statuses).push(")");
    }
    if let Some(channel) = filter.channel {
        builder.push(" AND channel = ").push_bind(channel.as_str());
    }
    if let Some(source) = &filter.event_source {
        builder.push(" AND event_source = ").push_bind(source.clone());
    }
}

fn decode_action(row: &PgRow) -> Result<PendingAction, StateError> {
    let payload: serde_json::Value = row.try_get("event_payload").map_err(backend)?;
    let status: String = row.try_get("status").map_err(backend)?;
    Ok(PendingAction {
        id: ActionId::new(row.try_get::<String, _>("id").map_err(backend)?),
        event_source: row.try_get("event_source").map_err(backend)?,
        event_type: row.try_get("event_type").map_err(backend)?,
        event_payload: serde_json::from_value(payload)
            .map_err(|e| StateError::Serialization(e.to_string()))?,
        status: status
            .parse()
            .map_err(|e: UnknownVariant| StateError::Serialization(e.to_string()))?,
        attempts: to_u32(row.try_get("attempts").map_err(backend)?),
        max_attempts: to_u32(row.try_get("max_attempts").map_err(backend)?),
        next_run_at: row.try_get("next_run_at").map_err(backend)?,
        idempotency_key: IdempotencyKey::new(
            row.try_get::<String, _>("idempotency_key")
                .map_err(backend)?,
        ),
        last_error: row.try_get("last_error").map_err(backend)?,
        generation: to_u32(row.try_get("generation").map_err(backend)?),
        claimed_at: row.try_get("claimed_at").map_err(backend)?,
        created_at: row.try_get("created_at").map_err(backend)?,
        updated_at: row.try_get("updated_at").map_err(backend)?,
    })
}

fn to_i32(value: u32) -> i32 {
    i32::try_from(value).unwrap_or(i32::MAX)
}

fn to_u32(value: i32) -> u32 {
    u32::try_from(value).unwrap_or_default()
}

#[cfg(all(test, feature = "integration"))]
mod integration_tests {
    use super::*;

    fn test_config() -> PostgresConfig {
        PostgresConfig {
            url: std::env::var("DATABASE_URL")
                .unwrap_or_else(|_| "postgres://localhost:5432/courier_test".to_string()),
            table_prefix: format!("test_{}_", uuid::Uuid::new_v4().simple()),
            ..PostgresConfig::default()
        }
    }

    #[tokio::test]
    async fn queue_conformance() {
        let store = PostgresQueueStore::new(test_config())
            .await
            .expect("pool creation should succeed");
        courier_state::testing::run_queue_conformance_tests(&store)
            .await
            .expect("conformance tests should pass");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_claims_never_double_claim() {
        let store = PostgresQueueStore::new(test_config())
            .await
            .expect("pool creation should succeed");
        courier_state::testing::run_concurrent_claim_test(Arc::new(store), 30, 8)
            .await
            .expect("every row claimed exactly once");
    }
}
