use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgConnection, PgPool};
use tracing::debug;

use courier_audit::{
    AuditError, AutomationLogEntry, LogCounts, LogPage, LogQuery, LogStore, LogTransition,
    LogUpdate, PerformanceSummary, Severity, SystemErrorQuery, SystemErrorRecord,
};
use courier_core::{AutomationId, UnknownVariant};

use crate::config::PostgresAuditConfig;
use crate::migrations;

/// Postgres-backed automation log store using `sqlx`.
///
/// A log transition reads the row under `SELECT ... FOR UPDATE`, runs
/// [`LogTransition::apply`] and writes the result in the same transaction.
pub struct PostgresLogStore {
    pool: PgPool,
    logs: String,
    errors: String,
}

impl PostgresLogStore {
    /// Create a new store, connecting to Postgres and running migrations.
    pub async fn new(config: &PostgresAuditConfig) -> Result<Self, AuditError> {
        let pool = PgPoolOptions::new()
            .max_connections(config.pool_size)
            .connect(&config.url)
            .await
            .map_err(storage)?;
        Self::from_pool(pool, config).await
    }

    /// Create from an existing pool (useful for testing).
    pub async fn from_pool(pool: PgPool, config: &PostgresAuditConfig) -> Result<Self, AuditError> {
        migrations::run_migrations(&pool, config)
            .await
            .map_err(storage)?;

        Ok(Self {
            pool,
            logs: config.logs_table(),
            errors: config.system_errors_table(),
        })
    }

    /// One read-modify-write attempt. Returns `None` when a concurrent
    /// insert of the same row won the race.
    async fn try_update(
        &self,
        id: &str,
        transition: LogTransition,
        now: DateTime<Utc>,
    ) -> Result<Option<LogUpdate>, AuditError> {
        let mut tx = self.pool.begin().await.map_err(storage)?;

        let select = format!("SELECT * FROM {} WHERE id = $1 FOR UPDATE", self.logs);
        let current = sqlx::query_as::<_, LogRow>(&select)
            .bind(id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(storage)?
            .map(AutomationLogEntry::try_from)
            .transpose()?;

        let update = transition.apply(current, now);
        match &update {
            LogUpdate::Inserted(entry) => {
                if !self.insert(&mut tx, entry).await? {
                    tx.rollback().await.map_err(storage)?;
                    return Ok(None);
                }
            }
            LogUpdate::Updated(entry) => self.write_back(&mut tx, entry).await?,
            LogUpdate::Unchanged(_) => {}
        }
        tx.commit().await.map_err(storage)?;
        Ok(Some(update))
    }

    /// Insert a fresh row. Returns `false` if the id already exists.
    async fn insert(
        &self,
        conn: &mut PgConnection,
        entry: &AutomationLogEntry,
    ) -> Result<bool, AuditError> {
        let sql = format!(
            r"
            INSERT INTO {} (
                id, automation_id, profile_id, channel, status,
                message_content, recipient_info, external_id, error_message, retry_count,
                executed_at, delivered_at, read_at, metadata, updated_at
            ) VALUES (
                $1, $2, $3, $4, $5,
                $6, $7, $8, $9, $10,
                $11, $12, $13, $14, $15
            )
            ON CONFLICT (id) DO NOTHING
            ",
            self.logs
        );

        let result = sqlx::query(&sql)
            .bind(&entry.id)
            .bind(entry.automation_id.as_ref().map(AutomationId::as_str))
            .bind(&entry.profile_id)
            .bind(entry.channel.as_str())
            .bind(entry.status.as_str())
            .bind(&entry.message_content)
            .bind(&entry.recipient_info)
            .bind(&entry.external_id)
            .bind(&entry.error_message)
            .bind(i32::try_from(entry.retry_count).unwrap_or(i32::MAX))
            .bind(entry.executed_at)
            .bind(entry.delivered_at)
            .bind(entry.read_at)
            .bind(&entry.metadata)
            .bind(entry.updated_at)
            .execute(conn)
            .await
            .map_err(storage)?;
        Ok(result.rows_affected() == 1)
    }

    async fn write_back(
        &self,
        conn: &mut PgConnection,
        entry: &AutomationLogEntry,
    ) -> Result<(), AuditError> {
        let sql = format!(
            "UPDATE {} SET status = $2, external_id = $3, error_message = $4, retry_count = $5, \
             delivered_at = $6, read_at = $7, updated_at = $8 WHERE id = $1",
            self.logs
        );
        sqlx::query(&sql)
            .bind(&entry.id)
            .bind(entry.status.as_str())
            .bind(&entry.external_id)
            .bind(&entry.error_message)
            .bind(i32::try_from(entry.retry_count).unwrap_or(i32::MAX))
            .bind(entry.delivered_at)
            .bind(entry.read_at)
            .bind(entry.updated_at)
            .execute(conn)
            .await
            .map_err(storage)?;
        Ok(())
    }
}

#[async_trait]
impl LogStore for PostgresLogStore {
    async fn update(
        &self,
        id: &str,
        transition: LogTransition,
        now: DateTime<Utc>,
    ) -> Result<LogUpdate, AuditError> {
        if let Some(update) = self.try_update(id, transition.clone(), now).await? {
            return Ok(update);
        }
        // Lost an insert race: the row exists now, so this pass locks it.
        debug!(log_id = id, "log row inserted concurrently, reapplying");
        self.try_update(id, transition, now)
            .await?
            .ok_or_else(|| AuditError::Storage(format!("log row {id} could not be written")))
    }

    async fn get(&self, id: &str) -> Result<Option<AutomationLogEntry>, AuditError> {
        let sql = format!("SELECT * FROM {} WHERE id = $1", self.logs);
        sqlx::query_as::<_, LogRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage)?
            .map(AutomationLogEntry::try_from)
            .transpose()
    }

    async fn find_by_external_id(
        &self,
        external_id: &str,
    ) -> Result<Option<AutomationLogEntry>, AuditError> {
        let sql = format!(
            "SELECT * FROM {} WHERE external_id = $1 ORDER BY executed_at DESC LIMIT 1",
            self.logs
        );
        sqlx::query_as::<_, LogRow>(&sql)
            .bind(external_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage)?
            .map(AutomationLogEntry::try_from)
            .transpose()
    }

    async fn query(&self, query: &LogQuery) -> Result<LogPage, AuditError> {
        let limit = query.effective_limit();
        let offset = query.effective_offset();
        let (where_clause, binds, bind_idx) = build_where_clause(query);

        let count_sql = format!("SELECT COUNT(*) FROM {} {where_clause}", self.logs);
        let mut count_q = sqlx::query_scalar::<_, i64>(&count_sql);
        for b in &binds {
            count_q = count_q.bind(b);
        }
        if let Some(from) = query.from {
            count_q = count_q.bind(from);
        }
        if let Some(to) = query.to {
            count_q = count_q.bind(to);
        }
        let total = count_q.fetch_one(&self.pool).await.map_err(storage)?;

        let limit_idx = bind_idx;
        let offset_idx = bind_idx + 1;
        let data_sql = format!(
            "SELECT * FROM {} {where_clause} ORDER BY executed_at DESC, id DESC \
             LIMIT ${limit_idx} OFFSET ${offset_idx}",
            self.logs
        );
        let mut data_q = sqlx::query_as::<_, LogRow>(&data_sql);
        for b in &binds {
            data_q = data_q.bind(b);
        }
        if let Some(from) = query.from {
            data_q = data_q.bind(from);
        }
        if let Some(to) = query.to {
            data_q = data_q.bind(to);
        }
        data_q = data_q.bind(i64::from(limit)).bind(i64::from(offset));

        let rows = data_q.fetch_all(&self.pool).await.map_err(storage)?;
        let entries = rows
            .into_iter()
            .map(AutomationLogEntry::try_from)
            .collect::<Result<_, _>>()?;

        Ok(LogPage {
            entries,
            total: u64::try_from(total).unwrap_or_default(),
            limit,
            offset,
        })
    }

    async fn performance(
        &self,
        automation_id: &AutomationId,
        window_days: u32,
        now: DateTime<Utc>,
    ) -> Result<PerformanceSummary, AuditError> {
        let since = now - Duration::days(i64::from(window_days));
        let sql = format!(
            "SELECT COUNT(*), \
                COUNT(*) FILTER (WHERE status = 'success'), \
                COUNT(*) FILTER (WHERE status = 'failed'), \
                COUNT(*) FILTER (WHERE status IN ('pending', 'retrying')) \
             FROM {} WHERE automation_id = $1 AND executed_at >= $2",
            self.logs
        );
        let (total, success, failed, pending): (i64, i64, i64, i64) = sqlx::query_as(&sql)
            .bind(automation_id.as_str())
            .bind(since)
            .fetch_one(&self.pool)
            .await
            .map_err(storage)?;

        let counts = LogCounts {
            total: u64::try_from(total).unwrap_or_default(),
            success: u64::try_from(success).unwrap_or_default(),
            failed: u64::try_from(failed).unwrap_or_default(),
            pending: u64::try_from(pending).unwrap_or_default(),
        };
        Ok(PerformanceSummary::from_counts(
            automation_id.clone(),
            window_days,
            counts,
        ))
    }

    async fn record_system_error(&self, record: SystemErrorRecord) -> Result<(), AuditError> {
        let sql = format!(
            "INSERT INTO {} (id, context, error_message, error_stack, severity, severity_rank, \
             occurred_at, resolved) VALUES ($1, $2, $3, $4, $5, $6, $7, $8) \
             ON CONFLICT (id) DO NOTHING",
            self.errors
        );
        sqlx::query(&sql)
            .bind(&record.id)
            .bind(&record.context)
            .bind(&record.error_message)
            .bind(&record.error_stack)
            .bind(record.severity.as_str())
            .bind(severity_rank(record.severity))
            .bind(record.occurred_at)
            .bind(record.resolved)
            .execute(&self.pool)
            .await
            .map_err(storage)?;
        Ok(())
    }

    async fn list_system_errors(
        &self,
        query: &SystemErrorQuery,
    ) -> Result<Vec<SystemErrorRecord>, AuditError> {
        let mut conditions = Vec::new();
        let mut idx = 1u32;
        if query.resolved.is_some() {
            conditions.push(format!("resolved = ${idx}"));
            idx += 1;
        }
        if query.min_severity.is_some() {
            conditions.push(format!("severity_rank >= ${idx}"));
            idx += 1;
        }
        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };
        let sql = format!(
            "SELECT id, context, error_message, error_stack, severity, occurred_at, resolved \
             FROM {} {where_clause} ORDER BY occurred_at DESC, id DESC LIMIT ${idx}",
            self.errors
        );

        let mut q = sqlx::query_as::<_, SystemErrorRow>(&sql);
        if let Some(resolved) = query.resolved {
            q = q.bind(resolved);
        }
        if let Some(severity) = query.min_severity {
            q = q.bind(severity_rank(severity));
        }
        q = q.bind(i64::from(query.effective_limit()));

        q.fetch_all(&self.pool)
            .await
            .map_err(storage)?
            .into_iter()
            .map(SystemErrorRecord::try_from)
            .collect()
    }

    async fn resolve_system_error(&self, id: &str) -> Result<bool, AuditError> {
        let sql = format!("UPDATE {} SET resolved = TRUE WHERE id = $1", self.errors);
        let result = sqlx::query(&sql)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(storage)?;
        Ok(result.rows_affected() > 0)
    }
}

fn storage(e: sqlx::Error) -> AuditError {
    AuditError::Storage(e.to_string())
}

fn unknown(e: UnknownVariant) -> AuditError {
    AuditError::Serialization(e.to_string())
}

fn severity_rank(severity: Severity) -> i16 {
    match severity {
        Severity::Info => 0,
        Severity::Warning => 1,
        Severity::Error => 2,
        Severity::Critical => 3,
    }
}

/// Build the WHERE clause and string binds for a log query. Time bounds
/// follow the string binds; the returned index is the next free one.
fn build_where_clause(query: &LogQuery) -> (String, Vec<String>, u32) {
    let mut conditions = Vec::new();
    let mut bind_idx = 1u32;
    let mut binds: Vec<String> = Vec::new();

    let fields: [(Option<&str>, &str); 3] = [
        (query.automation_id.as_ref().map(AutomationId::as_str), "automation_id"),
        (query.channel.map(|c| c.as_str()), "channel"),
        (query.status.map(|s| s.as_str()), "status"),
    ];
    for (value, col) in fields {
        if let Some(v) = value {
            conditions.push(format!("{col} = ${bind_idx}"));
            binds.push(v.to_owned());
            bind_idx += 1;
        }
    }

    if query.from.is_some() {
        conditions.push(format!("executed_at >= ${bind_idx}"));
        bind_idx += 1;
    }
    if query.to.is_some() {
        conditions.push(format!("executed_at <= ${bind_idx}"));
        bind_idx += 1;
    }

    let where_clause = if conditions.is_empty() {
        String::new()
    } else {
        format!("WHERE {}", conditions.join(" AND "))
    };

    (where_clause, binds, bind_idx)
}

/// Internal row type for mapping database rows to `AutomationLogEntry`.
#[derive(sqlx::FromRow)]
struct LogRow {
    id: String,
    automation_id: Option<String>,
    profile_id: Option<String>,
    channel: String,
    status: String,
    message_content: String,
    recipient_info: String,
    external_id: Option<String>,
    error_message: Option<String>,
    retry_count: i32,
    executed_at: DateTime<Utc>,
    delivered_at: Option<DateTime<Utc>>,
    read_at: Option<DateTime<Utc>>,
    metadata: serde_json::Value,
    updated_at: DateTime<Utc>,
}

impl TryFrom<LogRow> for AutomationLogEntry {
    type Error = AuditError;

    fn try_from(row: LogRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            automation_id: row.automation_id.map(AutomationId::new),
            profile_id: row.profile_id,
            channel: row.channel.parse().map_err(unknown)?,
            status: row.status.parse().map_err(unknown)?,
            message_content: row.message_content,
            recipient_info: row.recipient_info,
            external_id: row.external_id,
            error_message: row.error_message,
            retry_count: u32::try_from(row.retry_count).unwrap_or_default(),
            executed_at: row.executed_at,
            delivered_at: row.delivered_at,
            read_at: row.read_at,
            metadata: row.metadata,
            updated_at: row.updated_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct SystemErrorRow {
    id: String,
    context: String,
    error_message: String,
    error_stack: Option<String>,
    severity: String,
    occurred_at: DateTime<Utc>,
    resolved: bool,
}

impl TryFrom<SystemErrorRow> for SystemErrorRecord {
    type Error = AuditError;

    fn try_from(row: SystemErrorRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            context: row.context,
            error_message: row.error_message,
            error_stack: row.error_stack,
            severity: row.severity.parse().map_err(unknown)?,
            occurred_at: row.occurred_at,
            resolved: row.resolved,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use courier_audit::LogStatus;
    use courier_core::Channel;

    #[test]
    fn where_clause_numbers_binds_in_order() {
        let query = LogQuery {
            automation_id: Some(AutomationId::new("welcome")),
            status: Some(LogStatus::Failed),
            from: Some(Utc::now()),
            ..LogQuery::default()
        };
        let (clause, binds, next) = build_where_clause(&query);
        assert_eq!(
            clause,
            "WHERE automation_id = $1 AND status = $2 AND executed_at >= $3"
        );
        assert_eq!(binds, vec!["welcome".to_owned(), "failed".to_owned()]);
        assert_eq!(next, 4);
    }

    #[test]
    fn empty_query_has_no_where_clause() {
        let (clause, binds, next) = build_where_clause(&LogQuery::default());
        assert!(clause.is_empty());
        assert!(binds.is_empty());
        assert_eq!(next, 1);
    }

    #[test]
    fn channel_filter_uses_wire_name() {
        let query = LogQuery {
            channel: Some(Channel::Whatsapp),
            ..LogQuery::default()
        };
        let (_, binds, _) = build_where_clause(&query);
        assert_eq!(binds, vec!["whatsapp".to_owned()]);
    }

    #[test]
    fn severity_rank_matches_ordering() {
        let ranks: Vec<i16> = Severity::ALL.into_iter().map(severity_rank).collect();
        assert!(ranks.windows(2).all(|w| w[0] < w[1]));
    }
}

#[cfg(all(test, feature = "integration"))]
mod integration_tests {
    use super::*;

    #[tokio::test]
    async fn log_store_conformance() {
        let url = std::env::var("DATABASE_URL")
            .unwrap_or_else(|_| "postgres://localhost:5432/courier_test".to_string());
        let config = PostgresAuditConfig::new(url)
            .with_prefix(format!("test_{}_", uuid::Uuid::new_v4().simple()));
        let store = PostgresLogStore::new(&config)
            .await
            .expect("pool creation should succeed");
        courier_audit::testing::run_log_store_conformance_tests(&store)
            .await
            .expect("conformance tests should pass");
    }
}
