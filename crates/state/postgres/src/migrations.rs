use sqlx::PgPool;

use crate::config::PostgresConfig;

/// Create the pending action, automation and trigger tables if they do not
/// exist.
///
/// # Errors
///
/// Returns a [`sqlx::Error`] if any DDL statement fails.
pub async fn run_migrations(pool: &PgPool, config: &PostgresConfig) -> Result<(), sqlx::Error> {
    let queue = config.queue_table();
    let automations = config.automations_table();
    let triggers = config.triggers_table();
    let prefix = &config.table_prefix;

    // The idempotency key constraint is what makes enqueue exactly-once
    // across processes.
    let create_queue = format!(
        "CREATE TABLE IF NOT EXISTS {queue} (
            id TEXT PRIMARY KEY,
            event_source TEXT NOT NULL,
            event_type TEXT NOT NULL,
            event_payload JSONB NOT NULL,
            channel TEXT NOT NULL,
            status TEXT NOT NULL,
            attempts INTEGER NOT NULL DEFAULT 0,
            max_attempts INTEGER NOT NULL,
            next_run_at TIMESTAMPTZ NOT NULL,
            idempotency_key TEXT NOT NULL UNIQUE,
            last_error TEXT,
            generation INTEGER NOT NULL DEFAULT 0,
            claimed_at TIMESTAMPTZ,
            created_at TIMESTAMPTZ NOT NULL,
            updated_at TIMESTAMPTZ NOT NULL
        )"
    );

    let create_due_idx = format!(
        "CREATE INDEX IF NOT EXISTS {prefix}pending_actions_due_idx \
         ON {queue} (next_run_at, created_at, id) \
         WHERE status IN ('queued', 'retrying')"
    );

    let create_claimed_idx = format!(
        "CREATE INDEX IF NOT EXISTS {prefix}pending_actions_claimed_idx \
         ON {queue} (claimed_at) WHERE status = 'dispatching'"
    );

    let create_status_idx = format!(
        "CREATE INDEX IF NOT EXISTS {prefix}pending_actions_status_idx \
         ON {queue} (status, updated_at DESC)"
    );

    let create_automations = format!(
        "CREATE TABLE IF NOT EXISTS {automations} (
            id TEXT PRIMARY KEY,
            action_name TEXT NOT NULL,
            automation_type TEXT NOT NULL,
            segment_id TEXT,
            is_active BOOLEAN NOT NULL DEFAULT TRUE,
            execution_count BIGINT NOT NULL DEFAULT 0,
            last_executed_at TIMESTAMPTZ
        )"
    );

    let create_triggers = format!(
        "CREATE TABLE IF NOT EXISTS {triggers} (
            id TEXT PRIMARY KEY,
            trigger_type TEXT NOT NULL,
            automation_id TEXT NOT NULL,
            trigger_config JSONB NOT NULL DEFAULT '{{}}'::jsonb,
            is_active BOOLEAN NOT NULL DEFAULT TRUE,
            next_trigger_at TIMESTAMPTZ,
            last_fired_at TIMESTAMPTZ
        )"
    );

    sqlx::query(&create_queue).execute(pool).await?;
    sqlx::query(&create_due_idx).execute(pool).await?;
    sqlx::query(&create_claimed_idx).execute(pool).await?;
    sqlx::query(&create_status_idx).execute(pool).await?;
    sqlx::query(&create_automations).execute(pool).await?;
    sqlx::query(&create_triggers).execute(pool).await?;

    Ok(())
}
