use sqlx::PgPool;

use crate::config::PostgresAuditConfig;

/// Create the automation log and system error tables and their indexes if
/// they do not already exist.
pub async fn run_migrations(
    pool: &PgPool,
    config: &PostgresAuditConfig,
) -> Result<(), sqlx::Error> {
    let logs = config.logs_table();
    let errors = config.system_errors_table();
    let prefix = &config.prefix;

    let create_logs = format!(
        "
        CREATE TABLE IF NOT EXISTS {logs} (
            id              TEXT PRIMARY KEY,
            automation_id   TEXT,
            profile_id      TEXT,
            channel         TEXT NOT NULL,
            status          TEXT NOT NULL,
            message_content TEXT NOT NULL,
            recipient_info  TEXT NOT NULL,
            external_id     TEXT,
            error_message   TEXT,
            retry_count     INTEGER NOT NULL DEFAULT 0,
            executed_at     TIMESTAMPTZ NOT NULL,
            delivered_at    TIMESTAMPTZ,
            read_at         TIMESTAMPTZ,
            metadata        JSONB NOT NULL DEFAULT '{{}}'::jsonb,
            updated_at      TIMESTAMPTZ NOT NULL
        )
        "
    );

    let create_errors = format!(
        "
        CREATE TABLE IF NOT EXISTS {errors} (
            id            TEXT PRIMARY KEY,
            context       TEXT NOT NULL,
            error_message TEXT NOT NULL,
            error_stack   TEXT,
            severity      TEXT NOT NULL,
            severity_rank SMALLINT NOT NULL,
            occurred_at   TIMESTAMPTZ NOT NULL,
            resolved      BOOLEAN NOT NULL DEFAULT FALSE
        )
        "
    );

    sqlx::query(&create_logs).execute(pool).await?;
    sqlx::query(&create_errors).execute(pool).await?;

    let indexes = [
        format!(
            "CREATE INDEX IF NOT EXISTS idx_{prefix}logs_automation_time ON {logs} (automation_id, executed_at DESC)"
        ),
        format!(
            "CREATE INDEX IF NOT EXISTS idx_{prefix}logs_external_id ON {logs} (external_id) WHERE external_id IS NOT NULL"
        ),
        format!("CREATE INDEX IF NOT EXISTS idx_{prefix}logs_time ON {logs} (executed_at DESC, id DESC)"),
        format!(
            "CREATE INDEX IF NOT EXISTS idx_{prefix}system_errors_open ON {errors} (occurred_at DESC) WHERE NOT resolved"
        ),
    ];

    for idx in &indexes {
        sqlx::query(idx).execute(pool).await?;
    }

    Ok(())
}
