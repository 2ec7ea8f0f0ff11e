use std::sync::Arc;

use courier_audit::LogStore;
use courier_audit_memory::MemoryLogStore;
#[cfg(feature = "postgres")]
use courier_audit_postgres::{PostgresAuditConfig, PostgresLogStore};

use crate::config::AuditConfig;
use crate::error::ServerError;

/// Create the automation log store from the given configuration.
#[allow(clippy::unused_async)]
pub async fn create_log_store(config: &AuditConfig) -> Result<Arc<dyn LogStore>, ServerError> {
    let store: Arc<dyn LogStore> = match config.backend.as_str() {
        "memory" => Arc::new(MemoryLogStore::new()),
        #[cfg(feature = "postgres")]
        "postgres" => {
            let url = config.url.as_deref().ok_or_else(|| {
                ServerError::Config("audit postgres backend requires [audit] url".into())
            })?;

            let mut pg_config = PostgresAuditConfig::new(url)
                .with_schema(&config.schema)
                .with_prefix(&config.table_prefix);
            pg_config.pool_size = config.pool_size;

            let store = PostgresLogStore::new(&pg_config)
                .await
                .map_err(|e| ServerError::Config(format!("audit postgres: {e}")))?;

            Arc::new(store)
        }
        other => {
            return Err(ServerError::Config(format!(
                "unknown audit backend: {other} (is the feature enabled?)"
            )));
        }
    };
    Ok(store)
}
