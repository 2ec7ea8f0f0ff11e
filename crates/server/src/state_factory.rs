use std::sync::Arc;

use courier_state::{AutomationRegistry, QueueStore};
use courier_state_memory::{MemoryQueueStore, MemoryRegistry};
#[cfg(feature = "postgres")]
use courier_state_postgres::{PostgresConfig, PostgresQueueStore, PostgresRegistry};

use crate::config::QueueConfig;
use crate::error::ServerError;

/// Queue store and automation registry built from `[queue]`.
pub struct Stores {
    pub queue: Arc<dyn QueueStore>,
    pub registry: Arc<dyn AutomationRegistry>,
}

/// Create the queue store and automation registry from the given
/// configuration. SQL backends share one connection pool and run their
/// migrations here.
#[allow(clippy::unused_async)]
pub async fn create_stores(config: &QueueConfig) -> Result<Stores, ServerError> {
    match config.backend.as_str() {
        "memory" => Ok(Stores {
            queue: Arc::new(MemoryQueueStore::new()),
            registry: Arc::new(MemoryRegistry::new()),
        }),
        #[cfg(feature = "postgres")]
        "postgres" => {
            let url = config.url.clone().ok_or_else(|| {
                ServerError::Config("queue postgres backend requires [queue] url".into())
            })?;
            let pg_config = PostgresConfig {
                url,
                pool_size: config.pool_size,
                schema: config.schema.clone(),
                table_prefix: config.table_prefix.clone(),
                ..PostgresConfig::default()
            };
            let pool = courier_state_postgres::connect(&pg_config)
                .await
                .map_err(|e| ServerError::Config(format!("queue postgres: {e}")))?;
            let queue = PostgresQueueStore::from_pool(pool.clone(), pg_config.clone())
                .await
                .map_err(|e| ServerError::Config(format!("queue postgres: {e}")))?;
            let registry = PostgresRegistry::from_pool(pool, pg_config)
                .await
                .map_err(|e| ServerError::Config(format!("registry postgres: {e}")))?;
            Ok(Stores {
                queue: Arc::new(queue),
                registry: Arc::new(registry),
            })
        }
        other => Err(ServerError::Config(format!(
            "unknown queue backend: {other} (is the feature enabled?)"
        ))),
    }
}
