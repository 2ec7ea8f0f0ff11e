use serde::Deserialize;

use super::queue::{default_backend, default_pool_size, default_schema, default_table_prefix};

/// Configuration for the automation log and system error store.
#[derive(Debug, Deserialize)]
pub struct AuditConfig {
    /// Which backend to use: `"memory"` or `"postgres"`.
    #[serde(default = "default_backend")]
    pub backend: String,
    /// Connection URL for the `postgres` backend.
    pub url: Option<String>,
    #[serde(default = "default_schema")]
    pub schema: String,
    #[serde(default = "default_table_prefix")]
    pub table_prefix: String,
    #[serde(default = "default_pool_size")]
    pub pool_size: u32,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            url: None,
            schema: default_schema(),
            table_prefix: default_table_prefix(),
            pool_size: default_pool_size(),
        }
    }
}
