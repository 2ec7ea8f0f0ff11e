/// Configuration for the Postgres log store.
#[derive(Debug, Clone)]
pub struct PostgresAuditConfig {
    /// Postgres connection URL.
    pub url: String,
    /// Database schema holding the tables.
    pub schema: String,
    /// Table name prefix (e.g. "courier_").
    pub prefix: String,
    /// Maximum pool connections.
    pub pool_size: u32,
}

impl PostgresAuditConfig {
    /// Create a new configuration with the given URL and defaults.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            schema: "public".to_owned(),
            prefix: "courier_".to_owned(),
            pool_size: 5,
        }
    }

    /// Set the table prefix.
    #[must_use]
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    #[must_use]
    pub fn with_schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = schema.into();
        self
    }

    pub(crate) fn logs_table(&self) -> String {
        format!("{}.{}automation_logs", self.schema, self.prefix)
    }

    pub(crate) fn system_errors_table(&self) -> String {
        format!("{}.{}system_errors", self.schema, self.prefix)
    }
}
