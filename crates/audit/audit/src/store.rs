use async_trait::async_trait;
use chrono::{DateTime, Utc};
use courier_core::AutomationId;

use crate::entry::AutomationLogEntry;
use crate::error::AuditError;
use crate::query::{LogPage, LogQuery, PerformanceSummary};
use crate::system_error::{SystemErrorQuery, SystemErrorRecord};
use crate::transition::{LogTransition, LogUpdate};

/// Storage for automation logs and system errors.
///
/// Implementations must be `Send + Sync` to be shared across async tasks.
#[async_trait]
pub trait LogStore: Send + Sync {
    /// Atomically read the row `id`, run [`LogTransition::apply`] on it and
    /// persist the result when it changed.
    async fn update(
        &self,
        id: &str,
        transition: LogTransition,
        now: DateTime<Utc>,
    ) -> Result<LogUpdate, AuditError>;

    async fn get(&self, id: &str) -> Result<Option<AutomationLogEntry>, AuditError>;

    /// Look up the row a provider callback refers to.
    async fn find_by_external_id(
        &self,
        external_id: &str,
    ) -> Result<Option<AutomationLogEntry>, AuditError>;

    /// Query log rows with filters and pagination.
    async fn query(&self, query: &LogQuery) -> Result<LogPage, AuditError>;

    /// Aggregate rows of `automation_id` executed within `window_days` of `now`.
    async fn performance(
        &self,
        automation_id: &AutomationId,
        window_days: u32,
        now: DateTime<Utc>,
    ) -> Result<PerformanceSummary, AuditError>;

    async fn record_system_error(&self, record: SystemErrorRecord) -> Result<(), AuditError>;

    async fn list_system_errors(
        &self,
        query: &SystemErrorQuery,
    ) -> Result<Vec<SystemErrorRecord>, AuditError>;

    /// Mark a system error resolved. Returns `false` if it does not exist.
    async fn resolve_system_error(&self, id: &str) -> Result<bool, AuditError>;
}
