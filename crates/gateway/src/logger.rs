use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, error, warn};

use courier_audit::{
    AutomationLogEntry, LogPage, LogQuery, LogStore, LogTransition, LogUpdate, NewLogEntry,
    PerformanceSummary, Severity, SystemErrorQuery, SystemErrorRecord,
};
use courier_core::{AutomationId, PendingAction};

use crate::error::GatewayError;
use crate::metrics::GatewayMetrics;

/// The only writer of automation log rows.
///
/// Write methods never fail: a log store error is recorded as a system error
/// with a `logger:` context, and if that also fails it is emitted with
/// `error!`. The dispatch outcome that triggered the write is unaffected.
#[derive(Clone)]
pub struct AutomationLogger {
    store: Arc<dyn LogStore>,
    metrics: Arc<GatewayMetrics>,
}

impl std::fmt::Debug for AutomationLogger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AutomationLogger").finish_non_exhaustive()
    }
}

impl AutomationLogger {
    pub fn new(store: Arc<dyn LogStore>, metrics: Arc<GatewayMetrics>) -> Self {
        Self { store, metrics }
    }

    pub fn store(&self) -> &Arc<dyn LogStore> {
        &self.store
    }

    /// Open (or reopen) the attempt window of `action`.
    pub async fn log_start(
        &self,
        action: &PendingAction,
        message_content: String,
        now: DateTime<Utc>,
    ) -> Option<AutomationLogEntry> {
        let payload = &action.event_payload;
        let entry = NewLogEntry {
            id: action.log_id(),
            automation_id: payload.automation_id.clone(),
            profile_id: payload.profile_id.clone(),
            channel: payload.channel(),
            message_content,
            recipient_info: payload.message.recipients().join(", "),
            metadata: serde_json::json!({
                "action_id": action.id,
                "event_source": action.event_source,
                "event_type": action.event_type,
                "idempotency_key": action.idempotency_key,
                "generation": action.generation,
            }),
        };
        self.write(&action.log_id(), LogTransition::Start(entry), now)
            .await
    }

    pub async fn log_retry(
        &self,
        log_id: &str,
        retry_count: u32,
        error: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Option<AutomationLogEntry> {
        let transition = LogTransition::Retry {
            retry_count,
            error: error.into(),
        };
        self.write(log_id, transition, now).await
    }

    pub async fn log_success(
        &self,
        log_id: &str,
        retry_count: u32,
        external_id: Option<String>,
        now: DateTime<Utc>,
    ) -> Option<AutomationLogEntry> {
        let transition = LogTransition::Success {
            external_id,
            retry_count,
        };
        self.write(log_id, transition, now).await
    }

    pub async fn log_failure(
        &self,
        log_id: &str,
        retry_count: u32,
        error: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Option<AutomationLogEntry> {
        let transition = LogTransition::Failure {
            error: error.into(),
            retry_count,
        };
        self.write(log_id, transition, now).await
    }

    /// Apply a provider delivery callback to the row carrying `external_id`.
    ///
    /// Returns `None` if no row carries that id or the lookup failed.
    pub async fn log_delivery_status(
        &self,
        external_id: &str,
        delivered_at: Option<DateTime<Utc>>,
        read_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Option<AutomationLogEntry> {
        let entry = match self.store.find_by_external_id(external_id).await {
            Ok(Some(entry)) => entry,
            Ok(None) => {
                debug!(external_id, "delivery status for unknown message");
                return None;
            }
            Err(e) => {
                self.report_failure("delivery_status", &e.to_string()).await;
                return None;
            }
        };
        let transition = LogTransition::DeliveryStatus {
            delivered_at,
            read_at,
        };
        self.write(&entry.id, transition, now).await
    }

    /// Record an operational error. Never fails.
    pub async fn log_system_error(
        &self,
        context: impl Into<String>,
        message: impl Into<String>,
        severity: Severity,
    ) {
        let record = SystemErrorRecord::new(context, message, severity, Utc::now());
        if let Err(e) = self.store.record_system_error(record.clone()).await {
            error!(
                context = %record.context,
                message = %record.error_message,
                severity = %record.severity,
                error = %e,
                "failed to record system error"
            );
        }
    }

    pub async fn get(&self, id: &str) -> Result<Option<AutomationLogEntry>, GatewayError> {
        Ok(self.store.get(id).await?)
    }

    pub async fn query(&self, query: &LogQuery) -> Result<LogPage, GatewayError> {
        Ok(self.store.query(query).await?)
    }

    /// Every row matching `query`, across all pages.
    pub async fn query_all(
        &self,
        query: &LogQuery,
    ) -> Result<Vec<AutomationLogEntry>, GatewayError> {
        let mut page_query = query.clone();
        page_query.limit = Some(1000);
        page_query.offset = Some(0);
        let mut entries = Vec::new();
        loop {
            let page = self.store.query(&page_query).await?;
            let fetched = u32::try_from(page.entries.len()).unwrap_or(u32::MAX);
            entries.extend(page.entries);
            if fetched == 0 || entries.len() as u64 >= page.total {
                break;
            }
            page_query.offset = Some(page.offset.saturating_add(fetched));
        }
        Ok(entries)
    }

    pub async fn performance(
        &self,
        automation_id: &AutomationId,
        window_days: u32,
    ) -> Result<PerformanceSummary, GatewayError> {
        Ok(self
            .store
            .performance(automation_id, window_days, Utc::now())
            .await?)
    }

    pub async fn system_errors(
        &self,
        query: &SystemErrorQuery,
    ) -> Result<Vec<SystemErrorRecord>, GatewayError> {
        Ok(self.store.list_system_errors(query).await?)
    }

    pub async fn resolve_system_error(&self, id: &str) -> Result<bool, GatewayError> {
        Ok(self.store.resolve_system_error(id).await?)
    }

    async fn write(
        &self,
        log_id: &str,
        transition: LogTransition,
        now: DateTime<Utc>,
    ) -> Option<AutomationLogEntry> {
        let name = transition.name();
        match self.store.update(log_id, transition, now).await {
            Ok(LogUpdate::Unchanged(entry)) => {
                debug!(log_id, transition = name, "log row unchanged");
                entry
            }
            Ok(LogUpdate::Inserted(entry) | LogUpdate::Updated(entry)) => {
                debug!(log_id, transition = name, status = %entry.status, "log row written");
                Some(entry)
            }
            Err(e) => {
                warn!(log_id, transition = name, error = %e, "log write failed");
                self.report_failure(name, &format!("log {log_id}: {e}")).await;
                None
            }
        }
    }

    async fn report_failure(&self, operation: &str, message: &str) {
        self.metrics.increment_log_write_failures();
        self.log_system_error(format!("logger:{operation}"), message, Severity::Error)
            .await;
    }
}
