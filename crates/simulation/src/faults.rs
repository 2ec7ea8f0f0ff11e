//! Backends that fail on purpose.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use courier_audit::{
    AuditError, AutomationLogEntry, LogPage, LogQuery, LogStore, LogTransition, LogUpdate,
    PerformanceSummary, SystemErrorQuery, SystemErrorRecord,
};
use courier_core::AutomationId;

/// A log store whose every operation fails, as if its database were down.
#[derive(Debug, Default)]
pub struct UnavailableLogStore {
    attempts: AtomicU64,
}

impl UnavailableLogStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Operations attempted against the store so far.
    pub fn attempts(&self) -> u64 {
        self.attempts.load(Ordering::Relaxed)
    }

    fn fail<T>(&self) -> Result<T, AuditError> {
        self.attempts.fetch_add(1, Ordering::Relaxed);
        Err(AuditError::Storage("log database unavailable".into()))
    }
}

#[async_trait]
impl LogStore for UnavailableLogStore {
    async fn update(
        &self,
        _id: &str,
        _transition: LogTransition,
        _now: DateTime<Utc>,
    ) -> Result<LogUpdate, AuditError> {
        self.fail()
    }

    async fn get(&self, _id: &str) -> Result<Option<AutomationLogEntry>, AuditError> {
        self.fail()
    }

    async fn find_by_external_id(
        &self,
        _external_id: &str,
    ) -> Result<Option<AutomationLogEntry>, AuditError> {
        self.fail()
    }

    async fn query(&self, _query: &LogQuery) -> Result<LogPage, AuditError> {
        self.fail()
    }

    async fn performance(
        &self,
        _automation_id: &AutomationId,
        _window_days: u32,
        _now: DateTime<Utc>,
    ) -> Result<PerformanceSummary, AuditError> {
        self.fail()
    }

    async fn record_system_error(&self, _record: SystemErrorRecord) -> Result<(), AuditError> {
        self.fail()
    }

    async fn list_system_errors(
        &self,
        _query: &SystemErrorQuery,
    ) -> Result<Vec<SystemErrorRecord>, AuditError> {
        self.fail()
    }

    async fn resolve_system_error(&self, _id: &str) -> Result<bool, AuditError> {
        self.fail()
    }
}
