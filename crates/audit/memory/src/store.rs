use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

use courier_audit::{
    AuditError, AutomationLogEntry, LogCounts, LogPage, LogQuery, LogStore, LogTransition,
    LogUpdate, PerformanceSummary, SystemErrorQuery, SystemErrorRecord,
};
use courier_core::AutomationId;

/// In-memory log store using `DashMap`. Suitable for development and testing.
///
/// A log transition runs under the shard lock of its row's entry, which
/// makes the read-modify-write atomic.
#[derive(Debug, Default)]
pub struct MemoryLogStore {
    entries: DashMap<String, AutomationLogEntry>,
    /// Secondary index: provider message id -> log row id.
    external_index: DashMap<String, String>,
    system_errors: DashMap<String, SystemErrorRecord>,
}

impl MemoryLogStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl LogStore for MemoryLogStore {
    async fn update(
        &self,
        id: &str,
        transition: LogTransition,
        now: DateTime<Utc>,
    ) -> Result<LogUpdate, AuditError> {
        let update = match self.entries.entry(id.to_owned()) {
            Entry::Occupied(mut occupied) => {
                let update = transition.apply(Some(occupied.get().clone()), now);
                if let LogUpdate::Updated(entry) = &update {
                    occupied.insert(entry.clone());
                }
                update
            }
            Entry::Vacant(vacant) => {
                let update = transition.apply(None, now);
                if let LogUpdate::Inserted(entry) = &update {
                    vacant.insert(entry.clone());
                }
                update
            }
        };
        if let Some(entry) = update.entry()
            && update.is_write()
            && let Some(external_id) = &entry.external_id
        {
            self.external_index
                .insert(external_id.clone(), entry.id.clone());
        }
        Ok(update)
    }

    async fn get(&self, id: &str) -> Result<Option<AutomationLogEntry>, AuditError> {
        Ok(self.entries.get(id).map(|e| e.value().clone()))
    }

    async fn find_by_external_id(
        &self,
        external_id: &str,
    ) -> Result<Option<AutomationLogEntry>, AuditError> {
        let Some(id) = self.external_index.get(external_id).map(|id| id.clone()) else {
            return Ok(None);
        };
        self.get(&id).await
    }

    async fn query(&self, query: &LogQuery) -> Result<LogPage, AuditError> {
        let limit = query.effective_limit();
        let offset = query.effective_offset();

        let mut matching: Vec<AutomationLogEntry> = self
            .entries
            .iter()
            .filter(|e| query.matches(e.value()))
            .map(|e| e.value().clone())
            .collect();
        matching.sort_by(|a, b| {
            b.executed_at
                .cmp(&a.executed_at)
                .then_with(|| b.id.cmp(&a.id))
        });

        let total = matching.len() as u64;
        let entries = matching
            .into_iter()
            .skip(offset as usize)
            .take(limit as usize)
            .collect();

        Ok(LogPage {
            entries,
            total,
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
        let mut counts = LogCounts::default();
        for entry in &self.entries {
            if entry.automation_id.as_ref() == Some(automation_id) && entry.executed_at >= since {
                counts.add(entry.status);
            }
        }
        Ok(PerformanceSummary::from_counts(
            automation_id.clone(),
            window_days,
            counts,
        ))
    }

    async fn record_system_error(&self, record: SystemErrorRecord) -> Result<(), AuditError> {
        self.system_errors.insert(record.id.clone(), record);
        Ok(())
    }

    async fn list_system_errors(
        &self,
        query: &SystemErrorQuery,
    ) -> Result<Vec<SystemErrorRecord>, AuditError> {
        let mut matching: Vec<SystemErrorRecord> = self
            .system_errors
            .iter()
            .filter(|r| query.matches(r.value()))
            .map(|r| r.value().clone())
            .collect();
        matching.sort_by(|a, b| {
            b.occurred_at
                .cmp(&a.occurred_at)
                .then_with(|| b.id.cmp(&a.id))
        });
        matching.truncate(query.effective_limit() as usize);
        Ok(matching)
    }

    async fn resolve_system_error(&self, id: &str) -> Result<bool, AuditError> {
        Ok(match self.system_errors.get_mut(id) {
            Some(mut record) => {
                record.resolved = true;
                true
            }
            None => false,
        })
    }
}
