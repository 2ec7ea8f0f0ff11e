use chrono::{DateTime, Utc};
use courier_core::{AutomationId, Channel};
use serde::{Deserialize, Serialize};

use crate::entry::{AutomationLogEntry, LogStatus};

/// Query parameters for searching automation logs.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct LogQuery {
    pub automation_id: Option<AutomationId>,
    pub channel: Option<Channel>,
    pub status: Option<LogStatus>,
    /// Only rows executed at or after this time.
    pub from: Option<DateTime<Utc>>,
    /// Only rows executed at or before this time.
    pub to: Option<DateTime<Utc>>,
    /// Maximum number of rows to return (default 50, max 1000).
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

impl LogQuery {
    /// Return the effective limit, clamped to 1..=1000, defaulting to 50.
    pub fn effective_limit(&self) -> u32 {
        self.limit.unwrap_or(50).clamp(1, 1000)
    }

    pub fn effective_offset(&self) -> u32 {
        self.offset.unwrap_or(0)
    }

    /// In-process predicate equivalent to the SQL `WHERE` clause.
    pub fn matches(&self, entry: &AutomationLogEntry) -> bool {
        if let Some(id) = &self.automation_id
            && entry.automation_id.as_ref() != Some(id)
        {
            return false;
        }
        if self.channel.is_some_and(|c| c != entry.channel) {
            return false;
        }
        if self.status.is_some_and(|s| s != entry.status) {
            return false;
        }
        if self.from.is_some_and(|from| entry.executed_at < from) {
            return false;
        }
        if self.to.is_some_and(|to| entry.executed_at > to) {
            return false;
        }
        true
    }
}

/// A page of log rows, most recently executed first.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogPage {
    pub entries: Vec<AutomationLogEntry>,
    /// Total number of rows matching the query (before pagination).
    pub total: u64,
    pub limit: u32,
    pub offset: u32,
}

/// Raw row counts for one automation over a window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LogCounts {
    pub total: u64,
    pub success: u64,
    pub failed: u64,
    /// `pending` and `retrying` rows.
    pub pending: u64,
}

impl LogCounts {
    pub fn add(&mut self, status: LogStatus) {
        self.total += 1;
        match status {
            LogStatus::Success => self.success += 1,
            LogStatus::Failed => self.failed += 1,
            LogStatus::Pending | LogStatus::Retrying => self.pending += 1,
        }
    }
}

/// Delivery performance of one automation over the last `window_days`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceSummary {
    pub automation_id: AutomationId,
    pub window_days: u32,
    pub total: u64,
    pub success: u64,
    pub failed: u64,
    pub pending: u64,
    /// Percentage of rows that succeeded, 0 when there are none.
    pub success_rate: f64,
    /// Percentage of rows that failed, 0 when there are none.
    pub failure_rate: f64,
}

impl PerformanceSummary {
    pub fn from_counts(automation_id: AutomationId, window_days: u32, counts: LogCounts) -> Self {
        Self {
            automation_id,
            window_days,
            total: counts.total,
            success: counts.success,
            failed: counts.failed,
            pending: counts.pending,
            success_rate: percentage(counts.success, counts.total),
            failure_rate: percentage(counts.failed, counts.total),
        }
    }
}

#[allow(clippy::cast_precision_loss)]
fn percentage(part: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        part as f64 * 100.0 / total as f64
    }
}
