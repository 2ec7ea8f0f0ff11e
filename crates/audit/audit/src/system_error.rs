use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use courier_core::UnknownVariant;
use serde::{Deserialize, Serialize};

/// Severity of a recorded system error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
    Error,
    Critical,
}

impl Severity {
    pub const ALL: [Severity; 4] = [
        Severity::Info,
        Severity::Warning,
        Severity::Error,
        Severity::Critical,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Error => "error",
            Self::Critical => "critical",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Severity {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|severity| severity.as_str() == s)
            .ok_or_else(|| UnknownVariant {
                kind: "severity",
                value: s.to_owned(),
            })
    }
}

/// An operational error unrelated to any single queued action: a failed log
/// write, an unreachable provider, a raised alert.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemErrorRecord {
    pub id: String,
    /// Where it happened, e.g. `logger:success` or `health:email`.
    pub context: String,
    pub error_message: String,
    pub error_stack: Option<String>,
    pub severity: Severity,
    pub occurred_at: DateTime<Utc>,
    pub resolved: bool,
}

impl SystemErrorRecord {
    pub fn new(
        context: impl Into<String>,
        error_message: impl Into<String>,
        severity: Severity,
        occurred_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            context: context.into(),
            error_message: error_message.into(),
            error_stack: None,
            severity,
            occurred_at,
            resolved: false,
        }
    }

    #[must_use]
    pub fn with_stack(mut self, stack: impl Into<String>) -> Self {
        self.error_stack = Some(stack.into());
        self
    }
}

/// Filter for listing system errors, newest first.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct SystemErrorQuery {
    pub resolved: Option<bool>,
    /// Only errors at or above this severity.
    pub min_severity: Option<Severity>,
    pub limit: Option<u32>,
}

impl SystemErrorQuery {
    pub fn effective_limit(&self) -> u32 {
        self.limit.unwrap_or(100).clamp(1, 1000)
    }

    pub fn matches(&self, record: &SystemErrorRecord) -> bool {
        self.resolved.is_none_or(|r| r == record.resolved)
            && self.min_severity.is_none_or(|s| record.severity >= s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn severity_orders_by_urgency() {
        assert!(Severity::Critical > Severity::Error);
        assert!(Severity::Warning > Severity::Info);
        assert_eq!("critical".parse::<Severity>().unwrap(), Severity::Critical);
    }

    #[test]
    fn query_filters_by_resolution_and_severity() {
        let record = SystemErrorRecord::new("health:sms", "down", Severity::Warning, Utc::now());
        let open_errors = SystemErrorQuery {
            resolved: Some(false),
            min_severity: Some(Severity::Error),
            limit: None,
        };
        assert!(!open_errors.matches(&record));
        assert!(SystemErrorQuery::default().matches(&record));
    }
}
