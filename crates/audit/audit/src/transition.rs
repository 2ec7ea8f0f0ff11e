use chrono::{DateTime, Utc};

use crate::entry::{AutomationLogEntry, LogStatus, NewLogEntry};

/// A write against one automation log row.
///
/// Every backend runs the same [`LogTransition::apply`] inside its own
/// atomic read-modify-write, so the rules below hold for all of them:
///
/// - `Start` inserts a `pending` row if none exists, and moves an existing
///   non-terminal row to `retrying`.
/// - `Retry` only raises `retry_count`.
/// - `Success` and `Failure` apply only to a non-terminal row.
/// - `DeliveryStatus` fills in timestamps and never clears one.
///
/// Re-running a transition that already took effect leaves the row as it is.
#[derive(Debug, Clone, PartialEq)]
pub enum LogTransition {
    Start(NewLogEntry),
    Retry {
        retry_count: u32,
        error: String,
    },
    Success {
        external_id: Option<String>,
        retry_count: u32,
    },
    Failure {
        error: String,
        retry_count: u32,
    },
    DeliveryStatus {
        delivered_at: Option<DateTime<Utc>>,
        read_at: Option<DateTime<Utc>>,
    },
}

/// What a transition did to the row.
#[derive(Debug, Clone, PartialEq)]
pub enum LogUpdate {
    Inserted(AutomationLogEntry),
    Updated(AutomationLogEntry),
    /// No write: the row is missing, terminal, or already up to date.
    Unchanged(Option<AutomationLogEntry>),
}

impl LogUpdate {
    pub fn entry(&self) -> Option<&AutomationLogEntry> {
        match self {
            Self::Inserted(entry) | Self::Updated(entry) => Some(entry),
            Self::Unchanged(entry) => entry.as_ref(),
        }
    }

    /// Whether the backend must persist the row.
    pub fn is_write(&self) -> bool {
        !matches!(self, Self::Unchanged(_))
    }
}

impl LogTransition {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Start(_) => "start",
            Self::Retry { .. } => "retry",
            Self::Success { .. } => "success",
            Self::Failure { .. } => "failure",
            Self::DeliveryStatus { .. } => "delivery_status",
        }
    }

    /// Compute the next state of the row from its current state.
    pub fn apply(self, current: Option<AutomationLogEntry>, now: DateTime<Utc>) -> LogUpdate {
        let Some(before) = current else {
            return match self {
                Self::Start(new) => LogUpdate::Inserted(new.into_entry(now)),
                _ => LogUpdate::Unchanged(None),
            };
        };

        let mut after = before.clone();
        match self {
            Self::Start(_) => {
                if before.status.is_terminal() {
                    return LogUpdate::Unchanged(Some(before));
                }
                after.status = LogStatus::Retrying;
            }
            Self::Retry { retry_count, error } => {
                if before.status.is_terminal() {
                    return LogUpdate::Unchanged(Some(before));
                }
                after.status = LogStatus::Retrying;
                after.retry_count = before.retry_count.max(retry_count);
                after.error_message = Some(error);
            }
            Self::Success {
                external_id,
                retry_count,
            } => {
                if before.status.is_terminal() {
                    return LogUpdate::Unchanged(Some(before));
                }
                after.status = LogStatus::Success;
                after.retry_count = before.retry_count.max(retry_count);
                after.external_id = external_id.or(before.external_id.clone());
            }
            Self::Failure { error, retry_count } => {
                if before.status.is_terminal() {
                    return LogUpdate::Unchanged(Some(before));
                }
                after.status = LogStatus::Failed;
                after.retry_count = before.retry_count.max(retry_count);
                after.error_message = Some(error);
            }
            Self::DeliveryStatus {
                delivered_at,
                read_at,
            } => {
                // The first report of each event wins.
                after.delivered_at = before.delivered_at.or(delivered_at);
                after.read_at = before.read_at.or(read_at);
            }
        }

        if after == before {
            LogUpdate::Unchanged(Some(before))
        } else {
            after.updated_at = now;
            LogUpdate::Updated(after)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use courier_core::Channel;

    fn start() -> LogTransition {
        LogTransition::Start(NewLogEntry {
            id: "act#0".into(),
            automation_id: None,
            profile_id: Some("p1".into()),
            channel: Channel::Email,
            message_content: "Welcome".into(),
            recipient_info: "buyer@example.com".into(),
            metadata: serde_json::json!({}),
        })
    }

    fn started() -> AutomationLogEntry {
        match start().apply(None, Utc::now()) {
            LogUpdate::Inserted(entry) => entry,
            other => panic!("expected insert, got {other:?}"),
        }
    }

    fn updated(update: LogUpdate) -> AutomationLogEntry {
        match update {
            LogUpdate::Updated(entry) => entry,
            other => panic!("expected update, got {other:?}"),
        }
    }

    #[test]
    fn start_inserts_pending() {
        let entry = started();
        assert_eq!(entry.status, LogStatus::Pending);
        assert_eq!(entry.retry_count, 0);
    }

    #[test]
    fn start_on_open_row_marks_retrying() {
        let entry = updated(start().apply(Some(started()), Utc::now()));
        assert_eq!(entry.status, LogStatus::Retrying);

        // A second start on a retrying row is a no-op.
        let again = start().apply(Some(entry), Utc::now());
        assert!(!again.is_write());
    }

    #[test]
    fn retry_count_never_decreases() {
        let row = updated(
            LogTransition::Retry {
                retry_count: 3,
                error: "HTTP_500".into(),
            }
            .apply(Some(started()), Utc::now()),
        );
        assert_eq!(row.retry_count, 3);

        let row = updated(
            LogTransition::Retry {
                retry_count: 1,
                error: "HTTP_503".into(),
            }
            .apply(Some(row), Utc::now()),
        );
        assert_eq!(row.retry_count, 3);
        assert_eq!(row.error_message.as_deref(), Some("HTTP_503"));
    }

    #[test]
    fn terminal_rows_ignore_late_results() {
        let failed = updated(
            LogTransition::Failure {
                error: "operator stop".into(),
                retry_count: 0,
            }
            .apply(Some(started()), Utc::now()),
        );
        let late = LogTransition::Success {
            external_id: Some("m-1".into()),
            retry_count: 1,
        }
        .apply(Some(failed.clone()), Utc::now());
        assert_eq!(late, LogUpdate::Unchanged(Some(failed.clone())));

        let restart = start().apply(Some(failed.clone()), Utc::now());
        assert_eq!(restart, LogUpdate::Unchanged(Some(failed)));
    }

    #[test]
    fn success_is_idempotent() {
        let success = LogTransition::Success {
            external_id: Some("m-1".into()),
            retry_count: 0,
        };
        let row = updated(success.clone().apply(Some(started()), Utc::now()));
        assert_eq!(row.status, LogStatus::Success);
        assert_eq!(row.external_id.as_deref(), Some("m-1"));
        assert!(!success.apply(Some(row), Utc::now()).is_write());
    }

    #[test]
    fn delivery_status_never_clears_timestamps() {
        let t0 = Utc::now();
        let row = updated(
            LogTransition::DeliveryStatus {
                delivered_at: Some(t0),
                read_at: None,
            }
            .apply(Some(started()), t0),
        );
        let row = updated(
            LogTransition::DeliveryStatus {
                delivered_at: None,
                read_at: Some(t0 + Duration::minutes(5)),
            }
            .apply(Some(row), t0),
        );
        assert_eq!(row.delivered_at, Some(t0));
        assert_eq!(row.read_at, Some(t0 + Duration::minutes(5)));

        let later = LogTransition::DeliveryStatus {
            delivered_at: Some(t0 + Duration::hours(1)),
            read_at: None,
        }
        .apply(Some(row.clone()), t0);
        assert_eq!(later, LogUpdate::Unchanged(Some(row)));
    }

    #[test]
    fn transitions_on_missing_row_do_nothing() {
        let update = LogTransition::Failure {
            error: "x".into(),
            retry_count: 1,
        }
        .apply(None, Utc::now());
        assert_eq!(update, LogUpdate::Unchanged(None));
    }
}
