use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use courier_core::{AutomationId, Channel, UnknownVariant};
use serde::{Deserialize, Serialize};

/// Maximum characters of rendered content kept on a log row.
pub const MAX_MESSAGE_CHARS: usize = 500;

/// Lifecycle status of an automation log row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogStatus {
    Pending,
    Success,
    Failed,
    Retrying,
}

impl LogStatus {
    pub const ALL: [LogStatus; 4] = [
        LogStatus::Pending,
        LogStatus::Success,
        LogStatus::Failed,
        LogStatus::Retrying,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Success => "success",
            Self::Failed => "failed",
            Self::Retrying => "retrying",
        }
    }

    /// `success` and `failed` rows never change status again.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Success | Self::Failed)
    }
}

impl fmt::Display for LogStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogStatus {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| UnknownVariant {
                kind: "log status",
                value: s.to_owned(),
            })
    }
}

/// One row per attempt window of a queued action.
///
/// The id is `"{action_id}#{generation}"`, so every retry of the same
/// action updates this row, and an operator requeue starts a new one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AutomationLogEntry {
    pub id: String,
    pub automation_id: Option<AutomationId>,
    /// The recipient profile, when the action was addressed to one.
    pub profile_id: Option<String>,
    pub channel: Channel,
    pub status: LogStatus,
    /// Rendered content, truncated to [`MAX_MESSAGE_CHARS`].
    pub message_content: String,
    /// Comma-separated recipients.
    pub recipient_info: String,
    /// Provider message id, set on success.
    pub external_id: Option<String>,
    pub error_message: Option<String>,
    pub retry_count: u32,
    pub executed_at: DateTime<Utc>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub read_at: Option<DateTime<Utc>>,
    pub metadata: serde_json::Value,
    pub updated_at: DateTime<Utc>,
}

/// Fields known when an attempt window opens.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewLogEntry {
    pub id: String,
    pub automation_id: Option<AutomationId>,
    pub profile_id: Option<String>,
    pub channel: Channel,
    pub message_content: String,
    pub recipient_info: String,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

impl NewLogEntry {
    /// A `pending` row started at `now`.
    pub fn into_entry(self, now: DateTime<Utc>) -> AutomationLogEntry {
        AutomationLogEntry {
            id: self.id,
            automation_id: self.automation_id,
            profile_id: self.profile_id,
            channel: self.channel,
            status: LogStatus::Pending,
            message_content: truncate(&self.message_content, MAX_MESSAGE_CHARS),
            recipient_info: self.recipient_info,
            external_id: None,
            error_message: None,
            retry_count: 0,
            executed_at: now,
            delivered_at: None,
            read_at: None,
            metadata: self.metadata,
            updated_at: now,
        }
    }
}

fn truncate(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((end, _)) => text[..end].to_owned(),
        None => text.to_owned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trip() {
        for status in LogStatus::ALL {
            assert_eq!(status.as_str().parse::<LogStatus>().unwrap(), status);
        }
        assert!("sent".parse::<LogStatus>().is_err());
    }

    #[test]
    fn into_entry_truncates_content() {
        let entry = NewLogEntry {
            id: "a#0".into(),
            automation_id: None,
            profile_id: None,
            channel: Channel::Sms,
            message_content: "é".repeat(MAX_MESSAGE_CHARS + 20),
            recipient_info: "+15550001111".into(),
            metadata: serde_json::Value::Null,
        }
        .into_entry(Utc::now());
        assert_eq!(entry.message_content.chars().count(), MAX_MESSAGE_CHARS);
        assert_eq!(entry.status, LogStatus::Pending);
        assert_eq!(entry.retry_count, 0);
    }
}
