use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::channel::Channel;
use crate::error::UnknownVariant;
use crate::payload::EventPayload;
use crate::types::{ActionId, IdempotencyKey};

/// Lifecycle state of a [`PendingAction`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionStatus {
    /// Waiting for its first dispatch.
    Queued,
    /// Claimed by a worker; a remote call is in flight.
    Dispatching,
    /// A transient failure occurred; waiting for `next_run_at`.
    Retrying,
    /// The remote function accepted the message.
    Delivered,
    /// Terminal failure; the row sits in the dead-letter queue.
    Failed,
}

impl ActionStatus {
    pub const ALL: [ActionStatus; 5] = [
        Self::Queued,
        Self::Dispatching,
        Self::Retrying,
        Self::Delivered,
        Self::Failed,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Dispatching => "dispatching",
            Self::Retrying => "retrying",
            Self::Delivered => "delivered",
            Self::Failed => "failed",
        }
    }

    /// States a worker may claim from.
    pub fn is_claimable(self) -> bool {
        matches!(self, Self::Queued | Self::Retrying)
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Delivered | Self::Failed)
    }
}

impl fmt::Display for ActionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActionStatus {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| UnknownVariant::new("action status", s))
    }
}

/// One unit of intended outbound work, as persisted in the queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingAction {
    pub id: ActionId,
    /// Where the action came from, e.g. `manual` or `trigger:<id>`.
    pub event_source: String,
    pub event_type: String,
    pub event_payload: EventPayload,
    pub status: ActionStatus,
    /// Attempts made in the current attempt window.
    pub attempts: u32,
    pub max_attempts: u32,
    pub next_run_at: DateTime<Utc>,
    pub idempotency_key: IdempotencyKey,
    pub last_error: Option<String>,
    /// Number of operator requeues. Each requeue opens a new attempt window.
    pub generation: u32,
    /// When the current claim was taken, if the row is dispatching.
    pub claimed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PendingAction {
    pub fn channel(&self) -> Channel {
        self.event_payload.channel()
    }

    /// Identity of the automation log row for the current attempt window.
    pub fn log_id(&self) -> String {
        format!("{}#{}", self.id, self.generation)
    }

    /// Returns `true` if a worker may claim this row at `now`.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.status.is_claimable() && self.next_run_at <= now
    }
}

/// Input to the queue's `enqueue` operation.
#[derive(Debug, Clone, PartialEq)]
pub struct NewAction {
    pub event_source: String,
    pub event_type: String,
    pub event_payload: EventPayload,
    pub idempotency_key: IdempotencyKey,
    pub max_attempts: u32,
    /// Earliest time the action may be dispatched. `None` means "now".
    pub not_before: Option<DateTime<Utc>>,
}

impl NewAction {
    /// Materialize the queued row at `now`.
    pub fn into_pending(self, now: DateTime<Utc>) -> PendingAction {
        PendingAction {
            id: ActionId::generate(),
            event_source: self.event_source,
            event_type: self.event_type,
            event_payload: self.event_payload,
            status: ActionStatus::Queued,
            attempts: 0,
            max_attempts: self.max_attempts,
            next_run_at: self.not_before.unwrap_or(now),
            idempotency_key: self.idempotency_key,
            last_error: None,
            generation: 0,
            claimed_at: None,
            created_at: now,
            updated_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payload::ChannelMessage;

    fn new_action() -> NewAction {
        NewAction {
            event_source: "manual".into(),
            event_type: "welcome".into(),
            event_payload: EventPayload::new(ChannelMessage::inline(
                Channel::Email,
                "a@example.com",
                None,
                "hi",
            )),
            idempotency_key: IdempotencyKey::new("k1"),
            max_attempts: 5,
            not_before: None,
        }
    }

    #[test]
    fn status_round_trip() {
        for status in ActionStatus::ALL {
            assert_eq!(status.as_str().parse::<ActionStatus>().unwrap(), status);
        }
        assert!("pending".parse::<ActionStatus>().is_err());
    }

    #[test]
    fn claimable_and_terminal_are_disjoint() {
        for status in ActionStatus::ALL {
            assert!(!(status.is_claimable() && status.is_terminal()));
        }
        assert!(!ActionStatus::Dispatching.is_claimable());
        assert!(!ActionStatus::Dispatching.is_terminal());
    }

    #[test]
    fn into_pending_starts_queued() {
        let now = Utc::now();
        let row = new_action().into_pending(now);
        assert_eq!(row.status, ActionStatus::Queued);
        assert_eq!(row.attempts, 0);
        assert_eq!(row.next_run_at, now);
        assert!(row.is_due(now));
        assert_eq!(row.log_id(), format!("{}#0", row.id));
    }

    #[test]
    fn not_before_delays_due_time() {
        let now = Utc::now();
        let mut action = new_action();
        action.not_before = Some(now + chrono::Duration::minutes(5));
        let row = action.into_pending(now);
        assert!(!row.is_due(now));
        assert!(row.is_due(now + chrono::Duration::minutes(5)));
    }
}
