use chrono::{DateTime, Utc};
use courier_core::{ActionStatus, PendingAction};
use serde::{Deserialize, Serialize};

use crate::error::StateError;

/// Identity of one claim on a row, as stamped by `claim_next`.
///
/// A worker hands the token back with its result. Once the claim has been
/// released and the row claimed again, the old token no longer matches and
/// the old worker's result is rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimToken {
    pub claimed_at: DateTime<Utc>,
    pub generation: u32,
    pub attempts: u32,
}

impl ClaimToken {
    /// The token of a claimed row, or `None` if the row is not claimed.
    pub fn of(row: &PendingAction) -> Option<Self> {
        Some(Self {
            claimed_at: row.claimed_at?,
            generation: row.generation,
            attempts: row.attempts,
        })
    }

    /// Whether `row` is still held by this claim.
    pub fn holds(&self, row: &PendingAction) -> bool {
        row.status == ActionStatus::Dispatching
            && row.claimed_at == Some(self.claimed_at)
            && row.generation == self.generation
            && row.attempts == self.attempts
    }
}

/// A typed state change on a queued action.
///
/// Each transition names the states it may start from. Backends check the
/// current status and apply the change in one atomic step: the in-memory
/// backend under the row's shard lock, SQL backends under a row lock taken
/// with `SELECT ... FOR UPDATE`. Both go through [`QueueTransition::apply`].
///
/// Worker results carry the [`ClaimToken`] of the claim they answer and are
/// accepted only while that claim is still the row's current one.
#[derive(Debug, Clone, PartialEq)]
pub enum QueueTransition {
    /// The remote function accepted the message.
    Deliver { claim: ClaimToken, attempts: u32 },
    /// Transient failure with attempts left.
    Retry {
        claim: ClaimToken,
        attempts: u32,
        next_run_at: DateTime<Utc>,
        error: String,
    },
    /// Attempts exhausted or a permanent failure.
    Fail {
        claim: ClaimToken,
        attempts: u32,
        error: String,
    },
    /// Operator requeue of a dead letter: opens a fresh attempt window.
    Requeue,
    /// Operator stop; advisory for a call already in flight.
    MarkFailed { reason: String },
}

impl QueueTransition {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Deliver { .. } => "deliver",
            Self::Retry { .. } => "retry",
            Self::Fail { .. } => "fail",
            Self::Requeue => "requeue",
            Self::MarkFailed { .. } => "mark_failed",
        }
    }

    /// States the transition may start from.
    pub fn allowed_from(&self) -> &'static [ActionStatus] {
        match self {
            Self::Deliver { .. } | Self::Retry { .. } | Self::Fail { .. } => {
                &[ActionStatus::Dispatching]
            }
            Self::Requeue => &[ActionStatus::Failed],
            Self::MarkFailed { .. } => &[
                ActionStatus::Queued,
                ActionStatus::Dispatching,
                ActionStatus::Retrying,
                ActionStatus::Failed,
            ],
        }
    }

    /// The claim a worker result answers; `None` for operator transitions.
    pub fn claim(&self) -> Option<&ClaimToken> {
        match self {
            Self::Deliver { claim, .. } | Self::Retry { claim, .. } | Self::Fail { claim, .. } => {
                Some(claim)
            }
            Self::Requeue | Self::MarkFailed { .. } => None,
        }
    }

    pub fn target(&self) -> ActionStatus {
        match self {
            Self::Deliver { .. } => ActionStatus::Delivered,
            Self::Retry { .. } => ActionStatus::Retrying,
            Self::Fail { .. } | Self::MarkFailed { .. } => ActionStatus::Failed,
            Self::Requeue => ActionStatus::Queued,
        }
    }

    /// Apply to `row` in place, or reject if the row is in the wrong state
    /// or, for a worker result, no longer held by the result's claim.
    pub fn apply(&self, row: &mut PendingAction, now: DateTime<Utc>) -> Result<(), StateError> {
        let claim_lost = self.claim().is_some_and(|claim| !claim.holds(row));
        if claim_lost || !self.allowed_from().contains(&row.status) {
            return Err(StateError::InvalidTransition {
                id: row.id.clone(),
                from: row.status,
                transition: self.name(),
            });
        }
        match self {
            Self::Deliver { attempts, .. } => {
                row.attempts = row.attempts.max(*attempts);
            }
            Self::Retry {
                attempts,
                next_run_at,
                error,
                ..
            } => {
                row.attempts = row.attempts.max(*attempts);
                row.next_run_at = *next_run_at;
                row.last_error = Some(error.clone());
            }
            Self::Fail { attempts, error, .. } => {
                row.attempts = row.attempts.max(*attempts);
                row.last_error = Some(error.clone());
            }
            Self::Requeue => {
                row.attempts = 0;
                row.next_run_at = now;
                row.last_error = None;
                row.generation += 1;
            }
            Self::MarkFailed { reason } => {
                row.last_error = Some(reason.clone());
            }
        }
        row.status = self.target();
        row.claimed_at = None;
        row.updated_at = now;
        Ok(())
    }
}

/// Release an abandoned claim: count the lost attempt and either schedule a
/// retry now or dead-letter the row when attempts are exhausted.
pub fn release_stale_claim(row: &mut PendingAction, now: DateTime<Utc>) {
    row.attempts = row.attempts.saturating_add(1).min(row.max_attempts);
    row.last_error = Some(STALE_CLAIM_ERROR.to_owned());
    row.status = if row.attempts >= row.max_attempts {
        ActionStatus::Failed
    } else {
        ActionStatus::Retrying
    };
    row.next_run_at = now;
    row.claimed_at = None;
    row.updated_at = now;
}

/// `last_error` recorded on rows released by [`release_stale_claim`].
pub const STALE_CLAIM_ERROR: &str = "claim expired: worker did not report a result";
