use chrono::{DateTime, Utc};
use courier_core::PendingAction;

use crate::classify::{AttemptOutcome, FailureClass};
use crate::retry::RetryStrategy;

/// What the queue should do with a claimed action after one attempt.
///
/// `attempts` is the absolute count after this attempt; it is always
/// `action.attempts + 1`, capped at `max_attempts`.
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    Deliver {
        attempts: u32,
        external_id: Option<String>,
    },
    Retry {
        attempts: u32,
        next_run_at: DateTime<Utc>,
        error: String,
    },
    Fail {
        attempts: u32,
        error: String,
        class: FailureClass,
    },
}

impl Decision {
    pub fn attempts(&self) -> u32 {
        match self {
            Self::Deliver { attempts, .. }
            | Self::Retry { attempts, .. }
            | Self::Fail { attempts, .. } => *attempts,
        }
    }
}

/// Decide the next state of `action` given the outcome of its attempt.
///
/// Transient failures retry while `attempts < max_attempts`, scheduled
/// `backoff(attempts)` after `now`. Permanent failures fail immediately.
pub fn decide(
    action: &PendingAction,
    outcome: &AttemptOutcome,
    strategy: &RetryStrategy,
    now: DateTime<Utc>,
) -> Decision {
    let attempts = action.attempts.saturating_add(1).min(action.max_attempts.max(1));
    match outcome {
        AttemptOutcome::Delivered { external_id, .. } => Decision::Deliver {
            attempts,
            external_id: external_id.clone(),
        },
        AttemptOutcome::Failed { class, .. } => {
            let error = outcome.error_text().unwrap_or_default();
            if *class == FailureClass::Transient && attempts < action.max_attempts {
                let delay = strategy.delay_for(attempts);
                let delay = chrono::Duration::from_std(delay).unwrap_or(chrono::Duration::MAX);
                Decision::Retry {
                    attempts,
                    next_run_at: now.checked_add_signed(delay).unwrap_or(DateTime::<Utc>::MAX_UTC),
                    error,
                }
            } else {
                Decision::Fail {
                    attempts,
                    error,
                    class: *class,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use courier_core::{Channel, ChannelMessage, EventPayload, IdempotencyKey, NewAction};
    use std::time::Duration;

    fn action(attempts: u32, max_attempts: u32) -> PendingAction {
        let mut row = NewAction {
            event_source: "manual".into(),
            event_type: "test".into(),
            event_payload: EventPayload::new(ChannelMessage::inline(
                Channel::Email,
                "a@example.com",
                None,
                "hi",
            )),
            idempotency_key: IdempotencyKey::new("k"),
            max_attempts,
            not_before: None,
        }
        .into_pending(Utc::now());
        row.attempts = attempts;
        row
    }

    fn transient() -> AttemptOutcome {
        AttemptOutcome::Failed {
            class: FailureClass::Transient,
            code: "HTTP_500".into(),
            message: "provider returned status 500".into(),
            http_status: Some(500),
        }
    }

    fn strategy() -> RetryStrategy {
        RetryStrategy::Exponential {
            base: Duration::from_secs(1),
            max: Duration::from_secs(3600),
            multiplier: 2.0,
            jitter: false,
        }
    }

    #[test]
    fn delivered_counts_the_attempt() {
        let outcome = AttemptOutcome::Delivered {
            status: 200,
            external_id: Some("m".into()),
            body: serde_json::Value::Null,
        };
        let decision = decide(&action(2, 5), &outcome, &strategy(), Utc::now());
        assert_eq!(
            decision,
            Decision::Deliver {
                attempts: 3,
                external_id: Some("m".into())
            }
        );
    }

    #[test]
    fn transient_retries_with_backoff() {
        let now = Utc::now();
        let decision = decide(&action(0, 5), &transient(), &strategy(), now);
        match decision {
            Decision::Retry {
                attempts,
                next_run_at,
                error,
            } => {
                assert_eq!(attempts, 1);
                assert_eq!(next_run_at, now + chrono::Duration::seconds(2));
                assert_eq!(error, "HTTP_500: provider returned status 500");
            }
            other => panic!("expected retry, got {other:?}"),
        }
    }

    #[test]
    fn transient_fails_when_attempts_exhausted() {
        let decision = decide(&action(4, 5), &transient(), &strategy(), Utc::now());
        assert!(matches!(decision, Decision::Fail { attempts: 5, .. }));
    }

    #[test]
    fn permanent_fails_immediately() {
        let outcome = AttemptOutcome::permanent("HTTP_422", "unknown recipient");
        let decision = decide(&action(0, 5), &outcome, &strategy(), Utc::now());
        assert!(matches!(
            decision,
            Decision::Fail {
                attempts: 1,
                class: FailureClass::Permanent,
                ..
            }
        ));
    }

    #[test]
    fn attempts_never_exceed_max() {
        for max in 1..6 {
            let mut row = action(0, max);
            loop {
                let decision = decide(&row, &transient(), &strategy(), Utc::now());
                assert!(decision.attempts() <= max);
                row.attempts = decision.attempts();
                if matches!(decision, Decision::Fail { .. }) {
                    assert_eq!(row.attempts, max);
                    break;
                }
            }
        }
    }

    #[test]
    fn later_attempts_are_scheduled_later() {
        let now = Utc::now();
        let mut previous = None;
        for attempts in 0..4 {
            let Decision::Retry { next_run_at, .. } =
                decide(&action(attempts, 10), &transient(), &strategy(), now)
            else {
                panic!("expected retry");
            };
            if let Some(prev) = previous {
                assert!(next_run_at > prev);
            }
            previous = Some(next_run_at);
        }
    }
}
