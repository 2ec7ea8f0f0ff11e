use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::Serialize;
use tracing::{debug, error, info, instrument, warn};

use courier_audit::Severity;
use courier_core::{ActionStatus, ChannelMessage, PendingAction};
use courier_executor::{
    AttemptOutcome, Decision, FailureClass, PREVIEW_CHARS, decide, render_request, truncate_chars,
};
use courier_state::{ClaimToken, QueueTransition, STALE_CLAIM_ERROR};

use crate::error::GatewayError;
use crate::gateway::Gateway;

/// Counts from one dispatch pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DispatchReport {
    pub claimed: usize,
    pub delivered: usize,
    pub retried: usize,
    pub failed: usize,
    /// Results rejected because the row had already left `dispatching`.
    pub late: usize,
    /// Results that could not be written to the queue.
    pub errors: usize,
}

impl DispatchReport {
    fn record(&mut self, step: Step) {
        match step {
            Step::Delivered => self.delivered += 1,
            Step::Retried => self.retried += 1,
            Step::Failed => self.failed += 1,
            Step::Late => self.late += 1,
            Step::Error => self.errors += 1,
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Step {
    Delivered,
    Retried,
    Failed,
    Late,
    Error,
}

impl Gateway {
    /// Claim and dispatch one batch of due actions.
    pub async fn dispatch_due(&self) -> Result<DispatchReport, GatewayError> {
        self.dispatch_due_at(Utc::now()).await
    }

    /// Claim the rows due at `now` and dispatch them concurrently.
    ///
    /// Each channel's calls are still bounded by its executor pool.
    #[instrument(skip(self))]
    pub async fn dispatch_due_at(
        &self,
        now: DateTime<Utc>,
    ) -> Result<DispatchReport, GatewayError> {
        let batch = self.executor.config().claim_batch_size;
        let claimed = self.queue.claim_next(batch, now).await?;
        let mut report = DispatchReport {
            claimed: claimed.len(),
            ..DispatchReport::default()
        };
        if claimed.is_empty() {
            return Ok(report);
        }
        self.metrics.add_claimed(claimed.len() as u64);
        debug!(claimed = claimed.len(), "claimed due actions");

        let steps = join_all(claimed.iter().map(|action| self.dispatch_one(action, now))).await;
        for step in steps {
            report.record(step);
        }
        Ok(report)
    }

    async fn dispatch_one(&self, action: &PendingAction, now: DateTime<Utc>) -> Step {
        let Some(claim) = ClaimToken::of(action) else {
            error!(action_id = %action.id, "claimed action carries no claim time");
            return Step::Error;
        };
        let message = &action.event_payload.message;
        let outcome = match render_request(message, &action.idempotency_key) {
            Ok(rendered) => {
                self.logger.log_start(action, rendered.preview, now).await;
                match self.providers.get(action.channel()) {
                    Some(provider) => {
                        self.executor
                            .attempt(&rendered.request, provider.as_ref())
                            .await
                            .outcome
                    }
                    None => AttemptOutcome::Failed {
                        class: FailureClass::Transient,
                        code: "NO_PROVIDER".into(),
                        message: format!("no function registered for {}", action.channel()),
                        http_status: None,
                    },
                }
            }
            Err(e) => {
                self.logger.log_start(action, raw_preview(message), now).await;
                AttemptOutcome::from(e)
            }
        };

        let decided_at = Utc::now().max(now);
        let decision = decide(
            action,
            &outcome,
            &self.executor.config().retry_strategy,
            decided_at,
        );
        let transition = match &decision {
            Decision::Deliver { attempts, .. } => QueueTransition::Deliver {
                claim,
                attempts: *attempts,
            },
            Decision::Retry {
                attempts,
                next_run_at,
                error,
            } => QueueTransition::Retry {
                claim,
                attempts: *attempts,
                next_run_at: *next_run_at,
                error: error.clone(),
            },
            Decision::Fail {
                attempts, error, ..
            } => QueueTransition::Fail {
                claim,
                attempts: *attempts,
                error: error.clone(),
            },
        };

        match self.queue.apply(&action.id, transition, decided_at).await {
            Ok(row) => self.record_decision(&row, decision, decided_at).await,
            Err(e) if e.is_invalid_transition() => {
                self.metrics.increment_late_results();
                info!(action_id = %action.id, error = %e, "late result ignored");
                Step::Late
            }
            Err(e) => {
                error!(action_id = %action.id, error = %e, "failed to record dispatch result");
                self.logger
                    .log_system_error(
                        "dispatcher:apply",
                        format!("action {}: {e}", action.id),
                        Severity::Error,
                    )
                    .await;
                Step::Error
            }
        }
    }

    async fn record_decision(
        &self,
        row: &PendingAction,
        decision: Decision,
        now: DateTime<Utc>,
    ) -> Step {
        let log_id = row.log_id();
        match decision {
            Decision::Deliver {
                attempts,
                external_id,
            } => {
                self.metrics.increment_delivered();
                info!(
                    action_id = %row.id,
                    channel = %row.channel(),
                    attempts,
                    external_id = external_id.as_deref().unwrap_or_default(),
                    "action delivered"
                );
                self.logger
                    .log_success(&log_id, attempts.saturating_sub(1), external_id, now)
                    .await;
                self.count_delivery(row, now).await;
                Step::Delivered
            }
            Decision::Retry {
                attempts,
                next_run_at,
                error,
            } => {
                self.metrics.increment_retried();
                debug!(
                    action_id = %row.id,
                    attempts,
                    %next_run_at,
                    error = %error,
                    "action scheduled for retry"
                );
                self.logger.log_retry(&log_id, attempts, error, now).await;
                Step::Retried
            }
            Decision::Fail {
                attempts,
                error,
                class,
            } => {
                self.metrics.increment_failed();
                warn!(
                    action_id = %row.id,
                    channel = %row.channel(),
                    attempts,
                    %class,
                    error = %error,
                    "action dead-lettered"
                );
                self.logger
                    .log_failure(&log_id, attempts.saturating_sub(1), error, now)
                    .await;
                Step::Failed
            }
        }
    }

    async fn count_delivery(&self, row: &PendingAction, now: DateTime<Utc>) {
        let Some(automation_id) = &row.event_payload.automation_id else {
            return;
        };
        match self.registry.record_delivery(automation_id, now).await {
            Ok(true) => {}
            Ok(false) => warn!(%automation_id, "delivered action names an unknown automation"),
            Err(e) => {
                self.logger
                    .log_system_error(
                        "dispatcher:record_delivery",
                        format!("automation {automation_id}: {e}"),
                        Severity::Error,
                    )
                    .await;
            }
        }
    }

    /// Release claims older than the executor's `claim_timeout`.
    ///
    /// Returns how many rows were released.
    pub async fn reclaim_stale_claims(&self, now: DateTime<Utc>) -> Result<usize, GatewayError> {
        let timeout = chrono::Duration::from_std(self.executor.config().claim_timeout)
            .unwrap_or(chrono::Duration::MAX);
        let cutoff = now
            .checked_sub_signed(timeout)
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        let released = self.queue.reclaim_stale(cutoff, now).await?;
        if released.is_empty() {
            return Ok(0);
        }
        self.metrics.add_stale_reclaimed(released.len() as u64);

        for row in &released {
            warn!(
                action_id = %row.id,
                attempts = row.attempts,
                status = %row.status,
                "released abandoned claim"
            );
            let log_id = row.log_id();
            if row.status == ActionStatus::Failed {
                self.metrics.increment_failed();
                self.logger
                    .log_failure(&log_id, row.attempts.saturating_sub(1), STALE_CLAIM_ERROR, now)
                    .await;
            } else {
                self.logger
                    .log_retry(&log_id, row.attempts, STALE_CLAIM_ERROR, now)
                    .await;
            }
        }
        Ok(released.len())
    }
}

/// Log preview for a message that could not be rendered.
fn raw_preview(message: &ChannelMessage) -> String {
    let text = match (message.body(), message.template_id()) {
        (Some(body), _) => body.to_owned(),
        (None, Some(template_id)) => format!("template:{template_id}"),
        (None, None) => String::new(),
    };
    truncate_chars(&text, PREVIEW_CHARS)
}
