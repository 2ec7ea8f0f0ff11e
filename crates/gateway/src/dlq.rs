use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::info;

use courier_core::{ActionId, ActionStatus, PendingAction};
use courier_state::{QueueFilter, QueuePage, QueueStore, QueueTransition};

use crate::csv::write_record;
use crate::error::GatewayError;
use crate::logger::AutomationLogger;

/// Operator view of `failed` actions.
#[derive(Clone)]
pub struct DeadLetterManager {
    queue: Arc<dyn QueueStore>,
    logger: AutomationLogger,
}

impl std::fmt::Debug for DeadLetterManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeadLetterManager").finish_non_exhaustive()
    }
}

impl DeadLetterManager {
    pub fn new(queue: Arc<dyn QueueStore>, logger: AutomationLogger) -> Self {
        Self { queue, logger }
    }

    /// One page of dead letters. Any status filter in `filter` is replaced.
    pub async fn list(&self, filter: &QueueFilter) -> Result<QueuePage, GatewayError> {
        let mut filter = filter.clone();
        filter.statuses = vec![ActionStatus::Failed];
        Ok(self.queue.list(&filter).await?)
    }

    /// Move a dead letter back to `queued` with a fresh attempt window.
    pub async fn requeue(&self, id: &ActionId) -> Result<PendingAction, GatewayError> {
        let row = self
            .queue
            .apply(id, QueueTransition::Requeue, Utc::now())
            .await?;
        info!(action_id = %id, generation = row.generation, "dead letter requeued");
        Ok(row)
    }

    /// Stop an action that has not been delivered.
    ///
    /// This is advisory for a call already in flight: its result will be
    /// rejected as late when it arrives.
    pub async fn mark_permanently_failed(
        &self,
        id: &ActionId,
        reason: &str,
    ) -> Result<PendingAction, GatewayError> {
        let now = Utc::now();
        let row = self
            .queue
            .apply(
                id,
                QueueTransition::MarkFailed {
                    reason: reason.to_owned(),
                },
                now,
            )
            .await?;
        info!(action_id = %id, reason, "action marked permanently failed");
        self.logger
            .log_failure(
                &row.log_id(),
                row.attempts.saturating_sub(1),
                format!("OPERATOR: {reason}"),
                now,
            )
            .await;
        Ok(row)
    }

    /// Snapshot of every dead letter matching `filter`, across all pages.
    pub async fn export(&self, filter: &QueueFilter) -> Result<DeadLetterExport, GatewayError> {
        let mut page_filter = filter.clone();
        page_filter.statuses = vec![ActionStatus::Failed];
        page_filter.limit = Some(1000);
        page_filter.offset = Some(0);

        let mut rows = Vec::new();
        loop {
            let page = self.queue.list(&page_filter).await?;
            let fetched = page.actions.len();
            rows.extend(page.actions.iter().map(DeadLetterRow::from));
            if fetched == 0 || rows.len() as u64 >= page.total {
                break;
            }
            page_filter.offset = Some(page.offset + fetched);
        }
        Ok(DeadLetterExport {
            generated_at: Utc::now(),
            rows,
        })
    }
}

/// One dead letter, flattened for export.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeadLetterRow {
    pub id: ActionId,
    pub channel: String,
    pub recipients: String,
    pub event_source: String,
    pub event_type: String,
    pub idempotency_key: String,
    pub attempts: u32,
    pub max_attempts: u32,
    pub generation: u32,
    pub last_error: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&PendingAction> for DeadLetterRow {
    fn from(action: &PendingAction) -> Self {
        Self {
            id: action.id.clone(),
            channel: action.channel().to_string(),
            recipients: action.event_payload.message.recipients().join(" "),
            event_source: action.event_source.clone(),
            event_type: action.event_type.clone(),
            idempotency_key: action.idempotency_key.to_string(),
            attempts: action.attempts,
            max_attempts: action.max_attempts,
            generation: action.generation,
            last_error: action.last_error.clone().unwrap_or_default(),
            created_at: action.created_at,
            updated_at: action.updated_at,
        }
    }
}

/// A tabular snapshot of dead letters.
#[derive(Debug, Clone, Serialize)]
pub struct DeadLetterExport {
    pub generated_at: DateTime<Utc>,
    pub rows: Vec<DeadLetterRow>,
}

impl DeadLetterExport {
    const HEADER: [&'static str; 12] = [
        "id",
        "channel",
        "recipients",
        "event_source",
        "event_type",
        "idempotency_key",
        "attempts",
        "max_attempts",
        "generation",
        "last_error",
        "created_at",
        "updated_at",
    ];

    /// Render as RFC 4180 CSV with a header line.
    pub fn to_csv(&self) -> String {
        let mut out = String::new();
        write_record(&mut out, &Self::HEADER);
        for row in &self.rows {
            write_record(
                &mut out,
                &[
                    row.id.to_string(),
                    row.channel.clone(),
                    row.recipients.clone(),
                    row.event_source.clone(),
                    row.event_type.clone(),
                    row.idempotency_key.clone(),
                    row.attempts.to_string(),
                    row.max_attempts.to_string(),
                    row.generation.to_string(),
                    row.last_error.clone(),
                    row.created_at.to_rfc3339(),
                    row.updated_at.to_rfc3339(),
                ],
            );
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use courier_audit_memory::MemoryLogStore;
    use courier_core::{Channel, ChannelMessage, EventPayload, IdempotencyKey, NewAction};
    use courier_state::ClaimToken;
    use courier_state_memory::MemoryQueueStore;

    use crate::metrics::GatewayMetrics;

    struct Fixture {
        queue: Arc<MemoryQueueStore>,
        logs: Arc<MemoryLogStore>,
        dlq: DeadLetterManager,
    }

    fn fixture() -> Fixture {
        let queue = Arc::new(MemoryQueueStore::new());
        let logs = Arc::new(MemoryLogStore::new());
        let logger = AutomationLogger::new(logs.clone(), Arc::new(GatewayMetrics::default()));
        let dlq = DeadLetterManager::new(queue.clone(), logger);
        Fixture { queue, logs, dlq }
    }

    async fn failed_action(queue: &MemoryQueueStore, key: &str, error: &str) -> PendingAction {
        let now = Utc::now();
        let row = queue
            .enqueue(
                NewAction {
                    event_source: "manual".into(),
                    event_type: "send".into(),
                    event_payload: EventPayload::new(ChannelMessage::inline(
                        Channel::Email,
                        "buyer@example.com",
                        Some("Hi".into()),
                        "Hello",
                    )),
                    idempotency_key: IdempotencyKey::new(key),
                    max_attempts: 3,
                    not_before: None,
                },
                now,
            )
            .await
            .unwrap();
        let claimed = queue.claim_next(10, now).await.unwrap();
        queue
            .apply(
                &row.id,
                QueueTransition::Fail {
                    claim: ClaimToken::of(&claimed[0]).unwrap(),
                    attempts: 3,
                    error: error.into(),
                },
                now,
            )
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn requeue_opens_a_new_window() {
        let f = fixture();
        let row = failed_action(&f.queue, "k1", "HTTP_500: boom").await;
        let requeued = f.dlq.requeue(&row.id).await.unwrap();
        assert_eq!(requeued.status, ActionStatus::Queued);
        assert_eq!(requeued.attempts, 0);
        assert_eq!(requeued.generation, 1);
        assert!(requeued.last_error.is_none());

        let again = f.dlq.requeue(&row.id).await.unwrap_err();
        assert!(again.is_invalid_transition());
    }

    #[tokio::test]
    async fn mark_failed_rejects_delivered_rows() {
        let f = fixture();
        let now = Utc::now();
        let row = failed_action(&f.queue, "k2", "x").await;
        f.dlq.requeue(&row.id).await.unwrap();
        let claimed = f
            .queue
            .claim_next(10, now + chrono::Duration::seconds(1))
            .await
            .unwrap();
        let claim = ClaimToken::of(&claimed[0]).unwrap();
        f.queue
            .apply(&row.id, QueueTransition::Deliver { claim, attempts: 1 }, now)
            .await
            .unwrap();

        let err = f
            .dlq
            .mark_permanently_failed(&row.id, "stop")
            .await
            .unwrap_err();
        assert!(err.is_invalid_transition());
    }

    #[tokio::test]
    async fn mark_failed_closes_the_log_row() {
        let f = fixture();
        let now = Utc::now();
        let row = f
            .queue
            .enqueue(
                NewAction {
                    event_source: "manual".into(),
                    event_type: "send".into(),
                    event_payload: EventPayload::new(ChannelMessage::inline(
                        Channel::Sms,
                        "+15550001111",
                        None,
                        "Hello",
                    )),
                    idempotency_key: IdempotencyKey::new("k3"),
                    max_attempts: 3,
                    not_before: None,
                },
                now,
            )
            .await
            .unwrap();
        f.dlq.logger.log_start(&row, "Hello".into(), now).await;

        let failed = f.dlq.mark_permanently_failed(&row.id, "wrong audience").await.unwrap();
        assert_eq!(failed.status, ActionStatus::Failed);
        assert_eq!(failed.last_error.as_deref(), Some("wrong audience"));

        let log = courier_audit::LogStore::get(f.logs.as_ref(), &row.log_id())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(log.status, courier_audit::LogStatus::Failed);
        assert_eq!(log.error_message.as_deref(), Some("OPERATOR: wrong audience"));
    }

    #[tokio::test]
    async fn list_and_export_only_dead_letters() {
        let f = fixture();
        failed_action(&f.queue, "k4", "HTTP_400: bad, \"recipient\"").await;
        failed_action(&f.queue, "k5", "HTTP_500").await;

        let page = f
            .dlq
            .list(&QueueFilter {
                statuses: vec![ActionStatus::Queued],
                limit: Some(1),
                ..QueueFilter::default()
            })
            .await
            .unwrap();
        assert_eq!(page.total, 2);
        assert_eq!(page.actions.len(), 1);

        let export = f.dlq.export(&QueueFilter::default()).await.unwrap();
        assert_eq!(export.rows.len(), 2);
        let csv = export.to_csv();
        let mut lines = csv.split("\r\n");
        assert!(lines.next().unwrap().starts_with("id,channel,recipients"));
        assert!(csv.contains("\"HTTP_400: bad, \"\"recipient\"\"\""));
    }
}
