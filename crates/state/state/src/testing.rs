//! Conformance suites shared by every backend.
//!
//! Each backend calls these from its own tests with a fresh store. Tests run
//! sequentially against one store, so every test works in its own time
//! window, earlier than the previous one, and rows left behind by a test are
//! never due inside a later window.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use courier_core::{
    ActionId, ActionStatus, AutomationDefinition, AutomationId, Channel, ChannelMessage,
    EventPayload, IdempotencyKey, NewAction, PendingAction, TriggerDefinition, TriggerId,
};

use crate::error::StateError;
use crate::queue::{QueueFilter, QueueStore};
use crate::registry::AutomationRegistry;
use crate::transition::{ClaimToken, QueueTransition, STALE_CLAIM_ERROR};

/// Start of the time window for test number `slot`.
fn window(slot: i64) -> DateTime<Utc> {
    DateTime::<Utc>::UNIX_EPOCH + Duration::days(20_000 - slot * 30)
}

fn new_action(source: &str, key: &str, channel: Channel, not_before: DateTime<Utc>) -> NewAction {
    let recipient = match channel {
        Channel::Email => "conformance@example.com",
        Channel::Whatsapp | Channel::Sms => "+15550001111",
    };
    NewAction {
        event_source: source.to_owned(),
        event_type: "conformance".to_owned(),
        event_payload: EventPayload::new(ChannelMessage::inline(channel, recipient, None, "hello")),
        idempotency_key: IdempotencyKey::new(key),
        max_attempts: 3,
        not_before: Some(not_before),
    }
}

/// Token of the claim on `id` among the rows a `claim_next` call returned.
fn claim_of(claimed: &[PendingAction], id: &ActionId) -> ClaimToken {
    claimed
        .iter()
        .find(|a| &a.id == id)
        .and_then(ClaimToken::of)
        .expect("row should have been claimed")
}

fn deliver(claimed: &PendingAction) -> QueueTransition {
    QueueTransition::Deliver {
        claim: ClaimToken::of(claimed).expect("row should have been claimed"),
        attempts: claimed.attempts + 1,
    }
}

/// Unique suffix so the suite can run against a long-lived database.
fn run_id() -> String {
    Utc::now()
        .timestamp_nanos_opt()
        .unwrap_or_default()
        .to_string()
}

/// Run the full queue store conformance suite.
pub async fn run_queue_conformance_tests(store: &dyn QueueStore) -> Result<(), StateError> {
    let run = run_id();
    test_enqueue_and_get(store, &run).await?;
    test_duplicate_key(store, &run).await?;
    test_claim_order_and_due(store, &run).await?;
    test_claim_limit(store, &run).await?;
    test_retry_then_deliver(store, &run).await?;
    test_requeue_law(store, &run).await?;
    test_mark_failed_blocks_late_result(store, &run).await?;
    test_missing_row(store).await?;
    test_list_filters(store, &run).await?;
    test_reclaim_stale(store, &run).await?;
    test_result_after_reclaim_and_reclaim(store, &run).await?;
    Ok(())
}

async fn test_enqueue_and_get(store: &dyn QueueStore, run: &str) -> Result<(), StateError> {
    let t0 = window(0);
    let key = format!("enqueue-{run}");
    let created = store
        .enqueue(new_action("conf:enqueue", &key, Channel::Email, t0), t0)
        .await?;
    assert_eq!(created.status, ActionStatus::Queued);
    assert_eq!(created.attempts, 0);
    assert_eq!(created.generation, 0);
    assert_eq!(created.next_run_at, t0);

    let fetched = store.get(&created.id).await?.expect("row should exist");
    assert_eq!(fetched.id, created.id);
    assert_eq!(fetched.event_payload, created.event_payload);

    let by_key = store
        .get_by_idempotency_key(&IdempotencyKey::new(&key))
        .await?
        .expect("row should be found by key");
    assert_eq!(by_key.id, created.id);

    // Leave nothing due behind.
    let claimed = store.claim_next(10, t0).await?;
    let claim = claim_of(&claimed, &created.id);
    store
        .apply(&created.id, QueueTransition::Deliver { claim, attempts: 1 }, t0)
        .await?;
    Ok(())
}

async fn test_duplicate_key(store: &dyn QueueStore, run: &str) -> Result<(), StateError> {
    let t0 = window(1);
    let source = format!("conf:dup:{run}");
    let key = format!("dup-{run}");
    let first = store
        .enqueue(new_action(&source, &key, Channel::Sms, t0), t0)
        .await?;
    let second = store
        .enqueue(new_action(&source, &key, Channel::Sms, t0), t0)
        .await;
    match second {
        Err(StateError::DuplicateIdempotencyKey { key: k, existing }) => {
            assert_eq!(k.as_str(), key);
            assert_eq!(existing, first.id);
        }
        other => panic!("expected DuplicateIdempotencyKey, got {other:?}"),
    }

    let page = store
        .list(&QueueFilter {
            event_source: Some(source),
            ..QueueFilter::default()
        })
        .await?;
    assert_eq!(page.total, 1, "duplicate enqueue must not create a row");

    store
        .apply(
            &first.id,
            QueueTransition::MarkFailed {
                reason: "cleanup".into(),
            },
            t0,
        )
        .await?;
    Ok(())
}

async fn test_claim_order_and_due(store: &dyn QueueStore, run: &str) -> Result<(), StateError> {
    let t0 = window(2);
    let later = store
        .enqueue(
            new_action("conf:order", &format!("order-b-{run}"), Channel::Email, t0 + Duration::seconds(2)),
            t0,
        )
        .await?;
    let earlier = store
        .enqueue(
            new_action("conf:order", &format!("order-a-{run}"), Channel::Email, t0 + Duration::seconds(1)),
            t0 + Duration::milliseconds(1),
        )
        .await?;
    let future = store
        .enqueue(
            new_action("conf:order", &format!("order-c-{run}"), Channel::Email, t0 + Duration::hours(1)),
            t0,
        )
        .await?;

    let now = t0 + Duration::seconds(3);
    let claimed = store.claim_next(10, now).await?;
    let ids: Vec<_> = claimed.iter().map(|a| a.id.clone()).collect();
    assert_eq!(ids, vec![earlier.id.clone(), later.id.clone()], "claim order");
    for action in &claimed {
        assert_eq!(action.status, ActionStatus::Dispatching);
        assert_eq!(action.claimed_at, Some(now));
    }

    let again = store.claim_next(10, now).await?;
    assert!(again.is_empty(), "claimed rows must not be claimed twice");

    let untouched = store.get(&future.id).await?.expect("future row exists");
    assert_eq!(untouched.status, ActionStatus::Queued);

    for action in &claimed {
        store.apply(&action.id, deliver(action), now).await?;
    }
    store
        .apply(
            &future.id,
            QueueTransition::MarkFailed {
                reason: "cleanup".into(),
            },
            now,
        )
        .await?;
    Ok(())
}

async fn test_claim_limit(store: &dyn QueueStore, run: &str) -> Result<(), StateError> {
    let t0 = window(3);
    let mut ids = HashSet::new();
    for i in 0..3 {
        let row = store
            .enqueue(
                new_action("conf:limit", &format!("limit-{i}-{run}"), Channel::Sms, t0),
                t0 + Duration::milliseconds(i),
            )
            .await?;
        ids.insert(row.id);
    }
    let first = store.claim_next(2, t0).await?;
    assert_eq!(first.len(), 2);
    let second = store.claim_next(2, t0).await?;
    assert_eq!(second.len(), 1);

    let claimed: HashSet<_> = first.iter().chain(second.iter()).map(|a| a.id.clone()).collect();
    assert_eq!(claimed, ids);
    for action in first.iter().chain(second.iter()) {
        store.apply(&action.id, deliver(action), t0).await?;
    }
    Ok(())
}

async fn test_retry_then_deliver(store: &dyn QueueStore, run: &str) -> Result<(), StateError> {
    let t0 = window(4);
    let row = store
        .enqueue(new_action("conf:retry", &format!("retry-{run}"), Channel::Whatsapp, t0), t0)
        .await?;
    let first = store.claim_next(1, t0).await?;

    let retry_at = t0 + Duration::seconds(30);
    let retried = store
        .apply(
            &row.id,
            QueueTransition::Retry {
                claim: claim_of(&first, &row.id),
                attempts: 1,
                next_run_at: retry_at,
                error: "HTTP_500".into(),
            },
            t0,
        )
        .await?;
    assert_eq!(retried.status, ActionStatus::Retrying);
    assert_eq!(retried.attempts, 1);
    assert_eq!(retried.last_error.as_deref(), Some("HTTP_500"));
    assert_eq!(retried.claimed_at, None);

    assert!(store.claim_next(1, t0 + Duration::seconds(29)).await?.is_empty());
    let claimed = store.claim_next(1, retry_at).await?;
    assert_eq!(claimed.len(), 1);
    assert_eq!(claimed[0].attempts, 1);

    let delivered = store.apply(&row.id, deliver(&claimed[0]), retry_at).await?;
    assert_eq!(delivered.status, ActionStatus::Delivered);
    assert_eq!(delivered.attempts, 2);

    let err = store
        .apply(&row.id, QueueTransition::Requeue, retry_at)
        .await
        .expect_err("delivered rows cannot be requeued");
    assert!(err.is_invalid_transition());
    let err = store
        .apply(
            &row.id,
            QueueTransition::MarkFailed { reason: "x".into() },
            retry_at,
        )
        .await
        .expect_err("delivered rows cannot be failed");
    assert!(err.is_invalid_transition());
    Ok(())
}

async fn test_requeue_law(store: &dyn QueueStore, run: &str) -> Result<(), StateError> {
    let t0 = window(5);
    let row = store
        .enqueue(new_action("conf:requeue", &format!("requeue-{run}"), Channel::Email, t0), t0)
        .await?;

    let err = store
        .apply(&row.id, QueueTransition::Requeue, t0)
        .await
        .expect_err("queued rows cannot be requeued");
    assert!(err.is_invalid_transition());

    let first = store.claim_next(1, t0).await?;
    let failed = store
        .apply(
            &row.id,
            QueueTransition::Fail {
                claim: claim_of(&first, &row.id),
                attempts: 3,
                error: "exhausted".into(),
            },
            t0,
        )
        .await?;
    assert_eq!(failed.status, ActionStatus::Failed);
    assert_eq!(failed.attempts, 3);

    let later = t0 + Duration::minutes(5);
    let requeued = store.apply(&row.id, QueueTransition::Requeue, later).await?;
    assert_eq!(requeued.status, ActionStatus::Queued);
    assert_eq!(requeued.attempts, 0);
    assert_eq!(requeued.next_run_at, later);
    assert_eq!(requeued.last_error, None);
    assert_eq!(requeued.generation, 1);

    let claimed = store.claim_next(1, later).await?;
    assert_eq!(claimed.len(), 1);
    let delivered = store.apply(&row.id, deliver(&claimed[0]), later).await?;
    assert_eq!(delivered.status, ActionStatus::Delivered);
    assert_eq!(delivered.generation, 1);
    Ok(())
}

async fn test_mark_failed_blocks_late_result(
    store: &dyn QueueStore,
    run: &str,
) -> Result<(), StateError> {
    let t0 = window(6);
    let row = store
        .enqueue(new_action("conf:cancel", &format!("cancel-{run}"), Channel::Sms, t0), t0)
        .await?;
    let claimed = store.claim_next(1, t0).await?;

    let failed = store
        .apply(
            &row.id,
            QueueTransition::MarkFailed {
                reason: "operator stop".into(),
            },
            t0,
        )
        .await?;
    assert_eq!(failed.status, ActionStatus::Failed);
    assert_eq!(failed.last_error.as_deref(), Some("operator stop"));

    let err = store
        .apply(&row.id, deliver(&claimed[0]), t0)
        .await
        .expect_err("late result must be rejected");
    assert!(err.is_invalid_transition());
    let current = store.get(&row.id).await?.expect("row exists");
    assert_eq!(current.status, ActionStatus::Failed);
    Ok(())
}

async fn test_missing_row(store: &dyn QueueStore) -> Result<(), StateError> {
    let id = courier_core::ActionId::generate();
    assert!(store.get(&id).await?.is_none());
    let err = store
        .apply(&id, QueueTransition::Requeue, Utc::now())
        .await
        .expect_err("missing row");
    assert!(matches!(err, StateError::NotFound(_)), "got {err:?}");
    Ok(())
}

async fn test_list_filters(store: &dyn QueueStore, run: &str) -> Result<(), StateError> {
    let t0 = window(7);
    let source = format!("conf:list:{run}");
    let channels = [Channel::Email, Channel::Sms, Channel::Email, Channel::Sms, Channel::Email];
    let mut ids = Vec::new();
    for (i, channel) in channels.into_iter().enumerate() {
        let row = store
            .enqueue(new_action(&source, &format!("list-{i}-{run}"), channel, t0), t0)
            .await?;
        ids.push(row.id);
    }
    // Fail the first four, leave the last queued (but cancel it at the end).
    for (i, id) in ids.iter().take(4).enumerate() {
        let at = t0 + Duration::seconds(i64::try_from(i).unwrap_or_default());
        store
            .apply(
                id,
                QueueTransition::MarkFailed {
                    reason: format!("reason-{i}"),
                },
                at,
            )
            .await?;
    }

    let dead = store
        .list(&QueueFilter {
            event_source: Some(source.clone()),
            ..QueueFilter::dead_letters()
        })
        .await?;
    assert_eq!(dead.total, 4);
    assert_eq!(dead.actions.len(), 4);
    // Most recently updated first.
    assert_eq!(dead.actions[0].id, ids[3]);

    let email_dead = store
        .list(&QueueFilter {
            event_source: Some(source.clone()),
            channel: Some(Channel::Email),
            ..QueueFilter::dead_letters()
        })
        .await?;
    assert_eq!(email_dead.total, 2);

    let paged = store
        .list(&QueueFilter {
            event_source: Some(source.clone()),
            limit: Some(3),
            offset: Some(3),
            ..QueueFilter::dead_letters()
        })
        .await?;
    assert_eq!(paged.total, 4);
    assert_eq!(paged.actions.len(), 1);
    assert_eq!(paged.offset, 3);

    let all = store
        .list(&QueueFilter {
            event_source: Some(source),
            ..QueueFilter::default()
        })
        .await?;
    assert_eq!(all.total, 5);

    store
        .apply(
            &ids[4],
            QueueTransition::MarkFailed {
                reason: "cleanup".into(),
            },
            t0,
        )
        .await?;
    Ok(())
}

async fn test_reclaim_stale(store: &dyn QueueStore, run: &str) -> Result<(), StateError> {
    let t0 = window(8);
    let mut fresh = new_action("conf:reclaim", &format!("reclaim-a-{run}"), Channel::Email, t0);
    fresh.max_attempts = 3;
    let mut last_chance = new_action("conf:reclaim", &format!("reclaim-b-{run}"), Channel::Email, t0);
    last_chance.max_attempts = 1;
    let a = store.enqueue(fresh, t0).await?;
    let b = store.enqueue(last_chance, t0).await?;

    let claimed = store.claim_next(10, t0).await?;
    assert_eq!(claimed.len(), 2);

    // A cutoff before the claim releases nothing.
    assert!(
        store
            .reclaim_stale(t0 - Duration::seconds(1), t0)
            .await?
            .is_empty()
    );

    let now = t0 + Duration::minutes(10);
    let released = store.reclaim_stale(t0 + Duration::minutes(5), now).await?;
    assert_eq!(released.len(), 2);

    let a = store.get(&a.id).await?.expect("row exists");
    assert_eq!(a.status, ActionStatus::Retrying);
    assert_eq!(a.attempts, 1);
    assert_eq!(a.next_run_at, now);
    assert_eq!(a.last_error.as_deref(), Some(STALE_CLAIM_ERROR));

    let b = store.get(&b.id).await?.expect("row exists");
    assert_eq!(b.status, ActionStatus::Failed);
    assert_eq!(b.attempts, 1);

    // The dead worker's result now arrives and must be a no-op.
    let stale = claimed.iter().find(|c| c.id == a.id).expect("a was claimed");
    let err = store
        .apply(&a.id, deliver(stale), now)
        .await
        .expect_err("claim is gone");
    assert!(err.is_invalid_transition());

    store
        .apply(
            &a.id,
            QueueTransition::MarkFailed {
                reason: "cleanup".into(),
            },
            now,
        )
        .await?;
    Ok(())
}

async fn test_result_after_reclaim_and_reclaim(
    store: &dyn QueueStore,
    run: &str,
) -> Result<(), StateError> {
    let t0 = window(9);
    let row = store
        .enqueue(new_action("conf:reclaim2", &format!("reclaim2-{run}"), Channel::Sms, t0), t0)
        .await?;

    // Worker A claims and goes quiet.
    let first = store.claim_next(1, t0).await?;
    assert_eq!(first.len(), 1);

    let released_at = t0 + Duration::minutes(10);
    let released = store
        .reclaim_stale(t0 + Duration::minutes(5), released_at)
        .await?;
    assert_eq!(released.len(), 1);

    // Worker B claims the released row.
    let second = store.claim_next(1, released_at).await?;
    assert_eq!(second.len(), 1);
    assert_eq!(second[0].id, row.id);

    // A's result arrives while B holds the claim.
    let err = store
        .apply(&row.id, deliver(&first[0]), released_at)
        .await
        .expect_err("result for a replaced claim must be rejected");
    assert!(err.is_invalid_transition());
    let current = store.get(&row.id).await?.expect("row exists");
    assert_eq!(current.status, ActionStatus::Dispatching);
    assert_eq!(current.claimed_at, second[0].claimed_at);

    // B's own result is still accepted.
    let delivered = store.apply(&row.id, deliver(&second[0]), released_at).await?;
    assert_eq!(delivered.status, ActionStatus::Delivered);
    assert_eq!(delivered.attempts, 2);
    Ok(())
}

/// Race `workers` concurrent claimers against `rows` due rows and check that
/// every row is claimed exactly once.
pub async fn run_concurrent_claim_test(
    store: Arc<dyn QueueStore>,
    rows: usize,
    workers: usize,
) -> Result<(), StateError> {
    let t0 = window(50);
    let run = run_id();
    let mut expected = HashSet::new();
    for i in 0..rows {
        let row = store
            .enqueue(
                new_action("conf:race", &format!("race-{i}-{run}"), Channel::Sms, t0),
                t0,
            )
            .await?;
        expected.insert(row.id);
    }

    let mut handles = Vec::with_capacity(workers);
    for _ in 0..workers {
        let store = Arc::clone(&store);
        handles.push(tokio::spawn(async move {
            let mut mine = Vec::new();
            loop {
                let batch = store.claim_next(2, t0).await?;
                if batch.is_empty() {
                    break;
                }
                mine.extend(batch);
                tokio::task::yield_now().await;
            }
            Ok::<_, StateError>(mine)
        }));
    }

    let mut seen = HashSet::new();
    let mut won = Vec::new();
    for handle in handles {
        let rows = handle
            .await
            .map_err(|e| StateError::Backend(format!("claim task panicked: {e}")))??;
        for row in rows {
            assert!(seen.insert(row.id.clone()), "action {} claimed twice", row.id);
            won.push(row);
        }
    }
    assert_eq!(seen, expected, "every due row must be claimed exactly once");

    for row in &won {
        store.apply(&row.id, deliver(row), t0).await?;
    }
    Ok(())
}

/// Run the automation registry conformance suite.
pub async fn run_registry_conformance_tests(
    registry: &dyn AutomationRegistry,
) -> Result<(), StateError> {
    let run = run_id();
    let id = AutomationId::new(format!("auto-{run}"));
    assert!(registry.get_automation(&id).await?.is_none());
    assert!(!registry.record_delivery(&id, Utc::now()).await?);

    let mut automation = AutomationDefinition::new(id.clone(), "welcome", Channel::Email);
    automation.segment_id = Some("new-buyers".into());
    registry.put_automation(automation.clone()).await?;
    assert_eq!(registry.get_automation(&id).await?, Some(automation.clone()));

    let at = DateTime::<Utc>::UNIX_EPOCH + Duration::days(19_000);
    assert!(registry.record_delivery(&id, at).await?);
    assert!(registry.record_delivery(&id, at + Duration::seconds(1)).await?);
    let stored = registry.get_automation(&id).await?.expect("automation exists");
    assert_eq!(stored.execution_count, 2);
    assert_eq!(stored.last_executed_at, Some(at + Duration::seconds(1)));

    // Editing the definition keeps it retrievable.
    let mut edited = stored.clone();
    edited.is_active = false;
    registry.put_automation(edited).await?;
    let stored = registry.get_automation(&id).await?.expect("automation exists");
    assert!(!stored.is_active);
    assert!(
        registry
            .list_automations()
            .await?
            .iter()
            .any(|a| a.id == id)
    );

    let trigger_id = TriggerId::new(format!("trigger-{run}"));
    assert!(!registry.mark_trigger_fired(&trigger_id, at).await?);
    let trigger = TriggerDefinition::manual(trigger_id.clone(), id.clone());
    registry.put_trigger(trigger.clone()).await?;
    assert_eq!(registry.get_trigger(&trigger_id).await?, Some(trigger));
    assert!(registry.mark_trigger_fired(&trigger_id, at).await?);
    let fired = registry.get_trigger(&trigger_id).await?.expect("trigger exists");
    assert_eq!(fired.last_fired_at, Some(at));
    assert!(
        registry
            .list_triggers()
            .await?
            .iter()
            .any(|t| t.id == trigger_id)
    );
    Ok(())
}
