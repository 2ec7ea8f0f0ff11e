//! Operator actions racing the dispatcher: requeue, manual failure, test
//! sends and trigger fires.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use courier_audit::{LogQuery, LogStatus};
use courier_core::{
    ActionStatus, AutomationDefinition, Channel, ChannelMessage, EventPayload, TriggerDefinition,
    TriggerId,
};
use courier_gateway::{EnqueueOutcome, EnqueueRequest, FireTrigger, GatewayError, TestContent, TestSend};
use courier_simulation::prelude::*;
use courier_state::{AutomationRegistry, QueueFilter, QueueStore};

fn sms(body: &str) -> ChannelMessage {
    ChannelMessage::inline(Channel::Sms, "+15550001111", None, body)
}

#[tokio::test]
async fn enqueue_is_idempotent_per_key() {
    let harness = SimulationHarness::builder()
        .provider(ScriptedProvider::new(Channel::Sms))
        .build()
        .await
        .unwrap();
    let first = harness
        .enqueue(EnqueueRequest::new(EventPayload::new(sms("a"))).with_key("order-7"))
        .await
        .unwrap();
    let EnqueueOutcome::Scheduled(row) = first else {
        panic!("first enqueue should schedule");
    };

    // A different body under the same key is still the same action.
    let second = harness
        .enqueue(EnqueueRequest::new(EventPayload::new(sms("b"))).with_key("order-7"))
        .await
        .unwrap();
    assert_eq!(second, EnqueueOutcome::AlreadyScheduled(row.id.clone()));

    harness.dispatch_at(Utc::now()).await.unwrap();
    let third = harness
        .enqueue(EnqueueRequest::new(EventPayload::new(sms("c"))).with_key("order-7"))
        .await
        .unwrap();
    assert!(!third.is_scheduled());
    harness.provider(Channel::Sms).unwrap().assert_called(1);
    assert_eq!(harness.gateway().metrics().snapshot().duplicates, 2);
}

#[tokio::test]
async fn requeue_opens_a_fresh_attempt_window() {
    let harness = SimulationHarness::builder()
        .provider(
            ScriptedProvider::new(Channel::Sms)
                .then(failed_reply(400, "bad number"))
                .then(ok_reply("sms-2")),
        )
        .build()
        .await
        .unwrap();
    let row = harness.send(sms("hello"), "requeue-1").await.unwrap();
    harness.dispatch_at(Utc::now()).await.unwrap();
    let failed = harness.action(&row.id).await.unwrap();
    failed.assert_dead_lettered(1);

    let requeued = harness.gateway().dlq().requeue(&row.id).await.unwrap();
    assert_eq!(requeued.status, ActionStatus::Queued);
    assert_eq!(requeued.attempts, 0);
    assert_eq!(requeued.generation, failed.generation + 1);

    harness.dispatch_at(Utc::now()).await.unwrap();
    let delivered = harness.action(&row.id).await.unwrap();
    delivered.assert_delivered();
    assert_eq!(delivered.attempts, 1);

    // The first window keeps its failure; the second has its own row.
    let old = harness.log_for(&failed).await.unwrap();
    LogAssertions::assert_failed_with(old.as_ref(), "bad number");
    let new = harness.log_for(&delivered).await.unwrap();
    LogAssertions::assert_success(new.as_ref());
    assert_ne!(failed.log_id(), delivered.log_id());

    let err = harness.gateway().dlq().requeue(&row.id).await.unwrap_err();
    match err {
        GatewayError::State(e) => assert!(e.is_invalid_transition()),
        other => panic!("expected an invalid transition, got {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn result_after_operator_failure_is_ignored() {
    let harness = SimulationHarness::builder()
        .provider(
            ScriptedProvider::new(Channel::Sms)
                .with_delay(Duration::from_secs(2))
                .then(ok_reply("sms-late")),
        )
        .automation(AutomationDefinition::new("otp", "One-time code", Channel::Sms))
        .build()
        .await
        .unwrap();
    let row = harness.send_for("otp", sms("1234"), "late-1").await.unwrap();

    let gateway = Arc::clone(harness.gateway());
    let pass = tokio::spawn(async move { gateway.dispatch_due_at(Utc::now()).await });

    tokio::time::sleep(Duration::from_millis(100)).await;
    let in_flight = harness.action(&row.id).await.unwrap();
    in_flight.assert_status(ActionStatus::Dispatching);
    harness
        .gateway()
        .dlq()
        .mark_permanently_failed(&row.id, "customer unsubscribed")
        .await
        .unwrap();

    let report = pass.await.unwrap().unwrap();
    assert_eq!(report.late, 1);
    assert_eq!(report.delivered, 0);
    harness.provider(Channel::Sms).unwrap().assert_called(1);

    let row = harness.action(&row.id).await.unwrap();
    row.assert_status(ActionStatus::Failed);
    let log = harness.log_for(&row).await.unwrap();
    LogAssertions::assert_failed_with(log.as_ref(), "OPERATOR: customer unsubscribed");
    assert!(log.unwrap().external_id.is_none());

    assert_eq!(harness.automation("otp").await.unwrap().execution_count, 0);
    assert_eq!(harness.gateway().metrics().snapshot().late_results, 1);
}

#[tokio::test]
async fn test_sends_leave_no_trace_in_the_pipeline() {
    let harness = SimulationHarness::builder()
        .provider(ScriptedProvider::new(Channel::Email).then(ok_reply("em-test")))
        .automation(AutomationDefinition::new("welcome", "Welcome email", Channel::Email))
        .build()
        .await
        .unwrap();

    let send = TestSend {
        channel: Channel::Email,
        recipient: "ops@example.com".into(),
        content: TestContent::Body {
            subject: Some("Test".into()),
            body: "Does this arrive?".into(),
        },
    };
    let result = harness.gateway().harness().send_test(&send).await.unwrap();
    assert!(result.ok);
    assert_eq!(result.classification, "delivered");
    assert_eq!(result.external_id.as_deref(), Some("em-test"));

    let provider = harness.provider(Channel::Email).unwrap();
    provider.assert_called(1);
    assert!(provider.calls()[0].request.idempotency_key.as_str().starts_with("test:"));

    assert_eq!(harness.pending().await.unwrap(), 0);
    let all = harness.queue().list(&QueueFilter::default()).await.unwrap();
    assert_eq!(all.total, 0);
    let logs = harness.logs().query(&LogQuery::default()).await.unwrap();
    assert_eq!(logs.total, 0);
    assert_eq!(harness.automation("welcome").await.unwrap().execution_count, 0);
    assert_eq!(harness.gateway().metrics().snapshot().test_sends, 1);
}

#[tokio::test]
async fn test_send_reports_permanent_rejections() {
    let harness = SimulationHarness::builder()
        .provider(ScriptedProvider::new(Channel::Sms).then(failed_reply(422, "unknown recipient")))
        .build()
        .await
        .unwrap();
    let send = TestSend {
        channel: Channel::Sms,
        recipient: "+15550001111".into(),
        content: TestContent::Body {
            subject: None,
            body: "ping".into(),
        },
    };
    let result = harness.gateway().harness().send_test(&send).await.unwrap();
    assert!(!result.ok);
    assert_eq!(result.classification, "permanent");
    assert_eq!(result.http_status, Some(422));
    assert!(result.request_id.is_some());

    let missing = TestSend {
        channel: Channel::Whatsapp,
        ..send
    };
    assert!(matches!(
        harness.gateway().harness().send_test(&missing).await,
        Err(GatewayError::NoProvider(Channel::Whatsapp))
    ));
}

#[tokio::test]
async fn fired_trigger_is_delivered_and_stamped() {
    let harness = SimulationHarness::builder()
        .provider(ScriptedProvider::new(Channel::Sms))
        .automation(AutomationDefinition::new("otp", "One-time code", Channel::Sms))
        .trigger(TriggerDefinition::manual("otp-manual", "otp"))
        .build()
        .await
        .unwrap();

    let trigger_id = TriggerId::new("otp-manual");
    let outcome = harness
        .gateway()
        .fire_trigger(
            &trigger_id,
            FireTrigger {
                message: sms("5678"),
                profile_id: Some("profile-9".into()),
                idempotency_key: None,
            },
        )
        .await
        .unwrap();
    let EnqueueOutcome::Scheduled(row) = outcome else {
        panic!("trigger fire should schedule");
    };
    assert_eq!(row.event_source, "trigger:otp-manual");
    assert_eq!(row.event_type, "manual");

    harness.dispatch_at(Utc::now()).await.unwrap();
    let row = harness.action(&row.id).await.unwrap();
    row.assert_delivered();
    let log = harness.log_for(&row).await.unwrap().unwrap();
    assert_eq!(log.status, LogStatus::Success);
    assert_eq!(log.profile_id.as_deref(), Some("profile-9"));

    assert_eq!(harness.automation("otp").await.unwrap().execution_count, 1);
    let trigger = harness
        .registry()
        .get_trigger(&trigger_id)
        .await
        .unwrap()
        .unwrap();
    assert!(trigger.last_fired_at.is_some());
}

#[tokio::test]
async fn inactive_trigger_is_rejected() {
    let mut trigger = TriggerDefinition::manual("paused", "otp");
    trigger.is_active = false;
    let harness = SimulationHarness::builder()
        .provider(ScriptedProvider::new(Channel::Sms))
        .automation(AutomationDefinition::new("otp", "One-time code", Channel::Sms))
        .trigger(trigger)
        .build()
        .await
        .unwrap();
    let fire = FireTrigger {
        message: sms("x"),
        profile_id: None,
        idempotency_key: None,
    };
    let err = harness
        .gateway()
        .fire_trigger(&TriggerId::new("paused"), fire)
        .await
        .unwrap_err();
    assert!(matches!(err, GatewayError::Inactive(_)));
    assert_eq!(harness.pending().await.unwrap(), 0);
}
