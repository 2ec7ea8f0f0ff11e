//! Conformance suite shared by every log store backend.

use chrono::{DateTime, Duration, Utc};
use courier_core::{AutomationId, Channel};

use crate::entry::{LogStatus, NewLogEntry};
use crate::error::AuditError;
use crate::query::LogQuery;
use crate::store::LogStore;
use crate::system_error::{Severity, SystemErrorQuery, SystemErrorRecord};
use crate::transition::{LogTransition, LogUpdate};

fn base_time() -> DateTime<Utc> {
    DateTime::<Utc>::UNIX_EPOCH + Duration::days(20_000)
}

/// Unique suffix so the suite can run against a long-lived database.
fn run_id() -> String {
    Utc::now()
        .timestamp_nanos_opt()
        .unwrap_or_default()
        .to_string()
}

fn start(id: &str, automation: &AutomationId, channel: Channel) -> LogTransition {
    LogTransition::Start(NewLogEntry {
        id: id.to_owned(),
        automation_id: Some(automation.clone()),
        profile_id: Some("profile-1".into()),
        channel,
        message_content: "Welcome aboard".into(),
        recipient_info: "buyer@example.com".into(),
        metadata: serde_json::json!({ "event_source": "conformance" }),
    })
}

/// Run the full log store conformance suite.
pub async fn run_log_store_conformance_tests(store: &dyn LogStore) -> Result<(), AuditError> {
    let run = run_id();
    test_lifecycle(store, &run).await?;
    test_delivery_status(store, &run).await?;
    test_query(store, &run).await?;
    test_performance(store, &run).await?;
    test_system_errors(store, &run).await?;
    Ok(())
}

async fn test_lifecycle(store: &dyn LogStore, run: &str) -> Result<(), AuditError> {
    let t0 = base_time();
    let automation = AutomationId::new(format!("life-{run}"));
    let id = format!("life-{run}#0");

    let inserted = store.update(&id, start(&id, &automation, Channel::Email), t0).await?;
    let LogUpdate::Inserted(entry) = inserted else {
        panic!("first start must insert, got {inserted:?}");
    };
    assert_eq!(entry.status, LogStatus::Pending);
    assert_eq!(store.get(&id).await?, Some(entry));

    let retry = LogTransition::Retry {
        retry_count: 1,
        error: "HTTP_500: upstream".into(),
    };
    store.update(&id, retry.clone(), t0).await?;
    // Re-running the same write changes nothing.
    assert!(!store.update(&id, retry, t0).await?.is_write());

    let again = store.update(&id, start(&id, &automation, Channel::Email), t0).await?;
    assert!(!again.is_write(), "start on a retrying row is a no-op");

    let success = store
        .update(
            &id,
            LogTransition::Success {
                external_id: Some(format!("msg-{run}")),
                retry_count: 1,
            },
            t0 + Duration::seconds(10),
        )
        .await?;
    assert!(success.is_write());

    let late = store
        .update(
            &id,
            LogTransition::Failure {
                error: "late".into(),
                retry_count: 4,
            },
            t0 + Duration::seconds(20),
        )
        .await?;
    assert!(!late.is_write(), "terminal row must not move");

    let stored = store.get(&id).await?.expect("row exists");
    assert_eq!(stored.status, LogStatus::Success);
    assert_eq!(stored.retry_count, 1);
    assert_eq!(stored.external_id, Some(format!("msg-{run}")));
    assert_eq!(stored.updated_at, t0 + Duration::seconds(10));

    let missing = store
        .update(
            &format!("missing-{run}#0"),
            LogTransition::Retry {
                retry_count: 1,
                error: "x".into(),
            },
            t0,
        )
        .await?;
    assert_eq!(missing, LogUpdate::Unchanged(None));
    Ok(())
}

async fn test_delivery_status(store: &dyn LogStore, run: &str) -> Result<(), AuditError> {
    let t0 = base_time();
    let automation = AutomationId::new(format!("cb-{run}"));
    let id = format!("cb-{run}#0");
    let external = format!("ext-{run}");
    store.update(&id, start(&id, &automation, Channel::Sms), t0).await?;
    store
        .update(
            &id,
            LogTransition::Success {
                external_id: Some(external.clone()),
                retry_count: 0,
            },
            t0,
        )
        .await?;

    let found = store
        .find_by_external_id(&external)
        .await?
        .expect("row found by external id");
    assert_eq!(found.id, id);
    assert!(store.find_by_external_id(&format!("nope-{run}")).await?.is_none());

    let delivered = t0 + Duration::seconds(30);
    store
        .update(
            &id,
            LogTransition::DeliveryStatus {
                delivered_at: Some(delivered),
                read_at: None,
            },
            delivered,
        )
        .await?;
    store
        .update(
            &id,
            LogTransition::DeliveryStatus {
                delivered_at: None,
                read_at: Some(delivered + Duration::minutes(1)),
            },
            delivered,
        )
        .await?;
    let stored = store.get(&id).await?.expect("row exists");
    assert_eq!(stored.status, LogStatus::Success);
    assert_eq!(stored.delivered_at, Some(delivered));
    assert_eq!(stored.read_at, Some(delivered + Duration::minutes(1)));
    Ok(())
}

async fn test_query(store: &dyn LogStore, run: &str) -> Result<(), AuditError> {
    let t0 = base_time();
    let automation = AutomationId::new(format!("query-{run}"));
    for (i, channel) in [Channel::Email, Channel::Sms, Channel::Email]
        .into_iter()
        .enumerate()
    {
        let id = format!("query-{run}-{i}#0");
        let at = t0 + Duration::seconds(i64::try_from(i).unwrap_or_default());
        store.update(&id, start(&id, &automation, channel), at).await?;
    }
    store
        .update(
            &format!("query-{run}-2#0"),
            LogTransition::Failure {
                error: "HTTP_400".into(),
                retry_count: 0,
            },
            t0,
        )
        .await?;

    let page = store
        .query(&LogQuery {
            automation_id: Some(automation.clone()),
            limit: Some(2),
            ..LogQuery::default()
        })
        .await?;
    assert_eq!(page.total, 3);
    assert_eq!(page.entries.len(), 2);
    assert_eq!(page.entries[0].id, format!("query-{run}-2#0"), "newest first");
    assert_eq!(page.entries[1].id, format!("query-{run}-1#0"));

    let second = store
        .query(&LogQuery {
            automation_id: Some(automation.clone()),
            limit: Some(2),
            offset: Some(2),
            ..LogQuery::default()
        })
        .await?;
    assert_eq!(second.entries.len(), 1);
    assert_eq!(second.entries[0].id, format!("query-{run}-0#0"));

    let email = store
        .query(&LogQuery {
            automation_id: Some(automation.clone()),
            channel: Some(Channel::Email),
            ..LogQuery::default()
        })
        .await?;
    assert_eq!(email.total, 2);

    let failed = store
        .query(&LogQuery {
            automation_id: Some(automation.clone()),
            status: Some(LogStatus::Failed),
            ..LogQuery::default()
        })
        .await?;
    assert_eq!(failed.total, 1);

    let windowed = store
        .query(&LogQuery {
            automation_id: Some(automation),
            from: Some(t0 + Duration::seconds(1)),
            to: Some(t0 + Duration::seconds(1)),
            ..LogQuery::default()
        })
        .await?;
    assert_eq!(windowed.total, 1);
    Ok(())
}

async fn test_performance(store: &dyn LogStore, run: &str) -> Result<(), AuditError> {
    let now = base_time();
    let automation = AutomationId::new(format!("perf-{run}"));
    let outcomes = [
        (0, Some(true)),
        (1, Some(true)),
        (2, Some(true)),
        (3, Some(false)),
        (4, None),
    ];
    for (i, outcome) in outcomes {
        let id = format!("perf-{run}-{i}#0");
        let at = now - Duration::days(1);
        store.update(&id, start(&id, &automation, Channel::Email), at).await?;
        let transition = match outcome {
            Some(true) => LogTransition::Success {
                external_id: None,
                retry_count: 0,
            },
            Some(false) => LogTransition::Failure {
                error: "HTTP_400".into(),
                retry_count: 0,
            },
            None => LogTransition::Retry {
                retry_count: 1,
                error: "HTTP_503".into(),
            },
        };
        store.update(&id, transition, at).await?;
    }
    // Outside a seven day window.
    let old = format!("perf-{run}-old#0");
    store
        .update(&old, start(&old, &automation, Channel::Email), now - Duration::days(10))
        .await?;

    let summary = store.performance(&automation, 7, now).await?;
    assert_eq!(summary.total, 5);
    assert_eq!(summary.success, 3);
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.pending, 1);
    assert!((summary.success_rate - 60.0).abs() < 1e-9);
    assert!((summary.failure_rate - 20.0).abs() < 1e-9);

    let wide = store.performance(&automation, 30, now).await?;
    assert_eq!(wide.total, 6);
    assert_eq!(wide.pending, 2);

    let empty = store
        .performance(&AutomationId::new(format!("none-{run}")), 7, now)
        .await?;
    assert_eq!(empty.total, 0);
    assert!(empty.success_rate.abs() < f64::EPSILON);
    Ok(())
}

async fn test_system_errors(store: &dyn LogStore, run: &str) -> Result<(), AuditError> {
    let t0 = base_time();
    let warning = SystemErrorRecord::new(
        format!("health:{run}"),
        "connection refused",
        Severity::Warning,
        t0,
    );
    let critical = SystemErrorRecord::new(
        format!("alert:{run}"),
        "sms unhealthy for 3 probes",
        Severity::Critical,
        t0 + Duration::seconds(1),
    )
    .with_stack("probe -> call -> timeout");
    store.record_system_error(warning.clone()).await?;
    store.record_system_error(critical.clone()).await?;

    let open = store
        .list_system_errors(&SystemErrorQuery {
            resolved: Some(false),
            ..SystemErrorQuery::default()
        })
        .await?;
    assert!(open.iter().any(|e| e.id == warning.id));
    assert!(open.contains(&critical));

    let severe = store
        .list_system_errors(&SystemErrorQuery {
            min_severity: Some(Severity::Error),
            ..SystemErrorQuery::default()
        })
        .await?;
    assert!(severe.iter().any(|e| e.id == critical.id));
    assert!(severe.iter().all(|e| e.severity >= Severity::Error));

    assert!(store.resolve_system_error(&warning.id).await?);
    assert!(!store.resolve_system_error(&format!("missing-{run}")).await?);
    let resolved = store
        .list_system_errors(&SystemErrorQuery {
            resolved: Some(true),
            ..SystemErrorQuery::default()
        })
        .await?;
    assert!(resolved.iter().any(|e| e.id == warning.id && e.resolved));
    Ok(())
}
