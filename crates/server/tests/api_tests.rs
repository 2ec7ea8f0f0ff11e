use std::sync::Arc;

use axum::body::Body;
use axum::http::{self, Request, StatusCode};
use serde_json::{Value, json};
use tower::ServiceExt;

use courier_audit_memory::MemoryLogStore;
use courier_core::{AutomationDefinition, Channel, TriggerDefinition};
use courier_gateway::GatewayBuilder;
use courier_provider::LogFunction;
use courier_server::api::{AppState, router};
use courier_state::AutomationRegistry;
use courier_state_memory::{MemoryQueueStore, MemoryRegistry};

// -- Helpers --------------------------------------------------------------

async fn build_test_state() -> AppState {
    let registry = Arc::new(MemoryRegistry::new());
    registry
        .put_automation(AutomationDefinition::new(
            "welcome",
            "Welcome email",
            Channel::Email,
        ))
        .await
        .unwrap();
    registry
        .put_trigger(TriggerDefinition::manual("welcome-manual", "welcome"))
        .await
        .unwrap();
    let mut paused = TriggerDefinition::manual("paused", "welcome");
    paused.is_active = false;
    registry.put_trigger(paused).await.unwrap();

    let gateway = GatewayBuilder::new()
        .queue(Arc::new(MemoryQueueStore::new()))
        .registry(registry)
        .logs(Arc::new(MemoryLogStore::new()))
        .provider(Arc::new(LogFunction::new("send-email", Channel::Email)))
        .build()
        .expect("gateway should build");
    AppState {
        gateway: Arc::new(gateway),
    }
}

async fn send(
    state: &AppState,
    method: http::Method,
    uri: &str,
    body: Option<Value>,
) -> (StatusCode, Vec<u8>, Option<String>) {
    let mut request = Request::builder().method(method).uri(uri);
    let body = match body {
        Some(value) => {
            request = request.header(http::header::CONTENT_TYPE, "application/json");
            Body::from(serde_json::to_vec(&value).unwrap())
        }
        None => Body::empty(),
    };
    let response = router(state.clone())
        .oneshot(request.body(body).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let content_type = response
        .headers()
        .get(http::header::CONTENT_TYPE)
        .map(|v| v.to_str().unwrap().to_owned());
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, bytes.to_vec(), content_type)
}

async fn send_json(
    state: &AppState,
    method: http::Method,
    uri: &str,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let (status, bytes, _) = send(state, method, uri, body).await;
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

fn email(key: &str) -> Value {
    json!({
        "payload": {
            "automation_id": "welcome",
            "message": {
                "channel": "email",
                "to": "buyer@example.com",
                "subject": "Welcome",
                "body": "Hello {{ first_name }}",
                "template_params": {"first_name": "Ada"}
            }
        },
        "idempotency_key": key
    })
}

async fn enqueue(state: &AppState, key: &str) -> String {
    let (status, body) =
        send_json(state, http::Method::POST, "/v1/actions", Some(email(key))).await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    body["id"].as_str().unwrap().to_owned()
}

// -- Tests ----------------------------------------------------------------

#[tokio::test]
async fn health_reports_channels_and_metrics() {
    let state = build_test_state().await;
    let (status, body) = send_json(&state, http::Method::GET, "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["channels"], json!(["email"]));
    assert_eq!(body["metrics"]["enqueued"], 0);
}

#[tokio::test]
async fn enqueue_is_idempotent() {
    let state = build_test_state().await;
    let (status, first) =
        send_json(&state, http::Method::POST, "/v1/actions", Some(email("order-1"))).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(first["status"], "scheduled");

    let (status, second) =
        send_json(&state, http::Method::POST, "/v1/actions", Some(email("order-1"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(second["status"], "already_scheduled");
    assert_eq!(second["id"], first["id"]);

    let uri = format!("/v1/actions/{}", first["id"].as_str().unwrap());
    let (status, action) = send_json(&state, http::Method::GET, &uri, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(action["status"], "queued");
    assert_eq!(action["event_source"], "manual");
}

#[tokio::test]
async fn invalid_payloads_are_rejected() {
    let state = build_test_state().await;
    let mut body = email("bad-1");
    body["payload"]["message"]["to"] = json!("not-an-address");
    let (status, error) = send_json(&state, http::Method::POST, "/v1/actions", Some(body)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(error["error"].as_str().unwrap().contains("not-an-address"));

    let (status, _) = send_json(
        &state,
        http::Method::POST,
        "/v1/actions",
        Some(email("health:probe")),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let mut wrong_channel = email("sms-1");
    wrong_channel["payload"]["message"] =
        json!({"channel": "sms", "to": "+15550001111", "body": "hi"});
    let (status, _) =
        send_json(&state, http::Method::POST, "/v1/actions", Some(wrong_channel)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn unknown_action_is_not_found() {
    let state = build_test_state().await;
    let (status, body) = send_json(&state, http::Method::GET, "/v1/actions/missing", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["error"].as_str().unwrap().contains("missing"));
}

#[tokio::test]
async fn dead_letter_lifecycle() {
    let state = build_test_state().await;
    let id = enqueue(&state, "dlq-1").await;

    let (status, _) = send_json(
        &state,
        http::Method::POST,
        &format!("/v1/dlq/{id}/fail"),
        Some(json!({"reason": "  "})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, row) = send_json(
        &state,
        http::Method::POST,
        &format!("/v1/dlq/{id}/fail"),
        Some(json!({"reason": "customer asked to stop"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(row["status"], "failed");

    let (status, page) = send_json(&state, http::Method::GET, "/v1/dlq?channel=email", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(page["total"], 1);
    assert_eq!(page["actions"][0]["id"], id.as_str());

    let (status, bytes, content_type) =
        send(&state, http::Method::GET, "/v1/dlq/export", None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(content_type.unwrap().starts_with("text/csv"));
    let csv = String::from_utf8(bytes).unwrap();
    assert!(csv.starts_with("id,"));
    assert!(csv.contains(&id));
    assert!(csv.contains("customer asked to stop"));

    let (status, row) =
        send_json(&state, http::Method::POST, &format!("/v1/dlq/{id}/requeue"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(row["status"], "queued");
    assert_eq!(row["generation"], 1);

    // Only dead letters can be requeued.
    let (status, _) =
        send_json(&state, http::Method::POST, &format!("/v1/dlq/{id}/requeue"), None).await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn delivered_action_shows_up_in_logs() {
    let state = build_test_state().await;
    let id = enqueue(&state, "logs-1").await;
    let report = state.gateway.dispatch_due().await.unwrap();
    assert_eq!(report.delivered, 1);

    let (_, action) =
        send_json(&state, http::Method::GET, &format!("/v1/actions/{id}"), None).await;
    assert_eq!(action["status"], "delivered");

    let (status, page) = send_json(
        &state,
        http::Method::GET,
        "/v1/logs?automation_id=welcome&status=success&limit=10",
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(page["total"], 1);
    let entry = &page["entries"][0];
    assert_eq!(entry["channel"], "email");
    assert_eq!(entry["recipient_info"], "buyer@example.com");
    let external_id = entry["external_id"].as_str().unwrap().to_owned();

    let (status, bytes, content_type) =
        send(&state, http::Method::GET, "/v1/logs/export?channel=email", None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(content_type.unwrap().starts_with("text/csv"));
    let csv = String::from_utf8(bytes).unwrap();
    assert_eq!(csv.lines().count(), 2);
    assert!(csv.contains(&external_id));

    let (status, entry) = send_json(
        &state,
        http::Method::POST,
        "/v1/logs/delivery-status",
        Some(json!({"external_id": external_id, "delivered_at": "2026-01-01T00:00:00Z"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(entry["delivered_at"], "2026-01-01T00:00:00Z");

    let (status, summary) = send_json(
        &state,
        http::Method::GET,
        "/v1/automations/welcome/performance?window_days=7",
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(summary["total"], 1);
    assert_eq!(summary["success"], 1);
    assert_eq!(summary["window_days"], 7);

    // A delivered action cannot be requeued.
    let (status, _) =
        send_json(&state, http::Method::POST, &format!("/v1/dlq/{id}/requeue"), None).await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn delivery_status_for_unknown_message_is_not_found() {
    let state = build_test_state().await;
    let (status, _) = send_json(
        &state,
        http::Method::POST,
        "/v1/logs/delivery-status",
        Some(json!({"external_id": "nope", "read_at": "2026-01-01T00:00:00Z"})),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send_json(
        &state,
        http::Method::POST,
        "/v1/logs/delivery-status",
        Some(json!({"external_id": "nope"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn triggers_fire_through_the_api() {
    let state = build_test_state().await;
    let fire = json!({
        "message": {"channel": "email", "to": "buyer@example.com", "body": "Hi"},
        "idempotency_key": "fire-1"
    });
    let (status, body) = send_json(
        &state,
        http::Method::POST,
        "/v1/triggers/welcome-manual/fire",
        Some(fire.clone()),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["status"], "scheduled");

    let (status, _) = send_json(
        &state,
        http::Method::POST,
        "/v1/triggers/paused/fire",
        Some(fire.clone()),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

    let (status, _) =
        send_json(&state, http::Method::POST, "/v1/triggers/missing/fire", Some(fire)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn provider_test_send_and_probe() {
    let state = build_test_state().await;
    let (status, result) = send_json(
        &state,
        http::Method::POST,
        "/v1/providers/test",
        Some(json!({
            "channel": "email",
            "recipient": "ops@example.com",
            "content": {"type": "body", "subject": "Test", "body": "ping"}
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(result["ok"], true);
    assert_eq!(result["classification"], "delivered");

    let (status, _) = send_json(
        &state,
        http::Method::POST,
        "/v1/providers/test",
        Some(json!({
            "channel": "sms",
            "recipient": "+15550001111",
            "content": {"type": "body", "body": "ping"}
        })),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

    // Test sends do not touch the queue.
    let (_, health) = send_json(&state, http::Method::GET, "/health", None).await;
    assert_eq!(health["metrics"]["enqueued"], 0);
    assert_eq!(health["metrics"]["test_sends"], 1);

    let (status, records) =
        send_json(&state, http::Method::POST, "/v1/providers/health/probe", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(records.as_array().unwrap().len(), 1);
    assert_eq!(records[0]["ok"], true);

    let (status, snapshot) =
        send_json(&state, http::Method::GET, "/v1/providers/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(snapshot["records"][0]["channel"], "email");
    assert_eq!(snapshot["alerts"], json!([]));
}

#[tokio::test]
async fn system_errors_can_be_listed_and_resolved() {
    let state = build_test_state().await;
    state
        .gateway
        .logger()
        .log_system_error("test", "something broke", courier_audit::Severity::Error)
        .await;

    let (status, records) =
        send_json(&state, http::Method::GET, "/v1/system-errors?resolved=false", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(records.as_array().unwrap().len(), 1);
    let id = records[0]["id"].as_str().unwrap().to_owned();

    let (status, body) = send_json(
        &state,
        http::Method::POST,
        &format!("/v1/system-errors/{id}/resolve"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["resolved"], true);

    let (_, open) =
        send_json(&state, http::Method::GET, "/v1/system-errors?resolved=false", None).await;
    assert_eq!(open, json!([]));

    let (status, _) = send_json(
        &state,
        http::Method::POST,
        "/v1/system-errors/missing/resolve",
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
