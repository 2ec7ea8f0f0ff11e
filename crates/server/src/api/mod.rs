pub mod actions;
pub mod automations;
pub mod dlq;
pub mod health;
pub mod logs;
pub mod providers;
pub mod schemas;
pub mod system_errors;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use courier_gateway::Gateway;

/// Shared application state passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    /// The gateway instance. Workers hold their own clone.
    pub gateway: Arc<Gateway>,
}

/// Build the Axum router with all operator routes.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health))
        // Queue
        .route("/v1/actions", post(actions::enqueue))
        .route("/v1/actions/{id}", get(actions::get_action))
        .route("/v1/triggers/{id}/fire", post(actions::fire_trigger))
        // Dead letters
        .route("/v1/dlq", get(dlq::list))
        .route("/v1/dlq/export", get(dlq::export))
        .route("/v1/dlq/{id}/requeue", post(dlq::requeue))
        .route("/v1/dlq/{id}/fail", post(dlq::mark_failed))
        // Automation logs
        .route("/v1/logs", get(logs::query))
        .route("/v1/logs/export", get(logs::export))
        .route("/v1/logs/delivery-status", post(logs::delivery_status))
        .route(
            "/v1/automations/{id}/performance",
            get(automations::performance),
        )
        // Send functions
        .route("/v1/providers/health", get(providers::health))
        .route("/v1/providers/health/probe", post(providers::probe))
        .route("/v1/providers/test", post(providers::test_send))
        // System errors
        .route("/v1/system-errors", get(system_errors::list))
        .route(
            "/v1/system-errors/{id}/resolve",
            post(system_errors::resolve),
        )
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// Attach a `text/csv` body as a download named `filename`.
pub(crate) fn csv_response(filename: &str, body: String) -> axum::response::Response {
    use axum::http::header;
    use axum::response::IntoResponse;

    (
        [
            (header::CONTENT_TYPE, "text/csv; charset=utf-8".to_owned()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{filename}\""),
            ),
        ],
        body,
    )
        .into_response()
}
