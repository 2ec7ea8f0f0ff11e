use axum::Json;
use axum::extract::{Query, State};
use axum::response::Response;
use chrono::{DateTime, Utc};
use serde::Deserialize;

use courier_audit::{AutomationLogEntry, LogPage, LogQuery};
use courier_gateway::log_entries_to_csv;

use crate::error::ServerError;

use super::{AppState, csv_response};

/// `GET /v1/logs` -- filter by `automation_id`, `channel`, `status`, `from`,
/// `to`, `limit` and `offset`.
pub async fn query(
    State(state): State<AppState>,
    Query(query): Query<LogQuery>,
) -> Result<Json<LogPage>, ServerError> {
    let page = state.gateway.logger().query(&query).await?;
    Ok(Json(page))
}

/// `GET /v1/logs/export` -- every matching row as CSV, ignoring paging.
pub async fn export(
    State(state): State<AppState>,
    Query(query): Query<LogQuery>,
) -> Result<Response, ServerError> {
    let entries = state.gateway.logger().query_all(&query).await?;
    let filename = format!("automation-logs-{}.csv", Utc::now().format("%Y%m%dT%H%M%SZ"));
    Ok(csv_response(&filename, log_entries_to_csv(&entries)))
}

/// A provider delivery callback.
#[derive(Debug, Deserialize)]
pub struct DeliveryStatusRequest {
    pub external_id: String,
    pub delivered_at: Option<DateTime<Utc>>,
    pub read_at: Option<DateTime<Utc>>,
}

/// `POST /v1/logs/delivery-status`
pub async fn delivery_status(
    State(state): State<AppState>,
    Json(body): Json<DeliveryStatusRequest>,
) -> Result<Json<AutomationLogEntry>, ServerError> {
    if body.delivered_at.is_none() && body.read_at.is_none() {
        return Err(ServerError::BadRequest(
            "delivered_at or read_at is required".into(),
        ));
    }
    state
        .gateway
        .logger()
        .log_delivery_status(&body.external_id, body.delivered_at, body.read_at, Utc::now())
        .await
        .map(Json)
        .ok_or_else(|| ServerError::NotFound(format!("log row for message {}", body.external_id)))
}
