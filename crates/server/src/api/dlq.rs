use axum::Json;
use axum::extract::{Path, Query, State};
use axum::response::Response;
use serde::Deserialize;

use courier_core::{ActionId, Channel, PendingAction};
use courier_state::{QueueFilter, QueuePage};

use crate::error::ServerError;

use super::schemas::FailRequest;
use super::{AppState, csv_response};

/// Query parameters for listing and exporting dead letters.
#[derive(Debug, Default, Deserialize)]
pub struct DlqQuery {
    pub channel: Option<Channel>,
    pub event_source: Option<String>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

impl From<DlqQuery> for QueueFilter {
    fn from(query: DlqQuery) -> Self {
        Self {
            channel: query.channel,
            event_source: query.event_source,
            limit: query.limit,
            offset: query.offset,
            ..QueueFilter::dead_letters()
        }
    }
}

/// `GET /v1/dlq`
pub async fn list(
    State(state): State<AppState>,
    Query(query): Query<DlqQuery>,
) -> Result<Json<QueuePage>, ServerError> {
    let page = state.gateway.dlq().list(&query.into()).await?;
    Ok(Json(page))
}

/// `GET /v1/dlq/export` -- every matching dead letter as CSV.
pub async fn export(
    State(state): State<AppState>,
    Query(query): Query<DlqQuery>,
) -> Result<Response, ServerError> {
    let export = state.gateway.dlq().export(&query.into()).await?;
    let filename = format!("dead-letters-{}.csv", export.generated_at.format("%Y%m%dT%H%M%SZ"));
    Ok(csv_response(&filename, export.to_csv()))
}

/// `POST /v1/dlq/{id}/requeue`
pub async fn requeue(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<PendingAction>, ServerError> {
    let row = state.gateway.dlq().requeue(&ActionId::new(id)).await?;
    Ok(Json(row))
}

/// `POST /v1/dlq/{id}/fail`
pub async fn mark_failed(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<FailRequest>,
) -> Result<Json<PendingAction>, ServerError> {
    let reason = body.reason.trim();
    if reason.is_empty() {
        return Err(ServerError::BadRequest("reason must not be empty".into()));
    }
    let row = state
        .gateway
        .dlq()
        .mark_permanently_failed(&ActionId::new(id), reason)
        .await?;
    Ok(Json(row))
}
