use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;

use courier_core::{ActionId, PendingAction, TriggerId};
use courier_gateway::{EnqueueOutcome, EnqueueRequest, FireTrigger};

use crate::error::ServerError;

use super::AppState;
use super::schemas::EnqueueResponse;

fn enqueue_response(outcome: &EnqueueOutcome) -> (StatusCode, Json<EnqueueResponse>) {
    let status = if outcome.is_scheduled() {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    (status, Json(EnqueueResponse::from(outcome)))
}

/// `POST /v1/actions` -- schedule a message.
///
/// Returns 201 for a new action and 200 when the idempotency key is already
/// scheduled.
pub async fn enqueue(
    State(state): State<AppState>,
    Json(request): Json<EnqueueRequest>,
) -> Result<impl IntoResponse, ServerError> {
    let outcome = state.gateway.enqueue(request).await?;
    Ok(enqueue_response(&outcome))
}

/// `GET /v1/actions/{id}`
pub async fn get_action(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<PendingAction>, ServerError> {
    let action = state.gateway.get_action(&ActionId::new(id)).await?;
    Ok(Json(action))
}

/// `POST /v1/triggers/{id}/fire`
pub async fn fire_trigger(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(fire): Json<FireTrigger>,
) -> Result<impl IntoResponse, ServerError> {
    let outcome = state
        .gateway
        .fire_trigger(&TriggerId::new(id), fire)
        .await?;
    Ok(enqueue_response(&outcome))
}
