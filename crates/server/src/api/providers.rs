use axum::Json;
use axum::extract::State;

use courier_core::ProviderHealthRecord;
use courier_gateway::{DispatchResult, HealthSnapshot, TestSend};

use crate::error::ServerError;

use super::AppState;

/// `GET /v1/providers/health` -- latest probe per channel and raised alerts.
pub async fn health(State(state): State<AppState>) -> Json<HealthSnapshot> {
    Json(state.gateway.prober().snapshot())
}

/// `POST /v1/providers/health/probe` -- probe every channel now.
pub async fn probe(State(state): State<AppState>) -> Json<Vec<ProviderHealthRecord>> {
    Json(state.gateway.prober().probe_all().await)
}

/// `POST /v1/providers/test` -- one-off send outside the queue.
pub async fn test_send(
    State(state): State<AppState>,
    Json(send): Json<TestSend>,
) -> Result<Json<DispatchResult>, ServerError> {
    let result = state.gateway.harness().send_test(&send).await?;
    Ok(Json(result))
}
