use axum::Json;
use axum::extract::{Path, Query, State};
use serde::Deserialize;

use courier_audit::PerformanceSummary;
use courier_core::AutomationId;

use crate::error::ServerError;

use super::AppState;

#[derive(Debug, Deserialize)]
pub struct PerformanceQuery {
    #[serde(default = "default_window_days")]
    pub window_days: u32,
}

fn default_window_days() -> u32 {
    30
}

/// `GET /v1/automations/{id}/performance?window_days=`
pub async fn performance(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<PerformanceQuery>,
) -> Result<Json<PerformanceSummary>, ServerError> {
    if query.window_days == 0 {
        return Err(ServerError::BadRequest("window_days must be at least 1".into()));
    }
    let summary = state
        .gateway
        .logger()
        .performance(&AutomationId::new(id), query.window_days)
        .await?;
    Ok(Json(summary))
}
