use axum::Json;
use axum::extract::{Path, Query, State};

use courier_audit::{SystemErrorQuery, SystemErrorRecord};

use crate::error::ServerError;

use super::AppState;
use super::schemas::ResolveResponse;

/// `GET /v1/system-errors?resolved=&min_severity=&limit=`
pub async fn list(
    State(state): State<AppState>,
    Query(query): Query<SystemErrorQuery>,
) -> Result<Json<Vec<SystemErrorRecord>>, ServerError> {
    let records = state.gateway.logger().system_errors(&query).await?;
    Ok(Json(records))
}

/// `POST /v1/system-errors/{id}/resolve`
pub async fn resolve(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ResolveResponse>, ServerError> {
    if !state.gateway.logger().resolve_system_error(&id).await? {
        return Err(ServerError::NotFound(format!("system error {id}")));
    }
    Ok(Json(ResolveResponse { id, resolved: true }))
}
