use serde::{Deserialize, Serialize};

use courier_core::{ActionId, Channel};
use courier_gateway::{EnqueueOutcome, MetricsSnapshot};

/// Response body for `GET /health`.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    /// Channels with a registered send function.
    pub channels: Vec<Channel>,
    pub metrics: MetricsSnapshot,
}

/// Response body for enqueue and trigger fire.
#[derive(Debug, Serialize, Deserialize)]
pub struct EnqueueResponse {
    pub id: ActionId,
    /// `scheduled` or `already_scheduled`.
    pub status: String,
}

impl From<&EnqueueOutcome> for EnqueueResponse {
    fn from(outcome: &EnqueueOutcome) -> Self {
        let status = if outcome.is_scheduled() {
            "scheduled"
        } else {
            "already_scheduled"
        };
        Self {
            id: outcome.id().clone(),
            status: status.to_owned(),
        }
    }
}

/// Request body for `POST /v1/dlq/{id}/fail`.
#[derive(Debug, Serialize, Deserialize)]
pub struct FailRequest {
    pub reason: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ResolveResponse {
    pub id: String,
    pub resolved: bool,
}
