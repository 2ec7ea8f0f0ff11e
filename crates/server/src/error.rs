use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use courier_gateway::GatewayError;
use courier_state::StateError;

/// Errors that can occur when running the Courier server.
#[derive(Debug, Error)]
pub enum ServerError {
    /// A configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// An I/O error (e.g. binding the listener).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// A gateway-level error surfaced through the API.
    #[error(transparent)]
    Gateway(#[from] GatewayError),

    /// The request could not be interpreted.
    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("not found: {0}")]
    NotFound(String),
}

impl ServerError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Config(_) | Self::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Gateway(e) => gateway_status(e),
        }
    }
}

fn gateway_status(error: &GatewayError) -> StatusCode {
    match error {
        GatewayError::NotFound(_) | GatewayError::State(StateError::NotFound(_)) => {
            StatusCode::NOT_FOUND
        }
        GatewayError::State(
            StateError::InvalidTransition { .. } | StateError::DuplicateIdempotencyKey { .. },
        ) => StatusCode::CONFLICT,
        GatewayError::Payload(_)
        | GatewayError::ChannelMismatch { .. }
        | GatewayError::ReservedKey(_) => StatusCode::BAD_REQUEST,
        GatewayError::Inactive(_) | GatewayError::NoProvider(_) => {
            StatusCode::UNPROCESSABLE_ENTITY
        }
        GatewayError::State(_) | GatewayError::Audit(_) | GatewayError::Configuration(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }
        let body = serde_json::json!({ "error": self.to_string() });
        (status, axum::Json(body)).into_response()
    }
}
