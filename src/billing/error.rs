use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use tracing::error;

use crate::responses::JsonResponse;

#[derive(Debug, thiserror::Error)]
pub enum WebhookError {
    #[error("webhook signature did not verify")]
    InvalidSignature,
    #[error("webhook timestamp is outside the tolerance window")]
    StaleEvent,
    #[error("invalid payload: {0}")]
    InvalidPayload(String),
    #[error("missing metadata `{field}` on {object}")]
    MissingMetadata { object: String, field: &'static str },
    #[error("persistence error: {0}")]
    Persistence(#[from] sqlx::Error),
}

impl WebhookError {
    pub fn status(&self) -> StatusCode {
        match self {
            WebhookError::InvalidSignature
            | WebhookError::StaleEvent
            | WebhookError::InvalidPayload(_)
            | WebhookError::MissingMetadata { .. } => StatusCode::BAD_REQUEST,
            WebhookError::Persistence(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            WebhookError::InvalidSignature => "invalid_signature",
            WebhookError::StaleEvent => "stale_event",
            WebhookError::InvalidPayload(_) => "invalid_payload",
            WebhookError::MissingMetadata { .. } => "missing_metadata",
            WebhookError::Persistence(_) => "persistence",
        }
    }
}

impl IntoResponse for WebhookError {
    fn into_response(self) -> Response {
        match self {
            WebhookError::Persistence(ref err) => {
                error!(?err, "webhook processing failed on persistence");
                JsonResponse::server_error("Internal server error").into_response()
            }
            other => {
                JsonResponse::bad_request_with_code(&other.to_string(), other.code())
                    .into_response()
            }
        }
    }
}
