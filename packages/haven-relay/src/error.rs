use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use crate::relay::RelayError;

/// Errors returned by the HTTP collaborator routes.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Missing x-user-id header")]
    MissingActor,

    #[error("Message not found")]
    NotFound,

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<RelayError> for ServerError {
    fn from(e: RelayError) -> Self {
        match e {
            RelayError::NotFound => ServerError::NotFound,
            RelayError::Forbidden(reason) => ServerError::Forbidden(reason.to_string()),
            // Only socket sends and edits validate text.
            RelayError::EmptyMessage => ServerError::Internal(e.to_string()),
            RelayError::Store(e) => ServerError::Internal(e.to_string()),
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ServerError::MissingActor => (StatusCode::UNAUTHORIZED, self.to_string()),
            ServerError::NotFound => (StatusCode::NOT_FOUND, self.to_string()),
            ServerError::Forbidden(_) => (StatusCode::FORBIDDEN, self.to_string()),
            ServerError::Internal(detail) => {
                tracing::error!(error = detail.as_str(), "Request failed");
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error".to_string())
            }
        };

        let body = serde_json::json!({
            "error": message,
        });

        (status, axum::Json(body)).into_response()
    }
}
