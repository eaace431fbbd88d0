//! Service-level error type and its HTTP mapping.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use cytoserve_ml::MlError;
use thiserror::Error;

use crate::gateway::events::ErrorResponse;

/// Errors surfaced by [`crate::ClassifierService`] and the gateway.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error(transparent)]
    Ml(#[from] MlError),

    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, ServiceError>;

impl ServiceError {
    /// HTTP status a client should see for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Ml(err) => match err {
                MlError::ArtifactNotFound(_) => StatusCode::NOT_FOUND,
                MlError::ModelNotLoaded => StatusCode::SERVICE_UNAVAILABLE,
                MlError::LoadTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
                MlError::UnsupportedSchema(_) | MlError::ArtifactInvalid { .. } => {
                    StatusCode::UNPROCESSABLE_ENTITY
                }
                e if e.is_input_error() => StatusCode::BAD_REQUEST,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Config(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        (
            status,
            Json(ErrorResponse {
                error: self.to_string(),
            }),
        )
            .into_response()
    }
}
