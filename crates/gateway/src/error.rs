//! Error types for the gateway layer

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use courier_auth::AuthError;
use courier_chats::{ChatError, ErrorKind};
use serde::Serialize;
use thiserror::Error;
use tracing::error;
use utoipa::ToSchema;

/// Gateway error types
#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    InvalidRequest(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    Unprocessable(String),

    #[error("{0}")]
    ServiceUnavailable(String),

    #[error("{0}")]
    Internal(String),
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

impl GatewayError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            GatewayError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            GatewayError::Forbidden(_) => StatusCode::FORBIDDEN,
            GatewayError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            GatewayError::NotFound(_) => StatusCode::NOT_FOUND,
            GatewayError::Conflict(_) => StatusCode::CONFLICT,
            GatewayError::Unprocessable(_) => StatusCode::UNPROCESSABLE_ENTITY,
            GatewayError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            GatewayError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            GatewayError::Unauthorized(_) => "unauthorized",
            GatewayError::Forbidden(_) => "forbidden",
            GatewayError::InvalidRequest(_) => "invalid_request",
            GatewayError::NotFound(_) => "not_found",
            GatewayError::Conflict(_) => "conflict",
            GatewayError::Unprocessable(_) => "unprocessable",
            GatewayError::ServiceUnavailable(_) => "unavailable",
            GatewayError::Internal(_) => "internal",
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ErrorResponse {
            error: self.code().to_string(),
            message: self.to_string(),
        };

        (status, Json(body)).into_response()
    }
}

/// Result type for gateway operations
pub type GatewayResult<T> = Result<T, GatewayError>;

impl From<ChatError> for GatewayError {
    fn from(error: ChatError) -> Self {
        let message = error.public_message();
        match error.kind() {
            ErrorKind::Validation => match error {
                ChatError::AlreadyParticipant { .. } => GatewayError::Conflict(message),
                _ => GatewayError::InvalidRequest(message),
            },
            ErrorKind::Authorization => GatewayError::Forbidden(message),
            ErrorKind::NotFound => GatewayError::NotFound(message),
            ErrorKind::Policy => GatewayError::Unprocessable(message),
            ErrorKind::TransientStore => GatewayError::ServiceUnavailable(message),
            ErrorKind::Internal => {
                error!(%error, "request failed");
                GatewayError::Internal(message)
            }
        }
    }
}

impl From<AuthError> for GatewayError {
    fn from(error: AuthError) -> Self {
        GatewayError::Unauthorized(error.to_string())
    }
}
