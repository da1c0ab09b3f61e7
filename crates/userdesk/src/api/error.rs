//! JSON error responses for AJAX callers and rejected requests.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, error};

use crate::auth::AuthError;
use crate::user::{UserError, UserErrorKind};

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    Conflict(String),

    /// Logged in full; the client only sees a generic message.
    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::BadRequest(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            Self::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            Self::BadRequest(_) => (StatusCode::BAD_REQUEST, "BAD_REQUEST"),
            Self::Unauthorized(_) => (StatusCode::UNAUTHORIZED, "UNAUTHORIZED"),
            Self::Forbidden(_) => (StatusCode::FORBIDDEN, "FORBIDDEN"),
            Self::Conflict(_) => (StatusCode::CONFLICT, "CONFLICT"),
            Self::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
        }
    }
}

/// Body of every error response: `{"error": "...", "code": "NOT_FOUND"}`.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: &'static str,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();

        let message = match self {
            ApiError::Internal(detail) => {
                error!(code, %detail, "request failed");
                "Something went wrong.".to_string()
            }
            other => {
                debug!(code, message = %other, "request rejected");
                other.to_string()
            }
        };

        (status, Json(ErrorResponse { error: message, code })).into_response()
    }
}

impl From<UserError> for ApiError {
    fn from(err: UserError) -> Self {
        let UserError { kind, message } = err;
        match kind {
            UserErrorKind::NotFound => ApiError::NotFound(message),
            UserErrorKind::Conflict => ApiError::Conflict(message),
            UserErrorKind::Invalid => ApiError::BadRequest(message),
            UserErrorKind::Storage => ApiError::Internal(message),
        }
    }
}

/// Repository errors are classified the same way store failures are.
impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        UserError::from_anyhow(err).into()
    }
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::Forbidden(msg) => ApiError::Forbidden(msg),
            AuthError::Misconfigured(_) => ApiError::Internal(err.to_string()),
            _ => ApiError::Unauthorized(err.to_string()),
        }
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
