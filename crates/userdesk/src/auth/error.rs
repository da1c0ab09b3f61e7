//! Authentication errors.

use axum::response::{IntoResponse, Response};
use thiserror::Error;

use crate::api::ApiError;

#[derive(Debug, Error)]
pub enum AuthError {
    /// No bearer header, token cookie or dev identity on the request.
    #[error("not authenticated")]
    Unauthenticated,

    #[error("malformed authorization header")]
    MalformedHeader,

    #[error("invalid token: {0}")]
    InvalidToken(String),

    #[error("token expired")]
    TokenExpired,

    /// `X-Dev-User` named an identity missing from `auth.dev_users`.
    #[error("unknown dev identity: {0}")]
    UnknownDevUser(String),

    #[error("{0}")]
    Forbidden(String),

    /// Signing is impossible with the current configuration.
    #[error("auth misconfigured: {0}")]
    Misconfigured(String),
}

/// Rejections render through the API error body.
impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        ApiError::from(self).into_response()
    }
}
