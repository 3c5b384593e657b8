use axum::{
    Json,
    extract::rejection::{JsonRejection, PathRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

use crate::{
    auth::{AuthError, RegisterError},
    claps::ClapError,
    repository::RepoError,
    token::TokenError,
};

/// ApiError
///
/// The one place errors become HTTP responses. Every body has the shape
/// `{"error": "<code>", "message": "<text>"}`.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error(transparent)]
    Clap(#[from] ClapError),

    #[error("{0}")]
    BadRequest(String),

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl From<PathRejection> for ApiError {
    fn from(rejection: PathRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl From<RegisterError> for ApiError {
    fn from(err: RegisterError) -> Self {
        match err {
            RegisterError::Internal(msg) => ApiError::Internal(msg),
            other => ApiError::BadRequest(other.to_string()),
        }
    }
}

impl From<RepoError> for ApiError {
    fn from(err: RepoError) -> Self {
        ApiError::Internal(err.to_string())
    }
}

impl ApiError {
    /// Status, machine-readable code and client-facing message.
    fn parts(&self) -> (StatusCode, &'static str, String) {
        match self {
            ApiError::Auth(err) => match err {
                AuthError::MissingToken => (
                    StatusCode::UNAUTHORIZED,
                    "missing_token",
                    "Missing Authorization header".to_string(),
                ),
                AuthError::Token(TokenError::Malformed) => (
                    StatusCode::UNAUTHORIZED,
                    "malformed_token",
                    "Invalid token".to_string(),
                ),
                AuthError::Token(TokenError::InvalidSignature) => (
                    StatusCode::UNAUTHORIZED,
                    "invalid_signature",
                    "Invalid token".to_string(),
                ),
                AuthError::Token(TokenError::Expired) => (
                    StatusCode::UNAUTHORIZED,
                    "token_expired",
                    "Token has expired".to_string(),
                ),
                AuthError::NotFound | AuthError::InvalidCredential => (
                    StatusCode::UNAUTHORIZED,
                    "invalid_credentials",
                    "Invalid credentials".to_string(),
                ),
                AuthError::Forbidden => (
                    StatusCode::FORBIDDEN,
                    "forbidden",
                    "Access denied".to_string(),
                ),
                AuthError::Internal(_) => internal(),
            },
            ApiError::Clap(err) => match err {
                ClapError::InvalidArgument(_) => {
                    (StatusCode::BAD_REQUEST, "invalid_argument", err.to_string())
                }
                ClapError::NotFound => (
                    StatusCode::NOT_FOUND,
                    "not_found",
                    "Post not found".to_string(),
                ),
                ClapError::UnknownUser(_) => (
                    StatusCode::UNAUTHORIZED,
                    "unknown_user",
                    "Session user no longer exists".to_string(),
                ),
                ClapError::Unavailable => (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "unavailable",
                    err.to_string(),
                ),
                ClapError::Storage(_) => internal(),
            },
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad_request", msg.clone()),
            ApiError::NotFound(what) => (
                StatusCode::NOT_FOUND,
                "not_found",
                format!("{what} not found"),
            ),
            ApiError::Internal(_) => internal(),
        }
    }
}

fn internal() -> (StatusCode, &'static str, String) {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        "internal_error",
        "Internal server error".to_string(),
    )
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = self.parts();
        if status.is_server_error() {
            // The detailed cause stays in the logs only.
            tracing::error!(error = %self, status = status.as_u16(), "request failed");
        }
        (status, Json(json!({ "error": code, "message": message }))).into_response()
    }
}
