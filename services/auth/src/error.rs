//! Request-path error taxonomy for the authentication service

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;
use tracing::error;

/// What can go wrong while handling an authentication request.
///
/// Enumeration-prone failures (`NotFound`, `TokenInvalid`) collapse into one
/// generic client message; rate limiting stays a distinct, retryable status;
/// upstream detail is logged and never echoed.
#[derive(Debug, Error)]
pub enum AuthError {
    /// User or token absent. Never distinguished from "invalid" client-side.
    #[error("not found")]
    NotFound,

    /// Input violated a policy the user can correct.
    #[error("{0}")]
    PolicyViolation(String),

    /// Token expired, deleted, or issued against a stale snapshot.
    #[error("token invalid")]
    TokenInvalid,

    /// OAuth2 state missing or mismatched.
    #[error("state token mismatch")]
    ForgeryDetected,

    /// Too many requests from this client.
    #[error("too many requests")]
    RateLimited,

    /// Storage, notification, or provider I/O failed.
    #[error(transparent)]
    Upstream(#[from] anyhow::Error),
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            AuthError::NotFound | AuthError::TokenInvalid => (
                StatusCode::FORBIDDEN,
                "invalid credentials or link".to_string(),
            ),
            AuthError::PolicyViolation(message) => (StatusCode::BAD_REQUEST, message.clone()),
            AuthError::ForgeryDetected => (
                StatusCode::FORBIDDEN,
                "request could not be verified".to_string(),
            ),
            AuthError::RateLimited => (
                StatusCode::TOO_MANY_REQUESTS,
                "too many requests, retry later".to_string(),
            ),
            AuthError::Upstream(err) => {
                error!("upstream failure: {err:#}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal server error".to_string(),
                )
            }
        };

        let body = Json(serde_json::json!({ "error": message }));
        (status, body).into_response()
    }
}
