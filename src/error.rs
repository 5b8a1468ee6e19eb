//! Error taxonomy for the authentication subsystem.
//!
//! Every 401-class failure collapses to the same response body so callers
//! cannot tell an expired token from a revoked one or a deleted account.
//! The specific kind is only ever written to the logs.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Startup-time configuration problems. These are fatal.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("JWT_SECRET is not set; refusing to run with a default signing secret")]
    MissingSecret,
    #[error("invalid value for {name}: {value}")]
    Invalid { name: &'static str, value: String },
}

/// Failures reported by the credential store and the revocation registry.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("a user with this email already exists")]
    DuplicateEmail,
    #[error("token is already revoked")]
    DuplicateRevocation,
    #[error("record not found")]
    NotFound,
    #[error("corrupt record: {0}")]
    Corrupt(String),
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        StoreError::Unavailable(err.to_string())
    }
}

/// Returns true when a SQLite error is a UNIQUE / PRIMARY KEY violation.
pub(crate) fn is_constraint_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _) if e.code == rusqlite::ErrorCode::ConstraintViolation
    )
}

/// Outcome of the authentication and authorization gates.
#[derive(Debug, Clone, Error)]
pub enum AuthError {
    #[error("missing or malformed bearer token")]
    MissingToken,
    #[error("token signature is invalid")]
    InvalidToken,
    #[error("token has expired")]
    TokenExpired,
    #[error("token has been revoked")]
    TokenRevoked,
    #[error("token subject no longer exists")]
    UnknownSubject,
    #[error("insufficient role for this route")]
    Forbidden,
    #[error("auth store unavailable")]
    StoreUnavailable(#[source] StoreError),
}

impl AuthError {
    /// Stable name for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            AuthError::MissingToken => "missing_token",
            AuthError::InvalidToken => "invalid_token",
            AuthError::TokenExpired => "token_expired",
            AuthError::TokenRevoked => "token_revoked",
            AuthError::UnknownSubject => "unknown_subject",
            AuthError::Forbidden => "forbidden",
            AuthError::StoreUnavailable(_) => "store_unavailable",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AuthError::MissingToken
            | AuthError::InvalidToken
            | AuthError::TokenExpired
            | AuthError::TokenRevoked
            | AuthError::UnknownSubject => StatusCode::UNAUTHORIZED,
            AuthError::Forbidden => StatusCode::FORBIDDEN,
            AuthError::StoreUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    fn public_message(&self) -> &'static str {
        match self.status() {
            StatusCode::FORBIDDEN => "Not authorized for this resource",
            StatusCode::SERVICE_UNAVAILABLE => "Service temporarily unavailable",
            _ => "Not authorized",
        }
    }
}

impl From<StoreError> for AuthError {
    fn from(err: StoreError) -> Self {
        AuthError::StoreUnavailable(err)
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = json!({
            "success": false,
            "message": self.public_message(),
        });
        (status, Json(body)).into_response()
    }
}
