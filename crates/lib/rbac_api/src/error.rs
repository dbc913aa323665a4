//! Application error types.

use axum::{
    Json,
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use rbac_core::auth::{AuthError, TokenError};
use rbac_core::authz::AuthzError;
use rbac_core::store::StoreError;
use serde::Serialize;
use thiserror::Error;
use tracing::{error, warn};

/// Convenience alias for handler return types.
pub type AppResult<T> = Result<T, AppError>;

/// Message shared by every failed login, whatever the cause.
pub const INVALID_CREDENTIALS: &str = "Invalid credentials";

/// Message for rejected external identity tokens.
pub const INVALID_EXTERNAL_TOKEN: &str = "Invalid external token";

/// JSON error envelope.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
}

/// Application-level errors with HTTP status mapping.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Database unavailable: {0}")]
    DbUnavailable(String),

    #[error("Internal server error")]
    Internal(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AppError::Validation(m) => (StatusCode::BAD_REQUEST, m),
            AppError::Unauthorized(m) => (StatusCode::UNAUTHORIZED, m),
            AppError::Forbidden(m) => (StatusCode::FORBIDDEN, m),
            AppError::NotFound(m) => (StatusCode::NOT_FOUND, m),
            AppError::DbUnavailable(m) => {
                warn!("database unavailable: {m}");
                (StatusCode::SERVICE_UNAVAILABLE, "Service unavailable".into())
            }
            AppError::Internal(m) => {
                error!("internal error: {m}");
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error".into())
            }
        };
        (status, Json(ErrorBody { error: message })).into_response()
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        AppError::Validation(rejection.body_text())
    }
}

impl From<StoreError> for AppError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(what) => AppError::NotFound(what),
            StoreError::Conflict(what) => AppError::Validation(what),
            StoreError::Db(
                e @ (sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_)),
            ) => AppError::DbUnavailable(e.to_string()),
            StoreError::Db(e) => AppError::Internal(e.to_string()),
            StoreError::Timeout => AppError::DbUnavailable("store timed out".into()),
        }
    }
}

impl From<TokenError> for AppError {
    fn from(e: TokenError) -> Self {
        match e {
            TokenError::Signing(msg) => AppError::Internal(msg),
            TokenError::Expired => AppError::Unauthorized("Token expired".into()),
            _ => AppError::Unauthorized("Invalid token".into()),
        }
    }
}

impl From<AuthError> for AppError {
    fn from(e: AuthError) -> Self {
        match e {
            AuthError::NotFound | AuthError::InvalidCredentials => {
                AppError::Unauthorized(INVALID_CREDENTIALS.into())
            }
            AuthError::InvalidExternalToken(_) => {
                AppError::Unauthorized(INVALID_EXTERNAL_TOKEN.into())
            }
            AuthError::MalformedRequest(msg) => AppError::Validation(msg),
            AuthError::Token(e) => AppError::from(e),
            AuthError::Store(e) => AppError::from(e),
            AuthError::Internal(msg) => AppError::Internal(msg),
        }
    }
}

impl From<AuthzError> for AppError {
    fn from(e: AuthzError) -> Self {
        match e {
            AuthzError::Timeout => AppError::DbUnavailable("authorization timed out".into()),
            AuthzError::Store(e) => AppError::from(e),
        }
    }
}
