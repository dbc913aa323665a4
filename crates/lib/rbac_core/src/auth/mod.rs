//! Authentication logic.
//!
//! Provides password hashing, session token management, external identity
//! token validation and the identity resolver used by the HTTP layer.

pub mod external;
pub mod jwt;
pub mod password;
pub mod resolver;

use thiserror::Error;

use crate::store::StoreError;

pub use external::ExternalTokenError;
pub use jwt::TokenError;

/// Authentication errors.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Identity not found")]
    NotFound,

    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("Invalid external token: {0}")]
    InvalidExternalToken(#[from] ExternalTokenError),

    #[error("Malformed request: {0}")]
    MalformedRequest(String),

    #[error("Token error: {0}")]
    Token(#[from] TokenError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Internal error: {0}")]
    Internal(String),
}
