//! Session middleware: bearer token extraction and verification.

use axum::http::HeaderMap;
use axum::http::header::AUTHORIZATION;
use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use chrono::{DateTime, Utc};
use rbac_core::auth::TokenError;
use rbac_core::auth::jwt::TokenCodec;
use rbac_core::models::auth::{IdentityId, SessionClaims};
use tracing::debug;

use crate::AppState;
use crate::error::AppError;

/// Outcome of inspecting a request's `Authorization` header.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionState {
    /// No header, or not of the form `Bearer <token>`.
    NoToken,
    Valid(SessionClaims),
    /// Bad signature, bad structure or wrong issuer.
    Invalid(String),
    Expired,
}

/// The verified caller of a protected request, placed in request extensions
/// by [`require_session`].
#[derive(Debug, Clone)]
pub struct AuthenticatedIdentity {
    pub id: IdentityId,
    pub claims: SessionClaims,
}

/// Extracts the token from a `Bearer <token>` header value.
pub fn bearer_token(header: &str) -> Option<&str> {
    let (scheme, token) = header.split_once(' ')?;
    let token = token.trim();
    (scheme.eq_ignore_ascii_case("bearer") && !token.is_empty()).then_some(token)
}

/// Returns the `Authorization` header value, if present and valid UTF-8.
pub fn authorization_header(headers: &HeaderMap) -> Option<&str> {
    headers.get(AUTHORIZATION).and_then(|v| v.to_str().ok())
}

/// Classifies the session carried by `header` at instant `now`.
pub fn evaluate_session(header: Option<&str>, codec: &TokenCodec, now: DateTime<Utc>) -> SessionState {
    let Some(token) = header.and_then(bearer_token) else {
        return SessionState::NoToken;
    };
    match codec.verify_at(token, now) {
        Ok(claims) => SessionState::Valid(claims),
        Err(TokenError::Expired) => SessionState::Expired,
        Err(e) => SessionState::Invalid(e.to_string()),
    }
}

/// Axum middleware: rejects the request with 401 unless it carries a valid
/// session token, and injects [`AuthenticatedIdentity`] otherwise.
pub async fn require_session(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let header = authorization_header(request.headers());
    match evaluate_session(header, &state.codec, Utc::now()) {
        SessionState::Valid(claims) => {
            let id = claims.identity_id();
            request
                .extensions_mut()
                .insert(AuthenticatedIdentity { id, claims });
            Ok(next.run(request).await)
        }
        SessionState::NoToken => {
            debug!(path = request.uri().path(), "no bearer token");
            Err(AppError::Unauthorized("Missing bearer token".into()))
        }
        SessionState::Expired => {
            debug!(path = request.uri().path(), "expired token");
            Err(AppError::Unauthorized("Token expired".into()))
        }
        SessionState::Invalid(reason) => {
            debug!(path = request.uri().path(), "invalid token: {reason}");
            Err(AppError::Unauthorized("Invalid token".into()))
        }
    }
}
