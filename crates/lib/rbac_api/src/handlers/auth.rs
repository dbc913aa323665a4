//! Authentication request handlers.

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use chrono::Utc;
use rbac_core::models::auth::Identity;
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::AppJson;
use crate::AppState;
use crate::error::{AppError, AppResult, ErrorBody};
use crate::middleware::auth::{SessionState, authorization_header, bearer_token, evaluate_session};

/// Body of `POST /login`.
#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    /// Login name or email.
    pub user: String,
    pub password: String,
}

/// Body of `POST /login/external`.
#[derive(Debug, Deserialize)]
pub struct ExternalLoginRequest {
    pub id_token: String,
}

/// Successful login: the identity plus its session token.
#[derive(Debug, Serialize)]
pub struct LoginResponse {
    #[serde(flatten)]
    pub identity: Identity,
    pub token: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TokenResponse {
    pub token: String,
}

/// `POST /login`: Authenticate with login name (or email) and password.
pub async fn login_handler(
    State(state): State<AppState>,
    AppJson(body): AppJson<LoginRequest>,
) -> AppResult<AppJson<LoginResponse>> {
    if body.user.trim().is_empty() || body.password.is_empty() {
        return Err(AppError::Validation("user and password are required".into()));
    }
    let identity = state
        .resolver
        .login_local(body.user.trim(), &body.password, state.store_deadline())
        .await?;
    let token = state.codec.issue(&identity)?;
    Ok(AppJson(LoginResponse { identity, token }))
}

/// `POST /login/external`: Authenticate with an external identity token.
pub async fn external_login_handler(
    State(state): State<AppState>,
    AppJson(body): AppJson<ExternalLoginRequest>,
) -> AppResult<AppJson<LoginResponse>> {
    let identity = state
        .resolver
        .login_external(&body.id_token, state.store_deadline())
        .await?;
    let token = state.codec.issue(&identity)?;
    Ok(AppJson(LoginResponse { identity, token }))
}

/// `GET /refresh`: Reissue the presented, still valid, token with a new expiry.
pub async fn refresh_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> AppResult<AppJson<TokenResponse>> {
    let token = authorization_header(&headers)
        .and_then(bearer_token)
        .ok_or_else(|| AppError::Unauthorized("Missing bearer token".into()))?;
    let token = state.codec.refresh(token)?;
    Ok(AppJson(TokenResponse { token }))
}

/// `GET /auth/check`: Reports the state of the presented session.
pub async fn auth_check_handler(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let unauthorized = |msg: &str| {
        (
            StatusCode::UNAUTHORIZED,
            axum::Json(ErrorBody { error: msg.into() }),
        )
            .into_response()
    };
    match evaluate_session(authorization_header(&headers), &state.codec, Utc::now()) {
        SessionState::Valid(claims) => axum::Json(json!({
            "status": "valid",
            "identity_id": claims.identity_id(),
            "expires_at": claims.exp,
        }))
        .into_response(),
        SessionState::NoToken => unauthorized("No token provided"),
        SessionState::Expired => unauthorized("Token expired"),
        SessionState::Invalid(_) => unauthorized("Invalid token"),
    }
}
