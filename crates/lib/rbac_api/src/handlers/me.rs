//! Current-identity handlers.

use axum::Extension;
use axum::extract::State;
use rbac_core::models::auth::{Identity, RoleGrants};
use rbac_core::store::with_deadline;

use super::AppJson;
use crate::AppState;
use crate::error::{AppError, AppResult};
use crate::middleware::auth::AuthenticatedIdentity;

/// `GET /me`: The caller's identity as currently stored.
pub async fn me_handler(
    State(state): State<AppState>,
    Extension(caller): Extension<AuthenticatedIdentity>,
) -> AppResult<AppJson<Identity>> {
    let identity = with_deadline(state.store_deadline(), state.store.identity_by_id(caller.id))
        .await?
        .ok_or_else(|| AppError::Unauthorized("Invalid session".into()))?;
    Ok(AppJson(identity))
}

/// `GET /me/permissions`: The caller's roles with their grants.
pub async fn permissions_handler(
    State(state): State<AppState>,
    Extension(caller): Extension<AuthenticatedIdentity>,
) -> AppResult<AppJson<Vec<RoleGrants>>> {
    let roles = with_deadline(state.store_deadline(), state.store.roles_with_grants(caller.id)).await?;
    Ok(AppJson(roles))
}
