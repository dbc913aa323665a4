//! Role grant administration handlers.

use axum::extract::{Path, State};
use rbac_core::models::auth::{GrantId, RoleGrants, RoleId};
use rbac_core::store::with_deadline;
use serde::Deserialize;

use super::AppJson;
use crate::AppState;
use crate::error::AppResult;

/// Body of `PUT /roles/{id}/apis`.
#[derive(Debug, Deserialize)]
pub struct RoleApisRequest {
    pub apis: Vec<GrantId>,
}

/// `GET /roles/{id}/apis`: A role and its grants.
pub async fn role_apis_handler(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> AppResult<AppJson<RoleGrants>> {
    let grants = with_deadline(state.store_deadline(), state.store.role_grants(RoleId(id))).await?;
    Ok(AppJson(grants))
}

/// `PUT /roles/{id}/apis`: Replace a role's grants. Unknown grant IDs are
/// ignored.
pub async fn replace_role_apis_handler(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    AppJson(body): AppJson<RoleApisRequest>,
) -> AppResult<AppJson<RoleGrants>> {
    let updated = with_deadline(
        state.store_deadline(),
        state.store.replace_role_grants(RoleId(id), &body.apis),
    )
    .await?;
    tracing::info!(role = %updated.role.name, grants = updated.grants.len(), "role grants replaced");
    Ok(AppJson(updated))
}
