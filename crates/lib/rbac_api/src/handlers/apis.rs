//! Endpoint inventory handlers.

use axum::extract::State;
use rbac_core::inventory::{self, RouteRef, SyncReport};
use rbac_core::store::with_deadline;
use serde::{Deserialize, Serialize};

use super::AppJson;
use crate::AppState;
use crate::error::{AppError, AppResult};
use crate::routes;

#[derive(Debug, Deserialize)]
pub struct SyncRequest {
    pub endpoints: Vec<RouteRef>,
}

#[derive(Debug, Serialize)]
pub struct SyncResponse {
    pub added: Vec<RouteRef>,
}

/// Protected routes of this API as inventory entries.
pub fn known_routes() -> Vec<RouteRef> {
    routes::PROTECTED
        .iter()
        .map(|(method, path)| RouteRef::new(*method, *path))
        .collect()
}

/// `GET /apis/sync`: Which mounted routes have endpoint grants.
pub async fn sync_report_handler(State(state): State<AppState>) -> AppResult<AppJson<SyncReport>> {
    let registered = with_deadline(state.store_deadline(), state.store.list_grants()).await?;
    Ok(AppJson(inventory::reconcile(&known_routes(), &registered)))
}

/// `POST /apis/sync`: Register the given endpoints that have no grant yet.
pub async fn register_missing_handler(
    State(state): State<AppState>,
    AppJson(body): AppJson<SyncRequest>,
) -> AppResult<AppJson<SyncResponse>> {
    if let Some(bad) = body
        .endpoints
        .iter()
        .find(|e| e.method.trim().is_empty() || !e.path.starts_with('/'))
    {
        return Err(AppError::Validation(format!(
            "invalid endpoint: {} {}",
            bad.method, bad.path
        )));
    }
    let added =
        inventory::register_missing(state.store.as_ref(), &body.endpoints, state.store_deadline())
            .await?;
    Ok(AppJson(SyncResponse { added }))
}
