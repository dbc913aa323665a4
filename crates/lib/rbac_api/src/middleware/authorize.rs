//! Endpoint authorization middleware.

use axum::{
    Extension,
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use rbac_core::authz::{AccessRequest, Decision, DenyReason};
use tracing::info;

use super::auth::AuthenticatedIdentity;
use crate::AppState;
use crate::error::AppError;

/// Axum middleware: lets the request through only when one of the caller's
/// roles grants its method and path. Must run after
/// [`require_session`](super::auth::require_session).
pub async fn authorize_endpoint(
    State(state): State<AppState>,
    Extension(caller): Extension<AuthenticatedIdentity>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let deadline = state.store_deadline();
    let access = AccessRequest {
        identity_id: caller.id,
        method: request.method().as_str(),
        path: request.uri().path(),
    };

    match state.engine.authorize(&access, deadline).await? {
        Decision::Permit { .. } => Ok(next.run(request).await),
        Decision::Deny(reason) => {
            info!(
                identity_id = %caller.id,
                method = %request.method(),
                path = request.uri().path(),
                ?reason,
                "access denied"
            );
            Err(match reason {
                DenyReason::UnknownIdentity | DenyReason::InactiveIdentity => {
                    AppError::Unauthorized("Invalid session".into())
                }
                DenyReason::NoMatchingGrant => {
                    AppError::Forbidden("Access to this endpoint is not allowed".into())
                }
            })
        }
    }
}
