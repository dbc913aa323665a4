//! Endpoint authorization.
//!
//! Decides whether an authenticated identity may invoke `method path` by
//! matching the request against the grants of the identity's roles, read
//! fresh from the credential store on every check.

pub mod template;

use std::sync::Arc;

use thiserror::Error;
use tokio::time::{Instant, timeout_at};
use tracing::debug;

use crate::models::auth::{EndpointGrant, IdentityId, Role, RoleGrants};
use crate::store::{CredentialStore, StoreError};

pub use template::PathTemplate;

/// The request being authorized. `identity_id` must come from a verified
/// session, never from request data.
#[derive(Debug, Clone, Copy)]
pub struct AccessRequest<'a> {
    pub identity_id: IdentityId,
    pub method: &'a str,
    pub path: &'a str,
}

/// Why access was denied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenyReason {
    /// The identity no longer exists (or was soft-deleted after issuance).
    UnknownIdentity,
    InactiveIdentity,
    NoMatchingGrant,
}

/// Outcome of an authorization check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// Allowed by `grant`, held through `role`.
    Permit { role: Role, grant: EndpointGrant },
    Deny(DenyReason),
}

impl Decision {
    pub fn is_permit(&self) -> bool {
        matches!(self, Decision::Permit { .. })
    }
}

/// Authorization failures that are not a decision.
#[derive(Debug, Error)]
pub enum AuthzError {
    #[error("credential store did not answer before the deadline")]
    Timeout,

    #[error("credential store error: {0}")]
    Store(#[from] StoreError),
}

/// Whether `grant` permits `method path`. Methods compare case-insensitively.
pub fn grant_matches(grant: &EndpointGrant, method: &str, path: &str) -> bool {
    grant.method.eq_ignore_ascii_case(method) && PathTemplate::parse(&grant.path).matches(path)
}

/// First grant across `roles` that permits `method path`, with its role.
pub fn find_grant<'r>(
    roles: &'r [RoleGrants],
    method: &str,
    path: &str,
) -> Option<(&'r Role, &'r EndpointGrant)> {
    roles.iter().find_map(|rg| {
        rg.grants
            .iter()
            .find(|g| grant_matches(g, method, path))
            .map(|g| (&rg.role, g))
    })
}

/// Store-backed authorization engine.
#[derive(Clone)]
pub struct AuthorizationEngine {
    store: Arc<dyn CredentialStore>,
}

impl AuthorizationEngine {
    pub fn new(store: Arc<dyn CredentialStore>) -> Self {
        Self { store }
    }

    /// Decide `request`, giving up with [`AuthzError::Timeout`] once
    /// `deadline` passes.
    pub async fn authorize(
        &self,
        request: &AccessRequest<'_>,
        deadline: Instant,
    ) -> Result<Decision, AuthzError> {
        timeout_at(deadline, self.evaluate(request))
            .await
            .map_err(|_| AuthzError::Timeout)?
    }

    async fn evaluate(&self, request: &AccessRequest<'_>) -> Result<Decision, AuthzError> {
        let id = request.identity_id;
        let Some(identity) = self.store.identity_by_id(id).await? else {
            debug!(identity_id = %id, "authorization: identity not found");
            return Ok(Decision::Deny(DenyReason::UnknownIdentity));
        };
        if !identity.active {
            debug!(identity_id = %id, "authorization: identity inactive");
            return Ok(Decision::Deny(DenyReason::InactiveIdentity));
        }

        let roles = self.store.roles_with_grants(id).await?;
        match find_grant(&roles, request.method, request.path) {
            Some((role, grant)) => {
                debug!(
                    identity_id = %id,
                    method = request.method,
                    path = request.path,
                    role = %role.name,
                    template = %grant.path,
                    "authorization: permitted"
                );
                Ok(Decision::Permit {
                    role: role.clone(),
                    grant: grant.clone(),
                })
            }
            None => {
                debug!(
                    identity_id = %id,
                    method = request.method,
                    path = request.path,
                    roles = roles.len(),
                    "authorization: no matching grant"
                );
                for rg in &roles {
                    for g in &rg.grants {
                        debug!(role = %rg.role.name, "  granted {} {}", g.method, g.path);
                    }
                }
                Ok(Decision::Deny(DenyReason::NoMatchingGrant))
            }
        }
    }
}
