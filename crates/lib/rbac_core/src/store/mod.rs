//! Credential store: persistence of identities, roles and endpoint grants.
//!
//! The authorization core only talks to [`CredentialStore`]. `postgres`
//! backs it with a `PgPool`; `memory` is an in-process implementation used
//! by tests and local development.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::time::{Instant, timeout_at};

use crate::models::auth::{
    EndpointGrant, GrantId, Identity, IdentityId, IdentityWithPassword, RoleGrants, RoleId,
};

/// Credential store errors.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Database error: {0}")]
    Db(#[from] sqlx::Error),

    #[error("Store did not answer before the deadline")]
    Timeout,
}

/// Run a store operation, failing with [`StoreError::Timeout`] once
/// `deadline` passes.
pub async fn with_deadline<T>(
    deadline: Instant,
    op: impl Future<Output = Result<T, StoreError>>,
) -> Result<T, StoreError> {
    timeout_at(deadline, op).await.map_err(|_| StoreError::Timeout)?
}

/// Fields for a new identity.
#[derive(Debug, Clone)]
pub struct NewIdentity {
    pub login: String,
    pub email: String,
    pub name: String,
    pub password_hash: Option<String>,
    pub provider: String,
    pub provider_id: Option<String>,
    pub active: bool,
}

/// Partial identity update. `None` leaves the field untouched.
#[derive(Debug, Clone, Default)]
pub struct IdentityUpdate {
    pub login: Option<String>,
    pub name: Option<String>,
    pub active: Option<bool>,
}

/// Fields for a new endpoint grant.
#[derive(Debug, Clone)]
pub struct NewEndpointGrant {
    pub path: String,
    pub method: String,
    pub description: String,
    pub hidden: bool,
    pub public: bool,
}

/// Storage operations required by the authentication and authorization core.
///
/// Every read reflects the current state of the store; implementations must
/// not cache role or grant data across calls. Soft-deleted identities are
/// invisible to all reads.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Fetch an identity by ID.
    async fn identity_by_id(&self, id: IdentityId) -> Result<Option<Identity>, StoreError>;

    /// Fetch an identity and its password hash by login name or email.
    async fn identity_by_login(
        &self,
        login_or_email: &str,
    ) -> Result<Option<IdentityWithPassword>, StoreError>;

    /// Fetch an identity by email.
    async fn identity_by_email(&self, email: &str) -> Result<Option<Identity>, StoreError>;

    /// Roles of an identity, each with its currently attached grants.
    async fn roles_with_grants(&self, id: IdentityId) -> Result<Vec<RoleGrants>, StoreError>;

    /// Create an identity. Fails with [`StoreError::Conflict`] when the login
    /// or email is already taken.
    async fn create_identity(&self, new: NewIdentity) -> Result<Identity, StoreError>;

    /// Apply a partial update and return the updated identity.
    async fn update_identity(
        &self,
        id: IdentityId,
        update: IdentityUpdate,
    ) -> Result<Identity, StoreError>;

    /// Record a successful login.
    async fn record_login(&self, id: IdentityId, at: DateTime<Utc>) -> Result<(), StoreError>;

    /// Associate an identity with the role named `role_name`. Idempotent.
    async fn assign_role(&self, id: IdentityId, role_name: &str) -> Result<(), StoreError>;

    /// All endpoint grants known to the store.
    async fn list_grants(&self) -> Result<Vec<EndpointGrant>, StoreError>;

    /// Insert an endpoint grant unless `(path, method)` already exists.
    /// Returns the new grant, or `None` when it was already present.
    async fn insert_grant(
        &self,
        grant: NewEndpointGrant,
    ) -> Result<Option<EndpointGrant>, StoreError>;

    /// Grants attached to a role.
    async fn role_grants(&self, role_id: RoleId) -> Result<RoleGrants, StoreError>;

    /// Replace the full grant set attached to a role.
    async fn replace_role_grants(
        &self,
        role_id: RoleId,
        grant_ids: &[GrantId],
    ) -> Result<RoleGrants, StoreError>;
}
