//! Shared fixtures for unit tests.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::auth::jwt::{KeyPair, TokenCodec};
use crate::models::auth::{
    EndpointGrant, GrantId, Identity, IdentityId, IdentityWithPassword, PROVIDER_LOCAL,
    RoleGrants, RoleId,
};
use crate::store::{CredentialStore, IdentityUpdate, NewEndpointGrant, NewIdentity, StoreError};

pub const PRIVATE_PEM: &str = include_str!("../tests/fixtures/private.pem");
pub const PUBLIC_PEM: &str = include_str!("../tests/fixtures/public.pem");
pub const FOREIGN_PRIVATE_PEM: &str = include_str!("../tests/fixtures/foreign_private.pem");
pub const FOREIGN_PUBLIC_PEM: &str = include_str!("../tests/fixtures/foreign_public.pem");

pub fn codec() -> TokenCodec {
    TokenCodec::new(KeyPair::from_pem(PRIVATE_PEM.as_bytes(), PUBLIC_PEM.as_bytes()).unwrap())
}

pub fn foreign_codec() -> TokenCodec {
    TokenCodec::new(
        KeyPair::from_pem(
            FOREIGN_PRIVATE_PEM.as_bytes(),
            FOREIGN_PUBLIC_PEM.as_bytes(),
        )
        .unwrap(),
    )
}

pub fn identity(id: i64) -> Identity {
    Identity {
        id: IdentityId(id),
        login: format!("user{id}"),
        email: format!("user{id}@example.com"),
        name: format!("User {id}"),
        last_name: String::new(),
        provider: PROVIDER_LOCAL.into(),
        provider_id: None,
        active: true,
        last_login: None,
        roles: vec!["user".into()],
    }
}

/// Store whose every call hangs for an hour.
pub struct StalledStore;

async fn stall<T>() -> Result<T, StoreError> {
    tokio::time::sleep(Duration::from_secs(3600)).await;
    Err(StoreError::NotFound("stalled".into()))
}

#[async_trait]
impl CredentialStore for StalledStore {
    async fn identity_by_id(&self, _id: IdentityId) -> Result<Option<Identity>, StoreError> {
        stall().await
    }
    async fn identity_by_login(
        &self,
        _login: &str,
    ) -> Result<Option<IdentityWithPassword>, StoreError> {
        stall().await
    }
    async fn identity_by_email(&self, _email: &str) -> Result<Option<Identity>, StoreError> {
        stall().await
    }
    async fn roles_with_grants(&self, _id: IdentityId) -> Result<Vec<RoleGrants>, StoreError> {
        stall().await
    }
    async fn create_identity(&self, _new: NewIdentity) -> Result<Identity, StoreError> {
        stall().await
    }
    async fn update_identity(
        &self,
        _id: IdentityId,
        _update: IdentityUpdate,
    ) -> Result<Identity, StoreError> {
        stall().await
    }
    async fn record_login(&self, _id: IdentityId, _at: DateTime<Utc>) -> Result<(), StoreError> {
        stall().await
    }
    async fn assign_role(&self, _id: IdentityId, _role: &str) -> Result<(), StoreError> {
        stall().await
    }
    async fn list_grants(&self) -> Result<Vec<EndpointGrant>, StoreError> {
        stall().await
    }
    async fn insert_grant(
        &self,
        _grant: NewEndpointGrant,
    ) -> Result<Option<EndpointGrant>, StoreError> {
        stall().await
    }
    async fn role_grants(&self, _role_id: RoleId) -> Result<RoleGrants, StoreError> {
        stall().await
    }
    async fn replace_role_grants(
        &self,
        _role_id: RoleId,
        _grant_ids: &[GrantId],
    ) -> Result<RoleGrants, StoreError> {
        stall().await
    }
}
