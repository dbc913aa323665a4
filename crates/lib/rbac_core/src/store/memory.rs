//! In-memory credential store.
//!
//! Mirrors the PostgreSQL schema closely enough for tests and local runs:
//! seeded with the `admin` and `user` roles, `(path, method)` unique grants,
//! soft-deleted identities hidden from every read.

use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use super::{CredentialStore, IdentityUpdate, NewEndpointGrant, NewIdentity, StoreError};
use crate::models::auth::{
    EndpointGrant, GrantId, Identity, IdentityId, IdentityWithPassword, Role, RoleGrants, RoleId,
};

#[derive(Debug, Clone)]
struct StoredIdentity {
    identity: Identity,
    password_hash: Option<String>,
    deleted: bool,
}

#[derive(Debug, Default)]
struct Inner {
    next_id: i64,
    identities: BTreeMap<i64, StoredIdentity>,
    roles: BTreeMap<i64, String>,
    grants: BTreeMap<i64, EndpointGrant>,
    user_roles: BTreeSet<(i64, i64)>,
    role_grants: BTreeSet<(i64, i64)>,
}

impl Inner {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn live(&self, id: i64) -> Option<&StoredIdentity> {
        self.identities.get(&id).filter(|s| !s.deleted)
    }

    fn role_names(&self, id: i64) -> Vec<String> {
        let mut names: Vec<String> = self
            .user_roles
            .iter()
            .filter(|(user, _)| *user == id)
            .filter_map(|(_, role)| self.roles.get(role).cloned())
            .collect();
        names.sort();
        names
    }

    fn with_roles(&self, stored: &StoredIdentity) -> IdentityWithPassword {
        let mut identity = stored.identity.clone();
        identity.roles = self.role_names(identity.id.0);
        IdentityWithPassword {
            identity,
            password_hash: stored.password_hash.clone(),
        }
    }

    fn find_live(&self, pred: impl Fn(&Identity) -> bool) -> Option<IdentityWithPassword> {
        self.identities
            .values()
            .find(|s| !s.deleted && pred(&s.identity))
            .map(|s| self.with_roles(s))
    }

    fn role_grants(&self, role_id: i64) -> Option<RoleGrants> {
        let name = self.roles.get(&role_id)?;
        let grants = self
            .role_grants
            .iter()
            .filter(|(role, _)| *role == role_id)
            .filter_map(|(_, grant)| self.grants.get(grant).cloned())
            .collect();
        Some(RoleGrants {
            role: Role {
                id: RoleId(role_id),
                name: name.clone(),
            },
            grants,
        })
    }

    fn role_id_by_name(&self, name: &str) -> Option<i64> {
        self.roles
            .iter()
            .find(|(_, n)| n.as_str() == name)
            .map(|(id, _)| *id)
    }
}

/// Credential store held entirely in memory.
#[derive(Debug)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// Empty store seeded with the `admin` and `user` roles.
    pub fn new() -> Self {
        let mut inner = Inner::default();
        for name in ["admin", "user"] {
            let id = inner.next_id();
            inner.roles.insert(id, name.to_string());
        }
        Self {
            inner: RwLock::new(inner),
        }
    }

    /// Create a role and return its ID.
    pub async fn add_role(&self, name: &str) -> RoleId {
        let mut inner = self.inner.write().await;
        if let Some(id) = inner.role_id_by_name(name) {
            return RoleId(id);
        }
        let id = inner.next_id();
        inner.roles.insert(id, name.to_string());
        RoleId(id)
    }

    /// Look up a role by name.
    pub async fn role_id(&self, name: &str) -> Option<RoleId> {
        self.inner.read().await.role_id_by_name(name).map(RoleId)
    }

    /// Attach a grant to a role.
    pub async fn grant(&self, role: RoleId, grant: GrantId) {
        self.inner.write().await.role_grants.insert((role.0, grant.0));
    }

    /// Detach a grant from a role.
    pub async fn revoke(&self, role: RoleId, grant: GrantId) {
        self.inner.write().await.role_grants.remove(&(role.0, grant.0));
    }

    /// Remove an identity from a role.
    pub async fn unassign_role(&self, id: IdentityId, role: RoleId) {
        self.inner.write().await.user_roles.remove(&(id.0, role.0));
    }

    /// Soft-delete an identity.
    pub async fn soft_delete(&self, id: IdentityId) {
        if let Some(stored) = self.inner.write().await.identities.get_mut(&id.0) {
            stored.deleted = true;
        }
    }
}

#[async_trait]
impl CredentialStore for MemoryStore {
    async fn identity_by_id(&self, id: IdentityId) -> Result<Option<Identity>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner.live(id.0).map(|s| inner.with_roles(s).identity))
    }

    async fn identity_by_login(
        &self,
        login_or_email: &str,
    ) -> Result<Option<IdentityWithPassword>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner
            .find_live(|i| i.login == login_or_email)
            .or_else(|| inner.find_live(|i| i.email == login_or_email)))
    }

    async fn identity_by_email(&self, email: &str) -> Result<Option<Identity>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner.find_live(|i| i.email == email).map(|r| r.identity))
    }

    async fn roles_with_grants(&self, id: IdentityId) -> Result<Vec<RoleGrants>, StoreError> {
        let inner = self.inner.read().await;
        if inner.live(id.0).is_none() {
            return Ok(Vec::new());
        }
        Ok(inner
            .user_roles
            .iter()
            .filter(|(user, _)| *user == id.0)
            .filter_map(|(_, role)| inner.role_grants(*role))
            .collect())
    }

    async fn create_identity(&self, new: NewIdentity) -> Result<Identity, StoreError> {
        let mut inner = self.inner.write().await;
        let taken = inner
            .find_live(|i| i.login == new.login || i.email == new.email)
            .is_some();
        if taken {
            return Err(StoreError::Conflict("login or email already exists".into()));
        }
        let id = inner.next_id();
        let identity = Identity {
            id: IdentityId(id),
            login: new.login,
            email: new.email,
            name: new.name,
            last_name: String::new(),
            provider: new.provider,
            provider_id: new.provider_id,
            active: new.active,
            last_login: None,
            roles: Vec::new(),
        };
        inner.identities.insert(
            id,
            StoredIdentity {
                identity: identity.clone(),
                password_hash: new.password_hash,
                deleted: false,
            },
        );
        Ok(identity)
    }

    async fn update_identity(
        &self,
        id: IdentityId,
        update: IdentityUpdate,
    ) -> Result<Identity, StoreError> {
        let mut inner = self.inner.write().await;
        if let Some(login) = &update.login {
            let clash = inner
                .find_live(|i| i.id != id && i.login == *login)
                .is_some();
            if clash {
                return Err(StoreError::Conflict("login already exists".into()));
            }
        }
        let stored = inner
            .identities
            .get_mut(&id.0)
            .filter(|s| !s.deleted)
            .ok_or_else(|| StoreError::NotFound(format!("identity {id}")))?;
        if let Some(login) = update.login {
            stored.identity.login = login;
        }
        if let Some(name) = update.name {
            stored.identity.name = name;
        }
        if let Some(active) = update.active {
            stored.identity.active = active;
        }
        let stored = stored.clone();
        Ok(inner.with_roles(&stored).identity)
    }

    async fn record_login(&self, id: IdentityId, at: DateTime<Utc>) -> Result<(), StoreError> {
        if let Some(stored) = self.inner.write().await.identities.get_mut(&id.0) {
            stored.identity.last_login = Some(at);
        }
        Ok(())
    }

    async fn assign_role(&self, id: IdentityId, role_name: &str) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        let role = inner
            .role_id_by_name(role_name)
            .ok_or_else(|| StoreError::NotFound(format!("role '{role_name}'")))?;
        inner.user_roles.insert((id.0, role));
        Ok(())
    }

    async fn list_grants(&self) -> Result<Vec<EndpointGrant>, StoreError> {
        Ok(self.inner.read().await.grants.values().cloned().collect())
    }

    async fn insert_grant(
        &self,
        grant: NewEndpointGrant,
    ) -> Result<Option<EndpointGrant>, StoreError> {
        let mut inner = self.inner.write().await;
        let exists = inner
            .grants
            .values()
            .any(|g| g.path == grant.path && g.method == grant.method);
        if exists {
            return Ok(None);
        }
        let id = inner.next_id();
        let record = EndpointGrant {
            id: GrantId(id),
            path: grant.path,
            method: grant.method,
            description: grant.description,
            hidden: grant.hidden,
            public: grant.public,
        };
        inner.grants.insert(id, record.clone());
        Ok(Some(record))
    }

    async fn role_grants(&self, role_id: RoleId) -> Result<RoleGrants, StoreError> {
        self.inner
            .read()
            .await
            .role_grants(role_id.0)
            .ok_or_else(|| StoreError::NotFound(format!("role {}", role_id.0)))
    }

    async fn replace_role_grants(
        &self,
        role_id: RoleId,
        grant_ids: &[GrantId],
    ) -> Result<RoleGrants, StoreError> {
        let mut inner = self.inner.write().await;
        if !inner.roles.contains_key(&role_id.0) {
            return Err(StoreError::NotFound(format!("role {}", role_id.0)));
        }
        inner.role_grants.retain(|(role, _)| *role != role_id.0);
        for grant in grant_ids {
            if inner.grants.contains_key(&grant.0) {
                inner.role_grants.insert((role_id.0, grant.0));
            }
        }
        inner
            .role_grants(role_id.0)
            .ok_or_else(|| StoreError::NotFound(format!("role {}", role_id.0)))
    }
}
