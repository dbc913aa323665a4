//! Identity resolver: maps login credentials to a verified identity.

use std::sync::Arc;

use chrono::Utc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::AuthError;
use super::external::{ExternalIdentity, ExternalTokenVerifier};
use super::password::verify_password;
use crate::models::auth::{Identity, PROVIDER_EXTERNAL};
use crate::store::{CredentialStore, IdentityUpdate, NewIdentity, StoreError, with_deadline};

/// Role assigned to identities created through external login.
pub const DEFAULT_ROLE: &str = "user";

/// Authenticates local and external logins against the credential store.
#[derive(Clone)]
pub struct IdentityResolver {
    store: Arc<dyn CredentialStore>,
    external: ExternalTokenVerifier,
    default_role: String,
}

impl IdentityResolver {
    pub fn new(
        store: Arc<dyn CredentialStore>,
        external: ExternalTokenVerifier,
        default_role: impl Into<String>,
    ) -> Self {
        Self {
            store,
            external,
            default_role: default_role.into(),
        }
    }

    /// Authenticate with login name (or email) and password. Store calls
    /// fail with [`StoreError::Timeout`] once `deadline` passes; the password
    /// check itself is not bounded.
    pub async fn login_local(
        &self,
        login: &str,
        password: &str,
        deadline: Instant,
    ) -> Result<Identity, AuthError> {
        let record = with_deadline(deadline, self.store.identity_by_login(login))
            .await?
            .ok_or(AuthError::NotFound)?;

        let Some(hash) = record.password_hash else {
            debug!(identity_id = %record.identity.id, "identity has no local password");
            return Err(AuthError::InvalidCredentials);
        };

        // bcrypt at cost 14 takes long enough to stall a runtime worker.
        let password = password.to_string();
        let matched = tokio::task::spawn_blocking(move || verify_password(&password, &hash))
            .await
            .map_err(|e| AuthError::Internal(format!("password check task: {e}")))?;
        if !matched {
            return Err(AuthError::InvalidCredentials);
        }

        if !record.identity.active {
            debug!(identity_id = %record.identity.id, "inactive identity attempted login");
            return Err(AuthError::InvalidCredentials);
        }

        let mut identity = record.identity;
        let now = Utc::now();
        with_deadline(deadline, self.store.record_login(identity.id, now)).await?;
        identity.last_login = Some(now);
        info!(identity_id = %identity.id, "local login");
        Ok(identity)
    }

    /// Authenticate with an external identity token, creating the local
    /// identity on first use. Store calls give up at `deadline`.
    pub async fn login_external(
        &self,
        id_token: &str,
        deadline: Instant,
    ) -> Result<Identity, AuthError> {
        if id_token.trim().is_empty() {
            return Err(AuthError::MalformedRequest("id_token required".into()));
        }

        let external = self.external.verify(id_token).inspect_err(|e| {
            warn!("external token rejected: {e}");
        })?;

        let existing = with_deadline(deadline, self.store.identity_by_email(&external.email)).await?;
        let identity = match existing {
            Some(existing) => self.sync_existing(existing, &external, deadline).await?,
            None => self.create_from_external(&external, deadline).await?,
        };

        if !identity.active {
            debug!(identity_id = %identity.id, "inactive identity attempted external login");
            return Err(AuthError::InvalidCredentials);
        }

        with_deadline(deadline, self.store.record_login(identity.id, Utc::now())).await?;
        let identity = with_deadline(deadline, self.store.identity_by_id(identity.id))
            .await?
            .ok_or(AuthError::NotFound)?;
        info!(identity_id = %identity.id, "external login");
        Ok(identity)
    }

    async fn sync_existing(
        &self,
        existing: Identity,
        external: &ExternalIdentity,
        deadline: Instant,
    ) -> Result<Identity, AuthError> {
        let mut update = IdentityUpdate::default();
        if !external.name.is_empty() && existing.name != external.name {
            update.name = Some(external.name.clone());
        }
        if existing.login.is_empty() {
            update.login = Some(external.email.clone());
        }

        let identity = if update.name.is_some() || update.login.is_some() {
            with_deadline(deadline, self.store.update_identity(existing.id, update)).await?
        } else {
            existing
        };

        if identity.roles.is_empty() {
            self.assign_default_role(&identity, deadline).await?;
        }
        Ok(identity)
    }

    async fn create_from_external(
        &self,
        external: &ExternalIdentity,
        deadline: Instant,
    ) -> Result<Identity, AuthError> {
        let new = NewIdentity {
            login: external.email.clone(),
            email: external.email.clone(),
            name: external.name.clone(),
            password_hash: None,
            provider: PROVIDER_EXTERNAL.to_string(),
            provider_id: Some(external.subject.clone()),
            active: true,
        };

        let identity = match with_deadline(deadline, self.store.create_identity(new)).await {
            Ok(identity) => {
                info!(identity_id = %identity.id, "created identity from external login");
                identity
            }
            // Lost a race with a concurrent first login for the same email.
            Err(StoreError::Conflict(_)) => {
                with_deadline(deadline, self.store.identity_by_email(&external.email))
                    .await?
                    .ok_or(AuthError::NotFound)?
            }
            Err(e) => return Err(e.into()),
        };

        self.assign_default_role(&identity, deadline).await?;
        Ok(identity)
    }

    async fn assign_default_role(
        &self,
        identity: &Identity,
        deadline: Instant,
    ) -> Result<(), AuthError> {
        match with_deadline(deadline, self.store.assign_role(identity.id, &self.default_role)).await {
            Ok(()) => Ok(()),
            Err(StoreError::NotFound(what)) => {
                warn!(identity_id = %identity.id, "default role unavailable: {what}");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}
