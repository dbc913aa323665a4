//! Authentication and authorization domain models.
//!
//! These are the records the credential store hands out and the claim set
//! embedded in session tokens.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Numeric identity (user) ID.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IdentityId(pub i64);

impl std::fmt::Display for IdentityId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Numeric role ID.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoleId(pub i64);

/// Numeric endpoint grant ID.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GrantId(pub i64);

/// Provider name for identities with a local password.
pub const PROVIDER_LOCAL: &str = "local";

/// Provider name for identities created from an external identity token.
pub const PROVIDER_EXTERNAL: &str = "external";

/// Domain identity (user account), never carrying a password hash.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Identity {
    pub id: IdentityId,
    /// Unique login name.
    pub login: String,
    pub email: String,
    pub name: String,
    #[serde(default)]
    pub last_name: String,
    pub provider: String,
    #[serde(default)]
    pub provider_id: Option<String>,
    pub active: bool,
    #[serde(default)]
    pub last_login: Option<DateTime<Utc>>,
    /// Role names at read time. Informational only; authorization always
    /// re-reads grants from the store.
    #[serde(default)]
    pub roles: Vec<String>,
}

/// Identity plus stored password hash (for local login only).
#[derive(Debug, Clone)]
pub struct IdentityWithPassword {
    pub identity: Identity,
    pub password_hash: Option<String>,
}

/// A role.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Role {
    pub id: RoleId,
    pub name: String,
}

/// "HTTP method `method` on path template `path` is permitted."
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointGrant {
    pub id: GrantId,
    /// Path template, e.g. `/users/{id}`.
    pub path: String,
    /// HTTP method, compared case-insensitively.
    pub method: String,
    #[serde(default)]
    pub description: String,
    /// Advisory only.
    #[serde(default)]
    pub hidden: bool,
    /// Advisory only.
    #[serde(default)]
    pub public: bool,
}

/// A role together with the grants currently attached to it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleGrants {
    pub role: Role,
    pub grants: Vec<EndpointGrant>,
}

/// Issuer written into every session token.
pub const TOKEN_ISSUER: &str = "RBAC";

/// Claims embedded in session tokens.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionClaims {
    /// Identity snapshot at issuance time. May be stale.
    pub user: Identity,
    /// Issuer (always [`TOKEN_ISSUER`]).
    pub iss: String,
    /// Issued at (unix timestamp).
    pub iat: i64,
    /// Expiry (unix timestamp).
    pub exp: i64,
}

impl SessionClaims {
    /// ID of the identity the token was issued to.
    pub fn identity_id(&self) -> IdentityId {
        self.user.id
    }
}
