//! Validation of identity tokens issued by an external (federated) provider.
//!
//! Claims are decoded into [`ExternalClaims`] and checked one by one; the
//! first failing check is reported as an [`ExternalTokenError`] variant.
//! When the provider's public key is configured the RS256 signature is
//! verified as well, otherwise only the token structure is decoded.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode};
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, warn};

use super::jwt::KeyError;

/// How far in the future `iat` may lie before a token is rejected.
pub const ISSUED_AT_TOLERANCE_SECS: i64 = 5 * 60;

/// Maximum age of the provider-side authentication (`auth_time`).
pub const MAX_AUTH_AGE_SECS: i64 = 60 * 60;

/// External token validation failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExternalTokenError {
    #[error("token could not be decoded: {0}")]
    Undecodable(String),

    #[error("token signature is invalid")]
    BadSignature,

    #[error("missing audience claim")]
    MissingAudience,

    #[error("audience not allowed: {0}")]
    AudienceNotAllowed(String),

    #[error("missing issuer claim")]
    MissingIssuer,

    #[error("issuer not allowed: {0}")]
    IssuerNotAllowed(String),

    #[error("missing expiration claim")]
    MissingExpiry,

    #[error("token expired at {0}")]
    Expired(i64),

    #[error("missing issued-at claim")]
    MissingIssuedAt,

    #[error("token issued too far in the future ({0})")]
    IssuedInFuture(i64),

    #[error("missing or empty subject claim")]
    MissingSubject,

    #[error("missing or empty email claim")]
    MissingEmail,

    #[error("authentication too old (auth_time {0})")]
    AuthTimeTooOld(i64),
}

/// `aud` may be a single string or a list.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum Audience {
    One(String),
    Many(Vec<String>),
}

impl Audience {
    fn values(&self) -> Vec<&str> {
        match self {
            Audience::One(a) => vec![a.as_str()],
            Audience::Many(list) => list.iter().map(String::as_str).collect(),
        }
    }
}

/// Provider-specific nested claims.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProviderClaims {
    pub sign_in_provider: Option<String>,
}

/// Claims of an external identity token. Every field is optional at decode
/// time so that absence is reported by the matching check.
#[derive(Debug, Clone, Deserialize)]
pub struct ExternalClaims {
    pub aud: Option<Audience>,
    pub iss: Option<String>,
    pub exp: Option<i64>,
    pub iat: Option<i64>,
    pub sub: Option<String>,
    pub email: Option<String>,
    pub email_verified: Option<bool>,
    pub auth_time: Option<i64>,
    pub name: Option<String>,
    pub firebase: Option<ProviderClaims>,
}

/// Identity attributes from a validated external token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExternalIdentity {
    pub subject: String,
    pub email: String,
    pub name: String,
    pub email_verified: bool,
}

/// Checks external identity tokens against allow-listed audiences and issuers.
#[derive(Clone)]
pub struct ExternalTokenVerifier {
    audiences: Vec<String>,
    issuers: Vec<String>,
    key: Option<DecodingKey>,
}

impl ExternalTokenVerifier {
    pub fn new(audiences: Vec<String>, issuers: Vec<String>) -> Self {
        Self {
            audiences,
            issuers,
            key: None,
        }
    }

    /// Also verify signatures against the provider's RSA public key.
    pub fn with_public_key_pem(mut self, pem: &[u8]) -> Result<Self, KeyError> {
        let key = DecodingKey::from_rsa_pem(pem).map_err(|source| KeyError::Unparsable {
            kind: "external provider",
            source,
        })?;
        self.key = Some(key);
        Ok(self)
    }

    pub fn verify(&self, token: &str) -> Result<ExternalIdentity, ExternalTokenError> {
        self.verify_at(token, Utc::now())
    }

    /// Validate as if the current time were `now`.
    pub fn verify_at(
        &self,
        token: &str,
        now: DateTime<Utc>,
    ) -> Result<ExternalIdentity, ExternalTokenError> {
        let claims = self.decode(token)?;
        let now = now.timestamp();

        debug!(
            aud = ?claims.aud,
            iss = ?claims.iss,
            sub = ?claims.sub,
            "validating external token"
        );

        let aud = claims.aud.as_ref().ok_or(ExternalTokenError::MissingAudience)?;
        let audiences = aud.values();
        if !audiences.iter().any(|a| self.audiences.iter().any(|ok| ok == a)) {
            return Err(ExternalTokenError::AudienceNotAllowed(audiences.join(",")));
        }

        let iss = claims.iss.as_deref().ok_or(ExternalTokenError::MissingIssuer)?;
        if !self.issuers.iter().any(|ok| ok == iss) {
            return Err(ExternalTokenError::IssuerNotAllowed(iss.to_string()));
        }

        let exp = claims.exp.ok_or(ExternalTokenError::MissingExpiry)?;
        if now > exp {
            return Err(ExternalTokenError::Expired(exp));
        }

        let iat = claims.iat.ok_or(ExternalTokenError::MissingIssuedAt)?;
        if now < iat - ISSUED_AT_TOLERANCE_SECS {
            return Err(ExternalTokenError::IssuedInFuture(iat));
        }

        let subject = non_empty(claims.sub).ok_or(ExternalTokenError::MissingSubject)?;
        let email = non_empty(claims.email).ok_or(ExternalTokenError::MissingEmail)?;

        let email_verified = match claims.email_verified {
            Some(v) => v,
            None => {
                warn!(sub = %subject, "email_verified claim missing, assuming verified");
                true
            }
        };
        if !email_verified {
            warn!(sub = %subject, "external identity email is not verified");
        }

        match claims.auth_time {
            Some(auth_time) if auth_time < now - MAX_AUTH_AGE_SECS => {
                return Err(ExternalTokenError::AuthTimeTooOld(auth_time));
            }
            Some(_) => {}
            None => warn!(sub = %subject, "auth_time claim missing"),
        }

        if let Some(provider) = claims.firebase.and_then(|f| f.sign_in_provider) {
            debug!(sub = %subject, provider = %provider, "external sign-in provider");
        }

        Ok(ExternalIdentity {
            subject,
            email,
            name: claims.name.unwrap_or_default(),
            email_verified,
        })
    }

    fn decode(&self, token: &str) -> Result<ExternalClaims, ExternalTokenError> {
        let mut validation = Validation::new(Algorithm::RS256);
        // All claim checks happen in `verify_at`.
        validation.validate_exp = false;
        validation.validate_aud = false;
        validation.required_spec_claims = HashSet::new();

        let result = match &self.key {
            Some(key) => decode::<ExternalClaims>(token, key, &validation),
            None => {
                validation.insecure_disable_signature_validation();
                decode::<ExternalClaims>(token, &DecodingKey::from_secret(&[]), &validation)
            }
        };
        result.map(|data| data.claims).map_err(|e| match e.kind() {
            jsonwebtoken::errors::ErrorKind::InvalidSignature => ExternalTokenError::BadSignature,
            _ => ExternalTokenError::Undecodable(e.to_string()),
        })
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}
