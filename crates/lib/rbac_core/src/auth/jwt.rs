//! Session token issuance and verification (RS256).
//!
//! Tokens are self-contained: there is no server-side revocation, a token
//! simply stops verifying once its expiry has passed.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use thiserror::Error;
use tracing::error;

use crate::models::auth::{Identity, IdentityId, PROVIDER_LOCAL, SessionClaims, TOKEN_ISSUER};

/// Session token lifetime: 1 hour.
pub const TOKEN_LIFETIME_SECS: i64 = 60 * 60;

/// Errors loading the signing key pair. Always fatal at startup.
#[derive(Debug, Error)]
pub enum KeyError {
    #[error("cannot read {kind} key at {}: {source}", path.display())]
    Unreadable {
        kind: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot parse {kind} key: {source}")]
    Unparsable {
        kind: &'static str,
        #[source]
        source: jsonwebtoken::errors::Error,
    },
}

/// Session token failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TokenError {
    #[error("token expired")]
    Expired,

    #[error("invalid token signature")]
    InvalidSignature,

    #[error("malformed token: {0}")]
    Malformed(String),

    #[error("token signing failed: {0}")]
    Signing(String),

    #[error("token rejected: {0}")]
    Other(String),
}

impl From<jsonwebtoken::errors::Error> for TokenError {
    fn from(e: jsonwebtoken::errors::Error) -> Self {
        match e.kind() {
            ErrorKind::ExpiredSignature => TokenError::Expired,
            ErrorKind::InvalidSignature => TokenError::InvalidSignature,
            ErrorKind::InvalidToken
            | ErrorKind::Base64(_)
            | ErrorKind::Json(_)
            | ErrorKind::Utf8(_)
            | ErrorKind::InvalidIssuer
            | ErrorKind::MissingRequiredClaim(_)
            | ErrorKind::InvalidAlgorithm
            | ErrorKind::InvalidAlgorithmName => TokenError::Malformed(e.to_string()),
            _ => TokenError::Other(e.to_string()),
        }
    }
}

/// RSA key pair used to sign and verify session tokens.
pub struct KeyPair {
    encoding: EncodingKey,
    decoding: DecodingKey,
}

impl KeyPair {
    /// Parse a PEM-encoded RSA private key and public key.
    pub fn from_pem(private_pem: &[u8], public_pem: &[u8]) -> Result<Self, KeyError> {
        let encoding =
            EncodingKey::from_rsa_pem(private_pem).map_err(|source| KeyError::Unparsable {
                kind: "private",
                source,
            })?;
        let decoding =
            DecodingKey::from_rsa_pem(public_pem).map_err(|source| KeyError::Unparsable {
                kind: "public",
                source,
            })?;
        Ok(Self { encoding, decoding })
    }

    /// Read and parse both keys from disk.
    pub fn load(private_path: &Path, public_path: &Path) -> Result<Self, KeyError> {
        let private_pem = read_key("private", private_path)?;
        let public_pem = read_key("public", public_path)?;
        Self::from_pem(&private_pem, &public_pem)
    }
}

fn read_key(kind: &'static str, path: &Path) -> Result<Vec<u8>, KeyError> {
    std::fs::read(path).map_err(|source| KeyError::Unreadable {
        kind,
        path: path.to_path_buf(),
        source,
    })
}

/// Issues, verifies and refreshes session tokens.
///
/// Cheap to clone; the key pair is shared and never mutated after load.
#[derive(Clone)]
pub struct TokenCodec {
    keys: Arc<KeyPair>,
}

impl TokenCodec {
    pub fn new(keys: KeyPair) -> Self {
        Self {
            keys: Arc::new(keys),
        }
    }

    /// Issue a token for `identity`, valid for one hour from now.
    pub fn issue(&self, identity: &Identity) -> Result<String, TokenError> {
        self.issue_at(identity, Utc::now())
    }

    /// Issue a token as if the current time were `now`.
    pub fn issue_at(&self, identity: &Identity, now: DateTime<Utc>) -> Result<String, TokenError> {
        let claims = SessionClaims {
            user: identity.clone(),
            iss: TOKEN_ISSUER.to_string(),
            iat: now.timestamp(),
            exp: expiry_from(now),
        };
        self.sign(&claims)
    }

    /// Verify signature, issuer and expiry, returning the claims.
    pub fn verify(&self, token: &str) -> Result<SessionClaims, TokenError> {
        self.verify_at(token, Utc::now())
    }

    /// Verify as if the current time were `now`. A token is valid while
    /// `now < exp`.
    pub fn verify_at(&self, token: &str, now: DateTime<Utc>) -> Result<SessionClaims, TokenError> {
        let mut validation = Validation::new(Algorithm::RS256);
        // Expiry is checked below against the supplied clock, without leeway.
        validation.validate_exp = false;
        validation.set_issuer(&[TOKEN_ISSUER]);
        validation.set_required_spec_claims(&["exp", "iss"]);

        let claims = decode::<SessionClaims>(token, &self.keys.decoding, &validation)?.claims;
        if now.timestamp() >= claims.exp {
            return Err(TokenError::Expired);
        }
        Ok(claims)
    }

    /// Re-issue a currently valid token with a fresh one hour expiry.
    pub fn refresh(&self, token: &str) -> Result<String, TokenError> {
        self.refresh_at(token, Utc::now())
    }

    /// Refresh as if the current time were `now`. Expired or tampered tokens
    /// are rejected; the claims of the verified token are carried over with
    /// only the expiry replaced.
    ///
    /// `exp` has second granularity: the new expiry is at least one second
    /// past the old one, even when refreshing within the issuing second.
    pub fn refresh_at(&self, token: &str, now: DateTime<Utc>) -> Result<String, TokenError> {
        let mut claims = self.verify_at(token, now)?;
        claims.exp = expiry_from(now).max(claims.exp + 1);
        self.sign(&claims)
    }

    /// Sign and verify a throwaway token, proving the key pair belongs
    /// together. Run once at startup.
    pub fn self_check(&self) -> Result<(), TokenError> {
        let probe = Identity {
            id: IdentityId(0),
            login: "probe".into(),
            email: "probe@localhost".into(),
            name: "probe".into(),
            last_name: String::new(),
            provider: PROVIDER_LOCAL.into(),
            provider_id: None,
            active: false,
            last_login: None,
            roles: Vec::new(),
        };
        let token = self.issue(&probe)?;
        self.verify(&token).map(|_| ())
    }

    fn sign(&self, claims: &SessionClaims) -> Result<String, TokenError> {
        encode(&Header::new(Algorithm::RS256), claims, &self.keys.encoding).map_err(|e| {
            error!(identity_id = %claims.user.id, "token signing failed: {e}");
            TokenError::Signing(e.to_string())
        })
    }
}

/// Unix timestamp one token lifetime after `now`.
pub fn expiry_from(now: DateTime<Utc>) -> i64 {
    (now + Duration::seconds(TOKEN_LIFETIME_SECS)).timestamp()
}
