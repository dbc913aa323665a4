//! Password hashing via bcrypt.

use tracing::warn;

use super::AuthError;

/// bcrypt cost factor for stored passwords.
pub const BCRYPT_COST: u32 = 14;

/// Hash a password with bcrypt (cost 14).
pub fn hash_password(password: &str) -> Result<String, AuthError> {
    hash_password_with_cost(password, BCRYPT_COST)
}

/// Hash a password with an explicit bcrypt cost.
pub fn hash_password_with_cost(password: &str, cost: u32) -> Result<String, AuthError> {
    bcrypt::hash(password, cost).map_err(|e| AuthError::Internal(format!("bcrypt hash: {e}")))
}

/// Verify a password against a bcrypt hash.
///
/// A stored value that is not a bcrypt hash never matches.
pub fn verify_password(password: &str, hash: &str) -> bool {
    match bcrypt::verify(password, hash) {
        Ok(matched) => matched,
        Err(e) => {
            warn!("stored password hash is unusable: {e}");
            false
        }
    }
}
