//! # rbac_core
//!
//! Authentication and authorization core: session tokens, identity
//! resolution, endpoint authorization and the credential store.

pub mod auth;
pub mod authz;
pub mod inventory;
pub mod migrate;
pub mod models;
pub mod store;

#[cfg(test)]
mod test_support;

/// Returns the crate version.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
