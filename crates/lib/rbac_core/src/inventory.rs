//! Endpoint inventory sync.
//!
//! Compares the routes an application actually mounts with the endpoint
//! grants registered in the store, and registers the missing ones with no
//! role attached.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::info;

use crate::models::auth::EndpointGrant;
use crate::store::{CredentialStore, NewEndpointGrant, StoreError, with_deadline};

/// A `(method, path template)` pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RouteRef {
    pub method: String,
    pub path: String,
}

impl RouteRef {
    pub fn new(method: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            path: path.into(),
        }
    }

    fn key(&self) -> (String, &str) {
        (self.method.to_ascii_uppercase(), self.path.as_str())
    }
}

impl From<&EndpointGrant> for RouteRef {
    fn from(grant: &EndpointGrant) -> Self {
        Self::new(grant.method.clone(), grant.path.clone())
    }
}

/// Result of comparing known routes with registered grants.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncReport {
    /// Known routes that already have a grant.
    pub existing: Vec<RouteRef>,
    /// Known routes with no grant registered.
    pub missing: Vec<RouteRef>,
}

/// Split `known` into routes that are registered and routes that are not.
/// Order of `known` is preserved; methods compare case-insensitively.
pub fn reconcile(known: &[RouteRef], registered: &[EndpointGrant]) -> SyncReport {
    let registered: HashSet<(String, &str)> = registered
        .iter()
        .map(|g| (g.method.to_ascii_uppercase(), g.path.as_str()))
        .collect();

    let mut report = SyncReport::default();
    let mut seen = HashSet::new();
    for route in known {
        let key = route.key();
        if !seen.insert(key.clone()) {
            continue;
        }
        if registered.contains(&key) {
            report.existing.push(route.clone());
        } else {
            report.missing.push(route.clone());
        }
    }
    report
}

/// Register every endpoint in `endpoints` that the store does not know yet.
/// Returns the endpoints actually added. Each store call gives up at
/// `deadline`.
pub async fn register_missing(
    store: &dyn CredentialStore,
    endpoints: &[RouteRef],
    deadline: Instant,
) -> Result<Vec<RouteRef>, StoreError> {
    let registered = with_deadline(deadline, store.list_grants()).await?;
    let report = reconcile(endpoints, &registered);

    let mut added = Vec::with_capacity(report.missing.len());
    for route in report.missing {
        let grant = NewEndpointGrant {
            path: route.path.clone(),
            method: route.method.to_ascii_uppercase(),
            description: String::new(),
            hidden: false,
            public: false,
        };
        // Another sync may have registered it since list_grants.
        if with_deadline(deadline, store.insert_grant(grant)).await?.is_some() {
            added.push(route);
        }
    }

    if !added.is_empty() {
        info!(count = added.len(), "registered missing endpoints");
    }
    Ok(added)
}
