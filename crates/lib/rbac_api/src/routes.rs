//! Route paths mounted by [`crate::router`].
//!
//! Protected templates double as the endpoint inventory: they are the paths
//! that must have endpoint grants for anyone to reach them.

pub const POST_LOGIN: &str = "/login";
pub const POST_LOGIN_EXTERNAL: &str = "/login/external";
pub const GET_REFRESH: &str = "/refresh";
pub const GET_AUTH_CHECK: &str = "/auth/check";
pub const GET_HEALTH: &str = "/health";

pub const GET_ME: &str = "/me";
pub const GET_ME_PERMISSIONS: &str = "/me/permissions";
pub const APIS_SYNC: &str = "/apis/sync";
pub const ROLES_ID_APIS: &str = "/roles/{id}/apis";

/// Every `(method, template)` pair the router mounts behind authorization.
pub const PROTECTED: &[(&str, &str)] = &[
    ("GET", GET_ME),
    ("GET", GET_ME_PERMISSIONS),
    ("GET", APIS_SYNC),
    ("POST", APIS_SYNC),
    ("GET", ROLES_ID_APIS),
    ("PUT", ROLES_ID_APIS),
];

/// Every `(method, template)` pair the router mounts without a session.
pub const PUBLIC: &[(&str, &str)] = &[
    ("POST", POST_LOGIN),
    ("POST", POST_LOGIN_EXTERNAL),
    ("GET", GET_REFRESH),
    ("GET", GET_AUTH_CHECK),
    ("GET", GET_HEALTH),
];

/// Protected routes followed by public routes.
pub fn all() -> impl Iterator<Item = (&'static str, &'static str)> {
    PROTECTED.iter().chain(PUBLIC).copied()
}
