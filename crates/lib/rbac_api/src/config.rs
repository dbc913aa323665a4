//! API server configuration.

use std::path::PathBuf;
use std::time::Duration;

/// Origins always allowed by CORS, in addition to `ALLOWED_ORIGINS`.
pub const DEFAULT_ORIGINS: &[&str] = &[
    "http://localhost:3000",
    "http://localhost:5173",
    "http://127.0.0.1:3000",
    "http://127.0.0.1:5173",
];

/// Configuration for the API server.
#[derive(Clone, Debug)]
pub struct ApiConfig {
    /// Address to bind the HTTP listener (e.g. "0.0.0.0:8229").
    pub bind_addr: String,
    /// PostgreSQL connection URL.
    pub database_url: String,
    pub db_max_connections: u32,
    /// PEM-encoded RSA private key used to sign session tokens.
    pub private_key_path: PathBuf,
    /// PEM-encoded RSA public key used to verify session tokens.
    pub public_key_path: PathBuf,
    /// CORS origins, defaults first.
    pub allowed_origins: Vec<String>,
    /// Accepted `aud` values of external identity tokens.
    pub external_audiences: Vec<String>,
    /// Accepted `iss` values of external identity tokens.
    pub external_issuers: Vec<String>,
    /// Provider public key; without it external token signatures are not checked.
    pub external_public_key_path: Option<PathBuf>,
    /// Role given to identities created by external login.
    pub default_role: String,
    /// Deadline for credential store reads made while authorizing a request.
    pub store_timeout: Duration,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8229".into(),
            database_url: "postgres://localhost:5432/rbac".into(),
            db_max_connections: 5,
            private_key_path: PathBuf::from("./private.rsa"),
            public_key_path: PathBuf::from("./public.rsa.pub"),
            allowed_origins: DEFAULT_ORIGINS.iter().map(|s| s.to_string()).collect(),
            external_audiences: Vec::new(),
            external_issuers: Vec::new(),
            external_public_key_path: None,
            default_role: rbac_core::auth::resolver::DEFAULT_ROLE.into(),
            store_timeout: Duration::from_millis(5000),
        }
    }
}

impl ApiConfig {
    /// Reads configuration from environment variables with sensible defaults.
    ///
    /// | Variable                   | Default                          |
    /// |----------------------------|----------------------------------|
    /// | `BIND_ADDR`                | `0.0.0.0:8229` (`PORT` overrides the port) |
    /// | `DATABASE_URL`             | `postgres://localhost:5432/rbac` |
    /// | `DB_MAX_CONNECTIONS`       | `5`                              |
    /// | `JWT_PRIVATE_KEY_PATH`     | `./private.rsa`                  |
    /// | `JWT_PUBLIC_KEY_PATH`      | `./public.rsa.pub`               |
    /// | `ALLOWED_ORIGINS`          | localhost dev origins            |
    /// | `EXTERNAL_AUDIENCES`       | none                             |
    /// | `EXTERNAL_ISSUERS`         | none                             |
    /// | `EXTERNAL_PUBLIC_KEY_PATH` | unset                            |
    /// | `DEFAULT_ROLE`             | `user`                           |
    /// | `STORE_TIMEOUT_MS`         | `5000`                           |
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from an arbitrary variable source.
    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();

        let mut bind_addr = get("BIND_ADDR").unwrap_or(defaults.bind_addr);
        if let Some(port) = get("PORT").filter(|p| !p.trim().is_empty()) {
            bind_addr = with_port(&bind_addr, port.trim());
        }

        let mut allowed_origins = defaults.allowed_origins;
        for origin in split_list(get("ALLOWED_ORIGINS")) {
            if !allowed_origins.contains(&origin) {
                allowed_origins.push(origin);
            }
        }

        Self {
            bind_addr,
            database_url: get("DATABASE_URL").unwrap_or(defaults.database_url),
            db_max_connections: get("DB_MAX_CONNECTIONS")
                .and_then(|v| v.trim().parse().ok())
                .unwrap_or(defaults.db_max_connections),
            private_key_path: get("JWT_PRIVATE_KEY_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.private_key_path),
            public_key_path: get("JWT_PUBLIC_KEY_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.public_key_path),
            allowed_origins,
            external_audiences: split_list(get("EXTERNAL_AUDIENCES")),
            external_issuers: split_list(get("EXTERNAL_ISSUERS")),
            external_public_key_path: get("EXTERNAL_PUBLIC_KEY_PATH")
                .filter(|p| !p.trim().is_empty())
                .map(PathBuf::from),
            default_role: get("DEFAULT_ROLE")
                .filter(|r| !r.trim().is_empty())
                .unwrap_or(defaults.default_role),
            store_timeout: get("STORE_TIMEOUT_MS")
                .and_then(|v| v.trim().parse().ok())
                .map(Duration::from_millis)
                .unwrap_or(defaults.store_timeout),
        }
    }
}

/// Splits a comma-separated list, dropping blanks.
pub fn split_list(value: Option<String>) -> Vec<String> {
    value
        .unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

fn with_port(bind_addr: &str, port: &str) -> String {
    match bind_addr.rsplit_once(':') {
        Some((host, _)) => format!("{host}:{port}"),
        None => format!("{bind_addr}:{port}"),
    }
}
