//! RBAC API server binary.
//!
//! Loads the signing key pair, connects to PostgreSQL, runs migrations and
//! serves the API until interrupted.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use rbac_api::config::ApiConfig;
use rbac_core::auth::external::ExternalTokenVerifier;
use rbac_core::auth::jwt::{KeyPair, TokenCodec};
use rbac_core::store::postgres::PgCredentialStore;
use sqlx::postgres::PgPoolOptions;
use tracing::{error, info, warn};

/// CLI arguments. Anything not given here is read by `ApiConfig::from_env`.
#[derive(Parser, Debug)]
#[command(name = "rbac_server", about = "RBAC API server")]
struct Args {
    /// Address to listen on.
    #[arg(long, env = "BIND_ADDR")]
    bind_addr: Option<String>,

    /// PostgreSQL connection URL.
    #[arg(long, env = "DATABASE_URL")]
    database_url: Option<String>,

    /// Maximum number of database connections in the pool.
    #[arg(long, env = "DB_MAX_CONNECTIONS")]
    max_connections: Option<u32>,

    /// PEM-encoded RSA private key for signing session tokens.
    #[arg(long, env = "JWT_PRIVATE_KEY_PATH")]
    private_key: Option<PathBuf>,

    /// PEM-encoded RSA public key for verifying session tokens.
    #[arg(long, env = "JWT_PUBLIC_KEY_PATH")]
    public_key: Option<PathBuf>,

    /// PEM-encoded RSA public key of the external identity provider.
    #[arg(long, env = "EXTERNAL_PUBLIC_KEY_PATH")]
    external_public_key: Option<PathBuf>,
}

impl Args {
    fn apply(self, mut config: ApiConfig) -> ApiConfig {
        // PORT has already been folded into the env-derived address.
        if let Some(addr) = self.bind_addr
            && std::env::var_os("PORT").is_none()
        {
            config.bind_addr = addr;
        }
        if let Some(url) = self.database_url {
            config.database_url = url;
        }
        if let Some(n) = self.max_connections {
            config.db_max_connections = n;
        }
        if let Some(path) = self.private_key {
            config.private_key_path = path;
        }
        if let Some(path) = self.public_key {
            config.public_key_path = path;
        }
        if let Some(path) = self.external_public_key {
            config.external_public_key_path = Some(path);
        }
        config
    }
}

fn external_verifier(config: &ApiConfig) -> Result<ExternalTokenVerifier, Box<dyn std::error::Error>> {
    let verifier = ExternalTokenVerifier::new(
        config.external_audiences.clone(),
        config.external_issuers.clone(),
    );
    match &config.external_public_key_path {
        Some(path) => {
            let pem = std::fs::read(path)
                .map_err(|e| format!("cannot read external provider key at {}: {e}", path.display()))?;
            Ok(verifier.with_public_key_pem(&pem)?)
        }
        None => {
            warn!("EXTERNAL_PUBLIC_KEY_PATH not set; external token signatures are not verified");
            Ok(verifier)
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,rbac_api=debug,rbac_core=debug")),
        )
        .init();

    let config = Args::parse().apply(ApiConfig::from_env());

    info!(
        version = rbac_core::version(),
        bind_addr = %config.bind_addr,
        max_connections = config.db_max_connections,
        "starting rbac_server"
    );

    // Without a usable key pair the process must not serve requests.
    let keys = KeyPair::load(&config.private_key_path, &config.public_key_path).inspect_err(|e| {
        error!("cannot load signing keys: {e}");
    })?;
    let codec = TokenCodec::new(keys);
    codec.self_check().inspect_err(|e| {
        error!("signing key self-check failed: {e}");
    })?;

    let external = external_verifier(&config)?;

    let pool = PgPoolOptions::new()
        .max_connections(config.db_max_connections)
        .acquire_timeout(std::time::Duration::from_secs(30))
        .connect(&config.database_url)
        .await?;

    info!("running database migrations");
    rbac_api::migrate(&pool).await?;

    let store = Arc::new(PgCredentialStore::new(pool));
    let state = rbac_api::AppState::new(store, codec, external, config.clone());
    let app = rbac_api::router(state);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    info!(addr = %listener.local_addr()?, "REST API listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("cannot listen for shutdown signal: {e}");
                std::future::pending::<()>().await;
            }
            info!("shutting down");
        })
        .await?;

    Ok(())
}
