//! # rbac_api
//!
//! HTTP API library for the RBAC service.

pub mod config;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod routes;

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::http::{HeaderValue, Method, header};
use axum::routing::{get, post};
use rbac_core::auth::external::ExternalTokenVerifier;
use rbac_core::auth::jwt::TokenCodec;
use rbac_core::auth::resolver::IdentityResolver;
use rbac_core::authz::AuthorizationEngine;
use rbac_core::store::CredentialStore;
use sqlx::PgPool;
use tokio::time::Instant;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::warn;

use crate::config::ApiConfig;
use crate::handlers::{apis, auth, health, me, roles};

/// Shared application state passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn CredentialStore>,
    pub codec: TokenCodec,
    pub resolver: IdentityResolver,
    pub engine: AuthorizationEngine,
    /// API configuration.
    pub config: ApiConfig,
}

impl AppState {
    /// Wires the resolver and authorization engine to `store`.
    pub fn new(
        store: Arc<dyn CredentialStore>,
        codec: TokenCodec,
        external: ExternalTokenVerifier,
        config: ApiConfig,
    ) -> Self {
        Self {
            resolver: IdentityResolver::new(store.clone(), external, config.default_role.clone()),
            engine: AuthorizationEngine::new(store.clone()),
            store,
            codec,
            config,
        }
    }

    /// Deadline for the store calls made while serving one request.
    pub fn store_deadline(&self) -> Instant {
        Instant::now() + self.config.store_timeout
    }
}

/// Run embedded database migrations.
///
/// Delegates to `rbac_core::migrate::migrate()` which owns the migration files.
pub async fn migrate(pool: &PgPool) -> Result<(), sqlx::migrate::MigrateError> {
    rbac_core::migrate::migrate(pool).await
}

fn cors_layer(config: &ApiConfig) -> CorsLayer {
    let origins: Vec<HeaderValue> = config
        .allowed_origins
        .iter()
        .filter_map(|origin| {
            origin
                .parse::<HeaderValue>()
                .inspect_err(|_| warn!("ignoring invalid CORS origin {origin:?}"))
                .ok()
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::PATCH,
            Method::OPTIONS,
        ])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE, header::ACCEPT])
        .allow_credentials(true)
        .max_age(Duration::from_secs(300))
}

/// Builds the Axum router with all routes and shared state.
pub fn router(state: AppState) -> Router {
    // Public routes (no session required)
    let public = Router::new()
        .route(routes::POST_LOGIN, post(auth::login_handler))
        .route(routes::POST_LOGIN_EXTERNAL, post(auth::external_login_handler))
        .route(routes::GET_REFRESH, get(auth::refresh_handler))
        .route(routes::GET_AUTH_CHECK, get(auth::auth_check_handler))
        .route(routes::GET_HEALTH, get(health::health));

    // Protected routes: session first, then endpoint authorization.
    let protected = Router::new()
        .route(routes::GET_ME, get(me::me_handler))
        .route(routes::GET_ME_PERMISSIONS, get(me::permissions_handler))
        .route(
            routes::APIS_SYNC,
            get(apis::sync_report_handler).post(apis::register_missing_handler),
        )
        .route(
            routes::ROLES_ID_APIS,
            get(roles::role_apis_handler).put(roles::replace_role_apis_handler),
        )
        .route_layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::authorize::authorize_endpoint,
        ))
        .route_layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::auth::require_session,
        ));

    Router::new()
        .merge(public)
        .merge(protected)
        .layer(cors_layer(&state.config))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
