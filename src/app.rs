use std::sync::Arc;

use axum::{
    middleware::from_fn_with_state,
    routing::{get, post},
    Router,
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::config::AppConfig;
use crate::database::probe::PgProbe;
use crate::database::registry::AliasRegistry;
use crate::handlers;
use crate::middleware::{jwt_auth_middleware, tenant_context_middleware};
use crate::services::{HttpDirectoryClient, SecretDecryptor, TenantResolver};

/// Shared by every request
#[derive(Clone)]
pub struct AppState {
    pub resolver: Arc<TenantResolver>,
    pub jwt_secret: Arc<str>,
}

impl AppState {
    pub fn new(resolver: Arc<TenantResolver>, jwt_secret: impl Into<Arc<str>>) -> Self {
        Self {
            resolver,
            jwt_secret: jwt_secret.into(),
        }
    }

    /// Wire the production collaborators. Fails when the JWT secret, the
    /// encryption key or the accounts service URL is unusable.
    pub fn from_config(config: &AppConfig) -> anyhow::Result<Self> {
        anyhow::ensure!(
            !config.security.jwt_secret.trim().is_empty(),
            "JWT_SECRET is not configured"
        );
        let decryptor = SecretDecryptor::from_key(config.security.db_encryption_key.as_deref())?;
        let directory = HttpDirectoryClient::new(&config.directory)?;
        let probe = PgProbe::new(config.database.probe_timeout());

        let resolver = TenantResolver::new(
            Arc::new(AliasRegistry::new()),
            Arc::new(directory),
            Arc::new(decryptor),
            Arc::new(probe),
            config.database.clone(),
        );

        Ok(Self::new(Arc::new(resolver), config.security.jwt_secret.as_str()))
    }

    pub fn registry(&self) -> &Arc<AliasRegistry> {
        self.resolver.registry()
    }
}

pub fn router(state: AppState, config: &AppConfig) -> Router {
    let mut app = Router::new()
        // Public
        .route("/", get(handlers::root))
        .route("/health", get(handlers::health))
        .route("/register_db", post(handlers::public::register_db))
        // Protected, routed to the caller's tenant database
        .merge(tenant_routes(state.clone()))
        .with_state(state);

    if config.security.enable_cors {
        app = app.layer(CorsLayer::permissive());
    }
    app.layer(TraceLayer::new_for_http())
}

/// Routes behind JWT auth and tenant resolution
pub fn tenant_routes(state: AppState) -> Router<AppState> {
    use handlers::protected::tenant;

    Router::new()
        .route("/api/tenant", get(tenant::tenant_show))
        .route("/api/tenant/ping", get(tenant::tenant_ping))
        .route("/api/tenant/refresh", post(tenant::tenant_refresh))
        // Layers run bottom-up: auth first, then tenant resolution
        .layer(from_fn_with_state(state.clone(), tenant_context_middleware))
        .layer(from_fn_with_state(state, jwt_auth_middleware))
}
