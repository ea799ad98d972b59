use std::net::SocketAddr;
use std::sync::Arc;

use axum::{extract::State, middleware, routing::get, Router};
use metrics_exporter_prometheus::PrometheusHandle;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod api;
mod auth;
mod config;
mod db;
mod metrics;
mod models;
mod services;
mod utils;

use crate::auth::jwt::JwtManager;
use crate::auth::password::PasswordHasher;
use crate::auth::rate_limit::{RateLimitConfig, RateLimiterState};
use crate::config::AppConfig;
use crate::db::{MemoryStore, PgStore, Store};
use crate::services::{AccountService, ArticleService, ReferralService};

pub struct AppState {
    pub config: AppConfig,
    pub store: Arc<dyn Store>,
    pub jwt: JwtManager,
    pub account_service: Arc<AccountService>,
    pub article_service: Arc<ArticleService>,
    pub referral_service: Arc<ReferralService>,
    pub rate_limiter: RateLimiterState,
    pub metrics_handle: Option<PrometheusHandle>,
}

impl AppState {
    pub fn new(
        config: AppConfig,
        store: Arc<dyn Store>,
        hasher: PasswordHasher,
        metrics_handle: Option<PrometheusHandle>,
    ) -> Self {
        let jwt = JwtManager::new(
            &config.jwt_secret,
            config.access_token_ttl_secs,
            config.refresh_token_ttl_secs,
        );
        let rate_limiter = RateLimiterState::new(RateLimitConfig {
            max_requests: config.rate_limit_max_requests,
            window_secs: config.rate_limit_window_secs,
            trust_forwarded_headers: config.trust_proxy_headers,
        });

        Self {
            account_service: Arc::new(AccountService::new(store.clone(), hasher.clone(), jwt.clone())),
            article_service: Arc::new(ArticleService::new(store.clone())),
            referral_service: Arc::new(ReferralService::new(
                store.clone(),
                hasher,
                config.referral_code_ttl_days,
            )),
            config,
            store,
            jwt,
            rate_limiter,
            metrics_handle,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration
    dotenvy::dotenv().ok();
    let mut config = AppConfig::load()?;

    // Initialize tracing
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "referral_backend=debug,tower_http=debug".into());
    if config.log_format.eq_ignore_ascii_case("json") {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }

    config.finalize()?;

    tracing::info!("Starting Referral Backend v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!("Environment: {}", config.environment);

    // Initialize storage
    let store: Arc<dyn Store> = if config.uses_database() {
        let pg = PgStore::connect(&config.database_url, config.database_max_connections).await?;
        tracing::info!("Database connected");
        if config.run_migrations {
            pg.migrate().await?;
            tracing::info!("Database migrations applied");
        }
        Arc::new(pg)
    } else {
        tracing::warn!("DATABASE_URL not set; using in-memory store, data is lost on restart");
        Arc::new(MemoryStore::new())
    };

    let metrics_handle = metrics::init_metrics()?;
    tracing::info!("Prometheus recorder installed");

    let state = Arc::new(AppState::new(
        config.clone(),
        store,
        PasswordHasher::default(),
        Some(metrics_handle),
    ));
    state.rate_limiter.0.spawn_cleanup();

    let app = build_app(state);

    // Start server
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!("Server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}

pub fn build_app(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/metrics", get(metrics_endpoint))
        .nest("/api/v1", api::routes::create_router(state.clone()))
        .layer(middleware::from_fn(api::middleware::metrics_middleware))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health_check() -> &'static str {
    "OK"
}

async fn metrics_endpoint(State(state): State<Arc<AppState>>) -> String {
    state
        .metrics_handle
        .as_ref()
        .map(PrometheusHandle::render)
        .unwrap_or_default()
}
