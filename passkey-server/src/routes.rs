//! Router configuration module
//!
//! Configures all routes, middleware layers, and creates the application router.

use std::{sync::Arc, time::Duration};

use axum::{
    http::{header, Method, StatusCode},
    routing::{get, post},
    Json, Router,
};
use passkey_core::{CeremonyEngine, MemoryChallengeStore, MemoryCredentialStore, PasswordHasher};
use tower_governor::{governor::GovernorConfigBuilder, GovernorLayer};
use tower_http::cors::{Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;

use crate::config::Config;
use crate::error::ApiError;
use crate::handlers::{
    begin_discoverable_login, begin_login, begin_registration, finish_discoverable_login,
    finish_login, finish_registration, health, login_password, logout, me, ready,
    register_password,
};
use crate::openapi::ApiDoc;
use crate::session;
use crate::state::AppState;

/// Create the application router with default config and in-memory stores (for testing)
pub fn create_router() -> Result<Router, ApiError> {
    create_router_with_config(&Config::default())
}

/// Create the application router with in-memory stores
pub fn create_router_with_config(config: &Config) -> Result<Router, ApiError> {
    let state = in_memory_state(config)?;
    Ok(create_router_with_state(config, state))
}

/// Build application state over in-memory stores.
pub fn in_memory_state(config: &Config) -> Result<AppState, ApiError> {
    let rp = config
        .rp_config()
        .map_err(|e| ApiError::internal(format!("Invalid relying party configuration: {}", e)))?;
    let engine = CeremonyEngine::new(
        rp,
        Arc::new(MemoryCredentialStore::new()),
        Arc::new(MemoryChallengeStore::new()),
    )
    .with_password_hasher(PasswordHasher::new(config.password_hash_iterations));
    Ok(AppState::new(engine))
}

/// Create the application router around prepared state
pub fn create_router_with_state(config: &Config, state: AppState) -> Router {
    // Configure CORS based on allowed_origins
    let cors = match &config.allowed_origins {
        Some(origins) if !origins.is_empty() => {
            let origins: Vec<_> = origins.iter().filter_map(|o| o.parse().ok()).collect();
            tracing::info!("CORS: Restricting to {} origin(s)", origins.len());
            // The session cookie carries ceremony and login state
            CorsLayer::new()
                .allow_origin(origins)
                .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
                .allow_headers([header::CONTENT_TYPE, header::ACCEPT])
                .allow_credentials(true)
        }
        _ => {
            tracing::warn!("CORS: Allowing all origins (dev mode)");
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any)
        }
    };

    // Request body limit
    let body_limit = RequestBodyLimitLayer::new(config.body_limit_kb * 1024);

    // Request timeout
    let timeout = TimeoutLayer::with_status_code(
        StatusCode::REQUEST_TIMEOUT,
        Duration::from_secs(config.timeout_secs),
    );

    // Base router with common layers
    let router = Router::new()
        .route("/register/begin", post(begin_registration))
        .route("/register/finish", post(finish_registration))
        .route("/login/begin", post(begin_login))
        .route("/login/finish", post(finish_login))
        .route("/discoverable_login/begin", post(begin_discoverable_login))
        .route("/discoverable_login/finish", post(finish_discoverable_login))
        .route("/register/password", post(register_password))
        .route("/login/password", post(login_password))
        .route("/logout", post(logout))
        .route("/me", get(me))
        .route("/health", get(health))
        .route("/ready", get(ready))
        .route("/api-docs/openapi.json", get(|| async { Json(ApiDoc::openapi()) }))
        .with_state(state)
        .layer(session::layer(config))
        .layer(cors)
        .layer(body_limit)
        .layer(timeout);

    // Conditionally apply rate limiting (disabled in tests, enabled in production)
    if config.rate_limit_enabled {
        let governor_conf = GovernorConfigBuilder::default()
            .per_second(config.rate_limit_per_sec)
            .burst_size(config.rate_limit_burst)
            .finish()
            .expect("Failed to build rate limiter config");

        tracing::info!(
            "Rate limiting: {} req/s (burst: {})",
            config.rate_limit_per_sec,
            config.rate_limit_burst
        );

        router
            .layer(GovernorLayer::new(Arc::new(governor_conf)))
            .layer(TraceLayer::new_for_http())
    } else {
        tracing::warn!("Rate limiting: DISABLED");
        router.layer(TraceLayer::new_for_http())
    }
}
