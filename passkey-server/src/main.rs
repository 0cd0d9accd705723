//! Passkey Server - WebAuthn relying party over HTTP
//!
//! Passkey registration and login (with or without a username), password
//! accounts, and cookie-based login sessions. See `/api-docs/openapi.json`.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use passkey_core::{CeremonyEngine, MemoryChallengeStore, PasswordHasher};
use passkey_server::{create_router_with_state, spawn_sweeper, storage, AppState, Config};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,passkey_server=debug,passkey_core=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env();
    let rp = config
        .rp_config()
        .context("Invalid relying party configuration")?;
    tracing::info!(
        rp_id = %rp.rp_id,
        origins = ?rp.origins,
        disclosure = ?rp.account_disclosure,
        attestation = ?rp.attestation_policy,
        "Relying party configured"
    );

    let credentials = storage::credential_store(&config, rp.store_timeout)
        .await
        .context("Failed to initialise credential storage")?;

    let engine = CeremonyEngine::new(rp, credentials, Arc::new(MemoryChallengeStore::new()))
        .with_password_hasher(PasswordHasher::new(config.password_hash_iterations));
    let state = AppState::new(engine);

    let sweeper = spawn_sweeper(
        state.clone(),
        Duration::from_secs(config.sweep_interval_secs.max(1)),
    );

    let app = create_router_with_state(&config, state);

    let addr = config.socket_addr();
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    tracing::info!(%addr, "Passkey server listening");

    // Peer addresses feed the rate limiter's key extractor
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .context("Server error")?;

    sweeper.abort();
    tracing::info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::info!("Shutdown signal received"),
        Err(e) => tracing::error!(error = %e, "Failed to listen for shutdown signal"),
    }
}
