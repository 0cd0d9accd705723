//! Health check handlers
//!
//! Provides health and readiness endpoints for monitoring and orchestration.

use std::time::Duration;

use axum::{extract::State, http::StatusCode, Json};
use serde::Serialize;
use utoipa::ToSchema;

use super::AppState;

const READY_CHECK_TIMEOUT: Duration = Duration::from_secs(2);

/// Health check response
#[derive(Serialize, ToSchema)]
pub struct HealthResponse {
    /// Service status, always "healthy" when the process answers
    pub status: &'static str,
    /// Server version from Cargo.toml
    pub version: &'static str,
    /// Service name
    pub service: &'static str,
    /// Credential store backend: "memory" or "postgres"
    pub credential_store: &'static str,
    /// Ceremony sessions awaiting their finish call
    pub pending_ceremonies: usize,
}

/// GET /health - Health check endpoint
///
/// Returns JSON with service status, version, and storage backend.
/// Used for monitoring and load balancer health checks.
#[utoipa::path(
    get,
    path = "/health",
    tag = "Health",
    responses(
        (status = 200, description = "Service is up", body = HealthResponse)
    )
)]
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
        service: "passkey-server",
        credential_store: state.engine.credentials().kind(),
        pending_ceremonies: state.engine.challenges().len(),
    })
}

/// Readiness response for Kubernetes
#[derive(Serialize, ToSchema)]
pub struct ReadyResponse {
    /// Whether the service is ready to accept traffic
    pub ready: bool,
    /// Optional message explaining status
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<&'static str>,
}

/// GET /ready - Kubernetes readiness check
///
/// Returns 200 once the credential store answers, 503 otherwise.
#[utoipa::path(
    get,
    path = "/ready",
    tag = "Health",
    responses(
        (status = 200, description = "Ready to accept traffic", body = ReadyResponse),
        (status = 503, description = "Credential store unreachable", body = ReadyResponse)
    )
)]
pub async fn ready(State(state): State<AppState>) -> (StatusCode, Json<ReadyResponse>) {
    let check = tokio::time::timeout(
        READY_CHECK_TIMEOUT,
        state.engine.credentials().check_health(),
    )
    .await;

    match check {
        Ok(Ok(())) => (
            StatusCode::OK,
            Json(ReadyResponse {
                ready: true,
                message: None,
            }),
        ),
        Ok(Err(e)) => {
            tracing::warn!(error = %e, "Readiness check failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(ReadyResponse {
                    ready: false,
                    message: Some("credential store unavailable"),
                }),
            )
        }
        Err(_) => {
            tracing::warn!("Readiness check timed out");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(ReadyResponse {
                    ready: false,
                    message: Some("credential store timed out"),
                }),
            )
        }
    }
}
