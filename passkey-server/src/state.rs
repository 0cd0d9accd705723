//! Application state module
//!
//! Defines shared state accessible across all request handlers.

use std::sync::Arc;
use std::time::Duration;

use passkey_core::{CeremonyEngine, Reason, SessionToken};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::error::ApiError;

/// Application state containing shared resources.
#[derive(Clone)]
pub struct AppState {
    /// Ceremony engine with its credential and challenge stores
    pub engine: Arc<CeremonyEngine>,
}

impl AppState {
    pub fn new(engine: CeremonyEngine) -> Self {
        Self {
            engine: Arc::new(engine),
        }
    }

    /// Render an engine failure under the configured disclosure policy.
    pub fn reject(&self, reason: Reason) -> ApiError {
        ApiError::ceremony(reason, self.engine.config().account_disclosure)
    }

    /// Discard a ceremony whose response could not be read. Failures are
    /// only logged; the session expires on its own.
    pub async fn abandon(&self, token: &SessionToken) {
        if let Err(reason) = self.engine.abandon(token).await {
            tracing::warn!(code = reason.code(), "Failed to discard ceremony session");
        }
    }

    /// Drop expired ceremony sessions.
    pub async fn sweep_expired(&self) {
        match self.engine.sweep_expired().await {
            Ok(0) => {}
            Ok(removed) => tracing::debug!(removed, "Swept expired ceremony sessions"),
            Err(reason) => tracing::warn!(code = reason.code(), "Ceremony session sweep failed"),
        }
    }
}

/// Run [`AppState::sweep_expired`] every `every` until the runtime shuts down.
pub fn spawn_sweeper(state: AppState, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately
        interval.tick().await;
        loop {
            interval.tick().await;
            state.sweep_expired().await;
        }
    })
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("engine", &self.engine)
            .finish()
    }
}
