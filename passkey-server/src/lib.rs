//! Passkey Server Library - HTTP boundary for the passkey ceremony engine
//!
//! This library exposes the server components for use in integration tests.
//! The main binary uses these same components.

pub mod auth;
pub mod config;
pub mod error;
pub mod handlers;
pub mod openapi;
pub mod routes;
pub mod session;
pub mod state;
pub mod storage;

pub use auth::{AuthenticatedUser, OptionalAuth};
pub use config::Config;
pub use error::ApiError;
pub use openapi::ApiDoc;
pub use routes::{create_router, create_router_with_config, create_router_with_state, in_memory_state};
pub use state::{spawn_sweeper, AppState};
pub use storage::{PostgresCredentialStore, StorageError};
