//! Credential storage selection
//!
//! - **Credentials**: PostgreSQL when `DATABASE_URL` is set, otherwise the
//!   engine's in-memory store (development only, lost on restart).
//! - **Challenges**: always in memory; ceremony sessions live for minutes.

mod postgres;

pub use postgres::PostgresCredentialStore;

use std::sync::Arc;
use std::time::Duration;

use passkey_core::{CredentialStore, MemoryCredentialStore};

use crate::config::Config;

/// Storage errors raised while setting up a backend
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Database connection error: {0}")]
    Connection(String),

    #[error("Database migration error: {0}")]
    Migration(String),
}

/// Pick the credential store for this process.
pub async fn credential_store(
    config: &Config,
    store_timeout: Duration,
) -> Result<Arc<dyn CredentialStore>, StorageError> {
    match &config.database_url {
        Some(url) => {
            let store = PostgresCredentialStore::connect(
                url,
                config.database_max_connections,
                config.database_min_connections,
                store_timeout,
            )
            .await?;
            store.migrate().await?;
            Ok(Arc::new(store))
        }
        None => {
            tracing::warn!(
                "DATABASE_URL not set, using in-memory credential storage - accounts will be lost on restart!"
            );
            Ok(Arc::new(MemoryCredentialStore::new()))
        }
    }
}
