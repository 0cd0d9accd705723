//! Password sign-up and login. Never touches ceremony sessions.

use chrono::Utc;
use tracing::{error, info, instrument};
use zeroize::Zeroizing;

use super::CeremonyEngine;
use crate::error::Reason;
use crate::model::{normalize_identifier, User};
use crate::password::{PasswordHasher, MIN_PASSWORD_LEN};

const MAX_PASSWORD_LEN: usize = 1024;

impl CeremonyEngine {
    #[instrument(level = "debug", skip(self, password, display_name))]
    pub async fn register_password(
        &self,
        identifier: &str,
        password: &str,
        display_name: Option<&str>,
    ) -> Result<User, Reason> {
        let identifier = normalize_identifier(identifier)?;
        let length = password.chars().count();
        if length < MIN_PASSWORD_LEN {
            return Err(Reason::InvalidInput("password must be at least 8 characters"));
        }
        if length > MAX_PASSWORD_LEN {
            return Err(Reason::InvalidInput("password is too long"));
        }

        let hasher = self.passwords;
        let secret = Zeroizing::new(password.to_string());
        let hash = run_blocking(move || hasher.hash(&secret))
            .await?
            .map_err(|e| {
                error!(error = %e, "Password hashing failed");
                Reason::StoreUnavailable
            })?;

        let user = User {
            handle: self.derive_user_handle(&identifier)?,
            display_name: display_name
                .map(str::trim)
                .filter(|n| !n.is_empty())
                .unwrap_or(identifier.as_str())
                .to_string(),
            identifier,
            password_hash: Some(hash),
            created_at: Utc::now(),
        };

        self.bounded("create_user", self.credentials.create_user(user.clone()))
            .await?;
        info!(user_handle = %user.handle, "Password account created");
        Ok(user)
    }

    /// Check a password. Unknown identifiers, passkey-only accounts and wrong
    /// passwords all fail with the same reason after the same amount of work.
    #[instrument(level = "debug", skip(self, password))]
    pub async fn login_password(&self, identifier: &str, password: &str) -> Result<User, Reason> {
        let identifier = normalize_identifier(identifier).map_err(|_| Reason::InvalidCredentials)?;
        if password.chars().count() > MAX_PASSWORD_LEN {
            return Err(Reason::InvalidCredentials);
        }

        let user = self
            .retried("find_user_by_identifier", || {
                self.credentials.find_user_by_identifier(&identifier)
            })
            .await?;

        let hasher: PasswordHasher = self.passwords;
        let secret = Zeroizing::new(password.to_string());
        let stored = user.as_ref().and_then(|u| u.password_hash.clone());
        let matched = run_blocking(move || match stored {
            Some(hash) => hasher.verify(&secret, &hash),
            None => {
                hasher.dummy_verify(&secret);
                false
            }
        })
        .await?;

        match user {
            Some(user) if matched => {
                info!(user_handle = %user.handle, "Password login succeeded");
                Ok(user)
            }
            _ => Err(Reason::InvalidCredentials),
        }
    }
}

/// PBKDF2 is deliberately slow; keep it off the async workers.
async fn run_blocking<T, F>(f: F) -> Result<T, Reason>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f).await.map_err(|e| {
        error!(error = %e, "Blocking task failed");
        Reason::StoreUnavailable
    })
}
