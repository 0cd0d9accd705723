//! Ceremony engine
//!
//! Stateless between calls: everything a ceremony needs between "begin" and
//! "finish" lives in the [`ChallengeStore`], and everything that outlives it
//! in the [`CredentialStore`]. Every store call is bounded by
//! `store_timeout`; idempotent calls are retried with backoff on transient
//! failures.

mod authentication;
mod password;
mod registration;


pub use authentication::{AuthenticationChallenge, AuthenticationSuccess};
pub use registration::{RegistrationChallenge, RegistrationSuccess};

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use backoff::{future::retry_notify, ExponentialBackoff};
use tracing::{debug, error, warn};

use crate::authenticator_data::AuthenticatorData;
use crate::client_data::CollectedClientData;
use crate::config::{RelyingPartyConfig, UserVerification};
use crate::crypto;
use crate::error::{Reason, StoreError, StoreResult};
use crate::model::{Credential, User, UserHandle};
use crate::password::PasswordHasher;
use crate::session::{CeremonyKind, CeremonySession, SessionToken};
use crate::store::{ChallengeStore, CredentialStore};

const HANDLE_DOMAIN: &[u8] = b"user-handle\0";

pub struct CeremonyEngine {
    config: Arc<RelyingPartyConfig>,
    credentials: Arc<dyn CredentialStore>,
    challenges: Arc<dyn ChallengeStore>,
    passwords: PasswordHasher,
}

impl CeremonyEngine {
    pub fn new(
        config: RelyingPartyConfig,
        credentials: Arc<dyn CredentialStore>,
        challenges: Arc<dyn ChallengeStore>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            credentials,
            challenges,
            passwords: PasswordHasher::default(),
        }
    }

    pub fn with_password_hasher(mut self, hasher: PasswordHasher) -> Self {
        self.passwords = hasher;
        self
    }

    pub fn config(&self) -> &RelyingPartyConfig {
        &self.config
    }

    pub fn credentials(&self) -> &Arc<dyn CredentialStore> {
        &self.credentials
    }

    pub fn challenges(&self) -> &Arc<dyn ChallengeStore> {
        &self.challenges
    }

    /// Drop expired ceremony sessions. Reads already reject them; this only frees memory.
    pub async fn sweep_expired(&self) -> Result<usize, Reason> {
        self.bounded("sweep_expired", self.challenges.sweep_expired())
            .await
    }

    /// A user and their passkeys, for account views. `NotFound` if the handle is unknown.
    pub async fn account(&self, handle: &UserHandle) -> Result<(User, Vec<Credential>), Reason> {
        let user = self
            .retried("find_user_by_handle", || self.credentials.find_user_by_handle(handle))
            .await?
            .ok_or(Reason::NotFound)?;
        let credentials = self
            .retried("list_credentials", || self.credentials.list_credentials(handle))
            .await?;
        Ok((user, credentials))
    }

    /// Deterministic handle for an identifier that has no account yet.
    pub(crate) fn derive_user_handle(&self, identifier: &str) -> Result<UserHandle, Reason> {
        UserHandle::new(self.keyed_digest(HANDLE_DOMAIN, identifier.as_bytes())?)
    }

    /// HMAC under the configured secret, domain-separated.
    pub(crate) fn keyed_digest(&self, domain: &[u8], data: &[u8]) -> Result<Vec<u8>, Reason> {
        let mut input = domain.to_vec();
        input.extend_from_slice(data);
        crypto::hmac_sha256(&self.config.user_handle_secret, &input).map_err(|e| {
            error!(error = %e, "HMAC computation failed");
            Reason::StoreUnavailable
        })
    }

    /// Mint a challenge and store a session for it.
    pub(crate) async fn open_session(
        &self,
        kind: CeremonyKind,
    ) -> Result<(SessionToken, Vec<u8>), Reason> {
        let (token, challenge) = crypto::random_bytes(self.config.challenge_len)
            .and_then(|challenge| Ok((SessionToken::generate()?, challenge)))
            .map_err(|e| {
                error!(error = %e, "Random generation failed");
                Reason::StoreUnavailable
            })?;

        debug!(ceremony = kind.name(), "Opening ceremony session");
        let session = CeremonySession::new(challenge.clone(), kind);
        self.bounded(
            "put_session",
            self.challenges
                .put(token.clone(), session, self.config.challenge_ttl),
        )
        .await?;
        Ok((token, challenge))
    }

    /// Consume the session. It is gone after this call whatever happens next.
    pub(crate) async fn consume_session(
        &self,
        token: &SessionToken,
    ) -> Result<CeremonySession, Reason> {
        match self.bounded("take_session", self.challenges.take(token)).await {
            Ok(session) => Ok(session),
            Err(Reason::NotFound) => Err(Reason::SessionNotFound),
            Err(other) => Err(other),
        }
    }

    /// Give up on a ceremony whose response never reached verification.
    /// The session is consumed; a token that is already gone is not an error.
    pub async fn abandon(&self, token: &SessionToken) -> Result<(), Reason> {
        match self.consume_session(token).await {
            Ok(session) => {
                debug!(ceremony = session.kind.name(), "Ceremony abandoned");
                Ok(())
            }
            Err(Reason::SessionNotFound) => Ok(()),
            Err(other) => Err(other),
        }
    }

    /// Shared client-data checks for all ceremony kinds: type, challenge,
    /// origin. Embedded (cross-origin) calls are refused since only the
    /// configured origins may run a ceremony.
    /// Returns the SHA-256 of the raw client data.
    pub(crate) fn verify_client_data(
        &self,
        session: &CeremonySession,
        raw: &[u8],
        malformed: Reason,
    ) -> Result<[u8; 32], Reason> {
        let client_data = CollectedClientData::parse(raw, malformed)?;

        if client_data.type_ != session.kind.client_data_type() {
            return Err(Reason::CeremonyTypeMismatch);
        }
        match client_data.challenge_bytes() {
            Some(challenge) if challenge == session.challenge => {}
            _ => return Err(Reason::ChallengeMismatch),
        }
        if !self.config.is_allowed_origin(&client_data.origin) {
            debug!(origin = %client_data.origin, "Origin rejected");
            return Err(Reason::OriginMismatch);
        }
        if client_data.cross_origin == Some(true) {
            debug!(origin = %client_data.origin, "Cross-origin ceremony rejected");
            return Err(Reason::OriginMismatch);
        }

        Ok(crypto::sha256(raw))
    }

    pub(crate) fn verify_rp_id_hash(&self, auth_data: &AuthenticatorData) -> Result<(), Reason> {
        if auth_data.rp_id_hash == *self.config.rp_id_hash() {
            Ok(())
        } else {
            Err(Reason::RpIdMismatch)
        }
    }

    pub(crate) fn verify_user_flags(&self, auth_data: &AuthenticatorData) -> Result<(), Reason> {
        if !auth_data.user_present() {
            return Err(Reason::UserPresenceMissing);
        }
        if self.config.user_verification == UserVerification::Required && !auth_data.user_verified() {
            return Err(Reason::UserVerificationMissing);
        }
        Ok(())
    }

    pub(crate) fn timeout_ms(&self) -> u64 {
        self.config.ceremony_timeout.as_millis() as u64
    }

    /// Run one store call under the store timeout.
    pub(crate) async fn bounded<T, F>(&self, op: &'static str, call: F) -> Result<T, Reason>
    where
        F: Future<Output = StoreResult<T>>,
    {
        match tokio::time::timeout(self.config.store_timeout, call).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => {
                if e.is_transient() || matches!(e, StoreError::Serialization(_)) {
                    error!(op, error = %e, "Store call failed");
                }
                Err(e.into())
            }
            Err(_) => {
                error!(op, timeout_ms = self.config.store_timeout.as_millis() as u64, "Store call timed out");
                Err(Reason::StoreUnavailable)
            }
        }
    }

    /// Like [`bounded`](Self::bounded), retrying transient failures. Only for idempotent calls.
    pub(crate) async fn retried<T, F, Fut>(&self, op: &'static str, call: F) -> Result<T, Reason>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = StoreResult<T>>,
    {
        let timeout = self.config.store_timeout;
        let policy = ExponentialBackoff {
            initial_interval: Duration::from_millis(25),
            max_interval: Duration::from_millis(500),
            max_elapsed_time: Some(timeout),
            ..Default::default()
        };

        let result = retry_notify(
            policy,
            || async {
                match tokio::time::timeout(timeout, call()).await {
                    Ok(Ok(value)) => Ok(value),
                    Ok(Err(e)) if e.is_transient() => Err(backoff::Error::transient(e)),
                    Ok(Err(e)) => Err(backoff::Error::permanent(e)),
                    Err(_) => Err(backoff::Error::transient(StoreError::Unavailable(
                        "timed out".to_string(),
                    ))),
                }
            },
            |err: StoreError, duration: Duration| {
                warn!(
                    op,
                    error = %err,
                    retry_after_ms = duration.as_millis() as u64,
                    "Store retry scheduled"
                );
            },
        )
        .await;

        result.map_err(|e| {
            if e.is_transient() {
                error!(op, error = %e, "Store call failed after retries");
            }
            e.into()
        })
    }
}

impl std::fmt::Debug for CeremonyEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CeremonyEngine")
            .field("rp_id", &self.config.rp_id)
            .field("credential_store", &self.credentials.kind())
            .field("pending_sessions", &self.challenges.len())
            .finish()
    }
}

/// Log a failed ceremony at a severity matching its cause.
pub(crate) fn log_failure(ceremony: &'static str, reason: &Reason) {
    match reason {
        Reason::StoreUnavailable => error!(ceremony, code = reason.code(), "Ceremony failed"),
        Reason::CounterRegression { stored, reported } => warn!(
            ceremony,
            code = reason.code(),
            stored,
            reported,
            "Possible cloned authenticator"
        ),
        _ => warn!(ceremony, code = reason.code(), reason = %reason, "Ceremony failed"),
    }
}
