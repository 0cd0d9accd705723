//! Store contracts
//!
//! - **Credentials**: users and their registered public keys. Must enforce
//!   global credential-id uniqueness with a compare-and-insert.
//! - **Challenges**: short-lived ceremony sessions, consumed exactly once.
//!
//! Both are shared across concurrently running ceremonies; implementations
//! must not hold locks across `.await` points.

mod memory;

pub use memory::{MemoryChallengeStore, MemoryCredentialStore};

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::StoreResult;
use crate::model::{Credential, CredentialId, User, UserHandle};
use crate::session::{CeremonySession, SessionToken};

/// Outcome of [`CredentialStore::update_credential_counter`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CounterUpdate {
    Advanced,
    /// Not written; `stored` is the value that won.
    Stale { stored: u32 },
}

/// Whether `reported` may replace `stored`. Authenticators without a counter
/// report zero forever.
pub fn counter_advances(stored: u32, reported: u32) -> bool {
    reported > stored || (reported == 0 && stored == 0)
}

#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Insert a user. Fails with `AccountExists` if the identifier or handle is taken.
    async fn create_user(&self, user: User) -> StoreResult<()>;

    async fn find_user_by_identifier(&self, identifier: &str) -> StoreResult<Option<User>>;

    async fn find_user_by_handle(&self, handle: &UserHandle) -> StoreResult<Option<User>>;

    async fn list_credentials(&self, handle: &UserHandle) -> StoreResult<Vec<Credential>>;

    /// Look up a credential by id across all users.
    async fn find_credential(&self, id: &CredentialId) -> StoreResult<Option<Credential>>;

    /// Attach a credential to an existing user.
    /// Fails with `DuplicateCredentialId` if the id exists anywhere in the store.
    async fn add_credential(&self, credential: Credential) -> StoreResult<()>;

    /// Create a user together with its first credential, all or nothing.
    async fn register_user_with_credential(
        &self,
        user: User,
        credential: Credential,
    ) -> StoreResult<()>;

    /// Compare-and-set the signature counter. The write happens only when
    /// [`counter_advances`] holds against the value stored at write time, so
    /// of two assertions carrying the same counter exactly one advances.
    /// Fails with `NotFound` if the credential does not exist.
    async fn update_credential_counter(
        &self,
        id: &CredentialId,
        sign_count: u32,
        used_at: DateTime<Utc>,
    ) -> StoreResult<CounterUpdate>;

    /// Record a use without touching the counter.
    async fn touch_credential(&self, id: &CredentialId, used_at: DateTime<Utc>) -> StoreResult<()>;

    /// Store kind reported by health endpoints.
    fn kind(&self) -> &'static str;

    async fn check_health(&self) -> StoreResult<()> {
        Ok(())
    }
}

#[async_trait]
pub trait ChallengeStore: Send + Sync {
    /// Store a session under `token`, replacing any previous value.
    async fn put(
        &self,
        token: SessionToken,
        session: CeremonySession,
        ttl: Duration,
    ) -> StoreResult<()>;

    /// Atomically remove and return the session.
    /// `NotFound` if absent, already consumed, or expired.
    async fn take(&self, token: &SessionToken) -> StoreResult<CeremonySession>;

    /// Drop expired sessions, returning how many were removed.
    async fn sweep_expired(&self) -> StoreResult<usize>;

    /// Live session count (including expired ones not yet swept).
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
