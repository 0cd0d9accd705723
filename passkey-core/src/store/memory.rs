//! In-memory stores backed by `DashMap`
//!
//! Entry guards are the compare-and-insert primitive. When more than one map
//! is locked at once the order is always identifiers, credentials, users.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use super::{counter_advances, ChallengeStore, CounterUpdate, CredentialStore};
use crate::error::{StoreError, StoreResult};
use crate::model::{Credential, CredentialId, User, UserHandle};
use crate::session::{CeremonySession, SessionToken};

/// Credential storage for development and tests. Lost on restart.
#[derive(Default)]
pub struct MemoryCredentialStore {
    users: DashMap<UserHandle, User>,
    /// normalised identifier -> handle
    identifiers: DashMap<String, UserHandle>,
    credentials: DashMap<CredentialId, Credential>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn credential_count(&self) -> usize {
        self.credentials.len()
    }

    pub fn user_count(&self) -> usize {
        self.users.len()
    }
}

impl std::fmt::Debug for MemoryCredentialStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryCredentialStore")
            .field("users", &self.users.len())
            .field("credentials", &self.credentials.len())
            .finish()
    }
}

#[async_trait]
impl CredentialStore for MemoryCredentialStore {
    async fn create_user(&self, user: User) -> StoreResult<()> {
        match self.identifiers.entry(user.identifier.clone()) {
            Entry::Occupied(_) => Err(StoreError::AccountExists),
            Entry::Vacant(slot) => {
                if self.users.contains_key(&user.handle) {
                    return Err(StoreError::AccountExists);
                }
                slot.insert(user.handle.clone());
                self.users.insert(user.handle.clone(), user);
                Ok(())
            }
        }
    }

    async fn find_user_by_identifier(&self, identifier: &str) -> StoreResult<Option<User>> {
        let handle = match self.identifiers.get(identifier) {
            Some(h) => h.value().clone(),
            None => return Ok(None),
        };
        Ok(self.users.get(&handle).map(|u| u.value().clone()))
    }

    async fn find_user_by_handle(&self, handle: &UserHandle) -> StoreResult<Option<User>> {
        Ok(self.users.get(handle).map(|u| u.value().clone()))
    }

    async fn list_credentials(&self, handle: &UserHandle) -> StoreResult<Vec<Credential>> {
        let mut credentials: Vec<Credential> = self
            .credentials
            .iter()
            .filter(|c| &c.user_handle == handle)
            .map(|c| c.value().clone())
            .collect();
        credentials.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(credentials)
    }

    async fn find_credential(&self, id: &CredentialId) -> StoreResult<Option<Credential>> {
        Ok(self.credentials.get(id).map(|c| c.value().clone()))
    }

    async fn add_credential(&self, credential: Credential) -> StoreResult<()> {
        if !self.users.contains_key(&credential.user_handle) {
            return Err(StoreError::NotFound);
        }
        match self.credentials.entry(credential.id.clone()) {
            Entry::Occupied(_) => Err(StoreError::DuplicateCredentialId),
            Entry::Vacant(slot) => {
                slot.insert(credential);
                Ok(())
            }
        }
    }

    async fn register_user_with_credential(
        &self,
        user: User,
        credential: Credential,
    ) -> StoreResult<()> {
        let Entry::Vacant(identifier_slot) = self.identifiers.entry(user.identifier.clone()) else {
            return Err(StoreError::AccountExists);
        };
        let Entry::Vacant(credential_slot) = self.credentials.entry(credential.id.clone()) else {
            return Err(StoreError::DuplicateCredentialId);
        };
        if self.users.contains_key(&user.handle) {
            return Err(StoreError::AccountExists);
        }

        self.users.insert(user.handle.clone(), user.clone());
        credential_slot.insert(credential);
        identifier_slot.insert(user.handle);
        Ok(())
    }

    async fn update_credential_counter(
        &self,
        id: &CredentialId,
        sign_count: u32,
        used_at: DateTime<Utc>,
    ) -> StoreResult<CounterUpdate> {
        let mut credential = self.credentials.get_mut(id).ok_or(StoreError::NotFound)?;
        if !counter_advances(credential.sign_count, sign_count) {
            return Ok(CounterUpdate::Stale {
                stored: credential.sign_count,
            });
        }
        credential.sign_count = sign_count;
        credential.last_used_at = Some(used_at);
        Ok(CounterUpdate::Advanced)
    }

    async fn touch_credential(&self, id: &CredentialId, used_at: DateTime<Utc>) -> StoreResult<()> {
        let mut credential = self.credentials.get_mut(id).ok_or(StoreError::NotFound)?;
        credential.last_used_at = Some(used_at);
        Ok(())
    }

    fn kind(&self) -> &'static str {
        "memory"
    }
}

struct SessionEntry {
    session: CeremonySession,
    expires_at: Instant,
}

/// Ceremony sessions keyed by token. Expiry is checked on every read.
#[derive(Default)]
pub struct MemoryChallengeStore {
    sessions: DashMap<SessionToken, SessionEntry>,
}

impl MemoryChallengeStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl std::fmt::Debug for MemoryChallengeStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryChallengeStore")
            .field("sessions", &self.sessions.len())
            .finish()
    }
}

#[async_trait]
impl ChallengeStore for MemoryChallengeStore {
    async fn put(
        &self,
        token: SessionToken,
        session: CeremonySession,
        ttl: Duration,
    ) -> StoreResult<()> {
        self.sessions.insert(
            token,
            SessionEntry {
                session,
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }

    async fn take(&self, token: &SessionToken) -> StoreResult<CeremonySession> {
        let (_, entry) = self.sessions.remove(token).ok_or(StoreError::NotFound)?;
        if entry.expires_at > Instant::now() {
            Ok(entry.session)
        } else {
            Err(StoreError::NotFound)
        }
    }

    async fn sweep_expired(&self) -> StoreResult<usize> {
        let now = Instant::now();
        let before = self.sessions.len();
        self.sessions.retain(|_, entry| entry.expires_at > now);
        Ok(before.saturating_sub(self.sessions.len()))
    }

    fn len(&self) -> usize {
        self.sessions.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::base64url::Base64UrlBytes;
    use crate::model::AttestationFormat;
    use crate::session::CeremonyKind;
    use std::sync::Arc;
    use uuid::Uuid;

    fn user(identifier: &str, handle: u8) -> User {
        User {
            handle: UserHandle::new(vec![handle; 32]).unwrap(),
            identifier: identifier.to_string(),
            display_name: identifier.to_string(),
            password_hash: None,
            created_at: Utc::now(),
        }
    }

    fn credential(id: u8, owner: &User) -> Credential {
        Credential {
            id: CredentialId::from(vec![id; 16]),
            user_handle: owner.handle.clone(),
            public_key: Base64UrlBytes(vec![0xa5]),
            algorithm: -7,
            sign_count: 0,
            transports: vec!["internal".into()],
            attestation_format: AttestationFormat::None,
            aaguid: Uuid::nil(),
            created_at: Utc::now(),
            last_used_at: None,
        }
    }

    fn session() -> CeremonySession {
        CeremonySession::new(vec![1; 32], CeremonyKind::DiscoverableAuthentication)
    }

    #[tokio::test]
    async fn test_create_and_find_user() {
        let store = MemoryCredentialStore::new();
        let alice = user("alice", 1);
        store.create_user(alice.clone()).await.unwrap();

        assert_eq!(
            store.find_user_by_identifier("alice").await.unwrap(),
            Some(alice.clone())
        );
        assert_eq!(
            store.find_user_by_handle(&alice.handle).await.unwrap(),
            Some(alice)
        );
        assert_eq!(
            store.create_user(user("alice", 2)).await.unwrap_err(),
            StoreError::AccountExists
        );
        assert!(store.find_user_by_identifier("bob").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_credential_id_unique_across_users() {
        let store = MemoryCredentialStore::new();
        let alice = user("alice", 1);
        let bob = user("bob", 2);
        store
            .register_user_with_credential(alice.clone(), credential(9, &alice))
            .await
            .unwrap();

        let err = store
            .register_user_with_credential(bob.clone(), credential(9, &bob))
            .await
            .unwrap_err();
        assert_eq!(err, StoreError::DuplicateCredentialId);

        // failed registration left nothing behind
        assert!(store.find_user_by_identifier("bob").await.unwrap().is_none());
        assert_eq!(store.credential_count(), 1);
        let owner = store
            .find_credential(&CredentialId::from(vec![9; 16]))
            .await
            .unwrap()
            .unwrap()
            .user_handle;
        assert_eq!(owner, alice.handle);
    }

    #[tokio::test]
    async fn test_add_credential_requires_user() {
        let store = MemoryCredentialStore::new();
        let ghost = user("ghost", 3);
        assert_eq!(
            store.add_credential(credential(1, &ghost)).await.unwrap_err(),
            StoreError::NotFound
        );

        store.create_user(ghost.clone()).await.unwrap();
        store.add_credential(credential(1, &ghost)).await.unwrap();
        store.add_credential(credential(2, &ghost)).await.unwrap();
        assert_eq!(store.list_credentials(&ghost.handle).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_counter_update_is_compare_and_set() {
        let store = MemoryCredentialStore::new();
        let alice = user("alice", 1);
        let cred = credential(5, &alice);
        let id = cred.id.clone();
        store.register_user_with_credential(alice, cred).await.unwrap();

        assert_eq!(
            store.update_credential_counter(&id, 10, Utc::now()).await.unwrap(),
            CounterUpdate::Advanced
        );
        assert_eq!(
            store.update_credential_counter(&id, 4, Utc::now()).await.unwrap(),
            CounterUpdate::Stale { stored: 10 }
        );
        // equal is not an advance
        assert_eq!(
            store.update_credential_counter(&id, 10, Utc::now()).await.unwrap(),
            CounterUpdate::Stale { stored: 10 }
        );
        let stored = store.find_credential(&id).await.unwrap().unwrap();
        assert_eq!(stored.sign_count, 10);
        assert!(stored.last_used_at.is_some());

        assert_eq!(
            store
                .update_credential_counter(&CredentialId::from(vec![0]), 1, Utc::now())
                .await
                .unwrap_err(),
            StoreError::NotFound
        );
    }

    #[tokio::test]
    async fn test_zero_counter_always_advances() {
        let store = MemoryCredentialStore::new();
        let alice = user("alice", 1);
        let cred = credential(6, &alice);
        let id = cred.id.clone();
        store.register_user_with_credential(alice, cred).await.unwrap();

        for _ in 0..3 {
            assert_eq!(
                store.update_credential_counter(&id, 0, Utc::now()).await.unwrap(),
                CounterUpdate::Advanced
            );
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_counter_updates_single_winner() {
        let store = Arc::new(MemoryCredentialStore::new());
        let alice = user("alice", 1);
        let cred = credential(7, &alice);
        let id = cred.id.clone();
        store.register_user_with_credential(alice, cred).await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..16 {
            let store = Arc::clone(&store);
            let id = id.clone();
            handles.push(tokio::spawn(async move {
                store.update_credential_counter(&id, 5, Utc::now()).await.unwrap()
            }));
        }
        let mut advanced = 0;
        for handle in handles {
            if handle.await.unwrap() == CounterUpdate::Advanced {
                advanced += 1;
            }
        }
        assert_eq!(advanced, 1);
    }

    #[tokio::test]
    async fn test_touch_keeps_counter() {
        let store = MemoryCredentialStore::new();
        let alice = user("alice", 1);
        let mut cred = credential(8, &alice);
        cred.sign_count = 9;
        let id = cred.id.clone();
        store.register_user_with_credential(alice, cred).await.unwrap();

        store.touch_credential(&id, Utc::now()).await.unwrap();
        let stored = store.find_credential(&id).await.unwrap().unwrap();
        assert_eq!(stored.sign_count, 9);
        assert!(stored.last_used_at.is_some());
    }

    #[tokio::test]
    async fn test_take_is_single_use() {
        let store = MemoryChallengeStore::new();
        let token = SessionToken::from("token");
        store
            .put(token.clone(), session(), Duration::from_secs(60))
            .await
            .unwrap();

        assert!(store.take(&token).await.is_ok());
        assert_eq!(store.take(&token).await.unwrap_err(), StoreError::NotFound);
    }

    #[tokio::test]
    async fn test_expired_sessions() {
        let store = MemoryChallengeStore::new();
        store
            .put("old".into(), session(), Duration::from_millis(1))
            .await
            .unwrap();
        store
            .put("fresh".into(), session(), Duration::from_secs(60))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(store.sweep_expired().await.unwrap(), 1);
        assert_eq!(store.len(), 1);

        store
            .put("stale".into(), session(), Duration::from_millis(1))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(
            store.take(&"stale".into()).await.unwrap_err(),
            StoreError::NotFound
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_take_yields_one_winner() {
        let store = Arc::new(MemoryChallengeStore::new());
        let token = SessionToken::from("contended");
        store
            .put(token.clone(), session(), Duration::from_secs(60))
            .await
            .unwrap();

        let mut handles = Vec::new();
        for _ in 0..16 {
            let store = Arc::clone(&store);
            let token = token.clone();
            handles.push(tokio::spawn(async move { store.take(&token).await.is_ok() }));
        }
        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }
}
