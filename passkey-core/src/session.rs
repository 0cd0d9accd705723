//! Ceremony sessions: the state carried from a "begin" call to its "finish".

use chrono::{DateTime, Utc};
use openssl::error::ErrorStack;

use crate::base64url;
use crate::client_data;
use crate::crypto;
use crate::model::{CredentialId, UserHandle};

const TOKEN_LEN: usize = 32;

/// Opaque, single-use handle for a ceremony session.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionToken(String);

impl SessionToken {
    pub fn generate() -> Result<Self, ErrorStack> {
        Ok(Self(base64url::encode(crypto::random_bytes(TOKEN_LEN)?)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for SessionToken {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for SessionToken {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl std::fmt::Display for SessionToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Account data gathered at registration begin, committed at finish.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingRegistration {
    pub identifier: String,
    pub display_name: String,
    pub user_handle: UserHandle,
    /// Whether the credential is being added to an account the caller is signed in to
    pub existing_user: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CeremonyKind {
    Registration(PendingRegistration),
    Authentication {
        user_handle: UserHandle,
        allowed: Vec<CredentialId>,
    },
    DiscoverableAuthentication,
}

impl CeremonyKind {
    /// The `type` the browser must put in client data for this ceremony.
    pub fn client_data_type(&self) -> &'static str {
        match self {
            Self::Registration(_) => client_data::TYPE_CREATE,
            Self::Authentication { .. } | Self::DiscoverableAuthentication => client_data::TYPE_GET,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Registration(_) => "registration",
            Self::Authentication { .. } => "authentication",
            Self::DiscoverableAuthentication => "discoverable-authentication",
        }
    }
}

#[derive(Debug, Clone)]
pub struct CeremonySession {
    pub challenge: Vec<u8>,
    pub kind: CeremonyKind,
    pub created_at: DateTime<Utc>,
}

impl CeremonySession {
    pub fn new(challenge: Vec<u8>, kind: CeremonyKind) -> Self {
        Self {
            challenge,
            kind,
            created_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tokens_are_unique_and_url_safe() {
        let a = SessionToken::generate().unwrap();
        let b = SessionToken::generate().unwrap();
        assert_ne!(a, b);
        assert_eq!(base64url::decode(a.as_str()).unwrap().len(), TOKEN_LEN);
    }

    #[test]
    fn test_client_data_type_per_kind() {
        assert_eq!(
            CeremonyKind::DiscoverableAuthentication.client_data_type(),
            "webauthn.get"
        );
        let pending = PendingRegistration {
            identifier: "alice".into(),
            display_name: "Alice".into(),
            user_handle: UserHandle::new(vec![1; 32]).unwrap(),
            existing_user: false,
        };
        assert_eq!(
            CeremonyKind::Registration(pending).client_data_type(),
            "webauthn.create"
        );
    }
}
