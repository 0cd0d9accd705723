//! Users and credentials as held by the credential store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::base64url::Base64UrlBytes;
use crate::error::Reason;

/// Maximum length of a WebAuthn `user.id`.
pub const MAX_USER_HANDLE_LEN: usize = 64;

/// Maximum accepted identifier length (after normalisation).
pub const MAX_IDENTIFIER_LEN: usize = 255;

/// Opaque, stable user handle used as WebAuthn `user.id`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserHandle(pub Base64UrlBytes);

impl UserHandle {
    pub fn new(bytes: Vec<u8>) -> Result<Self, Reason> {
        if bytes.is_empty() || bytes.len() > MAX_USER_HANDLE_LEN {
            return Err(Reason::InvalidInput("user handle must be 1-64 bytes"));
        }
        Ok(Self(Base64UrlBytes(bytes)))
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_slice()
    }
}

impl std::fmt::Display for UserHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Credential ID as chosen by the authenticator. Unique across the whole store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CredentialId(pub Base64UrlBytes);

impl CredentialId {
    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_slice()
    }
}

impl From<Vec<u8>> for CredentialId {
    fn from(v: Vec<u8>) -> Self {
        Self(Base64UrlBytes(v))
    }
}

impl std::fmt::Display for CredentialId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Account record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub handle: UserHandle,
    /// Normalised username or email
    pub identifier: String,
    pub display_name: String,
    /// PBKDF2 hash string, absent for passkey-only accounts
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password_hash: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Attestation statement format reported at registration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AttestationFormat {
    #[default]
    None,
    Packed,
    FidoU2f,
    Tpm,
    AndroidKey,
    AndroidSafetynet,
    Apple,
    /// Any format string this crate does not know
    Unknown,
}

impl AttestationFormat {
    pub fn from_fmt(fmt: &str) -> Self {
        match fmt {
            "none" => Self::None,
            "packed" => Self::Packed,
            "fido-u2f" => Self::FidoU2f,
            "tpm" => Self::Tpm,
            "android-key" => Self::AndroidKey,
            "android-safetynet" => Self::AndroidSafetynet,
            "apple" => Self::Apple,
            _ => Self::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Packed => "packed",
            Self::FidoU2f => "fido-u2f",
            Self::Tpm => "tpm",
            Self::AndroidKey => "android-key",
            Self::AndroidSafetynet => "android-safetynet",
            Self::Apple => "apple",
            Self::Unknown => "unknown",
        }
    }
}

/// A registered public-key credential, owned by exactly one user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    pub id: CredentialId,
    pub user_handle: UserHandle,
    /// COSE_Key bytes exactly as found in the attested credential data
    pub public_key: Base64UrlBytes,
    /// COSE algorithm identifier (-7 ES256, -257 RS256)
    pub algorithm: i64,
    pub sign_count: u32,
    pub transports: Vec<String>,
    pub attestation_format: AttestationFormat,
    pub aaguid: Uuid,
    pub created_at: DateTime<Utc>,
    pub last_used_at: Option<DateTime<Utc>>,
}

/// Normalise a username or email: trim and ASCII-lowercase, then validate.
pub fn normalize_identifier(raw: &str) -> Result<String, Reason> {
    let identifier = raw.trim().to_ascii_lowercase();

    if identifier.is_empty() {
        return Err(Reason::InvalidInput("identifier must not be empty"));
    }
    if identifier.chars().count() > MAX_IDENTIFIER_LEN {
        return Err(Reason::InvalidInput("identifier is too long"));
    }
    if identifier
        .chars()
        .any(|c| c.is_whitespace() || c.is_control())
    {
        return Err(Reason::InvalidInput(
            "identifier must not contain whitespace",
        ));
    }

    if identifier.contains('@') {
        let mut parts = identifier.splitn(2, '@');
        let local = parts.next().unwrap_or_default();
        let domain = parts.next().unwrap_or_default();
        let domain_ok = !domain.contains('@')
            && domain.contains('.')
            && !domain.starts_with('.')
            && !domain.ends_with('.');
        if local.is_empty() || !domain_ok {
            return Err(Reason::InvalidInput("malformed email address"));
        }
    }

    Ok(identifier)
}
