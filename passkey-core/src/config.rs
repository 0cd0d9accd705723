//! Relying Party configuration
//!
//! Identity (RP ID, name, allowed origins) plus the policy switches that the
//! ceremony engine consults.

use std::time::Duration;

use url::Url;
use zeroize::Zeroizing;

use crate::crypto;
use crate::error::ConfigError;

/// Minimum challenge size in bytes.
pub const MIN_CHALLENGE_LEN: usize = 16;

const DEFAULT_CHALLENGE_LEN: usize = 32;
const DEFAULT_CHALLENGE_TTL: Duration = Duration::from_secs(300);
const DEFAULT_CEREMONY_TIMEOUT: Duration = Duration::from_secs(60);
const DEFAULT_STORE_TIMEOUT: Duration = Duration::from_secs(5);

/// Whether "begin" calls reveal that an identifier has (or lacks) an account.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum AccountDisclosure {
    /// Unknown identifiers get a plausible challenge; taken identifiers fail at finish
    #[default]
    Conceal,
    /// Unknown identifiers fail login begin; taken identifiers fail registration begin
    Reveal,
}

/// How attestation statements are treated at registration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum AttestationPolicy {
    /// `none` accepted; `packed` and `fido-u2f` verified; other formats rejected
    #[default]
    Strict,
    /// Every format accepted without statement verification
    Permissive,
}

impl AttestationPolicy {
    /// Value for `attestation` in creation options.
    pub fn conveyance(&self) -> &'static str {
        match self {
            Self::Strict => "direct",
            Self::Permissive => "none",
        }
    }
}

/// WebAuthn user verification requirement.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum UserVerification {
    #[default]
    Required,
    Preferred,
    Discouraged,
}

impl UserVerification {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Required => "required",
            Self::Preferred => "preferred",
            Self::Discouraged => "discouraged",
        }
    }
}

/// What to do when an authenticator's signature counter goes backwards.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CounterPolicy {
    /// Fail the ceremony with `CounterRegression`
    #[default]
    Reject,
    /// Log the regression and let the ceremony succeed
    Warn,
}

macro_rules! parse_policy {
    ($ty:ty, $name:literal, { $($s:literal => $v:expr),+ $(,)? }) => {
        impl std::str::FromStr for $ty {
            type Err = ConfigError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s.trim().to_ascii_lowercase().as_str() {
                    $($s => Ok($v),)+
                    _ => Err(ConfigError::InvalidValue {
                        name: $name,
                        value: s.to_string(),
                    }),
                }
            }
        }
    };
}

parse_policy!(AccountDisclosure, "ACCOUNT_DISCLOSURE", {
    "conceal" => AccountDisclosure::Conceal,
    "reveal" => AccountDisclosure::Reveal,
});
parse_policy!(AttestationPolicy, "ATTESTATION_POLICY", {
    "strict" => AttestationPolicy::Strict,
    "permissive" => AttestationPolicy::Permissive,
});
parse_policy!(UserVerification, "USER_VERIFICATION", {
    "required" => UserVerification::Required,
    "preferred" => UserVerification::Preferred,
    "discouraged" => UserVerification::Discouraged,
});
parse_policy!(CounterPolicy, "COUNTER_POLICY", {
    "reject" => CounterPolicy::Reject,
    "warn" => CounterPolicy::Warn,
});

/// Validated relying party configuration.
#[derive(Clone)]
pub struct RelyingPartyConfig {
    pub rp_id: String,
    pub rp_name: String,
    /// ASCII-serialised origins (`scheme://host[:port]`)
    pub origins: Vec<String>,
    pub challenge_len: usize,
    pub challenge_ttl: Duration,
    pub ceremony_timeout: Duration,
    pub store_timeout: Duration,
    pub account_disclosure: AccountDisclosure,
    pub attestation_policy: AttestationPolicy,
    pub user_verification: UserVerification,
    pub counter_policy: CounterPolicy,
    pub(crate) user_handle_secret: Zeroizing<Vec<u8>>,
    pub(crate) rp_id_hash: [u8; 32],
}

impl RelyingPartyConfig {
    pub fn builder(rp_id: impl Into<String>) -> RelyingPartyConfigBuilder {
        RelyingPartyConfigBuilder::new(rp_id)
    }

    /// SHA-256 of the RP ID, as expected in authenticator data.
    pub fn rp_id_hash(&self) -> &[u8; 32] {
        &self.rp_id_hash
    }

    /// Whether a client-data origin is one of the configured origins.
    pub fn is_allowed_origin(&self, origin: &str) -> bool {
        match Url::parse(origin) {
            Ok(url) => {
                let serialized = url.origin().ascii_serialization();
                self.origins.iter().any(|o| *o == serialized)
            }
            Err(_) => false,
        }
    }
}

impl std::fmt::Debug for RelyingPartyConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelyingPartyConfig")
            .field("rp_id", &self.rp_id)
            .field("rp_name", &self.rp_name)
            .field("origins", &self.origins)
            .field("challenge_len", &self.challenge_len)
            .field("challenge_ttl", &self.challenge_ttl)
            .field("account_disclosure", &self.account_disclosure)
            .field("attestation_policy", &self.attestation_policy)
            .field("user_verification", &self.user_verification)
            .field("counter_policy", &self.counter_policy)
            .field("user_handle_secret", &"[REDACTED]")
            .finish()
    }
}

/// Builder for [`RelyingPartyConfig`].
#[derive(Debug, Clone)]
pub struct RelyingPartyConfigBuilder {
    rp_id: String,
    rp_name: Option<String>,
    origins: Vec<String>,
    challenge_len: usize,
    challenge_ttl: Duration,
    ceremony_timeout: Duration,
    store_timeout: Duration,
    account_disclosure: AccountDisclosure,
    attestation_policy: AttestationPolicy,
    user_verification: UserVerification,
    counter_policy: CounterPolicy,
    user_handle_secret: Option<Vec<u8>>,
}

impl RelyingPartyConfigBuilder {
    pub fn new(rp_id: impl Into<String>) -> Self {
        Self {
            rp_id: rp_id.into(),
            rp_name: None,
            origins: Vec::new(),
            challenge_len: DEFAULT_CHALLENGE_LEN,
            challenge_ttl: DEFAULT_CHALLENGE_TTL,
            ceremony_timeout: DEFAULT_CEREMONY_TIMEOUT,
            store_timeout: DEFAULT_STORE_TIMEOUT,
            account_disclosure: AccountDisclosure::default(),
            attestation_policy: AttestationPolicy::default(),
            user_verification: UserVerification::default(),
            counter_policy: CounterPolicy::default(),
            user_handle_secret: None,
        }
    }

    pub fn rp_name(mut self, name: impl Into<String>) -> Self {
        self.rp_name = Some(name.into());
        self
    }

    pub fn origin(mut self, origin: impl Into<String>) -> Self {
        self.origins.push(origin.into());
        self
    }

    pub fn origins<I, S>(mut self, origins: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.origins.extend(origins.into_iter().map(Into::into));
        self
    }

    pub fn challenge_len(mut self, len: usize) -> Self {
        self.challenge_len = len;
        self
    }

    pub fn challenge_ttl(mut self, ttl: Duration) -> Self {
        self.challenge_ttl = ttl;
        self
    }

    pub fn ceremony_timeout(mut self, timeout: Duration) -> Self {
        self.ceremony_timeout = timeout;
        self
    }

    pub fn store_timeout(mut self, timeout: Duration) -> Self {
        self.store_timeout = timeout;
        self
    }

    pub fn account_disclosure(mut self, policy: AccountDisclosure) -> Self {
        self.account_disclosure = policy;
        self
    }

    pub fn attestation_policy(mut self, policy: AttestationPolicy) -> Self {
        self.attestation_policy = policy;
        self
    }

    pub fn user_verification(mut self, uv: UserVerification) -> Self {
        self.user_verification = uv;
        self
    }

    pub fn counter_policy(mut self, policy: CounterPolicy) -> Self {
        self.counter_policy = policy;
        self
    }

    pub fn user_handle_secret(mut self, secret: Vec<u8>) -> Self {
        self.user_handle_secret = Some(secret);
        self
    }

    pub fn build(self) -> Result<RelyingPartyConfig, ConfigError> {
        let rp_id = self.rp_id.trim().to_ascii_lowercase();
        if rp_id.is_empty() {
            return Err(ConfigError::EmptyRpId);
        }
        if self.origins.is_empty() {
            return Err(ConfigError::NoOrigins);
        }
        if self.challenge_len < MIN_CHALLENGE_LEN {
            return Err(ConfigError::ChallengeTooShort {
                min: MIN_CHALLENGE_LEN,
                actual: self.challenge_len,
            });
        }
        if self.challenge_ttl.is_zero() {
            return Err(ConfigError::ZeroTtl);
        }

        let mut origins = Vec::with_capacity(self.origins.len());
        for origin in &self.origins {
            origins.push(validate_origin(origin, &rp_id)?);
        }

        let user_handle_secret = match self.user_handle_secret {
            Some(secret) if !secret.is_empty() => secret,
            _ => {
                tracing::warn!(
                    "No user handle secret configured, generated a per-process secret"
                );
                crypto::random_bytes(32)?
            }
        };

        Ok(RelyingPartyConfig {
            rp_id_hash: crypto::sha256(rp_id.as_bytes()),
            rp_name: self.rp_name.unwrap_or_else(|| rp_id.clone()),
            rp_id,
            origins,
            challenge_len: self.challenge_len,
            challenge_ttl: self.challenge_ttl,
            ceremony_timeout: self.ceremony_timeout,
            store_timeout: self.store_timeout,
            account_disclosure: self.account_disclosure,
            attestation_policy: self.attestation_policy,
            user_verification: self.user_verification,
            counter_policy: self.counter_policy,
            user_handle_secret: Zeroizing::new(user_handle_secret),
        })
    }
}

fn validate_origin(origin: &str, rp_id: &str) -> Result<String, ConfigError> {
    let url = Url::parse(origin).map_err(|e| ConfigError::InvalidOrigin {
        origin: origin.to_string(),
        reason: e.to_string(),
    })?;

    if url.scheme() != "https" && url.scheme() != "http" {
        return Err(ConfigError::InvalidOrigin {
            origin: origin.to_string(),
            reason: format!("unsupported scheme '{}'", url.scheme()),
        });
    }

    let host = url.host_str().ok_or_else(|| ConfigError::InvalidOrigin {
        origin: origin.to_string(),
        reason: "missing host".to_string(),
    })?;

    if host != rp_id && !host.ends_with(&format!(".{rp_id}")) {
        return Err(ConfigError::OriginOutsideRpId {
            origin: origin.to_string(),
            rp_id: rp_id.to_string(),
        });
    }

    Ok(url.origin().ascii_serialization())
}
