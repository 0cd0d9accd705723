//! Passkey Core - WebAuthn relying-party ceremony engine
//!
//! Implements the server side of passkey registration and authentication:
//! challenge issue and single-use consumption, client-data and
//! authenticator-data checks, attestation verification, assertion signature
//! verification and signature-counter tracking.
//!
//! # Features
//!
//! - Registration, authentication and discoverable ("autofill") authentication
//! - ES256 and RS256 credentials (OpenSSL)
//! - `none`, `packed` and `fido-u2f` attestation
//! - Pluggable credential and challenge stores, with in-memory implementations
//! - Configurable account-existence disclosure and counter policy
//! - PBKDF2 password accounts alongside passkeys
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use passkey_core::{
//!     CeremonyEngine, MemoryChallengeStore, MemoryCredentialStore, RelyingPartyConfig,
//! };
//!
//! # async fn example(response: passkey_core::RegistrationResponseJson) -> Result<(), Box<dyn std::error::Error>> {
//! let config = RelyingPartyConfig::builder("example.com")
//!     .rp_name("Example")
//!     .origin("https://example.com")
//!     .build()?;
//! let engine = CeremonyEngine::new(
//!     config,
//!     Arc::new(MemoryCredentialStore::new()),
//!     Arc::new(MemoryChallengeStore::new()),
//! );
//!
//! // Send `begin.options` to the browser, keep `begin.token` in a cookie
//! let begin = engine.begin_registration("alice@example.com", None, None).await?;
//!
//! // ... later, with the browser's response
//! let registered = engine.finish_registration(&begin.token, &response).await?;
//! println!("registered {}", registered.credential_id);
//! # Ok(())
//! # }
//! ```

pub mod attestation;
pub mod authenticator_data;
pub mod base64url;
pub mod client_data;
pub mod config;
pub mod crypto;
pub mod engine;
pub mod error;
pub mod model;
pub mod password;
pub mod protocol;
pub mod session;
pub mod store;

#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

pub use base64url::Base64UrlBytes;
pub use config::{
    AccountDisclosure, AttestationPolicy, CounterPolicy, RelyingPartyConfig,
    RelyingPartyConfigBuilder, UserVerification,
};
pub use engine::{
    AuthenticationChallenge, AuthenticationSuccess, CeremonyEngine, RegistrationChallenge,
    RegistrationSuccess,
};
pub use error::{CeremonyResult, ConfigError, Reason, StoreError, StoreResult};
pub use model::{normalize_identifier, AttestationFormat, Credential, CredentialId, User, UserHandle};
pub use password::PasswordHasher;
pub use protocol::{
    AuthenticationResponseJson, CredentialCreationOptions, CredentialRequestOptions,
    RegistrationResponseJson,
};
pub use session::SessionToken;
pub use store::{
    ChallengeStore, CounterUpdate, CredentialStore, MemoryChallengeStore, MemoryCredentialStore,
};
