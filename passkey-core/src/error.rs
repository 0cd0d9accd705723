use thiserror::Error;

/// Why a ceremony (or a password operation) did not succeed.
///
/// This is a closed set: the HTTP boundary matches on it exhaustively to pick
/// a status code and a user-safe message.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reason {
    #[error("Invalid input: {0}")]
    InvalidInput(&'static str),

    #[error("An account with that identifier already exists")]
    AccountExists,

    #[error("Ceremony session not found, expired or already used")]
    SessionNotFound,

    #[error("Client data type does not match the ceremony")]
    CeremonyTypeMismatch,

    #[error("Client data challenge does not match the issued challenge")]
    ChallengeMismatch,

    #[error("Client data origin is not an allowed origin")]
    OriginMismatch,

    #[error("Authenticator data RP ID hash does not match")]
    RpIdMismatch,

    #[error("Malformed attestation: {0}")]
    MalformedAttestation(&'static str),

    #[error("Malformed assertion: {0}")]
    MalformedAssertion(&'static str),

    #[error("Attestation statement could not be verified")]
    UntrustedAttestation,

    #[error("Credential ID is already registered")]
    CredentialAlreadyRegistered,

    #[error("Credential is not allowed for this ceremony")]
    CredentialNotAllowed,

    #[error("User handle does not match the credential owner")]
    UserHandleMismatch,

    #[error("User presence flag not set")]
    UserPresenceMissing,

    #[error("User verification flag not set")]
    UserVerificationMissing,

    #[error("Signature verification failed")]
    SignatureInvalid,

    #[error("Signature counter did not increase (stored {stored}, reported {reported})")]
    CounterRegression { stored: u32, reported: u32 },

    #[error("Invalid identifier or password")]
    InvalidCredentials,

    #[error("Not found")]
    NotFound,

    #[error("Credential store unavailable")]
    StoreUnavailable,
}

impl Reason {
    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidInput(_) => "INVALID_INPUT",
            Self::AccountExists => "ACCOUNT_EXISTS",
            Self::SessionNotFound => "SESSION_NOT_FOUND",
            Self::CeremonyTypeMismatch => "CEREMONY_TYPE_MISMATCH",
            Self::ChallengeMismatch => "CHALLENGE_MISMATCH",
            Self::OriginMismatch => "ORIGIN_MISMATCH",
            Self::RpIdMismatch => "RP_ID_MISMATCH",
            Self::MalformedAttestation(_) => "MALFORMED_ATTESTATION",
            Self::MalformedAssertion(_) => "MALFORMED_ASSERTION",
            Self::UntrustedAttestation => "UNTRUSTED_ATTESTATION",
            Self::CredentialAlreadyRegistered => "CREDENTIAL_ALREADY_REGISTERED",
            Self::CredentialNotAllowed => "CREDENTIAL_NOT_ALLOWED",
            Self::UserHandleMismatch => "USER_HANDLE_MISMATCH",
            Self::UserPresenceMissing => "USER_PRESENCE_MISSING",
            Self::UserVerificationMissing => "USER_VERIFICATION_MISSING",
            Self::SignatureInvalid => "SIGNATURE_INVALID",
            Self::CounterRegression { .. } => "COUNTER_REGRESSION",
            Self::InvalidCredentials => "INVALID_CREDENTIALS",
            Self::NotFound => "NOT_FOUND",
            Self::StoreUnavailable => "STORE_UNAVAILABLE",
        }
    }

    /// Only transient infrastructure failures may be retried; everything else
    /// requires a fresh "begin".
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::StoreUnavailable)
    }
}

impl From<StoreError> for Reason {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::DuplicateCredentialId => Reason::CredentialAlreadyRegistered,
            StoreError::AccountExists => Reason::AccountExists,
            StoreError::NotFound => Reason::NotFound,
            StoreError::Unavailable(_) | StoreError::Serialization(_) => Reason::StoreUnavailable,
        }
    }
}

/// Errors raised by credential and challenge stores.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("Credential ID already exists")]
    DuplicateCredentialId,

    #[error("User already exists")]
    AccountExists,

    #[error("Record not found")]
    NotFound,

    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl StoreError {
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

/// Relying party configuration errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("RP ID must not be empty")]
    EmptyRpId,

    #[error("At least one allowed origin is required")]
    NoOrigins,

    #[error("Invalid origin URL '{origin}': {reason}")]
    InvalidOrigin { origin: String, reason: String },

    #[error("Origin '{origin}' is not within RP ID '{rp_id}'")]
    OriginOutsideRpId { origin: String, rp_id: String },

    #[error("Challenge length must be at least {min} bytes, got {actual}")]
    ChallengeTooShort { min: usize, actual: usize },

    #[error("Challenge TTL must be greater than zero")]
    ZeroTtl,

    #[error("Invalid value for {name}: {value}")]
    InvalidValue { name: &'static str, value: String },

    #[error("Crypto error: {0}")]
    Crypto(#[from] openssl::error::ErrorStack),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

pub type CeremonyResult<T> = std::result::Result<T, Reason>;
