//! API error handling module
//!
//! Every failure leaves the server as `{"status":"error","errorMessage":..,"code":..}`.
//! Ceremony failures carry the engine's [`Reason`]; what the client is told
//! about them depends on the account disclosure policy.

use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use passkey_core::{AccountDisclosure, Reason};
use thiserror::Error;

/// API error type with structured variants for different error categories
#[derive(Debug, Error)]
pub enum ApiError {
    /// Bad request - body could not be read as the expected JSON
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Unauthorized - no valid login session
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Internal server error - unexpected server-side failure
    #[error("Internal error: {0}")]
    Internal(String),

    /// Service unavailable - a backing store is not reachable
    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    /// Ceremony or password operation failed
    #[error("{reason}")]
    Ceremony {
        reason: Reason,
        disclosure: AccountDisclosure,
    },
}

impl ApiError {
    /// Create a bad request error
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest(message.into())
    }

    /// Create an unauthorized error
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::Unauthorized(message.into())
    }

    /// Create an internal server error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Create a service unavailable error
    pub fn service_unavailable(message: impl Into<String>) -> Self {
        Self::ServiceUnavailable(message.into())
    }

    /// Wrap an engine failure, rendered according to `disclosure`.
    pub fn ceremony(reason: Reason, disclosure: AccountDisclosure) -> Self {
        Self::Ceremony { reason, disclosure }
    }

    fn conceals(&self) -> bool {
        matches!(
            self,
            Self::Ceremony {
                disclosure: AccountDisclosure::Conceal,
                ..
            }
        )
    }

    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Ceremony { reason, .. } => match reason {
                // A taken identifier must look like any other failed registration
                Reason::AccountExists if self.conceals() => StatusCode::BAD_REQUEST,
                Reason::AccountExists | Reason::CredentialAlreadyRegistered => {
                    StatusCode::CONFLICT
                }

                Reason::InvalidInput(_)
                | Reason::SessionNotFound
                | Reason::CeremonyTypeMismatch
                | Reason::ChallengeMismatch
                | Reason::OriginMismatch
                | Reason::RpIdMismatch
                | Reason::MalformedAttestation(_)
                | Reason::MalformedAssertion(_)
                | Reason::UntrustedAttestation
                | Reason::UserPresenceMissing
                | Reason::UserVerificationMissing => StatusCode::BAD_REQUEST,

                Reason::CredentialNotAllowed
                | Reason::UserHandleMismatch
                | Reason::SignatureInvalid
                | Reason::CounterRegression { .. }
                | Reason::InvalidCredentials
                | Reason::NotFound => StatusCode::UNAUTHORIZED,

                Reason::StoreUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            },
        }
    }

    /// Get the error code for programmatic error handling
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::BadRequest(_) => "INVALID_INPUT",
            Self::Unauthorized(_) => "UNAUTHORIZED",
            Self::Internal(_) => "INTERNAL_ERROR",
            Self::ServiceUnavailable(_) => "SERVICE_UNAVAILABLE",
            Self::Ceremony { reason, .. } if self.conceals() => match reason {
                Reason::AccountExists => "REGISTRATION_FAILED",
                Reason::NotFound | Reason::CredentialNotAllowed => "PASSKEY_NOT_RECOGNISED",
                other => other.code(),
            },
            Self::Ceremony { reason, .. } => reason.code(),
        }
    }

    /// Get sanitized error message for client response
    pub fn client_message(&self) -> String {
        let Self::Ceremony { reason, .. } = self else {
            return self.to_string();
        };

        let message = match reason {
            Reason::AccountExists if self.conceals() => "Registration could not be completed",
            Reason::AccountExists => "An account with that identifier already exists",
            Reason::NotFound | Reason::CredentialNotAllowed if self.conceals() => {
                "Passkey not recognised"
            }
            Reason::NotFound => "No account or passkey found",
            Reason::CredentialNotAllowed => "This passkey cannot be used for that account",
            Reason::InvalidInput(detail) => return format!("Invalid input: {}", detail),
            Reason::SessionNotFound => "Session expired or already used, please start again",
            Reason::CeremonyTypeMismatch
            | Reason::ChallengeMismatch
            | Reason::OriginMismatch
            | Reason::RpIdMismatch => "The authenticator response does not match this request",
            Reason::MalformedAttestation(_) | Reason::MalformedAssertion(_) => {
                "The authenticator response could not be read"
            }
            Reason::UntrustedAttestation => "This authenticator is not accepted",
            Reason::CredentialAlreadyRegistered => "This passkey is already registered",
            Reason::UserHandleMismatch | Reason::SignatureInvalid => "Passkey not recognised",
            Reason::UserPresenceMissing | Reason::UserVerificationMissing => {
                "User verification is required"
            }
            Reason::CounterRegression { .. } => {
                "This passkey may have been cloned and cannot be used"
            }
            Reason::InvalidCredentials => "Invalid identifier or password",
            Reason::StoreUnavailable => "Service temporarily unavailable, please retry",
        };
        message.to_string()
    }

    /// Get the error category for logging
    fn error_category(&self) -> &'static str {
        match self {
            Self::BadRequest(_) => "bad_request",
            Self::Unauthorized(_) => "unauthorized",
            Self::Internal(_) => "internal",
            Self::ServiceUnavailable(_) => "service_unavailable",
            Self::Ceremony { .. } => "ceremony",
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::BadRequest(rejection.body_text())
    }
}

impl From<tower_sessions::session::Error> for ApiError {
    fn from(e: tower_sessions::session::Error) -> Self {
        Self::Internal(format!("Session error: {}", e))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let category = self.error_category();
        let code = self.error_code();
        let internal_message = self.to_string();
        let client_message = self.client_message();

        // Log based on severity, always including internal details
        match &self {
            Self::BadRequest(_) => {
                tracing::warn!(
                    status = %status,
                    category = category,
                    code = code,
                    error = %internal_message,
                    "Client error"
                );
            }
            Self::Unauthorized(_) => {
                tracing::warn!(
                    status = %status,
                    category = category,
                    code = code,
                    error = %internal_message,
                    "Authentication error"
                );
            }
            Self::ServiceUnavailable(_)
            | Self::Ceremony {
                reason: Reason::StoreUnavailable,
                ..
            } => {
                tracing::error!(
                    status = %status,
                    category = category,
                    code = code,
                    error = %internal_message,
                    "Service unavailable"
                );
            }
            Self::Internal(_) => {
                tracing::error!(
                    status = %status,
                    category = category,
                    code = code,
                    error = %internal_message,
                    "Server error"
                );
            }
            Self::Ceremony { reason, .. } => {
                tracing::warn!(
                    status = %status,
                    category = category,
                    code = code,
                    reason = reason.code(),
                    error = %internal_message,
                    "Ceremony rejected"
                );
            }
        }

        let body = serde_json::json!({
            "status": "error",
            "errorMessage": client_message,
            "code": code,
        });

        (status, Json(body)).into_response()
    }
}
