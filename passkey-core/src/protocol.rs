//! JSON shapes exchanged with the browser's credential API
//!
//! Field names follow the WebAuthn JSON serialisation (`PublicKeyCredential.toJSON()`),
//! so binary members are base64url strings.

use serde::{Deserialize, Serialize};

use crate::base64url::Base64UrlBytes;
use crate::error::Reason;
use crate::model::CredentialId;

pub const PUBLIC_KEY_TYPE: &str = "public-key";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelyingPartyEntity {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserEntity {
    pub id: Base64UrlBytes,
    pub name: String,
    pub display_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PubKeyCredParam {
    #[serde(rename = "type")]
    pub type_: String,
    pub alg: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialDescriptor {
    #[serde(rename = "type")]
    pub type_: String,
    pub id: CredentialId,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub transports: Vec<String>,
}

impl CredentialDescriptor {
    pub fn public_key(id: CredentialId, transports: Vec<String>) -> Self {
        Self {
            type_: PUBLIC_KEY_TYPE.to_string(),
            id,
            transports,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthenticatorSelection {
    pub resident_key: String,
    pub require_resident_key: bool,
    pub user_verification: String,
}

/// `PublicKeyCredentialCreationOptions`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialCreationOptions {
    pub rp: RelyingPartyEntity,
    pub user: UserEntity,
    pub challenge: Base64UrlBytes,
    pub pub_key_cred_params: Vec<PubKeyCredParam>,
    /// Milliseconds
    pub timeout: u64,
    pub exclude_credentials: Vec<CredentialDescriptor>,
    pub authenticator_selection: AuthenticatorSelection,
    pub attestation: String,
}

/// `PublicKeyCredentialRequestOptions`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialRequestOptions {
    pub challenge: Base64UrlBytes,
    pub timeout: u64,
    pub rp_id: String,
    pub allow_credentials: Vec<CredentialDescriptor>,
    pub user_verification: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthenticatorAttestationResponseJson {
    #[serde(rename = "clientDataJSON")]
    pub client_data_json: Base64UrlBytes,
    pub attestation_object: Base64UrlBytes,
    #[serde(default)]
    pub transports: Vec<String>,
}

/// `RegistrationResponseJSON`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationResponseJson {
    pub id: String,
    pub raw_id: Base64UrlBytes,
    #[serde(rename = "type")]
    pub type_: String,
    pub response: AuthenticatorAttestationResponseJson,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authenticator_attachment: Option<String>,
}

impl RegistrationResponseJson {
    pub fn validate(&self) -> Result<(), Reason> {
        validate_envelope(&self.id, &self.raw_id, &self.type_)
            .map_err(Reason::MalformedAttestation)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthenticatorAssertionResponseJson {
    #[serde(rename = "clientDataJSON")]
    pub client_data_json: Base64UrlBytes,
    pub authenticator_data: Base64UrlBytes,
    pub signature: Base64UrlBytes,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_handle: Option<Base64UrlBytes>,
}

/// `AuthenticationResponseJSON`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthenticationResponseJson {
    pub id: String,
    pub raw_id: Base64UrlBytes,
    #[serde(rename = "type")]
    pub type_: String,
    pub response: AuthenticatorAssertionResponseJson,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authenticator_attachment: Option<String>,
}

impl AuthenticationResponseJson {
    pub fn validate(&self) -> Result<(), Reason> {
        validate_envelope(&self.id, &self.raw_id, &self.type_).map_err(Reason::MalformedAssertion)
    }

    pub fn credential_id(&self) -> CredentialId {
        CredentialId(self.raw_id.clone())
    }
}

/// `id` must be the base64url form of `rawId`, and the type must be `public-key`.
fn validate_envelope(id: &str, raw_id: &Base64UrlBytes, type_: &str) -> Result<(), &'static str> {
    if type_ != PUBLIC_KEY_TYPE {
        return Err("credential type is not public-key");
    }
    if raw_id.is_empty() {
        return Err("empty credential id");
    }
    match crate::base64url::decode(id) {
        Ok(decoded) if decoded == raw_id.as_slice() => Ok(()),
        _ => Err("id does not match rawId"),
    }
}
