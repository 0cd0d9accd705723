//! Registration ceremony (`navigator.credentials.create`)

use chrono::Utc;
use tracing::{debug, info, instrument};
use uuid::Uuid;

use super::{log_failure, CeremonyEngine};
use crate::attestation::AttestationObject;
use crate::authenticator_data::AuthenticatorData;
use crate::base64url::Base64UrlBytes;
use crate::config::AccountDisclosure;
use crate::crypto::SUPPORTED_ALGORITHMS;
use crate::error::Reason;
use crate::model::{normalize_identifier, Credential, CredentialId, User, UserHandle, MAX_IDENTIFIER_LEN};
use crate::protocol::{
    AuthenticatorSelection, CredentialCreationOptions, CredentialDescriptor, PubKeyCredParam,
    RegistrationResponseJson, RelyingPartyEntity, UserEntity, PUBLIC_KEY_TYPE,
};
use crate::session::{CeremonyKind, PendingRegistration, SessionToken};

const MAX_TRANSPORTS: usize = 8;

/// Returned by registration begin: the options for the browser and the
/// token the caller must present at finish.
#[derive(Debug, Clone)]
pub struct RegistrationChallenge {
    pub token: SessionToken,
    pub options: CredentialCreationOptions,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistrationSuccess {
    pub user_handle: UserHandle,
    pub identifier: String,
    pub credential_id: CredentialId,
}

impl CeremonyEngine {
    /// Start registering a passkey for `identifier`.
    ///
    /// `authenticated` is the account the caller is already signed in to, if
    /// any. Only that account can have a passkey added to it; for any other
    /// taken identifier the outcome depends on [`AccountDisclosure`].
    #[instrument(level = "debug", skip(self, display_name, authenticated))]
    pub async fn begin_registration(
        &self,
        identifier: &str,
        display_name: Option<&str>,
        authenticated: Option<&UserHandle>,
    ) -> Result<RegistrationChallenge, Reason> {
        let identifier = normalize_identifier(identifier)?;
        let display_name = match display_name.map(str::trim) {
            Some(name) if name.chars().count() > MAX_IDENTIFIER_LEN => {
                return Err(Reason::InvalidInput("display name is too long"))
            }
            Some(name) if !name.is_empty() => name.to_string(),
            _ => identifier.clone(),
        };

        let existing = self
            .retried("find_user_by_identifier", || {
                self.credentials.find_user_by_identifier(&identifier)
            })
            .await?;

        let (pending, exclude) = match existing {
            Some(user) if authenticated == Some(&user.handle) => {
                let credentials = self
                    .retried("list_credentials", || self.credentials.list_credentials(&user.handle))
                    .await?;
                let exclude = credentials
                    .into_iter()
                    .map(|c| CredentialDescriptor::public_key(c.id, c.transports))
                    .collect();
                let pending = PendingRegistration {
                    identifier,
                    display_name: user.display_name,
                    user_handle: user.handle,
                    existing_user: true,
                };
                (pending, exclude)
            }
            Some(_) if self.config.account_disclosure == AccountDisclosure::Reveal => {
                return Err(Reason::AccountExists);
            }
            _ => {
                // Taken identifiers look exactly like free ones here; finish rejects them.
                let pending = PendingRegistration {
                    user_handle: self.derive_user_handle(&identifier)?,
                    identifier,
                    display_name,
                    existing_user: false,
                };
                (pending, Vec::new())
            }
        };

        let user = UserEntity {
            id: pending.user_handle.0.clone(),
            name: pending.identifier.clone(),
            display_name: pending.display_name.clone(),
        };

        let (token, challenge) = self
            .open_session(CeremonyKind::Registration(pending))
            .await?;

        let options = CredentialCreationOptions {
            rp: RelyingPartyEntity {
                id: self.config.rp_id.clone(),
                name: self.config.rp_name.clone(),
            },
            user,
            challenge: Base64UrlBytes(challenge),
            pub_key_cred_params: SUPPORTED_ALGORITHMS
                .iter()
                .map(|alg| PubKeyCredParam {
                    type_: PUBLIC_KEY_TYPE.to_string(),
                    alg: *alg,
                })
                .collect(),
            timeout: self.timeout_ms(),
            exclude_credentials: exclude,
            authenticator_selection: AuthenticatorSelection {
                resident_key: "required".to_string(),
                require_resident_key: true,
                user_verification: self.config.user_verification.as_str().to_string(),
            },
            attestation: self.config.attestation_policy.conveyance().to_string(),
        };

        Ok(RegistrationChallenge { token, options })
    }

    /// Verify the authenticator's attestation and commit the credential.
    ///
    /// The session is consumed whatever the outcome.
    #[instrument(level = "debug", skip_all)]
    pub async fn finish_registration(
        &self,
        token: &SessionToken,
        response: &RegistrationResponseJson,
    ) -> Result<RegistrationSuccess, Reason> {
        let result = self.finish_registration_inner(token, response).await;
        match &result {
            Ok(success) => info!(
                user_handle = %success.user_handle,
                credential_id = %success.credential_id,
                "Passkey registered"
            ),
            Err(reason) => log_failure("registration", reason),
        }
        result
    }

    async fn finish_registration_inner(
        &self,
        token: &SessionToken,
        response: &RegistrationResponseJson,
    ) -> Result<RegistrationSuccess, Reason> {
        let session = self.consume_session(token).await?;
        let CeremonyKind::Registration(pending) = &session.kind else {
            return Err(Reason::CeremonyTypeMismatch);
        };

        response.validate()?;
        let client_data_hash = self.verify_client_data(
            &session,
            response.response.client_data_json.as_slice(),
            Reason::MalformedAttestation("client data is not valid JSON"),
        )?;

        let object = AttestationObject::parse(response.response.attestation_object.as_slice())
            .map_err(|e| Reason::MalformedAttestation(e.0))?;
        let auth_data =
            AuthenticatorData::parse(&object.auth_data).map_err(|e| Reason::MalformedAttestation(e.0))?;
        self.verify_rp_id_hash(&auth_data)?;

        let attested = auth_data
            .attested
            .as_ref()
            .ok_or(Reason::MalformedAttestation("missing attested credential data"))?;
        if attested.credential_id != response.raw_id.as_slice() {
            return Err(Reason::MalformedAttestation("credential id does not match rawId"));
        }
        self.verify_user_flags(&auth_data)?;

        let credential_id = CredentialId::from(attested.credential_id.clone());
        let already = self
            .retried("find_credential", || self.credentials.find_credential(&credential_id))
            .await?;
        if already.is_some() {
            return Err(Reason::CredentialAlreadyRegistered);
        }

        let format = object.verify(
            &auth_data,
            attested,
            &client_data_hash,
            self.config.attestation_policy,
        )?;
        debug!(fmt = format.as_str(), sign_count = auth_data.sign_count, "Attestation accepted");

        let now = Utc::now();
        let credential = Credential {
            id: credential_id.clone(),
            user_handle: pending.user_handle.clone(),
            public_key: Base64UrlBytes(attested.public_key_bytes.clone()),
            algorithm: attested.public_key.alg,
            sign_count: auth_data.sign_count,
            transports: response
                .response
                .transports
                .iter()
                .take(MAX_TRANSPORTS)
                .cloned()
                .collect(),
            attestation_format: format,
            aaguid: Uuid::from_bytes(attested.aaguid),
            created_at: now,
            last_used_at: None,
        };

        if pending.existing_user {
            self.bounded("add_credential", self.credentials.add_credential(credential))
                .await?;
        } else {
            let user = User {
                handle: pending.user_handle.clone(),
                identifier: pending.identifier.clone(),
                display_name: pending.display_name.clone(),
                password_hash: None,
                created_at: now,
            };
            self.bounded(
                "register_user_with_credential",
                self.credentials.register_user_with_credential(user, credential),
            )
            .await?;
        }

        Ok(RegistrationSuccess {
            user_handle: pending.user_handle.clone(),
            identifier: pending.identifier.clone(),
            credential_id,
        })
    }
}
