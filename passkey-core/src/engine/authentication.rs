//! Authentication ceremonies (`navigator.credentials.get`), with and without
//! an identifier.

use chrono::Utc;
use tracing::{error, info, instrument, warn};

use super::{log_failure, CeremonyEngine};
use crate::authenticator_data::AuthenticatorData;
use crate::base64url::Base64UrlBytes;
use crate::config::{AccountDisclosure, CounterPolicy};
use crate::crypto::CoseKey;
use crate::error::Reason;
use crate::model::{normalize_identifier, CredentialId, UserHandle};
use crate::protocol::{AuthenticationResponseJson, CredentialDescriptor, CredentialRequestOptions};
use crate::session::{CeremonyKind, SessionToken};
use crate::store::{counter_advances, CounterUpdate};

const DECOY_CREDENTIAL_DOMAIN: &[u8] = b"decoy-credential\0";
const DECOY_CREDENTIAL_LEN: usize = 16;

#[derive(Debug, Clone)]
pub struct AuthenticationChallenge {
    pub token: SessionToken,
    pub options: CredentialRequestOptions,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticationSuccess {
    pub user_handle: UserHandle,
    pub credential_id: CredentialId,
    pub sign_count: u32,
}

impl CeremonyEngine {
    /// Start an authentication for a known identifier.
    ///
    /// Under [`AccountDisclosure::Conceal`] an identifier with no passkeys still
    /// gets a challenge, with a stable decoy credential id that no
    /// authenticator holds.
    #[instrument(level = "debug", skip(self))]
    pub async fn begin_authentication(
        &self,
        identifier: &str,
    ) -> Result<AuthenticationChallenge, Reason> {
        let identifier = normalize_identifier(identifier)?;

        let user = self
            .retried("find_user_by_identifier", || {
                self.credentials.find_user_by_identifier(&identifier)
            })
            .await?;
        let credentials = match &user {
            Some(user) => {
                self.retried("list_credentials", || self.credentials.list_credentials(&user.handle))
                    .await?
            }
            None => Vec::new(),
        };

        let (user_handle, descriptors) = match user {
            Some(user) if !credentials.is_empty() => {
                let descriptors = credentials
                    .into_iter()
                    .map(|c| CredentialDescriptor::public_key(c.id, c.transports))
                    .collect::<Vec<_>>();
                (user.handle, descriptors)
            }
            _ if self.config.account_disclosure == AccountDisclosure::Reveal => {
                return Err(Reason::NotFound);
            }
            user => {
                let handle = match user {
                    Some(user) => user.handle,
                    None => self.derive_user_handle(&identifier)?,
                };
                let mut decoy = self.keyed_digest(DECOY_CREDENTIAL_DOMAIN, identifier.as_bytes())?;
                decoy.truncate(DECOY_CREDENTIAL_LEN);
                (
                    handle,
                    vec![CredentialDescriptor::public_key(CredentialId::from(decoy), Vec::new())],
                )
            }
        };

        let allowed = descriptors.iter().map(|d| d.id.clone()).collect();
        let (token, challenge) = self
            .open_session(CeremonyKind::Authentication {
                user_handle,
                allowed,
            })
            .await?;

        Ok(AuthenticationChallenge {
            token,
            options: self.request_options(challenge, descriptors),
        })
    }

    /// Start a username-less authentication: any resident credential may answer.
    #[instrument(level = "debug", skip(self))]
    pub async fn begin_discoverable_authentication(
        &self,
    ) -> Result<AuthenticationChallenge, Reason> {
        let (token, challenge) = self
            .open_session(CeremonyKind::DiscoverableAuthentication)
            .await?;
        Ok(AuthenticationChallenge {
            token,
            options: self.request_options(challenge, Vec::new()),
        })
    }

    fn request_options(
        &self,
        challenge: Vec<u8>,
        allow_credentials: Vec<CredentialDescriptor>,
    ) -> CredentialRequestOptions {
        CredentialRequestOptions {
            challenge: Base64UrlBytes(challenge),
            timeout: self.timeout_ms(),
            rp_id: self.config.rp_id.clone(),
            allow_credentials,
            user_verification: self.config.user_verification.as_str().to_string(),
        }
    }

    /// Verify an assertion for either authentication kind.
    ///
    /// The session is consumed whatever the outcome. The stored credential is
    /// only touched once the signature has verified.
    #[instrument(level = "debug", skip_all)]
    pub async fn finish_authentication(
        &self,
        token: &SessionToken,
        response: &AuthenticationResponseJson,
    ) -> Result<AuthenticationSuccess, Reason> {
        let result = self.finish_authentication_inner(token, response).await;
        match &result {
            Ok(success) => info!(
                user_handle = %success.user_handle,
                credential_id = %success.credential_id,
                sign_count = success.sign_count,
                "Passkey authentication succeeded"
            ),
            Err(reason) => log_failure("authentication", reason),
        }
        result
    }

    async fn finish_authentication_inner(
        &self,
        token: &SessionToken,
        response: &AuthenticationResponseJson,
    ) -> Result<AuthenticationSuccess, Reason> {
        let session = self.consume_session(token).await?;
        if matches!(session.kind, CeremonyKind::Registration(_)) {
            return Err(Reason::CeremonyTypeMismatch);
        }

        response.validate()?;
        let client_data_hash = self.verify_client_data(
            &session,
            response.response.client_data_json.as_slice(),
            Reason::MalformedAssertion("client data is not valid JSON"),
        )?;

        let raw_auth_data = response.response.authenticator_data.as_slice();
        let auth_data =
            AuthenticatorData::parse(raw_auth_data).map_err(|e| Reason::MalformedAssertion(e.0))?;
        self.verify_rp_id_hash(&auth_data)?;

        let credential_id = response.credential_id();
        if let CeremonyKind::Authentication { allowed, .. } = &session.kind {
            if !allowed.contains(&credential_id) {
                return Err(Reason::CredentialNotAllowed);
            }
        }

        let credential = self
            .retried("find_credential", || self.credentials.find_credential(&credential_id))
            .await?
            .ok_or(Reason::NotFound)?;

        match (&session.kind, &response.response.user_handle) {
            (CeremonyKind::Authentication { user_handle, .. }, returned) => {
                if credential.user_handle != *user_handle {
                    return Err(Reason::CredentialNotAllowed);
                }
                if let Some(returned) = returned {
                    if returned.as_slice() != credential.user_handle.as_bytes() {
                        return Err(Reason::UserHandleMismatch);
                    }
                }
            }
            (_, Some(returned)) => {
                if returned.as_slice() != credential.user_handle.as_bytes() {
                    return Err(Reason::UserHandleMismatch);
                }
            }
            (_, None) => return Err(Reason::MalformedAssertion("missing user handle")),
        }

        self.verify_user_flags(&auth_data)?;

        let key = CoseKey::from_bytes(credential.public_key.as_slice()).map_err(|e| {
            error!(credential_id = %credential.id, error = %e, "Stored public key is unusable");
            Reason::SignatureInvalid
        })?;
        let mut signed = Vec::with_capacity(raw_auth_data.len() + client_data_hash.len());
        signed.extend_from_slice(raw_auth_data);
        signed.extend_from_slice(&client_data_hash);
        let verified = key
            .verify(response.response.signature.as_slice(), &signed)
            .map_err(|_| Reason::SignatureInvalid)?;
        if !verified {
            return Err(Reason::SignatureInvalid);
        }

        // the read above is advisory; the store decides atomically
        let reported = auth_data.sign_count;
        let used_at = Utc::now();
        let update = if counter_advances(credential.sign_count, reported) {
            self.bounded(
                "update_credential_counter",
                self.credentials
                    .update_credential_counter(&credential.id, reported, used_at),
            )
            .await?
        } else {
            CounterUpdate::Stale {
                stored: credential.sign_count,
            }
        };

        let sign_count = match update {
            CounterUpdate::Advanced => reported,
            CounterUpdate::Stale { stored } => match self.config.counter_policy {
                CounterPolicy::Reject => {
                    return Err(Reason::CounterRegression { stored, reported });
                }
                CounterPolicy::Warn => {
                    warn!(
                        credential_id = %credential.id,
                        stored,
                        reported,
                        "Signature counter did not increase, allowing per policy"
                    );
                    self.retried("touch_credential", || {
                        self.credentials.touch_credential(&credential.id, used_at)
                    })
                    .await?;
                    stored
                }
            },
        };

        Ok(AuthenticationSuccess {
            user_handle: credential.user_handle,
            credential_id: credential.id,
            sign_count,
        })
    }
}
