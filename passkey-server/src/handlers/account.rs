//! Signed-in account view

use axum::{extract::State, Json};
use chrono::{DateTime, Utc};
use passkey_core::Credential;
use serde::Serialize;
use utoipa::ToSchema;

use super::AppState;
use crate::auth::AuthenticatedUser;
use crate::error::ApiError;

/// One registered passkey as shown to its owner
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PasskeySummary {
    /// Credential ID, base64url
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub last_used_at: Option<DateTime<Utc>>,
    pub sign_count: u32,
    pub transports: Vec<String>,
    /// Attestation statement format accepted at registration
    pub attestation_format: &'static str,
}

impl From<Credential> for PasskeySummary {
    fn from(credential: Credential) -> Self {
        Self {
            id: credential.id.to_string(),
            created_at: credential.created_at,
            last_used_at: credential.last_used_at,
            sign_count: credential.sign_count,
            transports: credential.transports,
            attestation_format: credential.attestation_format.as_str(),
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AccountResponse {
    pub status: &'static str,
    pub identifier: String,
    pub display_name: String,
    /// Whether the account can also sign in with a password
    pub has_password: bool,
    pub passkeys: Vec<PasskeySummary>,
}

/// GET /me
///
/// The signed-in user's account and passkeys.
#[utoipa::path(
    get,
    path = "/me",
    tag = "Account",
    responses(
        (status = 200, description = "Account details", body = AccountResponse),
        (status = 401, description = "Not signed in")
    )
)]
pub async fn me(
    State(state): State<AppState>,
    auth: AuthenticatedUser,
) -> Result<Json<AccountResponse>, ApiError> {
    let (user, credentials) = state
        .engine
        .account(&auth.user_handle)
        .await
        .map_err(|reason| state.reject(reason))?;

    Ok(Json(AccountResponse {
        status: "ok",
        identifier: user.identifier,
        display_name: user.display_name,
        has_password: user.password_hash.is_some(),
        passkeys: credentials.into_iter().map(PasskeySummary::from).collect(),
    }))
}
