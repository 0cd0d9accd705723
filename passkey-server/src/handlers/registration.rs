//! Passkey registration endpoints

use axum::{
    extract::{rejection::JsonRejection, State},
    response::Response,
    Json,
};
use passkey_core::{CredentialCreationOptions, Reason, RegistrationResponseJson};
use serde::{Deserialize, Serialize};
use tower_sessions::Session;
use utoipa::ToSchema;

use super::{signed_in, AppState};
use crate::auth::OptionalAuth;
use crate::error::ApiError;
use crate::session::{self, Ceremony};

/// Body of `POST /register/begin`
#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct BeginRegistrationRequest {
    /// Username or email
    pub identifier: String,
    /// Name shown by the authenticator; defaults to the identifier
    #[serde(default)]
    pub display_name: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct BeginRegistrationResponse {
    pub status: &'static str,
    /// Pass to `navigator.credentials.create({ publicKey })`
    #[schema(value_type = Object)]
    pub public_key: CredentialCreationOptions,
}

/// POST /register/begin
///
/// Start registering a passkey. A signed-in caller registering their own
/// identifier adds a passkey to their account.
#[utoipa::path(
    post,
    path = "/register/begin",
    tag = "Registration",
    request_body = BeginRegistrationRequest,
    responses(
        (status = 200, description = "Creation options; ceremony token held in the session", body = BeginRegistrationResponse),
        (status = 400, description = "Invalid identifier"),
        (status = 409, description = "Identifier taken (only when account disclosure is `reveal`)"),
        (status = 503, description = "Credential store unavailable")
    )
)]
pub async fn begin_registration(
    State(state): State<AppState>,
    session: Session,
    OptionalAuth(auth): OptionalAuth,
    payload: Result<Json<BeginRegistrationRequest>, JsonRejection>,
) -> Result<Json<BeginRegistrationResponse>, ApiError> {
    let Json(req) = payload?;

    let challenge = state
        .engine
        .begin_registration(
            &req.identifier,
            req.display_name.as_deref(),
            auth.as_ref().map(|a| &a.user_handle),
        )
        .await
        .map_err(|reason| state.reject(reason))?;

    session::hold_ceremony(&session, Ceremony::Registration, &challenge.token).await?;
    tracing::debug!(signed_in = auth.is_some(), "Registration ceremony started");

    Ok(Json(BeginRegistrationResponse {
        status: "ok",
        public_key: challenge.options,
    }))
}

/// POST /register/finish
///
/// Verify the browser's `RegistrationResponseJSON` and sign the user in.
/// The pending ceremony is spent whatever the outcome, including a body
/// that is not a registration response.
#[utoipa::path(
    post,
    path = "/register/finish",
    tag = "Registration",
    request_body(content_type = "application/json", description = "RegistrationResponseJSON from navigator.credentials.create()"),
    responses(
        (status = 200, description = "Passkey registered; session signed in", body = super::StatusResponse),
        (status = 400, description = "Session expired or response rejected"),
        (status = 409, description = "Credential already registered"),
        (status = 503, description = "Credential store unavailable")
    )
)]
pub async fn finish_registration(
    State(state): State<AppState>,
    session: Session,
    payload: Result<Json<RegistrationResponseJson>, JsonRejection>,
) -> Result<Response, ApiError> {
    let token = session::take_ceremony(&session, Ceremony::Registration)
        .await?
        .ok_or_else(|| state.reject(Reason::SessionNotFound))?;
    let response = match payload {
        Ok(Json(response)) => response,
        Err(rejection) => {
            state.abandon(&token).await;
            return Err(rejection.into());
        }
    };

    match state.engine.finish_registration(&token, &response).await {
        Ok(success) => signed_in(&session, success.user_handle).await,
        Err(reason) => Err(state.reject(reason)),
    }
}
