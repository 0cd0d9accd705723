//! Passkey login endpoints, with and without an identifier

use axum::{
    extract::{rejection::JsonRejection, State},
    response::Response,
    Json,
};
use passkey_core::{
    AuthenticationChallenge, AuthenticationResponseJson, CredentialRequestOptions, Reason,
};
use serde::{Deserialize, Serialize};
use tower_sessions::Session;
use utoipa::ToSchema;

use super::{signed_in, AppState};
use crate::error::ApiError;
use crate::session::{self, Ceremony};

/// Body of `POST /login/begin`
#[derive(Debug, Deserialize, ToSchema)]
pub struct BeginLoginRequest {
    /// Username or email
    pub identifier: String,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct BeginLoginResponse {
    pub status: &'static str,
    /// Pass to `navigator.credentials.get({ publicKey })`
    #[schema(value_type = Object)]
    pub public_key: CredentialRequestOptions,
}

/// POST /login/begin
#[utoipa::path(
    post,
    path = "/login/begin",
    tag = "Authentication",
    request_body = BeginLoginRequest,
    responses(
        (status = 200, description = "Request options; ceremony token held in the session", body = BeginLoginResponse),
        (status = 400, description = "Invalid identifier"),
        (status = 401, description = "No account (only when account disclosure is `reveal`)"),
        (status = 503, description = "Credential store unavailable")
    )
)]
pub async fn begin_login(
    State(state): State<AppState>,
    session: Session,
    payload: Result<Json<BeginLoginRequest>, JsonRejection>,
) -> Result<Json<BeginLoginResponse>, ApiError> {
    let Json(req) = payload?;
    let challenge = state
        .engine
        .begin_authentication(&req.identifier)
        .await
        .map_err(|reason| state.reject(reason))?;
    challenge_response(&session, challenge).await
}

/// POST /discoverable_login/begin
///
/// Username-less login: `allowCredentials` is empty and the authenticator
/// picks a resident passkey. Any request body is ignored.
#[utoipa::path(
    post,
    path = "/discoverable_login/begin",
    tag = "Authentication",
    responses(
        (status = 200, description = "Request options; ceremony token held in the session", body = BeginLoginResponse),
        (status = 503, description = "Challenge store unavailable")
    )
)]
pub async fn begin_discoverable_login(
    State(state): State<AppState>,
    session: Session,
) -> Result<Json<BeginLoginResponse>, ApiError> {
    let challenge = state
        .engine
        .begin_discoverable_authentication()
        .await
        .map_err(|reason| state.reject(reason))?;
    challenge_response(&session, challenge).await
}

async fn challenge_response(
    session: &Session,
    challenge: AuthenticationChallenge,
) -> Result<Json<BeginLoginResponse>, ApiError> {
    session::hold_ceremony(session, Ceremony::Login, &challenge.token).await?;
    Ok(Json(BeginLoginResponse {
        status: "ok",
        public_key: challenge.options,
    }))
}

/// POST /login/finish
#[utoipa::path(
    post,
    path = "/login/finish",
    tag = "Authentication",
    request_body(content_type = "application/json", description = "AuthenticationResponseJSON from navigator.credentials.get()"),
    responses(
        (status = 200, description = "Signed in; session signed in", body = super::StatusResponse),
        (status = 400, description = "Session expired or response rejected"),
        (status = 401, description = "Passkey not recognised"),
        (status = 503, description = "Credential store unavailable")
    )
)]
pub async fn finish_login(
    State(state): State<AppState>,
    session: Session,
    payload: Result<Json<AuthenticationResponseJson>, JsonRejection>,
) -> Result<Response, ApiError> {
    finish(state, session, payload).await
}

/// POST /discoverable_login/finish
///
/// The account is resolved from the assertion's user handle.
#[utoipa::path(
    post,
    path = "/discoverable_login/finish",
    tag = "Authentication",
    request_body(content_type = "application/json", description = "AuthenticationResponseJSON from navigator.credentials.get()"),
    responses(
        (status = 200, description = "Signed in; session signed in", body = super::StatusResponse),
        (status = 400, description = "Session expired or response rejected"),
        (status = 401, description = "Passkey not recognised"),
        (status = 503, description = "Credential store unavailable")
    )
)]
pub async fn finish_discoverable_login(
    State(state): State<AppState>,
    session: Session,
    payload: Result<Json<AuthenticationResponseJson>, JsonRejection>,
) -> Result<Response, ApiError> {
    finish(state, session, payload).await
}

/// Both finish endpoints share one verification path; the session itself
/// records which kind of login it was.
async fn finish(
    state: AppState,
    session: Session,
    payload: Result<Json<AuthenticationResponseJson>, JsonRejection>,
) -> Result<Response, ApiError> {
    let token = session::take_ceremony(&session, Ceremony::Login)
        .await?
        .ok_or_else(|| state.reject(Reason::SessionNotFound))?;
    let response = match payload {
        Ok(Json(response)) => response,
        Err(rejection) => {
            state.abandon(&token).await;
            return Err(rejection.into());
        }
    };

    match state.engine.finish_authentication(&token, &response).await {
        Ok(success) => signed_in(&session, success.user_handle).await,
        Err(reason) => Err(state.reject(reason)),
    }
}
