//! Password sign-up and login, and logout

use axum::{
    extract::{rejection::JsonRejection, State},
    response::Response,
    Json,
};
use serde::Deserialize;
use tower_sessions::Session;
use utoipa::ToSchema;

use super::{signed_in, AppState, StatusResponse};
use crate::auth::OptionalAuth;
use crate::error::ApiError;
use crate::session;

/// Body of `POST /register/password` and `POST /login/password`
#[derive(Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PasswordRequest {
    pub identifier: String,
    pub password: String,
    /// Only used at sign-up
    #[serde(default)]
    pub display_name: Option<String>,
}

impl std::fmt::Debug for PasswordRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PasswordRequest")
            .field("identifier", &self.identifier)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// POST /register/password
#[utoipa::path(
    post,
    path = "/register/password",
    tag = "Password",
    request_body = PasswordRequest,
    responses(
        (status = 200, description = "Account created; session signed in", body = StatusResponse),
        (status = 400, description = "Invalid identifier or password too short"),
        (status = 409, description = "Identifier taken (only when account disclosure is `reveal`)")
    )
)]
pub async fn register_password(
    State(state): State<AppState>,
    session: Session,
    payload: Result<Json<PasswordRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(req) = payload?;
    let user = state
        .engine
        .register_password(&req.identifier, &req.password, req.display_name.as_deref())
        .await
        .map_err(|reason| state.reject(reason))?;
    signed_in(&session, user.handle).await
}

/// POST /login/password
#[utoipa::path(
    post,
    path = "/login/password",
    tag = "Password",
    request_body = PasswordRequest,
    responses(
        (status = 200, description = "Signed in; session signed in", body = StatusResponse),
        (status = 401, description = "Invalid identifier or password")
    )
)]
pub async fn login_password(
    State(state): State<AppState>,
    session: Session,
    payload: Result<Json<PasswordRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(req) = payload?;
    let user = state
        .engine
        .login_password(&req.identifier, &req.password)
        .await
        .map_err(|reason| state.reject(reason))?;
    signed_in(&session, user.handle).await
}

/// POST /logout
///
/// Ends the session, if any, and removes the session cookie.
#[utoipa::path(
    post,
    path = "/logout",
    tag = "Account",
    responses(
        (status = 200, description = "Signed out", body = StatusResponse)
    )
)]
pub async fn logout(
    session: Session,
    OptionalAuth(auth): OptionalAuth,
) -> Result<Json<StatusResponse>, ApiError> {
    if let Some(auth) = auth {
        tracing::info!(user_handle = %auth.user_handle, "Signed out");
    }
    session::sign_out(&session).await?;
    Ok(StatusResponse::ok())
}
