//! HTTP request handlers
//!
//! This module contains all the request handlers for the API endpoints.

pub mod account;
pub mod authentication;
pub mod health;
pub mod password;
pub mod registration;

use axum::response::{IntoResponse, Response};
use axum::Json;
use passkey_core::UserHandle;
use serde::Serialize;
use tower_sessions::Session;
use utoipa::ToSchema;

pub use crate::state::AppState;
pub use account::{me, AccountResponse, PasskeySummary};
pub use authentication::{
    begin_discoverable_login, begin_login, finish_discoverable_login, finish_login,
    BeginLoginRequest, BeginLoginResponse,
};
pub use health::{health, ready, HealthResponse, ReadyResponse};
pub use password::{login_password, logout, register_password, PasswordRequest};
pub use registration::{
    begin_registration, finish_registration, BeginRegistrationRequest, BeginRegistrationResponse,
};

use crate::error::ApiError;
use crate::session;

/// `{"status":"ok"}`
#[derive(Debug, Serialize, ToSchema)]
pub struct StatusResponse {
    /// Always `ok`
    pub status: &'static str,
}

impl StatusResponse {
    pub fn ok() -> Json<Self> {
        Json(Self { status: "ok" })
    }
}

/// Sign `user_handle` in on this session: `{"status":"ok"}`.
pub(crate) async fn signed_in(session: &Session, user_handle: UserHandle) -> Result<Response, ApiError> {
    session::sign_in(session, &user_handle).await?;
    Ok(StatusResponse::ok().into_response())
}
