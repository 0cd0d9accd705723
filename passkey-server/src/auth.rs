//! Login-session extractors
//!
//! Provides `AuthenticatedUser` and `OptionalAuth` for axum handlers. Both
//! read the signed-in user from the cookie session; the engine only ever
//! sees the resulting user handle.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use passkey_core::UserHandle;
use tower_sessions::Session;

use crate::error::ApiError;
use crate::session;
use crate::state::AppState;

/// A request carrying a live login session.
#[derive(Debug, Clone)]
pub struct AuthenticatedUser {
    pub user_handle: UserHandle,
    pub session: Session,
}

impl FromRequestParts<AppState> for AuthenticatedUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let OptionalAuth(user) = OptionalAuth::from_request_parts(parts, state).await?;
        user.ok_or_else(|| ApiError::unauthorized("Not signed in"))
    }
}

/// Like [`AuthenticatedUser`], but anonymous requests are let through.
#[derive(Debug, Clone)]
pub struct OptionalAuth(pub Option<AuthenticatedUser>);

impl FromRequestParts<AppState> for OptionalAuth {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let session = Session::from_request_parts(parts, state)
            .await
            .map_err(|(_, message)| ApiError::internal(message))?;
        let user = session::signed_in_user(&session)
            .await?
            .map(|user_handle| AuthenticatedUser {
                user_handle,
                session,
            });
        Ok(OptionalAuth(user))
    }
}
