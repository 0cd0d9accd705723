//! Cookie sessions
//!
//! Each browser carries one `session` cookie managed by `tower-sessions`; the
//! data stays server-side in a [`MemoryStore`]. A session holds at most:
//! - `registration` / `login`: the ceremony token between begin and finish
//! - `user_handle`: the signed-in user
//!
//! A restart signs everyone out, which is acceptable for sessions that are
//! cheap to re-establish with a passkey.

use passkey_core::{SessionToken, UserHandle};
use tower_sessions::cookie::SameSite;
use tower_sessions::{Expiry, MemoryStore, Session, SessionManagerLayer};

use crate::config::Config;
use crate::error::ApiError;

pub const SESSION_COOKIE: &str = "session";
pub const USER_KEY: &str = "user_handle";

/// Which ceremony a pending token belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ceremony {
    Registration,
    Login,
}

impl Ceremony {
    fn key(self) -> &'static str {
        match self {
            Ceremony::Registration => "registration",
            Ceremony::Login => "login",
        }
    }
}

/// Session layer: `HttpOnly`, `SameSite=Strict`, expiring after
/// `login_session_ttl_secs` of inactivity.
pub fn layer(config: &Config) -> SessionManagerLayer<MemoryStore> {
    SessionManagerLayer::new(MemoryStore::default())
        .with_name(SESSION_COOKIE)
        .with_http_only(true)
        .with_same_site(SameSite::Strict)
        .with_secure(config.secure_cookies)
        .with_expiry(Expiry::OnInactivity(config.login_session_ttl()))
}

/// Remember the token of a ceremony that has just begun, replacing any
/// earlier one of the same kind.
pub async fn hold_ceremony(
    session: &Session,
    ceremony: Ceremony,
    token: &SessionToken,
) -> Result<(), ApiError> {
    session.insert(ceremony.key(), token.as_str()).await?;
    Ok(())
}

/// Remove and return the pending ceremony token, if any.
pub async fn take_ceremony(
    session: &Session,
    ceremony: Ceremony,
) -> Result<Option<SessionToken>, ApiError> {
    let token = session.remove::<String>(ceremony.key()).await?;
    Ok(token.map(SessionToken::from))
}

/// Bind the session to `user_handle` under a fresh id.
pub async fn sign_in(session: &Session, user_handle: &UserHandle) -> Result<(), ApiError> {
    session.cycle_id().await?;
    session.insert(USER_KEY, user_handle).await?;
    tracing::debug!(user_handle = %user_handle, "Session signed in");
    Ok(())
}

pub async fn signed_in_user(session: &Session) -> Result<Option<UserHandle>, ApiError> {
    Ok(session.get::<UserHandle>(USER_KEY).await?)
}

/// Drop everything, including the cookie.
pub async fn sign_out(session: &Session) -> Result<(), ApiError> {
    session.flush().await?;
    Ok(())
}
