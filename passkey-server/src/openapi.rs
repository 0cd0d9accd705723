//! OpenAPI documentation configuration
//!
//! Generates the OpenAPI 3 document served at `/api-docs/openapi.json`.

use utoipa::OpenApi;

use crate::handlers::{
    AccountResponse, BeginLoginRequest, BeginLoginResponse, BeginRegistrationRequest,
    BeginRegistrationResponse, HealthResponse, PasskeySummary, PasswordRequest, ReadyResponse,
    StatusResponse,
};

/// Passkey server - OpenAPI Documentation
#[derive(OpenApi)]
#[openapi(
    info(
        title = "Passkey Server",
        description = r#"
## WebAuthn Relying Party

Registers passkeys and signs users in with them.

### How It Works

1. Call a **begin** endpoint; the response carries WebAuthn options and the
   `session` cookie holds a single-use ceremony token
2. Pass the options to `navigator.credentials.create()` / `.get()`
3. Post the browser's response JSON to the matching **finish** endpoint
4. On success the same `session` cookie is signed in

Binary fields are base64url without padding. Errors are
`{"status":"error","errorMessage":"...","code":"..."}`.
"#,
        license(name = "MIT OR Apache-2.0")
    ),
    servers(
        (url = "http://localhost:8080", description = "Local development server")
    ),
    tags(
        (name = "Registration", description = "Create passkeys"),
        (name = "Authentication", description = "Sign in with a passkey, with or without an identifier"),
        (name = "Password", description = "Password accounts alongside passkeys"),
        (name = "Account", description = "Signed-in account operations"),
        (name = "Health", description = "Service health and readiness endpoints")
    ),
    paths(
        crate::handlers::health::health,
        crate::handlers::health::ready,
        crate::handlers::registration::begin_registration,
        crate::handlers::registration::finish_registration,
        crate::handlers::authentication::begin_login,
        crate::handlers::authentication::finish_login,
        crate::handlers::authentication::begin_discoverable_login,
        crate::handlers::authentication::finish_discoverable_login,
        crate::handlers::password::register_password,
        crate::handlers::password::login_password,
        crate::handlers::password::logout,
        crate::handlers::account::me,
    ),
    components(
        schemas(
            HealthResponse,
            ReadyResponse,
            StatusResponse,
            BeginRegistrationRequest,
            BeginRegistrationResponse,
            BeginLoginRequest,
            BeginLoginResponse,
            PasswordRequest,
            AccountResponse,
            PasskeySummary,
        )
    )
)]
pub struct ApiDoc;
