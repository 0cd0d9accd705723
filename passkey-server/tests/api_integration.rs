//! API integration tests for passkey-server.
//!
//! These drive the router end to end with a software authenticator: real
//! attestation objects and signatures, the session cookie carried between
//! calls the way a browser would.

use axum::{
    body::Body,
    http::{header, HeaderMap, Request, StatusCode},
    Router,
};
use passkey_core::testing::SoftAuthenticator;
use passkey_core::{AccountDisclosure, CredentialCreationOptions, CredentialRequestOptions};
use passkey_server::{create_router, create_router_with_config, Config};
use serde_json::{json, Value};
use tower::ServiceExt;

const ORIGIN: &str = "http://localhost:8080";
const SESSION_COOKIE: &str = "session";

/// Build the test router using the library's create_router function
fn create_test_app() -> Router {
    create_router().unwrap()
}

struct Reply {
    status: StatusCode,
    headers: HeaderMap,
    json: Value,
}

impl Reply {
    /// Full `Set-Cookie` line for the session cookie, if the response set one.
    fn session_cookie(&self) -> Option<&str> {
        self.headers
            .get_all(header::SET_COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .find(|v| v.starts_with(&format!("{}=", SESSION_COOKIE)))
    }

    /// Whether the response told the browser to drop the session cookie.
    fn removes_session(&self) -> bool {
        self.session_cookie()
            .is_some_and(|line| line.starts_with(&format!("{}=;", SESSION_COOKIE)))
    }
}

/// A cookie jar holding the one session cookie the server sets.
#[derive(Clone)]
struct Browser {
    app: Router,
    session: Option<String>,
}

impl Browser {
    fn new(app: &Router) -> Self {
        Self {
            app: app.clone(),
            session: None,
        }
    }

    async fn send(&mut self, method: &str, uri: &str, body: Option<Value>) -> Reply {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(session) = &self.session {
            builder = builder.header(header::COOKIE, format!("{}={}", SESSION_COOKIE, session));
        }
        let request = match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(serde_json::to_vec(&body).unwrap()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = self.app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        let reply = Reply {
            status,
            headers,
            json,
        };

        if let Some(line) = reply.session_cookie() {
            let value = line
                .split(';')
                .next()
                .and_then(|pair| pair.split_once('='))
                .map(|(_, value)| value.to_string())
                .unwrap_or_default();
            self.session = (!value.is_empty()).then_some(value);
        }
        reply
    }

    async fn post(&mut self, uri: &str, body: Value) -> Reply {
        self.send("POST", uri, Some(body)).await
    }

    async fn get(&mut self, uri: &str) -> Reply {
        self.send("GET", uri, None).await
    }

    async fn begin_registration(&mut self, identifier: &str) -> CredentialCreationOptions {
        let begin = self
            .post("/register/begin", json!({ "identifier": identifier }))
            .await;
        assert_eq!(begin.status, StatusCode::OK, "{}", begin.json);
        serde_json::from_value(begin.json["publicKey"].clone()).unwrap()
    }

    async fn begin_login(&mut self, identifier: &str) -> CredentialRequestOptions {
        let begin = self
            .post("/login/begin", json!({ "identifier": identifier }))
            .await;
        assert_eq!(begin.status, StatusCode::OK, "{}", begin.json);
        serde_json::from_value(begin.json["publicKey"].clone()).unwrap()
    }
}

/// Register a passkey for `identifier`; the browser ends up signed in.
async fn register(app: &Router, authenticator: &mut SoftAuthenticator, identifier: &str) -> Browser {
    let mut browser = Browser::new(app);
    let options = browser.begin_registration(identifier).await;

    let response = authenticator.register(&options, ORIGIN);
    let finish = browser
        .post("/register/finish", serde_json::to_value(&response).unwrap())
        .await;
    assert_eq!(finish.status, StatusCode::OK, "{}", finish.json);
    assert_eq!(finish.json["status"], "ok");
    assert!(browser.session.is_some());
    browser
}

// ============================================================================
// Health, Readiness & Docs
// ============================================================================

#[tokio::test]
async fn test_health_endpoint_returns_ok() {
    let app = create_test_app();
    let reply = Browser::new(&app).get("/health").await;

    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.json["status"], "healthy");
    assert_eq!(reply.json["credential_store"], "memory");
    assert!(reply.json["version"].is_string());
    assert!(reply.session_cookie().is_none());
}

#[tokio::test]
async fn test_ready_endpoint_returns_ok() {
    let app = create_test_app();
    let reply = Browser::new(&app).get("/ready").await;

    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.json["ready"], true);
}

#[tokio::test]
async fn test_openapi_lists_ceremony_endpoints() {
    let app = create_test_app();
    let reply = Browser::new(&app).get("/api-docs/openapi.json").await;

    assert_eq!(reply.status, StatusCode::OK);
    for path in ["/register/begin", "/login/finish", "/discoverable_login/begin", "/me"] {
        assert!(reply.json["paths"][path].is_object(), "missing {}", path);
    }
}

// ============================================================================
// Registration
// ============================================================================

#[tokio::test]
async fn test_register_begin_returns_creation_options() {
    let app = create_test_app();
    let reply = Browser::new(&app)
        .post("/register/begin", json!({ "identifier": "alice" }))
        .await;

    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.json["status"], "ok");
    let options = &reply.json["publicKey"];
    assert_eq!(options["rp"]["id"], "localhost");
    assert_eq!(options["user"]["name"], "alice");
    assert_eq!(options["authenticatorSelection"]["residentKey"], "required");
    assert!(options["challenge"].as_str().unwrap().len() >= 43);

    let set_cookie = reply.session_cookie().expect("session cookie");
    assert!(set_cookie.contains("HttpOnly"));
    assert!(set_cookie.contains("SameSite=Strict"));
    assert!(set_cookie.contains("Path=/"));
    assert!(!set_cookie.contains("Secure"));
}

#[tokio::test]
async fn test_register_then_view_account_then_logout() {
    let app = create_test_app();
    let mut authenticator = SoftAuthenticator::new();
    let mut browser = register(&app, &mut authenticator, "Alice@Example.com").await;

    let me = browser.get("/me").await;
    assert_eq!(me.status, StatusCode::OK);
    assert_eq!(me.json["identifier"], "alice@example.com");
    assert_eq!(me.json["hasPassword"], false);
    let passkeys = me.json["passkeys"].as_array().unwrap();
    assert_eq!(passkeys.len(), 1);
    assert_eq!(passkeys[0]["id"], authenticator.credential_id_b64());

    let mut copied = browser.clone();
    let logout = browser.post("/logout", json!({})).await;
    assert_eq!(logout.status, StatusCode::OK);
    assert!(logout.removes_session());
    assert!(browser.session.is_none());

    let me = browser.get("/me").await;
    assert_eq!(me.status, StatusCode::UNAUTHORIZED);
    assert_eq!(me.json["status"], "error");

    // the old cookie died with the session
    let me = copied.get("/me").await;
    assert_eq!(me.status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_sign_in_replaces_session_id() {
    let app = create_test_app();
    let mut authenticator = SoftAuthenticator::new();
    let mut browser = Browser::new(&app);
    let options = browser.begin_registration("nina").await;
    let before = browser.session.clone().expect("session cookie");

    let response = authenticator.register(&options, ORIGIN);
    let finish = browser
        .post("/register/finish", serde_json::to_value(&response).unwrap())
        .await;
    assert_eq!(finish.status, StatusCode::OK);
    let after = browser.session.clone().expect("session cookie");
    assert_ne!(before, after);

    // a cookie planted before sign-in does not become signed in
    let mut planted = Browser {
        app: app.clone(),
        session: Some(before),
    };
    assert_eq!(planted.get("/me").await.status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_register_finish_without_session() {
    let app = create_test_app();
    let authenticator = SoftAuthenticator::new();
    let response = authenticator.registration_response(b"{}".to_vec(), vec![0xa0]);

    let reply = Browser::new(&app)
        .post("/register/finish", serde_json::to_value(&response).unwrap())
        .await;
    assert_eq!(reply.status, StatusCode::BAD_REQUEST);
    assert_eq!(reply.json["status"], "error");
    assert_eq!(reply.json["code"], "SESSION_NOT_FOUND");
    assert!(reply.json["errorMessage"].is_string());
}

#[tokio::test]
async fn test_register_finish_replay_is_rejected() {
    let app = create_test_app();
    let mut authenticator = SoftAuthenticator::new();
    let mut browser = Browser::new(&app);
    let options = browser.begin_registration("bob").await;
    let mut copied = browser.clone();
    let body = serde_json::to_value(authenticator.register(&options, ORIGIN)).unwrap();

    let first = browser.post("/register/finish", body.clone()).await;
    assert_eq!(first.status, StatusCode::OK);

    let second = browser.post("/register/finish", body.clone()).await;
    assert_eq!(second.status, StatusCode::BAD_REQUEST);
    assert_eq!(second.json["code"], "SESSION_NOT_FOUND");

    let replayed = copied.post("/register/finish", body).await;
    assert_eq!(replayed.status, StatusCode::BAD_REQUEST);
    assert_eq!(replayed.json["code"], "SESSION_NOT_FOUND");
}

#[tokio::test]
async fn test_unreadable_finish_body_spends_ceremony() {
    let app = create_test_app();
    let mut authenticator = SoftAuthenticator::new();
    let mut browser = Browser::new(&app);
    let options = browser.begin_registration("oscar").await;
    let mut copied = browser.clone();

    let garbage = browser
        .post("/register/finish", json!({ "garbage": true }))
        .await;
    assert_eq!(garbage.status, StatusCode::BAD_REQUEST);
    assert_eq!(garbage.json["code"], "INVALID_INPUT");
    assert!(garbage.removes_session());

    // neither the same browser nor a copy of its old cookie can finish
    let body = serde_json::to_value(authenticator.register(&options, ORIGIN)).unwrap();
    let retry = browser.post("/register/finish", body.clone()).await;
    assert_eq!(retry.status, StatusCode::BAD_REQUEST);
    assert_eq!(retry.json["code"], "SESSION_NOT_FOUND");
    let retry = copied.post("/register/finish", body).await;
    assert_eq!(retry.status, StatusCode::BAD_REQUEST);
    assert_eq!(retry.json["code"], "SESSION_NOT_FOUND");
}

#[tokio::test]
async fn test_register_finish_wrong_origin_spends_ceremony() {
    let app = create_test_app();
    let mut authenticator = SoftAuthenticator::new();
    let mut browser = Browser::new(&app);
    let options = browser.begin_registration("carol").await;
    let response = authenticator.register(&options, "https://evil.example");

    let reply = browser
        .post("/register/finish", serde_json::to_value(&response).unwrap())
        .await;
    assert_eq!(reply.status, StatusCode::BAD_REQUEST);
    assert_eq!(reply.json["code"], "ORIGIN_MISMATCH");
    assert!(reply.removes_session());
    assert_eq!(browser.get("/me").await.status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_taken_identifier_concealed_until_finish() {
    let app = create_test_app();
    let mut first = SoftAuthenticator::new();
    register(&app, &mut first, "dave").await;

    let mut intruder = SoftAuthenticator::new();
    let mut browser = Browser::new(&app);
    let options = browser.begin_registration("dave").await;
    assert!(options.exclude_credentials.is_empty());

    let response = intruder.register(&options, ORIGIN);
    let reply = browser
        .post("/register/finish", serde_json::to_value(&response).unwrap())
        .await;
    assert_eq!(reply.status, StatusCode::BAD_REQUEST);
    assert_eq!(reply.json["code"], "REGISTRATION_FAILED");
}

#[tokio::test]
async fn test_signed_in_user_adds_passkey() {
    let app = create_test_app();
    let mut phone = SoftAuthenticator::new();
    let mut browser = register(&app, &mut phone, "erin").await;

    let options = browser.begin_registration("erin").await;
    assert_eq!(options.exclude_credentials.len(), 1);

    let mut laptop = SoftAuthenticator::new();
    let response = laptop.register(&options, ORIGIN);
    let finish = browser
        .post("/register/finish", serde_json::to_value(&response).unwrap())
        .await;
    assert_eq!(finish.status, StatusCode::OK);

    let me = browser.get("/me").await;
    assert_eq!(me.json["passkeys"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn test_failed_ceremony_keeps_existing_sign_in() {
    let app = create_test_app();
    let mut phone = SoftAuthenticator::new();
    let mut browser = register(&app, &mut phone, "peggy").await;

    browser.begin_registration("peggy").await;
    let garbage = browser
        .post("/register/finish", json!({ "garbage": true }))
        .await;
    assert_eq!(garbage.status, StatusCode::BAD_REQUEST);
    assert!(!garbage.removes_session());

    assert_eq!(browser.get("/me").await.status, StatusCode::OK);
}

// ============================================================================
// Login
// ============================================================================

#[tokio::test]
async fn test_passkey_login() {
    let app = create_test_app();
    let mut authenticator = SoftAuthenticator::new();
    register(&app, &mut authenticator, "frank").await;

    let mut browser = Browser::new(&app);
    let options = browser.begin_login("frank").await;
    assert_eq!(options.allow_credentials.len(), 1);
    let response = authenticator.assert(&options, ORIGIN);

    let reply = browser
        .post("/login/finish", serde_json::to_value(&response).unwrap())
        .await;
    assert_eq!(reply.status, StatusCode::OK);

    let me = browser.get("/me").await;
    assert_eq!(me.status, StatusCode::OK);
    assert_eq!(me.json["passkeys"][0]["signCount"], authenticator.sign_count());
}

#[tokio::test]
async fn test_login_with_tampered_signature() {
    let app = create_test_app();
    let mut authenticator = SoftAuthenticator::new();
    register(&app, &mut authenticator, "grace").await;

    let mut browser = Browser::new(&app);
    let options = browser.begin_login("grace").await;
    let mut response = authenticator.assert(&options, ORIGIN);
    let last = response.response.signature.0.len() - 1;
    response.response.signature.0[last] ^= 0x01;

    let reply = browser
        .post("/login/finish", serde_json::to_value(&response).unwrap())
        .await;
    assert_eq!(reply.status, StatusCode::UNAUTHORIZED);
    assert_eq!(reply.json["code"], "SIGNATURE_INVALID");
    assert!(reply.removes_session());
    assert_eq!(browser.get("/me").await.status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_unreadable_login_body_spends_ceremony() {
    let app = create_test_app();
    let mut authenticator = SoftAuthenticator::new();
    register(&app, &mut authenticator, "quentin").await;

    let mut browser = Browser::new(&app);
    let options = browser.begin_login("quentin").await;
    let garbage = browser.post("/login/finish", json!({ "garbage": true })).await;
    assert_eq!(garbage.status, StatusCode::BAD_REQUEST);

    let response = authenticator.assert(&options, ORIGIN);
    let retry = browser
        .post("/login/finish", serde_json::to_value(&response).unwrap())
        .await;
    assert_eq!(retry.status, StatusCode::BAD_REQUEST);
    assert_eq!(retry.json["code"], "SESSION_NOT_FOUND");
}

#[tokio::test]
async fn test_discoverable_login() {
    let app = create_test_app();
    let mut authenticator = SoftAuthenticator::new();
    register(&app, &mut authenticator, "heidi").await;

    let mut browser = Browser::new(&app);
    let begin = browser.send("POST", "/discoverable_login/begin", None).await;
    assert_eq!(begin.status, StatusCode::OK);
    assert_eq!(begin.json["publicKey"]["allowCredentials"], json!([]));
    let options: CredentialRequestOptions =
        serde_json::from_value(begin.json["publicKey"].clone()).unwrap();

    let response = authenticator.assert(&options, ORIGIN);
    let reply = browser
        .post("/discoverable_login/finish", serde_json::to_value(&response).unwrap())
        .await;
    assert_eq!(reply.status, StatusCode::OK);

    let me = browser.get("/me").await;
    assert_eq!(me.json["identifier"], "heidi");
}

#[tokio::test]
async fn test_unknown_identifier_concealed_at_login_begin() {
    let app = create_test_app();
    let first = Browser::new(&app)
        .post("/login/begin", json!({ "identifier": "nobody" }))
        .await;
    let second = Browser::new(&app)
        .post("/login/begin", json!({ "identifier": "nobody" }))
        .await;

    assert_eq!(first.status, StatusCode::OK);
    let allow = first.json["publicKey"]["allowCredentials"].as_array().unwrap();
    assert_eq!(allow.len(), 1);
    assert_eq!(
        first.json["publicKey"]["allowCredentials"],
        second.json["publicKey"]["allowCredentials"]
    );
}

#[tokio::test]
async fn test_reveal_policy_reports_account_state() {
    let config = Config {
        account_disclosure: AccountDisclosure::Reveal,
        ..Config::default()
    };
    let app = create_router_with_config(&config).unwrap();

    let unknown = Browser::new(&app)
        .post("/login/begin", json!({ "identifier": "ivan" }))
        .await;
    assert_eq!(unknown.status, StatusCode::UNAUTHORIZED);
    assert_eq!(unknown.json["code"], "NOT_FOUND");

    let mut authenticator = SoftAuthenticator::new();
    register(&app, &mut authenticator, "ivan").await;

    let taken = Browser::new(&app)
        .post("/register/begin", json!({ "identifier": "ivan" }))
        .await;
    assert_eq!(taken.status, StatusCode::CONFLICT);
    assert_eq!(taken.json["code"], "ACCOUNT_EXISTS");
}

// ============================================================================
// Passwords & Input Handling
// ============================================================================

#[tokio::test]
async fn test_password_register_and_login() {
    let app = create_test_app();
    let body = json!({ "identifier": "judy", "password": "correct horse battery" });

    let mut signup_browser = Browser::new(&app);
    let signup = signup_browser.post("/register/password", body.clone()).await;
    assert_eq!(signup.status, StatusCode::OK);
    assert!(signup_browser.session.is_some());

    let mut browser = Browser::new(&app);
    let login = browser.post("/login/password", body).await;
    assert_eq!(login.status, StatusCode::OK);

    let me = browser.get("/me").await;
    assert_eq!(me.json["hasPassword"], true);
    assert_eq!(me.json["passkeys"], json!([]));
}

#[tokio::test]
async fn test_password_login_failures_look_the_same() {
    let app = create_test_app();
    Browser::new(&app)
        .post(
            "/register/password",
            json!({ "identifier": "ken", "password": "correct horse battery" }),
        )
        .await;

    let wrong = Browser::new(&app)
        .post(
            "/login/password",
            json!({ "identifier": "ken", "password": "wrong password" }),
        )
        .await;
    let unknown = Browser::new(&app)
        .post(
            "/login/password",
            json!({ "identifier": "nobody", "password": "wrong password" }),
        )
        .await;

    assert_eq!(wrong.status, StatusCode::UNAUTHORIZED);
    assert_eq!(wrong.json, unknown.json);
    assert_eq!(wrong.json["code"], "INVALID_CREDENTIALS");
    assert!(wrong.session_cookie().is_none());
}

#[tokio::test]
async fn test_short_password_rejected() {
    let app = create_test_app();
    let reply = Browser::new(&app)
        .post(
            "/register/password",
            json!({ "identifier": "leo", "password": "short" }),
        )
        .await;
    assert_eq!(reply.status, StatusCode::BAD_REQUEST);
    assert_eq!(reply.json["code"], "INVALID_INPUT");
}

#[tokio::test]
async fn test_malformed_json_returns_error_body() {
    let app = create_test_app();
    let request = Request::builder()
        .method("POST")
        .uri("/register/begin")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from("{not json"))
        .unwrap();

    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["status"], "error");
    assert_eq!(json["code"], "INVALID_INPUT");
}

#[tokio::test]
async fn test_me_requires_session() {
    let app = create_test_app();
    let mut forged = Browser {
        app: app.clone(),
        session: Some("forged".to_string()),
    };
    let reply = forged.get("/me").await;
    assert_eq!(reply.status, StatusCode::UNAUTHORIZED);
    assert_eq!(reply.json["code"], "UNAUTHORIZED");
}
