//! Server configuration module
//!
//! Handles loading configuration from environment variables with sensible defaults.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::str::FromStr;
use std::time::Duration;

use passkey_core::{
    AccountDisclosure, AttestationPolicy, ConfigError, CounterPolicy, RelyingPartyConfig,
    UserVerification,
};

/// Server configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    /// Server port (default: 8080)
    pub port: u16,
    /// Server host (default: 127.0.0.1)
    pub host: IpAddr,
    /// Allowed CORS origins, comma-separated (default: allow all in dev)
    pub allowed_origins: Option<Vec<String>>,
    /// Request body limit in KB (default: 64)
    pub body_limit_kb: usize,
    /// Request timeout in seconds (default: 30)
    pub timeout_secs: u64,
    /// Enable rate limiting (default: false for tests, true when loaded from env)
    pub rate_limit_enabled: bool,
    /// Rate limit: requests per second (default: 10)
    pub rate_limit_per_sec: u64,
    /// Rate limit: burst size (default: 20)
    pub rate_limit_burst: u32,
    /// PostgreSQL URL; credentials are kept in memory when unset
    pub database_url: Option<String>,
    /// Database connection pool maximum connections (default: 20)
    pub database_max_connections: u32,
    /// Database connection pool minimum connections (default: 2)
    pub database_min_connections: u32,
    /// Relying party ID, a registrable domain (default: localhost)
    pub rp_id: String,
    /// Relying party display name
    pub rp_name: String,
    /// Origins accepted in client data
    pub rp_origins: Vec<String>,
    /// Hex-encoded HMAC key for user handles (random per process when unset)
    pub user_handle_secret: Option<String>,
    /// Ceremony session lifetime in seconds (default: 300)
    pub challenge_ttl_secs: u64,
    pub account_disclosure: AccountDisclosure,
    pub attestation_policy: AttestationPolicy,
    pub user_verification: UserVerification,
    pub counter_policy: CounterPolicy,
    /// Interval between expired-session sweeps in seconds (default: 600)
    pub sweep_interval_secs: u64,
    /// Login session lifetime in seconds (default: 24h)
    pub login_session_ttl_secs: u64,
    /// Add `Secure` to the session cookie (default: false for tests, true when loaded from env)
    pub secure_cookies: bool,
    /// PBKDF2 iteration count for new password hashes
    pub password_hash_iterations: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 8080,
            host: IpAddr::V4(Ipv4Addr::LOCALHOST),
            allowed_origins: None, // None = allow all (dev mode)
            body_limit_kb: 64,
            timeout_secs: 30,
            rate_limit_enabled: false, // Disabled by default (for tests)
            rate_limit_per_sec: 10,
            rate_limit_burst: 20,
            database_url: None,
            database_max_connections: 20,
            database_min_connections: 2,
            rp_id: "localhost".to_string(),
            rp_name: "Passkey Demo".to_string(),
            rp_origins: vec!["http://localhost:8080".to_string()],
            user_handle_secret: None,
            challenge_ttl_secs: 300,
            account_disclosure: AccountDisclosure::default(),
            attestation_policy: AttestationPolicy::default(),
            user_verification: UserVerification::default(),
            counter_policy: CounterPolicy::default(),
            sweep_interval_secs: 600,
            login_session_ttl_secs: 24 * 60 * 60,
            secure_cookies: false,
            // Low for tests; from_env() defaults to the production cost
            password_hash_iterations: 1_000,
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let port = env_parse("PORT").unwrap_or(defaults.port);

        let host = env_parse("HOST").unwrap_or(defaults.host);

        let allowed_origins = std::env::var("ALLOWED_ORIGINS").ok().map(|v| split_list(&v));

        let body_limit_kb = env_parse("BODY_LIMIT_KB").unwrap_or(defaults.body_limit_kb);

        let timeout_secs = env_parse("REQUEST_TIMEOUT_SECS").unwrap_or(defaults.timeout_secs);

        let rate_limit_per_sec =
            env_parse("RATE_LIMIT_PER_SEC").unwrap_or(defaults.rate_limit_per_sec);

        let rate_limit_burst = env_parse("RATE_LIMIT_BURST").unwrap_or(defaults.rate_limit_burst);

        // Rate limiting enabled by default in production, can be disabled with RATE_LIMIT_ENABLED=false
        let rate_limit_enabled = std::env::var("RATE_LIMIT_ENABLED")
            .map(|v| v.to_lowercase() != "false")
            .unwrap_or(true);

        let database_url = std::env::var("DATABASE_URL")
            .ok()
            .filter(|v| !v.trim().is_empty());

        let database_max_connections =
            env_parse("DATABASE_MAX_CONNECTIONS").unwrap_or(defaults.database_max_connections);

        let database_min_connections =
            env_parse("DATABASE_MIN_CONNECTIONS").unwrap_or(defaults.database_min_connections);

        let rp_id = std::env::var("RP_ID").unwrap_or(defaults.rp_id);

        let rp_name = std::env::var("RP_NAME").unwrap_or(defaults.rp_name);

        let rp_origins = std::env::var("RP_ORIGINS")
            .map(|v| split_list(&v))
            .unwrap_or_else(|_| vec![format!("http://localhost:{}", port)]);

        let user_handle_secret = std::env::var("USER_HANDLE_SECRET").ok();

        let challenge_ttl_secs =
            env_parse("CHALLENGE_TTL_SECS").unwrap_or(defaults.challenge_ttl_secs);

        let account_disclosure =
            env_parse("ACCOUNT_DISCLOSURE").unwrap_or(defaults.account_disclosure);

        let attestation_policy =
            env_parse("ATTESTATION_POLICY").unwrap_or(defaults.attestation_policy);

        let user_verification = env_parse("USER_VERIFICATION").unwrap_or(defaults.user_verification);

        let counter_policy = env_parse("COUNTER_POLICY").unwrap_or(defaults.counter_policy);

        let sweep_interval_secs =
            env_parse("SWEEP_INTERVAL_SECS").unwrap_or(defaults.sweep_interval_secs);

        let login_session_ttl_secs =
            env_parse("LOGIN_SESSION_TTL_SECS").unwrap_or(defaults.login_session_ttl_secs);

        let secure_cookies = std::env::var("SECURE_COOKIES")
            .map(|v| v.to_lowercase() != "false")
            .unwrap_or(true);

        let password_hash_iterations = env_parse("PASSWORD_HASH_ITERATIONS")
            .unwrap_or(passkey_core::password::DEFAULT_ITERATIONS);

        Self {
            port,
            host,
            allowed_origins,
            body_limit_kb,
            timeout_secs,
            rate_limit_enabled,
            rate_limit_per_sec,
            rate_limit_burst,
            database_url,
            database_max_connections,
            database_min_connections,
            rp_id,
            rp_name,
            rp_origins,
            user_handle_secret,
            challenge_ttl_secs,
            account_disclosure,
            attestation_policy,
            user_verification,
            counter_policy,
            sweep_interval_secs,
            login_session_ttl_secs,
            secure_cookies,
            password_hash_iterations,
        }
    }

    /// Get socket address from config
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }

    pub fn challenge_ttl(&self) -> Duration {
        Duration::from_secs(self.challenge_ttl_secs)
    }

    /// Inactivity window of a login session.
    pub fn login_session_ttl(&self) -> time::Duration {
        time::Duration::seconds(i64::try_from(self.login_session_ttl_secs).unwrap_or(i64::MAX))
    }

    /// Build and validate the relying party configuration for the engine.
    pub fn rp_config(&self) -> Result<RelyingPartyConfig, ConfigError> {
        let mut builder = RelyingPartyConfig::builder(self.rp_id.clone())
            .rp_name(self.rp_name.clone())
            .origins(self.rp_origins.iter().cloned())
            .challenge_ttl(self.challenge_ttl())
            .account_disclosure(self.account_disclosure)
            .attestation_policy(self.attestation_policy)
            .user_verification(self.user_verification)
            .counter_policy(self.counter_policy);

        if let Some(secret) = &self.user_handle_secret {
            let bytes = hex::decode(secret.trim()).map_err(|_| ConfigError::InvalidValue {
                name: "USER_HANDLE_SECRET",
                value: "<not hex>".to_string(),
            })?;
            if bytes.len() < 16 {
                return Err(ConfigError::InvalidValue {
                    name: "USER_HANDLE_SECRET",
                    value: format!("{} bytes (need at least 16)", bytes.len()),
                });
            }
            builder = builder.user_handle_secret(bytes);
        }

        builder.build()
    }
}

/// Parse an environment variable, warning (and falling back) on bad values.
fn env_parse<T>(name: &str) -> Option<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    let raw = std::env::var(name).ok()?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(e) => {
            tracing::warn!(var = name, value = %raw, error = %e, "Ignoring invalid environment value");
            None
        }
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.port, 8080);
        assert!(!config.rate_limit_enabled);
        assert!(!config.secure_cookies);
        assert_eq!(config.account_disclosure, AccountDisclosure::Conceal);
        assert_eq!(config.login_session_ttl(), time::Duration::hours(24));
    }

    #[test]
    fn test_default_rp_config_is_valid() {
        let rp = Config::default().rp_config().unwrap();
        assert_eq!(rp.rp_id, "localhost");
        assert!(rp.is_allowed_origin("http://localhost:8080"));
    }

    #[test]
    fn test_user_handle_secret_must_be_hex() {
        let config = Config {
            user_handle_secret: Some("not-hex".to_string()),
            ..Config::default()
        };
        assert!(matches!(
            config.rp_config(),
            Err(ConfigError::InvalidValue { name: "USER_HANDLE_SECRET", .. })
        ));
    }

    #[test]
    fn test_short_user_handle_secret_rejected() {
        let config = Config {
            user_handle_secret: Some("00ff".to_string()),
            ..Config::default()
        };
        assert!(config.rp_config().is_err());
    }

    #[test]
    fn test_origin_outside_rp_id_rejected() {
        let config = Config {
            rp_origins: vec!["https://evil.test".to_string()],
            ..Config::default()
        };
        assert!(matches!(
            config.rp_config(),
            Err(ConfigError::OriginOutsideRpId { .. })
        ));
    }

    #[test]
    fn test_split_list_trims_and_drops_empty() {
        assert_eq!(
            split_list(" https://a.test, ,https://b.test "),
            vec!["https://a.test".to_string(), "https://b.test".to_string()]
        );
    }
}
