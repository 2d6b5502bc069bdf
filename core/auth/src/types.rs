//! Credential and configuration types for the iNaturalist OAuth2 flow.

use std::fmt;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use url::Url;

use vouchersnap_common::{Error, Result};

/// OAuth2 authorization endpoint.
pub const INAT_AUTH_URL: &str = "https://www.inaturalist.org/oauth/authorize";
/// OAuth2 token endpoint.
pub const INAT_TOKEN_URL: &str = "https://www.inaturalist.org/oauth/token";
/// Loopback port registered with the remote application.
pub const DEFAULT_REDIRECT_PORT: u16 = 8914;
/// Path component of the registered redirect URI.
pub const DEFAULT_REDIRECT_PATH: &str = "/callback";
/// Upper bound on how long a login waits for the browser to come back.
pub const DEFAULT_CALLBACK_TIMEOUT_SECS: u64 = 120;

/// A credential is treated as expired this long before its real expiry.
pub const EXPIRY_MARGIN_SECS: i64 = 300;
/// Assumed lifetime when the token endpoint does not report `expires_in`.
pub const DEFAULT_TOKEN_LIFETIME_SECS: u64 = 86_400;
/// Reported lifetimes are clamped to ten years.
const MAX_TOKEN_LIFETIME_SECS: u64 = 10 * 365 * 86_400;

/// Cached access credential.
///
/// Written once by a successful login and replaced wholesale by the next one.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    /// Bearer token for API requests.
    pub access_token: String,
    /// Token type reported by the token endpoint.
    #[serde(default = "default_token_type")]
    pub token_type: String,
    /// When the token was issued to us.
    pub obtained_at: DateTime<Utc>,
    /// Lifetime in seconds, as reported by the token endpoint.
    #[serde(default)]
    pub expires_in: Option<u64>,
    /// Granted scope, as reported by the token endpoint.
    #[serde(default)]
    pub scope: Option<String>,
}

fn default_token_type() -> String {
    "Bearer".to_string()
}

impl Credential {
    /// Create a credential obtained now.
    pub fn new(access_token: impl Into<String>, expires_in: Option<u64>, scope: Option<String>) -> Self {
        Self {
            access_token: access_token.into(),
            token_type: default_token_type(),
            obtained_at: Utc::now(),
            expires_in,
            scope,
        }
    }

    /// Instant at which the token stops being valid.
    pub fn expires_at(&self) -> DateTime<Utc> {
        let lifetime = self
            .expires_in
            .unwrap_or(DEFAULT_TOKEN_LIFETIME_SECS)
            .min(MAX_TOKEN_LIFETIME_SECS);
        self.obtained_at + Duration::seconds(lifetime as i64)
    }

    /// Check if the token is expired or about to expire.
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    /// Expiry check against an explicit clock reading.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at() - Duration::seconds(EXPIRY_MARGIN_SECS) <= now
    }

    /// Value for an HTTP `Authorization` header.
    pub fn authorization_header(&self) -> String {
        format!("{} {}", self.token_type, self.access_token)
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("access_token", &"[REDACTED]")
            .field("token_type", &self.token_type)
            .field("obtained_at", &self.obtained_at)
            .field("expires_in", &self.expires_in)
            .field("scope", &self.scope)
            .finish()
    }
}

/// What the token store currently holds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthStatus {
    /// No credential on disk.
    LoggedOut,
    /// A credential that can be used right now.
    Valid { expires_at: DateTime<Utc> },
    /// A credential past its (margin-adjusted) expiry.
    Expired { expired_at: DateTime<Utc> },
}

/// Configuration for the OAuth2 authorization code flow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Application id registered with iNaturalist.
    pub client_id: String,
    /// Authorization endpoint.
    pub auth_url: String,
    /// Token endpoint.
    pub token_url: String,
    /// Loopback port of the registered redirect URI.
    pub redirect_port: u16,
    /// Path of the registered redirect URI.
    pub redirect_path: String,
    /// Scopes to request; empty means the provider default.
    pub scopes: Vec<String>,
    /// Seconds to wait for the browser callback.
    pub callback_timeout_secs: u64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            auth_url: INAT_AUTH_URL.to_string(),
            token_url: INAT_TOKEN_URL.to_string(),
            redirect_port: DEFAULT_REDIRECT_PORT,
            redirect_path: DEFAULT_REDIRECT_PATH.to_string(),
            scopes: vec!["write".to_string()],
            callback_timeout_secs: DEFAULT_CALLBACK_TIMEOUT_SECS,
        }
    }
}

impl AuthConfig {
    /// Create a configuration for the given client id with default endpoints.
    pub fn new(client_id: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            ..Self::default()
        }
    }

    /// The exact redirect URI registered with the remote application.
    pub fn redirect_uri(&self) -> String {
        format!("http://127.0.0.1:{}{}", self.redirect_port, self.redirect_path)
    }

    pub fn callback_timeout(&self) -> StdDuration {
        StdDuration::from_secs(self.callback_timeout_secs)
    }

    /// Check that the configuration can drive a login.
    ///
    /// # Errors
    /// - Missing client id
    /// - Unparseable endpoint URL
    /// - Redirect path not starting with `/`
    /// - Zero timeout
    pub fn validate(&self) -> Result<()> {
        if self.client_id.trim().is_empty() {
            return Err(Error::Config(
                "No client id configured. Run `vouchersnap config --client-id <ID>`.".to_string(),
            ));
        }
        Url::parse(&self.auth_url)
            .map_err(|e| Error::Config(format!("Invalid auth URL: {}", e)))?;
        Url::parse(&self.token_url)
            .map_err(|e| Error::Config(format!("Invalid token URL: {}", e)))?;
        if !self.redirect_path.starts_with('/') {
            return Err(Error::Config(format!(
                "Redirect path must start with '/': {}",
                self.redirect_path
            )));
        }
        if self.callback_timeout_secs == 0 {
            return Err(Error::Config("Callback timeout must be positive".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_credential_expiration() {
        let mut credential = Credential::new("tok", Some(3600), None);
        assert!(!credential.is_expired());

        credential.obtained_at = Utc::now() - Duration::hours(2);
        assert!(credential.is_expired());
    }

    #[test]
    fn test_credential_near_expiration() {
        // Expiring in 4 minutes is inside the 5 minute margin
        let mut credential = Credential::new("tok", Some(3600), None);
        credential.obtained_at = Utc::now() - Duration::minutes(56);
        assert!(credential.is_expired());
    }

    #[test]
    fn test_credential_without_expiry_assumes_a_day() {
        let mut credential = Credential::new("tok", None, None);
        assert!(!credential.is_expired());

        credential.obtained_at = Utc::now() - Duration::hours(25);
        assert!(credential.is_expired());
    }

    #[test]
    fn test_credential_debug_redacts_token() {
        let credential = Credential::new("super-secret", Some(60), None);
        let debug = format!("{:?}", credential);
        assert!(!debug.contains("super-secret"));
        assert!(debug.contains("REDACTED"));
    }

    #[test]
    fn test_authorization_header() {
        let credential = Credential::new("abc", None, None);
        assert_eq!(credential.authorization_header(), "Bearer abc");
    }

    #[test]
    fn test_credential_legacy_payload_defaults() {
        let json = r#"{"access_token":"t","obtained_at":"2024-01-15T12:00:00Z"}"#;
        let credential: Credential = serde_json::from_str(json).unwrap();
        assert_eq!(credential.token_type, "Bearer");
        assert!(credential.expires_in.is_none());
        assert!(credential.scope.is_none());
    }

    #[test]
    fn test_redirect_uri() {
        let config = AuthConfig::new("client");
        assert_eq!(config.redirect_uri(), "http://127.0.0.1:8914/callback");
    }

    #[test]
    fn test_config_validation() {
        assert!(AuthConfig::default().validate().is_err());
        assert!(AuthConfig::new("client").validate().is_ok());

        let mut config = AuthConfig::new("client");
        config.redirect_path = "callback".to_string();
        assert!(config.validate().is_err());

        let mut config = AuthConfig::new("client");
        config.token_url = "not a url".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_partial_json_uses_defaults() {
        let config: AuthConfig = serde_json::from_str(r#"{"client_id":"abc"}"#).unwrap();
        assert_eq!(config.client_id, "abc");
        assert_eq!(config.redirect_port, DEFAULT_REDIRECT_PORT);
        assert_eq!(config.callback_timeout(), StdDuration::from_secs(120));
    }
}
