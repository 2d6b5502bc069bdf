//! Token endpoint client: trades an authorization code for a credential.

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;
use url::Url;
use zeroize::{Zeroize, ZeroizeOnDrop};

use vouchersnap_common::{Error, Result};

use crate::types::Credential;

/// Parameters of an `authorization_code` grant.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct CodeExchange {
    pub client_id: String,
    pub code: String,
    pub code_verifier: String,
    pub redirect_uri: String,
}

impl CodeExchange {
    /// Form body sent to the token endpoint.
    pub fn form(&self) -> [(&'static str, &str); 5] {
        [
            ("grant_type", "authorization_code"),
            ("client_id", &self.client_id),
            ("code", &self.code),
            ("code_verifier", &self.code_verifier),
            ("redirect_uri", &self.redirect_uri),
        ]
    }
}

impl std::fmt::Debug for CodeExchange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CodeExchange")
            .field("client_id", &self.client_id)
            .field("code", &"[REDACTED]")
            .field("code_verifier", &"[REDACTED]")
            .field("redirect_uri", &self.redirect_uri)
            .finish()
    }
}

/// Successful token endpoint payload.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenGrant {
    pub access_token: Option<String>,
    #[serde(default)]
    pub token_type: Option<String>,
    #[serde(default)]
    pub expires_in: Option<u64>,
    #[serde(default)]
    pub scope: Option<String>,
}

impl TokenGrant {
    /// Turn the payload into a credential stamped with the current time.
    ///
    /// # Errors
    /// - `ExchangeFailed` if the payload carries no access token
    pub fn into_credential(self) -> Result<Credential> {
        let access_token = self
            .access_token
            .filter(|t| !t.is_empty())
            .ok_or_else(|| Error::ExchangeFailed {
                status: None,
                detail: "token response did not include an access_token".to_string(),
            })?;

        let mut credential = Credential::new(access_token, self.expires_in, self.scope);
        if let Some(token_type) = self.token_type.filter(|t| !t.is_empty()) {
            credential.token_type = token_type;
        }
        Ok(credential)
    }
}

/// OAuth2 error payload (RFC 6749 §5.2).
#[derive(Debug, Deserialize)]
struct TokenErrorBody {
    error: String,
    #[serde(default)]
    error_description: Option<String>,
}

/// Something that can redeem an authorization code.
#[async_trait]
pub trait TokenEndpoint: Send + Sync {
    /// Exchange a code and its PKCE verifier for a credential.
    ///
    /// # Errors
    /// - `ExchangeFailed` when the endpoint rejects the grant
    /// - `Network` when the endpoint cannot be reached
    async fn exchange_code(&self, exchange: &CodeExchange) -> Result<Credential>;
}

/// Token endpoint reached over HTTPS.
pub struct HttpTokenEndpoint {
    client: reqwest::Client,
    token_url: Url,
}

impl HttpTokenEndpoint {
    /// Create a client for the given token URL.
    ///
    /// # Errors
    /// - Invalid token URL
    /// - HTTP client construction failure
    pub fn new(token_url: &str) -> Result<Self> {
        let token_url = Url::parse(token_url)
            .map_err(|e| Error::Config(format!("Invalid token URL: {}", e)))?;
        let client = reqwest::Client::builder()
            .user_agent(concat!("VoucherSnap/", env!("CARGO_PKG_VERSION")))
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .map_err(|e| Error::Network(e.to_string()))?;
        Ok(Self { client, token_url })
    }

    /// Use a preconfigured HTTP client.
    pub fn with_client(client: reqwest::Client, token_url: Url) -> Self {
        Self { client, token_url }
    }
}

#[async_trait]
impl TokenEndpoint for HttpTokenEndpoint {
    async fn exchange_code(&self, exchange: &CodeExchange) -> Result<Credential> {
        debug!(url = %self.token_url, "Exchanging authorization code");

        let response = self
            .client
            .post(self.token_url.clone())
            .header(reqwest::header::ACCEPT, "application/json")
            .form(&exchange.form())
            .send()
            .await
            .map_err(|e| Error::Network(format!("Token request failed: {}", e)))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| Error::Network(format!("Failed to read token response: {}", e)))?;

        if !status.is_success() {
            let detail = match serde_json::from_str::<TokenErrorBody>(&body) {
                Ok(err) => match err.error_description {
                    Some(description) => format!("{}: {}", err.error, description),
                    None => err.error,
                },
                Err(_) => status
                    .canonical_reason()
                    .unwrap_or("unexpected response")
                    .to_string(),
            };
            return Err(Error::ExchangeFailed {
                status: Some(status.as_u16()),
                detail,
            });
        }

        let grant: TokenGrant = serde_json::from_str(&body).map_err(|e| Error::ExchangeFailed {
            status: Some(status.as_u16()),
            detail: format!("malformed token response: {}", e),
        })?;
        grant.into_credential()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;

    fn exchange() -> CodeExchange {
        CodeExchange {
            client_id: "client-1".to_string(),
            code: "abc".to_string(),
            code_verifier: "v1".to_string(),
            redirect_uri: "http://127.0.0.1:8914/callback".to_string(),
        }
    }

    fn endpoint(server: &mockito::ServerGuard) -> HttpTokenEndpoint {
        let client = reqwest::Client::builder().no_proxy().build().unwrap();
        let url = Url::parse(&format!("{}/oauth/token", server.url())).unwrap();
        HttpTokenEndpoint::with_client(client, url)
    }

    #[tokio::test]
    async fn test_exchange_posts_pkce_grant() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/oauth/token")
            .match_body(Matcher::AllOf(vec![
                Matcher::UrlEncoded("grant_type".into(), "authorization_code".into()),
                Matcher::UrlEncoded("client_id".into(), "client-1".into()),
                Matcher::UrlEncoded("code".into(), "abc".into()),
                Matcher::UrlEncoded("code_verifier".into(), "v1".into()),
                Matcher::UrlEncoded(
                    "redirect_uri".into(),
                    "http://127.0.0.1:8914/callback".into(),
                ),
            ]))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"access_token":"tok1","token_type":"Bearer","expires_in":7200,"scope":"write"}"#)
            .create_async()
            .await;

        let credential = endpoint(&server).exchange_code(&exchange()).await.unwrap();
        mock.assert_async().await;

        assert_eq!(credential.access_token, "tok1");
        assert_eq!(credential.expires_in, Some(7200));
        assert_eq!(credential.scope.as_deref(), Some("write"));
    }

    #[tokio::test]
    async fn test_exchange_rejection_carries_remote_error() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/oauth/token")
            .with_status(400)
            .with_header("content-type", "application/json")
            .with_body(r#"{"error":"invalid_grant","error_description":"code expired"}"#)
            .create_async()
            .await;

        let err = endpoint(&server).exchange_code(&exchange()).await.unwrap_err();
        match err {
            Error::ExchangeFailed { status, detail } => {
                assert_eq!(status, Some(400));
                assert_eq!(detail, "invalid_grant: code expired");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_exchange_non_json_error() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/oauth/token")
            .with_status(502)
            .with_body("<html>bad gateway</html>")
            .create_async()
            .await;

        let err = endpoint(&server).exchange_code(&exchange()).await.unwrap_err();
        assert!(matches!(err, Error::ExchangeFailed { status: Some(502), .. }));
    }

    #[tokio::test]
    async fn test_exchange_without_access_token_fails() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/oauth/token")
            .with_status(200)
            .with_body(r#"{"token_type":"Bearer"}"#)
            .create_async()
            .await;

        let err = endpoint(&server).exchange_code(&exchange()).await.unwrap_err();
        assert!(matches!(err, Error::ExchangeFailed { .. }));
    }

    #[test]
    fn test_grant_defaults_token_type() {
        let grant: TokenGrant = serde_json::from_str(r#"{"access_token":"t"}"#).unwrap();
        let credential = grant.into_credential().unwrap();
        assert_eq!(credential.token_type, "Bearer");
    }

    #[test]
    fn test_exchange_debug_redacts() {
        let debug = format!("{:?}", exchange());
        assert!(!debug.contains("abc"));
        assert!(!debug.contains("\"v1\""));
    }
}
