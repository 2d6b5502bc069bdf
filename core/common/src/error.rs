//! Common error types for VoucherSnap.

use std::time::Duration;

use thiserror::Error;

/// Top-level error type for VoucherSnap operations.
#[derive(Debug, Error)]
pub enum Error {
    /// No usable access token is available.
    #[error("Not authenticated")]
    NotAuthenticated,

    /// The authorization attempt was denied, cancelled, or failed the state check.
    #[error("Authorization rejected: {0}")]
    Rejected(String),

    /// No authorization callback arrived before the deadline.
    #[error("Timed out after {}s waiting for the authorization callback", .0.as_secs())]
    TimedOut(Duration),

    /// The token endpoint refused the authorization code or verifier.
    #[error("Token exchange failed{}: {detail}", .status.map(|s| format!(" (HTTP {s})")).unwrap_or_default())]
    ExchangeFailed {
        /// HTTP status returned by the token endpoint, if a response was received.
        status: Option<u16>,
        /// Remote error description, or a local description of the bad payload.
        detail: String,
    },

    /// A persisted file exists but cannot be decoded.
    #[error("Corrupt store: {0}")]
    StoreCorrupt(String),

    /// The loopback redirect port is already bound by another process.
    #[error("Port {port} is unavailable: {source}")]
    PortUnavailable {
        port: u16,
        #[source]
        source: std::io::Error,
    },

    /// Transport-level HTTP failure.
    #[error("Network error: {0}")]
    Network(String),

    /// The operating system random source failed.
    #[error("Random source failure: {0}")]
    Random(String),

    /// I/O operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization or deserialization failed.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Invalid input provided.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Configuration is missing or unusable.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    /// A short suggestion for the user, for the error kinds they can act on.
    pub fn hint(&self) -> Option<&'static str> {
        match self {
            Error::NotAuthenticated => Some("Run `vouchersnap login` to sign in."),
            Error::Rejected(_) => {
                Some("Authorization was not granted. Run `vouchersnap login` to start over.")
            }
            Error::TimedOut(_) => {
                Some("Finish signing in within the browser window, then try again.")
            }
            Error::ExchangeFailed { .. } => {
                Some("Check the configured client id and redirect URI, then log in again.")
            }
            Error::PortUnavailable { .. } => Some(
                "Another program is using the redirect port. Close it (or a previous login) and retry.",
            ),
            Error::StoreCorrupt(_) => {
                Some("Move the damaged file aside; a fresh one will be created.")
            }
            _ => None,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

/// Result type alias using the common Error.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exchange_failed_display_includes_status() {
        let err = Error::ExchangeFailed {
            status: Some(400),
            detail: "invalid_grant".to_string(),
        };
        assert_eq!(err.to_string(), "Token exchange failed (HTTP 400): invalid_grant");

        let err = Error::ExchangeFailed {
            status: None,
            detail: "missing access_token".to_string(),
        };
        assert_eq!(err.to_string(), "Token exchange failed: missing access_token");
    }

    #[test]
    fn test_timed_out_display() {
        let err = Error::TimedOut(Duration::from_secs(120));
        assert!(err.to_string().contains("120s"));
    }

    #[test]
    fn test_auth_errors_carry_hints() {
        assert!(Error::NotAuthenticated.hint().is_some());
        assert!(Error::TimedOut(Duration::from_secs(1)).hint().is_some());
        assert!(Error::Rejected("state mismatch".into()).hint().is_some());
        assert!(Error::InvalidInput("x".into()).hint().is_none());
    }
}
