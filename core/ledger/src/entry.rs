//! Ledger entry types.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use vouchersnap_common::{Error, Result};

/// Stable key for "this content went to this remote record".
///
/// Opaque to the ledger: two uploads are the same item exactly when their
/// identities compare equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LedgerIdentity(String);

impl LedgerIdentity {
    /// Wrap a caller-derived key.
    ///
    /// # Errors
    /// - Returns error if the key is empty or only whitespace
    pub fn new(key: impl Into<String>) -> Result<Self> {
        let key = key.into();
        if key.trim().is_empty() {
            return Err(Error::InvalidInput(
                "Ledger identity cannot be empty".to_string(),
            ));
        }
        Ok(Self(key))
    }

    /// Identity of an image attached to a remote observation.
    ///
    /// The same bytes sent to a different observation are a different item.
    pub fn for_observation(observation_id: u64, content: &[u8]) -> Self {
        let digest = Sha256::digest(content);
        Self(format!("obs:{}/sha256:{}", observation_id, hex::encode(digest)))
    }

    /// Observation this identity targets, when built by [`for_observation`](Self::for_observation).
    pub fn observation_id(&self) -> Option<u64> {
        let (id, _) = self.0.strip_prefix("obs:")?.split_once('/')?;
        id.parse().ok()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LedgerIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// How an upload was completed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UploadOutcome {
    /// First upload of this item.
    Uploaded,
    /// The user was shown a previous upload and chose to send it again.
    UploadedAgain,
}

impl fmt::Display for UploadOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UploadOutcome::Uploaded => write!(f, "uploaded"),
            UploadOutcome::UploadedAgain => write!(f, "uploaded again"),
        }
    }
}

/// Descriptive extras shown when listing history.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadDetails {
    /// Remote observation the image was attached to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observation_id: Option<u64>,
    /// Original local file name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    /// Caption burned into the uploaded image.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caption: Option<String>,
    /// Photo id assigned by the remote service.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_photo_id: Option<u64>,
}

/// One completed upload. Never modified once appended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub identity: LedgerIdentity,
    pub recorded_at: DateTime<Utc>,
    pub outcome: UploadOutcome,
    #[serde(default)]
    pub details: UploadDetails,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_rejects_empty() {
        assert!(LedgerIdentity::new("").is_err());
        assert!(LedgerIdentity::new("   ").is_err());
        assert_eq!(LedgerIdentity::new("obs:1").unwrap().as_str(), "obs:1");
    }

    #[test]
    fn test_observation_identity_is_stable() {
        let a = LedgerIdentity::for_observation(42, b"image bytes");
        let b = LedgerIdentity::for_observation(42, b"image bytes");
        assert_eq!(a, b);
        assert!(a.as_str().starts_with("obs:42/sha256:"));
        assert_eq!(a.as_str().len(), "obs:42/sha256:".len() + 64);
    }

    #[test]
    fn test_observation_identity_distinguishes_target_and_content() {
        let base = LedgerIdentity::for_observation(42, b"image bytes");
        assert_ne!(base, LedgerIdentity::for_observation(43, b"image bytes"));
        assert_ne!(base, LedgerIdentity::for_observation(42, b"other bytes"));
    }

    #[test]
    fn test_observation_id_from_identity() {
        let identity = LedgerIdentity::for_observation(12345, b"image bytes");
        assert_eq!(identity.observation_id(), Some(12345));
        assert_eq!(LedgerIdentity::new("custom-key").unwrap().observation_id(), None);
        assert_eq!(LedgerIdentity::new("obs:abc/x").unwrap().observation_id(), None);
    }

    #[test]
    fn test_entry_json_shape() {
        let entry = LedgerEntry {
            identity: LedgerIdentity::new("obs:1/sha256:ab").unwrap(),
            recorded_at: "2024-01-15T12:00:00Z".parse().unwrap(),
            outcome: UploadOutcome::UploadedAgain,
            details: UploadDetails::default(),
        };
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["identity"], "obs:1/sha256:ab");
        assert_eq!(json["outcome"], "uploaded_again");
    }
}
