//! File-backed cache for the single access credential.

use std::path::{Path, PathBuf};

use tokio::fs;
use tracing::{debug, warn};

use vouchersnap_common::{paths, remove_if_exists, write_atomic, FileMode, Result};

use crate::types::{AuthStatus, Credential};

/// Persists one [`Credential`] as JSON.
///
/// An absent file means "logged out". A file that cannot be read or decoded
/// is treated the same way rather than failing the caller.
#[derive(Debug, Clone)]
pub struct TokenStore {
    path: PathBuf,
}

impl TokenStore {
    /// Create a store backed by `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Store in the per-user configuration directory.
    pub fn default_location() -> Result<Self> {
        Ok(Self::new(paths::token_path()?))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the cached credential, if there is a readable one.
    pub async fn load(&self) -> Option<Credential> {
        let content = match fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                warn!(path = %self.path.display(), "Token file unreadable, treating as logged out: {}", e);
                return None;
            }
        };

        match serde_json::from_str::<Credential>(&content) {
            Ok(credential) => Some(credential),
            Err(e) => {
                warn!(path = %self.path.display(), "Token file corrupt, treating as logged out: {}", e);
                None
            }
        }
    }

    /// Describe what the store holds.
    pub async fn status(&self) -> AuthStatus {
        match self.load().await {
            None => AuthStatus::LoggedOut,
            Some(c) if c.is_expired() => AuthStatus::Expired {
                expired_at: c.expires_at(),
            },
            Some(c) => AuthStatus::Valid {
                expires_at: c.expires_at(),
            },
        }
    }

    /// Replace the cached credential.
    ///
    /// # Postconditions
    /// - The file holds exactly `credential`, readable by the owner only
    ///
    /// # Errors
    /// - Serialization or filesystem failure; the previous file is left intact
    pub async fn save(&self, credential: &Credential) -> Result<()> {
        let json = serde_json::to_vec_pretty(credential)?;
        write_atomic(&self.path, &json, FileMode::OwnerOnly).await?;
        debug!(path = %self.path.display(), "Credential saved");
        Ok(())
    }

    /// Delete the cached credential. Succeeds if there was none.
    pub async fn clear(&self) -> Result<()> {
        if remove_if_exists(&self.path).await? {
            debug!(path = %self.path.display(), "Credential removed");
        }
        Ok(())
    }
}
