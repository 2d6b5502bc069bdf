//! User settings persisted next to the token and history files.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tokio::fs;

use vouchersnap_auth::AuthConfig;
use vouchersnap_common::{write_atomic, Error, FileMode, Result};

/// Default number of rows printed by `history`.
pub const DEFAULT_HISTORY_LIMIT: usize = 20;

/// Contents of `config.json`. Every field may be omitted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub auth: AuthConfig,
    pub history_limit: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            auth: AuthConfig::default(),
            history_limit: DEFAULT_HISTORY_LIMIT,
        }
    }
}

impl AppConfig {
    /// Read settings from `path`, falling back to defaults when it is absent.
    pub async fn load(path: &Path) -> Result<Self> {
        match fs::read_to_string(path).await {
            Ok(content) => serde_json::from_str(&content)
                .map_err(|e| Error::Config(format!("{}: {}", path.display(), e))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(Error::Io(e)),
        }
    }

    pub async fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_vec_pretty(self)?;
        write_atomic(path, &json, FileMode::Default).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_missing_config_uses_defaults() {
        let temp = TempDir::new().unwrap();
        let config = AppConfig::load(&temp.path().join("config.json"))
            .await
            .unwrap();
        assert_eq!(config, AppConfig::default());
        assert_eq!(config.auth.redirect_port, 8914);
    }

    #[tokio::test]
    async fn test_partial_config_fills_defaults() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.json");
        std::fs::write(&path, br#"{"auth":{"client_id":"abc","redirect_port":9000}}"#).unwrap();

        let config = AppConfig::load(&path).await.unwrap();
        assert_eq!(config.auth.client_id, "abc");
        assert_eq!(config.auth.redirect_port, 9000);
        assert_eq!(config.auth.redirect_path, "/callback");
        assert_eq!(config.history_limit, DEFAULT_HISTORY_LIMIT);
    }

    #[tokio::test]
    async fn test_save_then_load() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("nested").join("config.json");
        let mut config = AppConfig::default();
        config.auth.client_id = "client-1".to_string();
        config.auth.callback_timeout_secs = 300;

        config.save(&path).await.unwrap();
        assert_eq!(AppConfig::load(&path).await.unwrap(), config);
    }

    #[tokio::test]
    async fn test_malformed_config_is_error() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.json");
        std::fs::write(&path, b"{ nope").unwrap();

        assert!(matches!(AppConfig::load(&path).await, Err(Error::Config(_))));
    }
}
