//! Per-user file locations.

use std::path::PathBuf;

use crate::{Error, Result};

/// Directory name under the platform configuration directory.
pub const APP_DIR_NAME: &str = "vouchersnap";

/// Cached credential file name.
pub const TOKEN_FILE: &str = "token.json";
/// Upload ledger file name.
pub const LEDGER_FILE: &str = "history.json";
/// Application settings file name.
pub const CONFIG_FILE: &str = "config.json";

/// Root directory for all VoucherSnap state (e.g. `~/.config/vouchersnap`).
pub fn app_dir() -> Result<PathBuf> {
    dirs::config_dir()
        .map(|dir| dir.join(APP_DIR_NAME))
        .ok_or_else(|| Error::Config("Could not determine the user configuration directory".into()))
}

pub fn token_path() -> Result<PathBuf> {
    Ok(app_dir()?.join(TOKEN_FILE))
}

pub fn ledger_path() -> Result<PathBuf> {
    Ok(app_dir()?.join(LEDGER_FILE))
}

pub fn config_path() -> Result<PathBuf> {
    Ok(app_dir()?.join(CONFIG_FILE))
}
