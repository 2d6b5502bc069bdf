//! File-persisted, append-only upload history.

use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::{debug, info};

use vouchersnap_common::{paths, write_atomic, Error, FileMode, Result};

use crate::entry::{LedgerEntry, LedgerIdentity, UploadDetails, UploadOutcome};

/// On-disk format version.
const LEDGER_VERSION: u32 = 1;

#[derive(Serialize)]
struct LedgerFileRef<'a> {
    version: u32,
    entries: &'a [LedgerEntry],
}

#[derive(Deserialize)]
struct LedgerFile {
    version: u32,
    #[serde(default)]
    entries: Vec<LedgerEntry>,
}

/// Ordered record of every completed upload.
///
/// Entries are only ever appended. Whether an item is a duplicate is
/// answered from the entries each time it is asked; nothing about it is
/// stored. Each append rewrites the whole file by atomic replacement.
#[derive(Debug)]
pub struct UploadLedger {
    path: PathBuf,
    entries: Vec<LedgerEntry>,
}

impl UploadLedger {
    /// Load the ledger at `path`. A missing file is an empty history.
    ///
    /// # Errors
    /// - `StoreCorrupt` if the file exists but cannot be decoded
    /// - I/O failure reading the file
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let entries = read_entries(&path).await?;
        debug!(path = %path.display(), entries = entries.len(), "Upload ledger opened");
        Ok(Self { path, entries })
    }

    /// Open the ledger in the per-user configuration directory.
    pub async fn open_default() -> Result<Self> {
        Self::open(paths::ledger_path()?).await
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Re-read the file, picking up appends made by another handle.
    pub async fn reload(&mut self) -> Result<()> {
        self.entries = read_entries(&self.path).await?;
        Ok(())
    }

    /// Whether `identity` has been recorded before.
    pub fn has_uploaded(&self, identity: &LedgerIdentity) -> bool {
        self.entries.iter().any(|e| &e.identity == identity)
    }

    /// Most recent entry for `identity`, if any.
    pub fn find(&self, identity: &LedgerIdentity) -> Option<&LedgerEntry> {
        self.entries.iter().rev().find(|e| &e.identity == identity)
    }

    /// Append an entry for a completed upload.
    pub async fn record(
        &mut self,
        identity: LedgerIdentity,
        outcome: UploadOutcome,
    ) -> Result<LedgerEntry> {
        self.record_with(identity, outcome, UploadDetails::default())
            .await
    }

    /// Append an entry with descriptive details.
    ///
    /// Always appends, even when `identity` is already present.
    ///
    /// # Postconditions
    /// - On success the entry is on disk and visible to queries
    /// - On failure neither the file nor the in-memory history changed
    pub async fn record_with(
        &mut self,
        identity: LedgerIdentity,
        outcome: UploadOutcome,
        mut details: UploadDetails,
    ) -> Result<LedgerEntry> {
        if details.observation_id.is_none() {
            details.observation_id = identity.observation_id();
        }
        let entry = LedgerEntry {
            identity,
            recorded_at: Utc::now(),
            outcome,
            details,
        };

        self.entries.push(entry.clone());
        if let Err(e) = self.persist().await {
            self.entries.pop();
            return Err(e);
        }

        info!(identity = %entry.identity, outcome = %entry.outcome, "Upload recorded");
        Ok(entry)
    }

    /// Every upload attached to `observation_id`, in the order recorded.
    pub fn for_observation(&self, observation_id: u64) -> Vec<&LedgerEntry> {
        self.entries
            .iter()
            .filter(|e| e.details.observation_id == Some(observation_id))
            .collect()
    }

    /// Up to `limit` entries, most recent first.
    pub fn recent(&self, limit: usize) -> Vec<&LedgerEntry> {
        self.entries.iter().rev().take(limit).collect()
    }

    /// All entries in the order they were appended.
    pub fn entries(&self) -> &[LedgerEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    async fn persist(&self) -> Result<()> {
        let file = LedgerFileRef {
            version: LEDGER_VERSION,
            entries: &self.entries,
        };
        let json = serde_json::to_vec_pretty(&file)?;
        write_atomic(&self.path, &json, FileMode::Default).await
    }
}

async fn read_entries(path: &Path) -> Result<Vec<LedgerEntry>> {
    let content = match fs::read_to_string(path).await {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(Error::Io(e)),
    };
    if content.trim().is_empty() {
        return Ok(Vec::new());
    }

    let file: LedgerFile = serde_json::from_str(&content)
        .map_err(|e| Error::StoreCorrupt(format!("{}: {}", path.display(), e)))?;
    if file.version != LEDGER_VERSION {
        return Err(Error::StoreCorrupt(format!(
            "{}: unsupported ledger version {}",
            path.display(),
            file.version
        )));
    }
    Ok(file.entries)
}
