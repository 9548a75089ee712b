//! Snapshot Store - Atomic JSON Ledger State Persistence
//!
//! Saves the in-memory store to `state.json` using atomic writes
//! (write to tmp file, then rename). The file is always either the
//! old or the new version, never a partial write.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tokio::fs;
use tracing::{info, instrument};

use super::memory::StoreState;

pub struct SnapshotStore {
    state_path: PathBuf,
    tmp_path: PathBuf,
}

impl SnapshotStore {
    /// Create a snapshot store in the given data directory.
    ///
    /// Creates the directory if it doesn't exist.
    pub async fn new(data_dir: &str) -> Result<Self> {
        let dir = Path::new(data_dir);
        fs::create_dir_all(dir)
            .await
            .context("Failed to create data directory")?;

        Ok(Self {
            state_path: dir.join("state.json"),
            tmp_path: dir.join("state.json.tmp"),
        })
    }

    /// Save a snapshot atomically (tmp → rename).
    #[instrument(skip(self, state))]
    pub async fn save(&self, state: &StoreState) -> Result<()> {
        let json = serde_json::to_string_pretty(state).context("Failed to serialize store state")?;

        fs::write(&self.tmp_path, &json)
            .await
            .context("Failed to write tmp state file")?;
        fs::rename(&self.tmp_path, &self.state_path)
            .await
            .context("Failed to rename state file")?;

        info!(
            path = %self.state_path.display(),
            accounts = state.accounts.len(),
            credit_lines = state.credit_lines.len(),
            "State snapshot saved"
        );
        Ok(())
    }

    /// Load the last snapshot, `None` on first start.
    #[instrument(skip(self))]
    pub async fn load(&self) -> Result<Option<StoreState>> {
        if !fs::try_exists(&self.state_path).await.unwrap_or(false) {
            info!("No state file found, starting fresh");
            return Ok(None);
        }

        let json = fs::read_to_string(&self.state_path)
            .await
            .context("Failed to read state file")?;
        let state: StoreState = serde_json::from_str(&json).context("Failed to parse state JSON")?;

        info!(
            accounts = state.accounts.len(),
            credit_lines = state.credit_lines.len(),
            transfers = state.transfers.len(),
            "State snapshot loaded"
        );
        Ok(Some(state))
    }
}
