//! On-disk store for the recoverable history snapshot

use std::path::{Path, PathBuf};

use geoedit_core::HistorySnapshot;

use crate::config::{SessionConfig, StoreFormat};

/// Snapshot file name, JSON format.
pub const SNAPSHOT_JSON: &str = "history.json";

/// Snapshot file name, bincode format.
pub const SNAPSHOT_BIN: &str = "history.bin";

#[derive(Debug, Clone)]
pub struct SnapshotStore {
    dir: PathBuf,
    format: StoreFormat,
}

impl SnapshotStore {
    pub fn new(root: &Path, config: &SessionConfig) -> Self {
        SnapshotStore {
            dir: root.join(&config.store_dir),
            format: config.store_format,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn format(&self) -> StoreFormat {
        self.format
    }

    /// Snapshot file path for the configured format.
    pub fn path(&self) -> PathBuf {
        match self.format {
            StoreFormat::Json => self.dir.join(SNAPSHOT_JSON),
            StoreFormat::Bincode => self.dir.join(SNAPSHOT_BIN),
        }
    }

    pub fn ensure_dir(&self) -> std::io::Result<()> {
        if !self.dir.exists() {
            std::fs::create_dir_all(&self.dir)?;
        }
        Ok(())
    }

    pub fn exists(&self) -> bool {
        self.path().exists()
    }

    /// Writes the snapshot through a temporary file so a crash never
    /// leaves a truncated snapshot behind.
    pub fn save(&self, snapshot: &HistorySnapshot) -> anyhow::Result<()> {
        self.ensure_dir()?;
        let bytes = match self.format {
            StoreFormat::Json => serde_json::to_vec(snapshot)?,
            StoreFormat::Bincode => bincode::serialize(snapshot)?,
        };

        let path = self.path();
        let tmp = path.with_extension("tmp");
        std::fs::write(&tmp, &bytes)?;
        std::fs::rename(&tmp, &path)?;

        tracing::debug!("Snapshot saved: {} ({} bytes)", path.display(), bytes.len());
        Ok(())
    }

    pub fn load(&self) -> anyhow::Result<Option<HistorySnapshot>> {
        let path = self.path();
        if !path.exists() {
            return Ok(None);
        }

        let bytes = std::fs::read(&path)?;
        let snapshot = match self.format {
            StoreFormat::Json => serde_json::from_slice(&bytes)?,
            StoreFormat::Bincode => bincode::deserialize(&bytes)?,
        };

        tracing::debug!("Snapshot loaded from: {}", path.display());
        Ok(Some(snapshot))
    }

    /// Removes the whole store directory.
    pub fn clear(&self) -> std::io::Result<()> {
        if self.dir.exists() {
            std::fs::remove_dir_all(&self.dir)?;
        }
        Ok(())
    }
}
