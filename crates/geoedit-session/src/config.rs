//! Session configuration

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// On-disk encoding of the history snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreFormat {
    #[default]
    Json,
    Bincode,
}

/// Every field is optional in the file; missing ones take their default.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Quiet period before pending edits are written to the store.
    pub save_debounce_ms: u64,
    /// Store directory, relative to the session root.
    pub store_dir: String,
    pub store_format: StoreFormat,
    /// Spatial index cell edge in degrees.
    pub spatial_cell_size: f64,
    /// Tile loads requested below this zoom are ignored.
    pub min_tile_zoom: u8,
    pub max_concurrent_loads: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        SessionConfig {
            save_debounce_ms: 350,
            store_dir: ".geoedit".to_string(),
            store_format: StoreFormat::Json,
            spatial_cell_size: geoedit_core::DEFAULT_CELL_SIZE,
            min_tile_zoom: 15,
            max_concurrent_loads: 4,
        }
    }
}

impl SessionConfig {
    /// Reads a TOML config file. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::debug!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        Self::from_toml(&text).with_context(|| format!("parsing config {}", path.display()))
    }

    pub fn from_toml(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    pub fn save_debounce(&self) -> Duration {
        Duration::from_millis(self.save_debounce_ms)
    }
}
