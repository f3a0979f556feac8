//! Store configuration
//!
//! Loaded from `store.json` in the data directory; a missing file yields the
//! defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::fs;

use crate::error::Result;

/// Named defaults
pub mod defaults {
    /// Directory (under the platform data dir) holding canvas documents
    pub const STORE_DIR_NAME: &str = "nexus-canvas";
    /// Configuration file name inside the data directory
    pub const CONFIG_FILE_NAME: &str = "store.json";
    /// Quiet period before the worker writes queued saves
    pub const WORKER_DEBOUNCE_MS: u64 = 650;
    /// Period of the engine ticker
    pub const TICK_INTERVAL_MS: u64 = 100;
}

/// Platform data directory for canvas documents
pub fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(defaults::STORE_DIR_NAME)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StoreConfig {
    /// Directory holding one JSON document per session
    pub data_dir: PathBuf,
    pub worker_debounce_ms: u64,
    pub tick_interval_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            worker_debounce_ms: defaults::WORKER_DEBOUNCE_MS,
            tick_interval_ms: defaults::TICK_INTERVAL_MS,
        }
    }
}

impl StoreConfig {
    /// Load configuration from `dir/store.json`, or defaults if absent
    pub async fn load(dir: &Path) -> Result<Self> {
        let config_path = dir.join(defaults::CONFIG_FILE_NAME);

        if !config_path.exists() {
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(&config_path).await?;
        Ok(serde_json::from_str(&contents)?)
    }

    /// Save configuration to `dir/store.json`
    pub async fn save(&self, dir: &Path) -> Result<()> {
        fs::create_dir_all(dir).await?;

        let config_path = dir.join(defaults::CONFIG_FILE_NAME);
        let contents = serde_json::to_string_pretty(self)?;
        fs::write(&config_path, contents).await?;

        log::info!("Store configuration saved to {:?}", config_path);
        Ok(())
    }

    pub fn worker_debounce(&self) -> Duration {
        Duration::from_millis(self.worker_debounce_ms)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms.max(1))
    }
}
