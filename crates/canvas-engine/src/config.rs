//! Engine configuration
//!
//! Every field has a default taken from [`crate::constants`], so a partial
//! JSON document (or `{}`) yields a working configuration.

use serde::{Deserialize, Serialize};

use crate::constants::{geometry, history, persistence};
use crate::edges::EdgeRules;
use crate::error::{CanvasError, Result};
use crate::history::HistoryLimits;
use crate::spatial::NodeSizeTable;

/// Tuning and host tables for a [`crate::CanvasEngine`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EngineConfig {
    /// Maximum number of history entries (MAX_HISTORY)
    pub max_history: usize,
    /// Most recent history entries kept uncompressed (RAW_KEEP)
    pub raw_keep: usize,
    pub history_debounce_ms: u64,
    pub save_debounce_ms: u64,
    pub compaction_idle_ms: u64,
    /// Leave history compaction to the host (`take_compaction_job`) instead
    /// of running it inside `tick`
    pub external_compaction: bool,
    pub grid_cell_size: f64,
    pub duplicate_offset: f64,
    /// Persisted node-data strings longer than this are replaced by a reference
    pub inline_payload_limit: usize,
    pub edge_rules: EdgeRules,
    pub node_sizes: NodeSizeTable,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_history: history::MAX_ENTRIES,
            raw_keep: history::RAW_KEEP,
            history_debounce_ms: history::PUSH_DEBOUNCE_MS,
            save_debounce_ms: persistence::SAVE_DEBOUNCE_MS,
            compaction_idle_ms: history::COMPACTION_IDLE_MS,
            external_compaction: false,
            grid_cell_size: geometry::GRID_CELL_SIZE,
            duplicate_offset: geometry::DUPLICATE_OFFSET,
            inline_payload_limit: persistence::INLINE_PAYLOAD_LIMIT,
            edge_rules: EdgeRules::media_pipeline(),
            node_sizes: NodeSizeTable::default(),
        }
    }
}

impl EngineConfig {
    /// Parse a JSON document and validate it
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: EngineConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the engine cannot work with
    pub fn validate(&self) -> Result<()> {
        if self.max_history < 2 {
            return Err(CanvasError::InvalidConfig(format!(
                "maxHistory must be at least 2 (got {})",
                self.max_history
            )));
        }
        if self.raw_keep == 0 {
            return Err(CanvasError::InvalidConfig("rawKeep must be at least 1".to_string()));
        }
        if !(self.grid_cell_size.is_finite() && self.grid_cell_size > 0.0) {
            return Err(CanvasError::InvalidConfig(format!(
                "gridCellSize must be a positive number (got {})",
                self.grid_cell_size
            )));
        }
        if !self.duplicate_offset.is_finite() {
            return Err(CanvasError::InvalidConfig("duplicateOffset must be finite".to_string()));
        }
        let fallback = self.node_sizes.fallback;
        if fallback.width < 0.0 || fallback.min_height < 0.0 {
            return Err(CanvasError::InvalidConfig(
                "fallback node size must not be negative".to_string(),
            ));
        }
        if self.edge_rules.exclusive_roles.contains(&self.edge_rules.generic_role) {
            return Err(CanvasError::InvalidConfig(format!(
                "generic role '{}' cannot also be exclusive",
                self.edge_rules.generic_role
            )));
        }
        Ok(())
    }

    pub fn history_limits(&self) -> HistoryLimits {
        HistoryLimits {
            max_entries: self.max_history,
            raw_keep: self.raw_keep,
            push_debounce_ms: self.history_debounce_ms,
            compaction_idle_ms: self.compaction_idle_ms,
        }
    }
}
