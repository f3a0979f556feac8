//! Compression port for history compaction
//!
//! Older history entries are serialized and compressed through this port.
//! The backend is optional: an engine built without one (or whose backend
//! reports itself unavailable) simply keeps every entry raw.

use crate::error::Result;
use crate::types::CanvasSnapshot;

/// Pluggable snapshot compressor
pub trait CompressionPort: Send + Sync {
    /// Capability check; `false` disables compaction for the engine's lifetime
    fn is_available(&self) -> bool {
        true
    }

    fn compress(&self, snapshot: &CanvasSnapshot) -> Result<Vec<u8>>;

    fn decompress(&self, blob: &[u8]) -> Result<CanvasSnapshot>;
}

/// JSON + zstd compression
#[cfg(feature = "zstd-history")]
#[derive(Debug, Clone)]
pub struct ZstdCompression {
    level: i32,
}

#[cfg(feature = "zstd-history")]
impl ZstdCompression {
    pub fn new(level: i32) -> Self {
        Self { level }
    }
}

#[cfg(feature = "zstd-history")]
impl Default for ZstdCompression {
    fn default() -> Self {
        Self::new(3)
    }
}

#[cfg(feature = "zstd-history")]
impl CompressionPort for ZstdCompression {
    fn is_available(&self) -> bool {
        let sample = CanvasSnapshot::default();
        match self.compress(&sample).and_then(|blob| self.decompress(&blob)) {
            Ok(restored) => restored == sample,
            Err(e) => {
                log::warn!("zstd compression self-check failed: {}", e);
                false
            }
        }
    }

    fn compress(&self, snapshot: &CanvasSnapshot) -> Result<Vec<u8>> {
        let json = serde_json::to_vec(snapshot)?;
        zstd::encode_all(&json[..], self.level).map_err(|e| crate::CanvasError::compression(e.to_string()))
    }

    fn decompress(&self, blob: &[u8]) -> Result<CanvasSnapshot> {
        let json = zstd::decode_all(blob).map_err(|e| crate::CanvasError::compression(e.to_string()))?;
        Ok(serde_json::from_slice(&json)?)
    }
}
