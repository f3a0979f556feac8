//! Error types for the canvas engine

use thiserror::Error;

/// Result type alias using CanvasError
pub type Result<T> = std::result::Result<T, CanvasError>;

/// Errors that can occur in the canvas engine
///
/// Most engine operations never fail: unknown ids are no-ops and background
/// failures are logged. These errors surface from the ports (persistence,
/// compression) and from configuration loading.
#[derive(Debug, Error)]
pub enum CanvasError {
    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Compression or decompression of a history entry failed
    #[error("Compression error: {0}")]
    Compression(String),

    /// A persistence backend rejected a load/save/delete
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// Snapshot document carries a format version this engine cannot read
    #[error("Unsupported snapshot version: {0}")]
    UnsupportedVersion(u32),

    /// Configuration values are out of range
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl CanvasError {
    /// Create a persistence error with a message
    pub fn persistence(msg: impl Into<String>) -> Self {
        Self::Persistence(msg.into())
    }

    /// Create a compression error with a message
    pub fn compression(msg: impl Into<String>) -> Self {
        Self::Compression(msg.into())
    }
}
