//! Error types for the canvas store

use canvas_engine::CanvasError;
use thiserror::Error;

/// Result type alias using StoreError
pub type Result<T> = std::result::Result<T, StoreError>;

#[derive(Debug, Error)]
pub enum StoreError {
    /// Session ids must contain a non-whitespace character
    #[error("Session id is empty")]
    EmptySessionId,

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The stored document could not be read as a canvas
    #[error("Canvas error: {0}")]
    Canvas(#[from] CanvasError),

    /// The background save worker has stopped
    #[error("Save worker is not running")]
    WorkerStopped,
}

impl From<StoreError> for CanvasError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Canvas(inner) => inner,
            StoreError::Io(inner) => CanvasError::Io(inner),
            StoreError::Serialization(inner) => CanvasError::Serialization(inner),
            other => CanvasError::persistence(other.to_string()),
        }
    }
}
