//! Engine-wide constants
//!
//! Single source of truth for tuning defaults. `EngineConfig::default()`
//! is built from these values.

/// Persisted snapshot format
pub mod format {
    /// Current snapshot document version
    pub const SNAPSHOT_VERSION: u32 = 1;
}

/// History defaults
pub mod history {
    /// Maximum number of history entries kept (MAX_HISTORY)
    pub const MAX_ENTRIES: usize = 50;
    /// Most recent entries that always stay uncompressed (RAW_KEEP)
    pub const RAW_KEEP: usize = 8;
    /// Quiet period before a history push is recorded
    pub const PUSH_DEBOUNCE_MS: u64 = 300;
    /// Idle period before older entries are compacted
    pub const COMPACTION_IDLE_MS: u64 = 1_500;
}

/// Persistence defaults
pub mod persistence {
    /// Quiet period before the canvas is saved
    pub const SAVE_DEBOUNCE_MS: u64 = 650;
    /// Strings longer than this are stripped from persisted node data
    pub const INLINE_PAYLOAD_LIMIT: usize = 32 * 1024;
    /// Node-data keys that conventionally carry inline media payloads
    pub const INLINE_PAYLOAD_KEYS: &[&str] = &[
        "dataUrl",
        "base64",
        "blob",
        "imageData",
        "videoData",
        "inlineImage",
        "inlineVideo",
    ];
    /// Prefix of the reference that replaces a stripped payload
    pub const MEDIA_REF_PREFIX: &str = "media-ref:";
}

/// Canvas geometry defaults
pub mod geometry {
    /// Side length of a spatial index cell in canvas units
    pub const GRID_CELL_SIZE: f64 = 256.0;
    /// Offset applied to both axes when duplicating a node
    pub const DUPLICATE_OFFSET: f64 = 40.0;
    /// Width used for kinds missing from the size table
    pub const FALLBACK_NODE_WIDTH: f64 = 280.0;
    /// Height used for kinds missing from the size table
    pub const FALLBACK_NODE_HEIGHT: f64 = 200.0;
}

/// Edge role defaults
pub mod roles {
    /// Image roles at most one edge per target may hold
    pub const EXCLUSIVE_IMAGE_ROLES: &[&str] = &["first_frame_image", "last_frame_image"];
    /// Non-exclusive role used when no exclusive role is free
    pub const GENERIC_IMAGE_ROLE: &str = "input_reference";
}

/// Well-known node kinds used by the upstream query
pub mod kinds {
    pub const TEXT: &str = "text";
    pub const IMAGE: &str = "image";
    pub const VIDEO: &str = "video";
    pub const IMAGE_CONFIG: &str = "imageConfig";
    pub const VIDEO_CONFIG: &str = "videoConfig";
}

/// Limits for the upstream input query
pub mod upstream {
    /// Maximum characters of text content returned per source
    pub const TEXT_MAX_CHARS: usize = 520;
    /// Maximum characters of an image URL returned per source
    pub const URL_MAX_CHARS: usize = 240;
    /// Label used for text sources without one
    pub const DEFAULT_TEXT_LABEL: &str = "Text";
    /// Label used for image sources without one
    pub const DEFAULT_IMAGE_LABEL: &str = "Reference image";
}
