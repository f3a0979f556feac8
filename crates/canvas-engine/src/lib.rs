//! Canvas Engine - versioned graph state for an interactive node canvas
//!
//! This crate owns the authoritative nodes, edges and viewport of a canvas
//! editing session. It provides:
//!
//! - Undo/redo over full snapshots, with older entries compressed
//! - A uniform-grid spatial index for region queries and hit testing
//! - Edge classification and per-target constraints (exclusive roles,
//!   unique ordinals)
//! - Debounced, sanitized persistence through a pluggable port
//!
//! # Architecture
//!
//! - `CanvasEngine`: single-writer authority; every mutation goes through it
//! - `HistoryManager`: bounded, debounced snapshot stack
//! - `SpatialIndex`: grid buckets, updated from a deferred queue
//! - `SaveGateway`: debounce + sanitize + primary/fallback persistence
//!
//! Background work is expressed as deadlines on an injected `Clock` and runs
//! when the owner calls `CanvasEngine::tick`.
//!
//! # Example
//!
//! ```ignore
//! use canvas_engine::{CanvasEngineBuilder, DataMap, EdgeSpec, Position};
//!
//! let mut engine = CanvasEngineBuilder::new("board-1").build()?;
//! let prompt = engine.add_node("text", Position::new(0.0, 0.0), DataMap::new());
//! let config = engine.add_node("imageConfig", Position::new(400.0, 0.0), DataMap::new());
//! engine.add_edge(&prompt, &config, EdgeSpec::new());
//! engine.tick();
//! ```

pub mod builder;
pub mod compression;
pub mod config;
pub mod constants;
pub mod edges;
pub mod engine;
pub mod error;
pub mod events;
pub mod history;
pub mod ids;
pub mod persistence;
pub mod sanitize;
pub mod schedule;
pub mod spatial;
pub mod types;
pub mod upstream;
pub mod validation;

// Re-export key types
pub use builder::CanvasEngineBuilder;
pub use compression::CompressionPort;
#[cfg(feature = "zstd-history")]
pub use compression::ZstdCompression;
pub use config::EngineConfig;
pub use edges::{EdgeRules, KindPairRule};
pub use engine::{CanvasEngine, TickOutcome};
pub use error::{CanvasError, Result};
pub use events::{EngineEvent, EventError, EventSink, NullEventSink, VecEventSink};
pub use history::{CompactionJob, HistoryManager};
pub use persistence::{DeferredFailure, MemoryPersistence, PersistencePort, SaveStatus};
pub use sanitize::DetachedPayload;
pub use schedule::{Clock, ManualClock, SystemClock};
pub use spatial::{NodeSize, NodeSizeTable, Rect, SpatialIndex};
pub use types::{
    CanvasEdge, CanvasNode, CanvasSnapshot, DataMap, EdgeData, EdgeId, EdgeSpec, EdgeType, NodeData, NodeId,
    NodePatch, Position, Selection, Viewport,
};
pub use upstream::{UpstreamImageBlock, UpstreamInputs, UpstreamTextBlock};
pub use validation::{RepairReport, ValidationIssue};
