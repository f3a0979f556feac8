//! Fluent builder for canvas engines
//!
//! Every port has a working default, so the smallest setup is
//! `CanvasEngineBuilder::new("session").build()`.
//!
//! # Example
//!
//! ```ignore
//! let engine = CanvasEngineBuilder::new("board-1")
//!     .config(EngineConfig::default())
//!     .persistence(Arc::new(file_store))
//!     .fallback_persistence(Arc::new(MemoryPersistence::new()))
//!     .event_sink(Arc::new(media_cleanup))
//!     .build()?;
//! ```

use std::sync::Arc;

use crate::compression::CompressionPort;
use crate::config::EngineConfig;
use crate::engine::CanvasEngine;
use crate::error::Result;
use crate::events::{EventSink, NullEventSink};
use crate::history::HistoryManager;
use crate::persistence::{MemoryPersistence, PersistencePort, SaveGateway};
use crate::schedule::{Clock, SystemClock};

/// Fluent builder for [`CanvasEngine`]
pub struct CanvasEngineBuilder {
    session_id: String,
    config: EngineConfig,
    persistence: Option<Arc<dyn PersistencePort>>,
    fallback: Option<Arc<dyn PersistencePort>>,
    compression: Option<Arc<dyn CompressionPort>>,
    events: Option<Arc<dyn EventSink>>,
    clock: Option<Arc<dyn Clock>>,
}

impl CanvasEngineBuilder {
    /// Create a builder for an empty session
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            config: EngineConfig::default(),
            persistence: None,
            fallback: None,
            compression: default_compression(),
            events: None,
            clock: None,
        }
    }

    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Primary storage backend (defaults to an in-memory store)
    pub fn persistence(mut self, port: Arc<dyn PersistencePort>) -> Self {
        self.persistence = Some(port);
        self
    }

    /// Backend tried when the primary rejects a save or has nothing to load
    pub fn fallback_persistence(mut self, port: Arc<dyn PersistencePort>) -> Self {
        self.fallback = Some(port);
        self
    }

    /// History compressor (defaults to zstd when the feature is enabled)
    pub fn compression(mut self, port: Arc<dyn CompressionPort>) -> Self {
        self.compression = Some(port);
        self
    }

    /// Keep every history entry raw
    pub fn without_compression(mut self) -> Self {
        self.compression = None;
        self
    }

    pub fn event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.events = Some(sink);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Validate the configuration and build the engine
    pub fn build(self) -> Result<CanvasEngine> {
        self.config.validate()?;

        let persistence: Arc<dyn PersistencePort> = match self.persistence {
            Some(port) => port,
            None => Arc::new(MemoryPersistence::new()),
        };
        let saves = SaveGateway::new(
            persistence,
            self.fallback,
            self.config.save_debounce_ms,
            self.config.inline_payload_limit,
        );
        let history = HistoryManager::new(self.config.history_limits(), self.compression);
        let events: Arc<dyn EventSink> = match self.events {
            Some(sink) => sink,
            None => Arc::new(NullEventSink),
        };
        let clock: Arc<dyn Clock> = match self.clock {
            Some(clock) => clock,
            None => Arc::new(SystemClock::new()),
        };

        log::debug!("Building canvas engine for session '{}'", self.session_id);
        Ok(CanvasEngine::from_parts(
            self.session_id,
            self.config,
            history,
            saves,
            events,
            clock,
        ))
    }
}

#[cfg(feature = "zstd-history")]
fn default_compression() -> Option<Arc<dyn CompressionPort>> {
    Some(Arc::new(crate::compression::ZstdCompression::default()))
}

#[cfg(not(feature = "zstd-history"))]
fn default_compression() -> Option<Arc<dyn CompressionPort>> {
    None
}
