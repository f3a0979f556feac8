//! Canvas Store - disk persistence and background drivers for canvas-engine
//!
//! - `FileCanvasStore`: one JSON document per session, written atomically
//! - `SaveWorker` / `QueuedPersistence`: coalescing background writes
//! - `spawn_ticker`: runs the engine's debounced work on a tokio interval
//! - `StoreConfig`: data directory and timings, loaded from `store.json`
//!
//! # Example
//!
//! ```ignore
//! let config = StoreConfig::load(&default_data_dir()).await?;
//! let session = open_session(&config, "board-1", EngineConfig::default())?;
//! session.engine.lock().add_node("text", Position::new(0.0, 0.0), DataMap::new());
//! session.close().await?;
//! ```

pub mod config;
pub mod error;
pub mod file_store;
pub mod save_worker;
pub mod ticker;

use std::sync::Arc;

use canvas_engine::{CanvasEngineBuilder, EngineConfig};
use parking_lot::Mutex;
use tokio::task::JoinHandle;

pub use config::{default_data_dir, StoreConfig};
pub use error::{Result, StoreError};
pub use file_store::FileCanvasStore;
pub use save_worker::{QueuedPersistence, SaveWorker, WorkerStats};
pub use ticker::{spawn_ticker, SharedEngine};

/// An engine wired to a file store, a save worker and a ticker
pub struct OpenSession {
    pub engine: SharedEngine,
    worker: SaveWorker,
    ticker: JoinHandle<()>,
}

/// Build an engine for `session_id` backed by `config.data_dir` and load
/// whatever is stored for it. Must be called inside a tokio runtime.
///
/// History compaction is always handed to the ticker, whatever
/// `engine_config.external_compaction` says.
pub fn open_session(
    config: &StoreConfig,
    session_id: &str,
    mut engine_config: EngineConfig,
) -> Result<OpenSession> {
    engine_config.external_compaction = true;
    let store = Arc::new(FileCanvasStore::new(config.data_dir.clone()));
    let worker = SaveWorker::spawn(store, config.worker_debounce());

    let mut engine = CanvasEngineBuilder::new(session_id)
        .config(engine_config)
        .persistence(Arc::new(worker.handle()))
        .build()?;
    let report = engine.load_session(session_id)?;
    if !report.is_clean() {
        log::warn!("Session '{}' needed repair on open: {:?}", session_id, report);
    }

    let engine: SharedEngine = Arc::new(Mutex::new(engine));
    let ticker = spawn_ticker(&engine, config.tick_interval());
    log::info!("Opened canvas session '{}'", session_id);

    Ok(OpenSession {
        engine,
        worker,
        ticker,
    })
}

impl OpenSession {
    /// Flush pending edits, stop the ticker and wait for queued writes
    pub async fn close(self) -> Result<WorkerStats> {
        self.ticker.abort();
        self.engine.lock().teardown();
        self.worker.shutdown().await
    }
}
