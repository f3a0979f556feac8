//! Coalescing background save worker
//!
//! Saves are queued per session (latest snapshot wins) and written once the
//! queue has been quiet for the debounce interval. A failed write stays
//! queued and is retried after the next quiet period; the failure is handed
//! to the engine through [`PersistencePort::drain_failures`]. Shutting the
//! worker down makes a last attempt at everything still pending.
//! [`QueuedPersistence`] is the engine-side handle: it implements
//! [`PersistencePort`] by enqueueing, and serves loads from the queue before
//! falling through to disk.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use canvas_engine::{CanvasError, CanvasSnapshot, DeferredFailure, PersistencePort};
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::error::{Result, StoreError};
use crate::file_store::FileCanvasStore;

/// Snapshots waiting to be written, tagged with a generation so a write
/// only settles the entry it actually wrote
#[derive(Default)]
struct PendingSaves {
    next_generation: u64,
    entries: HashMap<String, (u64, Arc<CanvasSnapshot>)>,
}

impl PendingSaves {
    fn insert(&mut self, session_id: String, snapshot: Arc<CanvasSnapshot>) {
        self.next_generation += 1;
        self.entries.insert(session_id, (self.next_generation, snapshot));
    }

    fn get(&self, session_id: &str) -> Option<Arc<CanvasSnapshot>> {
        self.entries.get(session_id).map(|(_, s)| Arc::clone(s))
    }

    fn batch(&self) -> Vec<(String, u64, Arc<CanvasSnapshot>)> {
        self.entries
            .iter()
            .map(|(id, (generation, s))| (id.clone(), *generation, Arc::clone(s)))
            .collect()
    }

    fn settle(&mut self, session_id: &str, generation: u64) {
        if self.entries.get(session_id).map(|(g, _)| *g) == Some(generation) {
            self.entries.remove(session_id);
        }
    }

    fn discard(&mut self, session_id: &str) {
        self.entries.remove(session_id);
    }
}

type SharedPending = Arc<Mutex<PendingSaves>>;
type SharedFailures = Arc<Mutex<Vec<DeferredFailure>>>;

/// Outcome counters of a worker's lifetime
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerStats {
    pub written: usize,
    pub failed: usize,
}

/// Handle to the background save task
pub struct SaveWorker {
    store: Arc<FileCanvasStore>,
    pending: SharedPending,
    failures: SharedFailures,
    wake: mpsc::UnboundedSender<()>,
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<WorkerStats>,
}

impl SaveWorker {
    /// Spawn the worker on the current tokio runtime
    pub fn spawn(store: Arc<FileCanvasStore>, debounce: Duration) -> Self {
        let pending: SharedPending = Arc::new(Mutex::new(PendingSaves::default()));
        let failures: SharedFailures = Arc::new(Mutex::new(Vec::new()));
        let (wake, wake_rx) = mpsc::unbounded_channel();
        let (shutdown, shutdown_rx) = oneshot::channel();
        let shared = Shared {
            store: Arc::clone(&store),
            pending: Arc::clone(&pending),
            failures: Arc::clone(&failures),
        };
        let task = tokio::spawn(run(shared, wake_rx, shutdown_rx, debounce));
        log::debug!("Save worker started for {:?}", store.root());
        Self {
            store,
            pending,
            failures,
            wake,
            shutdown,
            task,
        }
    }

    /// Engine-side persistence port backed by this worker
    pub fn handle(&self) -> QueuedPersistence {
        QueuedPersistence {
            store: Arc::clone(&self.store),
            pending: Arc::clone(&self.pending),
            failures: Arc::clone(&self.failures),
            wake: self.wake.clone(),
        }
    }

    /// Number of sessions waiting to be written
    pub fn pending_len(&self) -> usize {
        self.pending.lock().entries.len()
    }

    /// Write everything pending and stop
    pub async fn shutdown(self) -> Result<WorkerStats> {
        // The task may already have exited; the join below reports that.
        let _ = self.shutdown.send(());
        self.task.await.map_err(|e| {
            log::error!("Save worker task failed: {}", e);
            StoreError::WorkerStopped
        })
    }
}

/// State the worker task shares with its handles
struct Shared {
    store: Arc<FileCanvasStore>,
    pending: SharedPending,
    failures: SharedFailures,
}

async fn run(
    shared: Shared,
    mut wake: mpsc::UnboundedReceiver<()>,
    mut shutdown: oneshot::Receiver<()>,
    debounce: Duration,
) -> WorkerStats {
    let mut stats = WorkerStats::default();
    let mut dirty = false;

    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            received = tokio::time::timeout(debounce, wake.recv()) => match received {
                Ok(Some(())) => {
                    dirty = true;
                    continue;
                }
                Ok(None) => break,
                Err(_quiet) => {}
            },
        }
        if dirty {
            // Failed entries stay queued; try again after the next quiet period
            dirty = write_pending(&shared, &mut stats).await > 0;
        }
    }

    write_pending(&shared, &mut stats).await;
    let unwritten = shared.pending.lock().entries.len();
    if unwritten > 0 {
        log::error!("Save worker stopped with {} canvas(es) unwritten", unwritten);
    }
    log::debug!(
        "Save worker stopped ({} written, {} failed)",
        stats.written,
        stats.failed
    );
    stats
}

/// Write every queued snapshot. Returns the number of failed writes.
async fn write_pending(shared: &Shared, stats: &mut WorkerStats) -> usize {
    let batch = shared.pending.lock().batch();
    if batch.is_empty() {
        return 0;
    }

    let store = Arc::clone(&shared.store);
    let pending = Arc::clone(&shared.pending);
    let failures = Arc::clone(&shared.failures);
    let result = tokio::task::spawn_blocking(move || {
        let mut outcome = WorkerStats::default();
        for (session_id, generation, snapshot) in batch {
            match store.write(&session_id, &snapshot) {
                Ok(()) => {
                    outcome.written += 1;
                    pending.lock().settle(&session_id, generation);
                }
                Err(e) => {
                    log::warn!("Background save of '{}' failed: {}", session_id, e);
                    outcome.failed += 1;
                    failures.lock().push(DeferredFailure {
                        session_id,
                        error: e.to_string(),
                    });
                }
            }
        }
        outcome
    })
    .await;

    match result {
        Ok(outcome) => {
            stats.written += outcome.written;
            stats.failed += outcome.failed;
            outcome.failed
        }
        Err(e) => {
            log::error!("Background save task panicked: {}", e);
            1
        }
    }
}

/// [`PersistencePort`] that hands saves to a [`SaveWorker`]
#[derive(Clone)]
pub struct QueuedPersistence {
    store: Arc<FileCanvasStore>,
    pending: SharedPending,
    failures: SharedFailures,
    wake: mpsc::UnboundedSender<()>,
}

impl PersistencePort for QueuedPersistence {
    fn load(&self, session_id: &str) -> canvas_engine::Result<Option<CanvasSnapshot>> {
        if let Some(snapshot) = self.pending.lock().get(session_id) {
            return Ok(Some(snapshot.as_ref().clone()));
        }
        Ok(self.store.read(session_id)?)
    }

    fn save(&self, session_id: &str, snapshot: &CanvasSnapshot) -> canvas_engine::Result<()> {
        if session_id.trim().is_empty() {
            return Err(StoreError::EmptySessionId.into());
        }
        if self.wake.is_closed() {
            return Err(CanvasError::persistence(StoreError::WorkerStopped.to_string()));
        }
        self.pending
            .lock()
            .insert(session_id.to_string(), Arc::new(snapshot.clone()));
        self.wake
            .send(())
            .map_err(|_| CanvasError::persistence(StoreError::WorkerStopped.to_string()))
    }

    fn delete(&self, session_id: &str) -> canvas_engine::Result<()> {
        self.pending.lock().discard(session_id);
        self.store.remove(session_id)?;
        Ok(())
    }

    fn drain_failures(&self) -> Vec<DeferredFailure> {
        std::mem::take(&mut *self.failures.lock())
    }
}
