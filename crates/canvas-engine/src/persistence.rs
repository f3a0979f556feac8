//! Persistence port and the debounced save gateway
//!
//! The engine treats in-memory state as the source of truth. Saves are
//! debounced, sanitized (see [`crate::sanitize`]) and handed to the primary
//! backend; on failure the optional fallback backend is tried. A failed
//! save never touches the live session.
//!
//! Backends that queue writes (and so accept a save before it reaches
//! storage) report late failures through [`PersistencePort::drain_failures`];
//! the engine polls them on every tick.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::{CanvasError, Result};
use crate::sanitize::{sanitize_for_persistence, DetachedPayload};
use crate::schedule::Debounce;
use crate::types::CanvasSnapshot;

/// Storage backend contract
///
/// Implementations must use write-replace semantics: an interrupted save
/// leaves the previously stored document intact.
pub trait PersistencePort: Send + Sync {
    /// Load the stored snapshot; `Ok(None)` if nothing is stored
    fn load(&self, session_id: &str) -> Result<Option<CanvasSnapshot>>;

    /// Replace the stored snapshot
    fn save(&self, session_id: &str, snapshot: &CanvasSnapshot) -> Result<()>;

    /// Remove the stored snapshot, if any
    fn delete(&self, session_id: &str) -> Result<()>;

    /// Failures of saves that were accepted earlier and written later.
    ///
    /// Backends that write synchronously report errors from `save` and keep
    /// this default.
    fn drain_failures(&self) -> Vec<DeferredFailure> {
        Vec::new()
    }
}

/// A queued save that failed after `save` had returned `Ok`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeferredFailure {
    pub session_id: String,
    pub error: String,
}

/// In-memory backend, storing serialized documents
///
/// Useful for tests and for hosts that persist elsewhere.
#[derive(Default)]
pub struct MemoryPersistence {
    documents: Mutex<HashMap<String, Vec<u8>>>,
    failing: AtomicBool,
    saves: AtomicUsize,
}

impl MemoryPersistence {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent saves fail (simulates an unavailable backend)
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Number of successful saves
    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    /// Raw stored document
    pub fn document(&self, session_id: &str) -> Option<Vec<u8>> {
        self.documents.lock().get(session_id).cloned()
    }

    /// Seed a stored document
    pub fn insert(&self, session_id: &str, snapshot: &CanvasSnapshot) -> Result<()> {
        let bytes = snapshot.to_json_vec()?;
        self.documents.lock().insert(session_id.to_string(), bytes);
        Ok(())
    }
}

impl PersistencePort for MemoryPersistence {
    fn load(&self, session_id: &str) -> Result<Option<CanvasSnapshot>> {
        match self.documents.lock().get(session_id) {
            Some(bytes) => CanvasSnapshot::from_json_slice(bytes).map(Some),
            None => Ok(None),
        }
    }

    fn save(&self, session_id: &str, snapshot: &CanvasSnapshot) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(CanvasError::persistence("memory backend unavailable"));
        }
        let bytes = snapshot.to_json_vec()?;
        self.documents.lock().insert(session_id.to_string(), bytes);
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn delete(&self, session_id: &str) -> Result<()> {
        self.documents.lock().remove(session_id);
        Ok(())
    }
}

/// Counters describing save outcomes for the active session
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SaveStatus {
    /// Saves accepted by a backend (primary or fallback)
    pub saves: u64,
    /// Saves that only the fallback accepted
    pub fallback_saves: u64,
    /// Saves rejected by every backend, plus queued saves that failed later
    pub failures: u64,
    pub last_error: Option<String>,
}

/// Debounced, sanitizing front of the persistence backends
pub struct SaveGateway {
    primary: Arc<dyn PersistencePort>,
    fallback: Option<Arc<dyn PersistencePort>>,
    timer: Debounce,
    payload_limit: usize,
    status: SaveStatus,
    /// References already reported to the host for this session
    announced: HashSet<String>,
}

impl SaveGateway {
    pub fn new(
        primary: Arc<dyn PersistencePort>,
        fallback: Option<Arc<dyn PersistencePort>>,
        debounce_ms: u64,
        payload_limit: usize,
    ) -> Self {
        Self {
            primary,
            fallback,
            timer: Debounce::new(debounce_ms),
            payload_limit,
            status: SaveStatus::default(),
            announced: HashSet::new(),
        }
    }

    /// Start (or restart) the save debounce window
    pub fn request_save(&mut self, now: u64) {
        self.timer.schedule(now);
    }

    pub fn is_pending(&self) -> bool {
        self.timer.is_pending()
    }

    pub fn take_due(&mut self, now: u64) -> bool {
        self.timer.take_due(now)
    }

    pub fn take_pending(&mut self) -> bool {
        self.timer.take_pending()
    }

    pub fn cancel(&mut self) {
        self.timer.cancel();
    }

    pub fn status(&self) -> &SaveStatus {
        &self.status
    }

    /// Forget counters and announced references (session switch)
    pub fn reset_status(&mut self) {
        self.status = SaveStatus::default();
        self.announced.clear();
    }

    pub fn has_fallback(&self) -> bool {
        self.fallback.is_some()
    }

    /// Load from the primary backend, falling back when it has nothing or fails
    pub fn load(&self, session_id: &str) -> Result<Option<CanvasSnapshot>> {
        let primary = self.primary.load(session_id);
        let Some(fallback) = &self.fallback else {
            return primary;
        };
        match primary {
            Ok(Some(snapshot)) => Ok(Some(snapshot)),
            Ok(None) => fallback.load(session_id),
            Err(e) => {
                log::warn!("Primary load of '{}' failed, trying fallback: {}", session_id, e);
                fallback.load(session_id)
            }
        }
    }

    /// Sanitize and write `snapshot`.
    ///
    /// On success returns the payloads detached for the first time in this
    /// session, so the host can file them under their references. Returns
    /// the error only if every backend failed.
    pub fn save(
        &mut self,
        session_id: &str,
        snapshot: &CanvasSnapshot,
    ) -> std::result::Result<Vec<DetachedPayload>, String> {
        let (clean, detached) = sanitize_for_persistence(snapshot, self.payload_limit);
        if !detached.is_empty() {
            log::debug!(
                "Stripped {} inline payload field(s) before saving '{}'",
                detached.len(),
                session_id
            );
        }

        let primary_err = match self.primary.save(session_id, &clean) {
            Ok(()) => {
                self.status.saves += 1;
                return Ok(self.announce(detached));
            }
            Err(e) => e.to_string(),
        };
        log::warn!("Saving '{}' failed: {}", session_id, primary_err);

        let error = match self.save_to_fallback(session_id, &clean) {
            Some(Ok(())) => return Ok(self.announce(detached)),
            Some(Err(e)) => format!("{}; fallback: {}", primary_err, e),
            None => primary_err,
        };
        self.record_failure(session_id, error.clone());
        Err(error)
    }

    fn save_to_fallback(&mut self, session_id: &str, clean: &CanvasSnapshot) -> Option<Result<()>> {
        let fallback = self.fallback.as_ref()?;
        let result = fallback.save(session_id, clean);
        if result.is_ok() {
            self.status.saves += 1;
            self.status.fallback_saves += 1;
            log::info!("Saved '{}' to fallback backend", session_id);
        }
        Some(result)
    }

    fn record_failure(&mut self, session_id: &str, error: String) {
        log::error!("Canvas '{}' was not persisted: {}", session_id, error);
        self.status.failures += 1;
        self.status.last_error = Some(error);
    }

    fn announce(&mut self, detached: Vec<DetachedPayload>) -> Vec<DetachedPayload> {
        detached
            .into_iter()
            .filter(|d| self.announced.insert(d.reference.clone()))
            .collect()
    }

    /// Collect late failures the primary backend reported for `session_id`.
    ///
    /// Each one counts as a failure; failures for other sessions are only
    /// logged. Returns the errors recorded for `session_id`.
    pub fn collect_deferred_failures(&mut self, session_id: &str) -> Vec<String> {
        let mut errors = Vec::new();
        for failure in self.primary.drain_failures() {
            if failure.session_id != session_id {
                log::warn!(
                    "Queued save of inactive canvas '{}' failed: {}",
                    failure.session_id,
                    failure.error
                );
                continue;
            }
            self.record_failure(session_id, failure.error.clone());
            errors.push(failure.error);
        }
        errors
    }

    /// Write `snapshot` to the fallback backend only. Returns whether it was
    /// stored; `false` without a fallback.
    pub fn save_fallback(&mut self, session_id: &str, snapshot: &CanvasSnapshot) -> bool {
        let (clean, _) = sanitize_for_persistence(snapshot, self.payload_limit);
        match self.save_to_fallback(session_id, &clean) {
            Some(Ok(())) => true,
            Some(Err(e)) => {
                log::error!("Fallback save of '{}' failed: {}", session_id, e);
                false
            }
            None => false,
        }
    }

    pub fn delete(&self, session_id: &str) -> Result<()> {
        self.primary.delete(session_id)?;
        if let Some(fallback) = &self.fallback {
            fallback.delete(session_id)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_backend_replaces_document() {
        let backend = MemoryPersistence::new();
        assert!(backend.load("s").unwrap().is_none());
        backend.save("s", &CanvasSnapshot::default()).unwrap();
        assert_eq!(backend.load("s").unwrap(), Some(CanvasSnapshot::default()));
        backend.delete("s").unwrap();
        assert!(backend.load("s").unwrap().is_none());
    }

    #[test]
    fn test_failed_save_keeps_previous_document() {
        let backend = MemoryPersistence::new();
        backend.save("s", &CanvasSnapshot::default()).unwrap();
        let before = backend.document("s");
        backend.set_failing(true);
        assert!(backend.save("s", &CanvasSnapshot::default()).is_err());
        assert_eq!(backend.document("s"), before);
    }

    #[test]
    fn test_gateway_falls_back_on_failure() {
        let primary = Arc::new(MemoryPersistence::new());
        let fallback = Arc::new(MemoryPersistence::new());
        primary.set_failing(true);
        let mut gateway = SaveGateway::new(primary.clone(), Some(fallback.clone()), 100, 1024);

        assert!(gateway.save("s", &CanvasSnapshot::default()).is_ok());
        assert_eq!(fallback.save_count(), 1);
        assert_eq!(gateway.status().fallback_saves, 1);
        assert_eq!(gateway.load("s").unwrap(), Some(CanvasSnapshot::default()));
    }

    #[test]
    fn test_gateway_records_total_failure() {
        let primary = Arc::new(MemoryPersistence::new());
        primary.set_failing(true);
        let mut gateway = SaveGateway::new(primary, None, 100, 1024);
        assert!(gateway.save("s", &CanvasSnapshot::default()).is_err());
        assert_eq!(gateway.status().failures, 1);
        assert!(gateway.status().last_error.is_some());
    }

    #[test]
    fn test_gateway_debounce() {
        let mut gateway = SaveGateway::new(Arc::new(MemoryPersistence::new()), None, 100, 1024);
        gateway.request_save(0);
        gateway.request_save(50);
        assert!(!gateway.take_due(120));
        assert!(gateway.take_due(150));
    }

    /// Backend that accepts every save and reports it failed later
    #[derive(Default)]
    struct LateFailing {
        failures: Mutex<Vec<DeferredFailure>>,
    }

    impl PersistencePort for LateFailing {
        fn load(&self, _: &str) -> Result<Option<CanvasSnapshot>> {
            Ok(None)
        }
        fn save(&self, session_id: &str, _: &CanvasSnapshot) -> Result<()> {
            self.failures.lock().push(DeferredFailure {
                session_id: session_id.to_string(),
                error: "disk full".to_string(),
            });
            Ok(())
        }
        fn delete(&self, _: &str) -> Result<()> {
            Ok(())
        }
        fn drain_failures(&self) -> Vec<DeferredFailure> {
            std::mem::take(&mut *self.failures.lock())
        }
    }

    #[test]
    fn test_deferred_failures_are_recorded() {
        let fallback = Arc::new(MemoryPersistence::new());
        let mut gateway = SaveGateway::new(Arc::new(LateFailing::default()), Some(fallback.clone()), 100, 1024);
        let snapshot = CanvasSnapshot::default();

        assert!(gateway.save("s", &snapshot).is_ok());
        gateway.save("other", &snapshot).unwrap();
        assert_eq!(gateway.status().failures, 0);

        let errors = gateway.collect_deferred_failures("s");
        assert_eq!(errors, vec!["disk full".to_string()]);
        assert_eq!(gateway.status().failures, 1);
        assert_eq!(gateway.status().last_error.as_deref(), Some("disk full"));
        assert!(gateway.collect_deferred_failures("s").is_empty());

        assert!(gateway.save_fallback("s", &snapshot));
        assert_eq!(fallback.save_count(), 1);
        assert_eq!(gateway.status().fallback_saves, 1);
    }

    #[test]
    fn test_detached_payloads_are_announced_once() {
        use crate::types::{CanvasNode, NodeData, Viewport};

        let mut map = crate::types::DataMap::new();
        map.insert("url".into(), "data:image/png;base64,AAAA".into());
        let node = CanvasNode {
            id: "n1".to_string(),
            kind: "image".to_string(),
            position: Default::default(),
            z_index: 1,
            data: NodeData::from_map("image", map),
        };
        let snapshot = CanvasSnapshot::new(vec![node], Vec::new(), Viewport::default());
        let mut gateway = SaveGateway::new(Arc::new(MemoryPersistence::new()), None, 100, 1024);

        let first = gateway.save("s", &snapshot).unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].field, "url");
        assert!(gateway.save("s", &snapshot).unwrap().is_empty());

        gateway.reset_status();
        assert_eq!(gateway.save("s", &snapshot).unwrap().len(), 1);
    }
}
