//! Undo/redo history using hybrid raw/compressed snapshots
//!
//! Each entry is a full canvas snapshot. The most recent `raw_keep` entries
//! stay as shared, uncompressed snapshots so stepping through recent history
//! is instant; older entries are compacted through the [`CompressionPort`]
//! once the history has been idle for a while.
//!
//! # Design Choice: Snapshots vs Command Pattern
//!
//! Snapshots need no inverse operation per mutation and work with any
//! change to the graph, including wholesale replacement on load.

use std::collections::VecDeque;
use std::sync::Arc;

use crate::compression::CompressionPort;
use crate::error::Result;
use crate::schedule::Debounce;
use crate::types::CanvasSnapshot;

/// A stored history state
#[derive(Debug, Clone)]
pub enum HistoryEntry {
    Raw(Arc<CanvasSnapshot>),
    Compressed(Arc<[u8]>),
}

impl HistoryEntry {
    pub fn is_raw(&self) -> bool {
        matches!(self, HistoryEntry::Raw(_))
    }
}

#[derive(Debug, Clone)]
struct Slot {
    /// Identity that survives index shifts caused by eviction
    seq: u64,
    entry: HistoryEntry,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Compaction {
    Unchecked,
    Available,
    Disabled,
}

/// Raw entries selected for one compaction pass
///
/// Holds shared references only, so the compression work can run on another
/// thread without borrowing the history.
pub struct CompactionJob {
    pub candidates: Vec<(u64, Arc<CanvasSnapshot>)>,
    compressor: Arc<dyn CompressionPort>,
}

impl CompactionJob {
    /// Compress every candidate. Entries that fail are skipped (they stay raw).
    pub fn compress(&self) -> Vec<(u64, Vec<u8>)> {
        self.candidates
            .iter()
            .filter_map(|(seq, snapshot)| match self.compressor.compress(snapshot) {
                Ok(blob) => Some((*seq, blob)),
                Err(e) => {
                    log::warn!("Failed to compress history entry {}: {}", seq, e);
                    None
                }
            })
            .collect()
    }
}

impl std::fmt::Debug for CompactionJob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompactionJob")
            .field("candidates", &self.candidates.len())
            .finish()
    }
}

/// Tuning for a [`HistoryManager`]
#[derive(Debug, Clone, Copy)]
pub struct HistoryLimits {
    pub max_entries: usize,
    pub raw_keep: usize,
    pub push_debounce_ms: u64,
    pub compaction_idle_ms: u64,
}

/// Bounded, debounced undo/redo stack
pub struct HistoryManager {
    entries: VecDeque<Slot>,
    /// Current position in the stack
    current: usize,
    max_entries: usize,
    raw_keep: usize,
    next_seq: u64,
    compressor: Option<Arc<dyn CompressionPort>>,
    compaction: Compaction,
    compacting: bool,
    push_timer: Debounce,
    compaction_timer: Debounce,
}

impl HistoryManager {
    pub fn new(limits: HistoryLimits, compressor: Option<Arc<dyn CompressionPort>>) -> Self {
        let compaction = if compressor.is_some() {
            Compaction::Unchecked
        } else {
            Compaction::Disabled
        };
        Self {
            entries: VecDeque::new(),
            current: 0,
            max_entries: limits.max_entries.max(1),
            raw_keep: limits.raw_keep.max(1),
            next_seq: 0,
            compressor,
            compaction,
            compacting: false,
            push_timer: Debounce::new(limits.push_debounce_ms),
            compaction_timer: Debounce::new(limits.compaction_idle_ms),
        }
    }

    /// Drop all entries and timers, then record `baseline` as the only state
    pub fn reset(&mut self, baseline: Arc<CanvasSnapshot>) {
        self.entries.clear();
        self.current = 0;
        self.compacting = false;
        self.push_timer.cancel();
        self.compaction_timer.cancel();
        self.append(baseline);
    }

    // =========================================================================
    // Push
    // =========================================================================

    /// Record a snapshot as the newest state
    ///
    /// This truncates any redo history (entries after the current position)
    /// and evicts the oldest entries beyond the cap.
    pub fn push(&mut self, snapshot: Arc<CanvasSnapshot>, now: u64) {
        self.push_timer.cancel();

        if !self.entries.is_empty() {
            self.entries.truncate(self.current + 1);
        }
        self.append(snapshot);

        while self.entries.len() > self.max_entries {
            self.entries.pop_front();
            if self.current > 0 {
                self.current -= 1;
            }
        }

        if self.compaction != Compaction::Disabled && self.has_compaction_candidates() {
            self.compaction_timer.schedule(now);
        }
    }

    fn append(&mut self, snapshot: Arc<CanvasSnapshot>) {
        self.next_seq += 1;
        self.entries.push_back(Slot {
            seq: self.next_seq,
            entry: HistoryEntry::Raw(snapshot),
        });
        self.current = self.entries.len() - 1;
    }

    /// Start (or restart) the debounce window for a push
    pub fn request_push(&mut self, now: u64) {
        self.push_timer.schedule(now);
    }

    pub fn has_pending_push(&self) -> bool {
        self.push_timer.is_pending()
    }

    /// Consume the pending push if its quiet period has elapsed
    pub fn take_due_push(&mut self, now: u64) -> bool {
        self.push_timer.take_due(now)
    }

    /// Consume the pending push immediately (flush)
    pub fn take_pending_push(&mut self) -> bool {
        self.push_timer.take_pending()
    }

    /// Cancel all timers without touching entries
    pub fn cancel_timers(&mut self) {
        self.push_timer.cancel();
        self.compaction_timer.cancel();
        self.compacting = false;
    }

    // =========================================================================
    // Undo / redo
    // =========================================================================

    /// Undo: move back one entry
    ///
    /// Returns `Ok(None)` at the beginning. A decompression failure is
    /// returned as an error and leaves the position unchanged.
    pub fn undo(&mut self) -> Result<Option<Arc<CanvasSnapshot>>> {
        if self.current == 0 {
            return Ok(None);
        }
        let snapshot = self.resolve(self.current - 1)?;
        self.current -= 1;
        Ok(Some(snapshot))
    }

    /// Redo: move forward one entry
    pub fn redo(&mut self) -> Result<Option<Arc<CanvasSnapshot>>> {
        if self.current + 1 >= self.entries.len() {
            return Ok(None);
        }
        let snapshot = self.resolve(self.current + 1)?;
        self.current += 1;
        Ok(Some(snapshot))
    }

    /// Get the current state without moving
    pub fn current(&self) -> Result<Option<Arc<CanvasSnapshot>>> {
        if self.entries.is_empty() {
            return Ok(None);
        }
        self.resolve(self.current).map(Some)
    }

    fn resolve(&self, index: usize) -> Result<Arc<CanvasSnapshot>> {
        match &self.entries[index].entry {
            HistoryEntry::Raw(snapshot) => Ok(Arc::clone(snapshot)),
            HistoryEntry::Compressed(blob) => {
                let compressor = self.compressor.as_ref().ok_or_else(|| {
                    crate::CanvasError::compression("compressed entry without a compression backend")
                })?;
                Ok(Arc::new(compressor.decompress(blob)?))
            }
        }
    }

    pub fn can_undo(&self) -> bool {
        self.current > 0
    }

    pub fn can_redo(&self) -> bool {
        self.current + 1 < self.entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn current_index(&self) -> usize {
        self.current
    }

    pub fn max_entries(&self) -> usize {
        self.max_entries
    }

    pub fn raw_count(&self) -> usize {
        self.entries.iter().filter(|s| s.entry.is_raw()).count()
    }

    pub fn compressed_count(&self) -> usize {
        self.entries.len() - self.raw_count()
    }

    /// Total size of all compressed blobs
    pub fn compressed_size(&self) -> usize {
        self.entries
            .iter()
            .map(|s| match &s.entry {
                HistoryEntry::Compressed(blob) => blob.len(),
                HistoryEntry::Raw(_) => 0,
            })
            .sum()
    }

    // =========================================================================
    // Compaction
    // =========================================================================

    /// Position from which entries must stay raw
    fn raw_window_start(&self) -> usize {
        self.entries.len().saturating_sub(self.raw_keep)
    }

    fn has_compaction_candidates(&self) -> bool {
        self.entries
            .iter()
            .take(self.raw_window_start())
            .any(|s| s.entry.is_raw())
    }

    pub fn compaction_enabled(&self) -> bool {
        self.compaction != Compaction::Disabled
    }

    pub fn is_compacting(&self) -> bool {
        self.compacting
    }

    /// Consume the compaction timer if the history has been idle long enough
    pub fn take_due_compaction(&mut self, now: u64) -> bool {
        self.compaction_timer.take_due(now)
    }

    /// Start a compaction pass.
    ///
    /// Returns `None` while another pass is in progress, when compaction is
    /// disabled, or when there is nothing to compact. The backend is checked
    /// on first use; an unavailable backend disables compaction permanently.
    pub fn begin_compaction(&mut self) -> Option<CompactionJob> {
        if self.compacting {
            return None;
        }
        if self.compaction == Compaction::Unchecked {
            let available = self.compressor.as_ref().is_some_and(|c| c.is_available());
            if available {
                self.compaction = Compaction::Available;
            } else {
                log::info!("History compression unavailable; keeping all entries raw");
                self.compaction = Compaction::Disabled;
            }
        }
        if self.compaction == Compaction::Disabled {
            return None;
        }
        let compressor = Arc::clone(self.compressor.as_ref()?);

        let candidates: Vec<(u64, Arc<CanvasSnapshot>)> = self
            .entries
            .iter()
            .take(self.raw_window_start())
            .filter_map(|s| match &s.entry {
                HistoryEntry::Raw(snapshot) => Some((s.seq, Arc::clone(snapshot))),
                HistoryEntry::Compressed(_) => None,
            })
            .collect();
        if candidates.is_empty() {
            return None;
        }
        self.compacting = true;
        Some(CompactionJob { candidates, compressor })
    }

    /// Write compressed blobs back and end the pass.
    ///
    /// Blobs for entries that were evicted, truncated, or moved back into the
    /// raw window since the pass began are discarded. Returns the number of
    /// entries compacted.
    pub fn finish_compaction(&mut self, blobs: Vec<(u64, Vec<u8>)>) -> usize {
        self.compacting = false;
        let window = self.raw_window_start();
        let mut applied = 0;
        for (seq, blob) in blobs {
            let Some(index) = self.entries.iter().position(|s| s.seq == seq) else {
                continue;
            };
            if index >= window || !self.entries[index].entry.is_raw() {
                continue;
            }
            self.entries[index].entry = HistoryEntry::Compressed(blob.into());
            applied += 1;
        }
        applied
    }

    /// Run a whole compaction pass inline
    pub fn compact_now(&mut self) -> usize {
        let Some(job) = self.begin_compaction() else {
            return 0;
        };
        let blobs = job.compress();
        let applied = self.finish_compaction(blobs);
        log::debug!(
            "Compacted {} history entries ({} bytes compressed total)",
            applied,
            self.compressed_size()
        );
        applied
    }
}
