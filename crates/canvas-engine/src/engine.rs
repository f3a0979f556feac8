//! The canvas engine: authoritative state of one editing session
//!
//! `CanvasEngine` owns nodes, edges, viewport and selection and exposes every
//! mutation. It coordinates the history manager, the spatial index and the
//! save gateway:
//!
//! - Mutations update the arrays, queue a deferred spatial-index update and
//!   (outside batches and restores) restart the history and save debounce
//!   timers.
//! - Undo/redo replace the whole state from a history snapshot and rebuild
//!   the spatial index synchronously.
//! - Debounced work runs when the owner calls [`CanvasEngine::tick`].
//!
//! The engine is single-writer. Hosts that need a background loop share it
//! as `Arc<parking_lot::Mutex<CanvasEngine>>`.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::config::EngineConfig;
use crate::edges::{resolve_constraints, resolve_image_role, resolve_ordinal};
use crate::error::Result;
use crate::events::{emit, EngineEvent, EventSink};
use crate::history::{CompactionJob, HistoryManager};
use crate::ids::IdGenerator;
use crate::persistence::{SaveGateway, SaveStatus};
use crate::schedule::Clock;
use crate::spatial::{Rect, SpatialIndex};
use crate::types::{
    CanvasEdge, CanvasNode, CanvasSnapshot, DataMap, EdgeId, EdgeSpec, EdgeType, NodeData, NodeId, NodePatch,
    Position, Selection, Viewport,
};
use crate::upstream::{collect_upstream_inputs, UpstreamInputs};
use crate::validation::{repair_snapshot, validate_snapshot, RepairReport};

const NODE_ID_PREFIX: &str = "node";
const EDGE_ID_PREFIX: &str = "edge";

/// Work performed by one [`CanvasEngine::tick`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickOutcome {
    pub history_pushed: bool,
    pub saved: bool,
    /// History entries compacted
    pub compacted: usize,
    /// Nodes re-indexed from the pending queue
    pub reindexed: usize,
    /// Queued saves the backend reported as failed
    pub save_failures: usize,
}

impl TickOutcome {
    pub fn is_idle(&self) -> bool {
        *self == TickOutcome::default()
    }
}

/// Which ordinal field an explicit setter targets
#[derive(Clone, Copy)]
enum OrdinalKind {
    Prompt,
    Image,
}

impl OrdinalKind {
    fn edge_type(self) -> EdgeType {
        match self {
            OrdinalKind::Prompt => EdgeType::PromptOrder,
            OrdinalKind::Image => EdgeType::ImageOrder,
        }
    }
}

/// Versioned graph state of one canvas session
///
/// Built with [`crate::CanvasEngineBuilder`].
pub struct CanvasEngine {
    session_id: String,
    config: EngineConfig,

    nodes: Vec<CanvasNode>,
    edges: Vec<CanvasEdge>,
    node_index: HashMap<NodeId, usize>,
    edge_index: HashMap<EdgeId, usize>,
    viewport: Viewport,
    selection: Option<Selection>,

    spatial: SpatialIndex,
    /// Nodes whose index entry is stale
    pending_index: HashSet<NodeId>,

    history: HistoryManager,
    saves: SaveGateway,
    events: Arc<dyn EventSink>,
    clock: Arc<dyn Clock>,
    ids: IdGenerator,

    batch_depth: usize,
    batch_history: bool,
    batch_save: bool,
    /// Set while a history snapshot is being applied
    restoring: bool,
}

impl CanvasEngine {
    pub(crate) fn from_parts(
        session_id: String,
        config: EngineConfig,
        history: HistoryManager,
        saves: SaveGateway,
        events: Arc<dyn EventSink>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let spatial = SpatialIndex::new(config.grid_cell_size);
        let mut engine = Self {
            session_id,
            config,
            nodes: Vec::new(),
            edges: Vec::new(),
            node_index: HashMap::new(),
            edge_index: HashMap::new(),
            viewport: Viewport::default(),
            selection: None,
            spatial,
            pending_index: HashSet::new(),
            history,
            saves,
            events,
            clock,
            ids: IdGenerator::new(),
            batch_depth: 0,
            batch_history: false,
            batch_save: false,
            restoring: false,
        };
        let baseline = engine.snapshot();
        engine.history.reset(baseline);
        engine
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    // =========================================================================
    // Change tracking
    // =========================================================================

    /// Record that state changed; `historize` is false for drag moves
    fn mark_changed(&mut self, historize: bool) {
        if self.restoring {
            return;
        }
        if self.batch_depth > 0 {
            self.batch_history |= historize;
            self.batch_save = true;
            return;
        }
        let now = self.clock.now_ms();
        if historize {
            self.history.request_push(now);
        }
        self.saves.request_save(now);
    }

    fn queue_reindex(&mut self, id: &str) {
        self.pending_index.insert(id.to_string());
    }

    fn rebuild_lookups(&mut self) {
        self.node_index = self
            .nodes
            .iter()
            .enumerate()
            .map(|(i, n)| (n.id.clone(), i))
            .collect();
        self.edge_index = self
            .edges
            .iter()
            .enumerate()
            .map(|(i, e)| (e.id.clone(), i))
            .collect();
    }

    fn next_node_id(&mut self) -> NodeId {
        let taken = &self.node_index;
        self.ids.next_unused(NODE_ID_PREFIX, |id| taken.contains_key(id))
    }

    fn next_edge_id(&mut self) -> EdgeId {
        let taken = &self.edge_index;
        self.ids.next_unused(EDGE_ID_PREFIX, |id| taken.contains_key(id))
    }

    /// Drop a selection that points at something no longer present
    fn prune_selection(&mut self) {
        let stale = match &self.selection {
            Some(Selection::Node(id)) => !self.node_index.contains_key(id),
            Some(Selection::Edge(id)) => !self.edge_index.contains_key(id),
            None => false,
        };
        if stale {
            self.selection = None;
        }
    }

    // =========================================================================
    // Nodes
    // =========================================================================

    /// Add a node and return its id
    pub fn add_node(&mut self, kind: impl Into<String>, position: Position, data: DataMap) -> NodeId {
        let kind = kind.into();
        let id = self.next_node_id();
        let node = CanvasNode {
            id: id.clone(),
            data: NodeData::from_map(&kind, data),
            kind,
            position,
            z_index: self.nodes.len() as i64 + 1,
        };
        self.node_index.insert(id.clone(), self.nodes.len());
        self.nodes.push(node);
        self.queue_reindex(&id);
        self.mark_changed(true);
        id
    }

    /// Copy a node's kind and data to a new node offset from the original
    pub fn duplicate_node(&mut self, id: &str) -> Option<NodeId> {
        let source = self.node(id)?;
        let kind = source.kind.clone();
        let data = source.data.clone();
        let position = source.position.offset(self.config.duplicate_offset);

        let new_id = self.next_node_id();
        let node = CanvasNode {
            id: new_id.clone(),
            kind,
            position,
            z_index: self.nodes.len() as i64 + 1,
            data,
        };
        self.node_index.insert(new_id.clone(), self.nodes.len());
        self.nodes.push(node);
        self.queue_reindex(&new_id);
        self.mark_changed(true);
        log::debug!("Duplicated node '{}' as '{}'", id, new_id);
        Some(new_id)
    }

    /// Apply a partial update. Returns false if the node is unknown.
    ///
    /// Position-only patches are not historized; call
    /// [`commit_node_position`](Self::commit_node_position) when the drag ends.
    pub fn update_node(&mut self, id: &str, patch: NodePatch) -> bool {
        let Some(&index) = self.node_index.get(id) else {
            return false;
        };
        if patch == NodePatch::default() {
            return true;
        }
        let historize = !patch.is_position_only();
        let node = &mut self.nodes[index];
        let mut moved = false;

        if let Some(x) = patch.x {
            moved |= node.position.x != x;
            node.position.x = x;
        }
        if let Some(y) = patch.y {
            moved |= node.position.y != y;
            node.position.y = y;
        }
        if let Some(z_index) = patch.z_index {
            node.z_index = z_index;
        }
        let kind_changed = patch.kind.as_ref().is_some_and(|k| *k != node.kind);
        if let Some(kind) = patch.kind {
            node.kind = kind;
        }
        match patch.data {
            Some(data) => node.data = node.data.merged(&node.kind, data),
            None if kind_changed => node.data = NodeData::from_map(&node.kind, node.data.to_map()),
            None => {}
        }

        if moved || kind_changed {
            self.queue_reindex(id);
        }
        self.mark_changed(historize);
        true
    }

    /// Close a drag gesture: schedule one history entry for it
    pub fn commit_node_position(&mut self, id: &str) -> bool {
        if !self.node_index.contains_key(id) {
            return false;
        }
        self.mark_changed(true);
        true
    }

    /// Remove a node and every edge touching it; no-op if unknown
    pub fn remove_node(&mut self, id: &str) -> bool {
        self.remove_nodes([id]) > 0
    }

    /// Remove several nodes and their edges. Returns the number removed.
    pub fn remove_nodes<I, S>(&mut self, ids: I) -> usize
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut removed: Vec<NodeId> = Vec::new();
        let mut doomed: HashSet<NodeId> = HashSet::new();
        for id in ids {
            let id = id.as_ref();
            if self.node_index.contains_key(id) && doomed.insert(id.to_string()) {
                removed.push(id.to_string());
            }
        }
        if removed.is_empty() {
            return 0;
        }

        self.nodes.retain(|n| !doomed.contains(&n.id));
        let edges_before = self.edges.len();
        self.edges
            .retain(|e| !doomed.contains(&e.source) && !doomed.contains(&e.target));
        let cascaded = edges_before - self.edges.len();
        self.rebuild_lookups();

        for id in &removed {
            self.spatial.remove(id);
            self.pending_index.remove(id);
        }
        self.prune_selection();

        for id in &removed {
            emit(
                self.events.as_ref(),
                EngineEvent::NodeRemoved {
                    session_id: self.session_id.clone(),
                    node_id: id.clone(),
                },
            );
        }
        log::debug!("Removed {} node(s) and {} edge(s)", removed.len(), cascaded);
        self.mark_changed(true);
        removed.len()
    }

    // =========================================================================
    // Edges
    // =========================================================================

    /// Connect two nodes.
    ///
    /// Returns `None` for unknown endpoints and self-loops. An identical
    /// connection (same endpoints and handles) returns the existing id.
    pub fn add_edge(&mut self, source: &str, target: &str, spec: EdgeSpec) -> Option<EdgeId> {
        if source == target {
            log::debug!("Rejected self-loop on '{}'", source);
            return None;
        }
        let source_kind = self.node(source)?.kind.clone();
        let target_kind = self.node(target)?.kind.clone();

        if let Some(existing) = self.edges.iter().find(|e| {
            e.source == source
                && e.target == target
                && e.source_handle == spec.source_handle
                && e.target_handle == spec.target_handle
        }) {
            return Some(existing.id.clone());
        }

        let edge_type = self.config.edge_rules.classify(
            spec.edge_type.as_ref(),
            &spec.data,
            &source_kind,
            &target_kind,
        );
        let id = self.next_edge_id();
        let mut edge = CanvasEdge {
            id: id.clone(),
            source: source.to_string(),
            target: target.to_string(),
            source_handle: spec.source_handle,
            target_handle: spec.target_handle,
            edge_type,
            data: spec.data,
        };
        if edge.ordinal() == Some(0) {
            edge.set_ordinal(None);
        }
        if edge.data.image_role.as_deref().is_some_and(|r| r.trim().is_empty()) {
            edge.data.image_role = None;
        }

        self.edge_index.insert(id.clone(), self.edges.len());
        self.edges.push(edge);
        resolve_constraints(&self.config.edge_rules, &mut self.edges, &id, None);
        self.mark_changed(true);
        Some(id)
    }

    /// Give an edge an image role, displacing any holder of an exclusive role
    pub fn set_edge_image_role(&mut self, id: &str, role: impl Into<String>) -> bool {
        let Some(&index) = self.edge_index.get(id) else {
            return false;
        };
        let role = role.into();
        let edge = &mut self.edges[index];
        edge.edge_type = EdgeType::ImageRole;
        edge.data.image_role = Some(role).filter(|r| !r.trim().is_empty());
        resolve_image_role(&self.config.edge_rules, &mut self.edges, id);
        self.mark_changed(true);
        true
    }

    /// Give an edge a prompt ordinal, swapping with any holder. `0` is ignored.
    pub fn set_edge_prompt_order(&mut self, id: &str, order: u32) -> bool {
        self.set_edge_ordinal(id, order, OrdinalKind::Prompt)
    }

    /// Give an edge an image ordinal, swapping with any holder. `0` is ignored.
    pub fn set_edge_image_order(&mut self, id: &str, order: u32) -> bool {
        self.set_edge_ordinal(id, order, OrdinalKind::Image)
    }

    fn set_edge_ordinal(&mut self, id: &str, order: u32, kind: OrdinalKind) -> bool {
        if order == 0 {
            return false;
        }
        let Some(&index) = self.edge_index.get(id) else {
            return false;
        };
        let edge = &mut self.edges[index];
        let edge_type = kind.edge_type();
        let previous = if edge.edge_type == edge_type {
            edge.ordinal()
        } else {
            None
        };
        if previous == Some(order) {
            return true;
        }
        edge.edge_type = edge_type;
        edge.set_ordinal(Some(order));
        resolve_ordinal(&mut self.edges, id, previous);
        self.mark_changed(true);
        true
    }

    /// Remove an edge; no-op if unknown
    pub fn remove_edge(&mut self, id: &str) -> bool {
        let Some(&index) = self.edge_index.get(id) else {
            return false;
        };
        self.edges.remove(index);
        self.rebuild_lookups();
        self.prune_selection();
        self.mark_changed(true);
        true
    }

    // =========================================================================
    // Batching & history
    // =========================================================================

    /// Run `f` as one logical change.
    ///
    /// History and save requests made inside are coalesced: when the
    /// outermost batch returns, one history entry is pushed immediately and
    /// one save is scheduled. Nested batches fold into the outermost one.
    pub fn with_batch_updates<R>(&mut self, f: impl FnOnce(&mut Self) -> R) -> R {
        self.batch_depth += 1;
        let result = f(self);
        self.batch_depth -= 1;

        if self.batch_depth == 0 {
            let historize = std::mem::take(&mut self.batch_history);
            let save = std::mem::take(&mut self.batch_save);
            let now = self.clock.now_ms();
            if historize {
                let snapshot = self.snapshot();
                self.history.push(snapshot, now);
            }
            if save {
                self.saves.request_save(now);
            }
        }
        result
    }

    pub fn is_batching(&self) -> bool {
        self.batch_depth > 0
    }

    /// Step back one history entry. Returns whether state changed.
    pub fn undo(&mut self) -> bool {
        self.flush_history();
        match self.history.undo() {
            Ok(Some(snapshot)) => {
                self.restore(&snapshot);
                true
            }
            Ok(None) => false,
            Err(e) => {
                log::warn!("Undo aborted: {}", e);
                false
            }
        }
    }

    /// Step forward one history entry. Returns whether state changed.
    pub fn redo(&mut self) -> bool {
        self.flush_history();
        match self.history.redo() {
            Ok(Some(snapshot)) => {
                self.restore(&snapshot);
                true
            }
            Ok(None) => false,
            Err(e) => {
                log::warn!("Redo aborted: {}", e);
                false
            }
        }
    }

    /// Replace the whole state from a history snapshot
    fn restore(&mut self, snapshot: &CanvasSnapshot) {
        self.restoring = true;
        self.replace_state(snapshot);
        self.restoring = false;
        self.saves.request_save(self.clock.now_ms());
    }

    fn replace_state(&mut self, snapshot: &CanvasSnapshot) {
        self.nodes = snapshot.nodes.clone();
        self.edges = snapshot.edges.clone();
        self.viewport = snapshot.viewport;
        self.selection = None;
        self.rebuild_lookups();
        self.rebuild_spatial_index();
    }

    pub fn can_undo(&self) -> bool {
        self.history.can_undo()
    }

    pub fn can_redo(&self) -> bool {
        self.history.can_redo()
    }

    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    pub fn history(&self) -> &HistoryManager {
        &self.history
    }

    // =========================================================================
    // Viewport & selection
    // =========================================================================

    /// Pan/zoom; never historized or saved on its own
    pub fn set_viewport(&mut self, viewport: Viewport) {
        self.viewport = viewport;
    }

    pub fn select_node(&mut self, id: &str) -> bool {
        if !self.node_index.contains_key(id) {
            return false;
        }
        self.selection = Some(Selection::Node(id.to_string()));
        true
    }

    pub fn select_edge(&mut self, id: &str) -> bool {
        if !self.edge_index.contains_key(id) {
            return false;
        }
        self.selection = Some(Selection::Edge(id.to_string()));
        true
    }

    pub fn clear_selection(&mut self) {
        self.selection = None;
    }

    pub fn selection(&self) -> Option<&Selection> {
        self.selection.as_ref()
    }

    // =========================================================================
    // Queries
    // =========================================================================

    pub fn node(&self, id: &str) -> Option<&CanvasNode> {
        self.node_index.get(id).map(|&i| &self.nodes[i])
    }

    pub fn edge(&self, id: &str) -> Option<&CanvasEdge> {
        self.edge_index.get(id).map(|&i| &self.edges[i])
    }

    pub fn nodes(&self) -> &[CanvasNode] {
        &self.nodes
    }

    pub fn edges(&self) -> &[CanvasEdge] {
        &self.edges
    }

    pub fn viewport(&self) -> Viewport {
        self.viewport
    }

    /// Immutable copy of the current state
    pub fn snapshot(&self) -> Arc<CanvasSnapshot> {
        Arc::new(CanvasSnapshot::new(
            self.nodes.clone(),
            self.edges.clone(),
            self.viewport,
        ))
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    /// Edges whose target is `node_id`
    pub fn incoming_edges(&self, node_id: &str) -> Vec<&CanvasEdge> {
        self.edges.iter().filter(|e| e.target == node_id).collect()
    }

    /// Ids of nodes whose indexed box intersects `region`.
    ///
    /// Reads the index as of the last drain; edits still queued are not
    /// reflected until `tick` or `flush_spatial_index`.
    pub fn query_region(&self, region: &Rect) -> Vec<NodeId> {
        self.spatial.query(region)
    }

    /// Topmost node (highest zIndex, then latest added) containing the point
    pub fn hit_test(&self, x: f64, y: f64) -> Option<NodeId> {
        self.spatial
            .query_point(x, y)
            .into_iter()
            .filter_map(|id| self.node_index.get(&id).map(|&i| (i, id)))
            .max_by_key(|(i, _)| (self.nodes[*i].z_index, *i))
            .map(|(_, id)| id)
    }

    /// Text and image sources feeding the generation configs `focus_id` feeds
    pub fn upstream_inputs(&self, focus_id: &str) -> UpstreamInputs {
        collect_upstream_inputs(focus_id, &self.nodes, &self.edges)
    }

    pub fn spatial_index(&self) -> &SpatialIndex {
        &self.spatial
    }

    pub fn pending_index_len(&self) -> usize {
        self.pending_index.len()
    }

    pub fn save_status(&self) -> &SaveStatus {
        self.saves.status()
    }

    // =========================================================================
    // Session lifecycle
    // =========================================================================

    /// Switch to `session_id`, loading it through the persistence port.
    ///
    /// The current session's pending save is written first. On a load error
    /// the current session stays active.
    pub fn load_session(&mut self, session_id: impl Into<String>) -> Result<RepairReport> {
        let session_id = session_id.into();
        self.flush_save();

        let loaded = self.saves.load(&session_id)?;
        let found = loaded.is_some();
        let (snapshot, report) = repair_snapshot(loaded.unwrap_or_default(), &self.config.edge_rules);
        for issue in validate_snapshot(&snapshot, &self.config.edge_rules) {
            log::warn!("Canvas '{}': {}", session_id, issue);
        }

        self.history.cancel_timers();
        self.saves.cancel();
        self.saves.reset_status();
        self.pending_index.clear();
        self.batch_history = false;
        self.batch_save = false;
        self.session_id = session_id;

        let snapshot = Arc::new(snapshot);
        self.restoring = true;
        self.replace_state(&snapshot);
        self.restoring = false;
        self.history.reset(Arc::clone(&snapshot));

        log::info!(
            "Loaded canvas '{}' ({} nodes, {} edges{})",
            self.session_id,
            self.nodes.len(),
            self.edges.len(),
            if found { "" } else { ", new" }
        );
        emit(
            self.events.as_ref(),
            EngineEvent::SessionLoaded {
                session_id: self.session_id.clone(),
                node_count: self.nodes.len(),
                edge_count: self.edges.len(),
            },
        );
        Ok(report)
    }

    /// Remove everything as one undoable change
    pub fn clear_session(&mut self) {
        let ids: Vec<NodeId> = self.nodes.iter().map(|n| n.id.clone()).collect();
        let had_edges = !self.edges.is_empty();
        self.nodes.clear();
        self.edges.clear();
        self.rebuild_lookups();
        self.spatial.clear();
        self.pending_index.clear();
        self.selection = None;

        if ids.is_empty() && !had_edges {
            return;
        }
        for id in ids {
            emit(
                self.events.as_ref(),
                EngineEvent::NodeRemoved {
                    session_id: self.session_id.clone(),
                    node_id: id,
                },
            );
        }
        self.mark_changed(true);
    }

    /// Flush pending history and save, then cancel every timer
    pub fn teardown(&mut self) {
        self.flush_history();
        self.flush_save();
        self.history.cancel_timers();
        self.saves.cancel();
        self.pending_index.clear();
        log::debug!("Tore down canvas '{}'", self.session_id);
    }

    // =========================================================================
    // Scheduled work
    // =========================================================================

    /// Run every debounced task whose deadline has passed and drain the
    /// deferred spatial-index queue
    pub fn tick(&mut self) -> TickOutcome {
        let now = self.clock.now_ms();
        let mut outcome = TickOutcome::default();

        if self.history.take_due_push(now) {
            self.push_history(now);
            outcome.history_pushed = true;
        }
        if self.saves.take_due(now) {
            self.run_save();
            outcome.saved = true;
        }
        outcome.save_failures = self.collect_save_failures();
        if !self.config.external_compaction && self.history.take_due_compaction(now) {
            outcome.compacted = self.history.compact_now();
        }
        outcome.reindexed = self.flush_spatial_index();
        outcome
    }

    /// Record saves a queuing backend accepted but could not write
    fn collect_save_failures(&mut self) -> usize {
        let errors = self.saves.collect_deferred_failures(&self.session_id);
        let count = errors.len();
        if count > 0 && self.saves.has_fallback() {
            let snapshot = self.snapshot();
            self.saves.save_fallback(&self.session_id, &snapshot);
        }
        for error in errors {
            emit(
                self.events.as_ref(),
                EngineEvent::SaveFailed {
                    session_id: self.session_id.clone(),
                    error,
                },
            );
        }
        count
    }

    fn push_history(&mut self, now: u64) {
        let snapshot = self.snapshot();
        self.history.push(snapshot, now);
    }

    /// Record a pending history push now. Returns whether one was pending.
    pub fn flush_history(&mut self) -> bool {
        if !self.history.take_pending_push() {
            return false;
        }
        self.push_history(self.clock.now_ms());
        true
    }

    /// Write a pending save now. Returns whether one was pending.
    pub fn flush_save(&mut self) -> bool {
        if !self.saves.take_pending() {
            return false;
        }
        self.run_save();
        true
    }

    fn run_save(&mut self) {
        let snapshot = self.snapshot();
        let event = match self.saves.save(&self.session_id, &snapshot) {
            Ok(payloads) => {
                if !payloads.is_empty() {
                    emit(
                        self.events.as_ref(),
                        EngineEvent::PayloadsDetached {
                            session_id: self.session_id.clone(),
                            payloads,
                        },
                    );
                }
                EngineEvent::SessionSaved {
                    session_id: self.session_id.clone(),
                }
            }
            Err(error) => EngineEvent::SaveFailed {
                session_id: self.session_id.clone(),
                error,
            },
        };
        emit(self.events.as_ref(), event);
    }

    /// Apply queued index updates. Returns the number processed.
    pub fn flush_spatial_index(&mut self) -> usize {
        if self.pending_index.is_empty() {
            return 0;
        }
        let pending = std::mem::take(&mut self.pending_index);
        let count = pending.len();
        for id in pending {
            match self.node_index.get(&id) {
                Some(&i) => {
                    let rect = self.config.node_sizes.bounds_for(&self.nodes[i]);
                    self.spatial.insert(&id, rect);
                }
                None => {
                    self.spatial.remove(&id);
                }
            }
        }
        count
    }

    /// Rebuild the spatial index from scratch
    pub fn rebuild_spatial_index(&mut self) {
        self.pending_index.clear();
        let sizes = &self.config.node_sizes;
        self.spatial
            .rebuild(self.nodes.iter().map(|n| (n.id.clone(), sizes.bounds_for(n))));
    }

    /// Start an off-thread compaction pass, if one is due
    ///
    /// The returned job holds shared snapshots only; run it without the
    /// engine borrowed and hand the blobs back through
    /// [`finish_compaction`](Self::finish_compaction). Hosts doing this set
    /// `EngineConfig::external_compaction` so `tick` leaves the work to them.
    pub fn take_compaction_job(&mut self) -> Option<CompactionJob> {
        if !self.history.take_due_compaction(self.clock.now_ms()) {
            return None;
        }
        self.history.begin_compaction()
    }

    pub fn finish_compaction(&mut self, blobs: Vec<(u64, Vec<u8>)>) -> usize {
        self.history.finish_compaction(blobs)
    }
}
