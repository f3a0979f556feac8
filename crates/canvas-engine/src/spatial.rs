//! Spatial index for region queries and hit-testing.
//!
//! A uniform grid: each node's bounding box is registered in every cell it
//! overlaps, and the last-known box is remembered per node so removal only
//! touches the cells the node actually occupied.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::constants::geometry;
use crate::types::{CanvasNode, NodeId};

/// Axis-aligned rectangle in canvas space
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Rect {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Build from two corners in any order
    pub fn from_corners(a: (f64, f64), b: (f64, f64)) -> Self {
        let (min_x, max_x) = if a.0 <= b.0 { (a.0, b.0) } else { (b.0, a.0) };
        let (min_y, max_y) = if a.1 <= b.1 { (a.1, b.1) } else { (b.1, a.1) };
        Self::new(min_x, min_y, max_x - min_x, max_y - min_y)
    }

    pub fn max_x(&self) -> f64 {
        self.x + self.width
    }

    pub fn max_y(&self) -> f64 {
        self.y + self.height
    }

    /// Overlap test; touching edges count as overlap
    pub fn intersects(&self, other: &Rect) -> bool {
        self.x <= other.max_x()
            && other.x <= self.max_x()
            && self.y <= other.max_y()
            && other.y <= self.max_y()
    }

    pub fn contains_point(&self, x: f64, y: f64) -> bool {
        x >= self.x && x <= self.max_x() && y >= self.y && y <= self.max_y()
    }
}

/// Default footprint of a node kind
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeSize {
    pub width: f64,
    pub min_height: f64,
}

impl NodeSize {
    pub fn new(width: f64, min_height: f64) -> Self {
        Self { width, min_height }
    }
}

/// Host-supplied table mapping node kinds to their default footprint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NodeSizeTable {
    pub sizes: HashMap<String, NodeSize>,
    /// Used for kinds not present in `sizes`
    pub fallback: NodeSize,
}

impl Default for NodeSizeTable {
    fn default() -> Self {
        Self {
            sizes: HashMap::new(),
            fallback: NodeSize::new(geometry::FALLBACK_NODE_WIDTH, geometry::FALLBACK_NODE_HEIGHT),
        }
    }
}

impl NodeSizeTable {
    pub fn with_size(mut self, kind: impl Into<String>, width: f64, min_height: f64) -> Self {
        self.sizes.insert(kind.into(), NodeSize::new(width, min_height));
        self
    }

    pub fn size_for(&self, kind: &str) -> NodeSize {
        self.sizes.get(kind).copied().unwrap_or(self.fallback)
    }

    /// Estimated bounding box of a node
    pub fn bounds_for(&self, node: &CanvasNode) -> Rect {
        let size = self.size_for(&node.kind);
        Rect::new(node.position.x, node.position.y, size.width, size.min_height)
    }
}

type CellKey = (i64, i64);

/// Uniform-grid spatial index over node bounding boxes
#[derive(Debug, Clone)]
pub struct SpatialIndex {
    cell_size: f64,
    cells: HashMap<CellKey, HashSet<NodeId>>,
    bounds: HashMap<NodeId, Rect>,
}

impl SpatialIndex {
    pub fn new(cell_size: f64) -> Self {
        Self {
            cell_size,
            cells: HashMap::new(),
            bounds: HashMap::new(),
        }
    }

    fn cell_of(&self, v: f64) -> i64 {
        (v / self.cell_size).floor() as i64
    }

    /// Inclusive cell range covered by `rect`
    fn cell_range(&self, rect: &Rect) -> (i64, i64, i64, i64) {
        (
            self.cell_of(rect.x),
            self.cell_of(rect.y),
            self.cell_of(rect.max_x()),
            self.cell_of(rect.max_y()),
        )
    }

    /// Insert or move a node
    pub fn insert(&mut self, id: &str, rect: Rect) {
        if self.bounds.get(id) == Some(&rect) {
            return;
        }
        self.remove(id);
        let (x0, y0, x1, y1) = self.cell_range(&rect);
        for cx in x0..=x1 {
            for cy in y0..=y1 {
                self.cells.entry((cx, cy)).or_default().insert(id.to_string());
            }
        }
        self.bounds.insert(id.to_string(), rect);
    }

    /// Remove a node; returns false if it was not indexed
    pub fn remove(&mut self, id: &str) -> bool {
        let Some(rect) = self.bounds.remove(id) else {
            return false;
        };
        let (x0, y0, x1, y1) = self.cell_range(&rect);
        for cx in x0..=x1 {
            for cy in y0..=y1 {
                if let Some(bucket) = self.cells.get_mut(&(cx, cy)) {
                    bucket.remove(id);
                    if bucket.is_empty() {
                        self.cells.remove(&(cx, cy));
                    }
                }
            }
        }
        true
    }

    /// Replace the whole index
    pub fn rebuild(&mut self, entries: impl IntoIterator<Item = (NodeId, Rect)>) {
        self.clear();
        for (id, rect) in entries {
            self.insert(&id, rect);
        }
    }

    pub fn clear(&mut self) {
        self.cells.clear();
        self.bounds.clear();
    }

    /// Ids of nodes whose box intersects `region`, sorted
    pub fn query(&self, region: &Rect) -> Vec<NodeId> {
        let (x0, y0, x1, y1) = self.cell_range(region);
        let span = x1
            .saturating_sub(x0)
            .saturating_add(1)
            .saturating_mul(y1.saturating_sub(y0).saturating_add(1));

        let mut found: HashSet<&NodeId> = HashSet::new();
        if span < 0 || span as usize > self.cells.len() {
            // Region covers more cells than are occupied: scan the occupied ones.
            for ((cx, cy), bucket) in &self.cells {
                if (x0..=x1).contains(cx) && (y0..=y1).contains(cy) {
                    found.extend(bucket.iter());
                }
            }
        } else {
            for cx in x0..=x1 {
                for cy in y0..=y1 {
                    if let Some(bucket) = self.cells.get(&(cx, cy)) {
                        found.extend(bucket.iter());
                    }
                }
            }
        }

        let mut ids: Vec<NodeId> = found
            .into_iter()
            .filter(|id| self.bounds.get(*id).is_some_and(|b| b.intersects(region)))
            .cloned()
            .collect();
        ids.sort();
        ids
    }

    /// Ids of nodes whose box contains the point, sorted
    pub fn query_point(&self, x: f64, y: f64) -> Vec<NodeId> {
        let Some(bucket) = self.cells.get(&(self.cell_of(x), self.cell_of(y))) else {
            return Vec::new();
        };
        let mut ids: Vec<NodeId> = bucket
            .iter()
            .filter(|id| self.bounds.get(*id).is_some_and(|b| b.contains_point(x, y)))
            .cloned()
            .collect();
        ids.sort();
        ids
    }

    pub fn contains(&self, id: &str) -> bool {
        self.bounds.contains_key(id)
    }

    /// Last-known box of an indexed node
    pub fn bounds(&self, id: &str) -> Option<Rect> {
        self.bounds.get(id).copied()
    }

    /// Number of indexed nodes
    pub fn len(&self) -> usize {
        self.bounds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bounds.is_empty()
    }

    /// Number of occupied cells
    pub fn cell_count(&self) -> usize {
        self.cells.len()
    }
}
