//! Core types for canvas graphs
//!
//! These types define the structure of a canvas session: nodes, edges,
//! viewport and the immutable snapshot that history and persistence share.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::constants::{format, kinds};
use crate::error::{CanvasError, Result};

/// Unique identifier for a node
pub type NodeId = String;

/// Unique identifier for an edge
pub type EdgeId = String;

/// Open attribute bag carried by nodes and edges
pub type DataMap = serde_json::Map<String, Value>;

/// Position on the canvas (x, y)
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

impl Position {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Return this position shifted by `delta` on both axes
    pub fn offset(self, delta: f64) -> Self {
        Self {
            x: self.x + delta,
            y: self.y + delta,
        }
    }
}

/// Pan offset and zoom factor. Pure view state, never historized.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Viewport {
    pub x: f64,
    pub y: f64,
    pub zoom: f64,
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            zoom: 1.0,
        }
    }
}

// =============================================================================
// Node data
// =============================================================================

/// Data for `text` nodes
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TextData {
    pub label: Option<String>,
    pub content: Option<String>,
    /// Fields not modelled above; preserved verbatim
    pub extra: DataMap,
}

/// Data for `image` and `video` nodes
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MediaData {
    pub label: Option<String>,
    pub url: Option<String>,
    pub extra: DataMap,
}

/// Data for generation config nodes (`imageConfig`, `videoConfig`)
#[derive(Debug, Clone, PartialEq, Default)]
pub struct GenerationConfigData {
    pub label: Option<String>,
    pub model: Option<String>,
    pub extra: DataMap,
}

/// Node attribute bag, typed for the kinds the engine knows about
///
/// Host-defined kinds, and well-known kinds whose fields do not have the
/// expected shape, fall back to `Generic` so nothing is lost. The serialized
/// form is always a flat JSON object, and equality compares that form.
#[derive(Debug, Clone)]
pub enum NodeData {
    Text(TextData),
    Media(MediaData),
    GenerationConfig(GenerationConfigData),
    Generic(DataMap),
}

impl Default for NodeData {
    fn default() -> Self {
        Self::Generic(DataMap::new())
    }
}

/// Remove the given string fields from `map`.
///
/// Fails (handing the map back untouched) if any of them holds a non-string.
fn take_strings<const N: usize>(
    mut map: DataMap,
    keys: [&str; N],
) -> std::result::Result<([Option<String>; N], DataMap), DataMap> {
    if keys
        .iter()
        .any(|k| map.get(*k).is_some_and(|v| !v.is_string()))
    {
        return Err(map);
    }
    let values = keys.map(|k| match map.remove(k) {
        Some(Value::String(s)) => Some(s),
        _ => None,
    });
    Ok((values, map))
}

fn put_string(map: &mut DataMap, key: &str, value: &Option<String>) {
    if let Some(v) = value {
        map.insert(key.to_string(), Value::String(v.clone()));
    }
}

impl NodeData {
    /// Interpret a raw attribute bag according to the node kind
    pub fn from_map(kind: &str, map: DataMap) -> Self {
        let typed = match kind {
            kinds::TEXT => take_strings(map, ["label", "content"]).map(|([label, content], extra)| {
                NodeData::Text(TextData {
                    label,
                    content,
                    extra,
                })
            }),
            kinds::IMAGE | kinds::VIDEO => {
                take_strings(map, ["label", "url"]).map(|([label, url], extra)| {
                    NodeData::Media(MediaData { label, url, extra })
                })
            }
            kinds::IMAGE_CONFIG | kinds::VIDEO_CONFIG => take_strings(map, ["label", "model"])
                .map(|([label, model], extra)| {
                    NodeData::GenerationConfig(GenerationConfigData {
                        label,
                        model,
                        extra,
                    })
                }),
            _ => Err(map),
        };
        typed.unwrap_or_else(NodeData::Generic)
    }

    /// Flatten back into the raw attribute bag
    pub fn to_map(&self) -> DataMap {
        match self {
            NodeData::Text(d) => {
                let mut map = d.extra.clone();
                put_string(&mut map, "label", &d.label);
                put_string(&mut map, "content", &d.content);
                map
            }
            NodeData::Media(d) => {
                let mut map = d.extra.clone();
                put_string(&mut map, "label", &d.label);
                put_string(&mut map, "url", &d.url);
                map
            }
            NodeData::GenerationConfig(d) => {
                let mut map = d.extra.clone();
                put_string(&mut map, "label", &d.label);
                put_string(&mut map, "model", &d.model);
                map
            }
            NodeData::Generic(map) => map.clone(),
        }
    }

    /// Shallow merge: top-level keys in `patch` replace existing ones
    pub fn merged(&self, kind: &str, patch: DataMap) -> Self {
        let mut map = self.to_map();
        map.extend(patch);
        Self::from_map(kind, map)
    }

    pub fn label(&self) -> Option<&str> {
        match self {
            NodeData::Text(d) => d.label.as_deref(),
            NodeData::Media(d) => d.label.as_deref(),
            NodeData::GenerationConfig(d) => d.label.as_deref(),
            NodeData::Generic(map) => map.get("label").and_then(Value::as_str),
        }
    }

    /// Text content of a `text` node
    pub fn content(&self) -> Option<&str> {
        match self {
            NodeData::Text(d) => d.content.as_deref(),
            NodeData::Generic(map) => map.get("content").and_then(Value::as_str),
            _ => None,
        }
    }

    /// Media location of an `image`/`video` node
    pub fn url(&self) -> Option<&str> {
        match self {
            NodeData::Media(d) => d.url.as_deref(),
            NodeData::Generic(map) => map.get("url").and_then(Value::as_str),
            _ => None,
        }
    }
}

impl PartialEq for NodeData {
    fn eq(&self, other: &Self) -> bool {
        self.to_map() == other.to_map()
    }
}

impl Serialize for NodeData {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.to_map().serialize(serializer)
    }
}

// =============================================================================
// Nodes
// =============================================================================

/// A node instance on the canvas
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "RawNode", into = "RawNode")]
pub struct CanvasNode {
    /// Unique identifier for this node instance
    pub id: NodeId,
    /// Opaque kind tag interpreted by the UI layer
    pub kind: String,
    /// Position on the canvas
    pub position: Position,
    /// Paint order
    pub z_index: i64,
    /// Attribute bag
    pub data: NodeData,
}

/// Wire shape of a node
#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawNode {
    id: NodeId,
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    position: Position,
    #[serde(default)]
    z_index: i64,
    #[serde(default)]
    data: DataMap,
}

impl From<RawNode> for CanvasNode {
    fn from(raw: RawNode) -> Self {
        let data = NodeData::from_map(&raw.kind, raw.data);
        Self {
            id: raw.id,
            kind: raw.kind,
            position: raw.position,
            z_index: raw.z_index,
            data,
        }
    }
}

impl From<CanvasNode> for RawNode {
    fn from(node: CanvasNode) -> Self {
        let data = node.data.to_map();
        Self {
            id: node.id,
            kind: node.kind,
            position: node.position,
            z_index: node.z_index,
            data,
        }
    }
}

/// Partial update applied by `CanvasEngine::update_node`
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NodePatch {
    pub x: Option<f64>,
    pub y: Option<f64>,
    pub kind: Option<String>,
    pub z_index: Option<i64>,
    /// Shallow-merged into the node's data
    pub data: Option<DataMap>,
}

impl NodePatch {
    /// Patch that only moves the node
    pub fn position(x: f64, y: f64) -> Self {
        Self {
            x: Some(x),
            y: Some(y),
            ..Self::default()
        }
    }

    /// Patch that only merges data
    pub fn data(data: DataMap) -> Self {
        Self {
            data: Some(data),
            ..Self::default()
        }
    }

    pub fn with_kind(mut self, kind: impl Into<String>) -> Self {
        self.kind = Some(kind.into());
        self
    }

    pub fn with_z_index(mut self, z_index: i64) -> Self {
        self.z_index = Some(z_index);
        self
    }

    /// True if the patch touches x and/or y and nothing else.
    ///
    /// Such patches come from drags and are exempt from history scheduling.
    pub fn is_position_only(&self) -> bool {
        (self.x.is_some() || self.y.is_some())
            && self.kind.is_none()
            && self.z_index.is_none()
            && self.data.is_none()
    }
}

// =============================================================================
// Edges
// =============================================================================

/// Semantic type of an edge
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum EdgeType {
    #[default]
    Default,
    /// Carries an image role (`imageRole`), exclusive per target
    ImageRole,
    /// Carries a prompt ordinal (`promptOrder`)
    PromptOrder,
    /// Carries an image ordinal (`imageOrder`)
    ImageOrder,
    /// Host-defined type
    Custom(String),
}

impl EdgeType {
    pub fn as_str(&self) -> &str {
        match self {
            EdgeType::Default => "default",
            EdgeType::ImageRole => "imageRole",
            EdgeType::PromptOrder => "promptOrder",
            EdgeType::ImageOrder => "imageOrder",
            EdgeType::Custom(name) => name,
        }
    }

    /// Whether edges of this type hold an ordinal slot
    pub fn is_ordinal(&self) -> bool {
        matches!(self, EdgeType::PromptOrder | EdgeType::ImageOrder)
    }
}

impl From<String> for EdgeType {
    fn from(value: String) -> Self {
        match value.as_str() {
            "default" | "" => EdgeType::Default,
            "imageRole" => EdgeType::ImageRole,
            "promptOrder" => EdgeType::PromptOrder,
            "imageOrder" => EdgeType::ImageOrder,
            _ => EdgeType::Custom(value),
        }
    }
}

impl From<&str> for EdgeType {
    fn from(value: &str) -> Self {
        EdgeType::from(value.to_string())
    }
}

impl From<EdgeType> for String {
    fn from(value: EdgeType) -> Self {
        value.as_str().to_string()
    }
}

impl std::fmt::Display for EdgeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ordinals are positive integers; anything else in a loaded document is dropped.
fn lenient_ordinal<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Option<u32>, D::Error> {
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value
        .and_then(|v| v.as_u64())
        .filter(|n| *n >= 1)
        .and_then(|n| u32::try_from(n).ok()))
}

/// Attribute bag of an edge
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EdgeData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_role: Option<String>,
    #[serde(
        default,
        deserialize_with = "lenient_ordinal",
        skip_serializing_if = "Option::is_none"
    )]
    pub prompt_order: Option<u32>,
    #[serde(
        default,
        deserialize_with = "lenient_ordinal",
        skip_serializing_if = "Option::is_none"
    )]
    pub image_order: Option<u32>,
    /// Fields not modelled above; preserved verbatim
    #[serde(flatten)]
    pub extra: DataMap,
}

impl EdgeData {
    pub fn with_image_role(mut self, role: impl Into<String>) -> Self {
        self.image_role = Some(role.into());
        self
    }

    pub fn with_prompt_order(mut self, order: u32) -> Self {
        self.prompt_order = Some(order);
        self
    }

    pub fn with_image_order(mut self, order: u32) -> Self {
        self.image_order = Some(order);
        self
    }
}

/// An edge connecting two nodes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CanvasEdge {
    /// Unique identifier for this edge
    pub id: EdgeId,
    /// Source node ID
    pub source: NodeId,
    /// Target node ID
    pub target: NodeId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_handle: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_handle: Option<String>,
    /// Inferred semantic type
    #[serde(rename = "type", default)]
    pub edge_type: EdgeType,
    #[serde(default)]
    pub data: EdgeData,
}

impl CanvasEdge {
    /// Whether either endpoint is `node_id`
    pub fn touches(&self, node_id: &str) -> bool {
        self.source == node_id || self.target == node_id
    }

    /// Ordinal slot matching this edge's type, if any
    pub fn ordinal(&self) -> Option<u32> {
        match self.edge_type {
            EdgeType::PromptOrder => self.data.prompt_order,
            EdgeType::ImageOrder => self.data.image_order,
            _ => None,
        }
    }

    /// Set the ordinal slot matching this edge's type; ignored for other types
    pub fn set_ordinal(&mut self, ordinal: Option<u32>) {
        match self.edge_type {
            EdgeType::PromptOrder => self.data.prompt_order = ordinal,
            EdgeType::ImageOrder => self.data.image_order = ordinal,
            _ => {}
        }
    }

    /// Same endpoints and handles
    pub fn same_connection(&self, other: &CanvasEdge) -> bool {
        self.source == other.source
            && self.target == other.target
            && self.source_handle == other.source_handle
            && self.target_handle == other.target_handle
    }
}

/// Parameters for `CanvasEngine::add_edge`
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EdgeSpec {
    /// Explicit type; honoured only if recognized
    pub edge_type: Option<EdgeType>,
    pub source_handle: Option<String>,
    pub target_handle: Option<String>,
    pub data: EdgeData,
}

impl EdgeSpec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn typed(edge_type: impl Into<EdgeType>) -> Self {
        Self {
            edge_type: Some(edge_type.into()),
            ..Self::default()
        }
    }

    pub fn with_data(mut self, data: EdgeData) -> Self {
        self.data = data;
        self
    }

    pub fn with_handles(mut self, source: impl Into<String>, target: impl Into<String>) -> Self {
        self.source_handle = Some(source.into());
        self.target_handle = Some(target.into());
        self
    }
}

// =============================================================================
// Snapshot & selection
// =============================================================================

/// Immutable aggregate of the canvas: the unit of undo/redo and persistence
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanvasSnapshot {
    /// Document format version
    pub version: u32,
    pub nodes: Vec<CanvasNode>,
    pub edges: Vec<CanvasEdge>,
    #[serde(default)]
    pub viewport: Viewport,
}

impl Default for CanvasSnapshot {
    fn default() -> Self {
        Self::new(Vec::new(), Vec::new(), Viewport::default())
    }
}

impl CanvasSnapshot {
    pub fn new(nodes: Vec<CanvasNode>, edges: Vec<CanvasEdge>, viewport: Viewport) -> Self {
        Self {
            version: format::SNAPSHOT_VERSION,
            nodes,
            edges,
            viewport,
        }
    }

    /// Parse a persisted document, rejecting unknown format versions
    pub fn from_json_slice(bytes: &[u8]) -> Result<Self> {
        let snapshot: CanvasSnapshot = serde_json::from_slice(bytes)?;
        if snapshot.version != format::SNAPSHOT_VERSION {
            return Err(CanvasError::UnsupportedVersion(snapshot.version));
        }
        Ok(snapshot)
    }

    pub fn to_json_vec(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Find a node by ID
    pub fn find_node(&self, id: &str) -> Option<&CanvasNode> {
        self.nodes.iter().find(|n| n.id == id)
    }

    /// Get edges coming into a node
    pub fn incoming_edges<'a>(&'a self, node_id: &'a str) -> impl Iterator<Item = &'a CanvasEdge> + 'a {
        self.edges.iter().filter(move |e| e.target == node_id)
    }

    /// Get edges going out of a node
    pub fn outgoing_edges<'a>(&'a self, node_id: &'a str) -> impl Iterator<Item = &'a CanvasEdge> + 'a {
        self.edges.iter().filter(move |e| e.source == node_id)
    }
}

/// Current selection: at most one node or one edge
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection {
    Node(NodeId),
    Edge(EdgeId),
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn map(value: Value) -> DataMap {
        match value {
            Value::Object(m) => m,
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn test_text_data_is_typed() {
        let data = NodeData::from_map("text", map(json!({"label": "Intro", "content": "hi", "color": 3})));
        match &data {
            NodeData::Text(t) => {
                assert_eq!(t.label.as_deref(), Some("Intro"));
                assert_eq!(t.content.as_deref(), Some("hi"));
                assert_eq!(t.extra.get("color"), Some(&json!(3)));
            }
            other => panic!("expected text data, got {:?}", other),
        }
        assert_eq!(data.content(), Some("hi"));
    }

    #[test]
    fn test_malformed_known_kind_falls_back_to_generic() {
        let raw = map(json!({"content": 42}));
        let data = NodeData::from_map("text", raw.clone());
        assert_eq!(data, NodeData::Generic(raw.clone()));
        assert_eq!(data.to_map(), raw);
    }

    #[test]
    fn test_unknown_kind_is_generic() {
        let raw = map(json!({"anything": [1, 2]}));
        assert_eq!(NodeData::from_map("sketch", raw.clone()), NodeData::Generic(raw));
    }

    #[test]
    fn test_shallow_merge_replaces_top_level_keys() {
        let data = NodeData::from_map("image", map(json!({"url": "a.png", "meta": {"w": 1}})));
        let merged = data.merged("image", map(json!({"meta": {"h": 2}})));
        assert_eq!(merged.url(), Some("a.png"));
        assert_eq!(merged.to_map().get("meta"), Some(&json!({"h": 2})));
    }

    #[test]
    fn test_node_wire_format() {
        let node: CanvasNode = serde_json::from_value(json!({
            "id": "n1",
            "type": "image",
            "position": {"x": 1.0, "y": 2.0},
            "zIndex": 3,
            "data": {"url": "u"}
        }))
        .unwrap();
        assert_eq!(node.kind, "image");
        assert_eq!(node.z_index, 3);
        assert_eq!(node.data.url(), Some("u"));

        let back = serde_json::to_value(&node).unwrap();
        assert_eq!(back["type"], "image");
        assert_eq!(back["zIndex"], 3);
        assert_eq!(back["data"]["url"], "u");
    }

    #[test]
    fn test_edge_wire_format_and_lenient_ordinals() {
        let edge: CanvasEdge = serde_json::from_value(json!({
            "id": "e1",
            "source": "a",
            "target": "b",
            "type": "promptOrder",
            "data": {"promptOrder": 2, "imageOrder": -1, "note": "x"}
        }))
        .unwrap();
        assert_eq!(edge.edge_type, EdgeType::PromptOrder);
        assert_eq!(edge.ordinal(), Some(2));
        assert_eq!(edge.data.image_order, None);
        assert_eq!(edge.data.extra.get("note"), Some(&json!("x")));

        let back = serde_json::to_value(&edge).unwrap();
        assert_eq!(back["type"], "promptOrder");
        assert!(back.get("sourceHandle").is_none());
    }

    #[test]
    fn test_custom_edge_type_round_trips() {
        let t = EdgeType::from("styleRef");
        assert_eq!(t, EdgeType::Custom("styleRef".to_string()));
        assert_eq!(String::from(t), "styleRef");
    }

    #[test]
    fn test_snapshot_rejects_unknown_version() {
        let doc = json!({"version": 2, "nodes": [], "edges": []}).to_string();
        let err = CanvasSnapshot::from_json_slice(doc.as_bytes()).unwrap_err();
        assert!(matches!(err, CanvasError::UnsupportedVersion(2)));
    }

    #[test]
    fn test_snapshot_default_viewport() {
        let doc = json!({"version": 1, "nodes": [], "edges": []}).to_string();
        let snapshot = CanvasSnapshot::from_json_slice(doc.as_bytes()).unwrap();
        assert_eq!(snapshot.viewport, Viewport::default());
    }

    #[test]
    fn test_position_only_patch() {
        assert!(NodePatch::position(1.0, 2.0).is_position_only());
        assert!(NodePatch { x: Some(1.0), ..NodePatch::default() }.is_position_only());
        assert!(!NodePatch::default().is_position_only());
        assert!(!NodePatch::position(1.0, 2.0).with_z_index(4).is_position_only());
    }
}
