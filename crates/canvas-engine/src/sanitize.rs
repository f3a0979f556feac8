//! Clone-for-persistence: strip inline payloads from node data
//!
//! Inline media (data URLs, base64 blobs, oversized strings) lives in an
//! external large-object store. Before a snapshot is written, every such
//! field is replaced by a content-derived reference so the persisted
//! document stays small no matter how much media the canvas holds.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::constants::persistence::{INLINE_PAYLOAD_KEYS, MEDIA_REF_PREFIX};
use crate::types::{CanvasNode, CanvasSnapshot, NodeData, NodeId};

/// A field that was replaced by a reference
///
/// `field` is a path into the node's data (`url`, `layers[0].dataUrl`); the
/// host reads the payload there on the live node and files it under
/// `reference`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetachedPayload {
    pub node_id: NodeId,
    pub field: String,
    pub reference: String,
}

/// Stable reference for a payload: same content, same reference
pub fn media_reference(payload: &str) -> String {
    let hex = blake3::hash(payload.as_bytes()).to_hex();
    format!("{}{}", MEDIA_REF_PREFIX, &hex.as_str()[..32])
}

fn is_inline_payload(key: &str, value: &str, limit: usize) -> bool {
    if value.starts_with(MEDIA_REF_PREFIX) {
        return false;
    }
    INLINE_PAYLOAD_KEYS.contains(&key) || value.starts_with("data:") || value.len() > limit
}

/// Replace inline payloads anywhere below `value`.
///
/// `key` is the nearest enclosing object key, so array elements are judged
/// by the field that holds the array. `path` names the field in the report,
/// e.g. `layers[0].dataUrl`.
fn strip_payloads(
    node_id: &str,
    path: &str,
    key: &str,
    value: &mut Value,
    limit: usize,
    detached: &mut Vec<DetachedPayload>,
) -> bool {
    match value {
        Value::String(text) => {
            if !is_inline_payload(key, text, limit) {
                return false;
            }
            let reference = media_reference(text);
            detached.push(DetachedPayload {
                node_id: node_id.to_string(),
                field: path.to_string(),
                reference: reference.clone(),
            });
            *value = Value::String(reference);
            true
        }
        Value::Array(items) => {
            let mut changed = false;
            for (i, item) in items.iter_mut().enumerate() {
                let item_path = format!("{}[{}]", path, i);
                changed |= strip_payloads(node_id, &item_path, key, item, limit, detached);
            }
            changed
        }
        Value::Object(map) => {
            let mut changed = false;
            for (child_key, child) in map.iter_mut() {
                let child_path = format!("{}.{}", path, child_key);
                changed |= strip_payloads(node_id, &child_path, child_key, child, limit, detached);
            }
            changed
        }
        _ => false,
    }
}

fn sanitize_node(node: &CanvasNode, limit: usize, detached: &mut Vec<DetachedPayload>) -> CanvasNode {
    let mut map = node.data.to_map();
    let mut changed = false;
    for (key, value) in map.iter_mut() {
        changed |= strip_payloads(&node.id, key, key, value, limit, detached);
    }

    let mut clean = node.clone();
    if changed {
        clean.data = NodeData::from_map(&node.kind, map);
    }
    clean
}

/// Copy of `snapshot` safe to persist, plus the list of stripped fields
pub fn sanitize_for_persistence(snapshot: &CanvasSnapshot, limit: usize) -> (CanvasSnapshot, Vec<DetachedPayload>) {
    let mut detached = Vec::new();
    let nodes = snapshot
        .nodes
        .iter()
        .map(|n| sanitize_node(n, limit, &mut detached))
        .collect();
    let clean = CanvasSnapshot {
        version: snapshot.version,
        nodes,
        edges: snapshot.edges.clone(),
        viewport: snapshot.viewport,
    };
    (clean, detached)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{DataMap, Position, Viewport};
    use serde_json::json;

    fn node(id: &str, kind: &str, data: Value) -> CanvasNode {
        let map: DataMap = match data {
            Value::Object(m) => m,
            _ => DataMap::new(),
        };
        CanvasNode {
            id: id.to_string(),
            kind: kind.to_string(),
            position: Position::default(),
            z_index: 1,
            data: NodeData::from_map(kind, map),
        }
    }

    #[test]
    fn test_data_url_is_replaced_by_reference() {
        let snapshot = CanvasSnapshot::new(
            vec![node("n1", "image", json!({"url": "data:image/png;base64,AAAA", "label": "ref"}))],
            Vec::new(),
            Viewport::default(),
        );
        let (clean, detached) = sanitize_for_persistence(&snapshot, 1024);

        let url = clean.nodes[0].data.url().unwrap();
        assert!(url.starts_with(MEDIA_REF_PREFIX));
        assert_eq!(clean.nodes[0].data.label(), Some("ref"));
        assert_eq!(detached.len(), 1);
        assert_eq!(detached[0].field, "url");
        assert_eq!(detached[0].reference, url);
        // Source snapshot is untouched
        assert!(snapshot.nodes[0].data.url().unwrap().starts_with("data:"));
    }

    #[test]
    fn test_conventional_keys_and_oversized_strings() {
        let big = "x".repeat(50);
        let snapshot = CanvasSnapshot::new(
            vec![node("n1", "sketch", json!({"base64": "abc", "notes": big, "short": "ok", "count": 3}))],
            Vec::new(),
            Viewport::default(),
        );
        let (clean, detached) = sanitize_for_persistence(&snapshot, 40);
        let map = clean.nodes[0].data.to_map();
        assert!(map["base64"].as_str().unwrap().starts_with(MEDIA_REF_PREFIX));
        assert!(map["notes"].as_str().unwrap().starts_with(MEDIA_REF_PREFIX));
        assert_eq!(map["short"], "ok");
        assert_eq!(map["count"], 3);
        assert_eq!(detached.len(), 2);
    }

    #[test]
    fn test_nested_payloads_are_stripped() {
        let big = "y".repeat(100_000);
        let data_url = format!("data:image/png;base64,{}", "A".repeat(200_000));
        let snapshot = CanvasSnapshot::new(
            vec![node(
                "n1",
                "sketch",
                json!({
                    "layers": [{"name": "ink", "dataUrl": data_url}, {"name": "empty"}],
                    "media": {"imageData": big, "width": 640},
                    "frames": ["data:image/png;base64,BBBB", "frame-2"],
                }),
            )],
            Vec::new(),
            Viewport::default(),
        );
        let (clean, detached) = sanitize_for_persistence(&snapshot, 1024);

        let fields: Vec<&str> = detached.iter().map(|d| d.field.as_str()).collect();
        assert_eq!(detached.len(), 3);
        assert!(fields.contains(&"layers[0].dataUrl"));
        assert!(fields.contains(&"media.imageData"));
        assert!(fields.contains(&"frames[0]"));

        let map = clean.nodes[0].data.to_map();
        assert!(map["layers"][0]["dataUrl"].as_str().unwrap().starts_with(MEDIA_REF_PREFIX));
        assert_eq!(map["layers"][0]["name"], "ink");
        assert_eq!(map["media"]["width"], 640);
        assert_eq!(map["frames"][1], "frame-2");
        assert!(clean.to_json_vec().unwrap().len() < 10_000);
    }

    #[test]
    fn test_reference_is_stable_and_idempotent() {
        assert_eq!(media_reference("payload"), media_reference("payload"));
        assert_ne!(media_reference("payload"), media_reference("other"));

        let snapshot = CanvasSnapshot::new(
            vec![node("n1", "image", json!({"url": "data:image/png;base64,AAAA"}))],
            Vec::new(),
            Viewport::default(),
        );
        let (once, _) = sanitize_for_persistence(&snapshot, 1024);
        let (twice, detached) = sanitize_for_persistence(&once, 1024);
        assert_eq!(once, twice);
        assert!(detached.is_empty());
    }
}
