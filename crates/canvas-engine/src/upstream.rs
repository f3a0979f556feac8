//! Upstream input collection for generation nodes
//!
//! Given a focus node, find the generation-config nodes it feeds and gather
//! the other text and image sources wired into those configs. The result is
//! what a generation request would see as its context.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::constants::{kinds, roles, upstream};
use crate::types::{CanvasEdge, CanvasNode, NodeId};

/// A text source feeding a config node
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpstreamTextBlock {
    pub id: NodeId,
    pub label: String,
    pub text: String,
    /// The config node this source feeds
    pub target: NodeId,
}

/// An image source feeding a config node
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpstreamImageBlock {
    pub id: NodeId,
    pub label: String,
    pub role: String,
    /// Empty for inline `data:` URLs
    pub url: String,
    pub target: NodeId,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct UpstreamInputs {
    pub text: Vec<UpstreamTextBlock>,
    pub images: Vec<UpstreamImageBlock>,
}

impl UpstreamInputs {
    pub fn is_empty(&self) -> bool {
        self.text.is_empty() && self.images.is_empty()
    }
}

fn normalize(text: &str) -> String {
    text.replace("\r\n", "\n").trim().to_string()
}

/// Normalize and cut to `max_chars` characters, marking the cut with an ellipsis
fn truncate_chars(text: &str, max_chars: usize) -> String {
    let text = normalize(text);
    if text.chars().count() <= max_chars {
        return text;
    }
    let mut out: String = text.chars().take(max_chars).collect();
    out.push('…');
    out
}

fn label_or(label: Option<&str>, fallback: &str) -> String {
    let label = label.map(normalize).unwrap_or_default();
    if label.is_empty() {
        fallback.to_string()
    } else {
        label
    }
}

fn is_config_kind(kind: &str) -> bool {
    kind == kinds::IMAGE_CONFIG || kind == kinds::VIDEO_CONFIG
}

/// Collect the inputs feeding the config nodes that `focus_id` feeds.
///
/// Each source appears at most once, attributed to the first config it was
/// found on. Text sources with empty content and the focus node itself are
/// skipped.
pub fn collect_upstream_inputs(focus_id: &str, nodes: &[CanvasNode], edges: &[CanvasEdge]) -> UpstreamInputs {
    let focus_id = focus_id.trim();
    if focus_id.is_empty() {
        return UpstreamInputs::default();
    }
    let by_id: HashMap<&str, &CanvasNode> = nodes.iter().map(|n| (n.id.as_str(), n)).collect();
    if !by_id.contains_key(focus_id) {
        return UpstreamInputs::default();
    }

    let mut configs: Vec<&str> = Vec::new();
    for edge in edges.iter().filter(|e| e.source == focus_id) {
        if let Some(target) = by_id.get(edge.target.as_str()) {
            if is_config_kind(&target.kind) && !configs.contains(&target.id.as_str()) {
                configs.push(target.id.as_str());
            }
        }
    }

    let mut inputs = UpstreamInputs::default();
    let mut seen_text = HashSet::new();
    let mut seen_images = HashSet::new();

    for config in configs {
        for edge in edges.iter().filter(|e| e.target == config) {
            let Some(source) = by_id.get(edge.source.as_str()) else {
                continue;
            };
            match source.kind.as_str() {
                kinds::TEXT => {
                    if source.id == focus_id || seen_text.contains(source.id.as_str()) {
                        continue;
                    }
                    let content = source.data.content().map(normalize).unwrap_or_default();
                    if content.is_empty() {
                        continue;
                    }
                    inputs.text.push(UpstreamTextBlock {
                        id: source.id.clone(),
                        label: label_or(source.data.label(), upstream::DEFAULT_TEXT_LABEL),
                        text: truncate_chars(&content, upstream::TEXT_MAX_CHARS),
                        target: config.to_string(),
                    });
                    seen_text.insert(source.id.as_str());
                }
                kinds::IMAGE => {
                    if !seen_images.insert(source.id.as_str()) {
                        continue;
                    }
                    let url = source.data.url().map(normalize).unwrap_or_default();
                    let role = edge
                        .data
                        .image_role
                        .as_deref()
                        .map(normalize)
                        .filter(|r| !r.is_empty())
                        .unwrap_or_else(|| roles::GENERIC_IMAGE_ROLE.to_string());
                    inputs.images.push(UpstreamImageBlock {
                        id: source.id.clone(),
                        label: label_or(source.data.label(), upstream::DEFAULT_IMAGE_LABEL),
                        role,
                        url: if url.starts_with("data:") {
                            String::new()
                        } else {
                            truncate_chars(&url, upstream::URL_MAX_CHARS)
                        },
                        target: config.to_string(),
                    });
                }
                _ => {}
            }
        }
    }
    inputs
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{DataMap, EdgeData, EdgeType, NodeData, Position};
    use serde_json::{json, Value};

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

    fn edge(source: &str, target: &str, data: EdgeData) -> CanvasEdge {
        CanvasEdge {
            id: format!("{}-{}", source, target),
            source: source.to_string(),
            target: target.to_string(),
            source_handle: None,
            target_handle: None,
            edge_type: EdgeType::Default,
            data,
        }
    }

    #[test]
    fn test_collects_siblings_of_focus() {
        let nodes = vec![
            node("focus", "text", json!({"content": "main prompt"})),
            node("style", "text", json!({"label": "Style", "content": "  watercolor \r\n"})),
            node("empty", "text", json!({"content": "   "})),
            node("ref", "image", json!({"url": "https://x/a.png"})),
            node("inline", "image", json!({"label": "Pasted", "url": "data:image/png;base64,AA"})),
            node("cfg", "imageConfig", json!({})),
        ];
        let edges = vec![
            edge("focus", "cfg", EdgeData::default()),
            edge("style", "cfg", EdgeData::default()),
            edge("empty", "cfg", EdgeData::default()),
            edge("ref", "cfg", EdgeData::default().with_image_role("first_frame_image")),
            edge("inline", "cfg", EdgeData::default()),
        ];

        let inputs = collect_upstream_inputs("focus", &nodes, &edges);
        assert_eq!(inputs.text.len(), 1);
        assert_eq!(inputs.text[0].id, "style");
        assert_eq!(inputs.text[0].label, "Style");
        assert_eq!(inputs.text[0].text, "watercolor");
        assert_eq!(inputs.text[0].target, "cfg");

        assert_eq!(inputs.images.len(), 2);
        assert_eq!(inputs.images[0].role, "first_frame_image");
        assert_eq!(inputs.images[0].label, upstream::DEFAULT_IMAGE_LABEL);
        assert_eq!(inputs.images[1].role, roles::GENERIC_IMAGE_ROLE);
        assert_eq!(inputs.images[1].url, "");
    }

    #[test]
    fn test_source_reported_once_across_configs() {
        let nodes = vec![
            node("focus", "text", json!({"content": "p"})),
            node("shared", "text", json!({"content": "shared"})),
            node("c1", "imageConfig", json!({})),
            node("c2", "videoConfig", json!({})),
        ];
        let edges = vec![
            edge("focus", "c1", EdgeData::default()),
            edge("focus", "c2", EdgeData::default()),
            edge("shared", "c1", EdgeData::default()),
            edge("shared", "c2", EdgeData::default()),
        ];
        let inputs = collect_upstream_inputs("focus", &nodes, &edges);
        assert_eq!(inputs.text.len(), 1);
        assert_eq!(inputs.text[0].target, "c1");
    }

    #[test]
    fn test_long_text_is_truncated() {
        let long = "a".repeat(upstream::TEXT_MAX_CHARS + 10);
        let nodes = vec![
            node("focus", "image", json!({})),
            node("t", "text", json!({"content": long})),
            node("cfg", "imageConfig", json!({})),
        ];
        let edges = vec![edge("focus", "cfg", EdgeData::default()), edge("t", "cfg", EdgeData::default())];
        let inputs = collect_upstream_inputs("focus", &nodes, &edges);
        assert_eq!(inputs.text[0].text.chars().count(), upstream::TEXT_MAX_CHARS + 1);
        assert!(inputs.text[0].text.ends_with('…'));
    }

    #[test]
    fn test_unknown_or_blank_focus() {
        let nodes = vec![node("a", "text", json!({}))];
        assert!(collect_upstream_inputs("", &nodes, &[]).is_empty());
        assert!(collect_upstream_inputs("missing", &nodes, &[]).is_empty());
        assert!(collect_upstream_inputs("a", &nodes, &[]).is_empty());
    }
}
