//! Snapshot validation and repair
//!
//! Loaded documents come from outside the engine and may violate its
//! invariants. `validate_snapshot` reports every problem; `repair_snapshot`
//! fixes them (duplicates, dangling references, conflicting edge slots) so a
//! session can still be opened.

use std::collections::{HashMap, HashSet};

use crate::edges::{resolve_image_role, resolve_ordinal, EdgeRules};
use crate::types::{CanvasSnapshot, EdgeType};

/// Invariant violation found in a snapshot
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationIssue {
    /// Two nodes share an id
    DuplicateNodeId { node_id: String },
    /// Two edges share an id
    DuplicateEdgeId { edge_id: String },
    /// An edge references a non-existent node
    UnknownNode { edge_id: String, node_id: String },
    /// More than one edge into a target holds the same exclusive role
    DuplicateExclusiveRole { target: String, role: String },
    /// More than one edge in a (target, type) group holds the same ordinal
    DuplicateOrdinal {
        target: String,
        edge_type: EdgeType,
        ordinal: u32,
    },
}

impl std::fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DuplicateNodeId { node_id } => write!(f, "Duplicate node id '{}'", node_id),
            Self::DuplicateEdgeId { edge_id } => write!(f, "Duplicate edge id '{}'", edge_id),
            Self::UnknownNode { edge_id, node_id } => {
                write!(f, "Edge '{}' references unknown node '{}'", edge_id, node_id)
            }
            Self::DuplicateExclusiveRole { target, role } => {
                write!(f, "Role '{}' is held more than once on node '{}'", role, target)
            }
            Self::DuplicateOrdinal {
                target,
                edge_type,
                ordinal,
            } => {
                write!(
                    f,
                    "{} #{} is held more than once on node '{}'",
                    edge_type, ordinal, target
                )
            }
        }
    }
}

impl std::error::Error for ValidationIssue {}

/// Validate a snapshot
///
/// Returns all issues found (not just the first).
pub fn validate_snapshot(snapshot: &CanvasSnapshot, rules: &EdgeRules) -> Vec<ValidationIssue> {
    let mut issues = Vec::new();

    let mut node_ids = HashSet::new();
    for node in &snapshot.nodes {
        if !node_ids.insert(node.id.as_str()) {
            issues.push(ValidationIssue::DuplicateNodeId {
                node_id: node.id.clone(),
            });
        }
    }

    let mut edge_ids = HashSet::new();
    for edge in &snapshot.edges {
        if !edge_ids.insert(edge.id.as_str()) {
            issues.push(ValidationIssue::DuplicateEdgeId {
                edge_id: edge.id.clone(),
            });
        }
        for endpoint in [&edge.source, &edge.target] {
            if !node_ids.contains(endpoint.as_str()) {
                issues.push(ValidationIssue::UnknownNode {
                    edge_id: edge.id.clone(),
                    node_id: endpoint.clone(),
                });
            }
        }
    }

    validate_edge_slots(snapshot, rules, &mut issues);
    issues
}

/// Check exclusive roles and ordinals per target
fn validate_edge_slots(snapshot: &CanvasSnapshot, rules: &EdgeRules, issues: &mut Vec<ValidationIssue>) {
    let mut roles: HashMap<(&str, &str), usize> = HashMap::new();
    let mut ordinals: HashMap<(&str, &EdgeType, u32), usize> = HashMap::new();

    for edge in &snapshot.edges {
        if edge.edge_type == EdgeType::ImageRole {
            if let Some(role) = edge.data.image_role.as_deref().filter(|r| rules.is_exclusive(r)) {
                let count = roles.entry((edge.target.as_str(), role)).or_default();
                *count += 1;
                if *count == 2 {
                    issues.push(ValidationIssue::DuplicateExclusiveRole {
                        target: edge.target.clone(),
                        role: role.to_string(),
                    });
                }
            }
        }
        if let Some(ordinal) = edge.ordinal() {
            let count = ordinals
                .entry((edge.target.as_str(), &edge.edge_type, ordinal))
                .or_default();
            *count += 1;
            if *count == 2 {
                issues.push(ValidationIssue::DuplicateOrdinal {
                    target: edge.target.clone(),
                    edge_type: edge.edge_type.clone(),
                    ordinal,
                });
            }
        }
    }
}

/// What `repair_snapshot` changed
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RepairReport {
    pub duplicate_nodes: usize,
    pub duplicate_edges: usize,
    pub dangling_edges: usize,
    /// Edges moved off an exclusive role another edge already held
    pub reassigned_roles: usize,
    /// Edges given a fresh ordinal because theirs was taken or missing
    pub reassigned_ordinals: usize,
}

impl RepairReport {
    pub fn is_clean(&self) -> bool {
        *self == RepairReport::default()
    }
}

/// Make a snapshot satisfy the engine's invariants.
///
/// Duplicate nodes and edges are dropped (first occurrence wins), as are
/// edges with a missing endpoint. Within each target, the first edge holding
/// an exclusive role or an ordinal keeps it; later holders are reassigned the
/// way a fresh edge would be.
pub fn repair_snapshot(mut snapshot: CanvasSnapshot, rules: &EdgeRules) -> (CanvasSnapshot, RepairReport) {
    let mut report = RepairReport::default();

    let mut node_ids = HashSet::new();
    snapshot.nodes.retain(|n| {
        let fresh = node_ids.insert(n.id.clone());
        if !fresh {
            report.duplicate_nodes += 1;
        }
        fresh
    });

    let mut edge_ids = HashSet::new();
    snapshot.edges.retain(|e| {
        if !node_ids.contains(&e.source) || !node_ids.contains(&e.target) {
            report.dangling_edges += 1;
            return false;
        }
        let fresh = edge_ids.insert(e.id.clone());
        if !fresh {
            report.duplicate_edges += 1;
        }
        fresh
    });

    repair_edge_slots(&mut snapshot, rules, &mut report);

    if !report.is_clean() {
        log::warn!(
            "Repaired snapshot: dropped {} duplicate node(s), {} duplicate edge(s), {} dangling edge(s); \
             reassigned {} role(s), {} ordinal(s)",
            report.duplicate_nodes,
            report.duplicate_edges,
            report.dangling_edges,
            report.reassigned_roles,
            report.reassigned_ordinals
        );
    }
    (snapshot, report)
}

fn repair_edge_slots(snapshot: &mut CanvasSnapshot, rules: &EdgeRules, report: &mut RepairReport) {
    let mut roles: HashSet<(String, String)> = HashSet::new();
    let mut ordinals: HashSet<(String, EdgeType, u32)> = HashSet::new();

    for i in 0..snapshot.edges.len() {
        let edge = &snapshot.edges[i];
        let id = edge.id.clone();
        let target = edge.target.clone();

        if edge.edge_type == EdgeType::ImageRole {
            if let Some(role) = edge.data.image_role.clone().filter(|r| rules.is_exclusive(r)) {
                if !roles.insert((target.clone(), role)) {
                    snapshot.edges[i].data.image_role = None;
                    resolve_image_role(rules, &mut snapshot.edges, &id);
                    report.reassigned_roles += 1;
                }
            }
            if let Some(role) = snapshot.edges[i].data.image_role.clone().filter(|r| rules.is_exclusive(r)) {
                roles.insert((target.clone(), role));
            }
        }

        let edge = &snapshot.edges[i];
        if edge.edge_type.is_ordinal() {
            let edge_type = edge.edge_type.clone();
            let taken = match edge.ordinal() {
                Some(0) | None => true,
                Some(ordinal) => !ordinals.insert((target.clone(), edge_type.clone(), ordinal)),
            };
            if taken {
                snapshot.edges[i].set_ordinal(None);
                resolve_ordinal(&mut snapshot.edges, &id, None);
                report.reassigned_ordinals += 1;
                if let Some(ordinal) = snapshot.edges[i].ordinal() {
                    ordinals.insert((target, edge_type, ordinal));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{CanvasEdge, CanvasNode, EdgeData, NodeData, Position, Viewport};

    fn node(id: &str) -> CanvasNode {
        CanvasNode {
            id: id.to_string(),
            kind: "text".to_string(),
            position: Position::default(),
            z_index: 1,
            data: NodeData::default(),
        }
    }

    fn edge(id: &str, source: &str, target: &str, edge_type: EdgeType, data: EdgeData) -> CanvasEdge {
        CanvasEdge {
            id: id.to_string(),
            source: source.to_string(),
            target: target.to_string(),
            source_handle: None,
            target_handle: None,
            edge_type,
            data,
        }
    }

    #[test]
    fn test_valid_snapshot() {
        let snapshot = CanvasSnapshot::new(
            vec![node("a"), node("b")],
            vec![edge("e1", "a", "b", EdgeType::Default, EdgeData::default())],
            Viewport::default(),
        );
        assert!(validate_snapshot(&snapshot, &EdgeRules::default()).is_empty());
    }

    #[test]
    fn test_reports_all_issues() {
        let snapshot = CanvasSnapshot::new(
            vec![node("a"), node("a"), node("b"), node("c")],
            vec![
                edge("e1", "a", "missing", EdgeType::Default, EdgeData::default()),
                edge("e2", "a", "b", EdgeType::ImageRole, EdgeData::default().with_image_role("first_frame_image")),
                edge("e3", "c", "b", EdgeType::ImageRole, EdgeData::default().with_image_role("first_frame_image")),
                edge("e4", "a", "c", EdgeType::PromptOrder, EdgeData::default().with_prompt_order(1)),
                edge("e4", "b", "c", EdgeType::PromptOrder, EdgeData::default().with_prompt_order(1)),
            ],
            Viewport::default(),
        );
        let issues = validate_snapshot(&snapshot, &EdgeRules::default());
        assert!(issues.contains(&ValidationIssue::DuplicateNodeId { node_id: "a".into() }));
        assert!(issues.contains(&ValidationIssue::DuplicateEdgeId { edge_id: "e4".into() }));
        assert!(issues.contains(&ValidationIssue::UnknownNode {
            edge_id: "e1".into(),
            node_id: "missing".into()
        }));
        assert!(issues.contains(&ValidationIssue::DuplicateExclusiveRole {
            target: "b".into(),
            role: "first_frame_image".into()
        }));
        assert!(issues.iter().any(|i| matches!(i, ValidationIssue::DuplicateOrdinal { ordinal: 1, .. })));
    }

    #[test]
    fn test_generic_role_may_repeat() {
        let snapshot = CanvasSnapshot::new(
            vec![node("a"), node("b"), node("c")],
            vec![
                edge("e1", "a", "c", EdgeType::ImageRole, EdgeData::default().with_image_role("input_reference")),
                edge("e2", "b", "c", EdgeType::ImageRole, EdgeData::default().with_image_role("input_reference")),
            ],
            Viewport::default(),
        );
        assert!(validate_snapshot(&snapshot, &EdgeRules::default()).is_empty());
    }

    #[test]
    fn test_repair_drops_duplicates_and_dangling() {
        let snapshot = CanvasSnapshot::new(
            vec![node("a"), node("a"), node("b")],
            vec![
                edge("e1", "a", "b", EdgeType::Default, EdgeData::default()),
                edge("e1", "b", "a", EdgeType::Default, EdgeData::default()),
                edge("e2", "a", "gone", EdgeType::Default, EdgeData::default()),
            ],
            Viewport::default(),
        );
        let (repaired, report) = repair_snapshot(snapshot, &EdgeRules::default());
        assert_eq!(repaired.nodes.len(), 2);
        assert_eq!(repaired.edges.len(), 1);
        assert_eq!(repaired.edges[0].source, "a");
        assert_eq!(
            report,
            RepairReport {
                duplicate_nodes: 1,
                duplicate_edges: 1,
                dangling_edges: 1,
                ..RepairReport::default()
            }
        );
        assert!(validate_snapshot(&repaired, &EdgeRules::default()).is_empty());
    }

    #[test]
    fn test_repair_resolves_conflicting_slots() {
        let rules = EdgeRules::default();
        let snapshot = CanvasSnapshot::new(
            vec![node("a"), node("b"), node("c"), node("v"), node("p")],
            vec![
                edge("e1", "a", "v", EdgeType::ImageRole, EdgeData::default().with_image_role("first_frame_image")),
                edge("e2", "b", "v", EdgeType::ImageRole, EdgeData::default().with_image_role("first_frame_image")),
                edge("o1", "a", "p", EdgeType::PromptOrder, EdgeData::default().with_prompt_order(1)),
                edge("o2", "b", "p", EdgeType::PromptOrder, EdgeData::default().with_prompt_order(1)),
                edge("o3", "c", "p", EdgeType::PromptOrder, EdgeData::default()),
            ],
            Viewport::default(),
        );
        assert!(!validate_snapshot(&snapshot, &rules).is_empty());

        let (repaired, report) = repair_snapshot(snapshot, &rules);
        assert_eq!(report.reassigned_roles, 1);
        assert_eq!(report.reassigned_ordinals, 2);
        assert!(!report.is_clean());
        assert!(validate_snapshot(&repaired, &rules).is_empty());

        let find = |id: &str| repaired.edges.iter().find(|e| e.id == id).unwrap();
        // First holder keeps its slot
        assert_eq!(find("e1").data.image_role.as_deref(), Some("first_frame_image"));
        assert_ne!(find("e2").data.image_role.as_deref(), Some("first_frame_image"));
        assert!(find("e2").data.image_role.is_some());
        assert_eq!(find("o1").ordinal(), Some(1));
        let mut rest = vec![find("o2").ordinal().unwrap(), find("o3").ordinal().unwrap()];
        rest.sort_unstable();
        assert_eq!(rest, vec![2, 3]);
    }

    #[test]
    fn test_clean_snapshot_is_untouched() {
        let snapshot = CanvasSnapshot::new(
            vec![node("a"), node("b")],
            vec![edge("o1", "a", "b", EdgeType::ImageOrder, EdgeData::default().with_image_order(1))],
            Viewport::default(),
        );
        let (repaired, report) = repair_snapshot(snapshot.clone(), &EdgeRules::default());
        assert!(report.is_clean());
        assert_eq!(repaired, snapshot);
    }
}
