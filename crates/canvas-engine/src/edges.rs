//! Edge classification and per-target constraints
//!
//! Classification decides an edge's semantic type; the resolvers keep the
//! per-target invariants intact:
//!
//! - **Exclusive roles**: at most one `imageRole` edge into a target holds a
//!   given exclusive role. A displaced holder moves to a free exclusive role
//!   or is demoted to the generic role.
//! - **Ordinals**: within a (target, type) group every ordinal is unique. New
//!   edges take the smallest free positive integer; a claimed ordinal is
//!   swapped with its previous holder.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::constants::{kinds, roles};
use crate::types::{CanvasEdge, EdgeData, EdgeId, EdgeType};

/// One row of the (source kind, target kind) heuristic table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KindPairRule {
    pub source: String,
    pub target: String,
    #[serde(rename = "type")]
    pub edge_type: EdgeType,
}

/// Host-supplied classification table and role configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EdgeRules {
    /// Heuristic table consulted when neither type nor data decide
    pub pairs: Vec<KindPairRule>,
    /// Host-defined edge type names accepted as explicit types
    pub custom_types: Vec<String>,
    /// Roles at most one edge per target may hold
    pub exclusive_roles: Vec<String>,
    /// Non-exclusive role for displaced holders
    pub generic_role: String,
}

impl Default for EdgeRules {
    fn default() -> Self {
        Self {
            pairs: Vec::new(),
            custom_types: Vec::new(),
            exclusive_roles: roles::EXCLUSIVE_IMAGE_ROLES
                .iter()
                .map(|r| r.to_string())
                .collect(),
            generic_role: roles::GENERIC_IMAGE_ROLE.to_string(),
        }
    }
}

impl EdgeRules {
    /// Table for the text/image → generation-config canvas
    pub fn media_pipeline() -> Self {
        Self::default()
            .with_pair(kinds::TEXT, kinds::IMAGE_CONFIG, EdgeType::PromptOrder)
            .with_pair(kinds::TEXT, kinds::VIDEO_CONFIG, EdgeType::PromptOrder)
            .with_pair(kinds::IMAGE, kinds::IMAGE_CONFIG, EdgeType::ImageOrder)
            .with_pair(kinds::IMAGE, kinds::VIDEO_CONFIG, EdgeType::ImageRole)
    }

    pub fn with_pair(
        mut self,
        source: impl Into<String>,
        target: impl Into<String>,
        edge_type: EdgeType,
    ) -> Self {
        self.pairs.push(KindPairRule {
            source: source.into(),
            target: target.into(),
            edge_type,
        });
        self
    }

    pub fn with_custom_type(mut self, name: impl Into<String>) -> Self {
        self.custom_types.push(name.into());
        self
    }

    /// Built-in types are always recognized; custom ones only if registered
    pub fn is_recognized(&self, edge_type: &EdgeType) -> bool {
        match edge_type {
            EdgeType::Custom(name) => self.custom_types.iter().any(|t| t == name),
            _ => true,
        }
    }

    pub fn is_exclusive(&self, role: &str) -> bool {
        self.exclusive_roles.iter().any(|r| r == role)
    }

    fn lookup(&self, source_kind: &str, target_kind: &str) -> Option<&EdgeType> {
        self.pairs
            .iter()
            .find(|p| p.source == source_kind && p.target == target_kind)
            .map(|p| &p.edge_type)
    }

    /// Infer the type of a new edge.
    ///
    /// Order: recognized explicit type, then role/ordinal keys in the data,
    /// then the kind-pair table. Anything else is `default`.
    pub fn classify(
        &self,
        explicit: Option<&EdgeType>,
        data: &EdgeData,
        source_kind: &str,
        target_kind: &str,
    ) -> EdgeType {
        if let Some(t) = explicit.filter(|t| self.is_recognized(t)) {
            return t.clone();
        }
        if let Some(t) = explicit {
            log::debug!("Ignoring unrecognized edge type '{}'", t);
        }
        if data.image_role.is_some() {
            return EdgeType::ImageRole;
        }
        if data.prompt_order.is_some() {
            return EdgeType::PromptOrder;
        }
        if data.image_order.is_some() {
            return EdgeType::ImageOrder;
        }
        self.lookup(source_kind, target_kind)
            .cloned()
            .unwrap_or_default()
    }

    /// First exclusive role not in `held`
    fn free_exclusive_role(&self, held: &HashSet<&str>) -> Option<String> {
        self.exclusive_roles
            .iter()
            .find(|r| !held.contains(r.as_str()))
            .cloned()
    }
}

fn position_of(edges: &[CanvasEdge], id: &str) -> Option<usize> {
    edges.iter().position(|e| e.id == id)
}

/// Sibling indices: same target and type as `edges[claimant]`, excluding it
fn siblings(edges: &[CanvasEdge], claimant: usize) -> Vec<usize> {
    let target = &edges[claimant].target;
    let edge_type = &edges[claimant].edge_type;
    edges
        .iter()
        .enumerate()
        .filter(|(i, e)| *i != claimant && &e.target == target && &e.edge_type == edge_type)
        .map(|(i, _)| i)
        .collect()
}

/// Enforce role exclusivity after the edge `claimant_id` received its role.
///
/// A claimant without a role gets the first free exclusive role, else the
/// generic one. Returns the ids of edges whose role changed.
pub fn resolve_image_role(rules: &EdgeRules, edges: &mut [CanvasEdge], claimant_id: &str) -> Vec<EdgeId> {
    let Some(ci) = position_of(edges, claimant_id) else {
        return Vec::new();
    };
    if edges[ci].edge_type != EdgeType::ImageRole {
        return Vec::new();
    }
    let sibs = siblings(edges, ci);

    let Some(role) = edges[ci].data.image_role.clone() else {
        let held: HashSet<&str> = sibs
            .iter()
            .filter_map(|&i| edges[i].data.image_role.as_deref())
            .collect();
        let role = rules
            .free_exclusive_role(&held)
            .unwrap_or_else(|| rules.generic_role.clone());
        edges[ci].data.image_role = Some(role);
        return vec![edges[ci].id.clone()];
    };

    if !rules.is_exclusive(&role) {
        return Vec::new();
    }
    let Some(&holder) = sibs
        .iter()
        .find(|&&i| edges[i].data.image_role.as_deref() == Some(role.as_str()))
    else {
        return Vec::new();
    };

    let replacement = {
        let mut held: HashSet<&str> = sibs
            .iter()
            .filter(|&&i| i != holder)
            .filter_map(|&i| edges[i].data.image_role.as_deref())
            .collect();
        held.insert(role.as_str());
        rules
            .free_exclusive_role(&held)
            .unwrap_or_else(|| rules.generic_role.clone())
    };
    log::debug!(
        "Edge '{}' took role '{}' from '{}', which now holds '{}'",
        edges[ci].id,
        role,
        edges[holder].id,
        replacement
    );
    edges[holder].data.image_role = Some(replacement);
    vec![edges[holder].id.clone()]
}

fn smallest_unused(used: &HashSet<u32>) -> u32 {
    (1..).find(|n| !used.contains(n)).unwrap_or(1)
}

/// Enforce ordinal uniqueness after `claimant_id` received its ordinal.
///
/// `previous` is the ordinal the claimant held before the change, if any;
/// a displaced sibling takes it over. Returns the ids of edges whose ordinal
/// changed.
pub fn resolve_ordinal(edges: &mut [CanvasEdge], claimant_id: &str, previous: Option<u32>) -> Vec<EdgeId> {
    let Some(ci) = position_of(edges, claimant_id) else {
        return Vec::new();
    };
    if !edges[ci].edge_type.is_ordinal() {
        return Vec::new();
    }
    let sibs = siblings(edges, ci);
    let used: HashSet<u32> = sibs.iter().filter_map(|&i| edges[i].ordinal()).collect();

    let Some(claimed) = edges[ci].ordinal() else {
        let ordinal = smallest_unused(&used);
        edges[ci].set_ordinal(Some(ordinal));
        return vec![edges[ci].id.clone()];
    };

    let Some(&holder) = sibs.iter().find(|&&i| edges[i].ordinal() == Some(claimed)) else {
        return Vec::new();
    };

    let mut others: HashSet<u32> = sibs
        .iter()
        .filter(|&&i| i != holder)
        .filter_map(|&i| edges[i].ordinal())
        .collect();
    others.insert(claimed);
    let replacement = match previous {
        Some(p) if !others.contains(&p) => p,
        _ => smallest_unused(&others),
    };
    log::debug!(
        "Edge '{}' claimed {} #{} from '{}', which moves to #{}",
        edges[ci].id,
        edges[ci].edge_type,
        claimed,
        edges[holder].id,
        replacement
    );
    edges[holder].set_ordinal(Some(replacement));
    vec![edges[holder].id.clone()]
}

/// Run whichever resolver applies to the edge's type
pub fn resolve_constraints(
    rules: &EdgeRules,
    edges: &mut [CanvasEdge],
    claimant_id: &str,
    previous_ordinal: Option<u32>,
) -> Vec<EdgeId> {
    let Some(ci) = position_of(edges, claimant_id) else {
        return Vec::new();
    };
    match edges[ci].edge_type {
        EdgeType::ImageRole => resolve_image_role(rules, edges, claimant_id),
        EdgeType::PromptOrder | EdgeType::ImageOrder => {
            resolve_ordinal(edges, claimant_id, previous_ordinal)
        }
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

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

    fn role_of<'a>(edges: &'a [CanvasEdge], id: &str) -> Option<&'a str> {
        edges.iter().find(|e| e.id == id).and_then(|e| e.data.image_role.as_deref())
    }

    fn ordinal_of(edges: &[CanvasEdge], id: &str) -> Option<u32> {
        edges.iter().find(|e| e.id == id).and_then(|e| e.ordinal())
    }

    #[test]
    fn test_classify_order() {
        let rules = EdgeRules::media_pipeline().with_custom_type("styleRef");

        let explicit = rules.classify(Some(&EdgeType::ImageOrder), &EdgeData::default(), "text", "imageConfig");
        assert_eq!(explicit, EdgeType::ImageOrder);

        let custom = EdgeType::from("styleRef");
        assert_eq!(rules.classify(Some(&custom), &EdgeData::default(), "a", "b"), custom);

        let unknown = EdgeType::from("mystery");
        let by_data = rules.classify(Some(&unknown), &EdgeData::default().with_image_role("x"), "a", "b");
        assert_eq!(by_data, EdgeType::ImageRole);

        let by_table = rules.classify(None, &EdgeData::default(), "text", "imageConfig");
        assert_eq!(by_table, EdgeType::PromptOrder);

        let fallback = rules.classify(None, &EdgeData::default(), "text", "text");
        assert_eq!(fallback, EdgeType::Default);
    }

    #[test]
    fn test_role_defaults_to_first_free_exclusive_then_generic() {
        let rules = EdgeRules::default();
        let mut edges = vec![edge("e1", "a", "t", EdgeType::ImageRole, EdgeData::default())];
        resolve_image_role(&rules, &mut edges, "e1");
        assert_eq!(role_of(&edges, "e1"), Some("first_frame_image"));

        edges.push(edge("e2", "b", "t", EdgeType::ImageRole, EdgeData::default()));
        resolve_image_role(&rules, &mut edges, "e2");
        assert_eq!(role_of(&edges, "e2"), Some("last_frame_image"));

        edges.push(edge("e3", "c", "t", EdgeType::ImageRole, EdgeData::default()));
        resolve_image_role(&rules, &mut edges, "e3");
        assert_eq!(role_of(&edges, "e3"), Some("input_reference"));
    }

    #[test]
    fn test_claiming_held_role_flips_holder_to_alternate() {
        let rules = EdgeRules::default();
        let mut edges = vec![edge(
            "e1",
            "a",
            "t",
            EdgeType::ImageRole,
            EdgeData::default().with_image_role("first_frame_image"),
        )];
        edges.push(edge(
            "e2",
            "b",
            "t",
            EdgeType::ImageRole,
            EdgeData::default().with_image_role("first_frame_image"),
        ));
        let changed = resolve_image_role(&rules, &mut edges, "e2");
        assert_eq!(changed, vec!["e1".to_string()]);
        assert_eq!(role_of(&edges, "e2"), Some("first_frame_image"));
        assert_eq!(role_of(&edges, "e1"), Some("last_frame_image"));
    }

    #[test]
    fn test_displaced_holder_demoted_when_no_alternate_free() {
        let rules = EdgeRules::default();
        let mut edges = vec![
            edge("e1", "a", "t", EdgeType::ImageRole, EdgeData::default().with_image_role("first_frame_image")),
            edge("e2", "b", "t", EdgeType::ImageRole, EdgeData::default().with_image_role("last_frame_image")),
            edge("e3", "c", "t", EdgeType::ImageRole, EdgeData::default().with_image_role("first_frame_image")),
        ];
        resolve_image_role(&rules, &mut edges, "e3");
        assert_eq!(role_of(&edges, "e1"), Some("input_reference"));
        assert_eq!(role_of(&edges, "e2"), Some("last_frame_image"));
        assert_eq!(role_of(&edges, "e3"), Some("first_frame_image"));
    }

    #[test]
    fn test_roles_are_scoped_per_target() {
        let rules = EdgeRules::default();
        let mut edges = vec![
            edge("e1", "a", "t1", EdgeType::ImageRole, EdgeData::default().with_image_role("first_frame_image")),
            edge("e2", "b", "t2", EdgeType::ImageRole, EdgeData::default().with_image_role("first_frame_image")),
        ];
        assert!(resolve_image_role(&rules, &mut edges, "e2").is_empty());
        assert_eq!(role_of(&edges, "e1"), Some("first_frame_image"));
    }

    #[test]
    fn test_ordinals_assigned_in_creation_order() {
        let mut edges = Vec::new();
        for id in ["e1", "e2", "e3"] {
            edges.push(edge(id, id, "t", EdgeType::PromptOrder, EdgeData::default()));
            resolve_ordinal(&mut edges, id, None);
        }
        assert_eq!(ordinal_of(&edges, "e1"), Some(1));
        assert_eq!(ordinal_of(&edges, "e2"), Some(2));
        assert_eq!(ordinal_of(&edges, "e3"), Some(3));
    }

    #[test]
    fn test_claiming_held_ordinal_swaps() {
        let mut edges = vec![
            edge("e1", "a", "t", EdgeType::ImageOrder, EdgeData::default().with_image_order(1)),
            edge("e2", "b", "t", EdgeType::ImageOrder, EdgeData::default().with_image_order(2)),
            edge("e3", "c", "t", EdgeType::ImageOrder, EdgeData::default().with_image_order(3)),
        ];
        edges[2].set_ordinal(Some(1));
        let changed = resolve_ordinal(&mut edges, "e3", Some(3));
        assert_eq!(changed, vec!["e1".to_string()]);
        assert_eq!(ordinal_of(&edges, "e3"), Some(1));
        assert_eq!(ordinal_of(&edges, "e1"), Some(3));
        assert_eq!(ordinal_of(&edges, "e2"), Some(2));
    }

    #[test]
    fn test_new_edge_claiming_held_ordinal_displaces_to_smallest_free() {
        let mut edges = vec![
            edge("e1", "a", "t", EdgeType::PromptOrder, EdgeData::default().with_prompt_order(1)),
            edge("e2", "b", "t", EdgeType::PromptOrder, EdgeData::default().with_prompt_order(1)),
        ];
        resolve_ordinal(&mut edges, "e2", None);
        assert_eq!(ordinal_of(&edges, "e2"), Some(1));
        assert_eq!(ordinal_of(&edges, "e1"), Some(2));
    }

    #[test]
    fn test_ordinal_groups_split_by_type() {
        let mut edges = vec![
            edge("p", "a", "t", EdgeType::PromptOrder, EdgeData::default().with_prompt_order(1)),
            edge("i", "b", "t", EdgeType::ImageOrder, EdgeData::default()),
        ];
        resolve_ordinal(&mut edges, "i", None);
        assert_eq!(ordinal_of(&edges, "i"), Some(1));
        assert_eq!(ordinal_of(&edges, "p"), Some(1));
    }

    #[test]
    fn test_gap_is_reused() {
        let mut edges = vec![
            edge("e1", "a", "t", EdgeType::PromptOrder, EdgeData::default().with_prompt_order(1)),
            edge("e3", "c", "t", EdgeType::PromptOrder, EdgeData::default().with_prompt_order(3)),
            edge("new", "d", "t", EdgeType::PromptOrder, EdgeData::default()),
        ];
        resolve_ordinal(&mut edges, "new", None);
        assert_eq!(ordinal_of(&edges, "new"), Some(2));
    }
}
