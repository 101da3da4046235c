//! Read-side graph queries over a [`ModelSnapshot`]: filtered search,
//! neighbors, bounded reachability, temporal slices and summary stats.

use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};

use serde::{Deserialize, Serialize};

use crate::catalog::MetamodelCatalog;
use crate::error::{ModelError, ModelResult};
use crate::{clamp_limit, density, Element, ModelSnapshot, Relationship, Tags};

pub const DEFAULT_SEARCH_LIMIT: usize = 200;
pub const MAX_SEARCH_LIMIT: usize = 1000;
pub const DEFAULT_PATH_DEPTH: usize = 5;
pub const MAX_PATH_DEPTH: usize = 10;
pub const DEFAULT_SLICE_LIMIT: usize = 1000;
pub const MAX_SLICE_LIMIT: usize = 2000;

#[derive(Debug, Clone, Default)]
pub struct ElementFilter {
    pub type_name: Option<String>,
    pub layer: Option<String>,
    pub aspect: Option<String>,
    pub attribute_key: Option<String>,
    pub attribute_value: Option<String>,
    pub tag_key: Option<String>,
    pub tag_value: Option<String>,
    /// Substring of id, name or type name.
    pub search: Option<String>,
    pub valid_at: Option<String>,
    pub limit: Option<i64>,
}

#[derive(Debug, Clone, Default)]
pub struct RelationshipFilter {
    pub type_name: Option<String>,
    pub category: Option<String>,
    pub source_element_id: Option<String>,
    pub target_element_id: Option<String>,
    pub tag_key: Option<String>,
    pub tag_value: Option<String>,
    pub valid_at: Option<String>,
    pub limit: Option<i64>,
}

/// An element with its catalog classification attached.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ElementHit {
    #[serde(flatten)]
    pub element: Element,
    pub metamodel_layer: Option<&'static str>,
    pub metamodel_aspect: Option<&'static str>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RelationshipHit {
    #[serde(flatten)]
    pub relationship: Relationship,
    pub metamodel_category: Option<&'static str>,
    pub metamodel_directed: Option<bool>,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, schemars::JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Out,
    In,
    #[default]
    Both,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Neighbors {
    pub element_id: String,
    pub direction: Direction,
    pub neighbors: Vec<Element>,
    pub relationships: Vec<Relationship>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PathStep {
    pub from: String,
    pub to: String,
    pub relationship_id: String,
    pub relationship_type: String,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PathResult {
    pub exists: bool,
    pub depth: Option<usize>,
    pub path: Vec<PathStep>,
    pub max_depth: usize,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TemporalSlice {
    pub model_id: String,
    pub valid_at: String,
    pub elements: Vec<ElementHit>,
    pub relationships: Vec<Relationship>,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct StatCounts {
    pub elements: usize,
    pub relationships: usize,
    pub element_types: usize,
    pub relationship_types: usize,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ModelStats {
    pub model_id: String,
    pub counts: StatCounts,
    pub density: f64,
}

// --- Search ---

pub fn search_elements(
    snapshot: &ModelSnapshot,
    filter: &ElementFilter,
    catalog: &dyn MetamodelCatalog,
) -> Vec<ElementHit> {
    let limit = clamp_limit(filter.limit, DEFAULT_SEARCH_LIMIT, MAX_SEARCH_LIMIT);
    let needle = filter.search.as_deref().map(str::to_lowercase);

    snapshot
        .elements
        .iter()
        .map(|element| {
            let meta = catalog.lookup_element_type(&element.type_name);
            (element, meta)
        })
        .filter(|(element, meta)| {
            if !matches_ci(filter.type_name.as_deref(), &element.type_name) {
                return false;
            }
            if let Some(layer) = filter.layer.as_deref() {
                if !meta.is_some_and(|m| m.layer.eq_ignore_ascii_case(layer)) {
                    return false;
                }
            }
            if let Some(aspect) = filter.aspect.as_deref() {
                if !meta.is_some_and(|m| m.aspect.eq_ignore_ascii_case(aspect)) {
                    return false;
                }
            }
            if let Some(key) = filter.attribute_key.as_deref() {
                match element.attributes.get(key) {
                    None | Some(serde_json::Value::Null) => return false,
                    Some(value) => {
                        if let Some(expected) = filter.attribute_value.as_deref() {
                            if !value_text(value).eq_ignore_ascii_case(expected) {
                                return false;
                            }
                        }
                    }
                }
            }
            if !matches_tags(&element.tags, filter.tag_key.as_deref(), filter.tag_value.as_deref()) {
                return false;
            }
            if let Some(needle) = needle.as_deref() {
                let hit = [&element.id, &element.name, &element.type_name]
                    .iter()
                    .any(|field| field.to_lowercase().contains(needle));
                if !hit {
                    return false;
                }
            }
            filter.valid_at.as_deref().map_or(true, |at| element.is_valid_at(at))
        })
        .take(limit)
        .map(|(element, meta)| ElementHit {
            element: element.clone(),
            metamodel_layer: meta.map(|m| m.layer),
            metamodel_aspect: meta.map(|m| m.aspect),
        })
        .collect()
}

pub fn search_relationships(
    snapshot: &ModelSnapshot,
    filter: &RelationshipFilter,
    catalog: &dyn MetamodelCatalog,
) -> Vec<RelationshipHit> {
    let limit = clamp_limit(filter.limit, DEFAULT_SEARCH_LIMIT, MAX_SEARCH_LIMIT);

    snapshot
        .relationships
        .iter()
        .map(|rel| (rel, catalog.lookup_relationship_type(&rel.type_name)))
        .filter(|(rel, meta)| {
            if !matches_ci(filter.type_name.as_deref(), &rel.type_name) {
                return false;
            }
            if let Some(category) = filter.category.as_deref() {
                if !meta.is_some_and(|m| m.category.eq_ignore_ascii_case(category)) {
                    return false;
                }
            }
            if filter
                .source_element_id
                .as_deref()
                .is_some_and(|id| id != rel.source_element_id)
            {
                return false;
            }
            if filter
                .target_element_id
                .as_deref()
                .is_some_and(|id| id != rel.target_element_id)
            {
                return false;
            }
            if !matches_tags(&rel.tags, filter.tag_key.as_deref(), filter.tag_value.as_deref()) {
                return false;
            }
            filter.valid_at.as_deref().map_or(true, |at| rel.is_valid_at(at))
        })
        .take(limit)
        .map(|(rel, meta)| RelationshipHit {
            relationship: rel.clone(),
            metamodel_category: meta.map(|m| m.category),
            metamodel_directed: meta.map(|m| m.directed),
        })
        .collect()
}

// --- Graph traversal ---

/// Relationships touching `element_id` in the given direction, plus the
/// elements on their other ends. Self-loops are listed as relationships but
/// never add the origin to the neighbor set.
pub fn neighbors(
    snapshot: &ModelSnapshot,
    element_id: &str,
    direction: Direction,
    relationship_type: Option<&str>,
    limit: Option<i64>,
) -> ModelResult<Neighbors> {
    if snapshot.element(element_id).is_none() {
        return Err(ModelError::element_not_found(&snapshot.model.id, element_id));
    }
    let limit = clamp_limit(limit, DEFAULT_SEARCH_LIMIT, MAX_SEARCH_LIMIT);

    let relationships: Vec<Relationship> = snapshot
        .relationships
        .iter()
        .filter(|rel| matches_ci(relationship_type, &rel.type_name))
        .filter(|rel| match direction {
            Direction::Out => rel.source_element_id == element_id,
            Direction::In => rel.target_element_id == element_id,
            Direction::Both => rel.touches(element_id),
        })
        .take(limit)
        .cloned()
        .collect();

    let mut neighbor_ids: BTreeSet<&str> = BTreeSet::new();
    for rel in &relationships {
        for end in [&rel.source_element_id, &rel.target_element_id] {
            if end != element_id {
                neighbor_ids.insert(end.as_str());
            }
        }
    }
    let neighbors = snapshot
        .elements
        .iter()
        .filter(|e| neighbor_ids.contains(e.id.as_str()))
        .cloned()
        .collect();

    Ok(Neighbors {
        element_id: element_id.to_string(),
        direction,
        neighbors,
        relationships,
    })
}

/// Breadth-first search along relationship direction. States are
/// `(node, depth)` pairs, so a node may be expanded again at a greater
/// depth; the state space is bounded by `nodes * (max_depth + 1)`.
pub fn path_exists(
    snapshot: &ModelSnapshot,
    source: &str,
    target: &str,
    max_depth: Option<i64>,
) -> PathResult {
    let max_depth = clamp_limit(max_depth, DEFAULT_PATH_DEPTH, MAX_PATH_DEPTH);

    let mut adjacency: HashMap<&str, Vec<&Relationship>> = HashMap::new();
    for rel in &snapshot.relationships {
        adjacency
            .entry(rel.source_element_id.as_str())
            .or_default()
            .push(rel);
    }

    let mut queue: VecDeque<(&str, usize, Vec<&Relationship>)> = VecDeque::new();
    let mut visited: HashSet<(&str, usize)> = HashSet::new();
    queue.push_back((source, 0, Vec::new()));
    visited.insert((source, 0));

    while let Some((node, depth, path)) = queue.pop_front() {
        if node == target {
            return PathResult {
                exists: true,
                depth: Some(depth),
                path: path
                    .iter()
                    .map(|rel| PathStep {
                        from: rel.source_element_id.clone(),
                        to: rel.target_element_id.clone(),
                        relationship_id: rel.id.clone(),
                        relationship_type: rel.type_name.clone(),
                    })
                    .collect(),
                max_depth,
            };
        }
        if depth >= max_depth {
            continue;
        }
        for &rel in adjacency.get(node).map(Vec::as_slice).unwrap_or_default() {
            let next = rel.target_element_id.as_str();
            if visited.insert((next, depth + 1)) {
                let mut next_path = path.clone();
                next_path.push(rel);
                queue.push_back((next, depth + 1, next_path));
            }
        }
    }

    PathResult {
        exists: false,
        depth: None,
        path: Vec::new(),
        max_depth,
    }
}

pub fn temporal_slice(
    snapshot: &ModelSnapshot,
    valid_at: &str,
    layer: Option<&str>,
    element_limit: Option<i64>,
    relationship_limit: Option<i64>,
    catalog: &dyn MetamodelCatalog,
) -> TemporalSlice {
    let element_limit = clamp_limit(element_limit, DEFAULT_SLICE_LIMIT, MAX_SLICE_LIMIT);
    let relationship_limit = clamp_limit(relationship_limit, DEFAULT_SLICE_LIMIT, MAX_SLICE_LIMIT);

    let elements = snapshot
        .elements
        .iter()
        .filter(|e| e.is_valid_at(valid_at))
        .filter_map(|e| {
            let meta = catalog.lookup_element_type(&e.type_name);
            let in_layer =
                layer.map_or(true, |l| meta.is_some_and(|m| m.layer.eq_ignore_ascii_case(l.trim())));
            in_layer.then(|| ElementHit {
                element: e.clone(),
                metamodel_layer: meta.map(|m| m.layer),
                metamodel_aspect: meta.map(|m| m.aspect),
            })
        })
        .take(element_limit)
        .collect();

    let relationships = snapshot
        .relationships
        .iter()
        .filter(|r| r.is_valid_at(valid_at))
        .take(relationship_limit)
        .cloned()
        .collect();

    TemporalSlice {
        model_id: snapshot.model.id.clone(),
        valid_at: valid_at.to_string(),
        elements,
        relationships,
    }
}

pub fn model_stats(snapshot: &ModelSnapshot) -> ModelStats {
    let element_types: HashSet<&str> = snapshot.elements.iter().map(|e| e.type_name.as_str()).collect();
    let relationship_types: HashSet<&str> = snapshot
        .relationships
        .iter()
        .map(|r| r.type_name.as_str())
        .collect();
    ModelStats {
        model_id: snapshot.model.id.clone(),
        counts: StatCounts {
            elements: snapshot.elements.len(),
            relationships: snapshot.relationships.len(),
            element_types: element_types.len(),
            relationship_types: relationship_types.len(),
        },
        density: density(snapshot.elements.len(), snapshot.relationships.len()),
    }
}

// --- Helpers ---

fn matches_ci(wanted: Option<&str>, actual: &str) -> bool {
    wanted.map_or(true, |w| w.trim().eq_ignore_ascii_case(actual))
}

fn matches_tags(tags: &Tags, key: Option<&str>, value: Option<&str>) -> bool {
    match (key, value) {
        (None, None) => true,
        (Some(key), None) => tags.contains_key(key),
        (Some(key), Some(value)) => tags.get(key).is_some_and(|v| v.eq_ignore_ascii_case(value)),
        (None, Some(value)) => tags.values().any(|v| v.eq_ignore_ascii_case(value)),
    }
}

/// Text form used for attribute value comparison: strings as-is, other JSON
/// values in their serialized form.
fn value_text(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::ArchimateCatalog;
    use crate::test_support::{element, model, relationship};

    fn graph(edges: &[(&str, &str, &str)]) -> ModelSnapshot {
        let mut ids: BTreeSet<&str> = BTreeSet::new();
        for &(_, s, t) in edges {
            ids.insert(s);
            ids.insert(t);
        }
        ModelSnapshot {
            model: model("m1"),
            elements: ids.iter().map(|id| element(id, "Node")).collect(),
            relationships: edges
                .iter()
                .map(|(id, s, t)| relationship(id, "Flow", s, t))
                .collect(),
        }
    }

    #[test]
    fn path_to_self_is_depth_zero() {
        let snap = graph(&[("r1", "a", "b")]);
        let result = path_exists(&snap, "a", "a", Some(0));
        assert!(result.exists);
        assert_eq!(result.depth, Some(0));
        assert!(result.path.is_empty());
        assert_eq!(result.max_depth, 1);
    }

    #[test]
    fn cycle_terminates_without_path() {
        let snap = graph(&[("r1", "a", "b"), ("r2", "b", "a")]);
        let result = path_exists(&snap, "a", "c", Some(10));
        assert!(!result.exists);
        assert_eq!(result.depth, None);
    }

    #[test]
    fn shortest_path_found_first() {
        let snap = graph(&[
            ("r1", "a", "b"),
            ("r2", "b", "c"),
            ("r3", "c", "d"),
            ("r4", "a", "d"),
        ]);
        let result = path_exists(&snap, "a", "d", None);
        assert_eq!(result.depth, Some(1));
        assert_eq!(result.path[0].relationship_id, "r4");
        assert_eq!(result.path[0].relationship_type, "Flow");
    }

    #[test]
    fn depth_limit_cuts_search() {
        let snap = graph(&[("r1", "a", "b"), ("r2", "b", "c"), ("r3", "c", "d")]);
        assert!(!path_exists(&snap, "a", "d", Some(2)).exists);
        let found = path_exists(&snap, "a", "d", Some(3));
        assert_eq!(found.depth, Some(3));
        let hops: Vec<(&str, &str)> = found
            .path
            .iter()
            .map(|s| (s.from.as_str(), s.to.as_str()))
            .collect();
        assert_eq!(hops, vec![("a", "b"), ("b", "c"), ("c", "d")]);
    }

    #[test]
    fn edges_are_followed_forward_only() {
        let snap = graph(&[("r1", "b", "a")]);
        assert!(!path_exists(&snap, "a", "b", None).exists);
    }

    #[test]
    fn neighbors_respect_direction_and_self_loops() {
        let snap = graph(&[("r1", "a", "b"), ("r2", "c", "a"), ("r3", "a", "a")]);

        let out = neighbors(&snap, "a", Direction::Out, None, None).unwrap();
        let out_ids: Vec<&str> = out.neighbors.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(out_ids, vec!["b"]);
        assert_eq!(out.relationships.len(), 2);

        let both = neighbors(&snap, "a", Direction::Both, None, None).unwrap();
        let both_ids: Vec<&str> = both.neighbors.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(both_ids, vec!["b", "c"]);
        assert_eq!(both.relationships.len(), 3);

        let typed = neighbors(&snap, "a", Direction::Both, Some("serving"), None).unwrap();
        assert!(typed.neighbors.is_empty());
    }

    #[test]
    fn neighbors_of_missing_element_fail() {
        let snap = graph(&[("r1", "a", "b")]);
        let err = neighbors(&snap, "zz", Direction::Both, None, None).unwrap_err();
        assert!(matches!(err, ModelError::NotFound { .. }));
    }

    #[test]
    fn element_search_filters() {
        let mut snap = graph(&[]);
        let mut app = element("app", "Application Component");
        app.name = "Billing".into();
        app.attributes.insert("owner".into(), serde_json::json!("Finance"));
        app.tags.insert("tier".into(), "gold".into());
        let mut actor = element("cust", "Business Actor");
        actor.valid_from = Some("2025-01-01".into());
        snap.elements = vec![app, actor];

        let catalog = ArchimateCatalog;
        let by_layer = ElementFilter {
            layer: Some("application".into()),
            ..Default::default()
        };
        let hits = search_elements(&snap, &by_layer, &catalog);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].metamodel_aspect, Some("Active Structure"));

        let by_attr = ElementFilter {
            attribute_key: Some("owner".into()),
            attribute_value: Some("finance".into()),
            ..Default::default()
        };
        assert_eq!(search_elements(&snap, &by_attr, &catalog).len(), 1);

        let by_tag = ElementFilter {
            tag_key: Some("tier".into()),
            tag_value: Some("silver".into()),
            ..Default::default()
        };
        assert!(search_elements(&snap, &by_tag, &catalog).is_empty());

        let by_text = ElementFilter {
            search: Some("BILL".into()),
            ..Default::default()
        };
        assert_eq!(search_elements(&snap, &by_text, &catalog)[0].element.id, "app");

        let at = ElementFilter {
            valid_at: Some("2024-06-01".into()),
            ..Default::default()
        };
        let ids: Vec<String> = search_elements(&snap, &at, &catalog)
            .into_iter()
            .map(|h| h.element.id)
            .collect();
        assert_eq!(ids, vec!["app".to_string()]);
    }

    #[test]
    fn relationship_search_by_category() {
        let mut snap = graph(&[("r1", "a", "b")]);
        snap.relationships.push(relationship("r2", "Serving", "b", "a"));
        let filter = RelationshipFilter {
            category: Some("dependency".into()),
            ..Default::default()
        };
        let hits = search_relationships(&snap, &filter, &ArchimateCatalog);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].relationship.id, "r2");
        assert_eq!(hits[0].metamodel_directed, Some(true));
    }

    #[test]
    fn slice_and_stats() {
        let mut snap = graph(&[("r1", "a", "b"), ("r2", "b", "c")]);
        snap.elements[2].valid_to = Some("2020-01-01".into());
        snap.relationships[1].valid_from = Some("2030-01-01".into());

        let slice = temporal_slice(&snap, "2024-01-01", None, None, None, &ArchimateCatalog);
        assert_eq!(slice.elements.len(), 2);
        assert_eq!(slice.relationships.len(), 1);

        let none = temporal_slice(&snap, "2024-01-01", Some("Business"), None, None, &ArchimateCatalog);
        assert!(none.elements.is_empty());

        let stats = model_stats(&snap);
        assert_eq!(stats.counts.elements, 3);
        assert_eq!(stats.counts.element_types, 1);
        assert_eq!(stats.density, 0.667);
    }
}
