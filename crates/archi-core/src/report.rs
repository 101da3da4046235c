use std::collections::{BTreeMap, HashMap};

use serde::Serialize;

use crate::catalog::MetamodelCatalog;
use crate::validate::{self, ValidationSummary};
use crate::{density, ModelSnapshot};

const TOP_CONNECTED: usize = 10;
const LOW_DENSITY: f64 = 0.5;
const CORE_LAYERS: [&str; 3] = ["Business", "Application", "Technology"];
const UNKNOWN_LAYER: &str = "Unknown";

#[derive(Debug, Clone, Copy, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Totals {
    pub elements: usize,
    pub relationships: usize,
    pub relationship_density: f64,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct TypeCount {
    #[serde(rename = "type")]
    pub type_name: String,
    pub count: usize,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct LayerCount {
    pub layer: String,
    pub count: usize,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ConnectedElement {
    pub element_id: String,
    pub name: String,
    pub degree: usize,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ModelReport {
    pub model_id: String,
    pub totals: Totals,
    pub by_element_type: Vec<TypeCount>,
    pub by_relationship_type: Vec<TypeCount>,
    pub by_layer: Vec<LayerCount>,
    pub top_connected_elements: Vec<ConnectedElement>,
    pub validation_summary: ValidationSummary,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum InsightKind {
    ModelBootstrap,
    Connectivity,
    LayerCoverage,
    Validation,
    TemporalConsistency,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Suggestion {
    #[serde(rename = "type")]
    pub kind: InsightKind,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Insights {
    pub model_id: String,
    pub suggestions: Vec<Suggestion>,
}

pub fn generate_report(snapshot: &ModelSnapshot, catalog: &dyn MetamodelCatalog) -> ModelReport {
    let by_element_type = ranked(snapshot.elements.iter().map(|e| e.type_name.clone()))
        .into_iter()
        .map(|(type_name, count)| TypeCount { type_name, count })
        .collect();
    let by_relationship_type = ranked(snapshot.relationships.iter().map(|r| r.type_name.clone()))
        .into_iter()
        .map(|(type_name, count)| TypeCount { type_name, count })
        .collect();
    let by_layer = ranked(snapshot.elements.iter().map(|e| {
        catalog
            .lookup_element_type(&e.type_name)
            .map_or(UNKNOWN_LAYER, |t| t.layer)
            .to_string()
    }))
    .into_iter()
    .map(|(layer, count)| LayerCount { layer, count })
    .collect();

    let mut degree: HashMap<&str, usize> = snapshot.elements.iter().map(|e| (e.id.as_str(), 0)).collect();
    for rel in &snapshot.relationships {
        for end in [&rel.source_element_id, &rel.target_element_id] {
            if let Some(d) = degree.get_mut(end.as_str()) {
                *d += 1;
            }
        }
    }
    let mut top_connected_elements: Vec<ConnectedElement> = snapshot
        .elements
        .iter()
        .map(|e| ConnectedElement {
            element_id: e.id.clone(),
            name: e.name.clone(),
            degree: degree.get(e.id.as_str()).copied().unwrap_or(0),
        })
        .collect();
    top_connected_elements.sort_by(|a, b| b.degree.cmp(&a.degree).then_with(|| a.element_id.cmp(&b.element_id)));
    top_connected_elements.truncate(TOP_CONNECTED);

    let validation = validate::validate(snapshot, catalog);
    ModelReport {
        model_id: snapshot.model.id.clone(),
        totals: Totals {
            elements: snapshot.elements.len(),
            relationships: snapshot.relationships.len(),
            relationship_density: density(snapshot.elements.len(), snapshot.relationships.len()),
        },
        by_element_type,
        by_relationship_type,
        by_layer,
        top_connected_elements,
        validation_summary: validation.summary,
    }
}

/// Heuristic suggestions, in rule order.
pub fn generate_insights(report: &ModelReport) -> Insights {
    let mut suggestions = Vec::new();
    let mut suggest = |kind, message: String| suggestions.push(Suggestion { kind, message });
    let totals = report.totals;

    if totals.elements == 0 {
        suggest(
            InsightKind::ModelBootstrap,
            "The model is empty. Start by adding core business, application and technology elements.".into(),
        );
    }
    if totals.elements > 0 && totals.relationship_density < LOW_DENSITY {
        suggest(
            InsightKind::Connectivity,
            "Relationship density is low. Add explicit dependencies (Serving, Realization, Access) to improve traceability.".into(),
        );
    }
    for layer in CORE_LAYERS {
        if !report.by_layer.iter().any(|l| l.layer == layer) {
            suggest(
                InsightKind::LayerCoverage,
                format!("No {} layer elements detected. Consider adding them for cross-layer views.", layer),
            );
        }
    }
    if report.validation_summary.errors > 0 {
        suggest(
            InsightKind::Validation,
            "Resolve validation errors before publishing or exporting the model.".into(),
        );
    }
    if report.validation_summary.warnings > 0 {
        suggest(
            InsightKind::TemporalConsistency,
            "Temporal inconsistencies were detected. Align relationship validity windows with their source and target elements.".into(),
        );
    }

    Insights {
        model_id: report.model_id.clone(),
        suggestions,
    }
}

/// Count occurrences, ordered by count descending then key ascending.
fn ranked(keys: impl Iterator<Item = String>) -> Vec<(String, usize)> {
    let mut counts: BTreeMap<String, usize> = BTreeMap::new();
    for key in keys {
        *counts.entry(key).or_default() += 1;
    }
    let mut ranked: Vec<(String, usize)> = counts.into_iter().collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    ranked
}
