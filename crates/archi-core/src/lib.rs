pub mod catalog;
pub mod config;
pub mod error;
pub mod interchange;
pub mod query;
pub mod report;
pub mod store;
pub mod validate;

pub use catalog::{ArchimateCatalog, MetamodelCatalog};
pub use error::{ModelError, ModelResult};
pub use store::ModelStore;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Free-form attribute map stored alongside models, elements and relationships.
pub type Attributes = BTreeMap<String, serde_json::Value>;
/// Dictionary-scoped string labels on elements and relationships.
pub type Tags = BTreeMap<String, String>;

// --- Types ---

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Model {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub attributes: Attributes,
    pub created_at: String,
    pub updated_at: String,
    pub current_version: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Element {
    pub id: String,
    pub type_name: String,
    pub name: String,
    #[serde(default)]
    pub attributes: Attributes,
    #[serde(default)]
    pub tags: Tags,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub valid_from: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub valid_to: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Relationship {
    pub id: String,
    pub type_name: String,
    pub source_element_id: String,
    pub target_element_id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub attributes: Attributes,
    #[serde(default)]
    pub tags: Tags,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub valid_from: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub valid_to: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl Element {
    pub fn is_valid_at(&self, at: &str) -> bool {
        interval_contains(self.valid_from.as_deref(), self.valid_to.as_deref(), at)
    }
}

impl Relationship {
    pub fn is_valid_at(&self, at: &str) -> bool {
        interval_contains(self.valid_from.as_deref(), self.valid_to.as_deref(), at)
    }

    pub fn touches(&self, element_id: &str) -> bool {
        self.source_element_id == element_id || self.target_element_id == element_id
    }
}

/// Full state of a model: metadata plus every element and relationship,
/// each ordered by id. Stored verbatim inside every version.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ModelSnapshot {
    pub model: Model,
    #[serde(default)]
    pub elements: Vec<Element>,
    #[serde(default)]
    pub relationships: Vec<Relationship>,
}

impl ModelSnapshot {
    pub fn element(&self, id: &str) -> Option<&Element> {
        self.elements.iter().find(|e| e.id == id)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VersionInfo {
    pub model_id: String,
    pub version: i64,
    pub author: String,
    pub message: String,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Version {
    #[serde(flatten)]
    pub info: VersionInfo,
    pub snapshot: ModelSnapshot,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, schemars::JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum TargetKind {
    Element,
    Relationship,
}

impl TargetKind {
    pub fn as_str(self) -> &'static str {
        match self {
            TargetKind::Element => "element",
            TargetKind::Relationship => "relationship",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "element" => Some(TargetKind::Element),
            "relationship" => Some(TargetKind::Relationship),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AttributeDefinition {
    pub model_id: String,
    pub target: TargetKind,
    pub key: String,
    #[serde(default)]
    pub description: String,
    pub is_tag: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Lock {
    pub model_id: String,
    pub owner: String,
    pub acquired_at: String,
}

// --- Write payloads ---

#[derive(Debug, Clone, Default)]
pub struct NewModel {
    pub id: Option<String>,
    pub name: String,
    pub description: Option<String>,
    pub attributes: Option<Attributes>,
}

/// Partial update of model metadata; `None` leaves the field unchanged.
#[derive(Debug, Clone, Default)]
pub struct ModelPatch {
    pub name: Option<String>,
    pub description: Option<String>,
    pub attributes: Option<Attributes>,
}

#[derive(Debug, Clone, Default)]
pub struct ElementInput {
    pub id: Option<String>,
    pub type_name: String,
    pub name: String,
    pub attributes: Option<Attributes>,
    pub valid_from: Option<String>,
    pub valid_to: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct RelationshipInput {
    pub id: Option<String>,
    pub type_name: String,
    pub source_element_id: String,
    pub target_element_id: String,
    pub name: Option<String>,
    pub attributes: Option<Attributes>,
    pub valid_from: Option<String>,
    pub valid_to: Option<String>,
}

/// Concurrency precondition and version metadata shared by every mutation.
#[derive(Debug, Clone, Default)]
pub struct WriteMeta {
    pub expected_version: Option<i64>,
    pub author: Option<String>,
    pub message: Option<String>,
}

impl WriteMeta {
    pub fn by(author: impl Into<String>) -> Self {
        Self {
            author: Some(author.into()),
            ..Default::default()
        }
    }

    pub fn expecting(mut self, version: i64) -> Self {
        self.expected_version = Some(version);
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

// --- Helpers ---

/// Dates are ISO-8601 strings and compare lexicographically; a missing bound
/// is open-ended.
pub fn interval_contains(from: Option<&str>, to: Option<&str>, at: &str) -> bool {
    from.map_or(true, |f| f <= at) && to.map_or(true, |t| t >= at)
}

/// Clamp a caller-supplied limit into `[1, max]`, falling back to `default`.
pub fn clamp_limit(limit: Option<i64>, default: usize, max: usize) -> usize {
    match limit {
        Some(n) if n < 1 => 1,
        Some(n) => (n as usize).min(max),
        None => default.clamp(1, max),
    }
}

pub(crate) fn now_timestamp() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

pub(crate) fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Round to three decimals, used for density figures.
pub(crate) fn round3(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}

/// Relationships per element, or 0.0 for an empty model.
pub fn density(elements: usize, relationships: usize) -> f64 {
    if elements == 0 {
        0.0
    } else {
        round3(relationships as f64 / elements as f64)
    }
}


#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    const TS: &str = "2024-01-01T00:00:00.000Z";

    pub fn model(id: &str) -> Model {
        Model {
            id: id.to_string(),
            name: format!("Model {}", id),
            description: String::new(),
            attributes: Attributes::new(),
            created_at: TS.to_string(),
            updated_at: TS.to_string(),
            current_version: 1,
        }
    }

    pub fn element(id: &str, type_name: &str) -> Element {
        Element {
            id: id.to_string(),
            type_name: type_name.to_string(),
            name: id.to_uppercase(),
            attributes: Attributes::new(),
            tags: Tags::new(),
            valid_from: None,
            valid_to: None,
            created_at: TS.to_string(),
            updated_at: TS.to_string(),
        }
    }

    pub fn relationship(id: &str, type_name: &str, source: &str, target: &str) -> Relationship {
        Relationship {
            id: id.to_string(),
            type_name: type_name.to_string(),
            source_element_id: source.to_string(),
            target_element_id: target.to_string(),
            name: String::new(),
            attributes: Attributes::new(),
            tags: Tags::new(),
            valid_from: None,
            valid_to: None,
            created_at: TS.to_string(),
            updated_at: TS.to_string(),
        }
    }
}
