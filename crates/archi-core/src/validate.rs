//! Referential and temporal checks over a model snapshot. Issues are data:
//! nothing here fails, and `is_valid` only looks at errors.

use std::collections::HashMap;

use serde::Serialize;

use crate::catalog::MetamodelCatalog;
use crate::{Element, ModelSnapshot};

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IssueCode {
    UnknownElementType,
    InvalidElementTimeRange,
    UnknownRelationshipType,
    MissingRelEndpoint,
    InvalidRelTimeRange,
    RelBeforeSource,
    RelBeforeTarget,
    RelAfterSource,
    RelAfterTarget,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ValidationIssue {
    pub severity: Severity,
    pub code: IssueCode,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub element_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub relationship_id: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ValidationSummary {
    pub elements: usize,
    pub relationships: usize,
    pub errors: usize,
    pub warnings: usize,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ValidationReport {
    pub model_id: String,
    pub model_name: String,
    pub is_valid: bool,
    pub summary: ValidationSummary,
    pub issues: Vec<ValidationIssue>,
}

impl ValidationReport {
    pub fn errors(&self) -> impl Iterator<Item = &ValidationIssue> {
        self.issues.iter().filter(|i| i.severity == Severity::Error)
    }

    pub fn warnings(&self) -> impl Iterator<Item = &ValidationIssue> {
        self.issues.iter().filter(|i| i.severity == Severity::Warning)
    }
}

pub fn validate(snapshot: &ModelSnapshot, catalog: &dyn MetamodelCatalog) -> ValidationReport {
    let mut issues = Vec::new();

    for element in &snapshot.elements {
        if catalog.lookup_element_type(&element.type_name).is_none() {
            issues.push(element_issue(
                Severity::Error,
                IssueCode::UnknownElementType,
                format!("Unknown element type '{}'", element.type_name),
                &element.id,
            ));
        }
        if let (Some(from), Some(to)) = (&element.valid_from, &element.valid_to) {
            if from > to {
                issues.push(element_issue(
                    Severity::Error,
                    IssueCode::InvalidElementTimeRange,
                    format!("Element valid_from {} is after valid_to {}", from, to),
                    &element.id,
                ));
            }
        }
    }

    let by_id: HashMap<&str, &Element> = snapshot
        .elements
        .iter()
        .map(|e| (e.id.as_str(), e))
        .collect();

    for rel in &snapshot.relationships {
        let mut push = |severity, code, message: String| {
            issues.push(ValidationIssue {
                severity,
                code,
                message,
                element_id: None,
                relationship_id: Some(rel.id.clone()),
            })
        };

        if catalog.lookup_relationship_type(&rel.type_name).is_none() {
            push(
                Severity::Error,
                IssueCode::UnknownRelationshipType,
                format!("Unknown relationship type '{}'", rel.type_name),
            );
        }

        let source = by_id.get(rel.source_element_id.as_str());
        let target = by_id.get(rel.target_element_id.as_str());
        if source.is_none() || target.is_none() {
            push(
                Severity::Error,
                IssueCode::MissingRelEndpoint,
                format!(
                    "Relationship references missing endpoint ({} -> {})",
                    rel.source_element_id, rel.target_element_id
                ),
            );
        }

        if let (Some(from), Some(to)) = (&rel.valid_from, &rel.valid_to) {
            if from > to {
                push(
                    Severity::Error,
                    IssueCode::InvalidRelTimeRange,
                    format!("Relationship valid_from {} is after valid_to {}", from, to),
                );
            }
        }

        let endpoints = [
            (source, "source", IssueCode::RelBeforeSource, IssueCode::RelAfterSource),
            (target, "target", IssueCode::RelBeforeTarget, IssueCode::RelAfterTarget),
        ];
        for (endpoint, role, before_code, after_code) in endpoints {
            let Some(endpoint) = endpoint else { continue };
            if let (Some(rel_from), Some(end_from)) = (&rel.valid_from, &endpoint.valid_from) {
                if rel_from < end_from {
                    push(
                        Severity::Warning,
                        before_code,
                        format!("Relationship starts before {} element validity", role),
                    );
                }
            }
            if let (Some(rel_to), Some(end_to)) = (&rel.valid_to, &endpoint.valid_to) {
                if rel_to > end_to {
                    push(
                        Severity::Warning,
                        after_code,
                        format!("Relationship ends after {} element validity", role),
                    );
                }
            }
        }
    }

    let errors = issues.iter().filter(|i| i.severity == Severity::Error).count();
    let warnings = issues.len() - errors;
    ValidationReport {
        model_id: snapshot.model.id.clone(),
        model_name: snapshot.model.name.clone(),
        is_valid: errors == 0,
        summary: ValidationSummary {
            elements: snapshot.elements.len(),
            relationships: snapshot.relationships.len(),
            errors,
            warnings,
        },
        issues,
    }
}

fn element_issue(severity: Severity, code: IssueCode, message: String, element_id: &str) -> ValidationIssue {
    ValidationIssue {
        severity,
        code,
        message,
        element_id: Some(element_id.to_string()),
        relationship_id: None,
    }
}
