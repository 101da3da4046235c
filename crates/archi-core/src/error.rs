use thiserror::Error;

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("{what} '{id}' not found{}", in_model(.model_id))]
    NotFound {
        what: &'static str,
        id: String,
        model_id: Option<String>,
    },
    #[error("Model id '{id}' already exists")]
    AlreadyExists { id: String },
    #[error("Version conflict: expected {expected}, current is {actual}")]
    VersionConflict { expected: i64, actual: i64 },
    #[error("Tag key '{key}' is not defined as a {target} tag in model '{model_id}'")]
    InvalidTagKey {
        model_id: String,
        target: &'static str,
        key: String,
    },
    #[error("Model '{model_id}' is locked by '{owner}'")]
    Locked { model_id: String, owner: String },
    #[error("Lock on model '{model_id}' is owned by '{owner}'")]
    LockOwnerMismatch { model_id: String, owner: String },
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
    #[error("Unknown {target} attribute key '{key}' in model '{model_id}'")]
    UnknownAttributeKey {
        model_id: String,
        target: &'static str,
        key: String,
        known: Vec<String>,
    },
    #[error("Interchange error: {0}")]
    Interchange(String),
    #[error("Storage error: {0}")]
    Storage(#[from] rusqlite::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

fn in_model(model_id: &Option<String>) -> String {
    match model_id {
        Some(id) => format!(" in model '{}'", id),
        None => String::new(),
    }
}

impl ModelError {
    pub fn model_not_found(model_id: &str) -> Self {
        Self::NotFound {
            what: "Model",
            id: model_id.to_string(),
            model_id: None,
        }
    }

    pub fn element_not_found(model_id: &str, element_id: &str) -> Self {
        Self::NotFound {
            what: "Element",
            id: element_id.to_string(),
            model_id: Some(model_id.to_string()),
        }
    }

    pub fn relationship_not_found(model_id: &str, relationship_id: &str) -> Self {
        Self::NotFound {
            what: "Relationship",
            id: relationship_id.to_string(),
            model_id: Some(model_id.to_string()),
        }
    }

    pub fn version_not_found(model_id: &str, version: i64) -> Self {
        Self::NotFound {
            what: "Version",
            id: version.to_string(),
            model_id: Some(model_id.to_string()),
        }
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidArgument(message.into())
    }

    pub fn interchange(message: impl std::fmt::Display) -> Self {
        Self::Interchange(message.to_string())
    }
}

pub type ModelResult<T> = Result<T, ModelError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_names_the_model() {
        let err = ModelError::element_not_found("m1", "e9");
        assert_eq!(err.to_string(), "Element 'e9' not found in model 'm1'");
        assert_eq!(
            ModelError::model_not_found("m1").to_string(),
            "Model 'm1' not found"
        );
    }

    #[test]
    fn conflict_carries_both_versions() {
        let err = ModelError::VersionConflict {
            expected: 2,
            actual: 5,
        };
        assert_eq!(
            err.to_string(),
            "Version conflict: expected 2, current is 5"
        );
    }
}
