use std::time::{Duration, Instant};

use serde::Serialize;

/// Per-connection conversational state: the model a caller is working on
/// and the last mutation it made. Owned by the server, never global.
#[derive(Debug, Clone)]
pub struct SessionContext {
    current_model: Option<String>,
    last_mutation: Option<MutationRecord>,
    mutation_ttl: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MutationRecord {
    pub tool: String,
    pub model_id: String,
    pub version: Option<i64>,
    pub at: Instant,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MutationView {
    pub tool: String,
    pub model_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<i64>,
    pub age_seconds: u64,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SessionView {
    pub current_model: Option<String>,
    pub recent_mutation: Option<MutationView>,
}

impl SessionContext {
    pub fn new(mutation_ttl: Duration) -> Self {
        Self {
            current_model: None,
            last_mutation: None,
            mutation_ttl,
        }
    }

    pub fn current_model(&self) -> Option<&str> {
        self.current_model.as_deref()
    }

    pub fn select_model(&mut self, model_id: impl Into<String>) {
        self.current_model = Some(model_id.into());
    }

    pub fn clear_model(&mut self) {
        self.current_model = None;
    }

    /// Drop any state that refers to a deleted model.
    pub fn forget_model(&mut self, model_id: &str) {
        if self.current_model.as_deref() == Some(model_id) {
            self.current_model = None;
        }
        if self.last_mutation.as_ref().is_some_and(|m| m.model_id == model_id) {
            self.last_mutation = None;
        }
    }

    /// An explicit, non-blank id wins; otherwise fall back to the selected model.
    pub fn resolve_model(&self, explicit: Option<&str>) -> Result<String, String> {
        match explicit.map(str::trim).filter(|id| !id.is_empty()) {
            Some(id) => Ok(id.to_string()),
            None => self
                .current_model
                .clone()
                .ok_or_else(|| "'model_id' is required: no model is selected in this session".to_string()),
        }
    }

    /// Record a successful mutation; the mutated model becomes the current one.
    pub fn note_mutation(&mut self, tool: &str, model_id: &str, version: Option<i64>) {
        self.note_mutation_at(tool, model_id, version, Instant::now());
    }

    fn note_mutation_at(&mut self, tool: &str, model_id: &str, version: Option<i64>, at: Instant) {
        self.current_model = Some(model_id.to_string());
        self.last_mutation = Some(MutationRecord {
            tool: tool.to_string(),
            model_id: model_id.to_string(),
            version,
            at,
        });
    }

    /// The last mutation, if it is younger than the configured TTL.
    pub fn recent_mutation(&self) -> Option<&MutationRecord> {
        self.recent_mutation_at(Instant::now())
    }

    fn recent_mutation_at(&self, now: Instant) -> Option<&MutationRecord> {
        self.last_mutation
            .as_ref()
            .filter(|m| now.saturating_duration_since(m.at) < self.mutation_ttl)
    }

    pub fn view(&self) -> SessionView {
        self.view_at(Instant::now())
    }

    fn view_at(&self, now: Instant) -> SessionView {
        SessionView {
            current_model: self.current_model.clone(),
            recent_mutation: self.recent_mutation_at(now).map(|m| MutationView {
                tool: m.tool.clone(),
                model_id: m.model_id.clone(),
                version: m.version,
                age_seconds: now.saturating_duration_since(m.at).as_secs(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_model_wins_over_selection() {
        let mut session = SessionContext::new(Duration::from_secs(60));
        assert!(session.resolve_model(None).is_err());
        assert!(session.resolve_model(Some("  ")).is_err());

        session.select_model("bank");
        assert_eq!(session.resolve_model(None).unwrap(), "bank");
        assert_eq!(session.resolve_model(Some("other")).unwrap(), "other");

        session.clear_model();
        assert!(session.resolve_model(None).is_err());
    }

    #[test]
    fn mutations_expire_by_age() {
        let mut session = SessionContext::new(Duration::from_secs(60));
        let start = Instant::now();
        session.note_mutation_at("upsert_element", "bank", Some(3), start);

        assert_eq!(session.current_model(), Some("bank"));
        let fresh = session.view_at(start + Duration::from_secs(10));
        let recent = fresh.recent_mutation.unwrap();
        assert_eq!(recent.version, Some(3));
        assert_eq!(recent.age_seconds, 10);

        assert!(session.recent_mutation_at(start + Duration::from_secs(60)).is_none());
        assert!(session.view_at(start + Duration::from_secs(61)).recent_mutation.is_none());
        // The selection itself does not expire.
        assert_eq!(session.current_model(), Some("bank"));
    }

    #[test]
    fn forgetting_a_model_clears_its_state() {
        let mut session = SessionContext::new(Duration::from_secs(60));
        session.note_mutation("create_model", "bank", Some(1));
        session.forget_model("other");
        assert!(session.recent_mutation().is_some());

        session.forget_model("bank");
        assert!(session.current_model().is_none());
        assert!(session.recent_mutation().is_none());
    }
}
