mod session;
mod suggest;

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use archi_core::config::Config;
use archi_core::interchange::{export_csv, export_xml, parse_csv, parse_xml};
use archi_core::query::{self, Direction, ElementFilter, RelationshipFilter};
use archi_core::store::{
    DeleteElementOutcome, DeleteRelationshipOutcome, ElementOutcome, ImportOutcome, ModelOutcome,
    RelationshipOutcome, RevertOutcome, TagOutcome,
};
use archi_core::{
    ArchimateCatalog, Attributes, ElementInput, MetamodelCatalog, ModelError, ModelPatch, ModelResult,
    ModelStore, NewModel, RelationshipInput, TargetKind, WriteMeta,
};
use rmcp::{
    handler::server::{router::tool::ToolRouter, wrapper::Parameters},
    model::{CallToolResult, Content, ServerCapabilities, ServerInfo},
    schemars, tool, tool_handler, tool_router, ErrorData as McpError, ServerHandler, ServiceExt,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use session::SessionContext;

// --- Request types ---

/// Version precondition and history metadata accepted by every versioned write.
#[derive(Debug, Default, Deserialize, schemars::JsonSchema)]
struct WriteArgs {
    /// Reject the write with a version conflict unless the model is at this version
    expected_version: Option<i64>,
    /// Author recorded on the new version (default "system")
    author: Option<String>,
    /// Message recorded on the new version. A message describing the change is used when omitted.
    message: Option<String>,
}

impl From<WriteArgs> for WriteMeta {
    fn from(args: WriteArgs) -> Self {
        WriteMeta {
            expected_version: args.expected_version,
            author: args.author,
            message: args.message,
        }
    }
}

#[derive(Debug, Default, Deserialize, schemars::JsonSchema)]
struct ListModelsRequest {
    /// Maximum number of models (default 100, max 500)
    limit: Option<i64>,
    /// Case-insensitive substring of the model name or description
    search: Option<String>,
}

#[derive(Debug, Default, Deserialize, schemars::JsonSchema)]
struct CreateModelRequest {
    /// Display name of the model
    name: String,
    /// Id for the new model. A UUID is generated when omitted.
    model_id: Option<String>,
    description: Option<String>,
    /// Free-form JSON attributes
    attributes: Option<Attributes>,
    /// Author recorded on version 1
    author: Option<String>,
}

#[derive(Debug, Default, Deserialize, schemars::JsonSchema)]
struct GetModelRequest {
    /// Model id. Defaults to the session's current model.
    model_id: Option<String>,
    /// Include every element and relationship, not just the model metadata
    include_graph: Option<bool>,
}

#[derive(Debug, Default, Deserialize, schemars::JsonSchema)]
struct UpdateModelRequest {
    /// Model id. Defaults to the session's current model.
    model_id: Option<String>,
    /// New name; unchanged when omitted
    name: Option<String>,
    /// New description; unchanged when omitted
    description: Option<String>,
    /// Replacement attributes; unchanged when omitted
    attributes: Option<Attributes>,
    #[serde(flatten)]
    write: WriteArgs,
}

#[derive(Debug, Default, Deserialize, schemars::JsonSchema)]
struct ModelIdRequest {
    /// Model id
    model_id: String,
}

#[derive(Debug, Default, Deserialize, schemars::JsonSchema)]
struct ModelScopeRequest {
    /// Model id. Defaults to the session's current model.
    model_id: Option<String>,
}

#[derive(Debug, Default, Deserialize, schemars::JsonSchema)]
struct UpsertElementRequest {
    /// Model id. Defaults to the session's current model.
    model_id: Option<String>,
    /// Existing element id to replace, or the id for a new element. Generated when omitted.
    element_id: Option<String>,
    /// ArchiMate element type, e.g. "Business Actor", "Application Component"
    #[serde(alias = "type")]
    type_name: String,
    name: String,
    attributes: Option<Attributes>,
    /// Start of the validity interval (ISO-8601 date or timestamp)
    valid_from: Option<String>,
    /// End of the validity interval (ISO-8601 date or timestamp)
    valid_to: Option<String>,
    #[serde(flatten)]
    write: WriteArgs,
}

#[derive(Debug, Default, Deserialize, schemars::JsonSchema)]
struct DeleteElementRequest {
    /// Model id. Defaults to the session's current model.
    model_id: Option<String>,
    element_id: String,
    #[serde(flatten)]
    write: WriteArgs,
}

#[derive(Debug, Default, Deserialize, schemars::JsonSchema)]
struct UpsertRelationshipRequest {
    /// Model id. Defaults to the session's current model.
    model_id: Option<String>,
    /// Existing relationship id to replace, or the id for a new one. Generated when omitted.
    relationship_id: Option<String>,
    /// ArchiMate relationship type, e.g. "Serving", "Realization", "Flow"
    #[serde(alias = "type")]
    type_name: String,
    /// Id of the source element (must exist in the model)
    source_element_id: String,
    /// Id of the target element (must exist in the model)
    target_element_id: String,
    name: Option<String>,
    attributes: Option<Attributes>,
    valid_from: Option<String>,
    valid_to: Option<String>,
    #[serde(flatten)]
    write: WriteArgs,
}

#[derive(Debug, Default, Deserialize, schemars::JsonSchema)]
struct DeleteRelationshipRequest {
    /// Model id. Defaults to the session's current model.
    model_id: Option<String>,
    relationship_id: String,
    #[serde(flatten)]
    write: WriteArgs,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
struct AddTagRequest {
    /// Model id. Defaults to the session's current model.
    model_id: Option<String>,
    /// "element" or "relationship"
    target: TargetKind,
    /// Id of the tagged element or relationship
    target_id: String,
    /// Tag key; must be registered with define_attribute and is_tag = true
    key: String,
    /// Tag value (default empty)
    value: Option<String>,
    #[serde(flatten)]
    write: WriteArgs,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
struct RemoveTagRequest {
    /// Model id. Defaults to the session's current model.
    model_id: Option<String>,
    /// "element" or "relationship"
    target: TargetKind,
    target_id: String,
    key: String,
    #[serde(flatten)]
    write: WriteArgs,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
struct DefineAttributeRequest {
    /// Model id. Defaults to the session's current model.
    model_id: Option<String>,
    /// "element" or "relationship"
    target: TargetKind,
    key: String,
    description: Option<String>,
    /// Whether the key may be used as a tag
    is_tag: Option<bool>,
}

#[derive(Debug, Default, Deserialize, schemars::JsonSchema)]
struct ListAttributesRequest {
    /// Model id. Defaults to the session's current model.
    model_id: Option<String>,
    /// Restrict to "element" or "relationship" keys
    target: Option<TargetKind>,
    /// Only keys registered as tags
    tags_only: Option<bool>,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
struct DeleteAttributeRequest {
    /// Model id. Defaults to the session's current model.
    model_id: Option<String>,
    /// "element" or "relationship"
    target: TargetKind,
    key: String,
}

#[derive(Debug, Default, Deserialize, schemars::JsonSchema)]
struct ListVersionsRequest {
    /// Model id. Defaults to the session's current model.
    model_id: Option<String>,
    /// Maximum number of versions, newest first (default 100, max 1000)
    limit: Option<i64>,
}

#[derive(Debug, Default, Deserialize, schemars::JsonSchema)]
struct GetVersionRequest {
    /// Model id. Defaults to the session's current model.
    model_id: Option<String>,
    version: i64,
}

#[derive(Debug, Default, Deserialize, schemars::JsonSchema)]
struct RevertRequest {
    /// Model id. Defaults to the session's current model.
    model_id: Option<String>,
    /// Version whose snapshot becomes the model's content
    version: i64,
    #[serde(flatten)]
    write: WriteArgs,
}

#[derive(Debug, Default, Deserialize, schemars::JsonSchema)]
struct SearchElementsRequest {
    /// Model id. Defaults to the session's current model.
    model_id: Option<String>,
    /// Exact element type (case-insensitive)
    #[serde(alias = "type")]
    type_name: Option<String>,
    /// Catalog layer, e.g. "Business", "Application", "Technology"
    layer: Option<String>,
    /// Catalog aspect, e.g. "Active Structure", "Behavior"
    aspect: Option<String>,
    /// Attribute key; must be in the element attribute dictionary when the model has one
    attribute_key: Option<String>,
    /// Attribute value to match (requires attribute_key)
    attribute_value: Option<String>,
    tag_key: Option<String>,
    /// Tag value, compared case-insensitively (requires tag_key)
    tag_value: Option<String>,
    /// Case-insensitive substring of id, name or type
    search: Option<String>,
    /// Only elements valid at this instant
    valid_at: Option<String>,
    /// Maximum results (default 200, max 1000)
    limit: Option<i64>,
}

#[derive(Debug, Default, Deserialize, schemars::JsonSchema)]
struct SearchRelationshipsRequest {
    /// Model id. Defaults to the session's current model.
    model_id: Option<String>,
    #[serde(alias = "type")]
    type_name: Option<String>,
    /// Catalog category, e.g. "Structural", "Dependency", "Dynamic"
    category: Option<String>,
    source_element_id: Option<String>,
    target_element_id: Option<String>,
    tag_key: Option<String>,
    tag_value: Option<String>,
    valid_at: Option<String>,
    /// Maximum results (default 200, max 1000)
    limit: Option<i64>,
}

#[derive(Debug, Default, Deserialize, schemars::JsonSchema)]
struct NeighborsRequest {
    /// Model id. Defaults to the session's current model.
    model_id: Option<String>,
    element_id: String,
    /// "out", "in" or "both" (default)
    direction: Option<Direction>,
    /// Only follow relationships of this type
    relationship_type: Option<String>,
    /// Maximum relationships (default 200, max 1000)
    limit: Option<i64>,
}

#[derive(Debug, Default, Deserialize, schemars::JsonSchema)]
struct PathExistsRequest {
    /// Model id. Defaults to the session's current model.
    model_id: Option<String>,
    source_element_id: String,
    target_element_id: String,
    /// Maximum path length in relationships (default 5, max 10)
    max_depth: Option<i64>,
}

#[derive(Debug, Default, Deserialize, schemars::JsonSchema)]
struct TemporalSliceRequest {
    /// Model id. Defaults to the session's current model.
    model_id: Option<String>,
    /// Instant to slice at (ISO-8601)
    valid_at: String,
    /// Only elements of this catalog layer
    layer: Option<String>,
    /// Maximum elements (default 1000, max 2000)
    element_limit: Option<i64>,
    /// Maximum relationships (default 1000, max 2000)
    relationship_limit: Option<i64>,
}

#[derive(Debug, Default, Deserialize, schemars::JsonSchema)]
struct AcquireLockRequest {
    /// Model id. Defaults to the session's current model.
    model_id: Option<String>,
    /// Who holds the lock
    owner: String,
    /// Take the lock over from another owner
    force: Option<bool>,
}

#[derive(Debug, Default, Deserialize, schemars::JsonSchema)]
struct ReleaseLockRequest {
    /// Model id. Defaults to the session's current model.
    model_id: Option<String>,
    /// Must match the current owner unless force is set
    owner: Option<String>,
    force: Option<bool>,
}

#[derive(Debug, Default, Deserialize, schemars::JsonSchema)]
struct ImportXmlRequest {
    /// Target model. Defaults to the session's current model, then to the id in the document.
    model_id: Option<String>,
    /// Document produced by export_xml
    xml: String,
    /// Drop existing elements and relationships before importing
    replace: Option<bool>,
    #[serde(flatten)]
    write: WriteArgs,
}

#[derive(Debug, Default, Deserialize, schemars::JsonSchema)]
struct ImportCsvRequest {
    /// Target model. Defaults to the session's current model.
    model_id: Option<String>,
    /// Elements table with an id,type_name,name,valid_from,valid_to,attributes_json,tags_json header
    #[serde(default)]
    elements_csv: String,
    /// Relationships table with an id,type_name,source_element_id,target_element_id,name,valid_from,valid_to,attributes_json,tags_json header
    #[serde(default)]
    relationships_csv: String,
    /// Drop existing elements and relationships before importing
    replace: Option<bool>,
    #[serde(flatten)]
    write: WriteArgs,
}

#[derive(Debug, Default, Deserialize, schemars::JsonSchema)]
struct GetMetamodelRequest {
    /// Look up one element type
    element_type: Option<String>,
    /// Look up one relationship type
    relationship_type: Option<String>,
}

// --- Server ---

#[derive(Clone)]
pub struct ArchiServer {
    tool_router: ToolRouter<Self>,
    store: Arc<ModelStore>,
    catalog: ArchimateCatalog,
    session: Arc<Mutex<SessionContext>>,
}

#[tool_router]
impl ArchiServer {
    pub fn new(store: ModelStore, mutation_ttl: Duration) -> Self {
        Self {
            tool_router: Self::tool_router(),
            store: Arc::new(store),
            catalog: ArchimateCatalog,
            session: Arc::new(Mutex::new(SessionContext::new(mutation_ttl))),
        }
    }

    // --- Models ---

    #[tool(description = "List models, most recently updated first")]
    fn list_models(&self, Parameters(req): Parameters<ListModelsRequest>) -> Result<CallToolResult, McpError> {
        respond(self.store.list_models(req.limit, req.search.as_deref()))
    }

    #[tool(description = "Create a model at version 1 and make it the session's current model")]
    fn create_model(&self, Parameters(req): Parameters<CreateModelRequest>) -> Result<CallToolResult, McpError> {
        if let Some(err) = missing_args(&[("name", &req.name)]) {
            return Ok(err);
        }
        let new = NewModel {
            id: req.model_id,
            name: req.name,
            description: req.description,
            attributes: req.attributes,
        };
        match self.store.create_model(new, req.author.as_deref()) {
            Ok(outcome) => {
                let model_id = outcome.model.id.clone();
                self.record("create_model", &model_id, Ok(outcome))
            }
            Err(e) => Ok(error_result(&e)),
        }
    }

    #[tool(description = "Get a model's metadata, or with include_graph its full element and relationship graph")]
    fn get_model(&self, Parameters(req): Parameters<GetModelRequest>) -> Result<CallToolResult, McpError> {
        let model_id = match self.resolve_model(req.model_id.as_deref()) {
            Ok(id) => id,
            Err(e) => return Ok(e),
        };
        if req.include_graph.unwrap_or(false) {
            respond(self.store.snapshot(&model_id))
        } else {
            respond(self.store.get_model(&model_id))
        }
    }

    #[tool(description = "Update a model's name, description or attributes. Creates a new version.")]
    fn update_model(&self, Parameters(req): Parameters<UpdateModelRequest>) -> Result<CallToolResult, McpError> {
        let model_id = match self.resolve_model(req.model_id.as_deref()) {
            Ok(id) => id,
            Err(e) => return Ok(e),
        };
        let patch = ModelPatch {
            name: req.name,
            description: req.description,
            attributes: req.attributes,
        };
        let result = self.store.update_model(&model_id, patch, &req.write.into());
        self.record("update_model", &model_id, result)
    }

    #[tool(description = "Delete a model with all its elements, relationships, versions, dictionary entries and lock. Requires an explicit model_id.")]
    fn delete_model(&self, Parameters(req): Parameters<ModelIdRequest>) -> Result<CallToolResult, McpError> {
        if let Some(err) = missing_args(&[("model_id", &req.model_id)]) {
            return Ok(err);
        }
        let model_id = req.model_id.trim();
        match self.store.delete_model(model_id) {
            Ok(_) => {
                self.session().forget_model(model_id);
                info!(model_id, "model deleted");
                json_result(&json!({ "status": "deleted", "modelId": model_id }))
            }
            Err(e) => Ok(error_result(&e)),
        }
    }

    #[tool(description = "Make a model the session's current model. Tools that take an optional model_id fall back to it.")]
    fn select_model(&self, Parameters(req): Parameters<ModelIdRequest>) -> Result<CallToolResult, McpError> {
        match self.store.get_model(req.model_id.trim()) {
            Ok(model) => {
                self.session().select_model(model.id.clone());
                json_result(&model)
            }
            Err(e) => Ok(error_result(&e)),
        }
    }

    #[tool(description = "Forget the session's current model so that tools require an explicit model_id")]
    fn clear_current_model(&self) -> Result<CallToolResult, McpError> {
        self.session().clear_model();
        json_result(&self.session().view())
    }

    #[tool(description = "Show the session's current model and its most recent mutation, if still fresh")]
    fn get_current_model(&self) -> Result<CallToolResult, McpError> {
        json_result(&self.session().view())
    }

    // --- Elements and relationships ---

    #[tool(description = "Create or replace an element. Replacing keeps the element's tags. Creates a new version.")]
    fn upsert_element(&self, Parameters(req): Parameters<UpsertElementRequest>) -> Result<CallToolResult, McpError> {
        if let Some(err) = missing_args(&[("type_name", &req.type_name), ("name", &req.name)]) {
            return Ok(err);
        }
        let model_id = match self.resolve_model(req.model_id.as_deref()) {
            Ok(id) => id,
            Err(e) => return Ok(e),
        };
        let input = ElementInput {
            id: req.element_id,
            type_name: req.type_name,
            name: req.name,
            attributes: req.attributes,
            valid_from: req.valid_from,
            valid_to: req.valid_to,
        };
        let result = self.store.upsert_element(&model_id, input, &req.write.into());
        self.record("upsert_element", &model_id, result)
    }

    #[tool(description = "Delete an element and every relationship touching it. Creates a new version.")]
    fn delete_element(&self, Parameters(req): Parameters<DeleteElementRequest>) -> Result<CallToolResult, McpError> {
        if let Some(err) = missing_args(&[("element_id", &req.element_id)]) {
            return Ok(err);
        }
        let model_id = match self.resolve_model(req.model_id.as_deref()) {
            Ok(id) => id,
            Err(e) => return Ok(e),
        };
        let result = self.store.delete_element(&model_id, &req.element_id, &req.write.into());
        self.record("delete_element", &model_id, result)
    }

    #[tool(description = "Create or replace a relationship between two existing elements. Creates a new version.")]
    fn upsert_relationship(
        &self,
        Parameters(req): Parameters<UpsertRelationshipRequest>,
    ) -> Result<CallToolResult, McpError> {
        if let Some(err) = missing_args(&[
            ("type_name", &req.type_name),
            ("source_element_id", &req.source_element_id),
            ("target_element_id", &req.target_element_id),
        ]) {
            return Ok(err);
        }
        let model_id = match self.resolve_model(req.model_id.as_deref()) {
            Ok(id) => id,
            Err(e) => return Ok(e),
        };
        let input = RelationshipInput {
            id: req.relationship_id,
            type_name: req.type_name,
            source_element_id: req.source_element_id,
            target_element_id: req.target_element_id,
            name: req.name,
            attributes: req.attributes,
            valid_from: req.valid_from,
            valid_to: req.valid_to,
        };
        let result = self.store.upsert_relationship(&model_id, input, &req.write.into());
        self.record("upsert_relationship", &model_id, result)
    }

    #[tool(description = "Delete a relationship. Creates a new version.")]
    fn delete_relationship(
        &self,
        Parameters(req): Parameters<DeleteRelationshipRequest>,
    ) -> Result<CallToolResult, McpError> {
        if let Some(err) = missing_args(&[("relationship_id", &req.relationship_id)]) {
            return Ok(err);
        }
        let model_id = match self.resolve_model(req.model_id.as_deref()) {
            Ok(id) => id,
            Err(e) => return Ok(e),
        };
        let result = self
            .store
            .delete_relationship(&model_id, &req.relationship_id, &req.write.into());
        self.record("delete_relationship", &model_id, result)
    }

    // --- Tags and attribute dictionary ---

    #[tool(description = "Set a tag on an element or relationship. The key must be registered as a tag with define_attribute. Creates a new version.")]
    fn add_tag(&self, Parameters(req): Parameters<AddTagRequest>) -> Result<CallToolResult, McpError> {
        if let Some(err) = missing_args(&[("target_id", &req.target_id), ("key", &req.key)]) {
            return Ok(err);
        }
        let model_id = match self.resolve_model(req.model_id.as_deref()) {
            Ok(id) => id,
            Err(e) => return Ok(e),
        };
        let result = self.store.add_tag(
            &model_id,
            req.target,
            &req.target_id,
            &req.key,
            req.value.as_deref().unwrap_or_default(),
            &req.write.into(),
        );
        self.record("add_tag", &model_id, result)
    }

    #[tool(description = "Remove a tag from an element or relationship. Creates a new version.")]
    fn remove_tag(&self, Parameters(req): Parameters<RemoveTagRequest>) -> Result<CallToolResult, McpError> {
        if let Some(err) = missing_args(&[("target_id", &req.target_id), ("key", &req.key)]) {
            return Ok(err);
        }
        let model_id = match self.resolve_model(req.model_id.as_deref()) {
            Ok(id) => id,
            Err(e) => return Ok(e),
        };
        let result = self
            .store
            .remove_tag(&model_id, req.target, &req.target_id, &req.key, &req.write.into());
        self.record("remove_tag", &model_id, result)
    }

    #[tool(description = "Register or replace an attribute key in the model's dictionary. Set is_tag to allow it as a tag key. Not versioned.")]
    fn define_attribute(
        &self,
        Parameters(req): Parameters<DefineAttributeRequest>,
    ) -> Result<CallToolResult, McpError> {
        let model_id = match self.resolve_model(req.model_id.as_deref()) {
            Ok(id) => id,
            Err(e) => return Ok(e),
        };
        respond(self.store.define_attribute(
            &model_id,
            req.target,
            &req.key,
            req.description.as_deref(),
            req.is_tag.unwrap_or(false),
        ))
    }

    #[tool(description = "List the model's attribute dictionary")]
    fn list_attributes(&self, Parameters(req): Parameters<ListAttributesRequest>) -> Result<CallToolResult, McpError> {
        let model_id = match self.resolve_model(req.model_id.as_deref()) {
            Ok(id) => id,
            Err(e) => return Ok(e),
        };
        respond(
            self.store
                .list_attributes(&model_id, req.target, req.tags_only.unwrap_or(false)),
        )
    }

    #[tool(description = "Remove an attribute key from the model's dictionary. Existing values are left in place. Not versioned.")]
    fn delete_attribute(
        &self,
        Parameters(req): Parameters<DeleteAttributeRequest>,
    ) -> Result<CallToolResult, McpError> {
        let model_id = match self.resolve_model(req.model_id.as_deref()) {
            Ok(id) => id,
            Err(e) => return Ok(e),
        };
        match self.store.delete_attribute(&model_id, req.target, &req.key) {
            Ok(deleted) => json_result(&json!({ "deleted": deleted })),
            Err(e) => Ok(error_result(&e)),
        }
    }

    // --- Versions ---

    #[tool(description = "List a model's versions, newest first")]
    fn list_versions(&self, Parameters(req): Parameters<ListVersionsRequest>) -> Result<CallToolResult, McpError> {
        let model_id = match self.resolve_model(req.model_id.as_deref()) {
            Ok(id) => id,
            Err(e) => return Ok(e),
        };
        respond(self.store.list_versions(&model_id, req.limit))
    }

    #[tool(description = "Get one version with its full snapshot")]
    fn get_version(&self, Parameters(req): Parameters<GetVersionRequest>) -> Result<CallToolResult, McpError> {
        let model_id = match self.resolve_model(req.model_id.as_deref()) {
            Ok(id) => id,
            Err(e) => return Ok(e),
        };
        respond(self.store.get_version(&model_id, req.version))
    }

    #[tool(description = "Restore the model's content from an earlier version. History is kept; the revert is recorded as a new version.")]
    fn revert_to_version(&self, Parameters(req): Parameters<RevertRequest>) -> Result<CallToolResult, McpError> {
        let model_id = match self.resolve_model(req.model_id.as_deref()) {
            Ok(id) => id,
            Err(e) => return Ok(e),
        };
        let result = self
            .store
            .revert_to_version(&model_id, req.version, &req.write.into());
        self.record("revert_to_version", &model_id, result)
    }

    // --- Validation and reporting ---

    #[tool(description = "Check the model against the ArchiMate catalog: unknown types, dangling endpoints and validity intervals")]
    fn validate_model(&self, Parameters(req): Parameters<ModelScopeRequest>) -> Result<CallToolResult, McpError> {
        let model_id = match self.resolve_model(req.model_id.as_deref()) {
            Ok(id) => id,
            Err(e) => return Ok(e),
        };
        respond(self.store.validate_model(&model_id, &self.catalog))
    }

    #[tool(description = "Summarize the model: totals, counts by type and layer, best-connected elements and validation summary")]
    fn generate_report(&self, Parameters(req): Parameters<ModelScopeRequest>) -> Result<CallToolResult, McpError> {
        let model_id = match self.resolve_model(req.model_id.as_deref()) {
            Ok(id) => id,
            Err(e) => return Ok(e),
        };
        respond(self.store.generate_report(&model_id, &self.catalog))
    }

    #[tool(description = "Suggest next modeling steps derived from the model report")]
    fn generate_insights(&self, Parameters(req): Parameters<ModelScopeRequest>) -> Result<CallToolResult, McpError> {
        let model_id = match self.resolve_model(req.model_id.as_deref()) {
            Ok(id) => id,
            Err(e) => return Ok(e),
        };
        respond(self.store.generate_insights(&model_id, &self.catalog))
    }

    // --- Graph queries ---

    #[tool(description = "Search elements by type, layer, aspect, attribute, tag, text or validity date")]
    fn search_elements(&self, Parameters(req): Parameters<SearchElementsRequest>) -> Result<CallToolResult, McpError> {
        let model_id = match self.resolve_model(req.model_id.as_deref()) {
            Ok(id) => id,
            Err(e) => return Ok(e),
        };
        let filter = ElementFilter {
            type_name: req.type_name,
            layer: req.layer,
            aspect: req.aspect,
            attribute_key: req.attribute_key,
            attribute_value: req.attribute_value,
            tag_key: req.tag_key,
            tag_value: req.tag_value,
            search: req.search,
            valid_at: req.valid_at,
            limit: req.limit,
        };
        respond(self.store.search_elements(&model_id, &filter, &self.catalog))
    }

    #[tool(description = "Search relationships by type, category, endpoint, tag or validity date")]
    fn search_relationships(
        &self,
        Parameters(req): Parameters<SearchRelationshipsRequest>,
    ) -> Result<CallToolResult, McpError> {
        let model_id = match self.resolve_model(req.model_id.as_deref()) {
            Ok(id) => id,
            Err(e) => return Ok(e),
        };
        let filter = RelationshipFilter {
            type_name: req.type_name,
            category: req.category,
            source_element_id: req.source_element_id,
            target_element_id: req.target_element_id,
            tag_key: req.tag_key,
            tag_value: req.tag_value,
            valid_at: req.valid_at,
            limit: req.limit,
        };
        respond(self.store.search_relationships(&model_id, &filter, &self.catalog))
    }

    #[tool(description = "Elements connected to an element, with the connecting relationships")]
    fn neighbors(&self, Parameters(req): Parameters<NeighborsRequest>) -> Result<CallToolResult, McpError> {
        if let Some(err) = missing_args(&[("element_id", &req.element_id)]) {
            return Ok(err);
        }
        let model_id = match self.resolve_model(req.model_id.as_deref()) {
            Ok(id) => id,
            Err(e) => return Ok(e),
        };
        respond(self.store.snapshot(&model_id).and_then(|snapshot| {
            query::neighbors(
                &snapshot,
                &req.element_id,
                req.direction.unwrap_or_default(),
                req.relationship_type.as_deref(),
                req.limit,
            )
        }))
    }

    #[tool(description = "Check whether a directed path of relationships leads from one element to another, returning the shortest one found")]
    fn path_exists(&self, Parameters(req): Parameters<PathExistsRequest>) -> Result<CallToolResult, McpError> {
        if let Some(err) = missing_args(&[
            ("source_element_id", &req.source_element_id),
            ("target_element_id", &req.target_element_id),
        ]) {
            return Ok(err);
        }
        let model_id = match self.resolve_model(req.model_id.as_deref()) {
            Ok(id) => id,
            Err(e) => return Ok(e),
        };
        respond(self.store.snapshot(&model_id).map(|snapshot| {
            query::path_exists(&snapshot, &req.source_element_id, &req.target_element_id, req.max_depth)
        }))
    }

    #[tool(description = "Elements and relationships valid at a given instant")]
    fn temporal_slice(&self, Parameters(req): Parameters<TemporalSliceRequest>) -> Result<CallToolResult, McpError> {
        if let Some(err) = missing_args(&[("valid_at", &req.valid_at)]) {
            return Ok(err);
        }
        let model_id = match self.resolve_model(req.model_id.as_deref()) {
            Ok(id) => id,
            Err(e) => return Ok(e),
        };
        respond(self.store.snapshot(&model_id).map(|snapshot| {
            query::temporal_slice(
                &snapshot,
                req.valid_at.trim(),
                req.layer.as_deref(),
                req.element_limit,
                req.relationship_limit,
                &self.catalog,
            )
        }))
    }

    #[tool(description = "Element and relationship counts, distinct types and relationship density")]
    fn model_stats(&self, Parameters(req): Parameters<ModelScopeRequest>) -> Result<CallToolResult, McpError> {
        let model_id = match self.resolve_model(req.model_id.as_deref()) {
            Ok(id) => id,
            Err(e) => return Ok(e),
        };
        respond(self.store.snapshot(&model_id).map(|snapshot| query::model_stats(&snapshot)))
    }

    // --- Locks ---

    #[tool(description = "Take the advisory lock on a model. Locks do not block writes; cooperating callers check get_lock before editing.")]
    fn acquire_lock(&self, Parameters(req): Parameters<AcquireLockRequest>) -> Result<CallToolResult, McpError> {
        if let Some(err) = missing_args(&[("owner", &req.owner)]) {
            return Ok(err);
        }
        let model_id = match self.resolve_model(req.model_id.as_deref()) {
            Ok(id) => id,
            Err(e) => return Ok(e),
        };
        respond(
            self.store
                .acquire_lock(&model_id, req.owner.trim(), req.force.unwrap_or(false)),
        )
    }

    #[tool(description = "Release the advisory lock on a model")]
    fn release_lock(&self, Parameters(req): Parameters<ReleaseLockRequest>) -> Result<CallToolResult, McpError> {
        let model_id = match self.resolve_model(req.model_id.as_deref()) {
            Ok(id) => id,
            Err(e) => return Ok(e),
        };
        respond(
            self.store
                .release_lock(&model_id, req.owner.as_deref(), req.force.unwrap_or(false)),
        )
    }

    #[tool(description = "Show who holds the advisory lock on a model, if anyone")]
    fn get_lock(&self, Parameters(req): Parameters<ModelScopeRequest>) -> Result<CallToolResult, McpError> {
        let model_id = match self.resolve_model(req.model_id.as_deref()) {
            Ok(id) => id,
            Err(e) => return Ok(e),
        };
        match self.store.get_lock(&model_id) {
            Ok(Some(lock)) => json_result(&lock),
            Ok(None) => json_result(&json!({ "modelId": model_id, "locked": false })),
            Err(e) => Ok(error_result(&e)),
        }
    }

    // --- Interchange ---

    #[tool(description = "Export the model's current state as an XML document")]
    fn export_xml(&self, Parameters(req): Parameters<ModelScopeRequest>) -> Result<CallToolResult, McpError> {
        let model_id = match self.resolve_model(req.model_id.as_deref()) {
            Ok(id) => id,
            Err(e) => return Ok(e),
        };
        match self.store.snapshot(&model_id).and_then(|snapshot| export_xml(&snapshot)) {
            Ok(xml) => Ok(CallToolResult::success(vec![Content::text(xml)])),
            Err(e) => Ok(error_result(&e)),
        }
    }

    #[tool(description = "Import elements and relationships from an export_xml document into an existing model as one new version")]
    fn import_xml(&self, Parameters(req): Parameters<ImportXmlRequest>) -> Result<CallToolResult, McpError> {
        let graph = match parse_xml(&req.xml) {
            Ok(graph) => graph,
            Err(e) => return Ok(error_result(&e)),
        };
        let model_id = match self.resolve_model(req.model_id.as_deref()) {
            Ok(id) => id,
            Err(e) => match graph.model_id.clone() {
                Some(id) => id,
                None => return Ok(e),
            },
        };
        let result = self.store.import_graph(
            &model_id,
            &graph,
            req.replace.unwrap_or(false),
            &req.write.into(),
        );
        self.record("import_xml", &model_id, result)
    }

    #[tool(description = "Export the model's current state as two CSV tables, one for elements and one for relationships")]
    fn export_csv(&self, Parameters(req): Parameters<ModelScopeRequest>) -> Result<CallToolResult, McpError> {
        let model_id = match self.resolve_model(req.model_id.as_deref()) {
            Ok(id) => id,
            Err(e) => return Ok(e),
        };
        respond(self.store.snapshot(&model_id).and_then(|snapshot| export_csv(&snapshot)))
    }

    #[tool(description = "Import elements and relationships from export_csv tables into an existing model as one new version")]
    fn import_csv(&self, Parameters(req): Parameters<ImportCsvRequest>) -> Result<CallToolResult, McpError> {
        if req.elements_csv.trim().is_empty() && req.relationships_csv.trim().is_empty() {
            return Ok(error_text("Error: Invalid argument: 'elements_csv' or 'relationships_csv' is required".to_string()));
        }
        let model_id = match self.resolve_model(req.model_id.as_deref()) {
            Ok(id) => id,
            Err(e) => return Ok(e),
        };
        let graph = match parse_csv(&req.elements_csv, &req.relationships_csv) {
            Ok(graph) => graph,
            Err(e) => return Ok(error_result(&e)),
        };
        let result = self.store.import_graph(
            &model_id,
            &graph,
            req.replace.unwrap_or(false),
            &req.write.into(),
        );
        self.record("import_csv", &model_id, result)
    }

    // --- Catalog ---

    #[tool(description = "ArchiMate catalog: element types with layer and aspect, relationship types with category, and layering rules. Pass element_type or relationship_type to look up one entry.")]
    fn get_metamodel(&self, Parameters(req): Parameters<GetMetamodelRequest>) -> Result<CallToolResult, McpError> {
        if let Some(name) = req.element_type.as_deref() {
            return match self.catalog.lookup_element_type(name) {
                Some(found) => json_result(&found),
                None => Ok(error_text(format!("Error: Unknown element type '{}'", name))),
            };
        }
        if let Some(name) = req.relationship_type.as_deref() {
            return match self.catalog.lookup_relationship_type(name) {
                Some(found) => json_result(&found),
                None => Ok(error_text(format!("Error: Unknown relationship type '{}'", name))),
            };
        }
        json_result(&json!({
            "elementTypes": self.catalog.element_types(),
            "relationshipTypes": self.catalog.relationship_types(),
            "layeringRules": self.catalog.layering_rules(),
        }))
    }
}

impl ArchiServer {
    fn session(&self) -> MutexGuard<'_, SessionContext> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn resolve_model(&self, explicit: Option<&str>) -> Result<String, CallToolResult> {
        self.session()
            .resolve_model(explicit)
            .map_err(|msg| error_text(format!("Error: Invalid argument: {}", msg)))
    }

    /// Render a versioned write and remember it in the session.
    fn record<T: Serialize + Versioned>(
        &self,
        tool: &str,
        model_id: &str,
        result: ModelResult<T>,
    ) -> Result<CallToolResult, McpError> {
        match result {
            Ok(outcome) => {
                let version = outcome.version();
                self.session().note_mutation(tool, model_id, Some(version));
                debug!(tool, model_id, version, "mutation recorded in session");
                json_result(&outcome)
            }
            Err(e) => Ok(error_result(&e)),
        }
    }
}

#[tool_handler]
impl ServerHandler for ArchiServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            instructions: Some(INSTRUCTIONS.into()),
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            ..Default::default()
        }
    }
}

// --- Helpers ---

trait Versioned {
    fn version(&self) -> i64;
}

macro_rules! versioned {
    ($($outcome:ty),* $(,)?) => {
        $(impl Versioned for $outcome {
            fn version(&self) -> i64 {
                self.version
            }
        })*
    };
}

versioned!(
    ModelOutcome,
    ElementOutcome,
    RelationshipOutcome,
    DeleteElementOutcome,
    DeleteRelationshipOutcome,
    TagOutcome,
    RevertOutcome,
    ImportOutcome,
);

fn json_result<T: Serialize>(value: &T) -> Result<CallToolResult, McpError> {
    match serde_json::to_string_pretty(value) {
        Ok(text) => Ok(CallToolResult::success(vec![Content::text(text)])),
        Err(e) => Ok(error_text(format!("Error: failed to serialize result: {}", e))),
    }
}

fn respond<T: Serialize>(result: ModelResult<T>) -> Result<CallToolResult, McpError> {
    match result {
        Ok(value) => json_result(&value),
        Err(e) => Ok(error_result(&e)),
    }
}

fn error_text(text: String) -> CallToolResult {
    CallToolResult::error(vec![Content::text(text)])
}

fn error_result(err: &ModelError) -> CallToolResult {
    error_text(render_error(err))
}

/// Reject blank required string arguments before touching storage.
fn missing_args(fields: &[(&str, &str)]) -> Option<CallToolResult> {
    fields
        .iter()
        .find(|(_, value)| value.trim().is_empty())
        .map(|(name, _)| error_text(format!("Error: Invalid argument: '{}' is required", name)))
}

fn render_error(err: &ModelError) -> String {
    let mut text = format!("Error: {}", err);
    match err {
        ModelError::UnknownAttributeKey { key, known, .. } => {
            if let Some(hint) = suggest::closest_key(key, known) {
                text.push_str(&format!(". Did you mean '{}'?", hint));
            } else {
                text.push('.');
            }
            text.push_str(&format!(" Known keys: {}", known.join(", ")));
        }
        ModelError::InvalidTagKey { target, key, .. } => {
            text.push_str(&format!(
                ". Register it with define_attribute (target \"{}\", key \"{}\", is_tag true) first",
                target, key
            ));
        }
        ModelError::VersionConflict { .. } => {
            text.push_str(". Re-read the model and retry against its current version");
        }
        _ => {}
    }
    text
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    // stdout carries the JSON-RPC stream.
    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_target(false)
                .with_ansi(false)
                .with_writer(std::io::stderr),
        )
        .init();
}

const INSTRUCTIONS: &str = r#"archi-mcp manages ArchiMate enterprise architecture models stored in a local SQLite database.

## Workflow
1. `list_models` or `create_model`. Creating a model selects it; `select_model` switches between existing ones.
2. Most tools take an optional `model_id` and fall back to the current model. `get_current_model` shows which one that is and the last change made in this session.
3. Add elements with `upsert_element` and connect them with `upsert_relationship`. Use `get_metamodel` for valid type names and layering rules.
4. Check the result with `validate_model`, then `generate_report` and `generate_insights`.

## Versions
Every element, relationship, tag and model change creates a new numbered version holding a full snapshot. Pass `expected_version` to make a write fail if someone else changed the model first; on a conflict, re-read and retry. `list_versions`, `get_version` and `revert_to_version` navigate the history. A revert is itself a new version; nothing is discarded.

## Tags and attributes
Tag keys must be registered with `define_attribute` (is_tag true) for the right target kind before `add_tag` accepts them. When the element dictionary is not empty, `search_elements` only accepts attribute keys it lists.

## Locks
Locks are advisory. `acquire_lock` records an owner but does not block writes. Before editing a shared model, call `get_lock` and leave the model alone if someone else holds it.

## Interchange
`export_xml`/`import_xml` move a whole model as one document; `export_csv`/`import_csv` use an elements table and a relationships table. Either import lands as one new version.

## Queries
`search_elements`, `search_relationships`, `neighbors`, `path_exists` (directed, shortest path first), `temporal_slice` and `model_stats` read the current state. Dates are ISO-8601 and compared as text, so use one format consistently."#;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();
    let config = Config::from_env();
    let store = ModelStore::open(&config.db_path)?;
    info!(db = %config.db_path.display(), "archi-mcp starting");

    let service = ArchiServer::new(store, config.mutation_ttl)
        .serve(rmcp::transport::io::stdio())
        .await
        .inspect_err(|e| tracing::error!("MCP server error: {}", e))?;
    service.waiting().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn server() -> ArchiServer {
        ArchiServer::new(ModelStore::in_memory().unwrap(), Duration::from_secs(300))
    }

    fn text(result: &CallToolResult) -> String {
        let value = serde_json::to_value(result).unwrap();
        value["content"][0]["text"].as_str().unwrap_or_default().to_string()
    }

    fn is_error(result: &CallToolResult) -> bool {
        result.is_error == Some(true)
    }

    fn create(server: &ArchiServer, id: &str) {
        let result = server
            .create_model(Parameters(CreateModelRequest {
                name: "Bank".into(),
                model_id: Some(id.into()),
                ..Default::default()
            }))
            .unwrap();
        assert!(!is_error(&result), "{}", text(&result));
    }

    fn add_element(server: &ArchiServer, id: &str, type_name: &str) -> CallToolResult {
        server
            .upsert_element(Parameters(UpsertElementRequest {
                element_id: Some(id.into()),
                type_name: type_name.into(),
                name: id.to_uppercase(),
                ..Default::default()
            }))
            .unwrap()
    }

    #[test]
    fn model_id_falls_back_to_session() {
        let server = server();
        let result = add_element(&server, "app", "Application Component");
        assert!(is_error(&result));
        assert!(text(&result).contains("'model_id' is required"));

        create(&server, "bank");
        let result = add_element(&server, "app", "Application Component");
        assert!(!is_error(&result), "{}", text(&result));
        let body: serde_json::Value = serde_json::from_str(&text(&result)).unwrap();
        assert_eq!(body["status"], "created");
        assert_eq!(body["version"], 2);

        let view = text(&server.get_current_model().unwrap());
        let view: serde_json::Value = serde_json::from_str(&view).unwrap();
        assert_eq!(view["currentModel"], "bank");
        assert_eq!(view["recentMutation"]["tool"], "upsert_element");
        assert_eq!(view["recentMutation"]["version"], 2);
    }

    #[test]
    fn blank_arguments_are_rejected() {
        let server = server();
        create(&server, "bank");
        let result = add_element(&server, "app", "  ");
        assert!(is_error(&result));
        assert_eq!(text(&result), "Error: Invalid argument: 'type_name' is required");
    }

    #[test]
    fn version_conflict_is_reported() {
        let server = server();
        create(&server, "bank");
        let result = server
            .upsert_element(Parameters(UpsertElementRequest {
                type_name: "Business Actor".into(),
                name: "Customer".into(),
                write: WriteArgs {
                    expected_version: Some(7),
                    ..Default::default()
                },
                ..Default::default()
            }))
            .unwrap();
        assert!(is_error(&result));
        assert!(text(&result).starts_with("Error: Version conflict: expected 7, current is 1"));
    }

    #[test]
    fn unknown_attribute_key_gets_a_hint() {
        let server = server();
        create(&server, "bank");
        server
            .define_attribute(Parameters(DefineAttributeRequest {
                model_id: None,
                target: TargetKind::Element,
                key: "owner".into(),
                description: None,
                is_tag: None,
            }))
            .unwrap();
        let result = server
            .search_elements(Parameters(SearchElementsRequest {
                attribute_key: Some("ownr".into()),
                ..Default::default()
            }))
            .unwrap();
        assert!(is_error(&result));
        let message = text(&result);
        assert!(message.contains("Did you mean 'owner'?"), "{}", message);
        assert!(message.ends_with("Known keys: owner"));
    }

    #[test]
    fn deleting_the_current_model_clears_the_session() {
        let server = server();
        create(&server, "bank");
        let result = server
            .delete_model(Parameters(ModelIdRequest { model_id: "bank".into() }))
            .unwrap();
        assert!(!is_error(&result));

        let view: serde_json::Value =
            serde_json::from_str(&text(&server.get_current_model().unwrap())).unwrap();
        assert!(view["currentModel"].is_null());
        assert!(view["recentMutation"].is_null());

        let again = server
            .delete_model(Parameters(ModelIdRequest { model_id: "bank".into() }))
            .unwrap();
        assert!(is_error(&again));
        assert_eq!(text(&again), "Error: Model 'bank' not found");
    }

    #[test]
    fn graph_queries_read_current_state() {
        let server = server();
        create(&server, "bank");
        add_element(&server, "db", "System Software");
        add_element(&server, "app", "Application Component");
        let result = server
            .upsert_relationship(Parameters(UpsertRelationshipRequest {
                relationship_id: Some("r1".into()),
                type_name: "Serving".into(),
                source_element_id: "db".into(),
                target_element_id: "app".into(),
                ..Default::default()
            }))
            .unwrap();
        assert!(!is_error(&result), "{}", text(&result));

        let path = server
            .path_exists(Parameters(PathExistsRequest {
                source_element_id: "db".into(),
                target_element_id: "app".into(),
                ..Default::default()
            }))
            .unwrap();
        let path: serde_json::Value = serde_json::from_str(&text(&path)).unwrap();
        assert_eq!(path["exists"], true);
        assert_eq!(path["depth"], 1);

        let missing = server
            .neighbors(Parameters(NeighborsRequest {
                element_id: "nope".into(),
                ..Default::default()
            }))
            .unwrap();
        assert!(is_error(&missing));
    }

    #[test]
    fn xml_round_trips_between_models() {
        let server = server();
        create(&server, "bank");
        add_element(&server, "app", "Application Component");
        let xml = text(&server.export_xml(Parameters(ModelScopeRequest::default())).unwrap());
        assert!(xml.contains("archimateModel"));

        create(&server, "copy");
        let result = server
            .import_xml(Parameters(ImportXmlRequest {
                xml,
                ..Default::default()
            }))
            .unwrap();
        assert!(!is_error(&result), "{}", text(&result));
        let body: serde_json::Value = serde_json::from_str(&text(&result)).unwrap();
        assert_eq!(body["elements"], 1);
        assert_eq!(body["version"], 2);
    }

    #[test]
    fn csv_round_trips_between_models() {
        let server = server();
        create(&server, "bank");
        add_element(&server, "app", "Application Component");
        let export = text(&server.export_csv(Parameters(ModelScopeRequest::default())).unwrap());
        let export: serde_json::Value = serde_json::from_str(&export).unwrap();
        assert_eq!(export["modelId"], "bank");
        let elements_csv = export["elementsCsv"].as_str().unwrap().to_string();
        assert!(elements_csv.contains("app,Application Component"));

        create(&server, "copy");
        let result = server
            .import_csv(Parameters(ImportCsvRequest {
                elements_csv,
                ..Default::default()
            }))
            .unwrap();
        assert!(!is_error(&result), "{}", text(&result));
        let body: serde_json::Value = serde_json::from_str(&text(&result)).unwrap();
        assert_eq!(body["elements"], 1);
        assert_eq!(body["relationships"], 0);

        let empty = server.import_csv(Parameters(ImportCsvRequest::default())).unwrap();
        assert!(is_error(&empty));
        assert!(text(&empty).contains("'elements_csv' or 'relationships_csv' is required"));
    }

    #[test]
    fn attribute_value_without_key_is_rejected() {
        let server = server();
        create(&server, "bank");
        let result = server
            .search_elements(Parameters(SearchElementsRequest {
                attribute_value: Some("alice".into()),
                ..Default::default()
            }))
            .unwrap();
        assert!(is_error(&result));
        assert_eq!(
            text(&result),
            "Error: Invalid argument: 'attribute_value' requires 'attribute_key'"
        );
    }

    #[test]
    fn metamodel_lookup() {
        let server = server();
        let found = server
            .get_metamodel(Parameters(GetMetamodelRequest {
                element_type: Some("business actor".into()),
                ..Default::default()
            }))
            .unwrap();
        let found: serde_json::Value = serde_json::from_str(&text(&found)).unwrap();
        assert_eq!(found["layer"], "Business");

        let unknown = server
            .get_metamodel(Parameters(GetMetamodelRequest {
                relationship_type: Some("Teleport".into()),
                ..Default::default()
            }))
            .unwrap();
        assert!(is_error(&unknown));
    }
}
