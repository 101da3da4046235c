use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::catalog::MetamodelCatalog;
use crate::error::{ModelError, ModelResult};
use crate::interchange::ImportedGraph;
use crate::query::{self, ElementFilter, ElementHit, RelationshipFilter, RelationshipHit};
use crate::report::{self, Insights, ModelReport};
use crate::validate::{self, ValidationReport};
use crate::{
    clamp_limit, new_id, now_timestamp, AttributeDefinition, Attributes, Element, ElementInput,
    Lock, Model, ModelPatch, ModelSnapshot, NewModel, Relationship, RelationshipInput, Tags,
    TargetKind, Version, VersionInfo, WriteMeta,
};

const SCHEMA_SQL: &str = "
CREATE TABLE IF NOT EXISTS models (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    description TEXT NOT NULL DEFAULT '',
    attributes_json TEXT NOT NULL DEFAULT '{}',
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    current_version INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS model_versions (
    model_id TEXT NOT NULL,
    version INTEGER NOT NULL,
    author TEXT NOT NULL DEFAULT 'system',
    message TEXT NOT NULL DEFAULT '',
    snapshot_json TEXT NOT NULL,
    created_at TEXT NOT NULL,
    PRIMARY KEY (model_id, version),
    FOREIGN KEY (model_id) REFERENCES models(id) ON DELETE CASCADE
);

CREATE TABLE IF NOT EXISTS model_elements (
    model_id TEXT NOT NULL,
    id TEXT NOT NULL,
    type_name TEXT NOT NULL,
    name TEXT NOT NULL,
    attributes_json TEXT NOT NULL DEFAULT '{}',
    tags_json TEXT NOT NULL DEFAULT '{}',
    valid_from TEXT,
    valid_to TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    PRIMARY KEY (model_id, id),
    FOREIGN KEY (model_id) REFERENCES models(id) ON DELETE CASCADE
);

CREATE TABLE IF NOT EXISTS model_relationships (
    model_id TEXT NOT NULL,
    id TEXT NOT NULL,
    type_name TEXT NOT NULL,
    source_element_id TEXT NOT NULL,
    target_element_id TEXT NOT NULL,
    name TEXT NOT NULL DEFAULT '',
    attributes_json TEXT NOT NULL DEFAULT '{}',
    tags_json TEXT NOT NULL DEFAULT '{}',
    valid_from TEXT,
    valid_to TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    PRIMARY KEY (model_id, id),
    FOREIGN KEY (model_id) REFERENCES models(id) ON DELETE CASCADE
);

CREATE TABLE IF NOT EXISTS model_attribute_definitions (
    model_id TEXT NOT NULL,
    target_type TEXT NOT NULL CHECK (target_type IN ('element', 'relationship')),
    key TEXT NOT NULL,
    description TEXT NOT NULL DEFAULT '',
    is_tag INTEGER NOT NULL DEFAULT 0,
    PRIMARY KEY (model_id, target_type, key),
    FOREIGN KEY (model_id) REFERENCES models(id) ON DELETE CASCADE
);

CREATE TABLE IF NOT EXISTS model_locks (
    model_id TEXT PRIMARY KEY,
    owner TEXT NOT NULL,
    acquired_at TEXT NOT NULL,
    FOREIGN KEY (model_id) REFERENCES models(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_model_elements_type ON model_elements(model_id, type_name);
CREATE INDEX IF NOT EXISTS idx_model_relationships_type ON model_relationships(model_id, type_name);
CREATE INDEX IF NOT EXISTS idx_model_relationships_source ON model_relationships(model_id, source_element_id);
CREATE INDEX IF NOT EXISTS idx_model_relationships_target ON model_relationships(model_id, target_element_id);
";

/// Columns added after the first schema; older databases get them on open.
const ADDITIVE_COLUMNS: &[(&str, &str, &str)] = &[
    ("model_elements", "tags_json", "TEXT NOT NULL DEFAULT '{}'"),
    ("model_relationships", "tags_json", "TEXT NOT NULL DEFAULT '{}'"),
    ("model_attribute_definitions", "is_tag", "INTEGER NOT NULL DEFAULT 0"),
];

const ELEMENT_COLUMNS: &str =
    "id, type_name, name, attributes_json, tags_json, valid_from, valid_to, created_at, updated_at";
const RELATIONSHIP_COLUMNS: &str = "id, type_name, source_element_id, target_element_id, name, \
     attributes_json, tags_json, valid_from, valid_to, created_at, updated_at";

const DEFAULT_AUTHOR: &str = "system";

// --- Operation results ---

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum UpsertStatus {
    Created,
    Updated,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelOutcome {
    pub model: Model,
    pub version: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ElementOutcome {
    pub status: UpsertStatus,
    pub element_id: String,
    pub version: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RelationshipOutcome {
    pub status: UpsertStatus,
    pub relationship_id: String,
    pub version: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteElementOutcome {
    pub status: &'static str,
    pub element_id: String,
    pub relationships_deleted: usize,
    pub version: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteRelationshipOutcome {
    pub status: &'static str,
    pub relationship_id: String,
    pub version: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TagOutcome {
    pub target: TargetKind,
    pub target_id: String,
    pub tags: Tags,
    pub version: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RevertOutcome {
    pub status: &'static str,
    pub from_version: i64,
    pub version: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportOutcome {
    pub elements: usize,
    pub relationships: usize,
    pub version: i64,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LockStatus {
    Locked,
    AlreadyLocked,
    Released,
    NotLocked,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LockOutcome {
    pub status: LockStatus,
    pub model_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub acquired_at: Option<String>,
}

// --- Store ---

/// SQLite-backed model store. Every mutating call runs in one transaction
/// that applies the change, appends a snapshot version and bumps
/// `current_version`.
#[derive(Debug)]
pub struct ModelStore {
    conn: Mutex<Connection>,
    db_path: Option<PathBuf>,
}

impl ModelStore {
    /// Open (or create) a store at the given path.
    pub fn open(path: &Path) -> ModelResult<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .map_err(|e| ModelError::invalid(format!("cannot create {}: {}", parent.display(), e)))?;
        }
        let conn = Connection::open(path)?;
        let store = Self {
            conn: Mutex::new(conn),
            db_path: Some(path.to_path_buf()),
        };
        store.initialize()?;
        info!(path = %path.display(), "model store opened");
        Ok(store)
    }

    /// In-memory store, used by tests.
    pub fn in_memory() -> ModelResult<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Mutex::new(conn),
            db_path: None,
        };
        store.initialize()?;
        Ok(store)
    }

    pub fn db_path(&self) -> Option<&Path> {
        self.db_path.as_deref()
    }

    fn initialize(&self) -> ModelResult<()> {
        let conn = self.conn();
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        match conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get::<_, String>(0)) {
            Ok(mode) if mode.eq_ignore_ascii_case("wal") || mode.eq_ignore_ascii_case("memory") => {}
            Ok(mode) => warn!(%mode, "WAL journal mode unavailable, keeping current journal"),
            Err(e) => warn!(error = %e, "WAL journal mode unavailable, keeping current journal"),
        }
        conn.execute_batch(SCHEMA_SQL)?;
        for (table, column, ddl) in ADDITIVE_COLUMNS {
            ensure_column(&conn, table, column, ddl)?;
        }
        Ok(())
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    // --- Models ---

    pub fn create_model(&self, new: NewModel, author: Option<&str>) -> ModelResult<ModelOutcome> {
        require("name", &new.name)?;
        let id = non_blank(new.id).unwrap_or_else(new_id);

        let mut conn = self.conn();
        let tx = conn.transaction()?;
        let exists: bool = tx
            .query_row("SELECT 1 FROM models WHERE id = ?1", params![id], |_| Ok(true))
            .optional()?
            .unwrap_or(false);
        if exists {
            return Err(ModelError::AlreadyExists { id });
        }

        let now = now_timestamp();
        tx.execute(
            "INSERT INTO models (id, name, description, attributes_json, created_at, updated_at, current_version)
             VALUES (?1, ?2, ?3, ?4, ?5, ?5, 0)",
            params![
                id,
                new.name.trim(),
                new.description.unwrap_or_default(),
                to_json(&new.attributes.unwrap_or_default())?,
                now,
            ],
        )?;
        let meta = WriteMeta {
            author: author.map(str::to_string),
            ..Default::default()
        };
        let version = append_version(&tx, &id, &meta, "Model created")?;
        let model = load_model(&tx, &id)?;
        tx.commit()?;
        info!(model_id = %id, "model created");
        Ok(ModelOutcome { model, version })
    }

    pub fn get_model(&self, model_id: &str) -> ModelResult<Model> {
        load_model(&self.conn(), model_id)
    }

    /// Models ordered by most recent update. `search` matches name or
    /// description, case-insensitively.
    pub fn list_models(&self, limit: Option<i64>, search: Option<&str>) -> ModelResult<Vec<Model>> {
        let limit = clamp_limit(limit, 100, 500) as i64;
        let pattern = search
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| format!("%{}%", s.to_lowercase()));
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, name, description, attributes_json, created_at, updated_at, current_version
             FROM models
             WHERE ?1 IS NULL OR lower(name) LIKE ?1 OR lower(description) LIKE ?1
             ORDER BY updated_at DESC, id
             LIMIT ?2",
        )?;
        let models = stmt
            .query_map(params![pattern, limit], row_to_model)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(models)
    }

    pub fn update_model(&self, model_id: &str, patch: ModelPatch, meta: &WriteMeta) -> ModelResult<ModelOutcome> {
        if let Some(name) = &patch.name {
            require("name", name)?;
        }
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        let current = begin_mutation(&tx, model_id, meta)?;
        tx.execute(
            "UPDATE models SET name = ?2, description = ?3, attributes_json = ?4 WHERE id = ?1",
            params![
                model_id,
                patch.name.as_deref().map(str::trim).unwrap_or(&current.name),
                patch.description.as_deref().unwrap_or(&current.description),
                to_json(patch.attributes.as_ref().unwrap_or(&current.attributes))?,
            ],
        )?;
        let version = append_version(&tx, model_id, meta, "Model updated")?;
        let model = load_model(&tx, model_id)?;
        tx.commit()?;
        Ok(ModelOutcome { model, version })
    }

    /// Delete a model and everything it owns.
    pub fn delete_model(&self, model_id: &str) -> ModelResult<usize> {
        let conn = self.conn();
        let deleted = conn.execute("DELETE FROM models WHERE id = ?1", params![model_id])?;
        if deleted == 0 {
            return Err(ModelError::model_not_found(model_id));
        }
        info!(model_id, "model deleted");
        Ok(deleted)
    }

    /// Metadata plus all elements and relationships, ordered by id.
    pub fn snapshot(&self, model_id: &str) -> ModelResult<ModelSnapshot> {
        capture_snapshot(&self.conn(), model_id)
    }

    // --- Elements ---

    pub fn upsert_element(&self, model_id: &str, input: ElementInput, meta: &WriteMeta) -> ModelResult<ElementOutcome> {
        require("type_name", &input.type_name)?;
        require("name", &input.name)?;
        let id = non_blank(input.id).unwrap_or_else(new_id);

        let mut conn = self.conn();
        let tx = conn.transaction()?;
        begin_mutation(&tx, model_id, meta)?;

        let now = now_timestamp();
        let (status, created_at, tags) = match find_element(&tx, model_id, &id)? {
            Some(prev) => (UpsertStatus::Updated, prev.created_at, prev.tags),
            None => (UpsertStatus::Created, now.clone(), Tags::new()),
        };
        let element = Element {
            id,
            type_name: input.type_name.trim().to_string(),
            name: input.name.trim().to_string(),
            attributes: input.attributes.unwrap_or_default(),
            tags,
            valid_from: non_blank(input.valid_from),
            valid_to: non_blank(input.valid_to),
            created_at,
            updated_at: now,
        };
        write_element(&tx, model_id, &element)?;

        let default_message = match status {
            UpsertStatus::Created => "Element created",
            UpsertStatus::Updated => "Element updated",
        };
        let version = append_version(&tx, model_id, meta, default_message)?;
        tx.commit()?;
        Ok(ElementOutcome {
            status,
            element_id: element.id,
            version,
        })
    }

    /// Delete an element together with every relationship that references it.
    pub fn delete_element(&self, model_id: &str, element_id: &str, meta: &WriteMeta) -> ModelResult<DeleteElementOutcome> {
        let element_id = require("element_id", element_id)?;
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        begin_mutation(&tx, model_id, meta)?;
        if find_element(&tx, model_id, element_id)?.is_none() {
            return Err(ModelError::element_not_found(model_id, element_id));
        }

        let relationships_deleted = tx.execute(
            "DELETE FROM model_relationships
             WHERE model_id = ?1 AND (source_element_id = ?2 OR target_element_id = ?2)",
            params![model_id, element_id],
        )?;
        tx.execute(
            "DELETE FROM model_elements WHERE model_id = ?1 AND id = ?2",
            params![model_id, element_id],
        )?;
        let version = append_version(&tx, model_id, meta, "Element deleted")?;
        tx.commit()?;
        Ok(DeleteElementOutcome {
            status: "deleted",
            element_id: element_id.to_string(),
            relationships_deleted,
            version,
        })
    }

    // --- Relationships ---

    pub fn upsert_relationship(
        &self,
        model_id: &str,
        input: RelationshipInput,
        meta: &WriteMeta,
    ) -> ModelResult<RelationshipOutcome> {
        require("type_name", &input.type_name)?;
        let source_element_id = require("source_element_id", &input.source_element_id)?.to_string();
        let target_element_id = require("target_element_id", &input.target_element_id)?.to_string();
        let id = non_blank(input.id).unwrap_or_else(new_id);

        let mut conn = self.conn();
        let tx = conn.transaction()?;
        begin_mutation(&tx, model_id, meta)?;
        for endpoint in [&source_element_id, &target_element_id] {
            if find_element(&tx, model_id, endpoint)?.is_none() {
                return Err(ModelError::element_not_found(model_id, endpoint));
            }
        }

        let now = now_timestamp();
        let (status, created_at, tags) = match find_relationship(&tx, model_id, &id)? {
            Some(prev) => (UpsertStatus::Updated, prev.created_at, prev.tags),
            None => (UpsertStatus::Created, now.clone(), Tags::new()),
        };
        let relationship = Relationship {
            id,
            type_name: input.type_name.trim().to_string(),
            source_element_id,
            target_element_id,
            name: input.name.unwrap_or_default(),
            attributes: input.attributes.unwrap_or_default(),
            tags,
            valid_from: non_blank(input.valid_from),
            valid_to: non_blank(input.valid_to),
            created_at,
            updated_at: now,
        };
        write_relationship(&tx, model_id, &relationship)?;

        let default_message = match status {
            UpsertStatus::Created => "Relationship created",
            UpsertStatus::Updated => "Relationship updated",
        };
        let version = append_version(&tx, model_id, meta, default_message)?;
        tx.commit()?;
        Ok(RelationshipOutcome {
            status,
            relationship_id: relationship.id,
            version,
        })
    }

    pub fn delete_relationship(
        &self,
        model_id: &str,
        relationship_id: &str,
        meta: &WriteMeta,
    ) -> ModelResult<DeleteRelationshipOutcome> {
        let relationship_id = require("relationship_id", relationship_id)?;
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        begin_mutation(&tx, model_id, meta)?;
        let deleted = tx.execute(
            "DELETE FROM model_relationships WHERE model_id = ?1 AND id = ?2",
            params![model_id, relationship_id],
        )?;
        if deleted == 0 {
            return Err(ModelError::relationship_not_found(model_id, relationship_id));
        }
        let version = append_version(&tx, model_id, meta, "Relationship deleted")?;
        tx.commit()?;
        Ok(DeleteRelationshipOutcome {
            status: "deleted",
            relationship_id: relationship_id.to_string(),
            version,
        })
    }

    // --- Tags ---

    /// Set a tag on an element or relationship. The key must be registered
    /// in the model's dictionary with `is_tag`.
    pub fn add_tag(
        &self,
        model_id: &str,
        target: TargetKind,
        target_id: &str,
        key: &str,
        value: &str,
        meta: &WriteMeta,
    ) -> ModelResult<TagOutcome> {
        require("key", key)?;
        let target_id = require("target_id", target_id)?;
        self.change_tags(model_id, target, target_id, key, meta, "Tag added", |tags| {
            tags.insert(key.trim().to_string(), value.to_string());
        })
    }

    /// Remove a tag. Removing a key the target does not carry is a no-op,
    /// but still records a version.
    pub fn remove_tag(
        &self,
        model_id: &str,
        target: TargetKind,
        target_id: &str,
        key: &str,
        meta: &WriteMeta,
    ) -> ModelResult<TagOutcome> {
        require("key", key)?;
        let target_id = require("target_id", target_id)?;
        self.change_tags(model_id, target, target_id, key, meta, "Tag removed", |tags| {
            tags.remove(key.trim());
        })
    }

    #[allow(clippy::too_many_arguments)]
    fn change_tags(
        &self,
        model_id: &str,
        target: TargetKind,
        target_id: &str,
        key: &str,
        meta: &WriteMeta,
        default_message: &str,
        apply: impl FnOnce(&mut Tags),
    ) -> ModelResult<TagOutcome> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        begin_mutation(&tx, model_id, meta)?;

        let is_tag: Option<bool> = tx
            .query_row(
                "SELECT is_tag FROM model_attribute_definitions
                 WHERE model_id = ?1 AND target_type = ?2 AND key = ?3",
                params![model_id, target.as_str(), key.trim()],
                |row| row.get(0),
            )
            .optional()?;
        if is_tag != Some(true) {
            return Err(ModelError::InvalidTagKey {
                model_id: model_id.to_string(),
                target: target.as_str(),
                key: key.trim().to_string(),
            });
        }

        let mut tags = match target {
            TargetKind::Element => find_element(&tx, model_id, target_id)?
                .map(|e| e.tags)
                .ok_or_else(|| ModelError::element_not_found(model_id, target_id))?,
            TargetKind::Relationship => find_relationship(&tx, model_id, target_id)?
                .map(|r| r.tags)
                .ok_or_else(|| ModelError::relationship_not_found(model_id, target_id))?,
        };
        apply(&mut tags);

        let table = match target {
            TargetKind::Element => "model_elements",
            TargetKind::Relationship => "model_relationships",
        };
        tx.execute(
            &format!("UPDATE {table} SET tags_json = ?3, updated_at = ?4 WHERE model_id = ?1 AND id = ?2"),
            params![model_id, target_id, to_json(&tags)?, now_timestamp()],
        )?;
        let version = append_version(&tx, model_id, meta, default_message)?;
        tx.commit()?;
        Ok(TagOutcome {
            target,
            target_id: target_id.to_string(),
            tags,
            version,
        })
    }

    // --- Attribute dictionary ---

    /// Register (or replace) a dictionary key. Dictionary edits are not versioned.
    pub fn define_attribute(
        &self,
        model_id: &str,
        target: TargetKind,
        key: &str,
        description: Option<&str>,
        is_tag: bool,
    ) -> ModelResult<AttributeDefinition> {
        require("key", key)?;
        let conn = self.conn();
        load_model(&conn, model_id)?;
        let definition = AttributeDefinition {
            model_id: model_id.to_string(),
            target,
            key: key.trim().to_string(),
            description: description.unwrap_or_default().to_string(),
            is_tag,
        };
        conn.execute(
            "INSERT OR REPLACE INTO model_attribute_definitions (model_id, target_type, key, description, is_tag)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                definition.model_id,
                target.as_str(),
                definition.key,
                definition.description,
                is_tag,
            ],
        )?;
        Ok(definition)
    }

    pub fn list_attributes(
        &self,
        model_id: &str,
        target: Option<TargetKind>,
        tags_only: bool,
    ) -> ModelResult<Vec<AttributeDefinition>> {
        let conn = self.conn();
        load_model(&conn, model_id)?;
        list_definitions(&conn, model_id, target, tags_only)
    }

    pub fn delete_attribute(&self, model_id: &str, target: TargetKind, key: &str) -> ModelResult<usize> {
        let conn = self.conn();
        load_model(&conn, model_id)?;
        let deleted = conn.execute(
            "DELETE FROM model_attribute_definitions WHERE model_id = ?1 AND target_type = ?2 AND key = ?3",
            params![model_id, target.as_str(), key.trim()],
        )?;
        Ok(deleted)
    }

    // --- Versions ---

    /// Version headers, newest first. Snapshots are left out.
    pub fn list_versions(&self, model_id: &str, limit: Option<i64>) -> ModelResult<Vec<VersionInfo>> {
        let limit = clamp_limit(limit, 100, 1000) as i64;
        let conn = self.conn();
        load_model(&conn, model_id)?;
        let mut stmt = conn.prepare(
            "SELECT model_id, version, author, message, created_at
             FROM model_versions WHERE model_id = ?1
             ORDER BY version DESC LIMIT ?2",
        )?;
        let versions = stmt
            .query_map(params![model_id, limit], row_to_version_info)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(versions)
    }

    pub fn get_version(&self, model_id: &str, version: i64) -> ModelResult<Version> {
        let conn = self.conn();
        load_model(&conn, model_id)?;
        load_version(&conn, model_id, version)
    }

    /// Restore the state captured in `version` and record the restore as a
    /// new version on top of the history.
    pub fn revert_to_version(&self, model_id: &str, version: i64, meta: &WriteMeta) -> ModelResult<RevertOutcome> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        let current = begin_mutation(&tx, model_id, meta)?;
        let target = load_version(&tx, model_id, version)?;
        let snapshot = target.snapshot;

        tx.execute("DELETE FROM model_relationships WHERE model_id = ?1", params![model_id])?;
        tx.execute("DELETE FROM model_elements WHERE model_id = ?1", params![model_id])?;
        for element in &snapshot.elements {
            write_element(&tx, model_id, element)?;
        }
        for relationship in &snapshot.relationships {
            write_relationship(&tx, model_id, relationship)?;
        }
        tx.execute(
            "UPDATE models SET name = ?2, description = ?3, attributes_json = ?4 WHERE id = ?1",
            params![
                model_id,
                snapshot.model.name,
                snapshot.model.description,
                to_json(&snapshot.model.attributes)?,
            ],
        )?;

        let message = format!("Reverted to version {}", version);
        let new_version = append_version(&tx, model_id, meta, &message)?;
        tx.commit()?;
        info!(model_id, from = current.current_version, to = version, "model reverted");
        Ok(RevertOutcome {
            status: "reverted",
            from_version: current.current_version,
            version: new_version,
        })
    }

    // --- Locks ---

    /// Advisory lock. Nothing else in the store checks it; callers are
    /// expected to consult it before mutating.
    pub fn acquire_lock(&self, model_id: &str, owner: &str, force: bool) -> ModelResult<LockOutcome> {
        let owner = require("owner", owner)?;
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        load_model(&tx, model_id)?;

        if let Some(existing) = find_lock(&tx, model_id)? {
            if existing.owner == owner {
                return Ok(LockOutcome {
                    status: LockStatus::AlreadyLocked,
                    model_id: model_id.to_string(),
                    owner: Some(existing.owner),
                    acquired_at: Some(existing.acquired_at),
                });
            }
            if !force {
                return Err(ModelError::Locked {
                    model_id: model_id.to_string(),
                    owner: existing.owner,
                });
            }
            warn!(model_id, previous = %existing.owner, owner, "lock taken over");
            tx.execute("DELETE FROM model_locks WHERE model_id = ?1", params![model_id])?;
        }

        let acquired_at = now_timestamp();
        tx.execute(
            "INSERT INTO model_locks (model_id, owner, acquired_at) VALUES (?1, ?2, ?3)",
            params![model_id, owner, acquired_at],
        )?;
        tx.commit()?;
        Ok(LockOutcome {
            status: LockStatus::Locked,
            model_id: model_id.to_string(),
            owner: Some(owner.to_string()),
            acquired_at: Some(acquired_at),
        })
    }

    pub fn release_lock(&self, model_id: &str, owner: Option<&str>, force: bool) -> ModelResult<LockOutcome> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        load_model(&tx, model_id)?;

        let Some(existing) = find_lock(&tx, model_id)? else {
            return Ok(LockOutcome {
                status: LockStatus::NotLocked,
                model_id: model_id.to_string(),
                owner: None,
                acquired_at: None,
            });
        };
        if let Some(owner) = owner.filter(|o| !o.trim().is_empty()) {
            if owner != existing.owner && !force {
                return Err(ModelError::LockOwnerMismatch {
                    model_id: model_id.to_string(),
                    owner: existing.owner,
                });
            }
        }
        tx.execute("DELETE FROM model_locks WHERE model_id = ?1", params![model_id])?;
        tx.commit()?;
        Ok(LockOutcome {
            status: LockStatus::Released,
            model_id: model_id.to_string(),
            owner: Some(existing.owner),
            acquired_at: None,
        })
    }

    pub fn get_lock(&self, model_id: &str) -> ModelResult<Option<Lock>> {
        let conn = self.conn();
        load_model(&conn, model_id)?;
        find_lock(&conn, model_id)
    }

    // --- Interchange ---

    /// Upsert every imported row and record one version. With `replace`,
    /// existing elements and relationships are dropped first. Endpoints
    /// are not checked here; dangling references surface in validation.
    pub fn import_graph(
        &self,
        model_id: &str,
        graph: &ImportedGraph,
        replace: bool,
        meta: &WriteMeta,
    ) -> ModelResult<ImportOutcome> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        begin_mutation(&tx, model_id, meta)?;
        if replace {
            tx.execute("DELETE FROM model_relationships WHERE model_id = ?1", params![model_id])?;
            tx.execute("DELETE FROM model_elements WHERE model_id = ?1", params![model_id])?;
        }

        let now = now_timestamp();
        for imported in &graph.elements {
            let created_at = find_element(&tx, model_id, &imported.id)?
                .map(|e| e.created_at)
                .unwrap_or_else(|| now.clone());
            let element = Element {
                id: imported.id.clone(),
                type_name: imported.type_name.clone(),
                name: imported.name.clone(),
                attributes: imported.attributes.clone(),
                tags: imported.tags.clone(),
                valid_from: imported.valid_from.clone(),
                valid_to: imported.valid_to.clone(),
                created_at,
                updated_at: now.clone(),
            };
            write_element(&tx, model_id, &element)?;
        }
        for imported in &graph.relationships {
            let created_at = find_relationship(&tx, model_id, &imported.id)?
                .map(|r| r.created_at)
                .unwrap_or_else(|| now.clone());
            let relationship = Relationship {
                id: imported.id.clone(),
                type_name: imported.type_name.clone(),
                source_element_id: imported.source_element_id.clone(),
                target_element_id: imported.target_element_id.clone(),
                name: imported.name.clone(),
                attributes: imported.attributes.clone(),
                tags: imported.tags.clone(),
                valid_from: imported.valid_from.clone(),
                valid_to: imported.valid_to.clone(),
                created_at,
                updated_at: now.clone(),
            };
            write_relationship(&tx, model_id, &relationship)?;
        }

        let version = append_version(&tx, model_id, meta, graph.format.import_message())?;
        tx.commit()?;
        info!(
            model_id,
            elements = graph.elements.len(),
            relationships = graph.relationships.len(),
            format = ?graph.format,
            "model imported"
        );
        Ok(ImportOutcome {
            elements: graph.elements.len(),
            relationships: graph.relationships.len(),
            version,
        })
    }

    // --- Read side ---

    pub fn validate_model(&self, model_id: &str, catalog: &dyn MetamodelCatalog) -> ModelResult<ValidationReport> {
        let snapshot = self.snapshot(model_id)?;
        Ok(validate::validate(&snapshot, catalog))
    }

    pub fn generate_report(&self, model_id: &str, catalog: &dyn MetamodelCatalog) -> ModelResult<ModelReport> {
        let snapshot = self.snapshot(model_id)?;
        Ok(report::generate_report(&snapshot, catalog))
    }

    pub fn generate_insights(&self, model_id: &str, catalog: &dyn MetamodelCatalog) -> ModelResult<Insights> {
        let report = self.generate_report(model_id, catalog)?;
        Ok(report::generate_insights(&report))
    }

    /// Element search. An `attribute_key` must match the element attribute
    /// dictionary exactly when the model has one.
    pub fn search_elements(
        &self,
        model_id: &str,
        filter: &ElementFilter,
        catalog: &dyn MetamodelCatalog,
    ) -> ModelResult<Vec<ElementHit>> {
        let has_key = filter.attribute_key.as_deref().is_some_and(|k| !k.trim().is_empty());
        if filter.attribute_value.is_some() && !has_key {
            return Err(ModelError::invalid("'attribute_value' requires 'attribute_key'"));
        }
        let conn = self.conn();
        let snapshot = capture_snapshot(&conn, model_id)?;
        if let Some(key) = filter.attribute_key.as_deref() {
            let known: Vec<String> = list_definitions(&conn, model_id, Some(TargetKind::Element), false)?
                .into_iter()
                .map(|d| d.key)
                .collect();
            if !known.is_empty() && !known.iter().any(|k| k == key) {
                return Err(ModelError::UnknownAttributeKey {
                    model_id: model_id.to_string(),
                    target: TargetKind::Element.as_str(),
                    key: key.to_string(),
                    known,
                });
            }
        }
        Ok(query::search_elements(&snapshot, filter, catalog))
    }

    pub fn search_relationships(
        &self,
        model_id: &str,
        filter: &RelationshipFilter,
        catalog: &dyn MetamodelCatalog,
    ) -> ModelResult<Vec<RelationshipHit>> {
        let snapshot = self.snapshot(model_id)?;
        Ok(query::search_relationships(&snapshot, filter, catalog))
    }
}

// --- Transaction helpers ---

/// Load the model and enforce the optimistic version precondition.
fn begin_mutation(conn: &Connection, model_id: &str, meta: &WriteMeta) -> ModelResult<Model> {
    let model = load_model(conn, model_id)?;
    if let Some(expected) = meta.expected_version {
        if expected != model.current_version {
            warn!(model_id, expected, actual = model.current_version, "stale write rejected");
            return Err(ModelError::VersionConflict {
                expected,
                actual: model.current_version,
            });
        }
    }
    Ok(model)
}

/// Bump the version counter and store the post-change snapshot under it.
fn append_version(conn: &Connection, model_id: &str, meta: &WriteMeta, default_message: &str) -> ModelResult<i64> {
    let current: i64 = conn
        .query_row(
            "SELECT current_version FROM models WHERE id = ?1",
            params![model_id],
            |row| row.get(0),
        )
        .optional()?
        .ok_or_else(|| ModelError::model_not_found(model_id))?;
    let next = current + 1;
    let now = now_timestamp();
    conn.execute(
        "UPDATE models SET current_version = ?2, updated_at = ?3 WHERE id = ?1",
        params![model_id, next, now],
    )?;

    let snapshot = capture_snapshot(conn, model_id)?;
    let author = meta
        .author
        .as_deref()
        .map(str::trim)
        .filter(|a| !a.is_empty())
        .unwrap_or(DEFAULT_AUTHOR);
    let message = meta
        .message
        .as_deref()
        .filter(|m| !m.trim().is_empty())
        .unwrap_or(default_message);
    conn.execute(
        "INSERT INTO model_versions (model_id, version, author, message, snapshot_json, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![model_id, next, author, message, serde_json::to_string(&snapshot)?, now],
    )?;
    debug!(model_id, version = next, author, "version appended");
    Ok(next)
}

fn capture_snapshot(conn: &Connection, model_id: &str) -> ModelResult<ModelSnapshot> {
    let model = load_model(conn, model_id)?;

    let mut stmt = conn.prepare(&format!(
        "SELECT {ELEMENT_COLUMNS} FROM model_elements WHERE model_id = ?1 ORDER BY id"
    ))?;
    let elements = stmt
        .query_map(params![model_id], row_to_element)?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    let mut stmt = conn.prepare(&format!(
        "SELECT {RELATIONSHIP_COLUMNS} FROM model_relationships WHERE model_id = ?1 ORDER BY id"
    ))?;
    let relationships = stmt
        .query_map(params![model_id], row_to_relationship)?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    Ok(ModelSnapshot {
        model,
        elements,
        relationships,
    })
}

fn load_model(conn: &Connection, model_id: &str) -> ModelResult<Model> {
    conn.query_row(
        "SELECT id, name, description, attributes_json, created_at, updated_at, current_version
         FROM models WHERE id = ?1",
        params![model_id],
        row_to_model,
    )
    .optional()?
    .ok_or_else(|| ModelError::model_not_found(model_id))
}

fn load_version(conn: &Connection, model_id: &str, version: i64) -> ModelResult<Version> {
    let row = conn
        .query_row(
            "SELECT model_id, version, author, message, created_at, snapshot_json
             FROM model_versions WHERE model_id = ?1 AND version = ?2",
            params![model_id, version],
            |row| Ok((row_to_version_info(row)?, row.get::<_, String>(5)?)),
        )
        .optional()?;
    let (info, snapshot_json) = row.ok_or_else(|| ModelError::version_not_found(model_id, version))?;
    Ok(Version {
        info,
        snapshot: serde_json::from_str(&snapshot_json)?,
    })
}

fn find_element(conn: &Connection, model_id: &str, element_id: &str) -> ModelResult<Option<Element>> {
    let element = conn
        .query_row(
            &format!("SELECT {ELEMENT_COLUMNS} FROM model_elements WHERE model_id = ?1 AND id = ?2"),
            params![model_id, element_id],
            row_to_element,
        )
        .optional()?;
    Ok(element)
}

fn find_relationship(conn: &Connection, model_id: &str, relationship_id: &str) -> ModelResult<Option<Relationship>> {
    let relationship = conn
        .query_row(
            &format!("SELECT {RELATIONSHIP_COLUMNS} FROM model_relationships WHERE model_id = ?1 AND id = ?2"),
            params![model_id, relationship_id],
            row_to_relationship,
        )
        .optional()?;
    Ok(relationship)
}

fn find_lock(conn: &Connection, model_id: &str) -> ModelResult<Option<Lock>> {
    let lock = conn
        .query_row(
            "SELECT model_id, owner, acquired_at FROM model_locks WHERE model_id = ?1",
            params![model_id],
            |row| {
                Ok(Lock {
                    model_id: row.get(0)?,
                    owner: row.get(1)?,
                    acquired_at: row.get(2)?,
                })
            },
        )
        .optional()?;
    Ok(lock)
}

fn list_definitions(
    conn: &Connection,
    model_id: &str,
    target: Option<TargetKind>,
    tags_only: bool,
) -> ModelResult<Vec<AttributeDefinition>> {
    let mut stmt = conn.prepare(
        "SELECT model_id, target_type, key, description, is_tag
         FROM model_attribute_definitions
         WHERE model_id = ?1 AND (?2 IS NULL OR target_type = ?2) AND (?3 = 0 OR is_tag = 1)
         ORDER BY target_type, key",
    )?;
    let definitions = stmt
        .query_map(params![model_id, target.map(TargetKind::as_str), tags_only], |row| {
            let target_type: String = row.get(1)?;
            Ok(AttributeDefinition {
                model_id: row.get(0)?,
                target: TargetKind::parse(&target_type).unwrap_or(TargetKind::Element),
                key: row.get(2)?,
                description: row.get(3)?,
                is_tag: row.get(4)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(definitions)
}

fn write_element(conn: &Connection, model_id: &str, element: &Element) -> ModelResult<()> {
    conn.execute(
        "INSERT OR REPLACE INTO model_elements
         (model_id, id, type_name, name, attributes_json, tags_json, valid_from, valid_to, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        params![
            model_id,
            element.id,
            element.type_name,
            element.name,
            to_json(&element.attributes)?,
            to_json(&element.tags)?,
            element.valid_from,
            element.valid_to,
            element.created_at,
            element.updated_at,
        ],
    )?;
    Ok(())
}

fn write_relationship(conn: &Connection, model_id: &str, relationship: &Relationship) -> ModelResult<()> {
    conn.execute(
        "INSERT OR REPLACE INTO model_relationships
         (model_id, id, type_name, source_element_id, target_element_id, name, attributes_json,
          tags_json, valid_from, valid_to, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
        params![
            model_id,
            relationship.id,
            relationship.type_name,
            relationship.source_element_id,
            relationship.target_element_id,
            relationship.name,
            to_json(&relationship.attributes)?,
            to_json(&relationship.tags)?,
            relationship.valid_from,
            relationship.valid_to,
            relationship.created_at,
            relationship.updated_at,
        ],
    )?;
    Ok(())
}

fn ensure_column(conn: &Connection, table: &str, column: &str, ddl: &str) -> rusqlite::Result<()> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({table})"))?;
    let columns = stmt
        .query_map([], |row| row.get::<_, String>(1))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    if !columns.iter().any(|c| c == column) {
        conn.execute(&format!("ALTER TABLE {table} ADD COLUMN {column} {ddl}"), [])?;
    }
    Ok(())
}

// --- Row mapping ---

fn row_to_model(row: &Row<'_>) -> rusqlite::Result<Model> {
    Ok(Model {
        id: row.get(0)?,
        name: row.get(1)?,
        description: row.get(2)?,
        attributes: json_column::<Attributes>(row, 3)?,
        created_at: row.get(4)?,
        updated_at: row.get(5)?,
        current_version: row.get(6)?,
    })
}

fn row_to_element(row: &Row<'_>) -> rusqlite::Result<Element> {
    Ok(Element {
        id: row.get(0)?,
        type_name: row.get(1)?,
        name: row.get(2)?,
        attributes: json_column(row, 3)?,
        tags: json_column(row, 4)?,
        valid_from: row.get(5)?,
        valid_to: row.get(6)?,
        created_at: row.get(7)?,
        updated_at: row.get(8)?,
    })
}

fn row_to_relationship(row: &Row<'_>) -> rusqlite::Result<Relationship> {
    Ok(Relationship {
        id: row.get(0)?,
        type_name: row.get(1)?,
        source_element_id: row.get(2)?,
        target_element_id: row.get(3)?,
        name: row.get(4)?,
        attributes: json_column(row, 5)?,
        tags: json_column(row, 6)?,
        valid_from: row.get(7)?,
        valid_to: row.get(8)?,
        created_at: row.get(9)?,
        updated_at: row.get(10)?,
    })
}

fn row_to_version_info(row: &Row<'_>) -> rusqlite::Result<VersionInfo> {
    Ok(VersionInfo {
        model_id: row.get(0)?,
        version: row.get(1)?,
        author: row.get(2)?,
        message: row.get(3)?,
        created_at: row.get(4)?,
    })
}

/// Decode a JSON text column; NULL or blank decodes to the default value.
fn json_column<T: DeserializeOwned + Default>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T> {
    let raw: Option<String> = row.get(idx)?;
    match raw.as_deref().map(str::trim) {
        None | Some("") => Ok(T::default()),
        Some(text) => serde_json::from_str(text).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
        }),
    }
}

fn to_json<T: Serialize>(value: &T) -> ModelResult<String> {
    Ok(serde_json::to_string(value)?)
}

/// Reject a blank argument; returns it trimmed.
fn require<'a>(field: &str, value: &'a str) -> ModelResult<&'a str> {
    let value = value.trim();
    if value.is_empty() {
        return Err(ModelError::invalid(format!("'{}' is required", field)));
    }
    Ok(value)
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
