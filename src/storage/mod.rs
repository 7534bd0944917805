//! Document storage
//!
//! - SQLite backend: one table per resource, two columns (id, JSON payload)
//! - `DocumentStore`: the operation set the HTTP surface calls into,
//!   publishing a change event after each successful mutation

mod sqlite;

pub use sqlite::SqliteBackend;

use crate::bus::{Action, UpdateBus};
use crate::resources::ResourceName;
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;

/// A JSON object, the only shape a document body may take
pub type JsonMap = serde_json::Map<String, Value>;

/// Storage errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// A stored document: store-assigned id plus the caller's body, verbatim
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub id: i64,
    pub body: JsonMap,
}

impl Document {
    /// Flatten into the wire shape: the body with `id` injected
    pub fn into_value(self) -> Value {
        let mut map = self.body;
        map.insert("id".to_string(), Value::from(self.id));
        Value::Object(map)
    }
}

/// One entry of a merge-patch.
///
/// JSON null in a patch means "remove this key"; a key the caller omits is
/// left untouched. Keeping the two apart as a tagged value is what lets
/// callers express all three of set / remove / no-change.
#[derive(Debug, Clone, PartialEq)]
pub enum PatchValue {
    Set(Value),
    Remove,
}

/// A merge-patch over a document body
#[derive(Debug, Clone, Default)]
pub struct Patch {
    entries: Vec<(String, PatchValue)>,
}

impl Patch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from a JSON object, mapping null values to removals
    pub fn from_object(map: JsonMap) -> Self {
        let entries = map
            .into_iter()
            .map(|(key, value)| match value {
                Value::Null => (key, PatchValue::Remove),
                other => (key, PatchValue::Set(other)),
            })
            .collect();
        Self { entries }
    }

    pub fn set(mut self, key: impl Into<String>, value: Value) -> Self {
        self.entries.push((key.into(), PatchValue::Set(value)));
        self
    }

    pub fn remove(mut self, key: impl Into<String>) -> Self {
        self.entries.push((key.into(), PatchValue::Remove));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Apply to a document body in place
    pub fn apply(&self, body: &mut JsonMap) {
        for (key, value) in &self.entries {
            match value {
                PatchValue::Set(v) => {
                    body.insert(key.clone(), v.clone());
                }
                PatchValue::Remove => {
                    body.remove(key);
                }
            }
        }
    }
}

/// The document operation set, scoped to already-registered resources.
///
/// Mutations publish to the bus only after the storage call came back
/// clean; a storage failure suppresses the event.
#[derive(Clone)]
pub struct DocumentStore {
    backend: Arc<SqliteBackend>,
    bus: Arc<UpdateBus>,
}

impl DocumentStore {
    pub fn new(backend: Arc<SqliteBackend>, bus: Arc<UpdateBus>) -> Self {
        Self { backend, bus }
    }

    /// Insert a document, returning its new id
    pub fn insert(&self, resource: &ResourceName, body: JsonMap) -> Result<i64, StorageError> {
        let id = self.backend.insert(resource, &body)?;
        self.bus.publish(resource, Action::Save);
        Ok(id)
    }

    /// Fetch a document by exact id
    pub fn get(&self, resource: &ResourceName, id: i64) -> Result<Option<Document>, StorageError> {
        self.backend.fetch(resource, id)
    }

    /// List documents, optionally narrowed by ANDed equality filters on
    /// top-level body keys
    pub fn list(
        &self,
        resource: &ResourceName,
        filters: &JsonMap,
    ) -> Result<Vec<Document>, StorageError> {
        self.backend.query(resource, filters)
    }

    /// Look up documents by exact string equality, bypassing the generic
    /// filter path's numeric normalization. Credential matching uses this:
    /// user and auth are opaque strings even when they look like numbers.
    pub fn find_exact(
        &self,
        resource: &ResourceName,
        pairs: &[(&str, &str)],
    ) -> Result<Vec<Document>, StorageError> {
        self.backend.query_exact(resource, pairs)
    }

    /// Merge-patch a document. A missing id is a silent no-op; the event
    /// fires either way once the command has run.
    pub fn update(
        &self,
        resource: &ResourceName,
        id: i64,
        patch: &Patch,
    ) -> Result<bool, StorageError> {
        let applied = self.backend.merge_update(resource, id, patch)?;
        self.bus.publish(resource, Action::Update);
        Ok(applied)
    }

    /// Delete a document. Idempotent; the event fires whether or not a row
    /// existed.
    pub fn delete(&self, resource: &ResourceName, id: i64) -> Result<(), StorageError> {
        self.backend.remove(resource, id)?;
        self.bus.publish(resource, Action::Delete);
        Ok(())
    }
}
