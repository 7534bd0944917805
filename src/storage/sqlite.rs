//! SQLite storage backend
//!
//! All operations run through one shared connection; write serialization is
//! SQLite's own locking, not anything layered on top. Resource names arrive
//! pre-validated (see `resources`) and are the only identifiers ever spliced
//! into SQL; every value and every JSON path binds as a parameter.

use crate::resources::ResourceName;
use crate::storage::{Document, JsonMap, Patch, StorageError};
use parking_lot::Mutex;
use rusqlite::types::{ToSqlOutput, Value as SqlValue};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, ToSql};
use serde_json::Value;
use std::path::Path;
use tracing::debug;

/// A filter value bound into a query.
///
/// JSON numbers (and strings that parse fully as numbers) bind numerically
/// so `{"age": 30}` matches a stored 30 but never a stored "30"; everything
/// else binds as text.
#[derive(Debug, Clone, PartialEq)]
enum BindValue {
    Int(i64),
    Real(f64),
    Text(String),
}

impl BindValue {
    fn from_json(value: &Value) -> Self {
        match value {
            Value::Number(n) => match n.as_i64() {
                Some(i) => BindValue::Int(i),
                None => BindValue::Real(n.as_f64().unwrap_or(f64::NAN)),
            },
            Value::String(s) => {
                if let Ok(i) = s.parse::<i64>() {
                    BindValue::Int(i)
                } else if let Ok(f) = s.parse::<f64>() {
                    BindValue::Real(f)
                } else {
                    BindValue::Text(s.clone())
                }
            }
            // json_extract yields 1/0 for JSON booleans
            Value::Bool(b) => BindValue::Int(*b as i64),
            other => BindValue::Text(other.to_string()),
        }
    }
}

impl ToSql for BindValue {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            BindValue::Int(i) => ToSqlOutput::Owned(SqlValue::Integer(*i)),
            BindValue::Real(f) => ToSqlOutput::Owned(SqlValue::Real(*f)),
            BindValue::Text(s) => ToSqlOutput::Owned(SqlValue::Text(s.clone())),
        })
    }
}

/// JSON path to a top-level key, for json_extract. Bound as a parameter,
/// never interpolated into the statement. Keys that cannot be expressed in
/// a quoted path label are rejected by `path_expressible`.
fn json_path(key: &str) -> String {
    format!("$.\"{key}\"")
}

/// Whether a filter key fits inside a quoted JSON path label. Quotes and
/// backslashes have no escape syntax in SQLite's path grammar, so such keys
/// are filtered in memory instead (see `value_matches`).
fn path_expressible(key: &str) -> bool {
    !key.contains('"') && !key.contains('\\')
}

/// In-memory counterpart of the SQL equality test, for keys that cannot be
/// expressed as a JSON path. Mirrors SQLite's comparison of a json_extract
/// result against the bound value: numeric against numeric, text against
/// text, JSON booleans as 1/0.
fn value_matches(stored: &Value, bind: &BindValue) -> bool {
    match bind {
        BindValue::Int(i) => {
            stored.as_f64() == Some(*i as f64)
                || stored.as_bool().map(|b| b as i64) == Some(*i)
        }
        BindValue::Real(f) => stored.as_f64() == Some(*f),
        BindValue::Text(t) => stored.as_str() == Some(t.as_str()),
    }
}

/// SQLite-backed document storage
pub struct SqliteBackend {
    conn: Mutex<Connection>,
}

impl SqliteBackend {
    /// Open a file-backed database, creating it if absent
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let conn = Connection::open(path)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open an in-memory database (for testing)
    pub fn in_memory() -> Result<Self, StorageError> {
        let conn = Connection::open_in_memory()?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Check storage metadata for the resource's backing table
    pub fn table_exists(&self, resource: &ResourceName) -> Result<bool, StorageError> {
        let conn = self.conn.lock();
        let count: i64 = conn.query_row(
            "SELECT count(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
            [resource.as_str()],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    /// Create the two-column backing table for a resource
    pub fn create_table(&self, resource: &ResourceName) -> Result<(), StorageError> {
        let conn = self.conn.lock();
        conn.execute(
            &format!(
                "CREATE TABLE IF NOT EXISTS {} \
                 (id INTEGER PRIMARY KEY AUTOINCREMENT, data TEXT NOT NULL)",
                resource.quoted()
            ),
            [],
        )?;
        Ok(())
    }

    /// Insert a document body, returning the assigned id
    pub fn insert(&self, resource: &ResourceName, body: &JsonMap) -> Result<i64, StorageError> {
        let raw = serde_json::to_string(body)?;
        let conn = self.conn.lock();
        conn.execute(
            &format!("INSERT INTO {} (data) VALUES (json(?1))", resource.quoted()),
            params![raw],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Fetch a single document by id
    pub fn fetch(&self, resource: &ResourceName, id: i64) -> Result<Option<Document>, StorageError> {
        let conn = self.conn.lock();
        let raw: Option<String> = conn
            .query_row(
                &format!("SELECT data FROM {} WHERE id = ?1", resource.quoted()),
                params![id],
                |row| row.get(0),
            )
            .optional()?;

        match raw {
            None => Ok(None),
            Some(raw) => {
                let body: JsonMap = serde_json::from_str(&raw)?;
                Ok(Some(Document { id, body }))
            }
        }
    }

    /// Query documents, narrowed by ANDed equality filters on top-level
    /// keys. Filter values bind with numeric normalization (`BindValue`);
    /// keys that cannot be a JSON path label are matched in memory.
    pub fn query(
        &self,
        resource: &ResourceName,
        filters: &JsonMap,
    ) -> Result<Vec<Document>, StorageError> {
        let mut sql = format!("SELECT id, data FROM {}", resource.quoted());
        let mut binds: Vec<BindValue> = Vec::with_capacity(filters.len() * 2);
        let mut clauses = Vec::new();
        let mut mem_filters: Vec<(&String, BindValue)> = Vec::new();

        for (key, value) in filters {
            let bind = BindValue::from_json(value);
            if path_expressible(key) {
                binds.push(BindValue::Text(json_path(key)));
                let path_idx = binds.len();
                binds.push(bind);
                let value_idx = binds.len();
                clauses.push(format!("json_extract(data, ?{path_idx}) = ?{value_idx}"));
            } else {
                mem_filters.push((key, bind));
            }
        }

        if !clauses.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&clauses.join(" AND "));
        }

        debug!(resource = %resource, sql = %sql, binds = ?binds, "query");

        let mut docs = self.select_documents(&sql, &binds)?;

        if !mem_filters.is_empty() {
            docs.retain(|doc| {
                mem_filters.iter().all(|(key, bind)| {
                    doc.body
                        .get(key.as_str())
                        .is_some_and(|stored| value_matches(stored, bind))
                })
            });
        }

        Ok(docs)
    }

    /// Query documents by exact equality with every value bound as text,
    /// no numeric normalization. Credential lookup goes through here: the
    /// pair is compared as opaque strings, so an all-digit secret matches
    /// its stored form.
    pub fn query_exact(
        &self,
        resource: &ResourceName,
        pairs: &[(&str, &str)],
    ) -> Result<Vec<Document>, StorageError> {
        let mut sql = format!("SELECT id, data FROM {}", resource.quoted());
        let mut binds: Vec<BindValue> = Vec::with_capacity(pairs.len() * 2);

        if !pairs.is_empty() {
            let mut clauses = Vec::with_capacity(pairs.len());
            for (key, value) in pairs {
                if !path_expressible(key) {
                    return Ok(Vec::new());
                }
                binds.push(BindValue::Text(json_path(key)));
                let path_idx = binds.len();
                binds.push(BindValue::Text(value.to_string()));
                let value_idx = binds.len();
                clauses.push(format!("json_extract(data, ?{path_idx}) = ?{value_idx}"));
            }
            sql.push_str(" WHERE ");
            sql.push_str(&clauses.join(" AND "));
        }

        self.select_documents(&sql, &binds)
    }

    fn select_documents(
        &self,
        sql: &str,
        binds: &[BindValue],
    ) -> Result<Vec<Document>, StorageError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt
            .query_map(params_from_iter(binds.iter()), |row| {
                Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(id, raw)| {
                let body: JsonMap = serde_json::from_str(&raw)?;
                Ok(Document { id, body })
            })
            .collect()
    }

    /// Read-modify-write merge of a patch into a stored body.
    ///
    /// Returns false without touching anything when the id does not exist.
    /// Both steps run under one lock hold on the shared connection.
    pub fn merge_update(
        &self,
        resource: &ResourceName,
        id: i64,
        patch: &Patch,
    ) -> Result<bool, StorageError> {
        let conn = self.conn.lock();
        let raw: Option<String> = conn
            .query_row(
                &format!("SELECT data FROM {} WHERE id = ?1", resource.quoted()),
                params![id],
                |row| row.get(0),
            )
            .optional()?;

        let Some(raw) = raw else {
            return Ok(false);
        };

        let mut body: JsonMap = serde_json::from_str(&raw)?;
        patch.apply(&mut body);

        conn.execute(
            &format!("UPDATE {} SET data = json(?1) WHERE id = ?2", resource.quoted()),
            params![serde_json::to_string(&body)?, id],
        )?;
        Ok(true)
    }

    /// Delete a row if present; returns whether one existed
    pub fn remove(&self, resource: &ResourceName, id: i64) -> Result<bool, StorageError> {
        let conn = self.conn.lock();
        let affected = conn.execute(
            &format!("DELETE FROM {} WHERE id = ?1", resource.quoted()),
            params![id],
        )?;
        Ok(affected > 0)
    }
}
