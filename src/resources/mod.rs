//! Resource naming and the lazy table registry
//!
//! A resource is any caller-supplied name: the first request that touches it
//! creates a backing table with two columns (integer id, JSON payload).
//! Names must match: [a-zA-Z0-9_-]+
//!
//! The name is the one thing that ends up inside a SQL statement as an
//! identifier rather than a bound parameter, so the grammar is a strict
//! allow-list, not an escape routine.

use crate::storage::{SqliteBackend, StorageError};
use dashmap::DashMap;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

/// Upper bound on resource name length, matching SQLite's comfort zone
/// for identifiers rather than any hard engine limit.
const MAX_NAME_LEN: usize = 128;

/// Valid characters for a resource name
fn is_valid_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '-'
}

#[derive(Debug, Error)]
pub enum ResourceError {
    #[error("resource name cannot be empty")]
    Empty,

    #[error("resource name too long: {0} chars (max {MAX_NAME_LEN})")]
    TooLong(usize),

    #[error("invalid resource name '{0}': must match [a-zA-Z0-9_-]+")]
    InvalidName(String),
}

/// A validated resource name, safe to use as a quoted SQL identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResourceName {
    name: String,
}

impl ResourceName {
    /// Parse and validate a resource name
    pub fn parse(name: &str) -> Result<Self, ResourceError> {
        if name.is_empty() {
            return Err(ResourceError::Empty);
        }

        if name.len() > MAX_NAME_LEN {
            return Err(ResourceError::TooLong(name.len()));
        }

        if !name.chars().all(is_valid_name_char) {
            return Err(ResourceError::InvalidName(name.to_string()));
        }

        Ok(Self {
            name: name.to_string(),
        })
    }

    pub fn as_str(&self) -> &str {
        &self.name
    }

    /// The name as a double-quoted SQL identifier.
    ///
    /// The grammar excludes `"`, so quoting is plain wrapping.
    pub fn quoted(&self) -> String {
        format!("\"{}\"", self.name)
    }
}

impl fmt::Display for ResourceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

/// Tracks which resources have a backing table.
///
/// The first `ensure` for a name checks `sqlite_master` and creates the
/// table if absent; later calls are served from the cache without touching
/// storage. A failed creation leaves the cache unchanged so the next
/// request retries.
#[derive(Clone)]
pub struct Registry {
    backend: Arc<SqliteBackend>,
    known: Arc<DashMap<String, ()>>,
}

impl Registry {
    pub fn new(backend: Arc<SqliteBackend>) -> Self {
        Self {
            backend,
            known: Arc::new(DashMap::new()),
        }
    }

    /// Make sure the resource has a backing table. Idempotent.
    pub fn ensure(&self, resource: &ResourceName) -> Result<(), StorageError> {
        if self.known.contains_key(resource.as_str()) {
            return Ok(());
        }

        if !self.backend.table_exists(resource)? {
            info!(resource = %resource, "creating backing table");
            self.backend.create_table(resource)?;
        } else {
            debug!(resource = %resource, "backing table already present");
        }

        // Only mark known after the table is confirmed to exist.
        self.known.insert(resource.as_str().to_string(), ());
        Ok(())
    }

    /// Number of resources known to this registry instance
    pub fn known_count(&self) -> usize {
        self.known.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_names() {
        let max_len = "x".repeat(128);
        for name in ["todos", "user_authenticate", "a", "A-1_b", max_len.as_str()] {
            assert!(ResourceName::parse(name).is_ok(), "expected valid: {name}");
        }
    }

    #[test]
    fn test_invalid_names() {
        assert!(matches!(ResourceName::parse(""), Err(ResourceError::Empty)));
        assert!(matches!(
            ResourceName::parse(&"x".repeat(129)),
            Err(ResourceError::TooLong(129))
        ));

        for name in [
            "a.b",
            "users; DROP TABLE users",
            "na me",
            "quo\"te",
            "semi;colon",
            "tick`",
        ] {
            assert!(
                matches!(ResourceName::parse(name), Err(ResourceError::InvalidName(_))),
                "expected invalid: {name}"
            );
        }
    }

    #[test]
    fn test_quoted_identifier() {
        let name = ResourceName::parse("todos").unwrap();
        assert_eq!(name.quoted(), "\"todos\"");
    }

    #[test]
    fn test_ensure_is_idempotent() {
        let backend = Arc::new(SqliteBackend::in_memory().unwrap());
        let registry = Registry::new(backend.clone());
        let name = ResourceName::parse("todos").unwrap();

        registry.ensure(&name).unwrap();
        registry.ensure(&name).unwrap();

        assert!(backend.table_exists(&name).unwrap());
        assert_eq!(registry.known_count(), 1);
    }

    #[test]
    fn test_ensure_sees_tables_created_elsewhere() {
        let backend = Arc::new(SqliteBackend::in_memory().unwrap());
        let name = ResourceName::parse("todos").unwrap();
        backend.create_table(&name).unwrap();

        // A fresh registry with a cold cache must not fail on the
        // pre-existing table.
        let registry = Registry::new(backend);
        registry.ensure(&name).unwrap();
    }
}
