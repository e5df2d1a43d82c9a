//! The document store contract.
//!
//! A document is one record (run, comparison, series, batch) serialized to
//! JSON, tagged with its kind and a monotonically increasing version. The
//! version is the compare-and-swap token: [`DocumentStore::replace`] only
//! writes when the caller saw the latest version.

use async_trait::async_trait;
use pagebench_core::types::Timestamp;
use serde_json::Value;

/// A stored record with its store-managed metadata.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct Document {
    pub kind: String,
    pub id: String,
    pub version: i64,
    /// Mirrors the record's own `finished` flag so sweeps can filter on it.
    pub finished: bool,
    pub body: Value,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

/// Errors from the persistence layer.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("{kind} {id} not found")]
    NotFound { kind: &'static str, id: String },

    #[error("{kind} {id} already exists")]
    AlreadyExists { kind: String, id: String },

    /// Every compare-and-swap attempt lost to a concurrent writer.
    #[error("{kind} {id} kept changing underneath {attempts} update attempts")]
    Contended {
        kind: &'static str,
        id: String,
        attempts: u32,
    },

    /// An update tried to break a record invariant (e.g. un-finish it).
    #[error("Invariant violated on {kind} {id}: {reason}")]
    Invariant {
        kind: &'static str,
        id: String,
        reason: String,
    },

    #[error("Could not allocate an id for {kind}: {reason}")]
    IdAllocation { kind: &'static str, reason: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Storage backend for versioned JSON documents.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Point read.
    async fn get(&self, kind: &str, id: &str) -> Result<Option<Document>, StoreError>;

    async fn exists(&self, kind: &str, id: &str) -> Result<bool, StoreError> {
        Ok(self.get(kind, id).await?.is_some())
    }

    /// Insert a new document at version 1. Fails with
    /// [`StoreError::AlreadyExists`] if the id is taken.
    async fn insert(
        &self,
        kind: &str,
        id: &str,
        finished: bool,
        body: Value,
    ) -> Result<Document, StoreError>;

    /// Overwrite a document if its current version equals
    /// `expected_version`. Returns `Ok(None)` on a version mismatch (or if
    /// the document vanished); the caller should reload and retry.
    async fn replace(
        &self,
        kind: &str,
        id: &str,
        expected_version: i64,
        finished: bool,
        body: Value,
    ) -> Result<Option<Document>, StoreError>;

    /// Documents of `kind` whose top-level array `field` has an element
    /// containing `needle` (JSON containment: equal scalars, or objects whose
    /// keys are a superset of the needle's).
    async fn find_containing(
        &self,
        kind: &str,
        field: &str,
        needle: &Value,
    ) -> Result<Vec<Document>, StoreError>;

    /// Unfinished documents of `kind` last updated strictly between
    /// `updated_after` and `updated_before`, oldest first.
    async fn find_stale(
        &self,
        kind: &str,
        updated_before: Timestamp,
        updated_after: Timestamp,
    ) -> Result<Vec<Document>, StoreError>;

    /// Verify the backend is reachable.
    async fn health_check(&self) -> Result<(), StoreError>;
}

/// JSON containment with PostgreSQL `@>` semantics.
pub fn json_contains(haystack: &Value, needle: &Value) -> bool {
    match (haystack, needle) {
        (Value::Object(h), Value::Object(n)) => n
            .iter()
            .all(|(k, nv)| h.get(k).is_some_and(|hv| json_contains(hv, nv))),
        (Value::Array(h), Value::Array(n)) => n
            .iter()
            .all(|nv| h.iter().any(|hv| json_contains(hv, nv))),
        (h, n) => h == n,
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn scalar_in_array() {
        assert!(json_contains(&json!(["a", "b"]), &json!(["b"])));
        assert!(!json_contains(&json!(["a", "b"]), &json!(["c"])));
    }

    #[test]
    fn partial_object_in_array() {
        let stages = json!([
            {"kind": "warmup", "submission_id": "s1", "finished": true},
            {"kind": "performance", "submission_id": "s2", "finished": false},
        ]);
        assert!(json_contains(&stages, &json!([{"submission_id": "s2"}])));
        assert!(!json_contains(&stages, &json!([{"submission_id": "s3"}])));
    }

    #[test]
    fn null_does_not_match_string() {
        let stages = json!([{"submission_id": null}]);
        assert!(!json_contains(&stages, &json!([{"submission_id": "s1"}])));
    }
}
