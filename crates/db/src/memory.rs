//! In-process [`DocumentStore`] backed by a `HashMap`.
//!
//! Used when no `DATABASE_URL` is configured and throughout the test
//! suites. Semantics (versioning, containment, stale filtering) match
//! [`PgStore`](crate::PgStore).

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use pagebench_core::types::Timestamp;
use serde_json::Value;
use tokio::sync::RwLock;

use crate::store::{json_contains, Document, DocumentStore, StoreError};

type Key = (String, String);

#[derive(Default)]
pub struct MemoryStore {
    documents: RwLock<HashMap<Key, Document>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored documents of `kind`.
    pub async fn count(&self, kind: &str) -> usize {
        self.documents
            .read()
            .await
            .keys()
            .filter(|(k, _)| k == kind)
            .count()
    }

    /// Overwrite a document's `updated_at`. Lets tests age records into the
    /// sweep window without waiting.
    pub async fn backdate(&self, kind: &str, id: &str, updated_at: Timestamp) -> bool {
        let mut docs = self.documents.write().await;
        match docs.get_mut(&(kind.to_string(), id.to_string())) {
            Some(doc) => {
                doc.updated_at = updated_at;
                true
            }
            None => false,
        }
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn get(&self, kind: &str, id: &str) -> Result<Option<Document>, StoreError> {
        let docs = self.documents.read().await;
        Ok(docs.get(&(kind.to_string(), id.to_string())).cloned())
    }

    async fn insert(
        &self,
        kind: &str,
        id: &str,
        finished: bool,
        body: Value,
    ) -> Result<Document, StoreError> {
        let key = (kind.to_string(), id.to_string());
        let mut docs = self.documents.write().await;
        if docs.contains_key(&key) {
            return Err(StoreError::AlreadyExists {
                kind: kind.to_string(),
                id: id.to_string(),
            });
        }
        let now = Utc::now();
        let doc = Document {
            kind: kind.to_string(),
            id: id.to_string(),
            version: 1,
            finished,
            body,
            created_at: now,
            updated_at: now,
        };
        docs.insert(key, doc.clone());
        Ok(doc)
    }

    async fn replace(
        &self,
        kind: &str,
        id: &str,
        expected_version: i64,
        finished: bool,
        body: Value,
    ) -> Result<Option<Document>, StoreError> {
        let mut docs = self.documents.write().await;
        let Some(doc) = docs.get_mut(&(kind.to_string(), id.to_string())) else {
            return Ok(None);
        };
        if doc.version != expected_version {
            return Ok(None);
        }
        doc.version += 1;
        doc.finished = finished;
        doc.body = body;
        doc.updated_at = Utc::now();
        Ok(Some(doc.clone()))
    }

    async fn find_containing(
        &self,
        kind: &str,
        field: &str,
        needle: &Value,
    ) -> Result<Vec<Document>, StoreError> {
        let wrapped = Value::Array(vec![needle.clone()]);
        let docs = self.documents.read().await;
        let mut found: Vec<Document> = docs
            .values()
            .filter(|d| d.kind == kind)
            .filter(|d| {
                d.body
                    .get(field)
                    .is_some_and(|arr| arr.is_array() && json_contains(arr, &wrapped))
            })
            .cloned()
            .collect();
        found.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(found)
    }

    async fn find_stale(
        &self,
        kind: &str,
        updated_before: Timestamp,
        updated_after: Timestamp,
    ) -> Result<Vec<Document>, StoreError> {
        let docs = self.documents.read().await;
        let mut found: Vec<Document> = docs
            .values()
            .filter(|d| d.kind == kind && !d.finished)
            .filter(|d| d.updated_at < updated_before && d.updated_at > updated_after)
            .cloned()
            .collect();
        found.sort_by(|a, b| a.updated_at.cmp(&b.updated_at));
        Ok(found)
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        Ok(())
    }
}
