//! PostgreSQL [`DocumentStore`] over the `documents` table.
//!
//! Compare-and-swap is a conditional `UPDATE ... WHERE version = $n`;
//! reverse lookups use JSONB containment on the whole body so the GIN
//! index applies.

use async_trait::async_trait;
use pagebench_core::types::Timestamp;
use serde_json::Value;

use crate::store::{Document, DocumentStore, StoreError};
use crate::DbPool;

/// Column list for `documents` queries.
const COLUMNS: &str = "kind, id, version, finished, body, created_at, updated_at";

#[derive(Clone)]
pub struct PgStore {
    pool: DbPool,
}

impl PgStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }
}

#[async_trait]
impl DocumentStore for PgStore {
    async fn get(&self, kind: &str, id: &str) -> Result<Option<Document>, StoreError> {
        let query = format!("SELECT {COLUMNS} FROM documents WHERE kind = $1 AND id = $2");
        let doc = sqlx::query_as::<_, Document>(&query)
            .bind(kind)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(doc)
    }

    async fn exists(&self, kind: &str, id: &str) -> Result<bool, StoreError> {
        let exists = sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS(SELECT 1 FROM documents WHERE kind = $1 AND id = $2)",
        )
        .bind(kind)
        .bind(id)
        .fetch_one(&self.pool)
        .await?;
        Ok(exists)
    }

    async fn insert(
        &self,
        kind: &str,
        id: &str,
        finished: bool,
        body: Value,
    ) -> Result<Document, StoreError> {
        let query = format!(
            "INSERT INTO documents (kind, id, version, finished, body) \
             VALUES ($1, $2, 1, $3, $4) \
             ON CONFLICT (kind, id) DO NOTHING \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, Document>(&query)
            .bind(kind)
            .bind(id)
            .bind(finished)
            .bind(&body)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| StoreError::AlreadyExists {
                kind: kind.to_string(),
                id: id.to_string(),
            })
    }

    async fn replace(
        &self,
        kind: &str,
        id: &str,
        expected_version: i64,
        finished: bool,
        body: Value,
    ) -> Result<Option<Document>, StoreError> {
        let query = format!(
            "UPDATE documents \
             SET version = version + 1, finished = $4, body = $5, updated_at = NOW() \
             WHERE kind = $1 AND id = $2 AND version = $3 \
             RETURNING {COLUMNS}"
        );
        let doc = sqlx::query_as::<_, Document>(&query)
            .bind(kind)
            .bind(id)
            .bind(expected_version)
            .bind(finished)
            .bind(&body)
            .fetch_optional(&self.pool)
            .await?;
        Ok(doc)
    }

    async fn find_containing(
        &self,
        kind: &str,
        field: &str,
        needle: &Value,
    ) -> Result<Vec<Document>, StoreError> {
        let mut probe = serde_json::Map::new();
        probe.insert(field.to_string(), Value::Array(vec![needle.clone()]));

        let query = format!(
            "SELECT {COLUMNS} FROM documents \
             WHERE kind = $1 AND body @> $2 \
             ORDER BY created_at ASC"
        );
        let docs = sqlx::query_as::<_, Document>(&query)
            .bind(kind)
            .bind(Value::Object(probe))
            .fetch_all(&self.pool)
            .await?;
        Ok(docs)
    }

    async fn find_stale(
        &self,
        kind: &str,
        updated_before: Timestamp,
        updated_after: Timestamp,
    ) -> Result<Vec<Document>, StoreError> {
        let query = format!(
            "SELECT {COLUMNS} FROM documents \
             WHERE kind = $1 AND NOT finished \
               AND updated_at < $2 AND updated_at > $3 \
             ORDER BY updated_at ASC"
        );
        let docs = sqlx::query_as::<_, Document>(&query)
            .bind(kind)
            .bind(updated_before)
            .bind(updated_after)
            .fetch_all(&self.pool)
            .await?;
        Ok(docs)
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        crate::health_check(&self.pool).await?;
        Ok(())
    }
}
