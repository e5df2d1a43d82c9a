//! Typed repositories over a [`DocumentStore`].
//!
//! [`Repo::update`] is the only way records change after creation. It
//! loads the current version, applies a synchronous mutator, and writes
//! back with a version check, retrying on conflict. A mutator that reports
//! "no change" produces no write at all, which is what keeps repeated
//! `next` calls on finished records free of persisted mutations.

use std::marker::PhantomData;
use std::sync::Arc;

use pagebench_core::ids::{allocate_id, IdAllocationError};
use pagebench_core::types::Timestamp;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::store::{Document, DocumentStore, StoreError};

/// Maximum compare-and-swap attempts per update.
pub const MAX_CAS_ATTEMPTS: u32 = 5;

/// A record type persisted as a document.
pub trait Entity: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    /// Document kind, e.g. `"run"`.
    const KIND: &'static str;

    fn id(&self) -> &str;

    fn is_finished(&self) -> bool;
}

/// A decoded record plus the store metadata it was read with.
#[derive(Debug, Clone)]
pub struct Versioned<T> {
    pub entity: T,
    pub version: i64,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl<T: Entity> Versioned<T> {
    fn decode(doc: Document) -> Result<Self, StoreError> {
        Ok(Self {
            entity: serde_json::from_value(doc.body)?,
            version: doc.version,
            created_at: doc.created_at,
            updated_at: doc.updated_at,
        })
    }
}

/// Result of [`Repo::update`].
#[derive(Debug, Clone)]
pub struct Update<T> {
    /// The record as persisted after the call.
    pub record: Versioned<T>,
    /// Whether this call wrote a new version.
    pub changed: bool,
}

impl<T> Update<T> {
    pub fn entity(&self) -> &T {
        &self.record.entity
    }
}

/// Typed access to documents of one kind.
pub struct Repo<T> {
    store: Arc<dyn DocumentStore>,
    _kind: PhantomData<fn() -> T>,
}

impl<T> Clone for Repo<T> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            _kind: PhantomData,
        }
    }
}

impl<T: Entity> Repo<T> {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self {
            store,
            _kind: PhantomData,
        }
    }

    pub async fn find(&self, id: &str) -> Result<Option<Versioned<T>>, StoreError> {
        self.store
            .get(T::KIND, id)
            .await?
            .map(Versioned::decode)
            .transpose()
    }

    /// Like [`find`](Self::find) but a missing record is an error.
    pub async fn load(&self, id: &str) -> Result<Versioned<T>, StoreError> {
        self.find(id).await?.ok_or_else(|| StoreError::NotFound {
            kind: T::KIND,
            id: id.to_string(),
        })
    }

    pub async fn create(&self, entity: &T) -> Result<Versioned<T>, StoreError> {
        let body = serde_json::to_value(entity)?;
        let doc = self
            .store
            .insert(T::KIND, entity.id(), entity.is_finished(), body)
            .await?;
        Versioned::decode(doc)
    }

    /// Create the record, or return the existing one if a record with the
    /// same id was already materialized.
    pub async fn create_or_get(&self, entity: &T) -> Result<Versioned<T>, StoreError> {
        match self.create(entity).await {
            Err(StoreError::AlreadyExists { .. }) => self.load(entity.id()).await,
            other => other,
        }
    }

    /// Pick a random id not yet used by any record of this kind.
    pub async fn allocate_id(&self) -> Result<String, StoreError> {
        let store = Arc::clone(&self.store);
        allocate_id(|candidate| {
            let store = Arc::clone(&store);
            async move { store.exists(T::KIND, &candidate).await }
        })
        .await
        .map_err(|e| match e {
            IdAllocationError::Check(err) => err,
            IdAllocationError::Exhausted(n) => StoreError::IdAllocation {
                kind: T::KIND,
                reason: format!("{n} consecutive collisions"),
            },
        })
    }

    /// Apply `mutate` with optimistic concurrency.
    ///
    /// `mutate` returns `true` if it changed the record. It may run several
    /// times (once per attempt) and must decide from the record it is given,
    /// not from captured state. Un-finishing a finished record is rejected.
    pub async fn update<F>(&self, id: &str, mut mutate: F) -> Result<Update<T>, StoreError>
    where
        F: FnMut(&mut T) -> bool + Send,
    {
        for attempt in 1..=MAX_CAS_ATTEMPTS {
            let current = self.load(id).await?;
            let was_finished = current.entity.is_finished();
            let mut next = current.entity.clone();

            if !mutate(&mut next) {
                return Ok(Update {
                    record: current,
                    changed: false,
                });
            }
            if was_finished && !next.is_finished() {
                return Err(StoreError::Invariant {
                    kind: T::KIND,
                    id: id.to_string(),
                    reason: "finished records cannot be reopened".to_string(),
                });
            }

            let body = serde_json::to_value(&next)?;
            match self
                .store
                .replace(T::KIND, id, current.version, next.is_finished(), body)
                .await?
            {
                Some(doc) => {
                    return Ok(Update {
                        record: Versioned::decode(doc)?,
                        changed: true,
                    })
                }
                None => {
                    tracing::debug!(
                        kind = T::KIND,
                        id,
                        attempt,
                        "Version conflict, retrying update",
                    );
                }
            }
        }

        Err(StoreError::Contended {
            kind: T::KIND,
            id: id.to_string(),
            attempts: MAX_CAS_ATTEMPTS,
        })
    }

    /// Records whose array `field` contains `needle`.
    pub async fn find_containing<N: Serialize + ?Sized>(
        &self,
        field: &str,
        needle: &N,
    ) -> Result<Vec<Versioned<T>>, StoreError> {
        let needle = serde_json::to_value(needle)?;
        self.store
            .find_containing(T::KIND, field, &needle)
            .await?
            .into_iter()
            .map(Versioned::decode)
            .collect()
    }

    /// Unfinished records last updated inside the given window.
    pub async fn find_stale(
        &self,
        updated_before: Timestamp,
        updated_after: Timestamp,
    ) -> Result<Vec<Versioned<T>>, StoreError> {
        self.store
            .find_stale(T::KIND, updated_before, updated_after)
            .await?
            .into_iter()
            .map(Versioned::decode)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use serde::Deserialize;

    use super::*;
    use crate::memory::MemoryStore;

    #[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
    struct Counter {
        id: String,
        value: u32,
        finished: bool,
    }

    impl Entity for Counter {
        const KIND: &'static str = "counter";

        fn id(&self) -> &str {
            &self.id
        }

        fn is_finished(&self) -> bool {
            self.finished
        }
    }

    fn repo() -> Repo<Counter> {
        Repo::new(Arc::new(MemoryStore::new()))
    }

    fn counter(id: &str) -> Counter {
        Counter {
            id: id.to_string(),
            value: 0,
            finished: false,
        }
    }

    #[tokio::test]
    async fn update_writes_new_version() {
        let repo = repo();
        repo.create(&counter("c")).await.unwrap();

        let update = repo
            .update("c", |c| {
                c.value += 1;
                true
            })
            .await
            .unwrap();

        assert!(update.changed);
        assert_eq!(update.record.version, 2);
        assert_eq!(update.entity().value, 1);
    }

    #[tokio::test]
    async fn unchanged_update_does_not_write() {
        let repo = repo();
        repo.create(&counter("c")).await.unwrap();

        let update = repo.update("c", |_| false).await.unwrap();

        assert!(!update.changed);
        assert_eq!(repo.load("c").await.unwrap().version, 1);
    }

    #[tokio::test]
    async fn reopening_finished_record_is_rejected() {
        let repo = repo();
        let mut done = counter("c");
        done.finished = true;
        repo.create(&done).await.unwrap();

        let err = repo
            .update("c", |c| {
                c.finished = false;
                true
            })
            .await
            .unwrap_err();
        assert_matches!(err, StoreError::Invariant { .. });
    }

    #[tokio::test]
    async fn concurrent_updates_all_apply() {
        let repo = repo();
        repo.create(&counter("c")).await.unwrap();

        let tasks: Vec<_> = (0..4)
            .map(|_| {
                let repo = repo.clone();
                tokio::spawn(async move {
                    repo.update("c", |c| {
                        c.value += 1;
                        true
                    })
                    .await
                })
            })
            .collect();
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        assert_eq!(repo.load("c").await.unwrap().entity.value, 4);
    }

    #[tokio::test]
    async fn load_missing_is_not_found() {
        let err = repo().load("nope").await.unwrap_err();
        assert_matches!(err, StoreError::NotFound { kind: "counter", .. });
    }

    #[tokio::test]
    async fn create_or_get_returns_existing() {
        let repo = repo();
        let mut first = counter("c");
        first.value = 7;
        repo.create(&first).await.unwrap();

        let existing = repo.create_or_get(&counter("c")).await.unwrap();
        assert_eq!(existing.entity.value, 7);
    }

    #[tokio::test]
    async fn allocated_ids_are_unique_for_kind() {
        let repo = repo();
        let id = repo.allocate_id().await.unwrap();
        assert_eq!(id.len(), pagebench_core::ids::ID_LENGTH);
    }
}
