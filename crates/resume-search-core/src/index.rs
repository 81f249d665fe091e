//! Vector index adapter over a [`CollectionStore`].
//!
//! [`VectorIndex`] addresses a single named collection and gives it the
//! lifecycle the rest of the pipeline relies on:
//!
//! - [`get_or_create_collection`](VectorIndex::get_or_create_collection) is
//!   idempotent.
//! - [`reset_collection`](VectorIndex::reset_collection) drops and recreates,
//!   tolerating a collection that does not exist yet.
//! - [`upsert`](VectorIndex::upsert) writes records and vectors in chunks.
//!   Chunks only bound the payload size; they are not a durability boundary.
//!   A failure halfway leaves a mixed collection that the caller repairs
//!   with a reset and a full re-upsert.

use std::sync::Arc;

use tracing::{debug, info};

use crate::error::StoreError;
use crate::models::{CanonicalRecord, Hit, IndexedEntry, MetadataFilter};
use crate::store::CollectionStore;

/// Default collection name.
pub const DEFAULT_COLLECTION: &str = "cv_embeddings";

/// Default number of entries written per store call.
pub const DEFAULT_UPSERT_BATCH: usize = 1000;

/// Handle returned by the lifecycle calls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionHandle {
    pub name: String,
}

/// Adapter binding a [`CollectionStore`] to one collection name.
#[derive(Clone)]
pub struct VectorIndex {
    store: Arc<dyn CollectionStore>,
    collection: String,
}

impl VectorIndex {
    pub fn new(store: Arc<dyn CollectionStore>, collection: impl Into<String>) -> Self {
        Self {
            store,
            collection: collection.into(),
        }
    }

    fn handle(&self) -> CollectionHandle {
        CollectionHandle {
            name: self.collection.clone(),
        }
    }

    /// Create the collection unless it already exists.
    pub async fn get_or_create_collection(&self) -> Result<CollectionHandle, StoreError> {
        if self.store.has_collection(&self.collection).await? {
            return Ok(self.handle());
        }
        match self.store.create_collection(&self.collection).await {
            Ok(()) | Err(StoreError::CollectionExists(_)) => Ok(self.handle()),
            Err(e) => Err(e),
        }
    }

    /// Drop and recreate the collection.
    pub async fn reset_collection(&self) -> Result<CollectionHandle, StoreError> {
        match self.store.delete_collection(&self.collection).await {
            Ok(()) | Err(StoreError::CollectionNotFound(_)) => {}
            Err(e) => return Err(e),
        }
        match self.store.create_collection(&self.collection).await {
            Ok(()) | Err(StoreError::CollectionExists(_)) => {}
            Err(e) => return Err(e),
        }
        info!(collection = %self.collection, "collection reset");
        Ok(self.handle())
    }

    /// Write `(id, text, {category}, vector)` for every record, `batch_size`
    /// entries per store call. `records[i]` pairs with `vectors[i]`.
    ///
    /// Returns the collection count after the last chunk.
    ///
    /// # Errors
    ///
    /// [`StoreError::LengthMismatch`] before anything is written when the two
    /// slices differ in length; otherwise whatever the store reports.
    pub async fn upsert(
        &self,
        records: &[CanonicalRecord],
        vectors: &[Vec<f32>],
        batch_size: usize,
    ) -> Result<usize, StoreError> {
        if records.len() != vectors.len() {
            return Err(StoreError::LengthMismatch {
                records: records.len(),
                vectors: vectors.len(),
            });
        }
        self.get_or_create_collection().await?;

        let batch_size = batch_size.max(1);
        for (chunk_idx, (recs, vecs)) in records
            .chunks(batch_size)
            .zip(vectors.chunks(batch_size))
            .enumerate()
        {
            let entries: Vec<IndexedEntry> = recs
                .iter()
                .zip(vecs.iter())
                .map(|(r, v)| IndexedEntry {
                    id: r.id.clone(),
                    document: r.text.clone(),
                    metadata: r.metadata(),
                    embedding: v.clone(),
                })
                .collect();
            self.store.add(&self.collection, &entries).await?;
            debug!(chunk = chunk_idx, entries = entries.len(), "upserted chunk");
        }

        self.count().await
    }

    /// Nearest `top_k` entries, closest first. An empty collection yields no
    /// hits.
    pub async fn query(
        &self,
        vector: &[f32],
        top_k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<Hit>, StoreError> {
        self.get_or_create_collection().await?;
        if top_k == 0 {
            return Ok(Vec::new());
        }
        self.store
            .query(&self.collection, vector, top_k, filter)
            .await
    }

    /// Number of entries currently stored (zero if the collection is missing).
    pub async fn count(&self) -> Result<usize, StoreError> {
        match self.store.count(&self.collection).await {
            Ok(n) => Ok(n),
            Err(StoreError::CollectionNotFound(_)) => Ok(0),
            Err(e) => Err(e),
        }
    }
}
