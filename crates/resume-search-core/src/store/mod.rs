//! Collection-store contract for external vector stores.
//!
//! The [`CollectionStore`] trait is the narrow surface Resume Search needs
//! from a persistent, collection-oriented vector store: collection
//! lifecycle, whole-record add, similarity query, and count. Nearest-neighbor
//! search itself is the store's business.
//!
//! Lifecycle calls are strict here (creating an existing collection fails
//! with [`StoreError::CollectionExists`], deleting a missing one with
//! [`StoreError::CollectionNotFound`]); the tolerant behavior lives in
//! [`VectorIndex`](crate::index::VectorIndex).
//!
//! Implementations must be `Send + Sync` to work with async runtimes.

pub mod memory;

use async_trait::async_trait;

use crate::error::StoreError;
use crate::models::{Hit, IndexedEntry, MetadataFilter};

/// Abstract collection-oriented vector store.
///
/// # Operations
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`create_collection`](CollectionStore::create_collection) | Create a named collection |
/// | [`has_collection`](CollectionStore::has_collection) | Check whether a collection exists |
/// | [`delete_collection`](CollectionStore::delete_collection) | Drop a collection and its entries |
/// | [`add`](CollectionStore::add) | Insert or overwrite whole entries by id |
/// | [`query`](CollectionStore::query) | Nearest entries by ascending distance |
/// | [`count`](CollectionStore::count) | Number of stored entries |
#[async_trait]
pub trait CollectionStore: Send + Sync {
    async fn create_collection(&self, name: &str) -> Result<(), StoreError>;

    async fn has_collection(&self, name: &str) -> Result<bool, StoreError>;

    async fn delete_collection(&self, name: &str) -> Result<(), StoreError>;

    /// Insert entries; an entry whose id already exists replaces it entirely.
    async fn add(&self, name: &str, entries: &[IndexedEntry]) -> Result<(), StoreError>;

    /// Up to `n_results` entries passing `filter`, closest first.
    async fn query(
        &self,
        name: &str,
        embedding: &[f32],
        n_results: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<Hit>, StoreError>;

    async fn count(&self, name: &str) -> Result<usize, StoreError>;
}
