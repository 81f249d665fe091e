//! In-memory [`CollectionStore`] implementation for testing and embedding in
//! other tools.
//!
//! Uses `HashMap` and `Vec` behind `std::sync::RwLock` for thread safety.
//! Query is brute-force cosine distance over all stored vectors.

use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;

use crate::embedding::cosine_distance;
use crate::error::StoreError;
use crate::models::{Hit, IndexedEntry, MetadataFilter};

use super::CollectionStore;

/// Entries of one collection, in first-insertion order.
#[derive(Default)]
struct Collection {
    entries: Vec<IndexedEntry>,
    positions: HashMap<String, usize>,
}

impl Collection {
    fn upsert(&mut self, entry: &IndexedEntry) {
        match self.positions.get(&entry.id) {
            Some(&pos) => self.entries[pos] = entry.clone(),
            None => {
                self.positions.insert(entry.id.clone(), self.entries.len());
                self.entries.push(entry.clone());
            }
        }
    }
}

/// In-memory store for tests and short-lived sessions.
pub struct InMemoryStore {
    collections: RwLock<HashMap<String, Collection>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            collections: RwLock::new(HashMap::new()),
        }
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, HashMap<String, Collection>>, StoreError> {
        self.collections
            .read()
            .map_err(|_| StoreError::Backend("in-memory store lock poisoned".to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, HashMap<String, Collection>>, StoreError> {
        self.collections
            .write()
            .map_err(|_| StoreError::Backend("in-memory store lock poisoned".to_string()))
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CollectionStore for InMemoryStore {
    async fn create_collection(&self, name: &str) -> Result<(), StoreError> {
        let mut cols = self.write()?;
        if cols.contains_key(name) {
            return Err(StoreError::CollectionExists(name.to_string()));
        }
        cols.insert(name.to_string(), Collection::default());
        Ok(())
    }

    async fn has_collection(&self, name: &str) -> Result<bool, StoreError> {
        Ok(self.read()?.contains_key(name))
    }

    async fn delete_collection(&self, name: &str) -> Result<(), StoreError> {
        match self.write()?.remove(name) {
            Some(_) => Ok(()),
            None => Err(StoreError::CollectionNotFound(name.to_string())),
        }
    }

    async fn add(&self, name: &str, entries: &[IndexedEntry]) -> Result<(), StoreError> {
        let mut cols = self.write()?;
        let col = cols
            .get_mut(name)
            .ok_or_else(|| StoreError::CollectionNotFound(name.to_string()))?;
        for entry in entries {
            col.upsert(entry);
        }
        Ok(())
    }

    async fn query(
        &self,
        name: &str,
        embedding: &[f32],
        n_results: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<Hit>, StoreError> {
        let cols = self.read()?;
        let col = cols
            .get(name)
            .ok_or_else(|| StoreError::CollectionNotFound(name.to_string()))?;
        let mut hits: Vec<Hit> = col
            .entries
            .iter()
            .filter(|e| filter.map(|f| f.matches(&e.metadata)).unwrap_or(true))
            .map(|e| Hit {
                id: e.id.clone(),
                document: e.document.clone(),
                metadata: e.metadata.clone(),
                distance: cosine_distance(embedding, &e.embedding),
            })
            .collect();
        hits.sort_by(|a, b| {
            a.distance
                .partial_cmp(&b.distance)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        hits.truncate(n_results);
        Ok(hits)
    }

    async fn count(&self, name: &str) -> Result<usize, StoreError> {
        let cols = self.read()?;
        cols.get(name)
            .map(|c| c.entries.len())
            .ok_or_else(|| StoreError::CollectionNotFound(name.to_string()))
    }
}
