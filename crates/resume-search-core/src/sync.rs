//! Synchronization gates between the source file, the embeddings and the
//! vector index.
//!
//! Two independent gates decide what must be rebuilt before a query is
//! served, both keyed on a [`Fingerprint`]:
//!
//! - **Embedding gate**: stale when the [`EmbeddingCache`] holds no vectors
//!   for the current fingerprint. Recomputes the whole corpus, never a diff.
//! - **Index gate**: stale when a reindex is pending, the collection is
//!   empty, or the remembered index fingerprint differs. A stale non-empty
//!   collection is reset before the full re-upsert unless the staleness comes
//!   from a pending adoption (which already reset it).
//!
//! Both gates are no-ops when fresh.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use crate::embedding::{EmbeddingProvider, ProgressFn};
use crate::error::{EmbedError, SyncError};
use crate::index::{VectorIndex, DEFAULT_UPSERT_BATCH};
use crate::models::CanonicalRecord;

/// Cache-coherence token for the source file and embedding configuration.
///
/// Any change to the file's identity, modification time, size, the number of
/// records it yields, or the embedding kind/model produces a different value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fingerprint {
    pub source_path: String,
    pub modified_ms: i64,
    pub size: u64,
    pub record_count: usize,
    pub embedding_kind: String,
    pub embedding_model: String,
}

impl Fingerprint {
    /// Short SHA-256 digest for display.
    pub fn digest(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.source_path.as_bytes());
        hasher.update(self.modified_ms.to_le_bytes());
        hasher.update(self.size.to_le_bytes());
        hasher.update((self.record_count as u64).to_le_bytes());
        hasher.update(self.embedding_kind.as_bytes());
        hasher.update([0u8]);
        hasher.update(self.embedding_model.as_bytes());
        hasher
            .finalize()
            .iter()
            .take(8)
            .map(|b| format!("{:02x}", b))
            .collect()
    }
}

/// Single-slot cache of the embeddings for one fingerprint.
///
/// One instance per pipeline run; putting a new fingerprint evicts the old
/// vectors.
#[derive(Debug, Default)]
pub struct EmbeddingCache {
    slot: Option<(Fingerprint, Vec<Vec<f32>>)>,
}

impl EmbeddingCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, fingerprint: &Fingerprint) -> Option<&[Vec<f32>]> {
        match &self.slot {
            Some((fp, vectors)) if fp == fingerprint => Some(vectors.as_slice()),
            _ => None,
        }
    }

    pub fn put(&mut self, fingerprint: Fingerprint, vectors: Vec<Vec<f32>>) {
        self.slot = Some((fingerprint, vectors));
    }

    pub fn clear(&mut self) {
        self.slot = None;
    }
}

/// Remembered index state, persisted between runs by the application.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncState {
    /// Fingerprint the collection was last fully built from.
    pub indexed: Option<Fingerprint>,
    /// Set when a new source was adopted; cleared by the next index build.
    pub pending_reindex: bool,
}

/// What [`SyncController::ensure_index`] did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexOutcome {
    Fresh { count: usize },
    Rebuilt {
        count: usize,
        reset: bool,
        reembedded: bool,
    },
}

impl IndexOutcome {
    pub fn count(&self) -> usize {
        match self {
            IndexOutcome::Fresh { count } | IndexOutcome::Rebuilt { count, .. } => *count,
        }
    }
}

/// Owns the gate state for one collection.
pub struct SyncController {
    index: VectorIndex,
    state: SyncState,
    cache: EmbeddingCache,
    upsert_batch: usize,
}

impl SyncController {
    pub fn new(index: VectorIndex, state: SyncState) -> Self {
        Self {
            index,
            state,
            cache: EmbeddingCache::new(),
            upsert_batch: DEFAULT_UPSERT_BATCH,
        }
    }

    pub fn with_upsert_batch(mut self, batch: usize) -> Self {
        self.upsert_batch = batch.max(1);
        self
    }

    pub fn index(&self) -> &VectorIndex {
        &self.index
    }

    pub fn state(&self) -> &SyncState {
        &self.state
    }

    pub fn embeddings_stale(&self, fingerprint: &Fingerprint) -> bool {
        self.cache.get(fingerprint).is_none()
    }

    /// Make sure the cache holds vectors for `fingerprint`, embedding every
    /// record's text when it does not. Returns whether anything was embedded.
    ///
    /// The provider must already be fitted on `records` when it needs a fit.
    pub async fn ensure_embeddings(
        &mut self,
        fingerprint: &Fingerprint,
        records: &[CanonicalRecord],
        provider: &dyn EmbeddingProvider,
        progress: ProgressFn<'_>,
    ) -> Result<bool, SyncError> {
        if !self.embeddings_stale(fingerprint) {
            debug!(fingerprint = %fingerprint.digest(), "embeddings fresh");
            return Ok(false);
        }

        info!(
            records = records.len(),
            kind = provider.kind(),
            model = provider.model_name(),
            "embedding corpus"
        );
        let texts: Vec<String> = records.iter().map(|r| r.text.clone()).collect();
        let vectors = provider.embed_batch_with_progress(&texts, progress).await?;
        if vectors.len() != texts.len() {
            return Err(EmbedError::CountMismatch {
                expected: texts.len(),
                got: vectors.len(),
            }
            .into());
        }
        check_dimensions(&vectors, provider.dims())?;

        self.cache.put(fingerprint.clone(), vectors);
        Ok(true)
    }

    /// Whether the index must be rebuilt before serving `fingerprint`.
    pub async fn index_stale(&self, fingerprint: &Fingerprint) -> Result<bool, SyncError> {
        if self.state.pending_reindex {
            return Ok(true);
        }
        if self.state.indexed.as_ref() != Some(fingerprint) {
            return Ok(true);
        }
        Ok(self.index.count().await? == 0)
    }

    /// Run both gates for `fingerprint`.
    pub async fn ensure_index(
        &mut self,
        fingerprint: &Fingerprint,
        records: &[CanonicalRecord],
        provider: &dyn EmbeddingProvider,
        progress: ProgressFn<'_>,
    ) -> Result<IndexOutcome, SyncError> {
        if !self.index_stale(fingerprint).await? {
            let count = self.index.count().await?;
            debug!(count, "index fresh");
            return Ok(IndexOutcome::Fresh { count });
        }

        let mut reset = false;
        if !self.state.pending_reindex && self.index.count().await? > 0 {
            self.index.reset_collection().await?;
            reset = true;
        }

        let reembedded = self
            .ensure_embeddings(fingerprint, records, provider, progress)
            .await?;
        let vectors = self.cache.get(fingerprint).unwrap_or(&[]);
        let count = self
            .index
            .upsert(records, vectors, self.upsert_batch)
            .await?;

        self.state.indexed = Some(fingerprint.clone());
        self.state.pending_reindex = false;
        info!(count, reset, reembedded, "index rebuilt");
        Ok(IndexOutcome::Rebuilt {
            count,
            reset,
            reembedded,
        })
    }

    /// A new source replaces the old one: drop the collection and mark a
    /// reindex as pending.
    pub async fn adopt_source(&mut self) -> Result<(), SyncError> {
        self.index.reset_collection().await?;
        self.cache.clear();
        self.state.indexed = None;
        self.state.pending_reindex = true;
        Ok(())
    }

    /// Drop the collection and forget what it was built from.
    pub async fn reset(&mut self) -> Result<(), SyncError> {
        self.index.reset_collection().await?;
        self.cache.clear();
        self.state.indexed = None;
        Ok(())
    }
}

fn check_dimensions(vectors: &[Vec<f32>], expected: Option<usize>) -> Result<(), EmbedError> {
    let expected = match (expected, vectors.first()) {
        (Some(d), _) => d,
        (None, Some(first)) => first.len(),
        (None, None) => return Ok(()),
    };
    match vectors.iter().find(|v| v.len() != expected) {
        Some(v) => Err(EmbedError::DimensionMismatch {
            expected,
            got: v.len(),
        }),
        None => Ok(()),
    }
}
