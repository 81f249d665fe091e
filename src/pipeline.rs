//! The load → fit → gate → query pipeline behind every `rsx` command.
//!
//! [`Pipeline`] owns the opened store and the resolved source file. Each CLI
//! invocation builds one, and [`Pipeline::prepare`] brings the index up to date
//! for the current source and embedding configuration before anything is
//! queried. Gate state survives between invocations through the store's
//! checkpoints; the embedding cache lives only as long as the process.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::UNIX_EPOCH;

use anyhow::{bail, Context, Result};
use tracing::{debug, info};

use resume_search_core::embedding::EmbeddingProvider;
use resume_search_core::index::VectorIndex;
use resume_search_core::models::{CanonicalRecord, Hit, IngestionStats, MetadataFilter};
use resume_search_core::sync::{Fingerprint, IndexOutcome, SyncController, SyncState};

use crate::config::Config;
use crate::embedding::create_provider;
use crate::loader;
use crate::progress::{ProgressEvent, ProgressReporter};
use crate::sqlite_store::SqliteStore;

/// Extensions kept when a file is adopted; anything else becomes `.csv`.
const ADOPTED_EXTENSIONS: &[&str] = &["csv", "xlsx", "xls", "tsv", "txt"];

/// Compute the fingerprint of `path` as loaded into `record_count` records
/// and embedded by `provider`.
pub fn fingerprint(
    path: &Path,
    record_count: usize,
    provider: &dyn EmbeddingProvider,
) -> Result<Fingerprint> {
    let absolute = std::fs::canonicalize(path)
        .with_context(|| format!("Failed to resolve source path: {}", path.display()))?;
    let meta = std::fs::metadata(&absolute)
        .with_context(|| format!("Failed to stat source file: {}", absolute.display()))?;
    let modified_ms = meta
        .modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0);

    Ok(Fingerprint {
        source_path: absolute.display().to_string(),
        modified_ms,
        size: meta.len(),
        record_count,
        embedding_kind: provider.kind().to_string(),
        embedding_model: provider.model_name().to_string(),
    })
}

/// What `rsx status` reports.
#[derive(Debug, Clone)]
pub struct Status {
    pub source: PathBuf,
    pub adopted: bool,
    pub store_path: PathBuf,
    pub collection: String,
    pub count: usize,
    pub state: SyncState,
    /// `None` when the source or the provider could not be inspected.
    pub fresh: Option<bool>,
}

/// A loaded, fitted and indexed corpus ready for queries.
pub struct Session {
    pub records: Vec<CanonicalRecord>,
    pub stats: IngestionStats,
    pub fingerprint: Fingerprint,
    pub outcome: IndexOutcome,
    provider: Box<dyn EmbeddingProvider>,
    index: VectorIndex,
}

impl Session {
    /// Nearest resumes to `text`, optionally restricted to one category.
    pub async fn query(
        &self,
        text: &str,
        top_k: usize,
        category: Option<&str>,
    ) -> Result<Vec<Hit>> {
        let vector = self.provider.embed(text).await?;
        let filter = category.map(MetadataFilter::category);
        let hits = self.index.query(&vector, top_k, filter.as_ref()).await?;
        debug!(top_k, hits = hits.len(), "query");
        Ok(hits)
    }
}

/// Record for `id`; the last occurrence wins, matching the index.
pub fn find_record<'a>(records: &'a [CanonicalRecord], id: &str) -> Option<&'a CanonicalRecord> {
    records.iter().rev().find(|r| r.id == id)
}

pub struct Pipeline {
    config: Config,
    store: Arc<SqliteStore>,
    source: PathBuf,
    adopted: bool,
}

impl Pipeline {
    /// Open the store and resolve the source: `path_override`, else the file
    /// last adopted for this collection, else `data.source_path`.
    pub async fn open(config: &Config, path_override: Option<&Path>) -> Result<Self> {
        let store = Arc::new(SqliteStore::open(&config.store.path).await?);

        let adopted_source = store.adopted_source(&config.store.collection).await?;
        let (source, adopted) = match (path_override, adopted_source) {
            (Some(p), _) => (p.to_path_buf(), false),
            (None, Some(p)) => (PathBuf::from(p), true),
            (None, None) => (config.data.source_path.clone(), false),
        };
        debug!(source = %source.display(), adopted, "resolved source");

        Ok(Self {
            config: config.clone(),
            store,
            source,
            adopted,
        })
    }

    pub fn source(&self) -> &Path {
        &self.source
    }

    fn index(&self) -> VectorIndex {
        VectorIndex::new(self.store.clone(), self.config.store.collection.clone())
    }

    async fn controller(&self) -> Result<SyncController> {
        let state = self
            .store
            .load_sync_state(&self.config.store.collection)
            .await?;
        Ok(SyncController::new(self.index(), state).with_upsert_batch(self.config.store.upsert_batch))
    }

    async fn save_state(&self, controller: &SyncController) -> Result<()> {
        self.store
            .save_sync_state(&self.config.store.collection, controller.state())
            .await
    }

    /// Load the source with stats; file-level failures land in `stats.error`.
    pub fn load(&self) -> (Vec<CanonicalRecord>, IngestionStats) {
        loader::load_with_stats(&self.source)
    }

    /// Load, fit the provider and run both gates.
    pub async fn prepare(&self, reporter: &dyn ProgressReporter) -> Result<Session> {
        let mut provider = create_provider(&self.config.embedding)?;

        reporter.report(ProgressEvent::Loading {
            source: self.source.display().to_string(),
        });
        let (records, stats) = loader::load(&self.source)?;
        if records.is_empty() {
            bail!(
                "No usable resumes in {}: {}",
                self.source.display(),
                stats
                    .error
                    .as_deref()
                    .unwrap_or("no row has both an id and text")
            );
        }

        let texts: Vec<String> = records.iter().map(|r| r.text.clone()).collect();
        provider.fit(&texts)?;

        let fingerprint = fingerprint(&self.source, records.len(), provider.as_ref())?;
        let mut controller = self.controller().await?;

        let progress = |done: usize, total: usize| {
            reporter.report(ProgressEvent::Embedding { done, total });
        };
        let outcome = controller
            .ensure_index(&fingerprint, &records, provider.as_ref(), &progress)
            .await?;
        self.save_state(&controller).await?;

        if let IndexOutcome::Rebuilt { count, .. } = outcome {
            info!(count, fingerprint = %fingerprint.digest(), "index up to date");
        }

        Ok(Session {
            records,
            stats,
            fingerprint,
            outcome,
            provider,
            index: self.index(),
        })
    }

    /// Copy `file` into the upload directory as the new source, drop the
    /// collection and mark a reindex as pending. Returns the adopted path.
    pub async fn adopt(&self, file: &Path) -> Result<PathBuf> {
        if !file.is_file() {
            bail!("File not found: {}", file.display());
        }

        let ext = file
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .filter(|e| ADOPTED_EXTENSIONS.contains(&e.as_str()))
            .unwrap_or_else(|| "csv".to_string());

        let upload_dir = &self.config.data.upload_dir;
        std::fs::create_dir_all(upload_dir).with_context(|| {
            format!("Failed to create upload directory: {}", upload_dir.display())
        })?;
        let target = upload_dir.join(format!("Resume.{}", ext));

        let same_file = match (std::fs::canonicalize(file), std::fs::canonicalize(&target)) {
            (Ok(a), Ok(b)) => a == b,
            _ => false,
        };
        if !same_file {
            std::fs::copy(file, &target).with_context(|| {
                format!("Failed to copy {} to {}", file.display(), target.display())
            })?;
        }
        let target = std::fs::canonicalize(&target)?;

        let mut controller = self.controller().await?;
        controller.adopt_source().await?;
        self.save_state(&controller).await?;
        self.store
            .set_adopted_source(&self.config.store.collection, &target.display().to_string())
            .await?;

        info!(target = %target.display(), "adopted source");
        Ok(target)
    }

    /// Drop the collection and forget its fingerprint.
    pub async fn reset(&self) -> Result<()> {
        let mut controller = self.controller().await?;
        controller.reset().await?;
        self.save_state(&controller).await
    }

    pub async fn status(&self) -> Result<Status> {
        let controller = self.controller().await?;
        let count = controller.index().count().await?;
        let fresh = self.current_fingerprint().await.map(|fp| {
            !controller.state().pending_reindex
                && controller.state().indexed.as_ref() == Some(&fp)
                && count > 0
        });

        Ok(Status {
            source: self.source.clone(),
            adopted: self.adopted,
            store_path: self.config.store.path.clone(),
            collection: self.config.store.collection.clone(),
            count,
            state: controller.state().clone(),
            fresh,
        })
    }

    /// Fingerprint of the current source without embedding anything.
    async fn current_fingerprint(&self) -> Option<Fingerprint> {
        let (records, _) = loader::load(&self.source).ok()?;
        let provider = create_provider(&self.config.embedding).ok()?;
        fingerprint(&self.source, records.len(), provider.as_ref()).ok()
    }

    pub async fn close(&self) {
        self.store.close().await;
    }
}
