//! Error types for the embedding and retrieval pipeline.
//!
//! Row-level problems never show up here: they are counted in
//! [`IngestionStats`](crate::models::IngestionStats). These types cover
//! file-level, service-level and store-level faults that must reach the
//! caller.

use thiserror::Error;

/// The source file could not be read or parsed by any strategy.
#[derive(Error, Debug)]
pub enum LoadError {
    #[error("source file not found: {0}")]
    NotFound(String),

    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Every decode/delimiter strategy and the spreadsheet fallback failed.
    /// Carries the last underlying error message.
    #[error("unable to parse {path} with any strategy: {last_error}")]
    Unparseable { path: String, last_error: String },
}

/// Required logical columns are absent.
///
/// Non-fatal: the loader reports it through `IngestionStats::error` and
/// returns zero records.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("missing required columns (need id and one of resume_html/resume_str); found: {found}")]
pub struct SchemaError {
    pub found: String,
}

/// Embedding failures, local or remote.
#[derive(Error, Debug)]
pub enum EmbedError {
    /// `embed` was called on a provider that requires `fit` first.
    #[error("embedding provider is not fitted; call fit() with the full corpus first")]
    Unfitted,

    /// Missing credentials, endpoint, or invalid settings. Raised at
    /// construction time.
    #[error("embedding configuration error: {0}")]
    Config(String),

    /// The remote service returned a body in none of the accepted shapes.
    #[error("unexpected embeddings response shape: {snippet}")]
    ResponseFormat { snippet: String },

    /// The service returned a different number of vectors than inputs sent.
    #[error("embeddings count mismatch: got {got} for {expected} inputs")]
    CountMismatch { expected: usize, got: usize },

    /// A vector had a different width than the rest of the session.
    #[error("embedding dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    /// A single transport or HTTP-status failure (retryable).
    #[error("embedding request failed: {0}")]
    Transport(String),

    /// Retries were exhausted; wraps the last failure.
    #[error("embedding service failed after {attempts} attempts: {last}")]
    Service {
        attempts: u32,
        #[source]
        last: Box<EmbedError>,
    },
}

impl EmbedError {
    /// Whether the remote client should retry after this failure.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            EmbedError::Transport(_) | EmbedError::CountMismatch { .. }
        )
    }
}

/// Vector store faults.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("collection already exists: {0}")]
    CollectionExists(String),

    #[error("collection does not exist: {0}")]
    CollectionNotFound(String),

    /// `records` and `vectors` passed to an upsert differ in length.
    #[error("upsert length mismatch: {records} records but {vectors} vectors")]
    LengthMismatch { records: usize, vectors: usize },

    #[error("vector store error: {0}")]
    Backend(String),
}

/// Errors produced by the synchronization controller.
#[derive(Error, Debug)]
pub enum SyncError {
    #[error(transparent)]
    Embed(#[from] EmbedError),

    #[error(transparent)]
    Store(#[from] StoreError),
}
