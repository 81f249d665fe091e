//! Core data models used throughout Resume Search.
//!
//! These types represent the canonical records, ingestion statistics, and
//! retrieval hits that flow through the load → embed → index → query
//! pipeline.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Metadata key under which a record's category is stored.
pub const CATEGORY_KEY: &str = "category";

/// String metadata attached to an indexed entry.
pub type Metadata = BTreeMap<String, String>;

/// A resume after normalization.
///
/// `text` is never empty for records handed out by the loader: it is either
/// the trimmed plain-text column or the text derived from `raw_html`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CanonicalRecord {
    pub id: String,
    pub category: String,
    pub raw_html: String,
    pub text: String,
}

impl CanonicalRecord {
    /// Metadata written alongside the record's vector.
    pub fn metadata(&self) -> Metadata {
        let mut meta = Metadata::new();
        meta.insert(CATEGORY_KEY.to_string(), self.category.clone());
        meta
    }
}

/// Aggregate counts over one raw input file.
///
/// `rows_used + rows_excluded == total_rows_raw` always holds.
/// `rows_missing_id` and `rows_without_any_text` may overlap.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestionStats {
    pub total_rows_raw: usize,
    pub rows_with_any_text: usize,
    pub rows_without_any_text: usize,
    pub rows_missing_id: usize,
    /// Rows with an id and raw HTML whose derived text came out empty.
    pub rows_blank_after_strip: usize,
    pub rows_used: usize,
    pub rows_excluded: usize,
    /// Raw lines dropped by the tabular parser before row accounting.
    pub rows_skipped_malformed: usize,
    pub html_non_empty: usize,
    pub str_non_empty: usize,
    pub source_path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl IngestionStats {
    /// Empty stats for `source_path`.
    pub fn empty(source_path: impl Into<String>) -> Self {
        Self {
            source_path: source_path.into(),
            ..Self::default()
        }
    }

    /// Empty stats carrying an error message.
    pub fn failed(source_path: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            source_path: source_path.into(),
            error: Some(error.into()),
            ..Self::default()
        }
    }
}

/// An entry as written into the external vector store.
///
/// Upserts are whole-record: an existing entry with the same id is replaced.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexedEntry {
    pub id: String,
    pub document: String,
    pub metadata: Metadata,
    pub embedding: Vec<f32>,
}

/// A single retrieval result, ordered by ascending `distance`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Hit {
    pub id: String,
    pub document: String,
    pub metadata: Metadata,
    pub distance: f32,
}

impl Hit {
    pub fn category(&self) -> &str {
        self.metadata
            .get(CATEGORY_KEY)
            .map(String::as_str)
            .unwrap_or("")
    }
}

/// Equality filter over entry metadata (all pairs must match).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetadataFilter {
    pub equals: BTreeMap<String, String>,
}

impl MetadataFilter {
    pub fn category(value: impl Into<String>) -> Self {
        let mut equals = BTreeMap::new();
        equals.insert(CATEGORY_KEY.to_string(), value.into());
        Self { equals }
    }

    pub fn matches(&self, metadata: &Metadata) -> bool {
        self.equals
            .iter()
            .all(|(k, v)| metadata.get(k).map(|m| m == v).unwrap_or(false))
    }
}
