//! SQLite-backed [`CollectionStore`] implementation.
//!
//! A path-addressed persistent store: one database file holds any number of
//! named collections plus a small `checkpoints` table where the CLI keeps the
//! [`SyncState`] of each collection between runs.
//!
//! Vectors are stored as little-endian `f32` BLOBs and ranked by brute-force
//! cosine distance, which is adequate for human-curated resume sets.

use std::path::Path;
use std::str::FromStr;

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use sqlx::Row;

use resume_search_core::embedding::{blob_to_vec, cosine_distance, vec_to_blob};
use resume_search_core::error::StoreError;
use resume_search_core::models::{Hit, IndexedEntry, Metadata, MetadataFilter};
use resume_search_core::store::CollectionStore;
use resume_search_core::sync::SyncState;

/// SQLite implementation of the [`CollectionStore`] trait.
pub struct SqliteStore {
    pool: SqlitePool,
}

fn backend(e: impl std::fmt::Display) -> StoreError {
    StoreError::Backend(e.to_string())
}

impl SqliteStore {
    /// Open (creating if needed) the database at `path` and ensure the schema.
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).with_context(|| {
                    format!("Failed to create store directory: {}", parent.display())
                })?;
            }
        }

        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", path.display()))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .with_context(|| format!("Failed to open store: {}", path.display()))?;

        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    async fn migrate(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS collections (
                name TEXT PRIMARY KEY,
                created_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS entries (
                collection TEXT NOT NULL,
                id TEXT NOT NULL,
                document TEXT NOT NULL,
                metadata_json TEXT NOT NULL DEFAULT '{}',
                embedding BLOB NOT NULL,
                PRIMARY KEY (collection, id)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS checkpoints (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Raw checkpoint value for `key`.
    pub async fn get_checkpoint(&self, key: &str) -> Result<Option<String>> {
        let row = sqlx::query("SELECT value FROM checkpoints WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| r.get::<String, _>("value")))
    }

    pub async fn set_checkpoint(&self, key: &str, value: &str) -> Result<()> {
        let now = chrono::Utc::now().timestamp();
        sqlx::query(
            r#"
            INSERT INTO checkpoints (key, value, updated_at) VALUES (?, ?, ?)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at
            "#,
        )
        .bind(key)
        .bind(value)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Remembered sync state for `collection`, default when none was saved.
    pub async fn load_sync_state(&self, collection: &str) -> Result<SyncState> {
        match self.get_checkpoint(&format!("sync:{}", collection)).await? {
            Some(value) => serde_json::from_str(&value).context("Corrupt sync state checkpoint"),
            None => Ok(SyncState::default()),
        }
    }

    pub async fn save_sync_state(&self, collection: &str, state: &SyncState) -> Result<()> {
        self.set_checkpoint(&format!("sync:{}", collection), &serde_json::to_string(state)?)
            .await
    }

    /// Source file adopted for `collection` by `rsx adopt`, if any.
    pub async fn adopted_source(&self, collection: &str) -> Result<Option<String>> {
        self.get_checkpoint(&format!("source:{}", collection)).await
    }

    pub async fn set_adopted_source(&self, collection: &str, path: &str) -> Result<()> {
        self.set_checkpoint(&format!("source:{}", collection), path)
            .await
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[async_trait]
impl CollectionStore for SqliteStore {
    async fn create_collection(&self, name: &str) -> Result<(), StoreError> {
        if self.has_collection(name).await? {
            return Err(StoreError::CollectionExists(name.to_string()));
        }
        sqlx::query("INSERT INTO collections (name, created_at) VALUES (?, ?)")
            .bind(name)
            .bind(chrono::Utc::now().timestamp())
            .execute(&self.pool)
            .await
            .map_err(backend)?;
        Ok(())
    }

    async fn has_collection(&self, name: &str) -> Result<bool, StoreError> {
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM collections WHERE name = ?")
            .bind(name)
            .fetch_one(&self.pool)
            .await
            .map_err(backend)?;
        Ok(n > 0)
    }

    async fn delete_collection(&self, name: &str) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await.map_err(backend)?;
        sqlx::query("DELETE FROM entries WHERE collection = ?")
            .bind(name)
            .execute(&mut *tx)
            .await
            .map_err(backend)?;
        let deleted = sqlx::query("DELETE FROM collections WHERE name = ?")
            .bind(name)
            .execute(&mut *tx)
            .await
            .map_err(backend)?
            .rows_affected();
        if deleted == 0 {
            tx.rollback().await.map_err(backend)?;
            return Err(StoreError::CollectionNotFound(name.to_string()));
        }
        tx.commit().await.map_err(backend)?;
        Ok(())
    }

    async fn add(&self, name: &str, entries: &[IndexedEntry]) -> Result<(), StoreError> {
        if !self.has_collection(name).await? {
            return Err(StoreError::CollectionNotFound(name.to_string()));
        }

        let mut tx = self.pool.begin().await.map_err(backend)?;
        for entry in entries {
            let metadata = serde_json::to_string(&entry.metadata).map_err(backend)?;
            sqlx::query(
                r#"
                INSERT INTO entries (collection, id, document, metadata_json, embedding)
                VALUES (?, ?, ?, ?, ?)
                ON CONFLICT(collection, id) DO UPDATE SET
                    document = excluded.document,
                    metadata_json = excluded.metadata_json,
                    embedding = excluded.embedding
                "#,
            )
            .bind(name)
            .bind(&entry.id)
            .bind(&entry.document)
            .bind(metadata)
            .bind(vec_to_blob(&entry.embedding))
            .execute(&mut *tx)
            .await
            .map_err(backend)?;
        }
        tx.commit().await.map_err(backend)?;
        Ok(())
    }

    async fn query(
        &self,
        name: &str,
        embedding: &[f32],
        n_results: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<Hit>, StoreError> {
        if !self.has_collection(name).await? {
            return Err(StoreError::CollectionNotFound(name.to_string()));
        }

        let rows = sqlx::query(
            "SELECT id, document, metadata_json, embedding FROM entries WHERE collection = ? ORDER BY rowid",
        )
        .bind(name)
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;

        let mut hits = Vec::with_capacity(rows.len());
        for row in rows {
            let metadata_json: String = row.get("metadata_json");
            let metadata: Metadata = serde_json::from_str(&metadata_json).map_err(backend)?;
            if let Some(f) = filter {
                if !f.matches(&metadata) {
                    continue;
                }
            }
            let blob: Vec<u8> = row.get("embedding");
            hits.push(Hit {
                id: row.get("id"),
                document: row.get("document"),
                metadata,
                distance: cosine_distance(embedding, &blob_to_vec(&blob)),
            });
        }

        hits.sort_by(|a, b| {
            a.distance
                .partial_cmp(&b.distance)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        hits.truncate(n_results);
        Ok(hits)
    }

    async fn count(&self, name: &str) -> Result<usize, StoreError> {
        if !self.has_collection(name).await? {
            return Err(StoreError::CollectionNotFound(name.to_string()));
        }
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM entries WHERE collection = ?")
            .bind(name)
            .fetch_one(&self.pool)
            .await
            .map_err(backend)?;
        Ok(n as usize)
    }
}
