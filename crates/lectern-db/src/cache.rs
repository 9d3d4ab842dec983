//! Section summary cache stores.
//!
//! Three interchangeable [`SummaryCacheStore`] implementations: a PostgreSQL
//! table, a directory with one JSON file per key, and an in-memory map.
//! Stores never decide expiry; the summarizer compares `created_at` against
//! its TTL.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use sqlx::{Pool, Postgres, Row};
use tokio::sync::RwLock;
use tracing::warn;

use lectern_core::{defaults, Error, Result, SectionSummaryCacheEntry, SummaryCacheStore};

// =============================================================================
// POSTGRES
// =============================================================================

/// Cache rows in `section_summary_cache`.
#[derive(Clone)]
pub struct PgSummaryCache {
    pool: Pool<Postgres>,
}

impl PgSummaryCache {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SummaryCacheStore for PgSummaryCache {
    async fn get(&self, cache_key: &str) -> Result<Option<SectionSummaryCacheEntry>> {
        let row = sqlx::query(
            r#"
            SELECT cache_key, subject_id, section_start, section_end, keyframe_count,
                   summary, created_at
            FROM section_summary_cache
            WHERE cache_key = $1
            "#,
        )
        .bind(cache_key)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(row.map(|row| {
            let keyframe_count: i32 = row.get("keyframe_count");
            SectionSummaryCacheEntry {
                cache_key: row.get("cache_key"),
                subject_id: row.get("subject_id"),
                section_start: row.get("section_start"),
                section_end: row.get("section_end"),
                keyframe_count: keyframe_count as usize,
                summary: row.get("summary"),
                created_at: row.get("created_at"),
            }
        }))
    }

    async fn put(&self, entry: &SectionSummaryCacheEntry) -> Result<()> {
        // An expired row under the same key is replaced; content is identical
        // by construction, only the timestamp moves.
        sqlx::query(
            r#"
            INSERT INTO section_summary_cache
                (cache_key, subject_id, section_start, section_end, keyframe_count, summary, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (cache_key) DO UPDATE
            SET summary = EXCLUDED.summary,
                created_at = EXCLUDED.created_at
            "#,
        )
        .bind(&entry.cache_key)
        .bind(entry.subject_id)
        .bind(entry.section_start)
        .bind(entry.section_end)
        .bind(entry.keyframe_count as i32)
        .bind(&entry.summary)
        .bind(entry.created_at)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(())
    }
}

// =============================================================================
// FILESYSTEM
// =============================================================================

/// One `{cache_key}.json` file per entry under a root directory.
#[derive(Debug, Clone)]
pub struct FilesystemSummaryCache {
    root: PathBuf,
}

impl FilesystemSummaryCache {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Read the root from `LECTERN_CACHE_DIR`, falling back to the default.
    pub fn from_env() -> Self {
        Self::new(
            std::env::var(defaults::ENV_CACHE_DIR)
                .unwrap_or_else(|_| defaults::CACHE_DIR.to_string()),
        )
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, cache_key: &str) -> Result<PathBuf> {
        // Keys are hex digests; anything else could escape the root.
        if cache_key.is_empty() || !cache_key.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(Error::InvalidInput(format!(
                "invalid cache key: {:?}",
                cache_key
            )));
        }
        Ok(self.root.join(format!("{}.json", cache_key)))
    }
}

#[async_trait]
impl SummaryCacheStore for FilesystemSummaryCache {
    async fn get(&self, cache_key: &str) -> Result<Option<SectionSummaryCacheEntry>> {
        let path = self.path_for(cache_key)?;
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        match serde_json::from_slice(&bytes) {
            Ok(entry) => Ok(Some(entry)),
            Err(e) => {
                warn!(
                    subsystem = "database",
                    component = "summary_cache",
                    path = %path.display(),
                    error = %e,
                    "Ignoring unreadable cache file"
                );
                Ok(None)
            }
        }
    }

    async fn put(&self, entry: &SectionSummaryCacheEntry) -> Result<()> {
        let path = self.path_for(&entry.cache_key)?;
        tokio::fs::create_dir_all(&self.root).await?;
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, serde_json::to_vec_pretty(entry)?).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }
}

// =============================================================================
// MEMORY
// =============================================================================

/// In-process cache, mainly for tests and preview tooling.
#[derive(Default)]
pub struct MemorySummaryCache {
    entries: RwLock<HashMap<String, SectionSummaryCacheEntry>>,
    puts: AtomicUsize,
}

impl MemorySummaryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of `put` calls so far.
    pub fn put_count(&self) -> usize {
        self.puts.load(Ordering::SeqCst)
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    /// Overwrite an entry directly, bypassing the put counter.
    pub async fn seed(&self, entry: SectionSummaryCacheEntry) {
        self.entries
            .write()
            .await
            .insert(entry.cache_key.clone(), entry);
    }
}

#[async_trait]
impl SummaryCacheStore for MemorySummaryCache {
    async fn get(&self, cache_key: &str) -> Result<Option<SectionSummaryCacheEntry>> {
        Ok(self.entries.read().await.get(cache_key).cloned())
    }

    async fn put(&self, entry: &SectionSummaryCacheEntry) -> Result<()> {
        self.puts.fetch_add(1, Ordering::SeqCst);
        self.entries
            .write()
            .await
            .insert(entry.cache_key.clone(), entry.clone());
        Ok(())
    }
}
