//! Cross-video index merge with an in-memory result cache.
//!
//! Merged views are never persisted. They are rebuilt from the per-video
//! index files on demand and cached by the sorted set of subject ids.

use std::num::NonZeroUsize;
use std::sync::Arc;

use lru::LruCache;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use lectern_core::{defaults, EmbeddingBackend, Error, PipelineStore, Result};

use crate::index::{SearchHit, VectorIndex};

/// Cache key for a merge over `subject_ids`: `multi_{id1}_{id2}...`, sorted
/// and deduplicated so argument order does not matter.
pub fn merge_cache_key(subject_ids: &[Uuid]) -> String {
    let mut ids = subject_ids.to_vec();
    ids.sort();
    ids.dedup();
    let joined: Vec<String> = ids.iter().map(Uuid::to_string).collect();
    format!("multi_{}", joined.join("_"))
}

/// Merges per-video indices resolved through the persistence port.
pub struct IndexMerger {
    store: Arc<dyn PipelineStore>,
    cache: Mutex<LruCache<String, Arc<VectorIndex>>>,
}

impl IndexMerger {
    pub fn new(store: Arc<dyn PipelineStore>) -> Self {
        Self::with_capacity(store, defaults::MERGE_CACHE_CAPACITY)
    }

    pub fn with_capacity(store: Arc<dyn PipelineStore>, capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            store,
            cache: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Load and fold every resolvable index of `subject_ids` into one.
    ///
    /// Subjects without a handle, without an index file, or with an
    /// unreadable file are skipped with a warning. Fails with
    /// [`Error::NoValidIndex`] when nothing could be loaded.
    pub async fn merge(&self, subject_ids: &[Uuid]) -> Result<Arc<VectorIndex>> {
        let key = merge_cache_key(subject_ids);
        {
            let mut cache = self.cache.lock().await;
            if let Some(hit) = cache.get(&key) {
                debug!(subsystem = "search", component = "merge", cache_key = %key, "Merge cache hit");
                return Ok(Arc::clone(hit));
            }
        }

        let mut ids = subject_ids.to_vec();
        ids.sort();
        ids.dedup();

        let mut merged = VectorIndex::new("", 0);
        let mut loaded = 0usize;
        for subject_id in &ids {
            let handle = match self.store.vector_index(*subject_id).await {
                Ok(Some(handle)) => handle,
                Ok(None) => {
                    warn!(
                        subsystem = "search",
                        component = "merge",
                        subject_id = %subject_id,
                        "No vector index registered, skipping"
                    );
                    continue;
                }
                Err(e) => {
                    warn!(
                        subsystem = "search",
                        component = "merge",
                        subject_id = %subject_id,
                        error = %e,
                        "Vector index lookup failed, skipping"
                    );
                    continue;
                }
            };

            if !handle.storage_location.is_file() {
                warn!(
                    subsystem = "search",
                    component = "merge",
                    subject_id = %subject_id,
                    path = %handle.storage_location.display(),
                    "Vector index file missing, skipping"
                );
                continue;
            }

            let index = match VectorIndex::load(&handle.storage_location).await {
                Ok(index) => index,
                Err(e) => {
                    warn!(
                        subsystem = "search",
                        component = "merge",
                        subject_id = %subject_id,
                        error = %e,
                        "Vector index unreadable, skipping"
                    );
                    continue;
                }
            };

            match merged.merge_from(index) {
                Ok(()) => loaded += 1,
                Err(e) => warn!(
                    subsystem = "search",
                    component = "merge",
                    subject_id = %subject_id,
                    error = %e,
                    "Vector index incompatible with merge, skipping"
                ),
            }
        }

        if loaded == 0 || merged.is_empty() {
            return Err(Error::NoValidIndex(format!(
                "none of {} requested subjects has a loadable index",
                ids.len()
            )));
        }

        info!(
            subsystem = "search",
            component = "merge",
            op = "merge",
            input_count = ids.len(),
            loaded,
            result_count = merged.len(),
            "Merged vector indices"
        );

        let merged = Arc::new(merged);
        self.cache.lock().await.put(key, Arc::clone(&merged));
        Ok(merged)
    }

    /// Drop every cached merge that includes `subject_id`.
    pub async fn invalidate(&self, subject_id: Uuid) -> usize {
        let needle = subject_id.to_string();
        let mut cache = self.cache.lock().await;
        let stale: Vec<String> = cache
            .iter()
            .filter(|(key, _)| {
                key.trim_start_matches("multi_")
                    .split('_')
                    .any(|id| id == needle)
            })
            .map(|(key, _)| key.clone())
            .collect();
        for key in &stale {
            cache.pop(key);
        }
        if !stale.is_empty() {
            debug!(
                subsystem = "search",
                component = "merge",
                subject_id = %subject_id,
                result_count = stale.len(),
                "Invalidated cached merges"
            );
        }
        stale.len()
    }

    pub async fn cached_len(&self) -> usize {
        self.cache.lock().await.len()
    }

    /// Embed `query` and search the merged index of `subject_ids`.
    pub async fn search_text(
        &self,
        embedder: &dyn EmbeddingBackend,
        subject_ids: &[Uuid],
        query: &str,
        k: usize,
    ) -> Result<Vec<SearchHit>> {
        let merged = self.merge(subject_ids).await?;
        let vectors = embedder.embed_texts(&[query.to_string()]).await?;
        let query_vector = vectors
            .into_iter()
            .next()
            .ok_or_else(|| Error::Embedding("empty embedding response".to_string()))?;
        Ok(merged.search(&query_vector, k))
    }
}
