//! On-disk layout of per-video index files.

use std::path::{Path, PathBuf};

use tracing::info;
use uuid::Uuid;

use lectern_core::{defaults, Result};

use crate::index::VectorIndex;

/// Root directory holding one `video_{id}/index.json` per subject.
#[derive(Debug, Clone)]
pub struct IndexStore {
    root: PathBuf,
}

impl IndexStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Read the root from `LECTERN_INDEX_DIR`, falling back to the default.
    pub fn from_env() -> Self {
        Self::new(
            std::env::var(defaults::ENV_INDEX_DIR)
                .unwrap_or_else(|_| defaults::INDEX_DIR.to_string()),
        )
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn location_for(&self, subject_id: Uuid) -> PathBuf {
        self.root
            .join(format!("video_{}", subject_id))
            .join("index.json")
    }

    /// Persist `index` for `subject_id` and return where it was written.
    pub async fn save(&self, subject_id: Uuid, index: &VectorIndex) -> Result<PathBuf> {
        let location = self.location_for(subject_id);
        index.save(&location).await?;
        info!(
            subsystem = "search",
            component = "index_store",
            subject_id = %subject_id,
            result_count = index.len(),
            path = %location.display(),
            "Vector index saved"
        );
        Ok(location)
    }

    pub async fn load(&self, subject_id: Uuid) -> Result<VectorIndex> {
        VectorIndex::load(&self.location_for(subject_id)).await
    }
}
