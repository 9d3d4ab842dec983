//! Flat in-memory vector index with cosine similarity search.

use std::path::Path;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use lectern_core::{Error, Result, Vector};

/// Where a document came from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentMetadata {
    pub subject_id: Uuid,
    pub keyframe_seq: u32,
    pub frame_number: u64,
    pub timestamp_secs: f64,
    pub timestamp_formatted: String,
    pub file_name: String,
}

/// One embedded keyframe document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexDocument {
    pub text: String,
    pub metadata: DocumentMetadata,
    pub vector: Vector,
}

/// A scored search result.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchHit {
    pub score: f32,
    pub text: String,
    pub metadata: DocumentMetadata,
}

/// Exhaustive cosine-similarity index.
///
/// Lecture indices hold tens to hundreds of keyframes, so a linear scan is
/// cheaper than maintaining an ANN structure and merges are plain appends.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorIndex {
    pub embedding_model: String,
    pub dimension: usize,
    documents: Vec<IndexDocument>,
}

impl VectorIndex {
    pub fn new(embedding_model: impl Into<String>, dimension: usize) -> Self {
        Self {
            embedding_model: embedding_model.into(),
            dimension,
            documents: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    pub fn documents(&self) -> &[IndexDocument] {
        &self.documents
    }

    /// Add one document. Its vector must match the index dimension.
    pub fn insert(&mut self, document: IndexDocument) -> Result<()> {
        if document.vector.len() != self.dimension {
            return Err(Error::Index(format!(
                "vector dimension {} does not match index dimension {}",
                document.vector.len(),
                self.dimension
            )));
        }
        self.documents.push(document);
        Ok(())
    }

    /// Fold every document of `other` into this index.
    ///
    /// An empty index adopts the model and dimension of the first non-empty
    /// index merged into it.
    pub fn merge_from(&mut self, other: VectorIndex) -> Result<()> {
        if other.is_empty() {
            return Ok(());
        }
        if self.is_empty() {
            self.embedding_model = other.embedding_model;
            self.dimension = other.dimension;
            self.documents = other.documents;
            return Ok(());
        }
        if other.dimension != self.dimension {
            return Err(Error::Index(format!(
                "cannot merge index of dimension {} ({}) into dimension {} ({})",
                other.dimension, other.embedding_model, self.dimension, self.embedding_model
            )));
        }
        self.documents.extend(other.documents);
        Ok(())
    }

    /// Top `k` documents by cosine similarity, best first.
    pub fn search(&self, query: &[f32], k: usize) -> Vec<SearchHit> {
        if k == 0 || query.len() != self.dimension {
            return Vec::new();
        }
        let mut scored: Vec<(f32, &IndexDocument)> = self
            .documents
            .iter()
            .map(|doc| (cosine_similarity(query, &doc.vector), doc))
            .collect();
        scored.sort_by(|a, b| b.0.total_cmp(&a.0));
        scored
            .into_iter()
            .take(k)
            .map(|(score, doc)| SearchHit {
                score,
                text: doc.text.clone(),
                metadata: doc.metadata.clone(),
            })
            .collect()
    }

    /// Write the index as JSON, creating parent directories.
    pub async fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let bytes = serde_json::to_vec(self)?;
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, bytes).await?;
        tokio::fs::rename(&tmp, path).await?;
        Ok(())
    }

    /// Read an index previously written by [`VectorIndex::save`].
    pub async fn load(path: &Path) -> Result<Self> {
        let bytes = tokio::fs::read(path).await?;
        let index: VectorIndex = serde_json::from_slice(&bytes)
            .map_err(|e| Error::Index(format!("corrupt index {}: {}", path.display(), e)))?;
        if index.documents.iter().any(|d| d.vector.len() != index.dimension) {
            return Err(Error::Index(format!(
                "index {} holds vectors of the wrong dimension",
                path.display()
            )));
        }
        Ok(index)
    }
}

/// Cosine similarity; 0 when either vector has zero magnitude.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let mag_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let mag_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if mag_a > 0.0 && mag_b > 0.0 {
        dot / (mag_a * mag_b)
    } else {
        0.0
    }
}
