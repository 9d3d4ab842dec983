//! Batched construction of a per-video vector index.

use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info, warn};
use uuid::Uuid;

use lectern_core::{defaults, EmbeddingBackend, Error, Keyframe, Result};

use crate::index::{DocumentMetadata, IndexDocument, VectorIndex};

/// Text embedded for one keyframe.
pub fn document_text(keyframe: &Keyframe) -> String {
    format!(
        "screen: {}\nnarration: {}",
        keyframe.ocr_text(),
        keyframe.asr_text
    )
}

/// Result of a build, with enough detail for the task log.
#[derive(Debug)]
pub struct BuiltIndex {
    pub index: VectorIndex,
    /// Batches whose embedding call failed and were left out.
    pub failed_batches: usize,
    /// Keyframes left out because they carry no OCR or ASR text.
    pub skipped_empty: usize,
}

/// Builds a [`VectorIndex`] from keyframes through an embedding backend.
pub struct IndexBuilder {
    embedder: Arc<dyn EmbeddingBackend>,
    batch_size: usize,
}

impl IndexBuilder {
    pub fn new(embedder: Arc<dyn EmbeddingBackend>) -> Self {
        Self {
            embedder,
            batch_size: defaults::EMBED_BATCH_SIZE,
        }
    }

    /// Set the batch size, clamped to `1..=EMBED_BATCH_SIZE`.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.clamp(1, defaults::EMBED_BATCH_SIZE);
        self
    }

    /// Embed every keyframe with text and fold the batches into one index.
    ///
    /// Each batch is embedded into its own sub-index and merged into the
    /// running one, so a failed batch loses only its own documents. Returns
    /// [`Error::NoValidIndex`] when no batch produced a vector.
    pub async fn build(&self, subject_id: Uuid, keyframes: &[Keyframe]) -> Result<BuiltIndex> {
        let start = Instant::now();
        let documents: Vec<(String, DocumentMetadata)> = keyframes
            .iter()
            .filter(|kf| kf.has_text())
            .map(|kf| {
                (
                    document_text(kf),
                    DocumentMetadata {
                        subject_id,
                        keyframe_seq: kf.seq,
                        frame_number: kf.frame_number,
                        timestamp_secs: kf.timestamp_secs,
                        timestamp_formatted: kf.timestamp_formatted.clone(),
                        file_name: kf.file_name.clone(),
                    },
                )
            })
            .collect();
        let skipped_empty = keyframes.len() - documents.len();

        let mut running = VectorIndex::new(self.embedder.model_name(), self.embedder.dimension());
        let mut failed_batches = 0;

        for (batch_no, batch) in documents.chunks(self.batch_size).enumerate() {
            let texts: Vec<String> = batch.iter().map(|(text, _)| text.clone()).collect();
            match self.embed_batch(&texts, batch).await {
                Ok(sub_index) => {
                    debug!(
                        subsystem = "search",
                        component = "index_builder",
                        subject_id = %subject_id,
                        batch = batch_no,
                        result_count = sub_index.len(),
                        "Embedded batch"
                    );
                    if let Err(e) = running.merge_from(sub_index) {
                        failed_batches += 1;
                        warn!(
                            subsystem = "search",
                            component = "index_builder",
                            subject_id = %subject_id,
                            batch = batch_no,
                            error = %e,
                            "Skipping batch that does not fit the index"
                        );
                    }
                }
                Err(e) => {
                    failed_batches += 1;
                    warn!(
                        subsystem = "search",
                        component = "index_builder",
                        subject_id = %subject_id,
                        batch = batch_no,
                        input_count = texts.len(),
                        error = %e,
                        "Embedding batch failed, skipping"
                    );
                }
            }
        }

        if running.is_empty() {
            return Err(Error::NoValidIndex(format!(
                "no vectors produced for subject {}",
                subject_id
            )));
        }

        info!(
            subsystem = "search",
            component = "index_builder",
            op = "build",
            subject_id = %subject_id,
            keyframe_count = keyframes.len(),
            result_count = running.len(),
            failed_batches,
            skipped_empty,
            duration_ms = start.elapsed().as_millis() as u64,
            "Vector index built"
        );

        Ok(BuiltIndex {
            index: running,
            failed_batches,
            skipped_empty,
        })
    }

    async fn embed_batch(
        &self,
        texts: &[String],
        batch: &[(String, DocumentMetadata)],
    ) -> Result<VectorIndex> {
        let vectors = self.embedder.embed_texts(texts).await?;
        if vectors.len() != batch.len() {
            return Err(Error::Embedding(format!(
                "expected {} vectors, got {}",
                batch.len(),
                vectors.len()
            )));
        }
        let dimension = vectors.first().map(Vec::len).unwrap_or_default();
        let mut sub_index = VectorIndex::new(self.embedder.model_name(), dimension);
        for ((text, metadata), vector) in batch.iter().zip(vectors) {
            sub_index.insert(IndexDocument {
                text: text.clone(),
                metadata: metadata.clone(),
                vector,
            })?;
        }
        Ok(sub_index)
    }
}
