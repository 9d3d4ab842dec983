//! Core traits for lectern abstractions.
//!
//! These are the seams between the pipeline and everything it does not own:
//! durable storage, the summary cache, the host's subject catalog, and the
//! inference engines. Concrete implementations live in `lectern-db` and
//! `lectern-inference`.

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::Result;
use crate::models::*;

// =============================================================================
// PERSISTENCE / LOG PORT
// =============================================================================

/// Narrow write interface for pipeline artifacts and task logs.
///
/// Every stage shares one store. Implementations must be safe for concurrent
/// use by all workers.
#[async_trait]
pub trait PipelineStore: Send + Sync {
    /// Append a structured log record. Never rewrites earlier records.
    async fn append_log(&self, record: TaskLogRecord) -> Result<()>;

    /// Insert or update the persisted copy of a task.
    async fn save_task(&self, task: &PipelineTask) -> Result<()>;

    /// Replace every keyframe of `set.subject_id` with `set.keyframes`.
    async fn replace_keyframes(&self, set: &KeyframeSet) -> Result<()>;

    /// Load the most recent keyframe set for a subject.
    async fn load_keyframes(&self, subject_id: Uuid) -> Result<Option<KeyframeSet>>;

    /// Insert or replace the subject's vector index handle.
    async fn upsert_vector_index(&self, handle: &VectorIndexHandle) -> Result<()>;

    /// Look up the subject's vector index handle.
    async fn vector_index(&self, subject_id: Uuid) -> Result<Option<VectorIndexHandle>>;

    /// Insert or replace the subject's video summary.
    async fn upsert_summary(&self, summary: &VideoSummary) -> Result<()>;
}

/// Storage behind the content-addressed section summary cache.
///
/// Stores are dumb key/value holders; expiry is decided by the caller.
#[async_trait]
pub trait SummaryCacheStore: Send + Sync {
    async fn get(&self, cache_key: &str) -> Result<Option<SectionSummaryCacheEntry>>;

    async fn put(&self, entry: &SectionSummaryCacheEntry) -> Result<()>;
}

/// Host-owned lookup of subject metadata.
#[async_trait]
pub trait SubjectCatalog: Send + Sync {
    async fn describe(&self, subject_id: Uuid) -> Result<Option<SubjectInfo>>;
}

// =============================================================================
// INFERENCE TRAITS
// =============================================================================

/// Backend for generating text embeddings.
#[async_trait]
pub trait EmbeddingBackend: Send + Sync {
    /// Generate embeddings for the given texts.
    ///
    /// Returns a vector of embedding vectors, one per input text.
    async fn embed_texts(&self, texts: &[String]) -> Result<Vec<crate::Vector>>;

    /// Get the expected dimension of embedding vectors.
    fn dimension(&self) -> usize;

    /// Get the model name being used.
    fn model_name(&self) -> &str;
}

/// Backend for text generation (LLM).
#[async_trait]
pub trait GenerationBackend: Send + Sync {
    /// Generate text given a prompt.
    async fn generate(&self, prompt: &str) -> Result<String>;

    /// Generate text with system context.
    async fn generate_with_system(&self, system: &str, prompt: &str) -> Result<String>;

    /// Generate text the caller expects to be a JSON document.
    ///
    /// Backends that can enforce a JSON output format should override this;
    /// callers must still tolerate prose around the object.
    async fn generate_json_with_system(&self, system: &str, prompt: &str) -> Result<String> {
        self.generate_with_system(system, prompt).await
    }

    /// Get the model name being used.
    fn model_name(&self) -> &str;
}

// =============================================================================
// TASK NOTIFICATION
// =============================================================================

/// Observer for task lifecycle changes made by the orchestrator.
#[async_trait]
pub trait TaskNotifier: Send + Sync {
    /// Called when a worker picks up the task.
    async fn on_task_started(&self, task: &PipelineTask);

    /// Called after each progress update.
    async fn on_task_progress(&self, task: &PipelineTask);

    /// Called once the task reaches a terminal status.
    async fn on_task_finished(&self, task: &PipelineTask);
}

/// No-op notifier for when notifications aren't needed.
pub struct NoOpNotifier;

#[async_trait]
impl TaskNotifier for NoOpNotifier {
    async fn on_task_started(&self, _task: &PipelineTask) {}
    async fn on_task_progress(&self, _task: &PipelineTask) {}
    async fn on_task_finished(&self, _task: &PipelineTask) {}
}
