//! In-memory persistence port.
//!
//! Implements [`PipelineStore`] and [`SubjectCatalog`] over maps behind a
//! single lock, and counts writes per artifact kind so callers can assert
//! what a run persisted.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use tokio::sync::RwLock;
use uuid::Uuid;

use lectern_core::{
    Error, KeyframeSet, PipelineStore, PipelineTask, Result, SubjectCatalog, SubjectInfo,
    TaskLogRecord, VectorIndexHandle, VideoSummary,
};

#[derive(Default)]
struct State {
    subjects: HashMap<Uuid, SubjectInfo>,
    logs: Vec<TaskLogRecord>,
    tasks: HashMap<Uuid, PipelineTask>,
    keyframes: HashMap<Uuid, KeyframeSet>,
    indices: HashMap<Uuid, VectorIndexHandle>,
    summaries: HashMap<Uuid, VideoSummary>,
}

#[derive(Default)]
struct WriteCounters {
    tasks: AtomicUsize,
    keyframes: AtomicUsize,
    indices: AtomicUsize,
    summaries: AtomicUsize,
}

/// Process-local store. Cheap to create; share it behind an `Arc`.
#[derive(Default)]
pub struct MemoryStore {
    state: RwLock<State>,
    writes: WriteCounters,
    fail_keyframe_writes: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every `replace_keyframes` call fail.
    pub fn with_keyframe_write_failure(self) -> Self {
        self.fail_keyframe_writes.store(true, Ordering::SeqCst);
        self
    }

    pub async fn register_subject(&self, info: SubjectInfo) {
        self.state
            .write()
            .await
            .subjects
            .insert(info.subject_id, info);
    }

    /// Every log record, in append order.
    pub async fn logs(&self) -> Vec<TaskLogRecord> {
        self.state.read().await.logs.clone()
    }

    pub async fn logs_for(&self, task_id: Uuid) -> Vec<TaskLogRecord> {
        self.state
            .read()
            .await
            .logs
            .iter()
            .filter(|r| r.task_id == task_id)
            .cloned()
            .collect()
    }

    pub async fn task(&self, id: Uuid) -> Option<PipelineTask> {
        self.state.read().await.tasks.get(&id).cloned()
    }

    pub async fn summary(&self, subject_id: Uuid) -> Option<VideoSummary> {
        self.state.read().await.summaries.get(&subject_id).cloned()
    }

    pub fn task_write_count(&self) -> usize {
        self.writes.tasks.load(Ordering::SeqCst)
    }

    pub fn keyframe_write_count(&self) -> usize {
        self.writes.keyframes.load(Ordering::SeqCst)
    }

    pub fn index_write_count(&self) -> usize {
        self.writes.indices.load(Ordering::SeqCst)
    }

    pub fn summary_write_count(&self) -> usize {
        self.writes.summaries.load(Ordering::SeqCst)
    }

    /// Writes of anything other than log records.
    pub fn artifact_write_count(&self) -> usize {
        self.task_write_count()
            + self.keyframe_write_count()
            + self.index_write_count()
            + self.summary_write_count()
    }
}

#[async_trait]
impl PipelineStore for MemoryStore {
    async fn append_log(&self, record: TaskLogRecord) -> Result<()> {
        self.state.write().await.logs.push(record);
        Ok(())
    }

    async fn save_task(&self, task: &PipelineTask) -> Result<()> {
        self.writes.tasks.fetch_add(1, Ordering::SeqCst);
        self.state.write().await.tasks.insert(task.id, task.clone());
        Ok(())
    }

    async fn replace_keyframes(&self, set: &KeyframeSet) -> Result<()> {
        if self.fail_keyframe_writes.load(Ordering::SeqCst) {
            return Err(Error::Internal("keyframe store unavailable".to_string()));
        }
        self.writes.keyframes.fetch_add(1, Ordering::SeqCst);
        self.state
            .write()
            .await
            .keyframes
            .insert(set.subject_id, set.clone());
        Ok(())
    }

    async fn load_keyframes(&self, subject_id: Uuid) -> Result<Option<KeyframeSet>> {
        Ok(self.state.read().await.keyframes.get(&subject_id).cloned())
    }

    async fn upsert_vector_index(&self, handle: &VectorIndexHandle) -> Result<()> {
        self.writes.indices.fetch_add(1, Ordering::SeqCst);
        self.state
            .write()
            .await
            .indices
            .insert(handle.subject_id, handle.clone());
        Ok(())
    }

    async fn vector_index(&self, subject_id: Uuid) -> Result<Option<VectorIndexHandle>> {
        Ok(self.state.read().await.indices.get(&subject_id).cloned())
    }

    async fn upsert_summary(&self, summary: &VideoSummary) -> Result<()> {
        self.writes.summaries.fetch_add(1, Ordering::SeqCst);
        self.state
            .write()
            .await
            .summaries
            .insert(summary.subject_id, summary.clone());
        Ok(())
    }
}

#[async_trait]
impl SubjectCatalog for MemoryStore {
    async fn describe(&self, subject_id: Uuid) -> Result<Option<SubjectInfo>> {
        Ok(self.state.read().await.subjects.get(&subject_id).cloned())
    }
}
