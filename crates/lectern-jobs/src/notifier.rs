//! Task notifier that mirrors orchestrator snapshots into the store.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;

use lectern_core::{PipelineStore, PipelineTask, TaskNotifier};

/// Persists task rows through [`PipelineStore::save_task`].
///
/// Preview tasks are never written.
pub struct StoreTaskNotifier {
    store: Arc<dyn PipelineStore>,
}

impl StoreTaskNotifier {
    pub fn new(store: Arc<dyn PipelineStore>) -> Self {
        Self { store }
    }

    async fn save(&self, task: &PipelineTask) {
        if task.preview {
            return;
        }
        if let Err(e) = self.store.save_task(task).await {
            warn!(
                subsystem = "jobs",
                component = "notifier",
                task_id = %task.id,
                status = task.status.as_str(),
                error = %e,
                "Failed to persist task"
            );
        }
    }
}

#[async_trait]
impl TaskNotifier for StoreTaskNotifier {
    async fn on_task_started(&self, task: &PipelineTask) {
        self.save(task).await;
    }

    async fn on_task_progress(&self, task: &PipelineTask) {
        self.save(task).await;
    }

    async fn on_task_finished(&self, task: &PipelineTask) {
        self.save(task).await;
    }
}
