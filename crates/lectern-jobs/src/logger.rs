//! Task-scoped log records, mirrored to `tracing`.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use lectern_core::{LogLevel, PipelineStore, TaskLogRecord};

/// Appends log records for one task through the persistence port.
///
/// Records are written in preview mode too. A failing store never fails the
/// task; the record is still visible in the tracing output.
#[derive(Clone)]
pub struct TaskLogger {
    store: Arc<dyn PipelineStore>,
    task_id: Uuid,
    subject_id: Uuid,
}

impl TaskLogger {
    pub fn new(store: Arc<dyn PipelineStore>, task_id: Uuid, subject_id: Uuid) -> Self {
        Self {
            store,
            task_id,
            subject_id,
        }
    }

    pub async fn log(&self, level: LogLevel, message: impl Into<String>) {
        let message = message.into();
        match level {
            LogLevel::Debug => debug!(task_id = %self.task_id, subject_id = %self.subject_id, "{}", message),
            LogLevel::Info => info!(task_id = %self.task_id, subject_id = %self.subject_id, "{}", message),
            LogLevel::Warning => warn!(task_id = %self.task_id, subject_id = %self.subject_id, "{}", message),
            LogLevel::Error => error!(task_id = %self.task_id, subject_id = %self.subject_id, "{}", message),
        }

        let record = TaskLogRecord {
            task_id: self.task_id,
            subject_id: self.subject_id,
            level,
            message,
            timestamp: Utc::now(),
        };
        if let Err(e) = self.store.append_log(record).await {
            warn!(
                subsystem = "jobs",
                component = "task_logger",
                task_id = %self.task_id,
                error = %e,
                "Failed to persist task log record"
            );
        }
    }

    pub async fn debug(&self, message: impl Into<String>) {
        self.log(LogLevel::Debug, message).await
    }

    pub async fn info(&self, message: impl Into<String>) {
        self.log(LogLevel::Info, message).await
    }

    pub async fn warning(&self, message: impl Into<String>) {
        self.log(LogLevel::Warning, message).await
    }

    pub async fn error(&self, message: impl Into<String>) {
        self.log(LogLevel::Error, message).await
    }
}
