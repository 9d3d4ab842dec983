//! Task runner contract between the orchestrator and the work it schedules.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use lectern_core::StageSet;

/// Progress callback type for task runners. Receives a fraction in `[0, 1]`.
pub type ProgressCallback = Box<dyn Fn(f64) + Send + Sync>;

/// Context provided to a runner for one task.
pub struct TaskContext {
    pub task_id: Uuid,
    pub subject_id: Uuid,
    pub stages: StageSet,
    /// Run without persisting stage outputs.
    pub preview: bool,
    cancel: CancellationToken,
    progress_callback: Option<ProgressCallback>,
}

impl TaskContext {
    pub fn new(
        task_id: Uuid,
        subject_id: Uuid,
        stages: StageSet,
        preview: bool,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            task_id,
            subject_id,
            stages,
            preview,
            cancel,
            progress_callback: None,
        }
    }

    /// Set the progress callback.
    pub fn with_progress_callback<F>(mut self, callback: F) -> Self
    where
        F: Fn(f64) + Send + Sync + 'static,
    {
        self.progress_callback = Some(Box::new(callback));
        self
    }

    /// Report progress to the callback, clamped to `[0, 1]`.
    pub fn report_progress(&self, fraction: f64) {
        if let Some(ref callback) = self.progress_callback {
            callback(fraction.clamp(0.0, 1.0));
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }
}

/// Result of running a task.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskOutcome {
    Completed,
    Failed(String),
    /// The runner observed its cancellation token.
    Cancelled,
}

/// Work scheduled by the orchestrator.
///
/// Runners must check [`TaskContext::is_cancelled`] at entry and between
/// units of work; the orchestrator never aborts a running future.
#[async_trait]
pub trait TaskRunner: Send + Sync {
    async fn run(&self, ctx: TaskContext) -> TaskOutcome;
}

/// Runner that reports full progress and completes, for testing.
pub struct NoOpRunner;

#[async_trait]
impl TaskRunner for NoOpRunner {
    async fn run(&self, ctx: TaskContext) -> TaskOutcome {
        if ctx.is_cancelled() {
            return TaskOutcome::Cancelled;
        }
        ctx.report_progress(1.0);
        TaskOutcome::Completed
    }
}
