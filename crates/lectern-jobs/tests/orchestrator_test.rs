//! Integration tests for the bounded task orchestrator.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::broadcast;
use uuid::Uuid;

use lectern_jobs::{
    NoOpRunner, Orchestrator, OrchestratorConfig, OrchestratorEvent, StageSet, TaskContext,
    TaskOutcome, TaskRunner, TaskStatus, CANCELLED_MESSAGE,
};

/// Runner that tracks concurrency and sleeps in small cancellable steps.
struct SlowRunner {
    steps: usize,
    step: Duration,
    active: AtomicUsize,
    peak: AtomicUsize,
}

impl SlowRunner {
    fn new(steps: usize, step_ms: u64) -> Self {
        Self {
            steps,
            step: Duration::from_millis(step_ms),
            active: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl TaskRunner for SlowRunner {
    async fn run(&self, ctx: TaskContext) -> TaskOutcome {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);

        let mut outcome = TaskOutcome::Completed;
        for i in 0..self.steps {
            if ctx.is_cancelled() {
                outcome = TaskOutcome::Cancelled;
                break;
            }
            tokio::time::sleep(self.step).await;
            ctx.report_progress((i + 1) as f64 / self.steps as f64);
        }

        self.active.fetch_sub(1, Ordering::SeqCst);
        outcome
    }
}

struct PanickingRunner;

#[async_trait]
impl TaskRunner for PanickingRunner {
    async fn run(&self, _ctx: TaskContext) -> TaskOutcome {
        panic!("frame decoder exploded");
    }
}

async fn wait_finished(
    events: &mut broadcast::Receiver<OrchestratorEvent>,
    task_id: Uuid,
) -> (TaskStatus, Option<String>) {
    tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            match events.recv().await {
                Ok(OrchestratorEvent::TaskFinished {
                    task_id: id,
                    status,
                    error,
                }) if id == task_id => return (status, error),
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(e) => panic!("event channel closed: {e}"),
            }
        }
    })
    .await
    .expect("task did not finish in time")
}

async fn wait_started(events: &mut broadcast::Receiver<OrchestratorEvent>, task_id: Uuid) {
    tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            if let Ok(OrchestratorEvent::TaskStarted { task_id: id, .. }) = events.recv().await {
                if id == task_id {
                    return;
                }
            }
        }
    })
    .await
    .expect("task did not start in time")
}

#[tokio::test]
async fn test_noop_runner_completes() {
    let orchestrator = Orchestrator::builder(Arc::new(NoOpRunner)).start();
    let mut events = orchestrator.events();

    let (task_id, _) = orchestrator
        .submit(Uuid::new_v4(), StageSet::all(), false)
        .await
        .unwrap();
    let (status, error) = wait_finished(&mut events, task_id).await;

    assert_eq!(status, TaskStatus::Completed);
    assert!(error.is_none());
    let task = orchestrator.task(task_id).await.unwrap();
    assert_eq!(task.progress, 1.0);
    assert!(task.finished_at.is_some());

    orchestrator.shutdown().await;
}

#[tokio::test]
async fn test_active_tasks_never_exceed_capacity() {
    let runner = Arc::new(SlowRunner::new(3, 10));
    let orchestrator = Orchestrator::builder(runner.clone())
        .with_config(OrchestratorConfig::default().with_workers(2))
        .start();
    let mut events = orchestrator.events();

    let mut ids = Vec::new();
    for _ in 0..6 {
        let (id, _) = orchestrator
            .submit(Uuid::new_v4(), StageSet::all(), false)
            .await
            .unwrap();
        ids.push(id);
    }

    let status = orchestrator.status().await;
    assert_eq!(status.capacity, 2);
    assert!(status.active <= 2);

    for id in ids {
        let (status, _) = wait_finished(&mut events, id).await;
        assert_eq!(status, TaskStatus::Completed);
    }
    assert!(runner.peak.load(Ordering::SeqCst) <= 2);
    assert_eq!(runner.peak.load(Ordering::SeqCst), 2);

    orchestrator.shutdown().await;
}

#[tokio::test]
async fn test_cancel_running_task() {
    let orchestrator = Orchestrator::builder(Arc::new(SlowRunner::new(500, 10))).start();
    let mut events = orchestrator.events();

    let (task_id, _) = orchestrator
        .submit(Uuid::new_v4(), StageSet::all(), false)
        .await
        .unwrap();
    wait_started(&mut events, task_id).await;

    assert!(orchestrator.cancel(task_id).await);
    let (status, error) = wait_finished(&mut events, task_id).await;

    assert_eq!(status, TaskStatus::Cancelled);
    assert_eq!(error.as_deref(), Some(CANCELLED_MESSAGE));
    assert_eq!(orchestrator.status().await.active, 0);

    orchestrator.shutdown().await;
}

#[tokio::test]
async fn test_token_cancelled_before_pickup() {
    let orchestrator = Orchestrator::builder(Arc::new(SlowRunner::new(20, 10)))
        .with_config(OrchestratorConfig::default().with_workers(1))
        .start();
    let mut events = orchestrator.events();

    let (blocker, _) = orchestrator
        .submit(Uuid::new_v4(), StageSet::all(), false)
        .await
        .unwrap();
    let (queued, token) = orchestrator
        .submit(Uuid::new_v4(), StageSet::all(), false)
        .await
        .unwrap();
    token.cancel();

    let (status, _) = wait_finished(&mut events, blocker).await;
    assert_eq!(status, TaskStatus::Completed);
    let (status, error) = wait_finished(&mut events, queued).await;
    assert_eq!(status, TaskStatus::Cancelled);
    assert_eq!(error.as_deref(), Some(CANCELLED_MESSAGE));

    let task = orchestrator.task(queued).await.unwrap();
    assert!(task.started_at.is_none());

    orchestrator.shutdown().await;
}

#[tokio::test]
async fn test_cancel_unknown_or_queued_task_returns_false() {
    let orchestrator = Orchestrator::builder(Arc::new(SlowRunner::new(20, 10)))
        .with_config(OrchestratorConfig::default().with_workers(1))
        .start();
    let mut events = orchestrator.events();

    assert!(!orchestrator.cancel(Uuid::new_v4()).await);

    let (blocker, _) = orchestrator
        .submit(Uuid::new_v4(), StageSet::all(), false)
        .await
        .unwrap();
    wait_started(&mut events, blocker).await;
    let (queued, _) = orchestrator
        .submit(Uuid::new_v4(), StageSet::all(), false)
        .await
        .unwrap();
    assert!(!orchestrator.cancel(queued).await);

    let (status, _) = wait_finished(&mut events, queued).await;
    assert_eq!(status, TaskStatus::Completed);

    orchestrator.shutdown().await;
}

#[tokio::test]
async fn test_shutdown_cancels_queued_and_active() {
    let orchestrator = Orchestrator::builder(Arc::new(SlowRunner::new(500, 10)))
        .with_config(OrchestratorConfig::default().with_workers(1))
        .start();
    let mut events = orchestrator.events();

    let (running, _) = orchestrator
        .submit(Uuid::new_v4(), StageSet::all(), false)
        .await
        .unwrap();
    let (queued, _) = orchestrator
        .submit(Uuid::new_v4(), StageSet::all(), false)
        .await
        .unwrap();
    wait_started(&mut events, running).await;

    orchestrator.shutdown().await;

    for id in [running, queued] {
        let task = orchestrator.task(id).await.unwrap();
        assert_eq!(task.status, TaskStatus::Cancelled);
        assert_eq!(task.error.as_deref(), Some(CANCELLED_MESSAGE));
    }
    let status = orchestrator.status().await;
    assert_eq!(status.active, 0);
    assert_eq!(status.pending, 0);
}

#[tokio::test]
async fn test_submit_after_shutdown_fails() {
    let orchestrator = Orchestrator::builder(Arc::new(NoOpRunner)).start();
    orchestrator.shutdown().await;
    // A second shutdown is a no-op.
    orchestrator.shutdown().await;

    let result = orchestrator
        .submit(Uuid::new_v4(), StageSet::all(), false)
        .await;
    assert!(result.is_err());
}

#[tokio::test]
async fn test_runner_panic_becomes_failure() {
    let orchestrator = Orchestrator::builder(Arc::new(PanickingRunner)).start();
    let mut events = orchestrator.events();

    let (task_id, _) = orchestrator
        .submit(Uuid::new_v4(), StageSet::all(), false)
        .await
        .unwrap();
    let (status, error) = wait_finished(&mut events, task_id).await;

    assert_eq!(status, TaskStatus::Failed);
    let error = error.unwrap();
    assert!(error.contains("panicked"), "unexpected error: {error}");
    assert!(error.contains("frame decoder exploded"));

    // The worker survives and keeps serving.
    let (next, _) = orchestrator
        .submit(Uuid::new_v4(), StageSet::all(), false)
        .await
        .unwrap();
    let (status, _) = wait_finished(&mut events, next).await;
    assert_eq!(status, TaskStatus::Failed);

    orchestrator.shutdown().await;
}

#[tokio::test]
async fn test_progress_events_are_monotonic() {
    let orchestrator = Orchestrator::builder(Arc::new(SlowRunner::new(4, 5))).start();
    let mut events = orchestrator.events();

    let (task_id, _) = orchestrator
        .submit(Uuid::new_v4(), StageSet::all(), false)
        .await
        .unwrap();

    let mut seen = Vec::new();
    tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            match events.recv().await {
                Ok(OrchestratorEvent::TaskProgress { task_id: id, progress }) if id == task_id => {
                    seen.push(progress)
                }
                Ok(OrchestratorEvent::TaskFinished { task_id: id, .. }) if id == task_id => break,
                _ => {}
            }
        }
    })
    .await
    .unwrap();

    assert_eq!(seen, vec![0.25, 0.5, 0.75, 1.0]);
    orchestrator.shutdown().await;
}

#[tokio::test]
async fn test_finished_snapshots_are_bounded() {
    let orchestrator = Orchestrator::builder(Arc::new(NoOpRunner))
        .with_config(
            OrchestratorConfig::default()
                .with_workers(4)
                .with_event_capacity(1024)
                .with_finished_retention(8),
        )
        .start();
    let mut events = orchestrator.events();

    let mut ids = Vec::new();
    for _ in 0..50 {
        let (task_id, _) = orchestrator
            .submit(Uuid::new_v4(), StageSet::all(), false)
            .await
            .unwrap();
        ids.push(task_id);
    }

    let mut last_finished = None;
    let mut finished = 0;
    tokio::time::timeout(Duration::from_secs(10), async {
        while finished < ids.len() {
            if let Ok(OrchestratorEvent::TaskFinished { task_id, .. }) = events.recv().await {
                finished += 1;
                last_finished = Some(task_id);
            }
        }
    })
    .await
    .expect("tasks did not finish in time");

    assert_eq!(orchestrator.retained_tasks().await, 8);
    let mut visible = 0;
    for id in &ids {
        if orchestrator.task(*id).await.is_some() {
            visible += 1;
        }
    }
    assert_eq!(visible, 8);
    let newest = orchestrator.task(last_finished.unwrap()).await.unwrap();
    assert_eq!(newest.status, TaskStatus::Completed);

    orchestrator.shutdown().await;
}
