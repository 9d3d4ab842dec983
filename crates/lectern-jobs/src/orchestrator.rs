//! Bounded worker pool with cooperative cancellation.
//!
//! A fixed number of tokio workers consume one FIFO queue. Each task gets a
//! [`CancellationToken`] at submission; runners poll it between units of
//! work. The orchestrator owns every [`PipelineTask`] snapshot and is the
//! only writer of task status. Snapshots of finished tasks are kept in a
//! bounded LRU so a long-lived pool does not grow without limit.

use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use lru::LruCache;
use serde::Serialize;
use tokio::sync::{broadcast, mpsc, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use lectern_core::{
    defaults, Error, NoOpNotifier, PipelineTask, Result, StageSet, TaskNotifier, TaskStatus,
};

use crate::handler::{TaskContext, TaskOutcome, TaskRunner};

/// Error text recorded on cancelled tasks.
pub const CANCELLED_MESSAGE: &str = "task cancelled";

/// Configuration for the orchestrator.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Number of persistent workers (at least 1).
    pub workers: usize,
    /// Capacity of the broadcast event channel.
    pub event_capacity: usize,
    /// Finished task snapshots kept for [`Orchestrator::task`].
    pub finished_retention: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            workers: defaults::POOL_WORKERS,
            event_capacity: defaults::EVENT_CHANNEL_CAPACITY,
            finished_retention: defaults::FINISHED_TASK_RETENTION,
        }
    }
}

impl OrchestratorConfig {
    /// Create config from environment variables (with defaults).
    ///
    /// | Variable | Default | Description |
    /// |----------|---------|-------------|
    /// | `LECTERN_POOL_WORKERS` | `2` | Concurrent pipeline tasks |
    /// | `LECTERN_FINISHED_TASK_RETENTION` | `512` | Finished snapshots kept |
    pub fn from_env() -> Self {
        let parse = |name: &str| std::env::var(name).ok().and_then(|v| v.parse::<usize>().ok());
        Self::default()
            .with_workers(parse(defaults::ENV_POOL_WORKERS).unwrap_or(defaults::POOL_WORKERS))
            .with_finished_retention(
                parse(defaults::ENV_FINISHED_TASK_RETENTION)
                    .unwrap_or(defaults::FINISHED_TASK_RETENTION),
            )
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity.max(1);
        self
    }

    pub fn with_finished_retention(mut self, retention: usize) -> Self {
        self.finished_retention = retention.max(1);
        self
    }
}

/// Event emitted by the orchestrator.
#[derive(Debug, Clone, PartialEq)]
pub enum OrchestratorEvent {
    TaskQueued { task_id: Uuid, subject_id: Uuid },
    TaskStarted { task_id: Uuid, worker: usize },
    TaskProgress { task_id: Uuid, progress: f64 },
    TaskFinished {
        task_id: Uuid,
        status: TaskStatus,
        error: Option<String>,
    },
    WorkerStarted { worker: usize },
    WorkerStopped { worker: usize },
}

/// Point-in-time view of the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PoolStatus {
    pub active: usize,
    pub pending: usize,
    pub capacity: usize,
}

struct QueuedTask {
    task_id: Uuid,
    cancel: CancellationToken,
}

/// Registration of a task a worker is executing.
struct ActiveTask {
    subject_id: Uuid,
    cancel: CancellationToken,
    started: Instant,
}

/// State shared between the handle and every worker.
struct Shared {
    runner: Arc<dyn TaskRunner>,
    notifier: Arc<dyn TaskNotifier>,
    /// Queued and running tasks.
    tasks: RwLock<HashMap<Uuid, PipelineTask>>,
    finished: Mutex<LruCache<Uuid, PipelineTask>>,
    active: RwLock<HashMap<Uuid, ActiveTask>>,
    pending: AtomicUsize,
    shutting_down: AtomicBool,
    event_tx: broadcast::Sender<OrchestratorEvent>,
}

/// Builder for an [`Orchestrator`].
pub struct OrchestratorBuilder {
    runner: Arc<dyn TaskRunner>,
    notifier: Arc<dyn TaskNotifier>,
    config: OrchestratorConfig,
}

impl OrchestratorBuilder {
    pub fn new(runner: Arc<dyn TaskRunner>) -> Self {
        Self {
            runner,
            notifier: Arc::new(NoOpNotifier),
            config: OrchestratorConfig::default(),
        }
    }

    pub fn with_config(mut self, config: OrchestratorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn TaskNotifier>) -> Self {
        self.notifier = notifier;
        self
    }

    /// Spawn the workers. Must be called inside a tokio runtime.
    pub fn start(self) -> Orchestrator {
        Orchestrator::start(self.runner, self.notifier, self.config)
    }
}

/// Handle to a running worker pool.
pub struct Orchestrator {
    shared: Arc<Shared>,
    queue_tx: RwLock<Option<mpsc::UnboundedSender<QueuedTask>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    capacity: usize,
}

impl Orchestrator {
    pub fn builder(runner: Arc<dyn TaskRunner>) -> OrchestratorBuilder {
        OrchestratorBuilder::new(runner)
    }

    fn start(
        runner: Arc<dyn TaskRunner>,
        notifier: Arc<dyn TaskNotifier>,
        config: OrchestratorConfig,
    ) -> Self {
        let capacity = config.workers.max(1);
        let (event_tx, _) = broadcast::channel(config.event_capacity.max(1));
        let (queue_tx, queue_rx) = mpsc::unbounded_channel();
        let queue_rx = Arc::new(Mutex::new(queue_rx));
        let retention =
            NonZeroUsize::new(config.finished_retention).unwrap_or(NonZeroUsize::MIN);

        let shared = Arc::new(Shared {
            runner,
            notifier,
            tasks: RwLock::new(HashMap::new()),
            finished: Mutex::new(LruCache::new(retention)),
            active: RwLock::new(HashMap::new()),
            pending: AtomicUsize::new(0),
            shutting_down: AtomicBool::new(false),
            event_tx,
        });

        let workers = (0..capacity)
            .map(|worker| {
                let shared = shared.clone();
                let queue_rx = queue_rx.clone();
                tokio::spawn(async move { shared.worker_loop(worker, queue_rx).await })
            })
            .collect();

        info!(
            subsystem = "jobs",
            component = "orchestrator",
            capacity,
            "Task orchestrator started"
        );

        Self {
            shared,
            queue_tx: RwLock::new(Some(queue_tx)),
            workers: Mutex::new(workers),
            capacity,
        }
    }

    /// Queue a task. Returns its id and the token that cancels it.
    ///
    /// Never waits for a free worker. Fails only after [`Orchestrator::shutdown`].
    pub async fn submit(
        &self,
        subject_id: Uuid,
        stages: StageSet,
        preview: bool,
    ) -> Result<(Uuid, CancellationToken)> {
        let queue = self.queue_tx.read().await;
        let Some(tx) = queue.as_ref() else {
            return Err(Error::Orchestrator(
                "orchestrator is shut down".to_string(),
            ));
        };

        let task = PipelineTask::new(subject_id, stages, preview);
        let task_id = task.id;
        let cancel = CancellationToken::new();

        self.shared.tasks.write().await.insert(task_id, task);
        self.shared.pending.fetch_add(1, Ordering::SeqCst);

        if tx
            .send(QueuedTask {
                task_id,
                cancel: cancel.clone(),
            })
            .is_err()
        {
            self.shared.pending.fetch_sub(1, Ordering::SeqCst);
            self.shared.tasks.write().await.remove(&task_id);
            return Err(Error::Orchestrator("task queue closed".to_string()));
        }

        debug!(
            subsystem = "jobs",
            component = "orchestrator",
            task_id = %task_id,
            subject_id = %subject_id,
            stages = %stages,
            preview,
            "Task queued"
        );
        let _ = self
            .shared
            .event_tx
            .send(OrchestratorEvent::TaskQueued { task_id, subject_id });

        Ok((task_id, cancel))
    }

    /// Cancel an active task. Returns false when the task is not running.
    pub async fn cancel(&self, task_id: Uuid) -> bool {
        let active = self.shared.active.read().await;
        match active.get(&task_id) {
            Some(entry) => {
                entry.cancel.cancel();
                info!(
                    subsystem = "jobs",
                    component = "orchestrator",
                    task_id = %task_id,
                    subject_id = %entry.subject_id,
                    running_ms = entry.started.elapsed().as_millis() as u64,
                    "Cancellation requested"
                );
                true
            }
            None => false,
        }
    }

    pub async fn status(&self) -> PoolStatus {
        PoolStatus {
            active: self.shared.active.read().await.len(),
            pending: self.shared.pending.load(Ordering::SeqCst),
            capacity: self.capacity,
        }
    }

    /// Snapshot of a queued, running, or recently finished task.
    pub async fn task(&self, task_id: Uuid) -> Option<PipelineTask> {
        if let Some(task) = self.shared.tasks.read().await.get(&task_id) {
            return Some(task.clone());
        }
        self.shared.finished.lock().await.peek(&task_id).cloned()
    }

    /// Number of task snapshots held, live and finished.
    pub async fn retained_tasks(&self) -> usize {
        self.shared.tasks.read().await.len() + self.shared.finished.lock().await.len()
    }

    /// Subscribe to orchestrator events.
    pub fn events(&self) -> broadcast::Receiver<OrchestratorEvent> {
        self.shared.event_tx.subscribe()
    }

    /// Stop accepting work, cancel queued and active tasks, and wait for
    /// every worker to exit. Idempotent.
    pub async fn shutdown(&self) {
        self.shared.shutting_down.store(true, Ordering::SeqCst);
        // Dropping the only sender lets workers drain the queue and exit.
        self.queue_tx.write().await.take();

        for entry in self.shared.active.read().await.values() {
            entry.cancel.cancel();
        }

        let handles: Vec<JoinHandle<()>> = self.workers.lock().await.drain(..).collect();
        for result in futures::future::join_all(handles).await {
            if let Err(e) = result {
                error!(subsystem = "jobs", component = "orchestrator", error = ?e, "Worker task failed");
            }
        }
        info!(subsystem = "jobs", component = "orchestrator", "Task orchestrator stopped");
    }
}

impl Shared {
    async fn worker_loop(
        self: Arc<Self>,
        worker: usize,
        queue_rx: Arc<Mutex<mpsc::UnboundedReceiver<QueuedTask>>>,
    ) {
        let _ = self.event_tx.send(OrchestratorEvent::WorkerStarted { worker });
        loop {
            let next = {
                let mut rx = queue_rx.lock().await;
                rx.recv().await
            };
            let Some(item) = next else {
                break;
            };
            self.pending.fetch_sub(1, Ordering::SeqCst);

            if self.shutting_down.load(Ordering::SeqCst) || item.cancel.is_cancelled() {
                debug!(
                    subsystem = "jobs",
                    component = "orchestrator",
                    task_id = %item.task_id,
                    "Task cancelled before pickup"
                );
                self.finish(item.task_id, TaskOutcome::Cancelled).await;
                continue;
            }

            self.execute(worker, item).await;
        }
        let _ = self.event_tx.send(OrchestratorEvent::WorkerStopped { worker });
    }

    async fn execute(self: &Arc<Self>, worker: usize, item: QueuedTask) {
        let task_id = item.task_id;
        let Some(task) = self.mark_started(task_id).await else {
            warn!(subsystem = "jobs", component = "orchestrator", task_id = %task_id, "Dequeued unknown task");
            return;
        };

        self.active.write().await.insert(
            task_id,
            ActiveTask {
                subject_id: task.subject_id,
                cancel: item.cancel.clone(),
                started: Instant::now(),
            },
        );
        if self.shutting_down.load(Ordering::SeqCst) {
            item.cancel.cancel();
        }

        info!(
            subsystem = "jobs",
            component = "orchestrator",
            task_id = %task_id,
            subject_id = %task.subject_id,
            worker,
            stages = %task.stages,
            preview = task.preview,
            "Processing task"
        );
        self.notifier.on_task_started(&task).await;
        let _ = self
            .event_tx
            .send(OrchestratorEvent::TaskStarted { task_id, worker });

        // The callback is synchronous; forward to an async recorder so
        // snapshots and notifications stay ordered.
        let (progress_tx, mut progress_rx) = mpsc::unbounded_channel::<f64>();
        let recorder = {
            let shared = self.clone();
            tokio::spawn(async move {
                while let Some(progress) = progress_rx.recv().await {
                    shared.record_progress(task_id, progress).await;
                }
            })
        };

        let ctx = TaskContext::new(
            task_id,
            task.subject_id,
            task.stages,
            task.preview,
            item.cancel.clone(),
        )
        .with_progress_callback(move |progress| {
            let _ = progress_tx.send(progress);
        });

        let runner = self.runner.clone();
        let start = Instant::now();
        let outcome = match tokio::spawn(async move { runner.run(ctx).await }).await {
            Ok(outcome) => outcome,
            Err(e) if e.is_panic() => {
                error!(
                    subsystem = "jobs",
                    component = "orchestrator",
                    task_id = %task_id,
                    "Task runner panicked"
                );
                TaskOutcome::Failed(format!("task runner panicked: {}", panic_message(e)))
            }
            Err(e) => TaskOutcome::Failed(format!("task runner aborted: {}", e)),
        };

        if let Err(e) = recorder.await {
            warn!(subsystem = "jobs", component = "orchestrator", task_id = %task_id, error = ?e, "Progress recorder failed");
        }
        self.active.write().await.remove(&task_id);

        debug!(
            subsystem = "jobs",
            component = "orchestrator",
            task_id = %task_id,
            duration_ms = start.elapsed().as_millis() as u64,
            "Runner returned"
        );
        self.finish(task_id, outcome).await;
    }

    async fn mark_started(&self, task_id: Uuid) -> Option<PipelineTask> {
        let mut tasks = self.tasks.write().await;
        let task = tasks.get_mut(&task_id)?;
        task.status = TaskStatus::Processing;
        task.started_at = Some(Utc::now());
        Some(task.clone())
    }

    async fn record_progress(&self, task_id: Uuid, progress: f64) {
        let snapshot = {
            let mut tasks = self.tasks.write().await;
            let Some(task) = tasks.get_mut(&task_id) else {
                return;
            };
            task.progress = progress;
            task.clone()
        };
        self.notifier.on_task_progress(&snapshot).await;
        let _ = self
            .event_tx
            .send(OrchestratorEvent::TaskProgress { task_id, progress });
    }

    async fn finish(&self, task_id: Uuid, outcome: TaskOutcome) {
        // Moved to the finished LRU under the live-map lock so lookups never
        // miss a task in between.
        let (snapshot, evicted) = {
            let mut tasks = self.tasks.write().await;
            let Some(mut task) = tasks.remove(&task_id) else {
                return;
            };
            match outcome {
                TaskOutcome::Completed => {
                    task.status = TaskStatus::Completed;
                    task.progress = 1.0;
                    task.error = None;
                }
                TaskOutcome::Failed(message) => {
                    task.status = TaskStatus::Failed;
                    task.error = Some(message);
                }
                TaskOutcome::Cancelled => {
                    task.status = TaskStatus::Cancelled;
                    task.error = Some(CANCELLED_MESSAGE.to_string());
                }
            }
            task.finished_at = Some(Utc::now());
            let evicted = self.finished.lock().await.push(task_id, task.clone());
            (task, evicted.map(|(id, _)| id))
        };
        if let Some(evicted) = evicted {
            debug!(subsystem = "jobs", component = "orchestrator", task_id = %evicted, "Evicted finished task snapshot");
        }

        match snapshot.status {
            TaskStatus::Completed => info!(
                subsystem = "jobs",
                component = "orchestrator",
                task_id = %task_id,
                subject_id = %snapshot.subject_id,
                "Task completed"
            ),
            _ => warn!(
                subsystem = "jobs",
                component = "orchestrator",
                task_id = %task_id,
                subject_id = %snapshot.subject_id,
                status = snapshot.status.as_str(),
                error = snapshot.error.as_deref().unwrap_or_default(),
                "Task did not complete"
            ),
        }

        self.notifier.on_task_finished(&snapshot).await;
        let _ = self.event_tx.send(OrchestratorEvent::TaskFinished {
            task_id,
            status: snapshot.status,
            error: snapshot.error,
        });
    }
}

fn panic_message(e: tokio::task::JoinError) -> String {
    let payload = e.into_panic();
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
