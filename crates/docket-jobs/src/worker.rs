//! Task worker: a polling loop bound to one processor's task types.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use futures::FutureExt;
use tokio::sync::broadcast;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use docket_core::defaults;
use docket_core::{Backoff, ShutdownSignal, Task, TaskRepository, TaskStatus, TaskType};

use crate::handler::{TaskProcessor, TaskResult};

/// Configuration for task workers.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Polling interval in milliseconds.
    pub poll_interval_ms: u64,
    /// Maximum number of tasks fetched per tick.
    pub batch_size: usize,
    /// Whether to enable task processing.
    pub enabled: bool,
    /// Retry delay policy.
    pub backoff: Backoff,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: defaults::TASK_POLL_INTERVAL_MS,
            batch_size: defaults::TASK_BATCH_SIZE,
            enabled: true,
            backoff: Backoff::default(),
        }
    }
}

impl WorkerConfig {
    /// Create config from environment variables (with defaults).
    ///
    /// | Variable | Default | Description |
    /// |----------|---------|-------------|
    /// | `TASK_WORKER_ENABLED` | `true` | Enable/disable task processing |
    /// | `TASK_POLL_INTERVAL_MS` | `500` | Interval between polls |
    /// | `TASK_BATCH_SIZE` | `10` | Tasks fetched per poll |
    /// | `TASK_BACKOFF_BASE_MS` | `1000` | Retry delay unit (`attempts² × base`, capped at 5 minutes) |
    pub fn from_env() -> Self {
        let enabled = std::env::var("TASK_WORKER_ENABLED")
            .map(|v| v != "false" && v != "0")
            .unwrap_or(true);

        let poll_interval_ms = std::env::var("TASK_POLL_INTERVAL_MS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(defaults::TASK_POLL_INTERVAL_MS)
            .max(1);

        let batch_size = std::env::var("TASK_BATCH_SIZE")
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
            .unwrap_or(defaults::TASK_BATCH_SIZE)
            .max(1);

        let backoff_base_ms = std::env::var("TASK_BACKOFF_BASE_MS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(defaults::TASK_BACKOFF_BASE_MS);

        Self {
            poll_interval_ms,
            batch_size,
            enabled,
            backoff: Backoff {
                base: Duration::from_millis(backoff_base_ms),
                ..Backoff::default()
            },
        }
    }

    /// Values below 1 ms are raised to 1 ms.
    pub fn with_poll_interval(mut self, ms: u64) -> Self {
        self.poll_interval_ms = ms.max(1);
        self
    }

    /// Values below 1 are raised to 1.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }
}

/// Event emitted by task workers.
#[derive(Debug, Clone)]
pub enum WorkerEvent {
    /// A worker loop started.
    WorkerStarted { worker: &'static str },
    /// A worker loop returned after shutdown.
    WorkerStopped { worker: &'static str },
    /// A task was claimed and handed to its processor.
    TaskStarted {
        task_id: Uuid,
        task_type: TaskType,
        attempt: i32,
    },
    /// A task completed successfully.
    TaskCompleted {
        task_id: Uuid,
        task_type: TaskType,
        attempts: i32,
    },
    /// An attempt failed and the task is pending again.
    TaskRetrying {
        task_id: Uuid,
        task_type: TaskType,
        attempt: i32,
        error: String,
        next_run_at: DateTime<Utc>,
    },
    /// A task failed terminally.
    TaskFailed {
        task_id: Uuid,
        task_type: TaskType,
        attempts: i32,
        error: String,
    },
}

/// Polling loop that claims and executes tasks for one processor.
pub(crate) struct Worker {
    store: Arc<dyn TaskRepository>,
    processor: Arc<dyn TaskProcessor>,
    task_types: Vec<TaskType>,
    config: WorkerConfig,
    event_tx: broadcast::Sender<WorkerEvent>,
}

impl Worker {
    pub(crate) fn new(
        store: Arc<dyn TaskRepository>,
        processor: Arc<dyn TaskProcessor>,
        config: WorkerConfig,
        event_tx: broadcast::Sender<WorkerEvent>,
    ) -> Self {
        let task_types = processor.responsible_for();
        Self {
            store,
            processor,
            task_types,
            config,
            event_tx,
        }
    }

    /// Run until `signal` fires. The task in flight when it fires is
    /// finished and persisted before the loop returns.
    pub(crate) async fn run(self, signal: ShutdownSignal) {
        let worker = self.processor.name();
        info!(
            worker,
            task_types = ?self.task_types,
            poll_interval_ms = self.config.poll_interval_ms,
            batch_size = self.config.batch_size,
            "Task worker started"
        );
        let _ = self.event_tx.send(WorkerEvent::WorkerStarted { worker });

        let mut ticker = tokio::time::interval(Duration::from_millis(self.config.poll_interval_ms));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = signal.cancelled() => break,
                _ = ticker.tick() => {}
            }
            self.poll_once(&signal).await;
        }

        let _ = self.event_tx.send(WorkerEvent::WorkerStopped { worker });
        info!(worker, "Task worker stopped");
    }

    /// Fetch one batch and process it in order. Returns how many tasks ran.
    pub(crate) async fn poll_once(&self, signal: &ShutdownSignal) -> usize {
        let worker = self.processor.name();
        let batch = match self
            .store
            .find_pending_of_types(self.config.batch_size, &self.task_types)
            .await
        {
            Ok(batch) => batch,
            Err(e) => {
                error!(worker, error = %e, "Failed to fetch pending tasks");
                return 0;
            }
        };

        if batch.is_empty() {
            return 0;
        }
        debug!(worker, batch = batch.len(), "Fetched task batch");

        let mut processed = 0;
        for task in batch {
            if signal.is_cancelled() {
                debug!(worker, "Shutdown requested, leaving rest of batch pending");
                break;
            }
            if self.execute(task).await {
                processed += 1;
            }
        }
        processed
    }

    /// Claim, process and persist a single task. Returns false when the task
    /// was skipped.
    async fn execute(&self, mut task: Task) -> bool {
        let worker = self.processor.name();
        let task_id = task.id;
        let task_type = task.task_type;

        if !task.should_run() {
            debug!(worker, %task_id, "Task no longer due, skipping");
            return false;
        }

        task.mark_running();
        match self.store.claim(&task).await {
            Ok(true) => {}
            Ok(false) => {
                debug!(worker, %task_id, "Task claimed elsewhere, skipping");
                return false;
            }
            Err(e) => {
                error!(worker, %task_id, error = %e, "Failed to claim task");
                return false;
            }
        }

        let attempt = task.attempts;
        info!(worker, %task_id, %task_type, attempt, "Processing task");
        let _ = self.event_tx.send(WorkerEvent::TaskStarted {
            task_id,
            task_type,
            attempt,
        });

        let start = Instant::now();
        let result = match AssertUnwindSafe(self.processor.process(&task))
            .catch_unwind()
            .await
        {
            Ok(result) => result,
            Err(_) => {
                error!(worker, %task_id, %task_type, attempt, "Task processor panicked");
                TaskResult::Retry("task processor panicked".to_string())
            }
        };
        let duration_ms = start.elapsed().as_millis() as u64;

        match result {
            TaskResult::Success => {
                task.mark_completed();
                info!(worker, %task_id, %task_type, attempt, duration_ms, "Task completed");
                let _ = self.event_tx.send(WorkerEvent::TaskCompleted {
                    task_id,
                    task_type,
                    attempts: attempt,
                });
            }
            TaskResult::Retry(error) => self.record_failure(&mut task, error, true, duration_ms),
            TaskResult::Failed(error) => self.record_failure(&mut task, error, false, duration_ms),
        }

        match self.store.update(&task).await {
            Ok(true) => {}
            Ok(false) => {
                warn!(
                    worker,
                    %task_id,
                    %task_type,
                    status = %task.status,
                    "Task deleted while running, outcome discarded"
                );
            }
            Err(e) => {
                error!(
                    worker,
                    %task_id,
                    %task_type,
                    status = %task.status,
                    error = %e,
                    "Failed to persist task state"
                );
            }
        }
        true
    }

    fn record_failure(&self, task: &mut Task, error: String, retriable: bool, duration_ms: u64) {
        let worker = self.processor.name();
        task.mark_failed(error.clone(), retriable, &self.config.backoff);

        if task.status == TaskStatus::Pending {
            warn!(
                worker,
                task_id = %task.id,
                task_type = %task.task_type,
                attempt = task.attempts,
                max_attempts = task.max_attempts,
                next_run_at = %task.next_run_at,
                duration_ms,
                %error,
                "Task attempt failed, will retry"
            );
            let _ = self.event_tx.send(WorkerEvent::TaskRetrying {
                task_id: task.id,
                task_type: task.task_type,
                attempt: task.attempts,
                error,
                next_run_at: task.next_run_at,
            });
        } else {
            warn!(
                worker,
                task_id = %task.id,
                task_type = %task.task_type,
                attempt = task.attempts,
                max_attempts = task.max_attempts,
                retriable,
                duration_ms,
                %error,
                "Task failed permanently"
            );
            let _ = self.event_tx.send(WorkerEvent::TaskFailed {
                task_id: task.id,
                task_type: task.task_type,
                attempts: task.attempts,
                error,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use docket_core::{DocumentPayload, Error, Result, Shutdown, TaskPage};
    use docket_db::MemoryTaskRepository;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex;
    use tokio::sync::Notify;

    #[test]
    fn test_worker_config_default() {
        let config = WorkerConfig::default();
        assert_eq!(config.poll_interval_ms, 500);
        assert_eq!(config.batch_size, 10);
        assert!(config.enabled);
        assert_eq!(config.backoff, Backoff::default());
    }

    #[test]
    fn test_worker_config_builder() {
        let backoff = Backoff {
            base: Duration::from_millis(5),
            cap: Duration::from_millis(50),
        };
        let config = WorkerConfig::default()
            .with_poll_interval(20)
            .with_batch_size(3)
            .with_enabled(false)
            .with_backoff(backoff);

        assert_eq!(config.poll_interval_ms, 20);
        assert_eq!(config.batch_size, 3);
        assert!(!config.enabled);
        assert_eq!(config.backoff, backoff);
    }

    #[test]
    fn test_worker_config_builder_clamps_zero() {
        let config = WorkerConfig::default()
            .with_poll_interval(0)
            .with_batch_size(0);
        assert_eq!(config.poll_interval_ms, 1);
        assert_eq!(config.batch_size, 1);
    }

    /// Processor that replays a scripted sequence of outcomes.
    struct ScriptedProcessor {
        outcomes: Mutex<Vec<TaskResult>>,
        seen: Mutex<Vec<Uuid>>,
    }

    impl ScriptedProcessor {
        fn new(mut outcomes: Vec<TaskResult>) -> Self {
            outcomes.reverse();
            Self {
                outcomes: Mutex::new(outcomes),
                seen: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl TaskProcessor for ScriptedProcessor {
        fn name(&self) -> &'static str {
            "scripted"
        }

        fn responsible_for(&self) -> Vec<TaskType> {
            vec![TaskType::ExtractText]
        }

        async fn process(&self, task: &Task) -> TaskResult {
            self.seen.lock().unwrap().push(task.id);
            self.outcomes
                .lock()
                .unwrap()
                .pop()
                .unwrap_or(TaskResult::Success)
        }
    }

    struct PanickingProcessor;

    #[async_trait]
    impl TaskProcessor for PanickingProcessor {
        fn name(&self) -> &'static str {
            "panicking"
        }

        fn responsible_for(&self) -> Vec<TaskType> {
            vec![TaskType::ExtractText]
        }

        async fn process(&self, _task: &Task) -> TaskResult {
            panic!("processor bug");
        }
    }

    fn zero_backoff() -> Backoff {
        Backoff {
            base: Duration::ZERO,
            cap: Duration::ZERO,
        }
    }

    fn worker(
        store: Arc<MemoryTaskRepository>,
        processor: Arc<dyn TaskProcessor>,
    ) -> (Worker, broadcast::Receiver<WorkerEvent>) {
        let (tx, rx) = broadcast::channel(64);
        let config = WorkerConfig::default().with_backoff(zero_backoff());
        (Worker::new(store, processor, config, tx), rx)
    }

    async fn pending_task(store: &MemoryTaskRepository, max_attempts: i32) -> Task {
        let task = Task::new(
            TaskType::ExtractText,
            &DocumentPayload::new(Uuid::new_v4()),
            max_attempts,
        )
        .unwrap();
        store.save(&task).await.unwrap();
        task
    }

    #[tokio::test]
    async fn test_retry_twice_then_succeed() {
        let store = Arc::new(MemoryTaskRepository::new());
        let processor = Arc::new(ScriptedProcessor::new(vec![
            TaskResult::Retry("first failure".into()),
            TaskResult::Retry("second failure".into()),
            TaskResult::Success,
        ]));
        let (worker, _rx) = worker(store.clone(), processor.clone());
        let signal = Shutdown::new().signal();
        let task = pending_task(&store, 3).await;

        assert_eq!(worker.poll_once(&signal).await, 1);
        let stored = store.find_by_id(task.id).await.unwrap().unwrap();
        assert_eq!(stored.status, TaskStatus::Pending);
        assert_eq!(stored.error.as_deref(), Some("first failure"));

        assert_eq!(worker.poll_once(&signal).await, 1);
        let stored = store.find_by_id(task.id).await.unwrap().unwrap();
        assert_eq!(stored.error.as_deref(), Some("second failure"));
        assert_eq!(stored.attempts, 2);

        assert_eq!(worker.poll_once(&signal).await, 1);
        let stored = store.find_by_id(task.id).await.unwrap().unwrap();
        assert_eq!(stored.status, TaskStatus::Completed);
        assert_eq!(stored.attempts, 3);
        assert!(stored.error.is_none());
    }

    #[tokio::test]
    async fn test_terminal_after_max_attempts() {
        let store = Arc::new(MemoryTaskRepository::new());
        let processor = Arc::new(ScriptedProcessor::new(vec![
            TaskResult::Retry("boom".into()),
            TaskResult::Retry("boom".into()),
            TaskResult::Retry("boom".into()),
            TaskResult::Success,
        ]));
        let (worker, _rx) = worker(store.clone(), processor.clone());
        let signal = Shutdown::new().signal();
        let task = pending_task(&store, 3).await;

        for _ in 0..5 {
            worker.poll_once(&signal).await;
        }

        let stored = store.find_by_id(task.id).await.unwrap().unwrap();
        assert_eq!(stored.status, TaskStatus::Failed);
        assert_eq!(stored.attempts, 3);
        assert_eq!(stored.error.as_deref(), Some("boom"));
        assert_eq!(processor.seen.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_non_retriable_failure_is_terminal() {
        let store = Arc::new(MemoryTaskRepository::new());
        let processor = Arc::new(ScriptedProcessor::new(vec![TaskResult::Failed(
            "Unsupported filetype: unknown".into(),
        )]));
        let (worker, mut rx) = worker(store.clone(), processor);
        let signal = Shutdown::new().signal();
        let task = pending_task(&store, 3).await;

        worker.poll_once(&signal).await;

        let stored = store.find_by_id(task.id).await.unwrap().unwrap();
        assert_eq!(stored.status, TaskStatus::Failed);
        assert_eq!(stored.attempts, 1);

        assert!(matches!(rx.recv().await.unwrap(), WorkerEvent::TaskStarted { attempt: 1, .. }));
        assert!(matches!(rx.recv().await.unwrap(), WorkerEvent::TaskFailed { attempts: 1, .. }));
    }

    #[tokio::test]
    async fn test_backoff_defers_next_claim() {
        let store = Arc::new(MemoryTaskRepository::new());
        let processor = Arc::new(ScriptedProcessor::new(vec![TaskResult::Retry("later".into())]));
        let (tx, _rx) = broadcast::channel(16);
        let config = WorkerConfig::default().with_backoff(Backoff {
            base: Duration::from_secs(60),
            cap: Duration::from_secs(300),
        });
        let worker = Worker::new(store.clone(), processor.clone(), config, tx);
        let signal = Shutdown::new().signal();
        let task = pending_task(&store, 3).await;

        assert_eq!(worker.poll_once(&signal).await, 1);
        // Still pending, but not due for a minute
        assert_eq!(worker.poll_once(&signal).await, 0);
        let stored = store.find_by_id(task.id).await.unwrap().unwrap();
        assert_eq!(stored.status, TaskStatus::Pending);
        assert!(stored.next_run_at > Utc::now() + chrono::Duration::seconds(50));
    }

    #[tokio::test]
    async fn test_panicking_processor_does_not_kill_worker() {
        let store = Arc::new(MemoryTaskRepository::new());
        let (worker, _rx) = worker(store.clone(), Arc::new(PanickingProcessor));
        let signal = Shutdown::new().signal();
        let first = pending_task(&store, 1).await;
        let second = pending_task(&store, 1).await;

        assert_eq!(worker.poll_once(&signal).await, 2);
        for id in [first.id, second.id] {
            let stored = store.find_by_id(id).await.unwrap().unwrap();
            assert_eq!(stored.status, TaskStatus::Failed);
            assert_eq!(stored.error.as_deref(), Some("task processor panicked"));
        }
    }

    #[tokio::test]
    async fn test_batch_processed_oldest_first() {
        let store = Arc::new(MemoryTaskRepository::new());
        let processor = Arc::new(ScriptedProcessor::new(vec![]));
        let (worker, _rx) = worker(store.clone(), processor.clone());
        let signal = Shutdown::new().signal();

        let mut ids = Vec::new();
        for _ in 0..4 {
            ids.push(pending_task(&store, 3).await.id);
            tokio::time::sleep(Duration::from_millis(2)).await;
        }

        assert_eq!(worker.poll_once(&signal).await, 4);
        assert_eq!(*processor.seen.lock().unwrap(), ids);
    }

    #[tokio::test]
    async fn test_cancelled_signal_leaves_batch_pending() {
        let store = Arc::new(MemoryTaskRepository::new());
        let processor = Arc::new(ScriptedProcessor::new(vec![]));
        let (worker, _rx) = worker(store.clone(), processor.clone());
        let shutdown = Shutdown::new();
        let signal = shutdown.signal();
        let task = pending_task(&store, 3).await;

        shutdown.execute().await;
        assert_eq!(worker.poll_once(&signal).await, 0);
        let stored = store.find_by_id(task.id).await.unwrap().unwrap();
        assert_eq!(stored.status, TaskStatus::Pending);
        assert_eq!(stored.attempts, 0);
    }

    /// Records the peak number of concurrent `process` calls per task.
    struct OverlapTracker {
        in_flight: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait]
    impl TaskProcessor for OverlapTracker {
        fn name(&self) -> &'static str {
            "overlap"
        }

        fn responsible_for(&self) -> Vec<TaskType> {
            vec![TaskType::ExtractText]
        }

        async fn process(&self, _task: &Task) -> TaskResult {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(5)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            TaskResult::Retry("again".into())
        }
    }

    #[tokio::test]
    async fn test_worker_never_overlaps_attempts() {
        let store = Arc::new(MemoryTaskRepository::new());
        let tracker = Arc::new(OverlapTracker {
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        });
        let (tx, _rx) = broadcast::channel(256);
        let config = WorkerConfig::default()
            .with_poll_interval(1)
            .with_backoff(zero_backoff());
        let worker = Worker::new(store.clone(), tracker.clone(), config, tx);
        let task = pending_task(&store, 5).await;

        let shutdown = Shutdown::new();
        let handle = tokio::spawn(worker.run(shutdown.signal()));
        shutdown.register_loop("overlap", handle);

        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            let stored = store.find_by_id(task.id).await.unwrap().unwrap();
            if stored.is_terminal() || Instant::now() > deadline {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        shutdown.execute().await;

        let stored = store.find_by_id(task.id).await.unwrap().unwrap();
        assert_eq!(stored.status, TaskStatus::Failed);
        assert_eq!(stored.attempts, 5);
        assert_eq!(tracker.peak.load(Ordering::SeqCst), 1);
    }

    /// Memory store whose calls can be made to fail once.
    #[derive(Default)]
    struct FlakyStore {
        inner: MemoryTaskRepository,
        fail_fetch: AtomicBool,
        fail_claim_of: Mutex<Option<Uuid>>,
        fail_update_of: Mutex<Option<Uuid>>,
    }

    fn unavailable() -> Error {
        Error::Internal("store unavailable".into())
    }

    fn take_if(slot: &Mutex<Option<Uuid>>, id: Uuid) -> bool {
        let mut slot = slot.lock().unwrap();
        if *slot == Some(id) {
            *slot = None;
            return true;
        }
        false
    }

    #[async_trait]
    impl TaskRepository for FlakyStore {
        async fn save(&self, task: &Task) -> Result<()> {
            self.inner.save(task).await
        }

        async fn claim(&self, task: &Task) -> Result<bool> {
            if take_if(&self.fail_claim_of, task.id) {
                return Err(unavailable());
            }
            self.inner.claim(task).await
        }

        async fn update(&self, task: &Task) -> Result<bool> {
            if take_if(&self.fail_update_of, task.id) {
                return Err(unavailable());
            }
            self.inner.update(task).await
        }

        async fn find_by_id(&self, id: Uuid) -> Result<Option<Task>> {
            self.inner.find_by_id(id).await
        }

        async fn find_pending_of_types(&self, limit: usize, types: &[TaskType]) -> Result<Vec<Task>> {
            if self.fail_fetch.swap(false, Ordering::SeqCst) {
                return Err(unavailable());
            }
            self.inner.find_pending_of_types(limit, types).await
        }

        async fn find_all(&self) -> Result<Vec<Task>> {
            self.inner.find_all().await
        }

        async fn find_paginated(&self, limit: usize, offset: usize) -> Result<TaskPage> {
            self.inner.find_paginated(limit, offset).await
        }

        async fn delete_by_id(&self, id: Uuid) -> Result<()> {
            self.inner.delete_by_id(id).await
        }

        async fn delete_completed(&self) -> Result<u64> {
            self.inner.delete_completed().await
        }
    }

    fn worker_on(
        store: Arc<dyn TaskRepository>,
        processor: Arc<dyn TaskProcessor>,
    ) -> Worker {
        let (tx, _rx) = broadcast::channel(64);
        let config = WorkerConfig::default().with_backoff(zero_backoff());
        Worker::new(store, processor, config, tx)
    }

    async fn pending_tasks(store: &dyn TaskRepository, n: usize) -> Vec<Uuid> {
        let mut ids = Vec::new();
        for _ in 0..n {
            let task = Task::new(
                TaskType::ExtractText,
                &DocumentPayload::new(Uuid::new_v4()),
                3,
            )
            .unwrap();
            store.save(&task).await.unwrap();
            ids.push(task.id);
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        ids
    }

    #[tokio::test]
    async fn test_fetch_failure_is_retried_next_poll() {
        let store = Arc::new(FlakyStore::default());
        let processor = Arc::new(ScriptedProcessor::new(vec![]));
        let worker = worker_on(store.clone(), processor.clone());
        let signal = Shutdown::new().signal();
        let ids = pending_tasks(store.as_ref(), 1).await;

        store.fail_fetch.store(true, Ordering::SeqCst);
        assert_eq!(worker.poll_once(&signal).await, 0);
        assert_eq!(worker.poll_once(&signal).await, 1);

        let stored = store.find_by_id(ids[0]).await.unwrap().unwrap();
        assert_eq!(stored.status, TaskStatus::Completed);
    }

    #[tokio::test]
    async fn test_store_errors_do_not_stop_the_batch() {
        let store = Arc::new(FlakyStore::default());
        let processor = Arc::new(ScriptedProcessor::new(vec![]));
        let worker = worker_on(store.clone(), processor.clone());
        let signal = Shutdown::new().signal();
        let ids = pending_tasks(store.as_ref(), 3).await;
        let (unclaimed, unsaved, healthy) = (ids[0], ids[1], ids[2]);

        *store.fail_claim_of.lock().unwrap() = Some(unclaimed);
        *store.fail_update_of.lock().unwrap() = Some(unsaved);

        assert_eq!(worker.poll_once(&signal).await, 2);
        assert_eq!(*processor.seen.lock().unwrap(), vec![unsaved, healthy]);

        let stored = store.find_by_id(unclaimed).await.unwrap().unwrap();
        assert_eq!(stored.status, TaskStatus::Pending);
        assert_eq!(stored.attempts, 0);
        // The claim landed, the outcome did not
        let stored = store.find_by_id(unsaved).await.unwrap().unwrap();
        assert_eq!(stored.status, TaskStatus::Running);
        let stored = store.find_by_id(healthy).await.unwrap().unwrap();
        assert_eq!(stored.status, TaskStatus::Completed);

        // The unclaimed task is picked up on the next poll
        assert_eq!(worker.poll_once(&signal).await, 1);
        let stored = store.find_by_id(unclaimed).await.unwrap().unwrap();
        assert_eq!(stored.status, TaskStatus::Completed);
        assert_eq!(stored.attempts, 1);
    }

    /// Blocks in `process` until released.
    struct GatedProcessor {
        started: Notify,
        release: Notify,
        seen: Mutex<Vec<Uuid>>,
    }

    #[async_trait]
    impl TaskProcessor for GatedProcessor {
        fn name(&self) -> &'static str {
            "gated"
        }

        fn responsible_for(&self) -> Vec<TaskType> {
            vec![TaskType::ExtractText]
        }

        async fn process(&self, task: &Task) -> TaskResult {
            self.seen.lock().unwrap().push(task.id);
            self.started.notify_one();
            self.release.notified().await;
            TaskResult::Success
        }
    }

    #[tokio::test]
    async fn test_shutdown_mid_task_finishes_and_persists_it() {
        let store = Arc::new(MemoryTaskRepository::new());
        let processor = Arc::new(GatedProcessor {
            started: Notify::new(),
            release: Notify::new(),
            seen: Mutex::new(Vec::new()),
        });
        let worker = worker_on(store.clone(), processor.clone());
        let ids = pending_tasks(store.as_ref(), 3).await;

        let shutdown = Arc::new(Shutdown::new());
        let handle = tokio::spawn(worker.run(shutdown.signal()));
        shutdown.register_loop("gated", handle);

        processor.started.notified().await;
        let stopping = {
            let shutdown = shutdown.clone();
            tokio::spawn(async move { shutdown.execute().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!stopping.is_finished());

        processor.release.notify_one();
        stopping.await.unwrap();

        assert_eq!(*processor.seen.lock().unwrap(), vec![ids[0]]);
        let stored = store.find_by_id(ids[0]).await.unwrap().unwrap();
        assert_eq!(stored.status, TaskStatus::Completed);
        for id in &ids[1..] {
            let stored = store.find_by_id(*id).await.unwrap().unwrap();
            assert_eq!(stored.status, TaskStatus::Pending);
            assert_eq!(stored.attempts, 0);
        }
    }

    /// Deletes its own task while running.
    struct SelfDeletingProcessor {
        store: Arc<MemoryTaskRepository>,
    }

    #[async_trait]
    impl TaskProcessor for SelfDeletingProcessor {
        fn name(&self) -> &'static str {
            "self-deleting"
        }

        fn responsible_for(&self) -> Vec<TaskType> {
            vec![TaskType::ExtractText]
        }

        async fn process(&self, task: &Task) -> TaskResult {
            self.store.delete_by_id(task.id).await.unwrap();
            TaskResult::Success
        }
    }

    #[tokio::test]
    async fn test_task_deleted_while_running_stays_deleted() {
        let store = Arc::new(MemoryTaskRepository::new());
        let processor = Arc::new(SelfDeletingProcessor {
            store: store.clone(),
        });
        let (worker, _rx) = worker(store.clone(), processor);
        let signal = Shutdown::new().signal();
        let task = pending_task(&store, 3).await;

        assert_eq!(worker.poll_once(&signal).await, 1);
        assert!(store.find_by_id(task.id).await.unwrap().is_none());
        assert!(store.is_empty().await);
    }
}
