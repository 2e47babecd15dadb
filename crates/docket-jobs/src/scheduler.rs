//! Scheduler: enqueue API and owner of every worker loop.
//!
//! The scheduler is built before the task store exists and the store is
//! attached afterwards, because the store's maintenance job is itself
//! registered through the scheduler. Workers cannot be registered until the
//! store is attached.

use std::future::Future;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::broadcast;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};
use uuid::Uuid;

use docket_core::defaults;
use docket_core::{Error, Result, Shutdown, Task, TaskRepository, TaskType};

use crate::handler::TaskProcessor;
use crate::worker::{Worker, WorkerConfig, WorkerEvent};

pub struct Scheduler {
    store: OnceLock<Arc<dyn TaskRepository>>,
    shutdown: Arc<Shutdown>,
    config: WorkerConfig,
    event_tx: broadcast::Sender<WorkerEvent>,
}

impl Scheduler {
    pub fn new(shutdown: Arc<Shutdown>, config: WorkerConfig) -> Self {
        let (event_tx, _) = broadcast::channel(defaults::WORKER_EVENT_CAPACITY);
        Self {
            store: OnceLock::new(),
            shutdown,
            config,
            event_tx,
        }
    }

    /// Bind the task store. May be called once.
    pub fn attach_store(&self, store: Arc<dyn TaskRepository>) -> Result<()> {
        self.store
            .set(store)
            .map_err(|_| Error::Config("task store already attached".to_string()))?;
        debug!("Task store attached to scheduler");
        Ok(())
    }

    /// The attached task store.
    pub fn store(&self) -> Result<Arc<dyn TaskRepository>> {
        self.store
            .get()
            .cloned()
            .ok_or_else(|| Error::Config("no task store attached".to_string()))
    }

    /// Enqueue a new pending task, eligible immediately.
    ///
    /// Nothing is persisted when serialization or the store write fails.
    pub async fn schedule_task<P>(
        &self,
        task_type: TaskType,
        payload: &P,
        max_attempts: i32,
    ) -> Result<Uuid>
    where
        P: Serialize + ?Sized + Sync,
    {
        let store = self.store()?;
        let task = Task::new(task_type, payload, max_attempts)?;
        store.save(&task).await?;
        debug!(task_id = %task.id, %task_type, max_attempts, "Task scheduled");
        Ok(task.id)
    }

    /// Start a worker loop for `processor`'s task types.
    ///
    /// The loop runs until shutdown, and shutdown waits for it to return.
    pub fn register_worker(&self, processor: Arc<dyn TaskProcessor>) -> Result<()> {
        let store = self.store().map_err(|_| {
            Error::Config(format!(
                "cannot start worker {} before a task store is attached",
                processor.name()
            ))
        })?;
        if processor.responsible_for().is_empty() {
            return Err(Error::InvalidInput(format!(
                "processor {} declares no task types",
                processor.name()
            )));
        }

        let name = processor.name();
        if !self.config.enabled {
            info!(worker = name, "Task processing is disabled, not starting worker");
            return Ok(());
        }

        let worker = Worker::new(store, processor, self.config.clone(), self.event_tx.clone());
        let handle = tokio::spawn(worker.run(self.shutdown.signal()));
        self.shutdown.register_loop(name, handle);
        Ok(())
    }

    /// Run `job` every `interval` until shutdown. The first run happens one
    /// interval after registration. Failures are logged and the loop goes on.
    /// Intervals below 1 ms are raised to 1 ms.
    pub fn schedule_job<F, Fut>(&self, name: &'static str, interval: Duration, job: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let interval = interval.max(Duration::from_millis(1));
        let signal = self.shutdown.signal();
        let handle = tokio::spawn(async move {
            let mut ticker =
                tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            info!(job = name, interval_secs = interval.as_secs(), "Background job scheduled");

            loop {
                tokio::select! {
                    _ = signal.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                if let Err(e) = job().await {
                    warn!(job = name, error = %e, "Background job failed");
                }
            }
            debug!(job = name, "Background job stopped");
        });
        self.shutdown.register_loop(name, handle);
    }

    /// Get a receiver for worker events.
    pub fn events(&self) -> broadcast::Receiver<WorkerEvent> {
        self.event_tx.subscribe()
    }

    pub fn shutdown(&self) -> &Arc<Shutdown> {
        &self.shutdown
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use docket_core::{DocumentPayload, TaskStatus};
    use docket_db::MemoryTaskRepository;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::handler::TaskResult;

    struct CountingProcessor {
        runs: AtomicUsize,
    }

    #[async_trait]
    impl TaskProcessor for CountingProcessor {
        fn name(&self) -> &'static str {
            "counting"
        }

        fn responsible_for(&self) -> Vec<TaskType> {
            vec![TaskType::IndexDocument]
        }

        async fn process(&self, _task: &Task) -> TaskResult {
            self.runs.fetch_add(1, Ordering::SeqCst);
            TaskResult::Success
        }
    }

    struct NothingProcessor;

    #[async_trait]
    impl TaskProcessor for NothingProcessor {
        fn name(&self) -> &'static str {
            "nothing"
        }

        fn responsible_for(&self) -> Vec<TaskType> {
            Vec::new()
        }

        async fn process(&self, _task: &Task) -> TaskResult {
            TaskResult::Success
        }
    }

    fn scheduler() -> Scheduler {
        Scheduler::new(
            Arc::new(Shutdown::new()),
            WorkerConfig::default().with_poll_interval(5),
        )
    }

    #[tokio::test]
    async fn test_schedule_before_attach_fails() {
        let scheduler = scheduler();
        let result = scheduler
            .schedule_task(TaskType::ExtractText, &DocumentPayload::new(Uuid::new_v4()), 3)
            .await;
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[tokio::test]
    async fn test_register_worker_before_attach_fails() {
        let scheduler = scheduler();
        let processor = Arc::new(CountingProcessor {
            runs: AtomicUsize::new(0),
        });
        assert!(matches!(
            scheduler.register_worker(processor),
            Err(Error::Config(_))
        ));
    }

    #[tokio::test]
    async fn test_attach_twice_fails() {
        let scheduler = scheduler();
        scheduler
            .attach_store(Arc::new(MemoryTaskRepository::new()))
            .unwrap();
        assert!(scheduler
            .attach_store(Arc::new(MemoryTaskRepository::new()))
            .is_err());
    }

    #[tokio::test]
    async fn test_schedule_task_persists_pending_task() {
        let scheduler = scheduler();
        let store = Arc::new(MemoryTaskRepository::new());
        scheduler.attach_store(store.clone()).unwrap();

        let document_id = Uuid::new_v4();
        let id = scheduler
            .schedule_task(TaskType::ExtractText, &DocumentPayload::new(document_id), 3)
            .await
            .unwrap();

        let task = store.find_by_id(id).await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.attempts, 0);
        assert_eq!(task.max_attempts, 3);
        assert_eq!(task.payload_as::<DocumentPayload>().unwrap().document_id, document_id);
    }

    #[tokio::test]
    async fn test_schedule_task_rejects_invalid_max_attempts() {
        let scheduler = scheduler();
        let store = Arc::new(MemoryTaskRepository::new());
        scheduler.attach_store(store.clone()).unwrap();

        let result = scheduler
            .schedule_task(TaskType::ExtractText, &DocumentPayload::new(Uuid::new_v4()), 0)
            .await;
        assert!(matches!(result, Err(Error::InvalidInput(_))));
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_processor_without_types_is_rejected() {
        let scheduler = scheduler();
        scheduler
            .attach_store(Arc::new(MemoryTaskRepository::new()))
            .unwrap();
        assert!(matches!(
            scheduler.register_worker(Arc::new(NothingProcessor)),
            Err(Error::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn test_registered_worker_processes_and_stops_on_shutdown() {
        let scheduler = scheduler();
        let store = Arc::new(MemoryTaskRepository::new());
        scheduler.attach_store(store.clone()).unwrap();
        let mut events = scheduler.events();

        let processor = Arc::new(CountingProcessor {
            runs: AtomicUsize::new(0),
        });
        scheduler.register_worker(processor.clone()).unwrap();

        let id = scheduler
            .schedule_task(TaskType::IndexDocument, &DocumentPayload::new(Uuid::new_v4()), 3)
            .await
            .unwrap();

        let completed = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                if let Ok(WorkerEvent::TaskCompleted { task_id, .. }) = events.recv().await {
                    if task_id == id {
                        break;
                    }
                }
            }
        })
        .await;
        assert!(completed.is_ok(), "task was not completed in time");

        scheduler.shutdown().execute().await;
        assert_eq!(processor.runs.load(Ordering::SeqCst), 1);
        let task = store.find_by_id(id).await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Completed);
    }

    #[tokio::test]
    async fn test_disabled_config_starts_no_worker() {
        let scheduler = Scheduler::new(
            Arc::new(Shutdown::new()),
            WorkerConfig::default().with_enabled(false),
        );
        let store = Arc::new(MemoryTaskRepository::new());
        scheduler.attach_store(store.clone()).unwrap();
        let processor = Arc::new(CountingProcessor {
            runs: AtomicUsize::new(0),
        });
        scheduler.register_worker(processor.clone()).unwrap();

        scheduler
            .schedule_task(TaskType::IndexDocument, &DocumentPayload::new(Uuid::new_v4()), 3)
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(processor.runs.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_schedule_job_runs_until_shutdown() {
        let scheduler = scheduler();
        let runs = Arc::new(AtomicUsize::new(0));
        let job_runs = runs.clone();
        scheduler.schedule_job("tick", Duration::from_millis(10), move || {
            let runs = job_runs.clone();
            async move {
                runs.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(Error::Internal("failures are logged".into()))
            }
        });

        tokio::time::sleep(Duration::from_millis(100)).await;
        scheduler.shutdown().execute().await;
        let after_shutdown = runs.load(Ordering::SeqCst);
        assert!(after_shutdown >= 2, "job ran {} times", after_shutdown);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(runs.load(Ordering::SeqCst), after_shutdown);
    }

    #[tokio::test]
    async fn test_schedule_job_with_zero_interval_still_runs() {
        let scheduler = scheduler();
        let runs = Arc::new(AtomicUsize::new(0));
        let job_runs = runs.clone();
        scheduler.schedule_job("busy", Duration::ZERO, move || {
            let runs = job_runs.clone();
            async move {
                runs.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        });

        tokio::time::sleep(Duration::from_millis(30)).await;
        let signal = scheduler.shutdown().signal();
        scheduler.shutdown().execute().await;
        assert!(signal.is_cancelled());
        assert!(runs.load(Ordering::SeqCst) >= 1);
    }
}
