//! Task processors for each task type.

use async_trait::async_trait;

use docket_core::{Error, Result, Task, TaskType};

/// Outcome of one processing attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskResult {
    /// Task completed successfully.
    Success,
    /// Attempt failed; retry after backoff while attempts remain.
    Retry(String),
    /// Attempt failed in a way retrying cannot fix.
    Failed(String),
}

impl From<Result<()>> for TaskResult {
    fn from(result: Result<()>) -> Self {
        match result {
            Ok(()) => TaskResult::Success,
            Err(e) if e.is_retriable() => TaskResult::Retry(e.to_string()),
            Err(e) => TaskResult::Failed(e.to_string()),
        }
    }
}

impl From<Error> for TaskResult {
    fn from(error: Error) -> Self {
        TaskResult::from(Err(error))
    }
}

/// Executes tasks of the types it declares responsibility for.
#[async_trait]
pub trait TaskProcessor: Send + Sync {
    /// Name used in logs and worker events.
    fn name(&self) -> &'static str;

    /// Task types this processor handles. Non-empty.
    fn responsible_for(&self) -> Vec<TaskType>;

    /// Run one attempt of `task`.
    async fn process(&self, task: &Task) -> TaskResult;

    /// Check if this processor can process the given task type.
    fn can_handle(&self, task_type: TaskType) -> bool {
        self.responsible_for().contains(&task_type)
    }
}
