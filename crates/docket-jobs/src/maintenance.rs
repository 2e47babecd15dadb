//! Periodic maintenance: completed-task cleanup and trash purging.

use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use docket_core::TaskRepository;

use crate::archive::Archive;
use crate::scheduler::Scheduler;

/// Delete completed tasks from `store` every `interval` until shutdown.
pub fn spawn_maintenance(scheduler: &Scheduler, store: Arc<dyn TaskRepository>, interval: Duration) {
    scheduler.schedule_job("task-store-maintenance", interval, move || {
        let store = store.clone();
        async move {
            let deleted = store.delete_completed().await?;
            if deleted > 0 {
                info!(deleted, "Removed completed tasks");
            }
            Ok(())
        }
    });
}

/// Purge expired documents from the trash every `interval` until shutdown.
pub fn spawn_trash_purge(scheduler: &Scheduler, archive: Arc<Archive>, interval: Duration) {
    scheduler.schedule_job("trash-purge", interval, move || {
        let archive = archive.clone();
        async move {
            archive.empty_trash().await?;
            Ok(())
        }
    });
}
