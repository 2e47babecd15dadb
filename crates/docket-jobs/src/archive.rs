//! Archive service: the producer side of the pipeline.
//!
//! Uploads, resynchronization, trash and deletion of documents, plus the
//! task administration operations surfaced to operators.

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use docket_core::defaults;
use docket_core::{
    detect_filetype, Document, DocumentMessages, DocumentPayload, DocumentRepository, Error,
    Filetype, Result, StorageBackend, Task, TaskType,
};

use crate::scheduler::Scheduler;

/// Stages scheduled for every uploaded or resynchronized document.
const DOCUMENT_STAGES: [TaskType; 2] = [TaskType::ExtractText, TaskType::GeneratePreviews];

/// One page of the task listing.
#[derive(Debug, Clone, Serialize)]
pub struct PagedTasks {
    pub tasks: Vec<Task>,
    /// 1-based page number.
    pub page: usize,
    pub total: i64,
    pub total_pages: usize,
}

pub struct Archive {
    documents: Arc<dyn DocumentRepository>,
    storage: Arc<dyn StorageBackend>,
    scheduler: Arc<Scheduler>,
    messages: Arc<DocumentMessages>,
    max_attempts: i32,
    trash_retention: chrono::Duration,
}

impl Archive {
    pub fn new(
        documents: Arc<dyn DocumentRepository>,
        storage: Arc<dyn StorageBackend>,
        scheduler: Arc<Scheduler>,
        messages: Arc<DocumentMessages>,
    ) -> Self {
        Self {
            documents,
            storage,
            scheduler,
            messages,
            max_attempts: defaults::TASK_MAX_ATTEMPTS,
            trash_retention: chrono::Duration::days(defaults::TRASH_RETENTION_DAYS),
        }
    }

    /// Set the attempt ceiling for tasks scheduled by this service.
    pub fn with_max_attempts(mut self, max_attempts: i32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Set how long trashed documents are kept before `empty_trash` removes them.
    pub fn with_trash_retention(mut self, retention: chrono::Duration) -> Self {
        self.trash_retention = retention;
        self
    }

    /// Store a new document and schedule its processing stages.
    pub async fn upload_document(&self, filename: &str, owner: &str, data: &[u8]) -> Result<Document> {
        if filename.is_empty() || filename.contains('/') {
            return Err(Error::InvalidInput(format!("invalid filename: {:?}", filename)));
        }
        if owner.is_empty() || owner.contains('/') {
            return Err(Error::InvalidInput(format!("invalid owner: {:?}", owner)));
        }

        let filetype = detect_filetype(data);
        if filetype == Filetype::Unknown {
            return Err(Error::UnsupportedFiletype(filename.to_string()));
        }

        let document = Document::new(filename, filetype, data.len() as i64, owner);
        let path = document.storage_path();
        self.storage.write(&path, data).await?;
        if let Err(e) = self.documents.save(&document).await {
            if let Err(cleanup) = self.storage.delete(&path).await {
                warn!(document_id = %document.id, error = %cleanup, "Failed to remove orphaned blob");
            }
            return Err(e);
        }

        info!(
            document_id = %document.id,
            owner,
            %filetype,
            filesize = document.filesize,
            "Document uploaded"
        );
        self.messages.publish_upserted(&document).await;
        self.schedule_stages(&document).await?;
        Ok(document)
    }

    async fn schedule_stages(&self, document: &Document) -> Result<()> {
        let payload = DocumentPayload::new(document.id);
        for task_type in DOCUMENT_STAGES {
            self.scheduler
                .schedule_task(task_type, &payload, self.max_attempts)
                .await?;
        }
        Ok(())
    }

    /// Re-enqueue extraction and preview generation for every document of
    /// `owner`. Returns how many documents were rescheduled.
    ///
    /// Both stages are idempotent, so running this repeatedly is safe.
    pub async fn synchronize(&self, owner: &str) -> Result<usize> {
        let documents = self.documents.find_all_by_owner(owner).await?;
        let mut scheduled = 0;
        for document in &documents {
            match self.schedule_stages(document).await {
                Ok(()) => scheduled += 1,
                Err(e) => {
                    warn!(document_id = %document.id, owner, error = %e, "Failed to reschedule document");
                }
            }
        }
        info!(owner, documents = documents.len(), scheduled, "Documents resynchronized");
        Ok(scheduled)
    }

    pub async fn get_document(&self, id: Uuid) -> Result<Document> {
        self.documents
            .find_by_id(id)
            .await?
            .ok_or(Error::DocumentNotFound(id))
    }

    async fn owned_document(&self, id: Uuid, owner: &str) -> Result<Document> {
        let document = self.get_document(id).await?;
        if document.owner != owner {
            return Err(Error::Forbidden(format!("{} does not own document {}", owner, id)));
        }
        Ok(document)
    }

    /// Move a document into the trash. It is purged by `empty_trash` once the
    /// retention period has passed.
    pub async fn trash_document(&self, id: Uuid, owner: &str) -> Result<()> {
        self.owned_document(id, owner).await?;
        self.documents.update_trashed_at(id, Some(Utc::now())).await?;
        info!(document_id = %id, owner, "Document trashed");
        Ok(())
    }

    pub async fn restore_document(&self, id: Uuid, owner: &str) -> Result<()> {
        self.owned_document(id, owner).await?;
        self.documents.update_trashed_at(id, None).await?;
        info!(document_id = %id, owner, "Document restored");
        Ok(())
    }

    /// Delete every document whose retention in the trash has run out.
    /// Returns how many were deleted; failures are logged and skipped.
    pub async fn empty_trash(&self) -> Result<usize> {
        let now = Utc::now();
        let mut purged = 0;
        for document in self.documents.find_all_trashed().await? {
            if !document.trash_expired(now, self.trash_retention) {
                continue;
            }
            match self.delete_document(document.id).await {
                Ok(()) => purged += 1,
                Err(e) => {
                    warn!(document_id = %document.id, error = %e, "Failed to purge trashed document");
                }
            }
        }
        if purged > 0 {
            info!(purged, "Trash emptied");
        }
        Ok(purged)
    }

    /// Remove a document, its original bytes and its previews.
    pub async fn delete_document(&self, id: Uuid) -> Result<()> {
        let document = self.get_document(id).await?;

        self.storage.delete(&document.storage_path()).await?;
        for path in &document.preview_paths {
            self.storage.delete(path).await?;
        }
        self.documents.delete_by_id(id).await?;

        info!(document_id = %id, previews = document.preview_paths.len(), "Document deleted");
        self.messages.publish_deleted(&document).await;
        Ok(())
    }

    /// All tasks, newest first.
    pub async fn list_tasks(&self) -> Result<Vec<Task>> {
        self.scheduler.store()?.find_all().await
    }

    /// Page `page` (from 1) of the task listing, newest first.
    pub async fn tasks_page(&self, page: usize) -> Result<PagedTasks> {
        if page == 0 {
            return Err(Error::InvalidInput("page numbers start at 1".to_string()));
        }
        let size = defaults::TASK_PAGE_SIZE;
        let result = self
            .scheduler
            .store()?
            .find_paginated(size, (page - 1) * size)
            .await?;
        let total_pages = (result.total.max(0) as usize).div_ceil(size);
        debug!(page, total = result.total, total_pages, "Task page loaded");
        Ok(PagedTasks {
            tasks: result.tasks,
            page,
            total: result.total,
            total_pages,
        })
    }

    pub async fn delete_task(&self, id: Uuid) -> Result<()> {
        self.scheduler.store()?.delete_by_id(id).await
    }

    /// Delete every completed task, returning how many were removed.
    pub async fn delete_completed_tasks(&self) -> Result<u64> {
        let deleted = self.scheduler.store()?.delete_completed().await?;
        info!(deleted, "Completed tasks deleted");
        Ok(deleted)
    }
}
