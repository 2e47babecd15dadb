//! Core traits for docket abstractions.
//!
//! These traits define the interfaces that concrete implementations
//! must satisfy, enabling pluggable backends and testability.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::io::AsyncRead;
use uuid::Uuid;

use crate::error::Result;
use crate::models::*;

// =============================================================================
// TASK REPOSITORY
// =============================================================================

/// Durable task store.
///
/// Implementations own all locking and transaction discipline; each call is
/// atomic from the caller's point of view and safe under concurrent callers.
#[async_trait]
pub trait TaskRepository: Send + Sync {
    /// Insert or update a task by id.
    async fn save(&self, task: &Task) -> Result<()>;

    /// Persist a task that was just marked running, but only if the stored
    /// row is still `pending`.
    ///
    /// Returns `false` when another poller claimed the task first.
    async fn claim(&self, task: &Task) -> Result<bool>;

    /// Overwrite an existing task's state. Returns `false`, writing nothing,
    /// when the task was deleted in the meantime.
    async fn update(&self, task: &Task) -> Result<bool>;

    /// Get a task by id.
    async fn find_by_id(&self, id: Uuid) -> Result<Option<Task>>;

    /// Pending tasks of the given types whose `next_run_at` has passed,
    /// oldest first, at most `limit`.
    async fn find_pending_of_types(&self, limit: usize, types: &[TaskType]) -> Result<Vec<Task>>;

    /// All tasks, newest first.
    async fn find_all(&self) -> Result<Vec<Task>>;

    /// One page of tasks, newest first, plus the total count.
    async fn find_paginated(&self, limit: usize, offset: usize) -> Result<TaskPage>;

    /// Delete a single task.
    async fn delete_by_id(&self, id: Uuid) -> Result<()>;

    /// Delete every completed task, returning how many were removed.
    async fn delete_completed(&self) -> Result<u64>;
}

// =============================================================================
// DOCUMENT REPOSITORY
// =============================================================================

/// Persistence for document records.
#[async_trait]
pub trait DocumentRepository: Send + Sync {
    /// Insert or update a document by id.
    async fn save(&self, document: &Document) -> Result<()>;

    /// Get a document by id.
    async fn find_by_id(&self, id: Uuid) -> Result<Option<Document>>;

    /// All documents belonging to `owner`, oldest first.
    async fn find_all_by_owner(&self, owner: &str) -> Result<Vec<Document>>;

    /// Every document currently in the trash, oldest trashing first.
    async fn find_all_trashed(&self) -> Result<Vec<Document>>;

    /// Delete a document record.
    async fn delete_by_id(&self, id: Uuid) -> Result<()>;

    // Stage writes touch only their own column, so stages running in
    // different workers never overwrite each other's output.

    /// Store extracted text.
    async fn update_text(&self, id: Uuid, text: &str) -> Result<()>;

    /// Store preview paths, ordered by page index.
    async fn update_preview_paths(&self, id: Uuid, paths: &[String]) -> Result<()>;

    /// Store the generated summary.
    async fn update_summary(&self, id: Uuid, summary: &DocumentSummary) -> Result<()>;

    /// Move a document into the trash (`Some`) or restore it (`None`).
    async fn update_trashed_at(&self, id: Uuid, trashed_at: Option<DateTime<Utc>>) -> Result<()>;
}

// =============================================================================
// BLOB STORAGE
// =============================================================================

/// Streaming reader over a stored blob.
pub type BlobReader = Box<dyn AsyncRead + Send + Unpin>;

/// Storage backend for original document bytes and rendered previews.
///
/// Paths are relative, `/`-separated keys.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Write data to the specified path, replacing any existing blob.
    async fn write(&self, path: &str, data: &[u8]) -> Result<()>;

    /// Stream data from `reader` into the specified path. Returns bytes written.
    async fn write_stream(
        &self,
        path: &str,
        reader: &mut (dyn AsyncRead + Send + Unpin),
    ) -> Result<u64>;

    /// Read data from the specified path.
    async fn read(&self, path: &str) -> Result<Vec<u8>>;

    /// Open a streaming reader over the specified path.
    async fn open(&self, path: &str) -> Result<BlobReader>;

    /// Delete data at the specified path. Missing paths are not an error.
    async fn delete(&self, path: &str) -> Result<()>;

    /// Check if data exists at the specified path.
    async fn exists(&self, path: &str) -> Result<bool>;
}

// =============================================================================
// DOWNSTREAM COLLABORATORS
// =============================================================================

/// Produces a summary from extracted document text.
#[async_trait]
pub trait DocumentSummarizer: Send + Sync {
    async fn summarize(&self, text: &str) -> Result<DocumentSummary>;
}

/// Summarizer used when no model is configured; returns an empty summary.
pub struct NoOpSummarizer;

#[async_trait]
impl DocumentSummarizer for NoOpSummarizer {
    async fn summarize(&self, _text: &str) -> Result<DocumentSummary> {
        Ok(DocumentSummary::default())
    }
}

/// Full-text search index fed by the pipeline.
#[async_trait]
pub trait SearchIndex: Send + Sync {
    async fn index_document(&self, document: &Document) -> Result<()>;
}
