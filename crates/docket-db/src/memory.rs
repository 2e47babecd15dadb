//! In-memory repositories.
//!
//! Used when no `DATABASE_URL` is configured and throughout the test suites.
//! State lives for the process lifetime only; the locking discipline matches
//! the PostgreSQL implementations so callers see the same atomicity.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use docket_core::{
    Document, DocumentRepository, DocumentSummary, Error, Result, Task, TaskPage, TaskRepository,
    TaskStatus, TaskType,
};

/// In-memory implementation of TaskRepository.
#[derive(Default)]
pub struct MemoryTaskRepository {
    tasks: RwLock<HashMap<Uuid, Task>>,
}

impl MemoryTaskRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.tasks.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.tasks.read().await.is_empty()
    }
}

fn oldest_first(tasks: &mut [Task]) {
    tasks.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
}

#[async_trait]
impl TaskRepository for MemoryTaskRepository {
    async fn save(&self, task: &Task) -> Result<()> {
        self.tasks.write().await.insert(task.id, task.clone());
        Ok(())
    }

    async fn claim(&self, task: &Task) -> Result<bool> {
        let mut tasks = self.tasks.write().await;
        match tasks.get_mut(&task.id) {
            Some(stored)
                if stored.status == TaskStatus::Pending
                    && stored.attempts == task.attempts - 1 =>
            {
                stored.status = task.status;
                stored.attempts = task.attempts;
                stored.updated_at = task.updated_at;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn update(&self, task: &Task) -> Result<bool> {
        match self.tasks.write().await.get_mut(&task.id) {
            Some(stored) => {
                *stored = task.clone();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Task>> {
        Ok(self.tasks.read().await.get(&id).cloned())
    }

    async fn find_pending_of_types(&self, limit: usize, types: &[TaskType]) -> Result<Vec<Task>> {
        let now = Utc::now();
        let mut due: Vec<Task> = self
            .tasks
            .read()
            .await
            .values()
            .filter(|t| t.is_due(now) && (types.is_empty() || types.contains(&t.task_type)))
            .cloned()
            .collect();
        oldest_first(&mut due);
        due.truncate(limit);
        Ok(due)
    }

    async fn find_all(&self) -> Result<Vec<Task>> {
        let mut all: Vec<Task> = self.tasks.read().await.values().cloned().collect();
        oldest_first(&mut all);
        all.reverse();
        Ok(all)
    }

    async fn find_paginated(&self, limit: usize, offset: usize) -> Result<TaskPage> {
        let all = self.find_all().await?;
        let total = all.len() as i64;
        let tasks = all.into_iter().skip(offset).take(limit).collect();
        Ok(TaskPage { tasks, total })
    }

    async fn delete_by_id(&self, id: Uuid) -> Result<()> {
        match self.tasks.write().await.remove(&id) {
            Some(_) => Ok(()),
            None => Err(Error::TaskNotFound(id)),
        }
    }

    async fn delete_completed(&self) -> Result<u64> {
        let mut tasks = self.tasks.write().await;
        let before = tasks.len();
        tasks.retain(|_, t| t.status != TaskStatus::Completed);
        Ok((before - tasks.len()) as u64)
    }
}

/// In-memory implementation of DocumentRepository.
#[derive(Default)]
pub struct MemoryDocumentRepository {
    documents: RwLock<HashMap<Uuid, Document>>,
}

impl MemoryDocumentRepository {
    pub fn new() -> Self {
        Self::default()
    }

    async fn update(&self, id: Uuid, apply: impl FnOnce(&mut Document)) -> Result<()> {
        let mut documents = self.documents.write().await;
        let document = documents.get_mut(&id).ok_or(Error::DocumentNotFound(id))?;
        apply(document);
        document.updated_at = Utc::now();
        Ok(())
    }
}

#[async_trait]
impl DocumentRepository for MemoryDocumentRepository {
    async fn save(&self, document: &Document) -> Result<()> {
        self.documents
            .write()
            .await
            .insert(document.id, document.clone());
        Ok(())
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Document>> {
        Ok(self.documents.read().await.get(&id).cloned())
    }

    async fn find_all_by_owner(&self, owner: &str) -> Result<Vec<Document>> {
        let mut docs: Vec<Document> = self
            .documents
            .read()
            .await
            .values()
            .filter(|d| d.owner == owner)
            .cloned()
            .collect();
        docs.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(docs)
    }

    async fn find_all_trashed(&self) -> Result<Vec<Document>> {
        let mut docs: Vec<Document> = self
            .documents
            .read()
            .await
            .values()
            .filter(|d| d.is_trashed())
            .cloned()
            .collect();
        docs.sort_by(|a, b| a.trashed_at.cmp(&b.trashed_at).then(a.id.cmp(&b.id)));
        Ok(docs)
    }

    async fn delete_by_id(&self, id: Uuid) -> Result<()> {
        match self.documents.write().await.remove(&id) {
            Some(_) => Ok(()),
            None => Err(Error::DocumentNotFound(id)),
        }
    }

    async fn update_text(&self, id: Uuid, text: &str) -> Result<()> {
        self.update(id, |d| d.text = text.to_string()).await
    }

    async fn update_preview_paths(&self, id: Uuid, paths: &[String]) -> Result<()> {
        self.update(id, |d| d.preview_paths = paths.to_vec()).await
    }

    async fn update_summary(&self, id: Uuid, summary: &DocumentSummary) -> Result<()> {
        self.update(id, |d| d.summary = Some(summary.clone())).await
    }

    async fn update_trashed_at(&self, id: Uuid, trashed_at: Option<DateTime<Utc>>) -> Result<()> {
        self.update(id, |d| d.trashed_at = trashed_at).await
    }
}
