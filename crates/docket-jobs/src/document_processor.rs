//! DocumentTaskProcessor: the text extraction and preview generation stages.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use tracing::{info, warn};

use docket_core::{
    Document, DocumentMessages, DocumentPayload, DocumentRepository, Error, Result, Task, TaskType,
};

use crate::analyzer::AnalyzerRegistry;
use crate::handler::{TaskProcessor, TaskResult};

/// Resolve the document a stage task refers to.
pub(crate) async fn load_document(
    documents: &dyn DocumentRepository,
    task: &Task,
) -> Result<Document> {
    let payload: DocumentPayload = task.payload_as()?;
    documents
        .find_by_id(payload.document_id)
        .await?
        .ok_or(Error::DocumentNotFound(payload.document_id))
}

pub struct DocumentTaskProcessor {
    documents: Arc<dyn DocumentRepository>,
    analyzers: Arc<AnalyzerRegistry>,
    messages: Arc<DocumentMessages>,
}

impl DocumentTaskProcessor {
    pub fn new(
        documents: Arc<dyn DocumentRepository>,
        analyzers: Arc<AnalyzerRegistry>,
        messages: Arc<DocumentMessages>,
    ) -> Self {
        Self {
            documents,
            analyzers,
            messages,
        }
    }

    async fn extract_text(&self, task: &Task) -> Result<()> {
        let mut document = load_document(self.documents.as_ref(), task).await?;
        let analyzer = self.analyzers.get(document.filetype)?;

        let start = Instant::now();
        document.text = analyzer.extract_text(&document).await?;
        self.documents.update_text(document.id, &document.text).await?;

        info!(
            task_id = %task.id,
            document_id = %document.id,
            text_len = document.text.len(),
            duration_ms = start.elapsed().as_millis() as u64,
            "Text extracted"
        );

        // The extraction is persisted; subscribers cannot fail the task.
        self.messages.publish_text_extracted(&document).await;
        Ok(())
    }

    async fn generate_previews(&self, task: &Task) -> Result<()> {
        let mut document = load_document(self.documents.as_ref(), task).await?;
        let analyzer = self.analyzers.get(document.filetype)?;

        let start = Instant::now();
        document.preview_paths = analyzer.generate_previews(&document).await?;
        self.documents
            .update_preview_paths(document.id, &document.preview_paths)
            .await?;

        info!(
            task_id = %task.id,
            document_id = %document.id,
            previews = document.preview_paths.len(),
            duration_ms = start.elapsed().as_millis() as u64,
            "Previews generated"
        );
        Ok(())
    }
}

#[async_trait]
impl TaskProcessor for DocumentTaskProcessor {
    fn name(&self) -> &'static str {
        "DocumentTaskProcessor"
    }

    fn responsible_for(&self) -> Vec<TaskType> {
        vec![TaskType::ExtractText, TaskType::GeneratePreviews]
    }

    async fn process(&self, task: &Task) -> TaskResult {
        let result = match task.task_type {
            TaskType::ExtractText => self.extract_text(task).await,
            TaskType::GeneratePreviews => self.generate_previews(task).await,
            other => {
                return TaskResult::Failed(format!("{} cannot process {} tasks", self.name(), other))
            }
        };
        if let Err(e) = &result {
            warn!(task_id = %task.id, task_type = %task.task_type, error = %e, "Document stage failed");
        }
        TaskResult::from(result)
    }
}
