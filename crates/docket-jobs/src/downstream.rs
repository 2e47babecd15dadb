//! Summarization and search indexing stages, fed by pipeline chaining.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};

use docket_core::{DocumentRepository, DocumentSummarizer, Result, SearchIndex, Task, TaskType};

use crate::document_processor::load_document;
use crate::handler::{TaskProcessor, TaskResult};

/// Handles `summarize_document`: summarizes the extracted text and stores it
/// on the document.
pub struct SummarizeProcessor {
    documents: Arc<dyn DocumentRepository>,
    summarizer: Arc<dyn DocumentSummarizer>,
}

impl SummarizeProcessor {
    pub fn new(
        documents: Arc<dyn DocumentRepository>,
        summarizer: Arc<dyn DocumentSummarizer>,
    ) -> Self {
        Self {
            documents,
            summarizer,
        }
    }

    async fn summarize(&self, task: &Task) -> Result<()> {
        let document = load_document(self.documents.as_ref(), task).await?;
        if document.text.is_empty() {
            debug!(document_id = %document.id, "No text to summarize");
        }
        let summary = self.summarizer.summarize(&document.text).await?;
        info!(
            task_id = %task.id,
            document_id = %document.id,
            key_points = summary.key_points.len(),
            "Document summarized"
        );
        self.documents.update_summary(document.id, &summary).await
    }
}

#[async_trait]
impl TaskProcessor for SummarizeProcessor {
    fn name(&self) -> &'static str {
        "SummarizeProcessor"
    }

    fn responsible_for(&self) -> Vec<TaskType> {
        vec![TaskType::SummarizeDocument]
    }

    async fn process(&self, task: &Task) -> TaskResult {
        self.summarize(task).await.into()
    }
}

/// Handles `index_document` by handing the document to the search index.
pub struct IndexProcessor {
    documents: Arc<dyn DocumentRepository>,
    index: Arc<dyn SearchIndex>,
}

impl IndexProcessor {
    pub fn new(documents: Arc<dyn DocumentRepository>, index: Arc<dyn SearchIndex>) -> Self {
        Self { documents, index }
    }

    async fn index(&self, task: &Task) -> Result<()> {
        let document = load_document(self.documents.as_ref(), task).await?;
        self.index.index_document(&document).await?;
        info!(task_id = %task.id, document_id = %document.id, "Document indexed");
        Ok(())
    }
}

#[async_trait]
impl TaskProcessor for IndexProcessor {
    fn name(&self) -> &'static str {
        "IndexProcessor"
    }

    fn responsible_for(&self) -> Vec<TaskType> {
        vec![TaskType::IndexDocument]
    }

    async fn process(&self, task: &Task) -> TaskResult {
        self.index(task).await.into()
    }
}
