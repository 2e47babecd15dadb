//! Pipeline chaining: downstream stages scheduled when text extraction
//! finishes.
//!
//! The bus is in-process and at-most-once. The durable part is the task the
//! subscriber enqueues; once `schedule_task` returns the downstream stage
//! survives restarts like any other task.

use std::sync::Arc;

use tracing::{debug, info};

use docket_core::{DocumentMessages, DocumentPayload, DocumentTopic, TaskType};

use crate::scheduler::Scheduler;

fn schedule_on_text_extracted(
    messages: &DocumentMessages,
    scheduler: Arc<Scheduler>,
    task_type: TaskType,
    max_attempts: i32,
) {
    messages.subscribe(DocumentTopic::TextExtracted, move |document| {
        let scheduler = scheduler.clone();
        async move {
            let task_id = scheduler
                .schedule_task(task_type, &DocumentPayload::new(document.id), max_attempts)
                .await?;
            debug!(%task_id, %task_type, document_id = %document.id, "Chained downstream task");
            Ok(())
        }
    });
    info!(
        %task_type,
        subscribers = messages.subscriber_count(DocumentTopic::TextExtracted),
        "Downstream stage chained to text extraction"
    );
}

/// Schedule `summarize_document` for every document whose text was extracted.
pub fn subscribe_summarization(
    messages: &DocumentMessages,
    scheduler: Arc<Scheduler>,
    max_attempts: i32,
) {
    schedule_on_text_extracted(messages, scheduler, TaskType::SummarizeDocument, max_attempts);
}

/// Schedule `index_document` for every document whose text was extracted.
pub fn subscribe_indexing(messages: &DocumentMessages, scheduler: Arc<Scheduler>, max_attempts: i32) {
    schedule_on_text_extracted(messages, scheduler, TaskType::IndexDocument, max_attempts);
}
