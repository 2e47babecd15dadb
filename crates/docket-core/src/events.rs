//! In-process document event bus.
//!
//! Connects stage completions to whoever wants to react to them (next-stage
//! scheduling, search indexing, RAG node generation). Delivery is
//! synchronous fan-out: `publish` awaits every subscriber of the topic in
//! subscription order and returns once all have run. Nothing is persisted
//! or retried; an event is delivered at most once per process lifetime.
//! Anything that must survive a restart belongs on the task queue instead.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, RwLock};

use futures::future::BoxFuture;
use tracing::{debug, warn};

use crate::error::Result;
use crate::models::Document;

/// Document lifecycle topics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DocumentTopic {
    /// A document was created or its metadata changed.
    Upserted,
    /// Text extraction finished and the text is persisted.
    TextExtracted,
    /// A document and its blobs were removed.
    Deleted,
}

impl DocumentTopic {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentTopic::Upserted => "document.upserted",
            DocumentTopic::TextExtracted => "document.text_extracted",
            DocumentTopic::Deleted => "document.deleted",
        }
    }
}

type Subscriber = Arc<dyn Fn(Document) -> BoxFuture<'static, Result<()>> + Send + Sync>;

/// Synchronous publish/subscribe bus for document events.
#[derive(Default)]
pub struct DocumentMessages {
    subscribers: RwLock<HashMap<DocumentTopic, Vec<Subscriber>>>,
}

impl DocumentMessages {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a subscriber for `topic`. Subscribers run in registration order.
    pub fn subscribe<F, Fut>(&self, topic: DocumentTopic, subscriber: F)
    where
        F: Fn(Document) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let subscriber: Subscriber =
            Arc::new(move |document| -> BoxFuture<'static, Result<()>> {
                Box::pin(subscriber(document))
            });
        let mut subscribers = match self.subscribers.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        subscribers.entry(topic).or_default().push(subscriber);
        debug!(topic = topic.as_str(), "Registered document subscriber");
    }

    /// Deliver `document` to every subscriber of `topic`.
    ///
    /// A failing subscriber is logged and does not stop delivery to the
    /// ones after it.
    pub async fn publish(&self, topic: DocumentTopic, document: &Document) {
        let subscribers: Vec<Subscriber> = {
            let guard = match self.subscribers.read() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            guard.get(&topic).cloned().unwrap_or_default()
        };

        for (index, subscriber) in subscribers.iter().enumerate() {
            if let Err(e) = subscriber(document.clone()).await {
                warn!(
                    topic = topic.as_str(),
                    document_id = %document.id,
                    subscriber = index,
                    error = %e,
                    "Document subscriber failed"
                );
            }
        }
    }

    /// Number of subscribers registered for `topic`.
    pub fn subscriber_count(&self, topic: DocumentTopic) -> usize {
        let guard = match self.subscribers.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        guard.get(&topic).map(Vec::len).unwrap_or(0)
    }

    pub async fn publish_upserted(&self, document: &Document) {
        self.publish(DocumentTopic::Upserted, document).await
    }

    pub async fn publish_text_extracted(&self, document: &Document) {
        self.publish(DocumentTopic::TextExtracted, document).await
    }

    pub async fn publish_deleted(&self, document: &Document) {
        self.publish(DocumentTopic::Deleted, document).await
    }
}
