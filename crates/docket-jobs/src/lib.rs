//! # docket-jobs
//!
//! Durable task pipeline for the docket document archive.
//!
//! This crate provides:
//! - The scheduler and per-processor worker loops with retry and backoff
//! - Document stage processors (text extraction, previews, summary, index)
//! - A bounded pool of native PDF engine instances and the PDF analyzer
//! - Pipeline chaining over the in-process document bus
//! - The archive service used by producers and operators
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use docket_jobs::{Scheduler, Shutdown, WorkerConfig};
//! use docket_db::MemoryTaskRepository;
//!
//! let shutdown = Arc::new(Shutdown::new());
//! let scheduler = Arc::new(Scheduler::new(shutdown.clone(), WorkerConfig::from_env()));
//! scheduler.attach_store(Arc::new(MemoryTaskRepository::new()))?;
//! scheduler.register_worker(processor)?;
//!
//! // Listen for events
//! let mut events = scheduler.events();
//! while let Ok(event) = events.recv().await {
//!     println!("Event: {:?}", event);
//! }
//!
//! // Graceful shutdown
//! shutdown.execute().await;
//! ```

pub mod adapters;
pub mod analyzer;
pub mod archive;
pub mod chaining;
pub mod document_processor;
pub mod downstream;
pub mod handler;
pub mod maintenance;
pub mod pool;
pub mod scheduler;
mod worker;

// Re-export core types
pub use docket_core::*;

pub use adapters::{PdfAnalyzer, PdfEngine, PdfHandle, PdfiumEngine, PreviewConfig};
pub use analyzer::{AnalyzerRegistry, DocumentAnalyzer};
pub use archive::{Archive, PagedTasks};
pub use chaining::{subscribe_indexing, subscribe_summarization};
pub use document_processor::DocumentTaskProcessor;
pub use downstream::{IndexProcessor, SummarizeProcessor};
pub use handler::{TaskProcessor, TaskResult};
pub use maintenance::{spawn_maintenance, spawn_trash_purge};
pub use pool::{EnginePool, EnginePoolConfig, Lease, PoolStats};
pub use scheduler::Scheduler;
pub use worker::{WorkerConfig, WorkerEvent};
