//! # docket-core
//!
//! Core types, traits, and abstractions for the docket document archive.
//!
//! This crate provides the task and document models, the storage traits
//! implemented by `docket-db`, the document event bus, and the shutdown
//! coordinator shared by every background loop.

pub mod defaults;
pub mod error;
pub mod events;
pub mod filetype;
pub mod models;
pub mod shutdown;
pub mod traits;
pub mod uuid_utils;

// Re-export commonly used types at crate root
pub use error::{Error, Result};
pub use events::{DocumentMessages, DocumentTopic};
pub use filetype::detect_filetype;
pub use models::*;
pub use shutdown::{Shutdown, ShutdownSignal};
pub use traits::*;
pub use uuid_utils::{is_v7, new_v7};
