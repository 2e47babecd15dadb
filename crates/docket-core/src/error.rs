//! Error types for docket.

use std::time::Duration;

use thiserror::Error;
use uuid::Uuid;

/// Result type alias using docket's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for docket operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Database operation failed (wraps sqlx::Error)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Task not found
    #[error("Task not found: {0}")]
    TaskNotFound(Uuid),

    /// Document not found
    #[error("Document not found: {0}")]
    DocumentNotFound(Uuid),

    /// No analyzer exists for the document's filetype
    #[error("Unsupported filetype: {0}")]
    UnsupportedFiletype(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Blob storage operation failed
    #[error("Storage error: {0}")]
    Storage(String),

    /// No engine instance became available in time
    #[error("Timed out after {0:?} waiting for an engine instance")]
    PoolTimeout(Duration),

    /// The engine pool has been closed
    #[error("Engine pool is closed")]
    PoolClosed,

    /// Native rendering engine failed
    #[error("Render error: {0}")]
    Render(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Caller does not own the resource
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),

    /// File I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether retrying the operation could succeed.
    ///
    /// Bad input (unknown filetype, undecodable payload, invalid arguments,
    /// misconfiguration) fails the same way on every attempt, and so does a
    /// task whose document has been deleted.
    pub fn is_retriable(&self) -> bool {
        !matches!(
            self,
            Error::DocumentNotFound(_)
                | Error::UnsupportedFiletype(_)
                | Error::Serialization(_)
                | Error::InvalidInput(_)
                | Error::Forbidden(_)
                | Error::Config(_)
        )
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}
