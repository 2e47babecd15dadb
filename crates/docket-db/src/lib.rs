//! # docket-db
//!
//! Storage layer for docket.
//!
//! This crate provides:
//! - PostgreSQL task and document repositories
//! - In-memory repositories for database-less runs and tests
//! - Filesystem and in-memory blob storage backends
//! - Connection pool management and schema migrations
//!
//! ## Example
//!
//! ```rust,ignore
//! use docket_db::Database;
//!
//! let db = Database::connect("postgres://localhost/docket").await?;
//! db.migrate().await?;
//! let pending = db.tasks.find_pending_of_types(10, &[TaskType::ExtractText]).await?;
//! ```

pub mod documents;
pub mod file_storage;
pub mod memory;
pub mod pool;
pub mod tasks;

// Re-export core types
pub use docket_core::*;

pub use documents::PgDocumentRepository;
pub use file_storage::{FilesystemBackend, MemoryBackend};
pub use memory::{MemoryDocumentRepository, MemoryTaskRepository};
pub use pool::{log_pool_metrics, PoolConfig};
pub use tasks::PgTaskRepository;

use std::sync::Arc;
use std::time::Instant;

use tracing::info;

/// Combined PostgreSQL context with all repositories.
pub struct Database {
    /// The underlying connection pool.
    pub pool: sqlx::Pool<sqlx::Postgres>,
    pub tasks: Arc<PgTaskRepository>,
    pub documents: Arc<PgDocumentRepository>,
}

impl Database {
    /// Create a new Database instance from a connection pool.
    pub fn new(pool: sqlx::Pool<sqlx::Postgres>) -> Self {
        Self {
            tasks: Arc::new(PgTaskRepository::new(pool.clone())),
            documents: Arc::new(PgDocumentRepository::new(pool.clone())),
            pool,
        }
    }

    /// Connect with pool settings taken from the environment.
    pub async fn connect(url: &str) -> Result<Self> {
        let config = PoolConfig::from_env();
        let start = Instant::now();
        let pool = config.options().connect(url).await.map_err(Error::Database)?;
        info!(
            max_connections = config.max_connections,
            pool_size = pool.size(),
            pool_idle = pool.num_idle(),
            duration_ms = start.elapsed().as_millis() as u64,
            "Database connection pool established"
        );
        Ok(Self::new(pool))
    }

    /// Run pending migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("../../migrations")
            .run(&self.pool)
            .await
            .map_err(|e| Error::Database(sqlx::Error::Migrate(Box::new(e))))?;
        Ok(())
    }

    /// Close every pooled connection. Waits for checked-out connections.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}
