//! Centralized default constants for docket.
//!
//! All crates reference these constants instead of defining their own magic
//! numbers. Organized by domain area.

// =============================================================================
// TASK PROCESSING
// =============================================================================

/// Default ceiling on execution attempts for scheduled tasks.
pub const TASK_MAX_ATTEMPTS: i32 = 3;

/// Default worker poll interval in milliseconds.
pub const TASK_POLL_INTERVAL_MS: u64 = 500;

/// Default number of tasks fetched per poll.
pub const TASK_BATCH_SIZE: usize = 10;

/// Base unit of the retry backoff (`attempts² × base`).
pub const TASK_BACKOFF_BASE_MS: u64 = 1_000;

/// Upper bound on a single retry delay (5 minutes).
pub const TASK_BACKOFF_CAP_SECS: u64 = 300;

/// Page size for the task administration listing.
pub const TASK_PAGE_SIZE: usize = 10;

/// Interval between store maintenance runs (daily).
pub const STORE_MAINTENANCE_INTERVAL_SECS: u64 = 24 * 60 * 60;

/// How long a trashed document is kept before it is purged.
pub const TRASH_RETENTION_DAYS: i64 = 30;

/// Interval between trash purges (hourly).
pub const TRASH_PURGE_INTERVAL_SECS: u64 = 60 * 60;

/// Worker event broadcast channel capacity.
pub const WORKER_EVENT_CAPACITY: usize = 256;

// =============================================================================
// DATABASE
// =============================================================================

/// Connections the PostgreSQL pool may open.
pub const DATABASE_MAX_CONNECTIONS: u32 = 10;

/// Connections the PostgreSQL pool keeps open.
pub const DATABASE_MIN_CONNECTIONS: u32 = 1;

/// How long a query waits for a pooled connection.
pub const DATABASE_ACQUIRE_TIMEOUT_SECS: u64 = 30;

/// Idle time after which a pooled connection is closed.
pub const DATABASE_IDLE_TIMEOUT_SECS: u64 = 600;

// =============================================================================
// PDF ENGINE POOL
// =============================================================================

/// Engine instances kept warm at all times.
pub const PDF_POOL_MIN_IDLE: usize = 1;

/// Idle engine instances kept alive after release.
pub const PDF_POOL_MAX_IDLE: usize = 1;

/// Hard ceiling on concurrently existing engine instances.
pub const PDF_POOL_MAX_TOTAL: usize = 4;

/// How long an acquire waits for capacity before failing.
pub const PDF_POOL_ACQUIRE_TIMEOUT_SECS: u64 = 30;

// =============================================================================
// PREVIEWS
// =============================================================================

/// Render resolution for page previews.
pub const PREVIEW_DPI: u16 = 80;

/// JPEG quality for page previews.
pub const PREVIEW_JPEG_QUALITY: u8 = 90;

/// Directory name holding previews below a document's storage prefix.
pub const PREVIEW_DIR: &str = "previews";

// =============================================================================
// FILETYPE DETECTION
// =============================================================================

/// Number of leading bytes inspected when detecting a filetype.
pub const FILETYPE_HEADER_LEN: usize = 261;
