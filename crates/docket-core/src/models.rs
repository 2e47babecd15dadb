//! Data models for docket.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::defaults;
use crate::error::{Error, Result};
use crate::uuid_utils::new_v7;

// =============================================================================
// TASK TYPES
// =============================================================================

/// Status of a task in the queue.
///
/// Exactly one status holds at a time. `Completed` is never left again;
/// `Failed` is terminal once the attempt budget is spent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Running => "running",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(TaskStatus::Pending),
            "running" => Ok(TaskStatus::Running),
            "completed" => Ok(TaskStatus::Completed),
            "failed" => Ok(TaskStatus::Failed),
            other => Err(Error::InvalidInput(format!("unknown task status: {}", other))),
        }
    }
}

/// Type of task; selects the processor that handles it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    /// Extract the full text of a document
    ExtractText,
    /// Render one preview image per page
    GeneratePreviews,
    /// Summarize extracted text
    SummarizeDocument,
    /// Add a document to the search index
    IndexDocument,
}

impl TaskType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskType::ExtractText => "extract_text",
            TaskType::GeneratePreviews => "generate_previews",
            TaskType::SummarizeDocument => "summarize_document",
            TaskType::IndexDocument => "index_document",
        }
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "extract_text" => Ok(TaskType::ExtractText),
            "generate_previews" => Ok(TaskType::GeneratePreviews),
            "summarize_document" => Ok(TaskType::SummarizeDocument),
            "index_document" => Ok(TaskType::IndexDocument),
            other => Err(Error::InvalidInput(format!("unknown task type: {}", other))),
        }
    }
}

/// Retry delay policy: `min(attempts² × base, cap)`, deterministic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    pub base: Duration,
    pub cap: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(defaults::TASK_BACKOFF_BASE_MS),
            cap: Duration::from_secs(defaults::TASK_BACKOFF_CAP_SECS),
        }
    }
}

impl Backoff {
    /// Delay before the next attempt after `attempts` executions.
    pub fn delay(&self, attempts: i32) -> Duration {
        let n = attempts.max(0) as u32;
        self.base.saturating_mul(n.saturating_mul(n)).min(self.cap)
    }
}

/// A durable unit of asynchronous work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: Uuid,
    pub task_type: TaskType,
    pub status: TaskStatus,
    pub payload: JsonValue,
    pub error: Option<String>,
    pub attempts: i32,
    pub max_attempts: i32,
    pub next_run_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    /// Create a pending task, eligible immediately.
    pub fn new<P: Serialize + ?Sized>(
        task_type: TaskType,
        payload: &P,
        max_attempts: i32,
    ) -> Result<Self> {
        if max_attempts < 1 {
            return Err(Error::InvalidInput(format!(
                "max_attempts must be at least 1, got {}",
                max_attempts
            )));
        }
        let payload = serde_json::to_value(payload)?;
        let now = Utc::now();
        Ok(Self {
            id: new_v7(),
            task_type,
            status: TaskStatus::Pending,
            payload,
            error: None,
            attempts: 0,
            max_attempts,
            next_run_at: now,
            created_at: now,
            updated_at: now,
        })
    }

    /// Claimable: pending and due at `now`.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.status == TaskStatus::Pending && now >= self.next_run_at
    }

    pub fn should_run(&self) -> bool {
        self.is_due(Utc::now())
    }

    /// Completed, or failed with no retry left.
    pub fn is_terminal(&self) -> bool {
        matches!(self.status, TaskStatus::Completed | TaskStatus::Failed)
    }

    pub fn mark_running(&mut self) {
        self.status = TaskStatus::Running;
        self.attempts += 1;
        self.updated_at = Utc::now();
    }

    pub fn mark_completed(&mut self) {
        self.status = TaskStatus::Completed;
        self.error = None;
        self.updated_at = Utc::now();
    }

    /// Record a failed attempt.
    ///
    /// A retriable failure with attempts left returns the task to `Pending`
    /// with `next_run_at` pushed out by `backoff`; anything else stays
    /// `Failed`.
    pub fn mark_failed(&mut self, error: impl Into<String>, retriable: bool, backoff: &Backoff) {
        let now = Utc::now();
        self.status = TaskStatus::Failed;
        self.error = Some(error.into());
        self.updated_at = now;

        if retriable && self.attempts < self.max_attempts {
            let delay = backoff.delay(self.attempts);
            let delay = chrono::Duration::from_std(delay)
                .unwrap_or_else(|_| chrono::Duration::seconds(defaults::TASK_BACKOFF_CAP_SECS as i64));
            self.status = TaskStatus::Pending;
            self.next_run_at = now + delay;
        }
    }

    /// Decode the payload into the processor's envelope type.
    ///
    /// Unknown fields are ignored.
    pub fn payload_as<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_value(self.payload.clone())?)
    }
}

/// One page of tasks plus the total count across all pages.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskPage {
    pub tasks: Vec<Task>,
    pub total: i64,
}

// =============================================================================
// DOCUMENT TYPES
// =============================================================================

/// Detected filetype of an uploaded document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Filetype {
    Pdf,
    Unknown,
}

impl Filetype {
    pub fn as_str(&self) -> &'static str {
        match self {
            Filetype::Pdf => "pdf",
            Filetype::Unknown => "unknown",
        }
    }
}

impl fmt::Display for Filetype {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Filetype {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pdf" => Ok(Filetype::Pdf),
            "unknown" => Ok(Filetype::Unknown),
            other => Err(Error::UnsupportedFiletype(other.to_string())),
        }
    }
}

/// Generated summary of a document's text.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentSummary {
    pub overview: String,
    pub key_points: Vec<String>,
}

/// An archived document and the output of its processing stages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: Uuid,
    pub title: String,
    pub filename: String,
    pub filetype: Filetype,
    pub filesize: i64,
    /// Extracted text; empty until extraction ran.
    pub text: String,
    pub summary: Option<DocumentSummary>,
    /// Storage paths of rendered pages, ordered by page index.
    pub preview_paths: Vec<String>,
    pub owner: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Set while the document sits in the trash.
    pub trashed_at: Option<DateTime<Utc>>,
}

impl Document {
    pub fn new(filename: &str, filetype: Filetype, filesize: i64, owner: &str) -> Self {
        let title = match filename.rsplit_once('.') {
            Some((stem, _)) if !stem.is_empty() => stem.to_string(),
            _ => filename.to_string(),
        };
        let now = Utc::now();
        Self {
            id: new_v7(),
            title,
            filename: filename.to_string(),
            filetype,
            filesize,
            text: String::new(),
            summary: None,
            preview_paths: Vec::new(),
            owner: owner.to_string(),
            created_at: now,
            updated_at: now,
            trashed_at: None,
        }
    }

    pub fn is_trashed(&self) -> bool {
        self.trashed_at.is_some()
    }

    /// Whether the document has been in the trash for at least `retention`.
    pub fn trash_expired(&self, now: DateTime<Utc>, retention: chrono::Duration) -> bool {
        self.trashed_at
            .is_some_and(|trashed_at| now - trashed_at >= retention)
    }

    /// Blob storage path of the original bytes: `{owner}/{id}/{filename}`.
    pub fn storage_path(&self) -> String {
        format!("{}/{}/{}", self.owner, self.id, self.filename)
    }

    /// Prefix under which page previews are stored.
    pub fn preview_prefix(&self) -> String {
        format!("{}/{}/{}", self.owner, self.id, defaults::PREVIEW_DIR)
    }

    /// Storage path of the preview for zero-based page `index`.
    pub fn preview_path(&self, index: usize) -> String {
        format!("{}/page{}.jpeg", self.preview_prefix(), index)
    }
}

/// Payload envelope shared by all document stage tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentPayload {
    pub document_id: Uuid,
}

impl DocumentPayload {
    pub fn new(document_id: Uuid) -> Self {
        Self { document_id }
    }
}
