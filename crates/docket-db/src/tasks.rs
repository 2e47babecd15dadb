//! Task repository implementation.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::{Pool, Postgres, Row};
use tracing::debug;
use uuid::Uuid;

use docket_core::{Error, Result, Task, TaskPage, TaskRepository, TaskStatus, TaskType};

const TASK_COLUMNS: &str = "id, task_type, status, payload, error, attempts, max_attempts, \
                            next_run_at, created_at, updated_at";

/// PostgreSQL implementation of TaskRepository.
pub struct PgTaskRepository {
    pool: Pool<Postgres>,
}

impl PgTaskRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    /// Parse a task row into a Task struct.
    fn parse_task_row(row: sqlx::postgres::PgRow) -> Result<Task> {
        let task_type: String = row.try_get("task_type")?;
        let status: String = row.try_get("status")?;
        Ok(Task {
            id: row.try_get("id")?,
            task_type: task_type.parse::<TaskType>()?,
            status: status.parse::<TaskStatus>()?,
            payload: row.try_get("payload")?,
            error: row.try_get("error")?,
            attempts: row.try_get("attempts")?,
            max_attempts: row.try_get("max_attempts")?,
            next_run_at: row.try_get("next_run_at")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

#[async_trait]
impl TaskRepository for PgTaskRepository {
    async fn save(&self, task: &Task) -> Result<()> {
        sqlx::query(
            "INSERT INTO task (id, task_type, status, payload, error, attempts, max_attempts,
                               next_run_at, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
             ON CONFLICT (id) DO UPDATE SET
                 status = EXCLUDED.status,
                 payload = EXCLUDED.payload,
                 error = EXCLUDED.error,
                 attempts = EXCLUDED.attempts,
                 max_attempts = EXCLUDED.max_attempts,
                 next_run_at = EXCLUDED.next_run_at,
                 updated_at = EXCLUDED.updated_at",
        )
        .bind(task.id)
        .bind(task.task_type.as_str())
        .bind(task.status.as_str())
        .bind(&task.payload)
        .bind(&task.error)
        .bind(task.attempts)
        .bind(task.max_attempts)
        .bind(task.next_run_at)
        .bind(task.created_at)
        .bind(task.updated_at)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(())
    }

    async fn claim(&self, task: &Task) -> Result<bool> {
        // The attempt count guards against a stale read of a task that was
        // claimed, failed and rescheduled since it was fetched.
        let result = sqlx::query(
            "UPDATE task
             SET status = $2, attempts = $3, updated_at = $4
             WHERE id = $1 AND status = 'pending' AND attempts = $3 - 1",
        )
        .bind(task.id)
        .bind(task.status.as_str())
        .bind(task.attempts)
        .bind(task.updated_at)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        let claimed = result.rows_affected() == 1;
        if !claimed {
            debug!(task_id = %task.id, "Task already claimed by another poller");
        }
        Ok(claimed)
    }

    async fn update(&self, task: &Task) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE task
             SET status = $2, error = $3, attempts = $4, next_run_at = $5, updated_at = $6
             WHERE id = $1",
        )
        .bind(task.id)
        .bind(task.status.as_str())
        .bind(&task.error)
        .bind(task.attempts)
        .bind(task.next_run_at)
        .bind(task.updated_at)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(result.rows_affected() == 1)
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Task>> {
        let row = sqlx::query(&format!("SELECT {} FROM task WHERE id = $1", TASK_COLUMNS))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(Error::Database)?;
        row.map(Self::parse_task_row).transpose()
    }

    async fn find_pending_of_types(&self, limit: usize, types: &[TaskType]) -> Result<Vec<Task>> {
        let type_strings: Vec<String> = types.iter().map(|t| t.as_str().to_string()).collect();

        // Empty array = any type.
        let rows = sqlx::query(&format!(
            "SELECT {} FROM task
             WHERE status = 'pending'
               AND next_run_at <= $1
               AND (cardinality($2::text[]) = 0 OR task_type = ANY($2))
             ORDER BY created_at ASC, id ASC
             LIMIT $3",
            TASK_COLUMNS
        ))
        .bind(Utc::now())
        .bind(&type_strings)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        rows.into_iter().map(Self::parse_task_row).collect()
    }

    async fn find_all(&self) -> Result<Vec<Task>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM task ORDER BY created_at DESC, id DESC",
            TASK_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        rows.into_iter().map(Self::parse_task_row).collect()
    }

    async fn find_paginated(&self, limit: usize, offset: usize) -> Result<TaskPage> {
        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM task")
            .fetch_one(&self.pool)
            .await
            .map_err(Error::Database)?;

        let rows = sqlx::query(&format!(
            "SELECT {} FROM task ORDER BY created_at DESC, id DESC LIMIT $1 OFFSET $2",
            TASK_COLUMNS
        ))
        .bind(limit as i64)
        .bind(offset as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        let tasks = rows
            .into_iter()
            .map(Self::parse_task_row)
            .collect::<Result<Vec<_>>>()?;
        Ok(TaskPage { tasks, total })
    }

    async fn delete_by_id(&self, id: Uuid) -> Result<()> {
        let result = sqlx::query("DELETE FROM task WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(Error::Database)?;
        if result.rows_affected() == 0 {
            return Err(Error::TaskNotFound(id));
        }
        Ok(())
    }

    async fn delete_completed(&self) -> Result<u64> {
        let result = sqlx::query("DELETE FROM task WHERE status = 'completed'")
            .execute(&self.pool)
            .await
            .map_err(Error::Database)?;
        Ok(result.rows_affected())
    }
}
