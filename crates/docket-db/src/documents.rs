//! Document repository implementation.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::{Pool, Postgres, Row};
use uuid::Uuid;

use docket_core::{Document, DocumentRepository, DocumentSummary, Error, Filetype, Result};

const DOCUMENT_COLUMNS: &str = "id, title, filename, filetype, filesize, text, summary, \
                                preview_paths, owner, created_at, updated_at, trashed_at";

/// PostgreSQL implementation of DocumentRepository.
pub struct PgDocumentRepository {
    pool: Pool<Postgres>,
}

impl PgDocumentRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    fn expect_one(id: Uuid, rows_affected: u64) -> Result<()> {
        if rows_affected == 0 {
            return Err(Error::DocumentNotFound(id));
        }
        Ok(())
    }

    fn parse_document_row(row: sqlx::postgres::PgRow) -> Result<Document> {
        let filetype: String = row.try_get("filetype")?;
        let summary: Option<Json<DocumentSummary>> = row.try_get("summary")?;
        Ok(Document {
            id: row.try_get("id")?,
            title: row.try_get("title")?,
            filename: row.try_get("filename")?,
            // Rows written by a newer release may carry types we cannot analyze.
            filetype: filetype.parse::<Filetype>().unwrap_or(Filetype::Unknown),
            filesize: row.try_get("filesize")?,
            text: row.try_get("text")?,
            summary: summary.map(|Json(s)| s),
            preview_paths: row.try_get("preview_paths")?,
            owner: row.try_get("owner")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
            trashed_at: row.try_get("trashed_at")?,
        })
    }
}

#[async_trait]
impl DocumentRepository for PgDocumentRepository {
    async fn save(&self, document: &Document) -> Result<()> {
        sqlx::query(
            "INSERT INTO document (id, title, filename, filetype, filesize, text, summary,
                                   preview_paths, owner, created_at, updated_at, trashed_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
             ON CONFLICT (id) DO UPDATE SET
                 title = EXCLUDED.title,
                 filename = EXCLUDED.filename,
                 filetype = EXCLUDED.filetype,
                 filesize = EXCLUDED.filesize,
                 text = EXCLUDED.text,
                 summary = EXCLUDED.summary,
                 preview_paths = EXCLUDED.preview_paths,
                 owner = EXCLUDED.owner,
                 updated_at = EXCLUDED.updated_at,
                 trashed_at = EXCLUDED.trashed_at",
        )
        .bind(document.id)
        .bind(&document.title)
        .bind(&document.filename)
        .bind(document.filetype.as_str())
        .bind(document.filesize)
        .bind(&document.text)
        .bind(document.summary.as_ref().map(Json))
        .bind(&document.preview_paths)
        .bind(&document.owner)
        .bind(document.created_at)
        .bind(document.updated_at)
        .bind(document.trashed_at)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(())
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Document>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM document WHERE id = $1",
            DOCUMENT_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;
        row.map(Self::parse_document_row).transpose()
    }

    async fn find_all_by_owner(&self, owner: &str) -> Result<Vec<Document>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM document WHERE owner = $1 ORDER BY created_at ASC, id ASC",
            DOCUMENT_COLUMNS
        ))
        .bind(owner)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;
        rows.into_iter().map(Self::parse_document_row).collect()
    }

    async fn find_all_trashed(&self) -> Result<Vec<Document>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM document WHERE trashed_at IS NOT NULL ORDER BY trashed_at ASC, id ASC",
            DOCUMENT_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;
        rows.into_iter().map(Self::parse_document_row).collect()
    }

    async fn delete_by_id(&self, id: Uuid) -> Result<()> {
        let result = sqlx::query("DELETE FROM document WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(Error::Database)?;
        Self::expect_one(id, result.rows_affected())
    }

    async fn update_text(&self, id: Uuid, text: &str) -> Result<()> {
        let result = sqlx::query("UPDATE document SET text = $2, updated_at = $3 WHERE id = $1")
            .bind(id)
            .bind(text)
            .bind(Utc::now())
            .execute(&self.pool)
            .await
            .map_err(Error::Database)?;
        Self::expect_one(id, result.rows_affected())
    }

    async fn update_preview_paths(&self, id: Uuid, paths: &[String]) -> Result<()> {
        let result =
            sqlx::query("UPDATE document SET preview_paths = $2, updated_at = $3 WHERE id = $1")
                .bind(id)
                .bind(paths)
                .bind(Utc::now())
                .execute(&self.pool)
                .await
                .map_err(Error::Database)?;
        Self::expect_one(id, result.rows_affected())
    }

    async fn update_summary(&self, id: Uuid, summary: &DocumentSummary) -> Result<()> {
        let result = sqlx::query("UPDATE document SET summary = $2, updated_at = $3 WHERE id = $1")
            .bind(id)
            .bind(Json(summary))
            .bind(Utc::now())
            .execute(&self.pool)
            .await
            .map_err(Error::Database)?;
        Self::expect_one(id, result.rows_affected())
    }

    async fn update_trashed_at(&self, id: Uuid, trashed_at: Option<DateTime<Utc>>) -> Result<()> {
        let result =
            sqlx::query("UPDATE document SET trashed_at = $2, updated_at = $3 WHERE id = $1")
                .bind(id)
                .bind(trashed_at)
                .bind(Utc::now())
                .execute(&self.pool)
                .await
                .map_err(Error::Database)?;
        Self::expect_one(id, result.rows_affected())
    }
}
