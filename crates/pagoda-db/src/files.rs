//! File upload repository implementation.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::{PgPool, Row};

use pagoda_core::{Error, FileRecord, Result, UploadStatus};

/// PostgreSQL implementation of the file upload table.
#[derive(Clone)]
pub struct PgFileRepository {
    pool: PgPool,
}

const FILE_COLUMNS: &str =
    "id, file_md5, file_name, total_size, status, user_id, org_tag, is_public, created_at, merged_at";

pub(crate) fn parse_file_row(row: sqlx::postgres::PgRow) -> FileRecord {
    FileRecord {
        id: row.get("id"),
        file_md5: row.get::<String, _>("file_md5").trim().to_string(),
        file_name: row.get("file_name"),
        total_size: row.get("total_size"),
        status: UploadStatus::from_i16(row.get("status")),
        user_id: row.get("user_id"),
        org_tag: row.get("org_tag"),
        is_public: row.get("is_public"),
        created_at: row.get("created_at"),
        merged_at: row.get("merged_at"),
    }
}

impl PgFileRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Flip an UPLOADING record to MERGED with a merge timestamp, on an open
    /// transaction so the caller can co-commit the ingest task enqueue.
    pub async fn mark_merged_tx(
        &self,
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        file_md5: &str,
        user_id: &str,
    ) -> Result<()> {
        let result = sqlx::query(
            "UPDATE file_upload SET status = 1, merged_at = $1
             WHERE file_md5 = $2 AND user_id = $3 AND status = 0",
        )
        .bind(Utc::now())
        .bind(file_md5)
        .bind(user_id)
        .execute(&mut **tx)
        .await
        .map_err(Error::Database)?;

        if result.rows_affected() == 0 {
            return Err(Error::Conflict(format!(
                "file {file_md5} is not in UPLOADING state"
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl pagoda_core::FileRepository for PgFileRepository {
    async fn insert_uploading(
        &self,
        file_md5: &str,
        file_name: &str,
        total_size: i64,
        user_id: &str,
        org_tag: &str,
        is_public: bool,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO file_upload (file_md5, file_name, total_size, status, user_id, org_tag, is_public)
             VALUES ($1, $2, $3, 0, $4, $5, $6)
             ON CONFLICT (file_md5, user_id) DO NOTHING",
        )
        .bind(file_md5)
        .bind(file_name)
        .bind(total_size)
        .bind(user_id)
        .bind(org_tag)
        .bind(is_public)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(())
    }

    async fn find_by_md5_and_user(
        &self,
        file_md5: &str,
        user_id: &str,
    ) -> Result<Option<FileRecord>> {
        let row = sqlx::query(&format!(
            "SELECT {FILE_COLUMNS} FROM file_upload WHERE file_md5 = $1 AND user_id = $2"
        ))
        .bind(file_md5)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(row.map(parse_file_row))
    }

    async fn find_by_md5(&self, file_md5: &str) -> Result<Option<FileRecord>> {
        let row = sqlx::query(&format!(
            "SELECT {FILE_COLUMNS} FROM file_upload WHERE file_md5 = $1 LIMIT 1"
        ))
        .bind(file_md5)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(row.map(parse_file_row))
    }

    async fn list_by_owner(&self, user_id: &str) -> Result<Vec<FileRecord>> {
        let rows = sqlx::query(&format!(
            "SELECT {FILE_COLUMNS} FROM file_upload WHERE user_id = $1 ORDER BY created_at DESC"
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(rows.into_iter().map(parse_file_row).collect())
    }

    async fn list_accessible(&self, user_id: &str, tags: &[String]) -> Result<Vec<FileRecord>> {
        let rows = if tags.is_empty() {
            sqlx::query(&format!(
                "SELECT {FILE_COLUMNS} FROM file_upload
                 WHERE user_id = $1 OR is_public = TRUE
                 ORDER BY created_at DESC"
            ))
            .bind(user_id)
            .fetch_all(&self.pool)
            .await
        } else {
            sqlx::query(&format!(
                "SELECT {FILE_COLUMNS} FROM file_upload
                 WHERE user_id = $1 OR is_public = TRUE OR org_tag = ANY($2)
                 ORDER BY created_at DESC"
            ))
            .bind(user_id)
            .bind(tags)
            .fetch_all(&self.pool)
            .await
        }
        .map_err(Error::Database)?;

        Ok(rows.into_iter().map(parse_file_row).collect())
    }

    async fn names_for_md5s(&self, md5s: &[String]) -> Result<HashMap<String, String>> {
        if md5s.is_empty() {
            return Ok(HashMap::new());
        }

        let rows = sqlx::query(
            "SELECT DISTINCT ON (file_md5) file_md5, file_name
             FROM file_upload WHERE file_md5 = ANY($1)",
        )
        .bind(md5s)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(rows
            .into_iter()
            .map(|row| {
                (
                    row.get::<String, _>("file_md5").trim().to_string(),
                    row.get("file_name"),
                )
            })
            .collect())
    }

    async fn delete_by_md5_and_user(&self, file_md5: &str, user_id: &str) -> Result<()> {
        let result = sqlx::query("DELETE FROM file_upload WHERE file_md5 = $1 AND user_id = $2")
            .bind(file_md5)
            .bind(user_id)
            .execute(&self.pool)
            .await
            .map_err(Error::Database)?;

        if result.rows_affected() == 0 {
            return Err(Error::NotFound(format!("file {file_md5}")));
        }
        Ok(())
    }
}
