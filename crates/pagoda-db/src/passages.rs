//! Passage repository implementation.
//!
//! Passage rows are upserted on `(file_md5, chunk_id)` so a redelivered
//! ingest task overwrites instead of duplicating.

use async_trait::async_trait;
use sqlx::PgPool;

use pagoda_core::{Error, Passage, PassageRepository, Result};

/// PostgreSQL implementation of the passage table.
#[derive(Clone)]
pub struct PgPassageRepository {
    pool: PgPool,
}

impl PgPassageRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PassageRepository for PgPassageRepository {
    async fn insert(
        &self,
        file_md5: &str,
        chunk_id: i32,
        text_content: &str,
        user_id: &str,
        org_tag: &str,
        is_public: bool,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO document_vectors (file_md5, chunk_id, text_content, user_id, org_tag, is_public)
             VALUES ($1, $2, $3, $4, $5, $6)
             ON CONFLICT (file_md5, chunk_id)
             DO UPDATE SET text_content = EXCLUDED.text_content",
        )
        .bind(file_md5)
        .bind(chunk_id)
        .bind(text_content)
        .bind(user_id)
        .bind(org_tag)
        .bind(is_public)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(())
    }

    async fn list_by_md5(&self, file_md5: &str) -> Result<Vec<Passage>> {
        let rows = sqlx::query_as::<_, Passage>(
            "SELECT id, file_md5, chunk_id, text_content, user_id, org_tag, is_public, created_at
             FROM document_vectors WHERE file_md5 = $1 ORDER BY chunk_id ASC",
        )
        .bind(file_md5)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(rows)
    }

    async fn delete_by_md5(&self, file_md5: &str) -> Result<()> {
        sqlx::query("DELETE FROM document_vectors WHERE file_md5 = $1")
            .bind(file_md5)
            .execute(&self.pool)
            .await
            .map_err(Error::Database)?;
        Ok(())
    }
}
