//! Chunk metadata repository implementation.

use async_trait::async_trait;
use sqlx::PgPool;

use pagoda_core::{ChunkRecord, ChunkRepository, Error, Result};

/// PostgreSQL implementation of the chunk metadata table.
#[derive(Clone)]
pub struct PgChunkRepository {
    pool: PgPool,
}

impl PgChunkRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ChunkRepository for PgChunkRepository {
    async fn insert(
        &self,
        file_md5: &str,
        chunk_index: i32,
        chunk_md5: &str,
        storage_path: &str,
    ) -> Result<()> {
        if chunk_index < 0 {
            return Err(Error::InvalidInput(
                "chunkIndex must be non-negative".to_string(),
            ));
        }

        sqlx::query(
            "INSERT INTO chunk_info (file_md5, chunk_index, chunk_md5, storage_path)
             VALUES ($1, $2, $3, $4)
             ON CONFLICT (file_md5, chunk_index) DO NOTHING",
        )
        .bind(file_md5)
        .bind(chunk_index)
        .bind(chunk_md5)
        .bind(storage_path)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(())
    }

    async fn list_by_md5(&self, file_md5: &str) -> Result<Vec<ChunkRecord>> {
        let rows = sqlx::query_as::<_, ChunkRecord>(
            "SELECT id, file_md5, chunk_index, chunk_md5, storage_path, created_at
             FROM chunk_info WHERE file_md5 = $1 ORDER BY chunk_index ASC",
        )
        .bind(file_md5)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(rows)
    }

    async fn delete_by_md5(&self, file_md5: &str) -> Result<()> {
        sqlx::query("DELETE FROM chunk_info WHERE file_md5 = $1")
            .bind(file_md5)
            .execute(&self.pool)
            .await
            .map_err(Error::Database)?;
        Ok(())
    }
}
