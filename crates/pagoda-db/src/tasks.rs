//! Ingest task queue implementation.
//!
//! The post-merge work queue is a PostgreSQL table claimed with
//! `FOR UPDATE SKIP LOCKED`, which gives consumer-group semantics: each
//! pending task is handed to exactly one worker, and a failed task returns
//! to pending while its retry budget lasts (at-least-once delivery).
//!
//! Enqueue has a transactional variant so the upload coordinator can
//! co-commit the task with the MERGED status flip.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::{PgPool, Row};
use tokio::sync::Notify;

use pagoda_core::defaults::TASK_MAX_RETRIES;
use pagoda_core::{Error, IngestPayload, IngestQueue, IngestTask, Result};

/// PostgreSQL implementation of [`IngestQueue`].
#[derive(Clone)]
pub struct PgIngestQueue {
    pool: PgPool,
    /// Wakes idle workers when a task lands.
    notify: Arc<Notify>,
}

impl PgIngestQueue {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            notify: Arc::new(Notify::new()),
        }
    }

    /// Notification handle for event-driven worker wake-up.
    pub fn task_notify(&self) -> Arc<Notify> {
        self.notify.clone()
    }

    fn parse_task_row(row: sqlx::postgres::PgRow) -> IngestTask {
        IngestTask {
            id: row.get("id"),
            payload: IngestPayload {
                file_md5: row.get::<String, _>("file_md5").trim().to_string(),
                file_path: row.get("file_path"),
                file_name: row.get("file_name"),
                user_id: row.get("user_id"),
                org_tag: row.get("org_tag"),
                is_public: row.get("is_public"),
            },
            retry_count: row.get("retry_count"),
            max_retries: row.get("max_retries"),
            created_at: row.get("created_at"),
        }
    }

    /// Enqueue on an open transaction, co-committed with the caller's writes.
    pub async fn enqueue_tx(
        &self,
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        payload: &IngestPayload,
    ) -> Result<i64> {
        let id: i64 = sqlx::query_scalar(
            "INSERT INTO ingest_task (file_md5, file_path, file_name, user_id, org_tag, is_public, max_retries)
             VALUES ($1, $2, $3, $4, $5, $6, $7)
             RETURNING id",
        )
        .bind(&payload.file_md5)
        .bind(&payload.file_path)
        .bind(&payload.file_name)
        .bind(&payload.user_id)
        .bind(&payload.org_tag)
        .bind(payload.is_public)
        .bind(TASK_MAX_RETRIES)
        .fetch_one(&mut **tx)
        .await
        .map_err(Error::Database)?;

        Ok(id)
    }

    /// Signal workers after the enclosing transaction has committed.
    pub fn notify_enqueued(&self) {
        self.notify.notify_waiters();
    }
}

#[async_trait]
impl IngestQueue for PgIngestQueue {
    async fn enqueue(&self, payload: &IngestPayload) -> Result<i64> {
        let mut tx = self.pool.begin().await.map_err(Error::Database)?;
        let id = self.enqueue_tx(&mut tx, payload).await?;
        tx.commit().await.map_err(Error::Database)?;
        self.notify.notify_waiters();
        Ok(id)
    }

    async fn claim(&self) -> Result<Option<IngestTask>> {
        let row = sqlx::query(
            "UPDATE ingest_task SET status = 'running', started_at = $1
             WHERE id = (
                 SELECT id FROM ingest_task
                 WHERE status = 'pending'
                 ORDER BY created_at
                 FOR UPDATE SKIP LOCKED
                 LIMIT 1
             )
             RETURNING id, file_md5, file_path, file_name, user_id, org_tag, is_public,
                       retry_count, max_retries, created_at",
        )
        .bind(Utc::now())
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(row.map(Self::parse_task_row))
    }

    async fn complete(&self, task_id: i64) -> Result<()> {
        sqlx::query(
            "UPDATE ingest_task SET status = 'completed', completed_at = $1, error_message = NULL
             WHERE id = $2",
        )
        .bind(Utc::now())
        .bind(task_id)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(())
    }

    async fn fail(&self, task_id: i64, error: &str) -> Result<()> {
        // Redeliver while retries remain, otherwise park as failed.
        let parked: Option<String> = sqlx::query_scalar(
            "UPDATE ingest_task
             SET retry_count = retry_count + 1,
                 error_message = $1,
                 status = CASE WHEN retry_count + 1 >= max_retries THEN 'failed' ELSE 'pending' END,
                 completed_at = CASE WHEN retry_count + 1 >= max_retries THEN $2 ELSE NULL END
             WHERE id = $3
             RETURNING status",
        )
        .bind(error)
        .bind(Utc::now())
        .bind(task_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        match parked.as_deref() {
            Some("pending") => {
                self.notify.notify_waiters();
                Ok(())
            }
            Some(_) => Ok(()),
            None => Err(Error::Queue(format!("task {task_id} not found"))),
        }
    }

    async fn pending_count(&self) -> Result<i64> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM ingest_task WHERE status = 'pending'")
                .fetch_one(&self.pool)
                .await
                .map_err(Error::Database)?;
        Ok(count)
    }
}
