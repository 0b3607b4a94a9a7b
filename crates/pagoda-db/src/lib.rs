//! # pagoda-db
//!
//! PostgreSQL database layer for the pagoda knowledge hub.
//!
//! This crate provides:
//! - Connection pool management
//! - Repository implementations for users, tags, uploads, chunks, passages
//! - The post-merge ingest task queue (transactional outbox + SKIP LOCKED
//!   claims)
//!
//! ## Example
//!
//! ```rust,ignore
//! use pagoda_db::Database;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let db = Database::connect("postgres://localhost/pagoda").await?;
//!     let files = db.files.list_by_owner("42").await?;
//!     println!("{} files", files.len());
//!     Ok(())
//! }
//! ```

pub mod chunks;
pub mod files;
pub mod org_tags;
pub mod passages;
pub mod pool;
pub mod tasks;
pub mod users;

pub use chunks::PgChunkRepository;
pub use files::PgFileRepository;
pub use org_tags::{CreateTagRequest, PgTagRepository, UpdateTagRequest};
pub use passages::PgPassageRepository;
pub use pool::{create_pool, create_pool_with_config, log_pool_metrics, PoolConfig};
pub use tasks::PgIngestQueue;
pub use users::PgUserRepository;

use pagoda_core::{Error, IngestPayload, Result};

/// Combined database context with all repositories.
#[derive(Clone)]
pub struct Database {
    /// The underlying connection pool.
    pub pool: sqlx::PgPool,
    pub users: PgUserRepository,
    pub tags: PgTagRepository,
    pub files: PgFileRepository,
    pub chunks: PgChunkRepository,
    pub passages: PgPassageRepository,
    pub queue: PgIngestQueue,
}

impl Database {
    /// Connect with the default pool configuration.
    pub async fn connect(database_url: &str) -> Result<Self> {
        Self::connect_with_config(database_url, PoolConfig::default()).await
    }

    /// Connect with a custom pool configuration.
    pub async fn connect_with_config(database_url: &str, config: PoolConfig) -> Result<Self> {
        let pool = create_pool_with_config(database_url, config).await?;
        Ok(Self::from_pool(pool))
    }

    /// Build the repository bundle over an existing pool.
    pub fn from_pool(pool: sqlx::PgPool) -> Self {
        Self {
            users: PgUserRepository::new(pool.clone()),
            tags: PgTagRepository::new(pool.clone()),
            files: PgFileRepository::new(pool.clone()),
            chunks: PgChunkRepository::new(pool.clone()),
            passages: PgPassageRepository::new(pool.clone()),
            queue: PgIngestQueue::new(pool.clone()),
            pool,
        }
    }

    /// Apply embedded schema migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| Error::Internal(format!("migration failed: {e}")))?;
        Ok(())
    }

    /// Finalize a merge: flip the file to MERGED and enqueue the post-merge
    /// ingest task in the same transaction, so the task exists iff the
    /// status change committed.
    pub async fn commit_merge(
        &self,
        file_md5: &str,
        user_id: &str,
        payload: &IngestPayload,
    ) -> Result<i64> {
        let mut tx = self.pool.begin().await.map_err(Error::Database)?;
        self.files.mark_merged_tx(&mut tx, file_md5, user_id).await?;
        let task_id = self.queue.enqueue_tx(&mut tx, payload).await?;
        tx.commit().await.map_err(Error::Database)?;
        self.queue.notify_enqueued();
        Ok(task_id)
    }
}
