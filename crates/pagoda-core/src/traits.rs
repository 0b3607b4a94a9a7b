//! Core traits for pagoda abstractions.
//!
//! These define the seams between crates: repositories over the relational
//! store, the object store, the embedding/chat backends, and the ingest
//! queue. Concrete implementations may carry additional methods; the traits
//! hold only what crosses crate boundaries.

use std::collections::HashMap;
use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;

use crate::error::Result;
use crate::models::*;

// =============================================================================
// RELATIONAL REPOSITORIES
// =============================================================================

/// Request for creating a new account.
#[derive(Debug, Clone)]
pub struct CreateUserRequest {
    pub username: String,
    pub password_hash: String,
    pub role: UserRole,
    pub org_tags: Vec<String>,
    pub primary_org: Option<String>,
}

/// Repository for account lookups and admin mutations.
#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn create(&self, req: CreateUserRequest) -> Result<User>;

    async fn find_by_username(&self, username: &str) -> Result<Option<User>>;

    async fn find_by_id(&self, id: i64) -> Result<Option<User>>;

    async fn list(&self, limit: i64, offset: i64) -> Result<Vec<User>>;

    /// Replace a user's assigned tag set and primary tag (admin path).
    async fn update_org_tags(
        &self,
        username: &str,
        org_tags: &[String],
        primary_org: Option<&str>,
    ) -> Result<()>;
}

/// Read surface of the organization tag forest; the expansion and cycle
/// walks in [`crate::tags`] are generic over this.
#[async_trait]
pub trait TagRepository: Send + Sync {
    async fn find_by_tag_id(&self, tag_id: &str) -> Result<Option<OrganizationTag>>;

    async fn list(&self) -> Result<Vec<OrganizationTag>>;

    async fn exists(&self, tag_id: &str) -> Result<bool>;
}

/// Repository for file upload records.
#[async_trait]
pub trait FileRepository: Send + Sync {
    /// Insert an UPLOADING record on first sighting; replays are no-ops.
    async fn insert_uploading(
        &self,
        file_md5: &str,
        file_name: &str,
        total_size: i64,
        user_id: &str,
        org_tag: &str,
        is_public: bool,
    ) -> Result<()>;

    async fn find_by_md5_and_user(&self, file_md5: &str, user_id: &str)
        -> Result<Option<FileRecord>>;

    /// Owner-agnostic lookup used by the authorization guard.
    async fn find_by_md5(&self, file_md5: &str) -> Result<Option<FileRecord>>;

    async fn list_by_owner(&self, user_id: &str) -> Result<Vec<FileRecord>>;

    /// Files visible to `user_id`: owned, public, or scoped to one of `tags`.
    async fn list_accessible(&self, user_id: &str, tags: &[String]) -> Result<Vec<FileRecord>>;

    /// Batched fingerprint → filename lookup for result enrichment.
    async fn names_for_md5s(&self, md5s: &[String]) -> Result<HashMap<String, String>>;

    async fn delete_by_md5_and_user(&self, file_md5: &str, user_id: &str) -> Result<()>;
}

/// Repository for per-chunk metadata.
#[async_trait]
pub trait ChunkRepository: Send + Sync {
    /// Insert a chunk row; a replay of the same `(file_md5, chunk_index)` is
    /// a no-op, keeping uploads idempotent.
    async fn insert(
        &self,
        file_md5: &str,
        chunk_index: i32,
        chunk_md5: &str,
        storage_path: &str,
    ) -> Result<()>;

    /// All chunk rows for a fingerprint in ascending index order.
    async fn list_by_md5(&self, file_md5: &str) -> Result<Vec<ChunkRecord>>;

    async fn delete_by_md5(&self, file_md5: &str) -> Result<()>;
}

/// Repository for parsed passages.
#[async_trait]
pub trait PassageRepository: Send + Sync {
    async fn insert(
        &self,
        file_md5: &str,
        chunk_id: i32,
        text_content: &str,
        user_id: &str,
        org_tag: &str,
        is_public: bool,
    ) -> Result<()>;

    /// All passages for a fingerprint in ascending chunk id order.
    async fn list_by_md5(&self, file_md5: &str) -> Result<Vec<Passage>>;

    async fn delete_by_md5(&self, file_md5: &str) -> Result<()>;
}

// =============================================================================
// INGEST QUEUE
// =============================================================================

/// Post-merge task queue contract (the broker seam).
///
/// Delivery semantics: at-least-once. A claimed task is processed by exactly
/// one worker at a time; `fail` releases it for redelivery until the retry
/// budget is exhausted.
#[async_trait]
pub trait IngestQueue: Send + Sync {
    async fn enqueue(&self, payload: &IngestPayload) -> Result<i64>;

    /// Claim the next pending task, if any.
    async fn claim(&self) -> Result<Option<IngestTask>>;

    async fn complete(&self, task_id: i64) -> Result<()>;

    /// Record a failure; the task returns to pending while retries remain.
    async fn fail(&self, task_id: i64, error: &str) -> Result<()>;

    async fn pending_count(&self) -> Result<i64>;
}

// =============================================================================
// OBJECT STORE
// =============================================================================

/// Object store contract over the upload bucket.
///
/// Paths are bucket-relative keys (`chunks/<md5>/<index>`,
/// `merged/<name>`).
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn put(&self, path: &str, data: &[u8], content_type: &str) -> Result<()>;

    async fn read(&self, path: &str) -> Result<Vec<u8>>;

    /// Object byte length, or `None` if absent.
    async fn stat(&self, path: &str) -> Result<Option<u64>>;

    async fn exists(&self, path: &str) -> Result<bool>;

    async fn delete(&self, path: &str) -> Result<()>;

    /// Server-side composition of `sources` (in order) into `dest`.
    async fn compose(&self, sources: &[String], dest: &str) -> Result<()>;

    /// Time-limited GET URL for direct client download.
    async fn presign_get(&self, path: &str, expiry_secs: u64) -> Result<String>;
}

// =============================================================================
// INFERENCE BACKENDS
// =============================================================================

/// Dense-embedding backend.
#[async_trait]
pub trait EmbeddingBackend: Send + Sync {
    /// Embed a batch of texts, preserving input order.
    async fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Fixed output dimensionality; must match the search index mapping.
    fn dimension(&self) -> usize;

    fn model_name(&self) -> &str;
}

/// Stream of response text deltas.
pub type TokenStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

/// Streaming chat backend.
#[async_trait]
pub trait StreamingChat: Send + Sync {
    /// Open a streaming completion for the composed conversation.
    ///
    /// `history` carries prior turns oldest-first; the user message goes
    /// last. The system prompt (rules + reference block) is composed by the
    /// backend from `context`.
    async fn stream_chat(
        &self,
        user_message: &str,
        context: &str,
        history: &[ChatMessage],
    ) -> Result<TokenStream>;
}

/// Read side of the effective-tag resolver, consumed by search.
#[async_trait]
pub trait EffectiveTags: Send + Sync {
    /// The user's effective tag set. Always contains `DEFAULT`; degrades to
    /// `{DEFAULT}` on repository failure.
    async fn effective_tags(&self, username: &str) -> Vec<String>;
}
