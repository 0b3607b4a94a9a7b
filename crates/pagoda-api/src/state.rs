//! Shared application state.

use std::num::NonZeroU32;
use std::sync::Arc;

use governor::{Quota, RateLimiter};

use pagoda_cache::{Cache, ConversationStore, SessionStore, TagResolver, UploadLedger};
use pagoda_core::{EmbeddingBackend, StreamingChat};
use pagoda_db::Database;
use pagoda_search::HybridSearchEngine;
use pagoda_store::S3Store;

use crate::chat::ChatSessions;

/// Global rate limiter over the credential endpoints.
pub type CredentialRateLimiter = RateLimiter<
    governor::state::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub db: Database,
    pub cache: Cache,
    pub ledger: UploadLedger,
    pub sessions: SessionStore,
    pub conversations: ConversationStore,
    pub tag_resolver: TagResolver,
    pub store: Arc<S3Store>,
    pub search: Arc<HybridSearchEngine>,
    pub embedder: Arc<dyn EmbeddingBackend>,
    pub chat_backend: Arc<dyn StreamingChat>,
    /// Per-connection chat session registry (process-local; chat streams
    /// are sticky to the instance that accepted them).
    pub chat_sessions: ChatSessions,
    /// Rate limiter applied to register/login (None disables limiting).
    pub rate_limiter: Option<Arc<CredentialRateLimiter>>,
}

/// Build the credential rate limiter from deployment defaults.
pub fn credential_rate_limiter() -> Arc<CredentialRateLimiter> {
    let per_minute = NonZeroU32::new(pagoda_core::defaults::RATE_LIMIT_REQUESTS)
        .expect("rate limit constant is non-zero");
    Arc::new(RateLimiter::direct(Quota::per_minute(per_minute)))
}
