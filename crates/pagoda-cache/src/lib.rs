//! # pagoda-cache
//!
//! Redis-backed shared state for the pagoda knowledge hub. The fast KV
//! store is the sole shared mutable state of the system: upload bitmaps,
//! the effective-tag cache, conversation history, and session handles all
//! live here, consistent through the store's atomic primitives (bit-set,
//! list ops, expire) rather than in-process locks.
//!
//! ## Configuration
//!
//! - `REDIS_URL`: connection URL (default: `redis://localhost:6379`)

pub mod conversations;
pub mod sessions;
pub mod tag_cache;
pub mod upload_ledger;

pub use conversations::ConversationStore;
pub use sessions::{SessionStore, SessionSubject};
pub use tag_cache::TagResolver;
pub use upload_ledger::UploadLedger;

use redis::aio::ConnectionManager;
use tracing::info;

use pagoda_core::Result;

/// Shared Redis connection handle.
///
/// `ConnectionManager` multiplexes and reconnects internally, so the handle
/// is cheap to clone into each store.
#[derive(Clone)]
pub struct Cache {
    pub(crate) conn: ConnectionManager,
}

impl Cache {
    /// Connect using `REDIS_URL` (default `redis://localhost:6379`).
    pub async fn from_env() -> Result<Self> {
        let url =
            std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://localhost:6379".to_string());
        Self::connect(&url).await
    }

    /// Connect to the given Redis URL.
    pub async fn connect(url: &str) -> Result<Self> {
        let client = redis::Client::open(url)?;
        let conn = ConnectionManager::new(client).await?;
        info!(
            subsystem = "cache",
            op = "connect",
            "Connected to the KV store"
        );
        Ok(Self { conn })
    }

    /// Build the upload bitmap ledger.
    pub fn upload_ledger(&self) -> UploadLedger {
        UploadLedger::new(self.clone())
    }

    /// Build the conversation store.
    pub fn conversations(&self) -> ConversationStore {
        ConversationStore::new(self.clone())
    }

    /// Build the session store.
    pub fn sessions(&self) -> SessionStore {
        SessionStore::new(self.clone())
    }
}
