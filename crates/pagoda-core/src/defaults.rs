//! Centralized default constants for the pagoda system.
//!
//! **This module is the single source of truth** for shared default values.
//! Crates reference these constants instead of defining their own magic
//! numbers. Organized by domain area.

// =============================================================================
// UPLOAD
// =============================================================================

/// Fixed chunk size assumed by the server: `totalChunks = ceil(totalSize / CHUNK_SIZE_BYTES)`.
/// A deployment constant, not configurable per upload.
pub const CHUNK_SIZE_BYTES: u64 = 5 * 1024 * 1024;

/// Object-store bucket holding chunk and merged objects.
pub const UPLOAD_BUCKET: &str = "uploads";

/// Object key prefix for raw chunks: `chunks/<fileMd5>/<index>`.
pub const CHUNK_PREFIX: &str = "chunks";

/// Object key prefix for composed files: `merged/<fileName>`.
pub const MERGED_PREFIX: &str = "merged";

/// Lifetime of pre-signed download URLs in seconds.
pub const PRESIGN_EXPIRY_SECS: u64 = 3600;

// =============================================================================
// PARSING / SPLITTING
// =============================================================================

/// Parent buffer size: accumulated characters before the child splitter runs.
pub const PARENT_CHUNK_CHARS: usize = 1024 * 1024;

/// Target passage size in characters for the child splitter.
pub const PASSAGE_TARGET_CHARS: usize = 1000;

/// Resident-memory fraction above which the worker rejects tasks.
pub const MEMORY_PRESSURE_THRESHOLD: f64 = 0.8;

// =============================================================================
// EMBEDDING / INDEXING
// =============================================================================

/// Maximum texts per embedding request.
pub const EMBED_BATCH_SIZE: usize = 100;

/// Embedding request deadline in seconds.
pub const EMBED_TIMEOUT_SECS: u64 = 30;

/// Fixed-delay retries on HTTP-status errors from the embedding service.
pub const EMBED_MAX_RETRIES: u32 = 3;

/// Delay between embedding retries in seconds.
pub const EMBED_RETRY_DELAY_SECS: u64 = 1;

/// Embedding vector dimensionality; must match the search index mapping.
pub const EMBED_DIMENSION: usize = 1024;

/// Search index name.
pub const SEARCH_INDEX: &str = "knowledge_base";

// =============================================================================
// SEARCH
// =============================================================================

/// Candidate multiplier: `k = numCandidates = RECALL_FACTOR * topK`.
pub const RECALL_FACTOR: usize = 30;

/// Original-query weight during rescoring.
pub const RESCORE_QUERY_WEIGHT: f64 = 0.2;

/// Rescore-query weight during rescoring.
pub const RESCORE_RESCORE_WEIGHT: f64 = 1.0;

/// Minimum score for the lexical-only fallback path.
pub const LEXICAL_MIN_SCORE: f64 = 0.3;

// =============================================================================
// CHAT
// =============================================================================

/// Retrieved passages per chat turn.
pub const CHAT_TOP_K: usize = 5;

/// Context snippet truncation in characters.
pub const CHAT_SNIPPET_CHARS: usize = 300;

/// Maximum messages kept per conversation.
pub const CONVERSATION_MAX_MESSAGES: usize = 20;

/// Conversation sliding TTL in seconds (7 days).
pub const CONVERSATION_TTL_SECS: u64 = 7 * 24 * 3600;

/// Default generation temperature.
pub const GEN_TEMPERATURE: f64 = 0.3;

/// Default generation top-p.
pub const GEN_TOP_P: f64 = 0.9;

/// Default generation max tokens.
pub const GEN_MAX_TOKENS: u32 = 2000;

/// Initial delay before the completion watchdog samples the buffer.
pub const WATCHDOG_INITIAL_DELAY_SECS: u64 = 3;

/// Interval between two buffer-length samples.
pub const WATCHDOG_SAMPLE_DELAY_SECS: u64 = 2;

/// Extra wait windows before completion is forced.
pub const WATCHDOG_EXTRA_WINDOWS: u32 = 5;

/// Length of one extra wait window in seconds.
pub const WATCHDOG_WINDOW_SECS: u64 = 5;

/// How long a stop flag stays set before it is cleared for the next turn.
pub const STOP_FLAG_CLEAR_SECS: u64 = 2;

// =============================================================================
// SESSIONS
// =============================================================================

/// Session handle lifetime in seconds (1 hour).
pub const SESSION_TTL_SECS: u64 = 3600;

/// Grace added to the stored session key beyond its logical expiry.
pub const SESSION_GRACE_SECS: u64 = 300;

/// Refresh handle lifetime in seconds (7 days).
pub const REFRESH_TTL_SECS: u64 = 7 * 24 * 3600;

// =============================================================================
// TAG CACHE
// =============================================================================

/// Effective-tag cache TTL in seconds (24 hours, sliding).
pub const TAG_CACHE_TTL_SECS: u64 = 24 * 3600;

// =============================================================================
// SERVER
// =============================================================================

/// Default HTTP server port.
pub const SERVER_PORT: u16 = 8080;

/// Default rate limit on credential endpoints: requests per period.
pub const RATE_LIMIT_REQUESTS: u32 = 30;

/// Rate limit period in seconds.
pub const RATE_LIMIT_PERIOD_SECS: u64 = 60;

/// Request body cap: one chunk plus multipart overhead.
pub const MAX_BODY_SIZE_BYTES: usize = 6 * 1024 * 1024;

// =============================================================================
// WORKER
// =============================================================================

/// Default polling interval when the queue is empty, in milliseconds.
pub const WORKER_POLL_INTERVAL_MS: u64 = 500;

/// Default concurrent tasks per worker process.
pub const WORKER_MAX_CONCURRENT: usize = 4;

/// Default delivery attempts before a task is parked as failed.
pub const TASK_MAX_RETRIES: i32 = 3;

/// Source download connect timeout in seconds.
pub const SOURCE_CONNECT_TIMEOUT_SECS: u64 = 30;

/// Source download read timeout in seconds.
pub const SOURCE_READ_TIMEOUT_SECS: u64 = 180;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_count_formula() {
        // 12 MiB at 5 MiB chunks -> 3 chunks.
        let total: u64 = 12 * 1024 * 1024;
        let chunks = total.div_ceil(CHUNK_SIZE_BYTES);
        assert_eq!(chunks, 3);
    }

    #[test]
    fn watchdog_cap_is_bounded() {
        // 3s initial + 2s sample + 5 * (5s + 2s) = 40s worst case before the
        // forced completion fires. Keep it under a minute.
        let cap = WATCHDOG_INITIAL_DELAY_SECS
            + WATCHDOG_SAMPLE_DELAY_SECS
            + WATCHDOG_EXTRA_WINDOWS as u64 * (WATCHDOG_WINDOW_SECS + WATCHDOG_SAMPLE_DELAY_SECS);
        assert!(cap < 60);
    }

    #[test]
    fn body_limit_covers_one_chunk() {
        assert!(MAX_BODY_SIZE_BYTES as u64 > CHUNK_SIZE_BYTES);
    }

    #[test]
    fn session_ttls_ordered() {
        assert!(SESSION_TTL_SECS < REFRESH_TTL_SECS);
        assert!(SESSION_GRACE_SECS < SESSION_TTL_SECS);
    }
}
