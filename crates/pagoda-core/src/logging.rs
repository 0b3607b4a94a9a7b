//! Structured logging schema and field name constants.
//!
//! All crates use these constants for consistent structured logging fields,
//! so log aggregation can query by standardized names across subsystems.
//!
//! ## Log Level Contract
//!
//! | Level | Usage |
//! |-------|-------|
//! | ERROR | Degraded service, requires operator attention |
//! | WARN  | Recoverable issue, automatic fallback applied |
//! | INFO  | Lifecycle events (startup, shutdown), operation completions |
//! | DEBUG | Decision points, intermediate values, config choices |
//! | TRACE | Per-item iteration, high-volume data (hits, passages) |

// ─── Identity fields ───────────────────────────────────────────────────────

/// Correlation ID propagated across request → task → sub-calls (UUIDv7).
pub const REQUEST_ID: &str = "request_id";

/// Subsystem originating the log event.
/// Values: "api", "search", "db", "cache", "store", "inference", "jobs"
pub const SUBSYSTEM: &str = "subsystem";

/// Component within a subsystem.
/// Examples: "upload", "merge", "hybrid_search", "worker", "pool"
pub const COMPONENT: &str = "component";

/// Logical operation name.
/// Examples: "upload_chunk", "merge", "search", "embed_texts"
pub const OPERATION: &str = "op";

// ─── Entity fields ─────────────────────────────────────────────────────────

/// File fingerprint being operated on (MD5 hex).
pub const FILE_MD5: &str = "file_md5";

/// Chunk index within an upload.
pub const CHUNK_INDEX: &str = "chunk_index";

/// Passage chunk id within a parsed file.
pub const CHUNK_ID: &str = "chunk_id";

/// Acting user id.
pub const USER_ID: &str = "user_id";

/// Organization tag id involved in the operation.
pub const ORG_TAG: &str = "org_tag";

/// Ingest task id being processed.
pub const TASK_ID: &str = "task_id";

/// Search query text.
pub const QUERY: &str = "query";

// ─── Measurement fields ────────────────────────────────────────────────────

/// Wall-clock duration in milliseconds.
pub const DURATION_MS: &str = "duration_ms";

/// Number of results returned by a search or query.
pub const RESULT_COUNT: &str = "result_count";

/// Number of passages processed (splitting, embedding, indexing).
pub const PASSAGE_COUNT: &str = "passage_count";

/// Number of input texts sent to the embedding model.
pub const INPUT_COUNT: &str = "input_count";

/// Byte or character length of a payload.
pub const PAYLOAD_LEN: &str = "payload_len";

// ─── Outcome fields ────────────────────────────────────────────────────────

/// Boolean success/failure indicator.
pub const SUCCESS: &str = "success";

/// Error message when an operation fails.
pub const ERROR_MSG: &str = "error";
