//! Error types for the pagoda knowledge hub.

use thiserror::Error;

/// Result type alias using pagoda's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type shared by every pagoda crate.
#[derive(Error, Debug)]
pub enum Error {
    /// Database operation failed (wraps sqlx::Error)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Key-value store operation failed (wraps redis::RedisError)
    #[error("Cache error: {0}")]
    Cache(#[from] redis::RedisError),

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Unsupported file type at the upload gate
    #[error("Unsupported file type: {0}")]
    UnsupportedType(String),

    /// Conflicting state (duplicate key, tag cycle, delete-in-use)
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Authentication failed (missing or invalid session handle)
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Authenticated but not allowed
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Too many requests against a rate-limited surface
    #[error("Rate limited: {0}")]
    RateLimited(String),

    /// Object store operation failed
    #[error("Storage error: {0}")]
    Storage(String),

    /// Search store operation failed
    #[error("Search error: {0}")]
    Search(String),

    /// Bulk indexing reported per-item failures
    #[error("Index error: {0}")]
    Index(String),

    /// Embedding generation failed
    #[error("Embedding error: {0}")]
    Embedding(String),

    /// Chat/generation failed
    #[error("Inference error: {0}")]
    Inference(String),

    /// Task queue error
    #[error("Queue error: {0}")]
    Queue(String),

    /// Worker back-pressure signal; the task is released for redelivery
    #[error("Memory pressure: {0}")]
    MemoryPressure(String),

    /// Text extraction failed
    #[error("Extraction error: {0}")]
    Extraction(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// HTTP/network request failed
    #[error("Request error: {0}")]
    Request(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),

    /// File I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Error::Request(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_not_found() {
        let err = Error::NotFound("file abc".to_string());
        assert_eq!(err.to_string(), "Not found: file abc");
    }

    #[test]
    fn test_error_display_invalid_input() {
        let err = Error::InvalidInput("chunkIndex must be non-negative".to_string());
        assert_eq!(
            err.to_string(),
            "Invalid input: chunkIndex must be non-negative"
        );
    }

    #[test]
    fn test_error_display_unsupported_type() {
        let err = Error::UnsupportedType("EXE file".to_string());
        assert_eq!(err.to_string(), "Unsupported file type: EXE file");
    }

    #[test]
    fn test_error_display_conflict() {
        let err = Error::Conflict("tag already exists".to_string());
        assert_eq!(err.to_string(), "Conflict: tag already exists");
    }

    #[test]
    fn test_error_display_memory_pressure() {
        let err = Error::MemoryPressure("resident 85.0% above 80% cap".to_string());
        assert!(err.to_string().starts_with("Memory pressure:"));
    }

    #[test]
    fn test_from_serde_json_error() {
        let json_err = serde_json::from_str::<i32>("not a number").unwrap_err();
        let err: Error = json_err.into();
        assert!(matches!(err, Error::Serialization(_)));
    }

    #[test]
    fn test_from_io_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
    }

    #[test]
    fn test_error_is_send_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}

        assert_send::<Error>();
        assert_sync::<Error>();
    }
}
