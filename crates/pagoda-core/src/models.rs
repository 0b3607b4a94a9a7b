//! Domain records shared across the pagoda crates.
//!
//! Records are keyed by id with explicit back references (tag parents carry
//! only the parent tag id; descendants are computed by query), which keeps
//! the tag-cycle check a bounded walk.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Role of an account. Immutable outside the admin path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum UserRole {
    User,
    Admin,
}

impl UserRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserRole::User => "USER",
            UserRole::Admin => "ADMIN",
        }
    }

    /// Parse the stored role column; unknown values default to USER.
    pub fn from_str_loose(s: &str) -> Self {
        if s.eq_ignore_ascii_case("ADMIN") {
            UserRole::Admin
        } else {
            UserRole::User
        }
    }
}

/// A registered account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub username: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub role: UserRole,
    /// Assigned organization tag ids, in assignment order. May be empty.
    pub org_tags: Vec<String>,
    /// Tag substituted for uploads that do not name a scope.
    pub primary_org: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A node of the organization tag forest.
///
/// `parent_tag` is a tag id, not a row id; `None` marks a root.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct OrganizationTag {
    pub id: i64,
    pub tag_id: String,
    pub name: String,
    pub description: Option<String>,
    pub parent_tag: Option<String>,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Upload lifecycle of a file. No backward transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum UploadStatus {
    Uploading,
    Merged,
}

impl UploadStatus {
    pub fn from_i16(v: i16) -> Self {
        if v == 1 {
            UploadStatus::Merged
        } else {
            UploadStatus::Uploading
        }
    }

    pub fn as_i16(&self) -> i16 {
        match self {
            UploadStatus::Uploading => 0,
            UploadStatus::Merged => 1,
        }
    }
}

/// One uploaded file, unique on `(file_md5, user_id)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileRecord {
    pub id: i64,
    /// MD5 hex digest of the whole file; the business key.
    pub file_md5: String,
    pub file_name: String,
    pub total_size: i64,
    pub status: UploadStatus,
    /// Owner's user id rendered as a string (matches the search store field).
    pub user_id: String,
    /// Scope tag governing visibility together with `is_public` and ownership.
    pub org_tag: String,
    pub is_public: bool,
    pub created_at: DateTime<Utc>,
    pub merged_at: Option<DateTime<Utc>>,
}

/// Per-chunk metadata persisted alongside the bitmap.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ChunkRecord {
    pub id: i64,
    pub file_md5: String,
    pub chunk_index: i32,
    pub chunk_md5: String,
    pub storage_path: String,
    pub created_at: DateTime<Utc>,
}

/// A text span produced by the splitter. Immutable after creation.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Passage {
    pub id: i64,
    pub file_md5: String,
    /// Sequential within a file, starting at 1.
    pub chunk_id: i32,
    pub text_content: String,
    pub user_id: String,
    pub org_tag: String,
    pub is_public: bool,
    pub created_at: DateTime<Utc>,
}

/// Document shape of the search index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchDocument {
    pub id: String,
    #[serde(rename = "fileMd5")]
    pub file_md5: String,
    #[serde(rename = "chunkId")]
    pub chunk_id: i32,
    #[serde(rename = "textContent")]
    pub text_content: String,
    pub vector: Vec<f32>,
    #[serde(rename = "modelVersion")]
    pub model_version: String,
    #[serde(rename = "userId")]
    pub user_id: String,
    #[serde(rename = "orgTag")]
    pub org_tag: String,
    pub public: bool,
}

/// One ranked hit returned to callers of the hybrid search.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResult {
    pub file_md5: String,
    pub chunk_id: i32,
    pub text_content: String,
    pub score: f64,
    pub user_id: String,
    pub org_tag: String,
    pub is_public: bool,
    /// Human filename, enriched from the relational store after the query.
    pub file_name: Option<String>,
}

/// Role of a conversation turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
}

/// One turn of a stored conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: MessageRole,
    pub content: String,
    /// ISO-8601 local timestamp, second precision.
    pub timestamp: String,
}

/// Post-merge work item consumed by the ingestion worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestPayload {
    pub file_md5: String,
    /// Local path or HTTP(S) URL of the merged object.
    pub file_path: String,
    pub file_name: String,
    pub user_id: String,
    pub org_tag: String,
    pub is_public: bool,
}

/// A claimed row of the ingest queue.
#[derive(Debug, Clone)]
pub struct IngestTask {
    pub id: i64,
    pub payload: IngestPayload,
    pub retry_count: i32,
    pub max_retries: i32,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upload_status_round_trip() {
        assert_eq!(UploadStatus::from_i16(0), UploadStatus::Uploading);
        assert_eq!(UploadStatus::from_i16(1), UploadStatus::Merged);
        assert_eq!(UploadStatus::Uploading.as_i16(), 0);
        assert_eq!(UploadStatus::Merged.as_i16(), 1);
        // Unknown values fall back to Uploading rather than panicking.
        assert_eq!(UploadStatus::from_i16(7), UploadStatus::Uploading);
    }

    #[test]
    fn search_document_uses_index_field_names() {
        let doc = SearchDocument {
            id: "abc".into(),
            file_md5: "d41d8cd98f00b204e9800998ecf8427e".into(),
            chunk_id: 1,
            text_content: "hello".into(),
            vector: vec![0.1, 0.2],
            model_version: "embed-v1".into(),
            user_id: "42".into(),
            org_tag: "DEFAULT".into(),
            public: true,
        };
        let json = serde_json::to_value(&doc).unwrap();
        assert!(json.get("fileMd5").is_some());
        assert!(json.get("chunkId").is_some());
        assert!(json.get("textContent").is_some());
        assert!(json.get("modelVersion").is_some());
        assert!(json.get("userId").is_some());
        assert!(json.get("orgTag").is_some());
        assert!(json.get("public").is_some());
    }

    #[test]
    fn chat_message_roles_serialize_lowercase() {
        let msg = ChatMessage {
            role: MessageRole::Assistant,
            content: "Hello.".into(),
            timestamp: "2026-01-01T00:00:00".into(),
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"role\":\"assistant\""));
    }

    #[test]
    fn user_role_as_str() {
        assert_eq!(UserRole::User.as_str(), "USER");
        assert_eq!(UserRole::Admin.as_str(), "ADMIN");
    }
}
