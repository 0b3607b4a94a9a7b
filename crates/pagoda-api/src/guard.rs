//! Organization-tag authorization guard.
//!
//! Runs after session authentication on every `/api` route that targets a
//! resource. Write-path requests (chunk upload, merge, own-list, search,
//! delete-by-fingerprint) pass straight through — the handlers enforce
//! ownership themselves. Resource-scoped reads resolve the target's
//! `(owner, scopeTag, isPublic)` and decide access here.
//!
//! Note the asymmetry with search: this layer checks the caller's raw
//! assigned tags literally. The ancestor walk belongs to the tag resolver
//! and applies to retrieval, not to direct resource reads.

use axum::extract::{Request, State};
use axum::http::Method;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use tracing::debug;

use pagoda_core::tags::{is_private_tag, DEFAULT_TAG};
use pagoda_core::{FileRecord, FileRepository, UserRole};

use crate::auth::AuthUser;
use crate::error::ApiError;
use crate::state::AppState;

/// Guard's verdict on a resource-scoped request.
#[derive(Debug, PartialEq, Eq)]
pub enum Access {
    Allow,
    Deny,
}

/// Whether this request belongs to the write path and skips the resource
/// lookup entirely.
pub fn is_write_path(method: &Method, path: &str) -> bool {
    path.contains("/upload/chunk")
        || path.contains("/upload/merge")
        || path.contains("/documents/uploads")
        || path.contains("/search/hybrid")
        || (*method == Method::DELETE && extract_fingerprint(path).is_some())
}

/// A 32-hex fingerprint taken from a `/documents/<md5>` path segment.
pub fn extract_fingerprint(path: &str) -> Option<String> {
    let rest = path.split("/documents/").nth(1)?;
    let candidate: String = rest.chars().take_while(|c| *c != '/' && *c != '?').collect();
    (candidate.len() == 32 && candidate.chars().all(|c| c.is_ascii_hexdigit()))
        .then_some(candidate)
}

/// Resource id for the guard: a fingerprint from the path, or the
/// `X-File-MD5` header on chunk uploads.
pub fn extract_resource_id(request: &Request) -> Option<String> {
    let path = request.uri().path();
    if let Some(md5) = extract_fingerprint(path) {
        return Some(md5);
    }
    if path.contains("/upload/chunk") {
        return request
            .headers()
            .get("X-File-MD5")
            .and_then(|v| v.to_str().ok())
            .map(String::from);
    }
    None
}

/// Pure access decision over a resolved resource.
pub fn evaluate_access(file: &FileRecord, caller: &AuthUser) -> Access {
    // Open resources: public flag, or universal/absent scope.
    if file.is_public || file.org_tag.is_empty() || file.org_tag == DEFAULT_TAG {
        return Access::Allow;
    }
    // Owner and admin bypass scope checks.
    if file.user_id == caller.user_id.to_string() {
        return Access::Allow;
    }
    if caller.role == UserRole::Admin {
        return Access::Allow;
    }
    // Private scopes admit the owner only.
    if is_private_tag(&file.org_tag) {
        return Access::Deny;
    }
    // Literal membership in the caller's raw assigned set.
    if caller.org_tags.iter().any(|t| t == &file.org_tag) {
        return Access::Allow;
    }
    Access::Deny
}

/// Guard middleware; layered after [`crate::auth::require_session`].
pub async fn org_tag_guard(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let is_chunk_upload = path.contains("/upload/chunk");

    if is_write_path(&method, &path) {
        debug!(%path, "Write-path request; guard passes through");
        return next.run(request).await;
    }

    let Some(resource_id) = extract_resource_id(&request) else {
        // No resource id in the request — nothing to scope.
        return next.run(request).await;
    };

    let Some(caller) = request.extensions().get::<AuthUser>().cloned() else {
        return ApiError::Unauthorized("missing session handle".to_string()).into_response();
    };

    let file = match state.db.files.find_by_md5(&resource_id).await {
        Ok(file) => file,
        Err(e) => return ApiError::Internal(e).into_response(),
    };

    let Some(file) = file else {
        if is_chunk_upload {
            // First chunk: the record does not exist yet.
            return next.run(request).await;
        }
        return ApiError::NotFound(format!("resource {resource_id}")).into_response();
    };

    match evaluate_access(&file, &caller) {
        Access::Allow => next.run(request).await,
        Access::Deny => {
            debug!(user = %caller.username, resource = %resource_id, scope = %file.org_tag, "Access denied by tag guard");
            ApiError::Forbidden("you do not have access to this resource".to_string())
                .into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use pagoda_core::UploadStatus;

    fn file(owner: &str, org_tag: &str, is_public: bool) -> FileRecord {
        FileRecord {
            id: 1,
            file_md5: "d41d8cd98f00b204e9800998ecf8427e".into(),
            file_name: "a.pdf".into(),
            total_size: 10,
            status: UploadStatus::Merged,
            user_id: owner.into(),
            org_tag: org_tag.into(),
            is_public,
            created_at: Utc::now(),
            merged_at: None,
        }
    }

    fn caller(user_id: i64, role: UserRole, tags: &[&str]) -> AuthUser {
        AuthUser {
            user_id,
            username: format!("user{user_id}"),
            role,
            org_tags: tags.iter().map(|t| t.to_string()).collect(),
            handle: "h".into(),
        }
    }

    #[test]
    fn public_resources_are_open() {
        let f = file("1", "PRIVATE_user1", true);
        let c = caller(2, UserRole::User, &[]);
        assert_eq!(evaluate_access(&f, &c), Access::Allow);
    }

    #[test]
    fn default_scope_is_open() {
        let f = file("1", DEFAULT_TAG, false);
        let c = caller(2, UserRole::User, &[]);
        assert_eq!(evaluate_access(&f, &c), Access::Allow);
    }

    #[test]
    fn owner_always_passes() {
        let f = file("2", "PRIVATE_user2", false);
        let c = caller(2, UserRole::User, &[]);
        assert_eq!(evaluate_access(&f, &c), Access::Allow);
    }

    #[test]
    fn admin_always_passes() {
        let f = file("1", "PRIVATE_user1", false);
        let c = caller(9, UserRole::Admin, &[]);
        assert_eq!(evaluate_access(&f, &c), Access::Allow);
    }

    #[test]
    fn private_scope_denies_non_owner() {
        // User B, whatever tags it holds, cannot touch A's private file.
        let f = file("1", "PRIVATE_user1", false);
        let c = caller(2, UserRole::User, &["eng", "PRIVATE_user2"]);
        assert_eq!(evaluate_access(&f, &c), Access::Deny);
    }

    #[test]
    fn raw_tag_membership_is_literal_not_expanded() {
        // Caller holds "leaf" whose ancestor is "mid"; a file scoped "mid"
        // is denied here — the ancestor walk belongs to search only.
        let f = file("1", "mid", false);
        let c = caller(2, UserRole::User, &["leaf"]);
        assert_eq!(evaluate_access(&f, &c), Access::Deny);

        let c = caller(2, UserRole::User, &["mid"]);
        assert_eq!(evaluate_access(&f, &c), Access::Allow);
    }

    #[test]
    fn empty_tag_set_is_denied_for_scoped_resources() {
        let f = file("1", "eng", false);
        let c = caller(2, UserRole::User, &[]);
        assert_eq!(evaluate_access(&f, &c), Access::Deny);
    }

    #[test]
    fn tag_comparison_is_byte_exact() {
        let f = file("1", "Eng", false);
        let c = caller(2, UserRole::User, &["eng"]);
        assert_eq!(evaluate_access(&f, &c), Access::Deny);
    }

    #[test]
    fn fingerprint_extraction() {
        assert_eq!(
            extract_fingerprint("/api/v1/documents/d41d8cd98f00b204e9800998ecf8427e"),
            Some("d41d8cd98f00b204e9800998ecf8427e".to_string())
        );
        assert_eq!(
            extract_fingerprint("/api/v1/documents/d41d8cd98f00b204e9800998ecf8427e/preview"),
            Some("d41d8cd98f00b204e9800998ecf8427e".to_string())
        );
        assert_eq!(extract_fingerprint("/api/v1/documents/uploads"), None);
        assert_eq!(extract_fingerprint("/api/v1/documents/123"), None);
        assert_eq!(extract_fingerprint("/api/v1/search/hybrid"), None);
    }

    #[test]
    fn write_path_classification() {
        assert!(is_write_path(&Method::POST, "/api/v1/upload/chunk"));
        assert!(is_write_path(&Method::POST, "/api/v1/upload/merge"));
        assert!(is_write_path(&Method::GET, "/api/v1/documents/uploads"));
        assert!(is_write_path(&Method::GET, "/api/v1/search/hybrid"));
        assert!(is_write_path(
            &Method::DELETE,
            "/api/v1/documents/d41d8cd98f00b204e9800998ecf8427e"
        ));
        assert!(!is_write_path(
            &Method::GET,
            "/api/v1/documents/d41d8cd98f00b204e9800998ecf8427e"
        ));
        assert!(!is_write_path(&Method::GET, "/api/v1/documents/accessible"));
    }
}
