//! Document surface: cascade delete, listings, download URLs.

use axum::extract::{Path, Query, State};
use axum::response::IntoResponse;
use axum::Extension;
use serde::Deserialize;
use serde_json::json;
use tracing::{error, info};

use pagoda_core::defaults::PRESIGN_EXPIRY_SECS;
use pagoda_core::{
    ChunkRepository, EffectiveTags, FileRepository, ObjectStore, PassageRepository, UserRole,
};
use pagoda_store::merged_path;

use crate::auth::AuthUser;
use crate::error::{ok, ok_with_message, ApiError};
use crate::state::AppState;

/// DELETE /api/v1/documents/{fingerprint}
///
/// Owner (or admin) cascade delete: search documents, the merged object,
/// passages, chunk rows, and finally the file record. Search-store and
/// object-store failures are logged and skipped so a half-gone document can
/// always be cleaned up; the relational rows must go.
pub async fn delete_document(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(file_md5): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let file = state
        .db
        .files
        .find_by_md5(&file_md5)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("document {file_md5}")))?;

    let caller_id = user.user_id.to_string();
    if file.user_id != caller_id && user.role != UserRole::Admin {
        return Err(ApiError::Forbidden(
            "only the owner may delete this document".to_string(),
        ));
    }

    if let Err(e) = state.search.delete_by_md5(&file_md5).await {
        error!(file_md5 = %file_md5, error = %e, "Search-store delete failed; continuing cascade");
    }

    let merged = merged_path(&file.file_name);
    if let Err(e) = state.store.delete(&merged).await {
        error!(file_md5 = %file_md5, error = %e, "Merged object delete failed; continuing cascade");
    }

    state.db.passages.delete_by_md5(&file_md5).await?;
    state.db.chunks.delete_by_md5(&file_md5).await?;
    state
        .db
        .files
        .delete_by_md5_and_user(&file_md5, &file.user_id)
        .await?;

    info!(user = %user.username, file_md5 = %file_md5, "Document deleted");
    Ok(ok_with_message("document deleted", json!(null)))
}

/// GET /api/v1/documents/uploads — the caller's own files.
pub async fn list_uploads(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
) -> Result<impl IntoResponse, ApiError> {
    let files = state
        .db
        .files
        .list_by_owner(&user.user_id.to_string())
        .await?;
    Ok(ok(json!({ "files": files, "total": files.len() })))
}

/// GET /api/v1/documents/accessible — owned, public, or scope within the
/// caller's effective tags.
pub async fn list_accessible(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
) -> Result<impl IntoResponse, ApiError> {
    let effective = state.tag_resolver.effective_tags(&user.username).await;
    let files = state
        .db
        .files
        .list_accessible(&user.user_id.to_string(), &effective)
        .await?;
    Ok(ok(json!({ "files": files, "total": files.len() })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadQuery {
    pub file_name: String,
}

/// GET /api/v1/documents/download?fileName= — pre-signed URL for a merged
/// object.
pub async fn download_url(
    State(state): State<AppState>,
    Query(query): Query<DownloadQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let path = merged_path(&query.file_name);
    if !state.store.exists(&path).await? {
        return Err(ApiError::NotFound(format!(
            "merged object for '{}'",
            query.file_name
        )));
    }

    let url = state.store.presign_get(&path, PRESIGN_EXPIRY_SECS).await?;
    Ok(ok(json!({ "url": url, "expiresIn": PRESIGN_EXPIRY_SECS })))
}
