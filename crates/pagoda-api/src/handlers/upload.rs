//! Upload coordination: chunk upload, status, merge, supported types.

use axum::extract::{Multipart, Query, State};
use axum::response::IntoResponse;
use axum::{Extension, Json};
use md5::{Digest, Md5};
use serde::Deserialize;
use serde_json::json;
use tracing::{info, warn};

use pagoda_core::defaults::{CHUNK_SIZE_BYTES, PRESIGN_EXPIRY_SECS};
use pagoda_core::{
    check_file_type, ChunkRepository, Error, FileRepository, IngestPayload, ObjectStore,
    UploadStatus, UserRepository,
};
use pagoda_store::{chunk_path, merged_path};

use crate::auth::AuthUser;
use crate::error::{ok, ok_with_message, ApiError};
use crate::state::AppState;

/// Expected chunk count for a file: `ceil(totalSize / 5 MiB)`.
pub fn total_chunks(total_size: i64) -> usize {
    if total_size <= 0 {
        return 0;
    }
    (total_size as u64).div_ceil(CHUNK_SIZE_BYTES) as usize
}

/// Upload progress as a percentage, truncated to two decimals.
pub fn progress_percent(uploaded: usize, total: usize) -> f64 {
    if total == 0 {
        return 0.0;
    }
    let raw = uploaded as f64 / total as f64 * 100.0;
    (raw * 100.0).floor() / 100.0
}

#[derive(Debug, Default)]
struct ChunkUploadFields {
    file_md5: Option<String>,
    chunk_index: Option<i32>,
    total_size: Option<i64>,
    file_name: Option<String>,
    org_tag: Option<String>,
    is_public: bool,
    data: Option<Vec<u8>>,
}

async fn parse_multipart(mut multipart: Multipart) -> Result<ChunkUploadFields, ApiError> {
    let mut fields = ChunkUploadFields::default();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(format!("malformed multipart body: {e}")))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "fileMd5" => fields.file_md5 = Some(read_text(field).await?),
            "chunkIndex" => {
                let text = read_text(field).await?;
                fields.chunk_index = Some(text.parse().map_err(|_| {
                    ApiError::BadRequest(format!("chunkIndex '{text}' is not an integer"))
                })?);
            }
            "totalSize" => {
                let text = read_text(field).await?;
                fields.total_size = Some(text.parse().map_err(|_| {
                    ApiError::BadRequest(format!("totalSize '{text}' is not an integer"))
                })?);
            }
            "fileName" => fields.file_name = Some(read_text(field).await?),
            "orgTag" => {
                let text = read_text(field).await?;
                if !text.is_empty() {
                    fields.org_tag = Some(text);
                }
            }
            "isPublic" => {
                let text = read_text(field).await?;
                fields.is_public = text == "true" || text == "1";
            }
            "file" => {
                let data = field
                    .bytes()
                    .await
                    .map_err(|e| ApiError::BadRequest(format!("failed to read chunk body: {e}")))?;
                fields.data = Some(data.to_vec());
            }
            _ => {}
        }
    }

    Ok(fields)
}

async fn read_text(field: axum::extract::multipart::Field<'_>) -> Result<String, ApiError> {
    field
        .text()
        .await
        .map_err(|e| ApiError::BadRequest(format!("malformed multipart field: {e}")))
}

/// POST /api/v1/upload/chunk
///
/// Idempotent per `(fileMd5, userId, chunkIndex)`: a replay whose object
/// and metadata already exist returns success without touching anything;
/// a replay whose object went missing re-stores it.
pub async fn upload_chunk(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    multipart: Multipart,
) -> Result<impl IntoResponse, ApiError> {
    let fields = parse_multipart(multipart).await?;

    let file_md5 = fields
        .file_md5
        .ok_or_else(|| ApiError::BadRequest("fileMd5 is required".to_string()))?;
    let chunk_index = fields
        .chunk_index
        .ok_or_else(|| ApiError::BadRequest("chunkIndex is required".to_string()))?;
    let total_size = fields
        .total_size
        .ok_or_else(|| ApiError::BadRequest("totalSize is required".to_string()))?;
    let file_name = fields
        .file_name
        .ok_or_else(|| ApiError::BadRequest("fileName is required".to_string()))?;
    let data = fields
        .data
        .ok_or_else(|| ApiError::BadRequest("file part is required".to_string()))?;

    if chunk_index < 0 {
        return Err(ApiError::BadRequest(
            "chunkIndex must be non-negative".to_string(),
        ));
    }

    // The type gate runs on the first chunk only; nothing is stored for a
    // rejected file.
    if chunk_index == 0 {
        let check = check_file_type(&file_name);
        if !check.allowed {
            warn!(user = %user.username, file = %file_name, file_type = %check.file_type, "Upload rejected by type gate");
            return Err(ApiError::UnsupportedType {
                message: check.message,
                file_type: check.file_type,
            });
        }
    }

    // Absent scope: fall back to the uploader's primary tag.
    let org_tag = match fields.org_tag {
        Some(tag) => tag,
        None => state
            .db
            .users
            .find_by_id(user.user_id)
            .await?
            .and_then(|u| u.primary_org)
            .unwrap_or_else(|| pagoda_core::DEFAULT_TAG.to_string()),
    };

    let user_id = user.user_id.to_string();

    // First sighting inserts the UPLOADING record; replays are no-ops.
    state
        .db
        .files
        .insert_uploading(
            &file_md5,
            &file_name,
            total_size,
            &user_id,
            &org_tag,
            fields.is_public,
        )
        .await?;

    let path = chunk_path(&file_md5, chunk_index);
    let mut already_uploaded = state
        .ledger
        .is_uploaded(&user_id, &file_md5, chunk_index)
        .await?;

    let chunk_rows = state.db.chunks.list_by_md5(&file_md5).await?;
    let meta_exists = chunk_rows.iter().any(|c| c.chunk_index == chunk_index);

    if already_uploaded {
        if meta_exists && state.store.exists(&path).await? {
            info!(user = %user.username, file_md5 = %file_md5, chunk_index, "Chunk replay acknowledged");
            return respond_with_progress(&state, &file_md5, &user_id, total_size).await;
        }
        // The bitmap claims the chunk but the object is gone: fall through
        // and store it again.
        warn!(file_md5 = %file_md5, chunk_index, "Bitmap set but chunk object missing; re-storing");
        already_uploaded = false;
    }

    if !already_uploaded {
        let chunk_md5 = hex::encode(Md5::digest(&data));

        state
            .store
            .put(&path, &data, "application/octet-stream")
            .await
            .map_err(|e| {
                // No bitmap bit on storage failure.
                ApiError::Internal(Error::Storage(format!("chunk store failed: {e}")))
            })?;

        state
            .ledger
            .mark_uploaded(&user_id, &file_md5, chunk_index)
            .await?;

        if !meta_exists {
            state
                .db
                .chunks
                .insert(&file_md5, chunk_index, &chunk_md5, &path)
                .await?;
        }
        info!(user = %user.username, file_md5 = %file_md5, chunk_index, size = data.len(), "Chunk stored");
    }

    respond_with_progress(&state, &file_md5, &user_id, total_size).await
}

async fn respond_with_progress(
    state: &AppState,
    file_md5: &str,
    user_id: &str,
    total_size: i64,
) -> Result<Json<serde_json::Value>, ApiError> {
    let total = total_chunks(total_size);
    let uploaded = state.ledger.list_uploaded(user_id, file_md5, total).await?;
    let progress = progress_percent(uploaded.len(), total);

    Ok(ok(json!({
        "uploadedChunks": uploaded,
        "totalChunks": total,
        "progress": progress,
    })))
}

#[derive(Debug, Deserialize)]
pub struct StatusQuery {
    pub file_md5: String,
}

/// GET /api/v1/upload/status?file_md5=
pub async fn upload_status(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Query(query): Query<StatusQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let user_id = user.user_id.to_string();
    let file = state
        .db
        .files
        .find_by_md5_and_user(&query.file_md5, &user_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("file {}", query.file_md5)))?;

    let total = total_chunks(file.total_size);
    let uploaded = state
        .ledger
        .list_uploaded(&user_id, &query.file_md5, total)
        .await?;

    Ok(ok(json!({
        "fileMd5": query.file_md5,
        "fileName": file.file_name,
        "status": file.status,
        "uploadedChunks": uploaded,
        "totalChunks": total,
        "progress": progress_percent(uploaded.len(), total),
    })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeRequest {
    pub file_md5: String,
    pub file_name: String,
}

/// POST /api/v1/upload/merge
///
/// Composes the chunk objects into `merged/<fileName>`, flips the record to
/// MERGED, enqueues the ingest task in the same transaction, and returns a
/// pre-signed download URL.
pub async fn merge(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Json(req): Json<MergeRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let user_id = user.user_id.to_string();

    let file = state
        .db
        .files
        .find_by_md5_and_user(&req.file_md5, &user_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("file {}", req.file_md5)))?;

    if file.status == UploadStatus::Merged {
        return Err(ApiError::Conflict(format!(
            "file {} is already merged",
            req.file_md5
        )));
    }

    let chunks = state.db.chunks.list_by_md5(&req.file_md5).await?;
    let expected = total_chunks(file.total_size);
    if chunks.len() != expected {
        return Err(ApiError::BadRequest(format!(
            "incomplete chunks: expected {expected}, have {}",
            chunks.len()
        )));
    }

    // Every chunk object must still exist before composition starts.
    for chunk in &chunks {
        if state.store.stat(&chunk.storage_path).await?.is_none() {
            return Err(ApiError::BadRequest(format!(
                "chunk {} is missing from storage; re-upload it",
                chunk.chunk_index
            )));
        }
    }

    let sources: Vec<String> = chunks.iter().map(|c| c.storage_path.clone()).collect();
    let dest = merged_path(&req.file_name);

    state.store.compose(&sources, &dest).await?;

    if !state.store.exists(&dest).await? {
        return Err(ApiError::Internal(Error::Storage(format!(
            "composed object {dest} is missing after merge"
        ))));
    }

    // Source chunks are expendable once the composed object exists.
    pagoda_store::delete_all_best_effort(state.store.as_ref(), &sources).await;

    state.ledger.delete(&user_id, &req.file_md5).await?;

    let download_url = state.store.presign_get(&dest, PRESIGN_EXPIRY_SECS).await?;

    // Status flip and task enqueue commit together.
    let task_id = state
        .db
        .commit_merge(
            &req.file_md5,
            &user_id,
            &IngestPayload {
                file_md5: req.file_md5.clone(),
                file_path: download_url.clone(),
                file_name: req.file_name.clone(),
                user_id: user_id.clone(),
                org_tag: file.org_tag.clone(),
                is_public: file.is_public,
            },
        )
        .await?;

    info!(
        user = %user.username,
        file_md5 = %req.file_md5,
        task_id,
        "Merge complete; ingest task enqueued"
    );

    Ok(ok_with_message(
        "merge complete",
        json!({ "url": download_url }),
    ))
}

/// GET /api/v1/upload/supported-types
pub async fn supported_types() -> impl IntoResponse {
    ok(json!({
        "extensions": pagoda_core::file_types::supported_extensions(),
        "types": pagoda_core::file_types::supported_type_labels(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn total_chunks_rounds_up() {
        // 12 MiB -> 3 chunks.
        assert_eq!(total_chunks(12 * 1024 * 1024), 3);
        assert_eq!(total_chunks(5 * 1024 * 1024), 1);
        assert_eq!(total_chunks(5 * 1024 * 1024 + 1), 2);
        assert_eq!(total_chunks(0), 0);
        assert_eq!(total_chunks(-5), 0);
    }

    #[test]
    fn progress_truncates_to_two_decimals() {
        // 2 of 3 chunks: 66.666..% reported as 66.66%.
        assert_eq!(progress_percent(2, 3), 66.66);
        assert_eq!(progress_percent(3, 3), 100.0);
        assert_eq!(progress_percent(0, 3), 0.0);
        assert_eq!(progress_percent(0, 0), 0.0);
        assert_eq!(progress_percent(1, 2), 50.0);
    }
}
