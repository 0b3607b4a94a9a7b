//! Admin surface: organization tag CRUD and user tag assignment.
//!
//! All routes here sit behind the admin middleware. Tag mutations
//! invalidate the effective-tag cache — globally for tag create/update/
//! delete, per user for reassignment.

use axum::extract::{Path, Query, State};
use axum::response::IntoResponse;
use axum::{Extension, Json};
use serde::Deserialize;
use serde_json::json;
use tracing::info;

use pagoda_core::tags::{validate_tag_id, would_form_cycle, DEFAULT_TAG};
use pagoda_core::{Error, TagRepository, UserRepository};
use pagoda_db::{CreateTagRequest, UpdateTagRequest};

use crate::auth::AuthUser;
use crate::error::{ok, ok_with_message, ApiError};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTagBody {
    pub tag_id: String,
    pub name: String,
    pub description: Option<String>,
    pub parent_tag: Option<String>,
}

/// POST /api/v1/admin/tags
pub async fn create_tag(
    State(state): State<AppState>,
    Extension(admin): Extension<AuthUser>,
    Json(body): Json<CreateTagBody>,
) -> Result<impl IntoResponse, ApiError> {
    if !validate_tag_id(&body.tag_id) {
        return Err(ApiError::BadRequest(format!(
            "'{}' is not a valid tag id",
            body.tag_id
        )));
    }

    if let Some(ref parent) = body.parent_tag {
        if !state.db.tags.exists(parent).await? {
            return Err(ApiError::BadRequest(format!(
                "parent tag '{parent}' does not exist"
            )));
        }
    }

    let tag = state
        .db
        .tags
        .create(CreateTagRequest {
            tag_id: body.tag_id,
            name: body.name,
            description: body.description,
            parent_tag: body.parent_tag,
            created_by: admin.username.clone(),
        })
        .await?;

    state.tag_resolver.invalidate_all().await?;
    info!(admin = %admin.username, tag = %tag.tag_id, "Tag created");
    Ok(ok(tag))
}

/// GET /api/v1/admin/tags
pub async fn list_tags(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let tags = state.db.tags.list().await?;
    Ok(ok(json!({ "tags": tags, "total": tags.len() })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateTagBody {
    pub name: Option<String>,
    pub description: Option<String>,
    /// Present-and-null clears the parent; absent leaves it unchanged.
    #[serde(default, with = "double_option")]
    pub parent_tag: Option<Option<String>>,
}

/// Distinguish "field absent" from "field null" for parent updates.
mod double_option {
    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D>(de: D) -> Result<Option<Option<String>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Option::<String>::deserialize(de).map(Some)
    }
}

/// PUT /api/v1/admin/tags/{tagId}
///
/// Re-parenting refuses any choice that appears in the proposed parent's
/// ancestor chain, the tag itself included. Comparisons are byte-exact.
pub async fn update_tag(
    State(state): State<AppState>,
    Extension(admin): Extension<AuthUser>,
    Path(tag_id): Path<String>,
    Json(body): Json<UpdateTagBody>,
) -> Result<impl IntoResponse, ApiError> {
    if !state.db.tags.exists(&tag_id).await? {
        return Err(ApiError::NotFound(format!("tag '{tag_id}'")));
    }

    if let Some(Some(ref new_parent)) = body.parent_tag {
        if !state.db.tags.exists(new_parent).await? {
            return Err(ApiError::BadRequest(format!(
                "parent tag '{new_parent}' does not exist"
            )));
        }
        if would_form_cycle(&state.db.tags, &tag_id, new_parent).await? {
            return Err(ApiError::Conflict(
                "setting this parent would create a cycle in the tag hierarchy".to_string(),
            ));
        }
    }

    let tag = state
        .db
        .tags
        .update(
            &tag_id,
            UpdateTagRequest {
                name: body.name,
                description: body.description,
                parent_tag: body.parent_tag,
            },
        )
        .await?;

    state.tag_resolver.invalidate_all().await?;
    info!(admin = %admin.username, tag = %tag_id, "Tag updated");
    Ok(ok(tag))
}

/// DELETE /api/v1/admin/tags/{tagId}
pub async fn delete_tag(
    State(state): State<AppState>,
    Extension(admin): Extension<AuthUser>,
    Path(tag_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    state.db.tags.delete(&tag_id).await?;
    state.tag_resolver.invalidate_all().await?;
    info!(admin = %admin.username, tag = %tag_id, "Tag deleted");
    Ok(ok_with_message("tag deleted", json!(null)))
}

#[derive(Debug, Deserialize)]
pub struct ListUsersQuery {
    #[serde(default = "default_limit")]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
}

fn default_limit() -> i64 {
    50
}

/// GET /api/v1/admin/users
pub async fn list_users(
    State(state): State<AppState>,
    Query(query): Query<ListUsersQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let users = state
        .db
        .users
        .list(query.limit.clamp(1, 500), query.offset.max(0))
        .await?;
    Ok(ok(json!({ "users": users, "total": users.len() })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignTagsBody {
    pub org_tags: Vec<String>,
    pub primary_org: Option<String>,
}

/// PUT /api/v1/admin/users/{username}/tags
///
/// Replaces a user's assigned tag set. Every named tag must exist; the
/// primary tag must be in the set (or be the default).
pub async fn assign_user_tags(
    State(state): State<AppState>,
    Extension(admin): Extension<AuthUser>,
    Path(username): Path<String>,
    Json(body): Json<AssignTagsBody>,
) -> Result<impl IntoResponse, ApiError> {
    for tag in &body.org_tags {
        if !state.db.tags.exists(tag).await? {
            return Err(ApiError::BadRequest(format!("tag '{tag}' does not exist")));
        }
    }

    if let Some(ref primary) = body.primary_org {
        let in_set = body.org_tags.iter().any(|t| t == primary);
        if !in_set && primary != DEFAULT_TAG {
            return Err(ApiError::BadRequest(format!(
                "primary tag '{primary}' must be one of the assigned tags"
            )));
        }
    }

    state
        .db
        .users
        .update_org_tags(&username, &body.org_tags, body.primary_org.as_deref())
        .await
        .map_err(|e| match e {
            Error::NotFound(msg) => ApiError::NotFound(msg),
            other => ApiError::from(other),
        })?;

    state.tag_resolver.invalidate_user(&username).await?;
    info!(admin = %admin.username, user = %username, tags = body.org_tags.len(), "User tags reassigned");
    Ok(ok_with_message("tags updated", json!(null)))
}
