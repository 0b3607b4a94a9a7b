//! Hybrid search endpoint.

use axum::extract::{Query, State};
use axum::response::IntoResponse;
use axum::Extension;
use serde::Deserialize;
use serde_json::json;

use crate::auth::AuthUser;
use crate::error::{ok, ApiError};
use crate::state::AppState;

/// Upper bound on requested result counts.
const MAX_TOP_K: usize = 100;

fn default_top_k() -> usize {
    10
}

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    pub query: String,
    #[serde(rename = "topK", default = "default_top_k")]
    pub top_k: usize,
}

/// GET /api/v1/search/hybrid?query=&topK=
pub async fn hybrid_search(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Query(params): Query<SearchQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let query = params.query.trim();
    if query.is_empty() {
        return Err(ApiError::BadRequest("query must not be empty".to_string()));
    }
    if params.top_k == 0 || params.top_k > MAX_TOP_K {
        return Err(ApiError::BadRequest(format!(
            "topK must be between 1 and {MAX_TOP_K}"
        )));
    }

    let results = state
        .search
        .search_with_permission(query, &user.user_id.to_string(), params.top_k)
        .await?;

    Ok(ok(json!({
        "results": results,
        "total": results.len(),
    })))
}
