//! Authentication: registration, login, session middleware, refresh, and
//! logout.
//!
//! Sessions are opaque handles validated against the KV store. The
//! middleware extracts `Bearer <handle>`, resolves the subject, and attaches
//! it as a request extension for downstream handlers and the authorization
//! guard.

use argon2::password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, SaltString};
use argon2::{Argon2, PasswordVerifier};
use axum::extract::{Request, State};
use axum::http::header;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::json;
use tracing::{info, warn};

use pagoda_core::tags::{private_tag_id, DEFAULT_TAG};
use pagoda_core::{CreateUserRequest, Error, UserRepository, UserRole};

use crate::error::{ok, ApiError};
use crate::state::AppState;

/// Authenticated caller, attached as a request extension.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user_id: i64,
    pub username: String,
    pub role: UserRole,
    /// Raw assigned tags captured at login; the guard checks these
    /// literally, without ancestor expansion.
    pub org_tags: Vec<String>,
    /// The presented session handle (needed for logout).
    pub handle: String,
}

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshRequest {
    pub refresh_token: String,
}

fn hash_password(password: &str) -> Result<String, ApiError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| ApiError::Internal(Error::Internal(format!("password hashing failed: {e}"))))
}

fn verify_password(password: &str, hash: &str) -> bool {
    PasswordHash::new(hash)
        .map(|parsed| {
            Argon2::default()
                .verify_password(password.as_bytes(), &parsed)
                .is_ok()
        })
        .unwrap_or(false)
}

fn check_rate_limit(state: &AppState) -> Result<(), ApiError> {
    if let Some(ref limiter) = state.rate_limiter {
        if limiter.check().is_err() {
            return Err(ApiError::TooManyRequests(
                "too many attempts; retry later".to_string(),
            ));
        }
    }
    Ok(())
}

/// POST /api/v1/users/register
///
/// Creates the account, the per-user private tag (set as primary), and the
/// `DEFAULT` tag when this is the first registration.
pub async fn register(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> Result<impl IntoResponse, ApiError> {
    check_rate_limit(&state)?;

    let username = req.username.trim().to_string();
    if username.is_empty() || req.password.is_empty() {
        return Err(ApiError::BadRequest(
            "username and password must not be empty".to_string(),
        ));
    }
    if username.len() > 64 {
        return Err(ApiError::BadRequest("username is too long".to_string()));
    }

    let password_hash = hash_password(&req.password)?;
    let private_tag = private_tag_id(&username);

    let user = state
        .db
        .users
        .create(CreateUserRequest {
            username: username.clone(),
            password_hash,
            role: UserRole::User,
            org_tags: vec![private_tag.clone()],
            primary_org: Some(private_tag.clone()),
        })
        .await
        .map_err(ApiError::from)?;

    // Well-known tags: the universal scope plus the user's private tag.
    state
        .db
        .tags
        .ensure(DEFAULT_TAG, "Everyone", Some("Universal scope"), &username)
        .await?;
    state
        .db
        .tags
        .ensure(
            &private_tag,
            &format!("{username} (private)"),
            Some("Personal workspace"),
            &username,
        )
        .await?;

    info!(user = %username, "User registered");
    Ok(ok(json!({
        "userId": user.id,
        "username": user.username,
    })))
}

/// POST /api/v1/users/login — issue session + refresh handles.
pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<impl IntoResponse, ApiError> {
    check_rate_limit(&state)?;

    if req.username.is_empty() || req.password.is_empty() {
        return Err(ApiError::BadRequest(
            "username and password must not be empty".to_string(),
        ));
    }

    let user = state
        .db
        .users
        .find_by_username(&req.username)
        .await?
        .filter(|u| verify_password(&req.password, &u.password_hash))
        .ok_or_else(|| ApiError::Unauthorized("invalid credentials".to_string()))?;

    let handle = state
        .sessions
        .create_session(user.id, &user.username, user.role, &user.org_tags)
        .await?;
    let refresh = state.sessions.create_refresh(user.id, &handle).await?;

    info!(user = %user.username, "Login succeeded");
    Ok(ok(json!({
        "token": handle,
        "refreshToken": refresh,
        "expiresIn": pagoda_core::defaults::SESSION_TTL_SECS,
    })))
}

/// POST /api/v1/auth/refreshToken — rotate both handles.
pub async fn refresh_token(
    State(state): State<AppState>,
    Json(req): Json<RefreshRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let record = state
        .sessions
        .validate_refresh(&req.refresh_token)
        .await?
        .ok_or_else(|| ApiError::Unauthorized("invalid refresh token".to_string()))?;

    let user = state
        .db
        .users
        .find_by_id(record.user_id)
        .await?
        .ok_or_else(|| ApiError::Unauthorized("account no longer exists".to_string()))?;

    // Rotation: the old pair dies with the new issuance.
    state.sessions.revoke(&record.session_handle).await?;
    state.sessions.revoke_refresh(&req.refresh_token).await?;

    let handle = state
        .sessions
        .create_session(user.id, &user.username, user.role, &user.org_tags)
        .await?;
    let refresh = state.sessions.create_refresh(user.id, &handle).await?;

    Ok(ok(json!({
        "token": handle,
        "refreshToken": refresh,
        "expiresIn": pagoda_core::defaults::SESSION_TTL_SECS,
    })))
}

/// POST /api/v1/users/logout — revoke the presented handle.
pub async fn logout(
    State(state): State<AppState>,
    axum::Extension(user): axum::Extension<AuthUser>,
) -> Result<impl IntoResponse, ApiError> {
    state.sessions.revoke(&user.handle).await?;
    Ok(ok(json!(null)))
}

/// POST /api/v1/users/logout-all — revoke every live handle of the caller.
pub async fn logout_all(
    State(state): State<AppState>,
    axum::Extension(user): axum::Extension<AuthUser>,
) -> Result<impl IntoResponse, ApiError> {
    state.sessions.revoke_all(user.user_id).await?;
    Ok(ok(json!(null)))
}

/// Extract `Bearer <handle>` from the Authorization header.
pub fn bearer_handle(request: &Request) -> Option<String> {
    request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(|v| v.to_string())
}

/// Session middleware: resolve the handle and attach [`AuthUser`].
pub async fn require_session(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Response {
    let Some(handle) = bearer_handle(&request) else {
        return ApiError::Unauthorized("missing session handle".to_string()).into_response();
    };

    match state.sessions.validate(&handle).await {
        Ok(Some(subject)) => {
            request.extensions_mut().insert(AuthUser {
                user_id: subject.user_id,
                username: subject.username,
                role: subject.role,
                org_tags: subject.org_tags,
                handle,
            });
            next.run(request).await
        }
        Ok(None) => ApiError::Unauthorized("invalid or expired session handle".to_string())
            .into_response(),
        Err(e) => {
            warn!(error = %e, "Session validation failed");
            ApiError::Internal(e).into_response()
        }
    }
}

/// Admin middleware: layered after [`require_session`] on `/admin` routes.
pub async fn require_admin(request: Request, next: Next) -> Response {
    match request.extensions().get::<AuthUser>() {
        Some(user) if user.role == UserRole::Admin => next.run(request).await,
        Some(_) => ApiError::Forbidden("administrator role required".to_string()).into_response(),
        None => ApiError::Unauthorized("missing session handle".to_string()).into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn password_hash_round_trip() {
        let hash = hash_password("hunter2").unwrap();
        assert!(hash.starts_with("$argon2"));
        assert!(verify_password("hunter2", &hash));
        assert!(!verify_password("hunter3", &hash));
    }

    #[test]
    fn verify_rejects_garbage_hashes() {
        assert!(!verify_password("x", "not-a-phc-string"));
    }
}
