//! API error type and the uniform response envelope.
//!
//! Every response body is `{code, message, data}`; `code` mirrors the HTTP
//! status. Expected business errors keep their message; infrastructure
//! failures are logged with context and surfaced as a generic 5xx, never as
//! raw internals.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use serde_json::json;
use tracing::error;

/// Error shape returned by every handler.
#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    /// 400 with the file-type details the upload gate produces.
    UnsupportedType {
        message: String,
        file_type: String,
    },
    Unauthorized(String),
    Forbidden(String),
    NotFound(String),
    Conflict(String),
    TooManyRequests(String),
    Internal(pagoda_core::Error),
}

impl From<pagoda_core::Error> for ApiError {
    fn from(err: pagoda_core::Error) -> Self {
        use pagoda_core::Error;
        match err {
            Error::NotFound(msg) => ApiError::NotFound(msg),
            Error::InvalidInput(msg) => ApiError::BadRequest(msg),
            Error::UnsupportedType(msg) => ApiError::BadRequest(msg),
            Error::Conflict(msg) => ApiError::Conflict(msg),
            Error::Unauthorized(msg) => ApiError::Unauthorized(msg),
            Error::Forbidden(msg) => ApiError::Forbidden(msg),
            Error::RateLimited(msg) => ApiError::TooManyRequests(msg),
            Error::Database(ref db_err) => {
                if let Some(db) = db_err.as_database_error() {
                    if db.is_unique_violation() {
                        return ApiError::Conflict("resource already exists".to_string());
                    }
                }
                ApiError::Internal(err)
            }
            other => ApiError::Internal(other),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message, extra) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg, None),
            ApiError::UnsupportedType { message, file_type } => {
                (StatusCode::BAD_REQUEST, message, Some(file_type))
            }
            ApiError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg, None),
            ApiError::Forbidden(msg) => (StatusCode::FORBIDDEN, msg, None),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg, None),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, msg, None),
            ApiError::TooManyRequests(msg) => (StatusCode::TOO_MANY_REQUESTS, msg, None),
            ApiError::Internal(err) => {
                error!(error = %err, "Request failed with internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal server error".to_string(),
                    None,
                )
            }
        };

        let mut body = json!({
            "code": status.as_u16(),
            "message": message,
            "data": null,
        });
        if let Some(file_type) = extra {
            body["fileType"] = json!(file_type);
            body["supportedTypes"] = json!(pagoda_core::file_types::supported_type_labels());
        }

        (status, Json(body)).into_response()
    }
}

/// Successful envelope: `{code: 200, message: "success", data}`.
pub fn ok<T: Serialize>(data: T) -> Json<serde_json::Value> {
    Json(json!({
        "code": 200,
        "message": "success",
        "data": data,
    }))
}

/// Successful envelope with a custom message.
pub fn ok_with_message<T: Serialize>(message: &str, data: T) -> Json<serde_json::Value> {
    Json(json!({
        "code": 200,
        "message": message,
        "data": data,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_mirrors_status() {
        let response = ApiError::NotFound("file x".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn internal_errors_are_not_leaked() {
        let err: ApiError =
            pagoda_core::Error::Search("cluster exploded at 10.0.0.3".to_string()).into();
        match err {
            ApiError::Internal(_) => {}
            other => panic!("expected Internal, got {other:?}"),
        }
    }

    #[test]
    fn business_errors_keep_their_class() {
        let err: ApiError = pagoda_core::Error::Conflict("duplicate tag".to_string()).into();
        assert!(matches!(err, ApiError::Conflict(_)));

        let err: ApiError = pagoda_core::Error::InvalidInput("bad index".to_string()).into();
        assert!(matches!(err, ApiError::BadRequest(_)));

        let err: ApiError = pagoda_core::Error::Forbidden("tag mismatch".to_string()).into();
        assert!(matches!(err, ApiError::Forbidden(_)));
    }

    #[test]
    fn ok_envelope_shape() {
        let Json(body) = ok(json!({"x": 1}));
        assert_eq!(body["code"], 200);
        assert_eq!(body["message"], "success");
        assert_eq!(body["data"]["x"], 1);
    }
}
