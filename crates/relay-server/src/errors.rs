//! HTTP error codes and the handler error type.
//!
//! Every error body is `{"error": message, "code": CODE}` plus optional
//! extra fields.

use axum::http::header::RETRY_AFTER;
use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use relay_core::RateLimitError;
use relay_core::constants::SUPPORTED_API_VERSIONS;
use relay_queue::StoreError;
use serde_json::{Value, json};
use tracing::{error, warn};

// ── Error code constants ────────────────────────────────────────────

/// Session code is malformed.
pub const INVALID_SESSION: &str = "INVALID_SESSION";
/// Session does not exist.
pub const SESSION_NOT_FOUND: &str = "SESSION_NOT_FOUND";
/// Session TTL has elapsed.
pub const SESSION_EXPIRED: &str = "SESSION_EXPIRED";
/// Request body failed validation.
pub const INVALID_REQUEST: &str = "INVALID_REQUEST";
/// Inbound rate limit hit.
pub const RATE_LIMITED: &str = "RATE_LIMITED";
/// Requested metadata API version is not served.
pub const VERSION_NOT_SUPPORTED: &str = "VERSION_NOT_SUPPORTED";
/// Backing store failed.
pub const STORAGE_ERROR: &str = "STORAGE_ERROR";
/// Resource conflict.
pub const CONFLICT: &str = "CONFLICT";
/// Server is shutting down.
pub const SHUTTING_DOWN: &str = "SHUTTING_DOWN";

/// Error type returned by HTTP handlers.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Malformed session code.
    #[error("{0}")]
    InvalidSession(String),

    /// Unknown session.
    #[error("session not found: {0}")]
    SessionNotFound(String),

    /// Expired session.
    #[error("session expired: {0}")]
    SessionExpired(String),

    /// Body or query failed validation.
    #[error("{0}")]
    InvalidRequest(String),

    /// Caller must wait before retrying.
    #[error("rate limited, retry after {}ms", .0.retry_after_ms)]
    RateLimited(RateLimitError),

    /// `Accept-Version` names a version this server does not serve.
    #[error("API version {requested} is not supported")]
    VersionNotSupported {
        /// Version the caller asked for.
        requested: String,
    },

    /// Resource already exists.
    #[error("{0}")]
    Conflict(String),

    /// Store failure.
    #[error("{0}")]
    Storage(String),
}

impl ApiError {
    /// Machine-readable code for this variant.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidSession(_) => INVALID_SESSION,
            Self::SessionNotFound(_) => SESSION_NOT_FOUND,
            Self::SessionExpired(_) => SESSION_EXPIRED,
            Self::InvalidRequest(_) => INVALID_REQUEST,
            Self::RateLimited(_) => RATE_LIMITED,
            Self::VersionNotSupported { .. } => VERSION_NOT_SUPPORTED,
            Self::Conflict(_) => CONFLICT,
            Self::Storage(_) => STORAGE_ERROR,
        }
    }

    /// HTTP status for this variant.
    pub fn status(&self) -> StatusCode {
        match self {
            Self::InvalidSession(_) | Self::SessionNotFound(_) => StatusCode::UNAUTHORIZED,
            Self::SessionExpired(_) => StatusCode::FORBIDDEN,
            Self::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            Self::RateLimited(_) => StatusCode::TOO_MANY_REQUESTS,
            Self::VersionNotSupported { .. } => StatusCode::NOT_ACCEPTABLE,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::Storage(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    fn body(&self) -> Value {
        let mut body = json!({ "error": self.to_string(), "code": self.code() });
        match self {
            Self::VersionNotSupported { requested } => {
                body["requestedVersion"] = json!(requested);
                body["supportedVersions"] = json!(SUPPORTED_API_VERSIONS);
            }
            Self::RateLimited(err) => {
                body["retryAfterMs"] = json!(err.retry_after_ms);
            }
            _ => {}
        }
        body
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Storage(e) => Self::Storage(e.to_string()),
            StoreError::Invalid(e) => Self::InvalidRequest(e.message),
            StoreError::SessionNotFound(code) => Self::SessionNotFound(code.to_string()),
            StoreError::SessionExpired(code) => Self::SessionExpired(code.to_string()),
            StoreError::SessionExists(code) => {
                Self::Conflict(format!("session already exists: {code}"))
            }
        }
    }
}

impl From<RateLimitError> for ApiError {
    fn from(err: RateLimitError) -> Self {
        Self::RateLimited(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(code = self.code(), error = %self, "request failed");
        } else {
            warn!(code = self.code(), error = %self, "request rejected");
        }
        let mut response = (status, Json(self.body())).into_response();
        if let Self::RateLimited(err) = &self {
            let secs = err.retry_after_ms.div_ceil(1000).max(1);
            let _ = response
                .headers_mut()
                .insert(RETRY_AFTER, HeaderValue::from(secs));
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_core::{SessionCode, StorageError};

    async fn body_of(err: ApiError) -> (StatusCode, Value, Option<String>) {
        let resp = err.into_response();
        let status = resp.status();
        let retry = resp
            .headers()
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned);
        let bytes = axum::body::to_bytes(resp.into_body(), 10_000).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap(), retry)
    }

    #[tokio::test]
    async fn session_errors_map_to_auth_statuses() {
        let code = SessionCode::parse("ABCD2345").unwrap();
        let (status, body, _) = body_of(StoreError::SessionNotFound(code.clone()).into()).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["code"], SESSION_NOT_FOUND);

        let (status, body, _) = body_of(StoreError::SessionExpired(code).into()).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["code"], SESSION_EXPIRED);
    }

    #[tokio::test]
    async fn rate_limited_sets_retry_after_seconds() {
        let (status, body, retry) =
            body_of(RateLimitError { retry_after_ms: 1500 }.into()).await;
        assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(body["retryAfterMs"], 1500);
        assert_eq!(retry.as_deref(), Some("2"));
    }

    #[tokio::test]
    async fn version_not_supported_lists_versions() {
        let (status, body, _) = body_of(ApiError::VersionNotSupported {
            requested: "9.0.0".into(),
        })
        .await;
        assert_eq!(status, StatusCode::NOT_ACCEPTABLE);
        assert_eq!(body["code"], VERSION_NOT_SUPPORTED);
        assert_eq!(body["requestedVersion"], "9.0.0");
        assert_eq!(body["supportedVersions"][0], "1.0.0");
    }

    #[tokio::test]
    async fn storage_failure_is_unavailable() {
        let (status, body, _) =
            body_of(StoreError::Storage(StorageError::new("down")).into()).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["code"], STORAGE_ERROR);
        assert!(body["error"].as_str().unwrap().contains("down"));
    }
}
