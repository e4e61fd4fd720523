//! Response delivery (client side) and retrieval (LLM side).

use std::time::Duration;

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use relay_core::constants::{HEADER_RATELIMIT_LIMIT, HEADER_RATELIMIT_REMAINING};
use relay_core::metrics::{RATE_LIMITED_TOTAL, RESPONSES_STORED_TOTAL};
use relay_core::{BatchId, RequestId, ResponseBatch};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, instrument};

use super::parse_code;
use crate::errors::ApiError;
use crate::server::AppState;

/// Reply to a delivered batch.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchReply {
    /// Batch that was stored.
    pub batch_id: BatchId,
    /// Responses stored.
    pub stored: usize,
}

/// POST /api/sessions/{code}/responses
///
/// Rate limited per session. Every reply carries the limiter's view in
/// `x-ratelimit-limit`/`x-ratelimit-remaining`; a refusal is a 429 with
/// `retry-after`.
#[instrument(skip_all, fields(session_code = %raw))]
pub async fn post_batch(
    State(state): State<AppState>,
    Path(raw): Path<String>,
    Json(batch): Json<ResponseBatch>,
) -> Result<Response, ApiError> {
    let code = parse_code(&raw)?;
    let _ = state.client_activity(&code).await?;

    let limiter = state.limiter_for(&code);
    if let Err(err) = limiter.allow_request() {
        metrics::counter!(RATE_LIMITED_TOTAL, "side" => "server").increment(1);
        let mut response = ApiError::from(err).into_response();
        insert_limit_headers(response.headers_mut(), limiter.limit(), 0);
        return Ok(response);
    }

    if batch.responses.iter().any(|r| r.request_id.is_empty()) {
        return Err(ApiError::InvalidRequest(
            "every response needs a request id".into(),
        ));
    }

    let stored = state.responses.store_batch(&code, &batch).await?;
    metrics::counter!(RESPONSES_STORED_TOTAL).increment(u64::try_from(stored).unwrap_or(u64::MAX));
    debug!(batch_id = %batch.id, stored, "response batch accepted");

    let mut response = Json(BatchReply {
        batch_id: batch.id,
        stored,
    })
    .into_response();
    insert_limit_headers(response.headers_mut(), limiter.limit(), limiter.remaining());
    Ok(response)
}

fn insert_limit_headers(headers: &mut HeaderMap, limit: u32, remaining: u32) {
    let _ = headers.insert(HEADER_RATELIMIT_LIMIT, HeaderValue::from(limit));
    let _ = headers.insert(HEADER_RATELIMIT_REMAINING, HeaderValue::from(remaining));
}

/// Query of the retrieval endpoint.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WaitQuery {
    /// Long-poll for up to this many milliseconds.
    #[serde(default)]
    pub wait_ms: Option<u64>,
}

/// GET /api/sessions/{code}/responses/{request_id}?waitMs=
///
/// 200 with the response once it exists, 202 while pending.
#[instrument(skip_all, fields(session_code = %raw, request_id = %request_id))]
pub async fn get_response(
    State(state): State<AppState>,
    Path((raw, request_id)): Path<(String, String)>,
    Query(query): Query<WaitQuery>,
) -> Result<Response, ApiError> {
    let code = parse_code(&raw)?;
    let _ = state.sessions.validate(&code).await?;
    let request_id = RequestId::from(request_id);

    let wait = Duration::from_millis(query.wait_ms.unwrap_or(0)).min(state.config.max_response_wait);
    let found = if wait.is_zero() {
        state.responses.get(&code, &request_id).await?
    } else {
        state.responses.wait_for(&code, &request_id, wait).await?
    };

    Ok(match found {
        Some(response) => Json(response).into_response(),
        None => (
            StatusCode::ACCEPTED,
            Json(json!({ "status": "pending", "requestId": request_id })),
        )
            .into_response(),
    })
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;
    use relay_core::{RateLimiterConfig, ToolResponse};
    use serde_json::{Value, json};
    use std::sync::Arc;

    fn batch(ids: &[&str]) -> Value {
        let responses = ids
            .iter()
            .map(|id| ToolResponse::success(RequestId::from(*id), json!({ "ok": id })))
            .collect();
        serde_json::to_value(ResponseBatch::new(responses)).unwrap()
    }

    #[tokio::test]
    async fn batch_stored_and_retrievable() {
        let app = server().router();
        let code = create_session(&app).await;

        let resp = send(&app, json_request("POST", &format!("/api/sessions/{code}/responses"), &batch(&["r1", "r2"]))).await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert!(resp.headers().contains_key(HEADER_RATELIMIT_LIMIT));
        assert!(resp.headers().contains_key(HEADER_RATELIMIT_REMAINING));
        assert_eq!(json_body(resp).await["stored"], 2);

        let resp = send(&app, get(&format!("/api/sessions/{code}/responses/r2"))).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let body = json_body(resp).await;
        assert_eq!(body["requestId"], "r2");
        assert_eq!(body["status"], "success");
        assert_eq!(body["result"]["ok"], "r2");
    }

    #[tokio::test]
    async fn missing_response_is_pending() {
        let app = server().router();
        let code = create_session(&app).await;
        let resp = send(&app, get(&format!("/api/sessions/{code}/responses/nope"))).await;
        assert_eq!(resp.status(), StatusCode::ACCEPTED);
        assert_eq!(json_body(resp).await["status"], "pending");
    }

    #[tokio::test]
    async fn long_poll_returns_when_response_arrives() {
        let server = server();
        let app = server.router();
        let code = create_session(&app).await;

        let waiter = {
            let app = app.clone();
            let code = code.clone();
            tokio::spawn(async move {
                send(&app, get(&format!("/api/sessions/{code}/responses/r1?waitMs=5000"))).await
            })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        let _ = send(&app, json_request("POST", &format!("/api/sessions/{code}/responses"), &batch(&["r1"]))).await;

        let resp = waiter.await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn burst_beyond_limit_gets_429_with_retry_after() {
        let config = crate::config::ServerConfig {
            response_rate_limit: RateLimiterConfig {
                requests_per_second: 10,
                burst_size: 2,
                window_ms: 1000,
            },
            ..crate::config::ServerConfig::default()
        };
        let server = crate::server::RelayServer::new(config, Arc::new(relay_queue::MemoryStore::new()));
        let app = server.router();
        let code = create_session(&app).await;

        let uri = format!("/api/sessions/{code}/responses");
        for _ in 0..2 {
            let resp = send(&app, json_request("POST", &uri, &batch(&["r1"]))).await;
            assert_eq!(resp.status(), StatusCode::OK);
        }
        let resp = send(&app, json_request("POST", &uri, &batch(&["r1"]))).await;
        assert_eq!(resp.status(), StatusCode::TOO_MANY_REQUESTS);
        assert!(resp.headers().contains_key("retry-after"));
        assert_eq!(resp.headers()[HEADER_RATELIMIT_REMAINING], "0");
        assert_eq!(json_body(resp).await["code"], "RATE_LIMITED");
    }

    #[tokio::test]
    async fn expired_or_unknown_session_rejected() {
        let app = server().router();
        let resp = send(&app, json_request("POST", "/api/sessions/ABCD2345/responses", &batch(&["r1"]))).await;
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }
}
