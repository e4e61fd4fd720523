//! LLM-side enqueue and client-side poll fallback.

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use relay_core::metrics::{REQUESTS_DISPATCHED_TOTAL, REQUESTS_ENQUEUED_TOTAL};
use relay_core::{RequestId, ToolRequest};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, instrument};

use super::parse_code;
use crate::connection::StreamSignal;
use crate::errors::ApiError;
use crate::server::AppState;

/// Largest batch a single poll may take.
pub const MAX_POLL_BATCH: usize = 16;

/// Body of `POST /api/sessions/{code}/requests`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnqueueBody {
    /// Request ID; generated when absent.
    #[serde(default)]
    pub id: Option<RequestId>,
    /// Tool to run.
    pub tool_name: String,
    /// Tool arguments.
    #[serde(default)]
    pub params: Value,
}

/// Reply to an enqueue.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnqueueReply {
    /// ID under which the response will appear.
    pub request_id: RequestId,
    /// Queue length after the append.
    pub queue_length: usize,
}

/// POST /api/sessions/{code}/requests
#[instrument(skip_all, fields(session_code = %raw))]
pub async fn enqueue(
    State(state): State<AppState>,
    Path(raw): Path<String>,
    Json(body): Json<EnqueueBody>,
) -> Result<(StatusCode, Json<EnqueueReply>), ApiError> {
    let code = parse_code(&raw)?;
    let _ = state.sessions.touch(&code).await?;

    let request = ToolRequest::new(body.id.unwrap_or_default(), body.tool_name, body.params, code.clone());
    let queue_length = state.queue.enqueue(&code, &request).await?;
    metrics::counter!(REQUESTS_ENQUEUED_TOTAL).increment(1);

    let woken = state.registry.notify_session(&code, &StreamSignal::QueueReady);
    debug!(request_id = %request.id, tool = %request.tool_name, queue_length, woken, "request enqueued");

    Ok((
        StatusCode::ACCEPTED,
        Json(EnqueueReply {
            request_id: request.id,
            queue_length,
        }),
    ))
}

/// Query of the poll endpoint.
#[derive(Debug, Default, Deserialize)]
pub struct PollQuery {
    /// How many requests to take (1..=16, default 1).
    #[serde(default)]
    pub max: Option<usize>,
}

/// Reply to a poll.
#[derive(Debug, Serialize, Deserialize)]
pub struct PollReply {
    /// Dequeued requests, oldest first.
    pub requests: Vec<ToolRequest>,
}

/// GET /api/sessions/{code}/requests/next?max=N
#[instrument(skip_all, fields(session_code = %raw))]
pub async fn poll_next(
    State(state): State<AppState>,
    Path(raw): Path<String>,
    Query(query): Query<PollQuery>,
) -> Result<Json<PollReply>, ApiError> {
    let code = parse_code(&raw)?;
    let _ = state.client_activity(&code).await?;

    let max = query.max.unwrap_or(1).clamp(1, MAX_POLL_BATCH);
    let requests = state.queue.dequeue_batch(&code, max).await?;
    if !requests.is_empty() {
        metrics::counter!(REQUESTS_DISPATCHED_TOTAL, "transport" => "poll")
            .increment(u64::try_from(requests.len()).unwrap_or(u64::MAX));
        debug!(count = requests.len(), "requests polled");
    }
    Ok(Json(PollReply { requests }))
}
