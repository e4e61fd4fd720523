//! `GET /api/sessions/{code}/stream`: the SSE endpoint.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::response::sse::Sse;
use axum::response::{IntoResponse, Response};
use futures::StreamExt;
use tracing::instrument;

use super::parse_code;
use crate::connection::StreamConnection;
use crate::dispatcher::{self, DispatchContext, DispatchTiming};
use crate::errors::ApiError;
use crate::server::AppState;

/// Open a session stream.
///
/// The session is validated (and its TTL refreshed) before the stream starts,
/// so an unknown or expired session gets a plain HTTP error instead of an
/// event stream.
#[instrument(skip_all, fields(session_code = %raw))]
pub async fn open_stream(
    State(state): State<AppState>,
    Path(raw): Path<String>,
) -> Result<Response, ApiError> {
    let code = parse_code(&raw)?;
    let _ = state.sessions.touch(&code).await?;

    let (connection, signals) = StreamConnection::new(code, state.config.stream_buffer);
    let connection = Arc::new(connection);
    state.registry.add(connection.clone());

    let events = dispatcher::session_stream(DispatchContext {
        connection,
        signals,
        queue: state.queue.clone(),
        sessions: state.sessions.clone(),
        registry: state.registry.clone(),
        shutdown: state.shutdown.token(),
        timing: DispatchTiming {
            heartbeat_interval: state.config.heartbeat_interval,
            idle_timeout: state.config.idle_timeout,
            queue_poll_interval: state.config.queue_poll_interval,
        },
    })
    .map(|event| dispatcher::sse_event(&event));

    Ok(Sse::new(events).into_response())
}
