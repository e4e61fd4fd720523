//! Transports: where a [`ConnectionManager`](crate::ConnectionManager) gets
//! its events from.
//!
//! Both transports produce the same typed [`StreamEvent`]s, so everything
//! above the manager is transport-agnostic. Closing a transport means
//! dropping its stream.

use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use eventsource_stream::Eventsource;
use futures::{Stream, StreamExt};
use relay_core::{ConnectionError, ConnectionId, SessionCode, StreamEvent};
use reqwest::header::{ACCEPT, CACHE_CONTROL};
use tracing::{debug, warn};

use crate::api::{RelayApi, connection_error};
use crate::errors::DeliveryError;
use crate::status::TransportKind;

/// Largest batch one poll asks for.
pub const POLL_BATCH: usize = 16;

/// Events from an open transport. The stream ends when the transport closes.
pub type EventStream = Pin<Box<dyn Stream<Item = Result<StreamEvent, ConnectionError>> + Send>>;

/// A way to receive a session's events.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Which transport this is.
    fn kind(&self) -> TransportKind;

    /// Open the transport. Resolves once the server has accepted it.
    async fn open(&self) -> Result<EventStream, ConnectionError>;
}

// ─────────────────────────────────────────────────────────────────────────────
// Server-sent events
// ─────────────────────────────────────────────────────────────────────────────

/// Server-sent event stream on `GET /api/sessions/{code}/stream`.
pub struct SseTransport {
    api: RelayApi,
    session_code: SessionCode,
}

impl SseTransport {
    /// Stream transport for a session.
    pub fn new(api: RelayApi, session_code: SessionCode) -> Self {
        Self { api, session_code }
    }
}

#[async_trait]
impl Transport for SseTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Stream
    }

    async fn open(&self) -> Result<EventStream, ConnectionError> {
        let url = self.api.session_url(&self.session_code, "stream");
        let resp = self
            .api
            .http()
            .get(&url)
            .header(ACCEPT, "text/event-stream")
            .header(CACHE_CONTROL, "no-cache")
            .send()
            .await
            .map_err(|e| connection_error(&e))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ConnectionError::from_status(
                status.as_u16(),
                format!("stream refused: {body}"),
            ));
        }
        debug!(session_code = %self.session_code, "event stream opened");

        let events = resp.bytes_stream().eventsource().filter_map(|frame| async move {
            match frame {
                Ok(frame) => match StreamEvent::from_sse(&frame.event, &frame.data) {
                    Ok(event) => Some(Ok(event)),
                    Err(err) => {
                        warn!(event = %frame.event, error = %err, "dropping malformed event");
                        None
                    }
                },
                Err(err) => Some(Err(ConnectionError::network(err.to_string()))),
            }
        });
        Ok(Box::pin(events))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Poll fallback
// ─────────────────────────────────────────────────────────────────────────────

/// Polls `GET /api/sessions/{code}/requests/next`.
///
/// Emits a synthetic `connected` on open and a `heartbeat` after every
/// successful poll, so the manager's liveness check works unchanged.
pub struct PollTransport {
    api: RelayApi,
    session_code: SessionCode,
    interval: Duration,
}

impl PollTransport {
    /// Poll transport for a session.
    pub fn new(api: RelayApi, session_code: SessionCode, interval: Duration) -> Self {
        Self {
            api,
            session_code,
            interval,
        }
    }
}

fn poll_failure(err: DeliveryError) -> ConnectionError {
    match err {
        DeliveryError::Connection(err) => err,
        DeliveryError::RateLimited { .. } => ConnectionError::from_status(429, err.to_string()),
        DeliveryError::Status { status, body } => ConnectionError::from_status(status, body),
    }
}

#[async_trait]
impl Transport for PollTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Poll
    }

    async fn open(&self) -> Result<EventStream, ConnectionError> {
        let session = self
            .api
            .get_session(&self.session_code)
            .await
            .map_err(poll_failure)?;
        debug!(session_code = %session.code, interval_ms = u64::try_from(self.interval.as_millis()).unwrap_or(u64::MAX), "polling opened");

        let api = self.api.clone();
        let code = self.session_code.clone();
        let interval = self.interval;
        let events = async_stream::stream! {
            yield Ok(StreamEvent::Connected {
                session_code: code.clone(),
                connection_id: ConnectionId::new(),
                timestamp: Utc::now(),
            });
            loop {
                match api.poll(&code, POLL_BATCH).await {
                    Ok(requests) => {
                        let drained = requests.len() == POLL_BATCH;
                        for request in requests {
                            yield Ok(StreamEvent::ToolRequest(request));
                        }
                        yield Ok(StreamEvent::heartbeat());
                        if drained {
                            continue;
                        }
                    }
                    Err(err) => {
                        yield Err(poll_failure(err));
                        break;
                    }
                }
                tokio::time::sleep(interval).await;
            }
        };
        Ok(Box::pin(events))
    }
}
