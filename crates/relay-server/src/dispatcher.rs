//! Per-session event stream: the server half of request delivery.
//!
//! One dispatcher runs per open stream. It emits `connected` first, then
//! multiplexes:
//!
//! - queue polls (on a fixed interval, or immediately when an enqueue signals
//!   the stream), each dequeued request becoming a `tool-request` event
//! - heartbeats on a fixed interval, preceded by a session liveness check
//! - out-of-band events from the [`StreamRegistry`]
//! - the idle deadline, measured from the last client activity
//! - server shutdown
//!
//! A wake dequeues at most [`DRAIN_BATCH`] requests. A longer backlog is
//! picked up on the next turn, after shutdown, heartbeats, and the idle
//! deadline have had a chance to run.
//!
//! Events leave in the order they are produced. A request is removed from the
//! queue before it is yielded; if the client disconnects in between, that
//! request is gone from the stream's point of view and only client-side
//! polling and dedup can recover.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::response::sse::Event;
use chrono::Utc;
use futures::Stream;
use relay_core::metrics::{REQUESTS_DISPATCHED_TOTAL, STREAMS_ACTIVE, STREAMS_CLOSED_TOTAL};
use relay_core::StreamEvent;
use relay_queue::{SessionQueueStore, SessionStore, StoreError};
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior, interval, interval_at, sleep_until};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::connection::{StreamConnection, StreamSignal};
use crate::errors::{SESSION_EXPIRED, SESSION_NOT_FOUND, SHUTTING_DOWN, STORAGE_ERROR};
use crate::registry::StreamRegistry;

/// Most requests dispatched per wake.
pub const DRAIN_BATCH: usize = 32;

/// Stream timing.
#[derive(Clone, Copy, Debug)]
pub struct DispatchTiming {
    /// Interval between heartbeats.
    pub heartbeat_interval: Duration,
    /// Close after this long without client activity.
    pub idle_timeout: Duration,
    /// Interval between queue polls.
    pub queue_poll_interval: Duration,
}

/// Everything one dispatcher needs.
pub struct DispatchContext {
    /// The registered connection.
    pub connection: Arc<StreamConnection>,
    /// Receiving end of the connection's signal channel.
    pub signals: mpsc::Receiver<StreamSignal>,
    /// Session queue.
    pub queue: SessionQueueStore,
    /// Session records.
    pub sessions: SessionStore,
    /// Registry the connection is removed from when the stream ends.
    pub registry: Arc<StreamRegistry>,
    /// Server shutdown token.
    pub shutdown: CancellationToken,
    /// Stream timing.
    pub timing: DispatchTiming,
}

enum Wake {
    Shutdown,
    Signal(Option<StreamSignal>),
    Heartbeat,
    Poll,
    IdleCheck,
}

/// Unregisters the connection when the stream is dropped, whether it ended
/// on its own or the client went away.
struct StreamGuard {
    registry: Arc<StreamRegistry>,
    connection: Arc<StreamConnection>,
    reason: &'static str,
}

impl StreamGuard {
    fn new(registry: Arc<StreamRegistry>, connection: Arc<StreamConnection>) -> Self {
        metrics::gauge!(STREAMS_ACTIVE).increment(1.0);
        Self {
            registry,
            connection,
            reason: "disconnected",
        }
    }
}

impl Drop for StreamGuard {
    fn drop(&mut self) {
        let _ = self.registry.remove(&self.connection.id);
        metrics::gauge!(STREAMS_ACTIVE).decrement(1.0);
        metrics::counter!(STREAMS_CLOSED_TOTAL, "reason" => self.reason).increment(1);
        info!(
            conn_id = %self.connection.id,
            session_code = %self.connection.session_code,
            reason = self.reason,
            age_secs = self.connection.connected_at.elapsed().as_secs(),
            "stream closed"
        );
    }
}

/// Run a dispatcher as a stream of typed events.
pub fn session_stream(ctx: DispatchContext) -> impl Stream<Item = StreamEvent> + Send + 'static {
    let DispatchContext {
        connection,
        mut signals,
        queue,
        sessions,
        registry,
        shutdown,
        timing,
    } = ctx;

    // created outside the generator so an unpolled stream still unregisters
    let guard = StreamGuard::new(registry, connection.clone());

    async_stream::stream! {
        let mut guard = guard;
        let code = connection.session_code.clone();
        info!(conn_id = %connection.id, session_code = %code, "stream opened");

        yield StreamEvent::Connected {
            session_code: code.clone(),
            connection_id: connection.id.clone(),
            timestamp: Utc::now(),
        };

        let mut poll = interval(timing.queue_poll_interval);
        poll.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut heartbeat = interval_at(
            Instant::now() + timing.heartbeat_interval,
            timing.heartbeat_interval,
        );
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut backlog = false;

        loop {
            let idle_deadline = connection.last_activity() + timing.idle_timeout;
            let wake = tokio::select! {
                biased;
                () = shutdown.cancelled() => Wake::Shutdown,
                signal = signals.recv() => Wake::Signal(signal),
                _ = heartbeat.tick() => Wake::Heartbeat,
                _ = poll.tick() => Wake::Poll,
                () = sleep_until(idle_deadline) => Wake::IdleCheck,
                () = std::future::ready(()), if backlog => Wake::Poll,
            };

            match wake {
                Wake::Shutdown => {
                    guard.reason = "shutdown";
                    yield StreamEvent::error(SHUTTING_DOWN, "server is shutting down");
                    break;
                }
                Wake::Signal(None) => break,
                Wake::Signal(Some(StreamSignal::Event(event))) => {
                    debug!(session_code = %code, event = event.event_name(), "forwarding event");
                    yield event;
                }
                Wake::Signal(Some(StreamSignal::QueueReady)) | Wake::Poll => {
                    let mut failed = None;
                    let mut dispatched = 0;
                    while dispatched < DRAIN_BATCH {
                        match queue.dequeue(&code).await {
                            Ok(Some(request)) => {
                                debug!(session_code = %code, request_id = %request.id, "dispatching request");
                                metrics::counter!(REQUESTS_DISPATCHED_TOTAL, "transport" => "stream").increment(1);
                                dispatched += 1;
                                yield StreamEvent::ToolRequest(request);
                            }
                            Ok(None) => break,
                            Err(err) => {
                                failed = Some(err);
                                break;
                            }
                        }
                    }
                    backlog = dispatched == DRAIN_BATCH;
                    if let Some(err) = failed {
                        warn!(session_code = %code, error = %err, "queue poll failed, closing stream");
                        guard.reason = "storage_error";
                        yield StreamEvent::error(STORAGE_ERROR, err.to_string());
                        break;
                    }
                }
                Wake::Heartbeat => match sessions.validate(&code).await {
                    Ok(_) => {
                        yield StreamEvent::heartbeat();
                    }
                    Err(StoreError::SessionExpired(_)) => {
                        guard.reason = "session_expired";
                        yield StreamEvent::error(SESSION_EXPIRED, format!("session {code} has expired"));
                        break;
                    }
                    Err(StoreError::SessionNotFound(_)) => {
                        guard.reason = "session_not_found";
                        yield StreamEvent::error(SESSION_NOT_FOUND, format!("session {code} no longer exists"));
                        break;
                    }
                    Err(err) => {
                        // liveness is about the transport; a store hiccup is not fatal here
                        warn!(session_code = %code, error = %err, "session check failed");
                        yield StreamEvent::heartbeat();
                    }
                },
                Wake::IdleCheck => {
                    if connection.idle_elapsed() >= timing.idle_timeout {
                        guard.reason = "idle_timeout";
                        yield StreamEvent::Timeout {
                            idle_secs: timing.idle_timeout.as_secs(),
                        };
                        break;
                    }
                }
            }
        }
    }
}

/// Encode a typed event as an SSE frame.
pub fn sse_event(event: &StreamEvent) -> Result<Event, Infallible> {
    let mut frame = Event::default().event(event.event_name()).data(event.data_json());
    if let StreamEvent::ToolRequest(request) = event {
        frame = frame.id(request.id.as_str());
    }
    Ok(frame)
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
