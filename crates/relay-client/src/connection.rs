//! Connection manager: keeps one transport open, watches heartbeats, and
//! reconnects with backoff.
//!
//! ```text
//! DISCONNECTED -> CONNECTING -> CONNECTED
//! CONNECTED -(error | heartbeat timeout)-> ERROR -> RECONNECTING -> CONNECTING ...
//! ```
//!
//! The loop stops in `ERROR` once `retry_count` exceeds the policy's
//! `max_attempts`, or at once for a fault the classifier does not retry.
//!
//! Each opened transport belongs to a generation. Every failure path
//! claims its generation with a compare-and-swap before acting, so one
//! dead connection produces exactly one error and one reconnect, however
//! many of (reader, heartbeat timer, connect attempt) notice it.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::Utc;
use futures::future::{BoxFuture, Shared};
use futures::{FutureExt, StreamExt};
use parking_lot::Mutex;
use relay_core::metrics::RECONNECTS_TOTAL;
use relay_core::retry::RetryPolicy;
use relay_core::{ConnectionError, StreamEvent};
use relay_settings::ConnectionSettings;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::listeners::{Listener, ListenerSet};
use crate::status::{ConnectionState, ConnectionStatus, TransportKind};
use crate::timer::Timer;
use crate::transport::{EventStream, Transport};

type ConnectFuture = Shared<BoxFuture<'static, Result<(), ConnectionError>>>;

/// Connection timing and retry policy.
#[derive(Clone, Debug, PartialEq)]
pub struct ConnectionConfig {
    /// Declare the connection dead after this long without a heartbeat.
    pub heartbeat_timeout: Duration,
    /// Abandon a connect attempt after this long.
    pub connect_timeout: Duration,
    /// Interval of the poll transport.
    pub poll_interval: Duration,
    /// Reconnect policy.
    pub retry: RetryPolicy,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self::from_settings(&ConnectionSettings::default())
    }
}

impl ConnectionConfig {
    /// Build from the `client.connection` settings section.
    pub fn from_settings(settings: &ConnectionSettings) -> Self {
        Self {
            heartbeat_timeout: Duration::from_millis(settings.heartbeat_timeout_ms),
            connect_timeout: Duration::from_millis(settings.connect_timeout_ms),
            poll_interval: Duration::from_millis(settings.poll_interval_ms),
            retry: settings.retry.clone(),
        }
    }
}

struct Inner {
    config: ConnectionConfig,
    transport: Arc<dyn Transport>,
    status: Mutex<ConnectionStatus>,
    messages: ListenerSet<StreamEvent>,
    errors: ListenerSet<ConnectionError>,
    status_changes: ListenerSet<ConnectionStatus>,
    heartbeat_timer: Timer,
    reconnect_timer: Timer,
    reader: Mutex<Option<JoinHandle<()>>>,
    in_flight: Mutex<Option<(u64, ConnectFuture)>>,
    generation: AtomicU64,
    given_up: AtomicBool,
}

/// Owns one transport and turns it into a resilient event source.
pub struct ConnectionManager {
    inner: Arc<Inner>,
}

impl ConnectionManager {
    /// Manager over `transport`. Nothing happens until [`connect`](Self::connect).
    pub fn new(config: ConnectionConfig, transport: Arc<dyn Transport>) -> Self {
        let status = ConnectionStatus::new(transport.kind());
        Self {
            inner: Arc::new(Inner {
                config,
                transport,
                status: Mutex::new(status),
                messages: ListenerSet::new(),
                errors: ListenerSet::new(),
                status_changes: ListenerSet::new(),
                heartbeat_timer: Timer::new("heartbeat"),
                reconnect_timer: Timer::new("reconnect"),
                reader: Mutex::new(None),
                in_flight: Mutex::new(None),
                generation: AtomicU64::new(0),
                given_up: AtomicBool::new(false),
            }),
        }
    }

    /// Open the transport.
    ///
    /// No-op when already connected; joins the pending attempt when one is
    /// in flight. A failed attempt enters the reconnect loop and its error
    /// is returned.
    pub async fn connect(&self) -> Result<(), ConnectionError> {
        if self.inner.given_up.swap(false, Ordering::SeqCst) {
            self.inner.status.lock().retry_count = 0;
        }
        self.inner.connect().await
    }

    /// Close the transport, cancel every timer, and reset the retry count.
    pub fn disconnect(&self) {
        self.inner.disconnect();
    }

    /// Status snapshot.
    pub fn status(&self) -> ConnectionStatus {
        self.inner.status.lock().clone()
    }

    /// Current state.
    pub fn state(&self) -> ConnectionState {
        self.inner.status.lock().state
    }

    /// Transport in use.
    pub fn transport_kind(&self) -> TransportKind {
        self.inner.transport.kind()
    }

    /// Whether the manager stopped retrying and settled in `ERROR`.
    pub fn has_given_up(&self) -> bool {
        self.inner.given_up.load(Ordering::SeqCst)
    }

    /// Number of armed timers (heartbeat, reconnect).
    pub fn armed_timers(&self) -> usize {
        usize::from(self.inner.heartbeat_timer.is_armed())
            + usize::from(self.inner.reconnect_timer.is_armed())
    }

    /// Receive every inbound event, in arrival order.
    pub fn on_message(&self, listener: Listener<StreamEvent>) -> bool {
        self.inner.messages.add(listener)
    }

    /// Stop receiving events.
    pub fn off_message(&self, listener: &Listener<StreamEvent>) -> bool {
        self.inner.messages.remove(listener)
    }

    /// Receive connection faults.
    pub fn on_error(&self, listener: Listener<ConnectionError>) -> bool {
        self.inner.errors.add(listener)
    }

    /// Stop receiving faults.
    pub fn off_error(&self, listener: &Listener<ConnectionError>) -> bool {
        self.inner.errors.remove(listener)
    }

    /// Receive status transitions.
    pub fn on_status_change(&self, listener: Listener<ConnectionStatus>) -> bool {
        self.inner.status_changes.add(listener)
    }

    /// Stop receiving status transitions.
    pub fn off_status_change(&self, listener: &Listener<ConnectionStatus>) -> bool {
        self.inner.status_changes.remove(listener)
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        self.inner.teardown();
    }
}

impl Inner {
    fn connect(self: &Arc<Self>) -> ConnectFuture {
        let mut in_flight = self.in_flight.lock();
        if self.status.lock().state == ConnectionState::Connected {
            return futures::future::ready(Ok(())).boxed().shared();
        }
        if let Some((_, pending)) = in_flight.as_ref() {
            return pending.clone();
        }
        let generation = self.generation.load(Ordering::SeqCst);
        let inner = Arc::clone(self);
        let attempt = async move { inner.attempt(generation).await }.boxed().shared();
        *in_flight = Some((generation, attempt.clone()));
        attempt
    }

    async fn attempt(self: Arc<Self>, generation: u64) -> Result<(), ConnectionError> {
        let _ = self.reconnect_timer.cancel();
        let _ = self.update_status(|s| s.state = ConnectionState::Connecting);
        debug!(transport = %self.transport.kind(), generation, "connecting");

        let opened = tokio::time::timeout(self.config.connect_timeout, self.transport.open()).await;
        self.clear_in_flight(generation);

        let stream = match opened {
            Ok(Ok(stream)) => stream,
            Ok(Err(err)) => {
                self.fail(generation, err.clone());
                return Err(err);
            }
            Err(_) => {
                let err = ConnectionError::timeout(format!(
                    "connect timed out after {}ms",
                    self.config.connect_timeout.as_millis()
                ));
                self.fail(generation, err.clone());
                return Err(err);
            }
        };

        if self.generation.load(Ordering::SeqCst) != generation {
            debug!(generation, "connect attempt superseded");
            return Err(ConnectionError::network("connection attempt superseded"));
        }

        let status = self.update_status(|s| {
            s.state = ConnectionState::Connected;
            s.retry_count = 0;
            s.last_connected = Some(Utc::now());
            s.error = None;
        });
        info!(transport = %status.transport, "connected");
        self.arm_heartbeat(generation);
        self.spawn_reader(generation, stream);
        Ok(())
    }

    fn spawn_reader(self: &Arc<Self>, generation: u64, mut stream: EventStream) {
        let weak: Weak<Self> = Arc::downgrade(self);
        let handle = tokio::spawn(async move {
            while let Some(item) = stream.next().await {
                let Some(inner) = weak.upgrade() else { return };
                if inner.generation.load(Ordering::SeqCst) != generation {
                    return;
                }
                match item {
                    Ok(event) => {
                        let terminal = terminal_fault(&event);
                        inner.on_event(generation, &event);
                        if let Some(err) = terminal {
                            inner.fail(generation, err);
                            return;
                        }
                    }
                    Err(err) => {
                        inner.fail(generation, err);
                        return;
                    }
                }
            }
            if let Some(inner) = weak.upgrade() {
                inner.fail(generation, ConnectionError::network("stream closed"));
            }
        });
        if let Some(previous) = self.reader.lock().replace(handle) {
            previous.abort();
        }
    }

    fn on_event(self: &Arc<Self>, generation: u64, event: &StreamEvent) {
        if event.is_heartbeat() || matches!(event, StreamEvent::Connected { .. }) {
            self.arm_heartbeat(generation);
        }
        self.messages.emit(event);
    }

    fn arm_heartbeat(self: &Arc<Self>, generation: u64) {
        let weak = Arc::downgrade(self);
        let timeout = self.config.heartbeat_timeout;
        self.heartbeat_timer.schedule(timeout, async move {
            if let Some(inner) = weak.upgrade() {
                let err = ConnectionError::timeout(format!(
                    "no heartbeat within {}ms",
                    timeout.as_millis()
                ));
                inner.fail(generation, err);
            }
        });
    }

    /// Handle the death of `generation`'s connection. Only the first caller
    /// per generation acts.
    fn fail(self: &Arc<Self>, generation: u64, err: ConnectionError) {
        if self
            .generation
            .compare_exchange(generation, generation + 1, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!(generation, error = %err, "stale failure ignored");
            return;
        }
        let _ = self.heartbeat_timer.cancel();
        // the reader may be the caller; it returns right after
        if let Some(reader) = self.reader.lock().take() {
            reader.abort();
        }

        warn!(kind = %err.kind, error = %err, "connection failed");
        self.errors.emit(&err);

        let retry_count = {
            let mut status = self.status.lock();
            status.retry_count += 1;
            status.retry_count
        };
        let give_up = !err.is_retryable() || retry_count > self.config.retry.max_attempts;
        self.given_up.store(give_up, Ordering::SeqCst);
        let _ = self.update_status(|s| {
            s.state = ConnectionState::Error;
            s.error = Some(err.clone());
        });

        if give_up {
            error!(retry_count, error = %err, "giving up on connection");
            return;
        }

        let delay_ms = self.config.retry.delay_for(retry_count);
        let _ = self.update_status(|s| s.state = ConnectionState::Reconnecting);
        metrics::counter!(RECONNECTS_TOTAL).increment(1);
        info!(attempt = retry_count, delay_ms, "reconnecting after backoff");

        let weak = Arc::downgrade(self);
        self.reconnect_timer.schedule(Duration::from_millis(delay_ms), async move {
            if let Some(inner) = weak.upgrade() {
                let _ = inner.connect().await;
            }
        });
    }

    fn disconnect(&self) {
        self.teardown();
        self.given_up.store(false, Ordering::SeqCst);
        let before = self.status.lock().state;
        let _ = self.update_status(|s| {
            s.state = ConnectionState::Disconnected;
            s.retry_count = 0;
            s.error = None;
        });
        if before != ConnectionState::Disconnected {
            info!(transport = %self.transport.kind(), "disconnected");
        }
    }

    fn teardown(&self) {
        let _ = self.generation.fetch_add(1, Ordering::SeqCst);
        let _ = self.heartbeat_timer.cancel();
        let _ = self.reconnect_timer.cancel();
        if let Some(reader) = self.reader.lock().take() {
            reader.abort();
        }
        *self.in_flight.lock() = None;
    }

    fn clear_in_flight(&self, generation: u64) {
        let mut in_flight = self.in_flight.lock();
        if in_flight.as_ref().is_some_and(|(g, _)| *g == generation) {
            *in_flight = None;
        }
    }

    fn update_status(&self, change: impl FnOnce(&mut ConnectionStatus)) -> ConnectionStatus {
        let snapshot = {
            let mut status = self.status.lock();
            change(&mut status);
            status.clone()
        };
        self.status_changes.emit(&snapshot);
        snapshot
    }
}

/// Server events after which the server closes the stream.
fn terminal_fault(event: &StreamEvent) -> Option<ConnectionError> {
    match event {
        StreamEvent::Error { code, message } => {
            let status = match code.as_str() {
                "SESSION_NOT_FOUND" | "INVALID_SESSION" => 401,
                "SESSION_EXPIRED" => 403,
                _ => 503,
            };
            Some(ConnectionError::from_status(status, format!("{code}: {message}")))
        }
        StreamEvent::Timeout { idle_secs } => Some(ConnectionError::timeout(format!(
            "server closed the stream after {idle_secs}s idle"
        ))),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use relay_core::{ConnectionErrorKind, ConnectionId, RequestId, SessionCode, ToolRequest};
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::atomic::AtomicU32;
    use tokio::sync::mpsc;

    type Item = Result<StreamEvent, ConnectionError>;

    enum Script {
        Fail(ConnectionError),
        /// Events, then stay open.
        Open(Vec<StreamEvent>),
        /// Events, then close.
        Close(Vec<StreamEvent>),
        Channel(mpsc::UnboundedReceiver<Item>),
    }

    struct ScriptedTransport {
        script: Mutex<VecDeque<Script>>,
        opens: AtomicU32,
        open_delay: Duration,
    }

    impl ScriptedTransport {
        fn new(script: Vec<Script>) -> Arc<Self> {
            Self::with_delay(script, Duration::ZERO)
        }

        fn with_delay(script: Vec<Script>, open_delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script.into()),
                opens: AtomicU32::new(0),
                open_delay,
            })
        }

        fn opens(&self) -> u32 {
            self.opens.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        fn kind(&self) -> TransportKind {
            TransportKind::Stream
        }

        async fn open(&self) -> Result<EventStream, ConnectionError> {
            let _ = self.opens.fetch_add(1, Ordering::SeqCst);
            if !self.open_delay.is_zero() {
                tokio::time::sleep(self.open_delay).await;
            }
            let next = self.script.lock().pop_front();
            match next.unwrap_or_else(|| Script::Open(vec![connected()])) {
                Script::Fail(err) => Err(err),
                Script::Open(events) => Ok(Box::pin(
                    futures::stream::iter(events.into_iter().map(Ok)).chain(futures::stream::pending()),
                )),
                Script::Close(events) => Ok(Box::pin(futures::stream::iter(events.into_iter().map(Ok)))),
                Script::Channel(rx) => Ok(Box::pin(futures::stream::unfold(rx, |mut rx| async move {
                    rx.recv().await.map(|item| (item, rx))
                }))),
            }
        }
    }

    fn connected() -> StreamEvent {
        StreamEvent::Connected {
            session_code: SessionCode::parse("ABCD2345").unwrap(),
            connection_id: ConnectionId::new(),
            timestamp: Utc::now(),
        }
    }

    fn tool_request(id: &str) -> StreamEvent {
        StreamEvent::ToolRequest(ToolRequest::new(
            RequestId::from(id),
            "noop",
            json!({}),
            SessionCode::parse("ABCD2345").unwrap(),
        ))
    }

    fn config(max_attempts: u32) -> ConnectionConfig {
        ConnectionConfig {
            heartbeat_timeout: Duration::from_secs(45),
            connect_timeout: Duration::from_secs(10),
            poll_interval: Duration::from_secs(1),
            retry: RetryPolicy {
                max_attempts,
                base_delay_ms: 1000,
                max_delay_ms: 30_000,
                multiplier: 2.0,
                jitter_factor: 0.25,
            },
        }
    }

    struct Recorder {
        states: Arc<Mutex<Vec<ConnectionState>>>,
        errors: Arc<Mutex<Vec<ConnectionError>>>,
        messages: Arc<Mutex<Vec<StreamEvent>>>,
    }

    fn record(manager: &ConnectionManager) -> Recorder {
        let rec = Recorder {
            states: Arc::default(),
            errors: Arc::default(),
            messages: Arc::default(),
        };
        let states = rec.states.clone();
        let _ = manager.on_status_change(Arc::new(move |s: &ConnectionStatus| states.lock().push(s.state)));
        let errors = rec.errors.clone();
        let _ = manager.on_error(Arc::new(move |e: &ConnectionError| errors.lock().push(e.clone())));
        let messages = rec.messages.clone();
        let _ = manager.on_message(Arc::new(move |m: &StreamEvent| messages.lock().push(m.clone())));
        rec
    }

    #[tokio::test(start_paused = true)]
    async fn connect_walks_through_connecting() {
        let transport = ScriptedTransport::new(vec![]);
        let manager = ConnectionManager::new(config(5), transport.clone());
        let rec = record(&manager);
        assert_eq!(manager.state(), ConnectionState::Disconnected);

        manager.connect().await.unwrap();
        assert_eq!(
            *rec.states.lock(),
            [ConnectionState::Connecting, ConnectionState::Connected]
        );
        let status = manager.status();
        assert!(status.is_connected());
        assert!(status.last_connected.is_some());
        assert_eq!(manager.armed_timers(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn connect_is_idempotent() {
        let transport = ScriptedTransport::with_delay(vec![], Duration::from_millis(100));
        let manager = ConnectionManager::new(config(5), transport.clone());

        let (a, b) = tokio::join!(manager.connect(), manager.connect());
        assert!(a.is_ok() && b.is_ok());
        assert_eq!(transport.opens(), 1);

        manager.connect().await.unwrap();
        assert_eq!(transport.opens(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn events_reach_listeners_in_order() {
        let transport = ScriptedTransport::new(vec![Script::Open(vec![
            connected(),
            tool_request("r1"),
            tool_request("r2"),
        ])]);
        let manager = ConnectionManager::new(config(5), transport);
        let rec = record(&manager);
        manager.connect().await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        let messages = rec.messages.lock();
        assert_eq!(messages.len(), 3);
        assert!(matches!(messages[0], StreamEvent::Connected { .. }));
        assert!(matches!(&messages[1], StreamEvent::ToolRequest(r) if r.id.as_str() == "r1"));
        assert!(matches!(&messages[2], StreamEvent::ToolRequest(r) if r.id.as_str() == "r2"));
    }

    #[tokio::test(start_paused = true)]
    async fn heartbeat_loss_raises_one_timeout_and_reconnects() {
        let transport = ScriptedTransport::new(vec![Script::Open(vec![connected()])]);
        let manager = ConnectionManager::new(config(5), transport.clone());
        let rec = record(&manager);
        manager.connect().await.unwrap();
        rec.states.lock().clear();

        tokio::time::sleep(Duration::from_secs(46)).await;

        let errors = rec.errors.lock().clone();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].kind, ConnectionErrorKind::Timeout);
        let states = rec.states.lock().clone();
        assert_eq!(&states[..2], [ConnectionState::Error, ConnectionState::Reconnecting]);
        assert!(transport.opens() <= 2);
    }

    #[tokio::test(start_paused = true)]
    async fn heartbeats_keep_connection_alive() {
        let (tx, rx) = mpsc::unbounded_channel();
        let transport = ScriptedTransport::new(vec![Script::Channel(rx)]);
        let manager = ConnectionManager::new(config(5), transport);
        let rec = record(&manager);
        manager.connect().await.unwrap();
        tx.send(Ok(connected())).unwrap();

        for _ in 0..6 {
            tokio::time::sleep(Duration::from_secs(30)).await;
            tx.send(Ok(StreamEvent::heartbeat())).unwrap();
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(rec.errors.lock().is_empty());
        assert_eq!(manager.state(), ConnectionState::Connected);
    }

    #[tokio::test(start_paused = true)]
    async fn retries_then_settles_in_error() {
        let fail = || Script::Fail(ConnectionError::network("refused"));
        let transport = ScriptedTransport::new(vec![fail(), fail(), fail(), fail(), fail()]);
        let manager = ConnectionManager::new(config(3), transport.clone());
        let rec = record(&manager);

        assert!(manager.connect().await.is_err());
        tokio::time::sleep(Duration::from_secs(60)).await;

        // first attempt plus three retries
        assert_eq!(transport.opens(), 4);
        assert_eq!(rec.errors.lock().len(), 4);
        assert_eq!(manager.state(), ConnectionState::Error);
        assert!(manager.has_given_up());
        assert_eq!(manager.status().retry_count, 4);
        assert_eq!(manager.armed_timers(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn successful_reconnect_resets_retry_count() {
        let transport = ScriptedTransport::new(vec![
            Script::Fail(ConnectionError::network("refused")),
            Script::Open(vec![connected()]),
        ]);
        let manager = ConnectionManager::new(config(5), transport.clone());
        assert!(manager.connect().await.is_err());
        assert_eq!(manager.status().retry_count, 1);
        assert_eq!(manager.state(), ConnectionState::Reconnecting);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(manager.state(), ConnectionState::Connected);
        assert_eq!(manager.status().retry_count, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn fatal_error_settles_immediately() {
        let transport = ScriptedTransport::new(vec![Script::Fail(ConnectionError::from_status(401, "unknown session"))]);
        let manager = ConnectionManager::new(config(5), transport.clone());
        assert!(manager.connect().await.is_err());
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(transport.opens(), 1);
        assert!(manager.has_given_up());
        assert_eq!(manager.armed_timers(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn server_session_error_is_terminal() {
        let transport = ScriptedTransport::new(vec![Script::Close(vec![
            connected(),
            StreamEvent::error("SESSION_EXPIRED", "session expired"),
        ])]);
        let manager = ConnectionManager::new(config(5), transport.clone());
        let rec = record(&manager);
        manager.connect().await.unwrap();
        tokio::time::sleep(Duration::from_secs(5)).await;

        assert!(manager.has_given_up());
        assert_eq!(transport.opens(), 1);
        assert_eq!(rec.errors.lock().len(), 1);
        assert_eq!(rec.errors.lock()[0].status, Some(403));
    }

    #[tokio::test(start_paused = true)]
    async fn closed_stream_reconnects() {
        let transport = ScriptedTransport::new(vec![Script::Close(vec![connected()])]);
        let manager = ConnectionManager::new(config(5), transport.clone());
        manager.connect().await.unwrap();
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(transport.opens(), 2);
        assert_eq!(manager.state(), ConnectionState::Connected);
    }

    #[tokio::test(start_paused = true)]
    async fn connect_timeout_is_timeout_error() {
        let transport = ScriptedTransport::with_delay(vec![], Duration::from_secs(20));
        let manager = ConnectionManager::new(config(0), transport);
        let err = manager.connect().await.unwrap_err();
        assert!(err.is_timeout());
        assert!(manager.has_given_up());
    }

    #[tokio::test(start_paused = true)]
    async fn disconnect_cancels_timers_and_resets() {
        let transport = ScriptedTransport::new(vec![Script::Fail(ConnectionError::network("refused"))]);
        let manager = ConnectionManager::new(config(5), transport.clone());
        assert!(manager.connect().await.is_err());
        assert_eq!(manager.armed_timers(), 1);

        manager.disconnect();
        assert_eq!(manager.armed_timers(), 0);
        let status = manager.status();
        assert_eq!(status.state, ConnectionState::Disconnected);
        assert_eq!(status.retry_count, 0);

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(transport.opens(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn disconnect_closes_transport() {
        let (tx, rx) = mpsc::unbounded_channel();
        let transport = ScriptedTransport::new(vec![Script::Channel(rx)]);
        let manager = ConnectionManager::new(config(5), transport);
        let rec = record(&manager);
        manager.connect().await.unwrap();

        manager.disconnect();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(tx.is_closed());
        assert_eq!(manager.armed_timers(), 0);
        assert!(rec.errors.lock().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn duplicate_listener_receives_once() {
        let transport = ScriptedTransport::new(vec![Script::Open(vec![connected()])]);
        let manager = ConnectionManager::new(config(5), transport);
        let hits = Arc::new(AtomicU32::new(0));
        let h = hits.clone();
        let listener: Listener<StreamEvent> = Arc::new(move |_: &StreamEvent| {
            let _ = h.fetch_add(1, Ordering::SeqCst);
        });
        assert!(manager.on_message(listener.clone()));
        assert!(!manager.on_message(listener.clone()));

        manager.connect().await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert!(manager.off_message(&listener));
    }
}
