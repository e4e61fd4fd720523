//! Server-side state of one open session stream.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use relay_core::{ConnectionId, SessionCode, StreamEvent};
use tokio::sync::mpsc;
use tokio::time::Instant;

/// Out-of-band input to a running dispatcher.
#[derive(Clone, Debug, PartialEq)]
pub enum StreamSignal {
    /// Emit this event on the stream.
    Event(StreamEvent),
    /// New work was enqueued; poll the queue now.
    QueueReady,
}

/// Represents one connected stream.
pub struct StreamConnection {
    /// Unique connection ID.
    pub id: ConnectionId,
    /// Session this stream serves.
    pub session_code: SessionCode,
    /// Signal channel to the dispatcher.
    tx: mpsc::Sender<StreamSignal>,
    /// When this stream opened.
    pub connected_at: Instant,
    /// Last client activity for the session.
    last_activity: Mutex<Instant>,
    /// Signals dropped because the channel was full.
    dropped_signals: AtomicU64,
}

impl StreamConnection {
    /// Create a connection and the receiving end of its signal channel.
    pub fn new(session_code: SessionCode, buffer: usize) -> (Self, mpsc::Receiver<StreamSignal>) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        let now = Instant::now();
        let conn = Self {
            id: ConnectionId::new(),
            session_code,
            tx,
            connected_at: now,
            last_activity: Mutex::new(now),
            dropped_signals: AtomicU64::new(0),
        };
        (conn, rx)
    }

    /// Queue a signal for the dispatcher.
    ///
    /// Returns `false` if the channel is full or closed.
    pub fn send(&self, signal: StreamSignal) -> bool {
        if self.tx.try_send(signal).is_ok() {
            true
        } else {
            let _ = self.dropped_signals.fetch_add(1, Ordering::Relaxed);
            false
        }
    }

    /// Total signals dropped for this connection.
    pub fn drop_count(&self) -> u64 {
        self.dropped_signals.load(Ordering::Relaxed)
    }

    /// Record client activity.
    pub fn mark_active(&self) {
        *self.last_activity.lock() = Instant::now();
    }

    /// When the client was last active.
    pub fn last_activity(&self) -> Instant {
        *self.last_activity.lock()
    }

    /// Time since the last client activity.
    pub fn idle_elapsed(&self) -> Duration {
        self.last_activity.lock().elapsed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn code() -> SessionCode {
        SessionCode::parse("ABCD2345").unwrap()
    }

    #[tokio::test]
    async fn send_reaches_receiver() {
        let (conn, mut rx) = StreamConnection::new(code(), 4);
        assert!(conn.send(StreamSignal::QueueReady));
        assert_eq!(rx.recv().await, Some(StreamSignal::QueueReady));
    }

    #[tokio::test]
    async fn full_channel_counts_drops() {
        let (conn, _rx) = StreamConnection::new(code(), 1);
        assert!(conn.send(StreamSignal::QueueReady));
        assert!(!conn.send(StreamSignal::QueueReady));
        assert_eq!(conn.drop_count(), 1);
    }

    #[tokio::test]
    async fn closed_channel_returns_false() {
        let (conn, rx) = StreamConnection::new(code(), 4);
        drop(rx);
        assert!(!conn.send(StreamSignal::QueueReady));
    }

    #[tokio::test(start_paused = true)]
    async fn mark_active_resets_idle_clock() {
        let (conn, _rx) = StreamConnection::new(code(), 4);
        tokio::time::advance(Duration::from_secs(10)).await;
        assert!(conn.idle_elapsed() >= Duration::from_secs(10));
        conn.mark_active();
        assert_eq!(conn.idle_elapsed(), Duration::ZERO);
    }
}
