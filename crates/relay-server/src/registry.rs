//! Registry of open streams, keyed by connection and grouped by session.
//!
//! Handlers use it to reach the dispatchers serving a session: to record
//! client activity, to wake a dispatcher after an enqueue, and to fan out
//! tool-availability updates.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use relay_core::{ConnectionId, SessionCode, StreamEvent};
use tracing::{debug, warn};

use crate::connection::{StreamConnection, StreamSignal};

/// Open streams.
pub struct StreamRegistry {
    connections: RwLock<HashMap<ConnectionId, Arc<StreamConnection>>>,
}

impl StreamRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
        }
    }

    /// Add a connection.
    pub fn add(&self, connection: Arc<StreamConnection>) {
        let _ = self
            .connections
            .write()
            .insert(connection.id.clone(), connection);
    }

    /// Remove a connection by ID.
    pub fn remove(&self, connection_id: &ConnectionId) -> bool {
        self.connections.write().remove(connection_id).is_some()
    }

    /// Number of open streams.
    pub fn connection_count(&self) -> usize {
        self.connections.read().len()
    }

    /// Number of distinct sessions with an open stream.
    pub fn session_count(&self) -> usize {
        let conns = self.connections.read();
        let mut codes: Vec<&SessionCode> = conns.values().map(|c| &c.session_code).collect();
        codes.sort();
        codes.dedup();
        codes.len()
    }

    /// Streams bound to a session.
    pub fn session_connections(&self, code: &SessionCode) -> Vec<Arc<StreamConnection>> {
        self.connections
            .read()
            .values()
            .filter(|c| &c.session_code == code)
            .cloned()
            .collect()
    }

    /// Whether the session has at least one open stream.
    pub fn has_session(&self, code: &SessionCode) -> bool {
        self.connections
            .read()
            .values()
            .any(|c| &c.session_code == code)
    }

    /// Record client activity on every stream of the session.
    pub fn touch_session(&self, code: &SessionCode) {
        for conn in self.session_connections(code) {
            conn.mark_active();
        }
    }

    /// Deliver a signal to every stream of the session. Returns how many
    /// streams accepted it.
    pub fn notify_session(&self, code: &SessionCode, signal: &StreamSignal) -> usize {
        let conns = self.session_connections(code);
        let mut delivered = 0;
        for conn in &conns {
            if conn.send(signal.clone()) {
                delivered += 1;
            } else if matches!(signal, StreamSignal::Event(_)) {
                warn!(conn_id = %conn.id, session_code = %code, "failed to signal stream");
            }
        }
        debug!(session_code = %code, recipients = conns.len(), delivered, "signalled session streams");
        delivered
    }

    /// Broadcast an event to the session's streams.
    pub fn broadcast_to_session(&self, code: &SessionCode, event: StreamEvent) -> usize {
        self.notify_session(code, &StreamSignal::Event(event))
    }
}

impl Default for StreamRegistry {
    fn default() -> Self {
        Self::new()
    }
}
