//! Connection status as seen by listeners and the UI layer.

use std::fmt;

use chrono::{DateTime, Utc};
use relay_core::ConnectionError;
use relay_settings::TransportPreference;
use serde::{Deserialize, Serialize};

/// Lifecycle state of a [`ConnectionManager`](crate::ConnectionManager).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConnectionState {
    /// Idle; no transport open and nothing scheduled.
    #[default]
    Disconnected,
    /// An attempt to open the transport is in flight.
    Connecting,
    /// The transport is open and events are flowing.
    Connected,
    /// Waiting out a backoff delay before the next attempt.
    Reconnecting,
    /// The last attempt failed. Terminal once retries are exhausted.
    Error,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Disconnected => "DISCONNECTED",
            Self::Connecting => "CONNECTING",
            Self::Connected => "CONNECTED",
            Self::Reconnecting => "RECONNECTING",
            Self::Error => "ERROR",
        };
        f.write_str(s)
    }
}

/// Which transport carries the events.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransportKind {
    /// Server-sent event stream.
    #[default]
    Stream,
    /// Periodic polling.
    Poll,
}

impl From<TransportPreference> for TransportKind {
    fn from(pref: TransportPreference) -> Self {
        match pref {
            TransportPreference::Stream => Self::Stream,
            TransportPreference::Poll => Self::Poll,
        }
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stream => f.write_str("stream"),
            Self::Poll => f.write_str("poll"),
        }
    }
}

/// Snapshot of a connection's status.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionStatus {
    /// Current state.
    pub state: ConnectionState,
    /// Active transport.
    pub transport: TransportKind,
    /// Consecutive failed attempts since the last successful connect.
    pub retry_count: u32,
    /// When the transport last opened.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_connected: Option<DateTime<Utc>>,
    /// Most recent fault.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ConnectionError>,
}

impl ConnectionStatus {
    /// Fresh status for a transport.
    pub fn new(transport: TransportKind) -> Self {
        Self {
            transport,
            ..Self::default()
        }
    }

    /// Whether events are flowing.
    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }
}
