//! Events carried on a session stream.
//!
//! The server emits these as SSE frames (`event:` = [`StreamEvent::event_name`],
//! `data:` = [`StreamEvent::data_json`]); the client parses them back with
//! [`StreamEvent::from_sse`]. The poll transport synthesizes the same variants
//! so listeners never see which transport is active.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::errors::ParseError;
use crate::ids::{ConnectionId, SessionCode};
use crate::types::{ToolManifest, ToolRequest};

/// SSE event name for [`StreamEvent::Connected`].
pub const EVENT_CONNECTED: &str = "connected";
/// SSE event name for [`StreamEvent::Heartbeat`].
pub const EVENT_HEARTBEAT: &str = "heartbeat";
/// SSE event name for [`StreamEvent::ToolRequest`].
pub const EVENT_TOOL_REQUEST: &str = "tool-request";
/// SSE event name for [`StreamEvent::ToolAvailabilityUpdate`].
pub const EVENT_TOOL_AVAILABILITY_UPDATE: &str = "tool-availability-update";
/// SSE event name for [`StreamEvent::Error`].
pub const EVENT_ERROR: &str = "error";
/// SSE event name for [`StreamEvent::Timeout`].
pub const EVENT_TIMEOUT: &str = "timeout";

/// A typed stream event.
#[derive(Clone, Debug, PartialEq)]
pub enum StreamEvent {
    /// First event on every stream.
    Connected {
        /// Session the stream is bound to.
        session_code: SessionCode,
        /// Server-side connection ID.
        connection_id: ConnectionId,
        /// When the stream opened.
        timestamp: DateTime<Utc>,
    },
    /// Periodic liveness signal.
    Heartbeat {
        /// When the heartbeat was sent.
        timestamp: DateTime<Utc>,
    },
    /// A dequeued request.
    ToolRequest(ToolRequest),
    /// The session's tool manifest changed.
    ToolAvailabilityUpdate(ToolManifest),
    /// Server-side fault; the stream closes after it.
    Error {
        /// Machine-readable code (e.g. `SESSION_EXPIRED`).
        code: String,
        /// Human-readable message.
        message: String,
    },
    /// No client activity within the idle threshold; the stream closes after it.
    Timeout {
        /// The idle threshold that elapsed.
        idle_secs: u64,
    },
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConnectedPayload {
    session_code: SessionCode,
    connection_id: ConnectionId,
    timestamp: DateTime<Utc>,
}

#[derive(Serialize, Deserialize)]
struct TimestampPayload {
    timestamp: DateTime<Utc>,
}

#[derive(Serialize, Deserialize)]
struct ErrorPayload {
    code: String,
    message: String,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TimeoutPayload {
    idle_secs: u64,
}

impl StreamEvent {
    /// Heartbeat stamped now.
    pub fn heartbeat() -> Self {
        Self::Heartbeat {
            timestamp: Utc::now(),
        }
    }

    /// Error event.
    pub fn error(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Error {
            code: code.into(),
            message: message.into(),
        }
    }

    /// SSE `event:` field.
    pub fn event_name(&self) -> &'static str {
        match self {
            Self::Connected { .. } => EVENT_CONNECTED,
            Self::Heartbeat { .. } => EVENT_HEARTBEAT,
            Self::ToolRequest(_) => EVENT_TOOL_REQUEST,
            Self::ToolAvailabilityUpdate(_) => EVENT_TOOL_AVAILABILITY_UPDATE,
            Self::Error { .. } => EVENT_ERROR,
            Self::Timeout { .. } => EVENT_TIMEOUT,
        }
    }

    /// Whether the event resets the client's heartbeat monitor.
    pub fn is_heartbeat(&self) -> bool {
        matches!(self, Self::Heartbeat { .. })
    }

    /// Whether the server closes the stream after this event.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Error { .. } | Self::Timeout { .. })
    }

    /// Payload as a JSON value.
    pub fn data(&self) -> Value {
        let result = match self {
            Self::Connected {
                session_code,
                connection_id,
                timestamp,
            } => serde_json::to_value(ConnectedPayload {
                session_code: session_code.clone(),
                connection_id: connection_id.clone(),
                timestamp: *timestamp,
            }),
            Self::Heartbeat { timestamp } => serde_json::to_value(TimestampPayload {
                timestamp: *timestamp,
            }),
            Self::ToolRequest(request) => serde_json::to_value(request),
            Self::ToolAvailabilityUpdate(manifest) => serde_json::to_value(manifest),
            Self::Error { code, message } => serde_json::to_value(ErrorPayload {
                code: code.clone(),
                message: message.clone(),
            }),
            Self::Timeout { idle_secs } => serde_json::to_value(TimeoutPayload {
                idle_secs: *idle_secs,
            }),
        };
        // Plain structs with string keys always serialize.
        result.unwrap_or_else(|err| json!({ "error": err.to_string() }))
    }

    /// SSE `data:` field.
    pub fn data_json(&self) -> String {
        self.data().to_string()
    }

    /// Parse an SSE frame back into a typed event.
    pub fn from_sse(event: &str, data: &str) -> Result<Self, ParseError> {
        let event = match event {
            EVENT_CONNECTED => {
                let p: ConnectedPayload = serde_json::from_str(data)?;
                Self::Connected {
                    session_code: p.session_code,
                    connection_id: p.connection_id,
                    timestamp: p.timestamp,
                }
            }
            EVENT_HEARTBEAT => {
                let p: TimestampPayload = serde_json::from_str(data)?;
                Self::Heartbeat {
                    timestamp: p.timestamp,
                }
            }
            EVENT_TOOL_REQUEST => Self::ToolRequest(serde_json::from_str(data)?),
            EVENT_TOOL_AVAILABILITY_UPDATE => {
                Self::ToolAvailabilityUpdate(serde_json::from_str(data)?)
            }
            EVENT_ERROR => {
                let p: ErrorPayload = serde_json::from_str(data)?;
                Self::Error {
                    code: p.code,
                    message: p.message,
                }
            }
            EVENT_TIMEOUT => {
                let p: TimeoutPayload = serde_json::from_str(data)?;
                Self::Timeout {
                    idle_secs: p.idle_secs,
                }
            }
            other => return Err(ParseError::new(format!("unknown event type: {other}"))),
        };
        Ok(event)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::RequestId;
    use assert_matches::assert_matches;

    fn reparse(event: &StreamEvent) -> StreamEvent {
        StreamEvent::from_sse(event.event_name(), &event.data_json()).unwrap()
    }

    #[test]
    fn event_names_match_wire_protocol() {
        assert_eq!(StreamEvent::heartbeat().event_name(), "heartbeat");
        assert_eq!(StreamEvent::error("X", "y").event_name(), "error");
        assert_eq!(StreamEvent::Timeout { idle_secs: 1 }.event_name(), "timeout");
        assert_eq!(
            StreamEvent::ToolAvailabilityUpdate(ToolManifest::default()).event_name(),
            "tool-availability-update"
        );
    }

    #[test]
    fn connected_payload_is_camel_case() {
        let event = StreamEvent::Connected {
            session_code: SessionCode::parse("ABCD2345").unwrap(),
            connection_id: ConnectionId::from("c1"),
            timestamp: Utc::now(),
        };
        let data = event.data();
        assert_eq!(data["sessionCode"], "ABCD2345");
        assert_eq!(data["connectionId"], "c1");
        assert_eq!(reparse(&event), event);
    }

    #[test]
    fn tool_request_parses_back() {
        let request = ToolRequest::new(
            RequestId::from("r1"),
            "noop",
            json!({}),
            SessionCode::parse("ABCD2345").unwrap(),
        );
        let event = StreamEvent::ToolRequest(request.clone());
        assert_matches!(reparse(&event), StreamEvent::ToolRequest(r) if r == request);
    }

    #[test]
    fn terminal_events() {
        assert!(StreamEvent::error("SESSION_EXPIRED", "gone").is_terminal());
        assert!(StreamEvent::Timeout { idle_secs: 300 }.is_terminal());
        assert!(!StreamEvent::heartbeat().is_terminal());
        assert!(StreamEvent::heartbeat().is_heartbeat());
    }

    #[test]
    fn unknown_event_rejected() {
        let err = StreamEvent::from_sse("mystery", "{}").unwrap_err();
        assert!(err.message.contains("mystery"));
    }

    #[test]
    fn malformed_data_rejected() {
        assert!(StreamEvent::from_sse("tool-request", "{not json").is_err());
        assert!(StreamEvent::from_sse("heartbeat", "{}").is_err());
    }
}
