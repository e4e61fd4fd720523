//! Relay error taxonomy.
//!
//! Each failure class has its own type so callers can decide policy by type:
//!
//! - [`ConnectionError`]: transport faults (network, protocol, timeout),
//!   retried with backoff by the connection layer
//! - [`ParseError`]: a malformed payload, rejected individually
//! - [`RateLimitError`]: the caller must wait `retry_after_ms`
//! - [`StorageError`]: the queue store is unavailable; surfaced, never retried
//!   by the store itself
//! - [`ExecutionError`]: a tool failed; carried back to the LLM as a normal
//!   response payload
//!
//! [`RelayError`] wraps all of them for call sites that cross layers.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::retry::is_retryable_status;

/// Sub-kind of a [`ConnectionError`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionErrorKind {
    /// Socket/DNS/TLS failure or an unexpected disconnect.
    Network,
    /// The peer answered but not in the expected shape (bad status, bad frame).
    Protocol,
    /// No heartbeat or connect completion within the deadline.
    Timeout,
}

impl fmt::Display for ConnectionErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Network => write!(f, "network"),
            Self::Protocol => write!(f, "protocol"),
            Self::Timeout => write!(f, "timeout"),
        }
    }
}

/// A transport-level fault.
#[derive(Clone, Debug, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{kind} error: {message}")]
#[serde(rename_all = "camelCase")]
pub struct ConnectionError {
    /// Fault class.
    pub kind: ConnectionErrorKind,
    /// Human-readable description.
    pub message: String,
    /// HTTP status, when the fault came from a response.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
}

impl ConnectionError {
    /// Network fault.
    pub fn network(message: impl Into<String>) -> Self {
        Self {
            kind: ConnectionErrorKind::Network,
            message: message.into(),
            status: None,
        }
    }

    /// Protocol fault.
    pub fn protocol(message: impl Into<String>) -> Self {
        Self {
            kind: ConnectionErrorKind::Protocol,
            message: message.into(),
            status: None,
        }
    }

    /// Timeout fault.
    pub fn timeout(message: impl Into<String>) -> Self {
        Self {
            kind: ConnectionErrorKind::Timeout,
            message: message.into(),
            status: None,
        }
    }

    /// Fault derived from an unexpected HTTP status.
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        Self {
            kind: ConnectionErrorKind::Protocol,
            message: message.into(),
            status: Some(status),
        }
    }

    /// Whether the fault is a timeout.
    pub fn is_timeout(&self) -> bool {
        self.kind == ConnectionErrorKind::Timeout
    }

    /// Whether the default classifier retries this fault.
    ///
    /// Network and timeout faults always retry. Protocol faults retry only when
    /// they carry a retryable HTTP status.
    pub fn is_retryable(&self) -> bool {
        match self.kind {
            ConnectionErrorKind::Network | ConnectionErrorKind::Timeout => true,
            ConnectionErrorKind::Protocol => self.status.is_some_and(is_retryable_status),
        }
    }
}

/// A malformed request/response payload.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
#[error("parse error: {message}")]
pub struct ParseError {
    /// What was wrong with the payload.
    pub message: String,
}

impl ParseError {
    /// Create a parse error.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl From<serde_json::Error> for ParseError {
    fn from(err: serde_json::Error) -> Self {
        Self::new(err.to_string())
    }
}

/// The caller exceeded its request budget.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
#[error("rate limited, retry after {retry_after_ms}ms")]
pub struct RateLimitError {
    /// How long to wait before the next attempt can succeed.
    pub retry_after_ms: u64,
}

/// The backing key-value store is unavailable or failed.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
#[error("storage error: {message}")]
pub struct StorageError {
    /// Backend-specific description.
    pub message: String,
}

impl StorageError {
    /// Create a storage error.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// A tool-level failure, delivered to the LLM as the response payload.
#[derive(Clone, Debug, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{message}")]
#[serde(rename_all = "camelCase")]
pub struct ExecutionError {
    /// Human-readable failure description.
    pub message: String,
    /// Optional machine-readable code (e.g. `UNKNOWN_TOOL`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

impl ExecutionError {
    /// Create an execution error without a code.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: None,
        }
    }

    /// Attach a machine-readable code.
    #[must_use]
    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    /// The executor has no tool with this name.
    pub fn unknown_tool(tool_name: &str) -> Self {
        Self::new(format!("unknown tool: {tool_name}")).with_code("UNKNOWN_TOOL")
    }
}

/// Umbrella error for call sites spanning several layers.
#[derive(Debug, Error)]
pub enum RelayError {
    /// Transport fault.
    #[error(transparent)]
    Connection(#[from] ConnectionError),
    /// Malformed payload.
    #[error(transparent)]
    Parse(#[from] ParseError),
    /// Rate limited.
    #[error(transparent)]
    RateLimit(#[from] RateLimitError),
    /// Store unavailable.
    #[error(transparent)]
    Storage(#[from] StorageError),
    /// Tool failure.
    #[error(transparent)]
    Execution(#[from] ExecutionError),
}

impl RelayError {
    /// Whether the default classifier would retry this error.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Connection(err) => err.is_retryable(),
            Self::RateLimit(_) => true,
            Self::Parse(_) | Self::Storage(_) | Self::Execution(_) => false,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
