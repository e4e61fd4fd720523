//! # relay-core
//!
//! Foundation types, errors, branded IDs, and utilities for the tool relay.
//!
//! This crate provides the shared vocabulary that the server and client crates
//! depend on:
//!
//! - **Branded IDs**: `RequestId`, `BatchId`, `ConnectionId` newtypes and the
//!   validated [`SessionCode`]
//! - **Wire types**: [`ToolRequest`], [`ToolResponse`], [`ResponseBatch`],
//!   [`ToolManifest`]
//! - **Stream events**: [`StreamEvent`] with the SSE event names used on the wire
//! - **Errors**: the relay error taxonomy via `thiserror`
//! - **Retry**: exponential backoff with jitter and status classification
//! - **Rate limiting**: the adaptive token-bucket [`RateLimiter`]

#![deny(unsafe_code)]

pub mod constants;
pub mod errors;
pub mod events;
pub mod ids;
pub mod logging;
pub mod metrics;
pub mod rate_limit;
pub mod retry;
pub mod types;

pub use errors::{
    ConnectionError, ConnectionErrorKind, ExecutionError, ParseError, RateLimitError, RelayError,
    StorageError,
};
pub use events::StreamEvent;
pub use ids::{BatchId, ConnectionId, RequestId, SessionCode};
pub use rate_limit::{RateLimiter, RateLimiterConfig};
pub use types::{
    ResponseBatch, ToolDescriptor, ToolManifest, ToolOutcome, ToolRequest, ToolResponse,
};
