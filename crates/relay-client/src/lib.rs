//! # relay-client
//!
//! The executing side of the tool relay. A [`RelayClient`] attaches to a
//! session, receives tool requests over a server-sent event stream (or
//! polling), runs each request once, and posts the responses back in
//! batches.
//!
//! - [`ConnectionManager`]: connection state machine with heartbeat
//!   watchdog and backoff reconnects
//! - [`RequestDeduplicator`]: bounded tracker that suppresses redelivered
//!   requests
//! - [`ResponseBatchProcessor`]: size- and time-triggered response batching
//! - [`ResponseSender`]: rate-limited, retried batch delivery
//! - [`RelayApi`]: typed HTTP calls against the relay server

#![deny(unsafe_code)]

pub mod api;
pub mod batch;
pub mod config;
pub mod connection;
pub mod dedup;
pub mod delivery;
pub mod errors;
pub mod executor;
pub mod listeners;
pub mod pipeline;
pub mod retry;
pub mod status;
pub mod timer;
pub mod transport;

pub use api::{RelayApi, SessionHandle};
pub use batch::{BatchConfig, BatchSink, BatchStats, ResponseBatchProcessor};
pub use config::ClientConfig;
pub use connection::{ConnectionConfig, ConnectionManager};
pub use dedup::{DedupConfig, DedupState, RequestDeduplicator};
pub use delivery::ResponseSender;
pub use errors::{BatchError, ClientError, DeliveryError};
pub use executor::{BuiltinExecutor, ToolExecutor};
pub use listeners::{Listener, ListenerSet};
pub use pipeline::{RelayClient, TransportFactory};
pub use status::{ConnectionState, ConnectionStatus, TransportKind};
pub use transport::{EventStream, PollTransport, SseTransport, Transport};
