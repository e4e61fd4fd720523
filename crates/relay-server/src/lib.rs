//! # relay-server
//!
//! HTTP side of the tool relay.
//!
//! The LLM side enqueues tool requests for a session; the session's client
//! receives them over a server-sent event stream (or polls for them when
//! streaming is unavailable), runs them, and posts the responses back in
//! batches. Sessions, queues, responses, and tool manifests live in a
//! [`relay_queue`] backend, so expiry and ordering hold regardless of
//! which backend is configured.
//!
//! - [`server`]: shared state, router, listener, and the expiry sweep
//! - [`dispatcher`]: per-connection stream loop (heartbeats, idle timeout,
//!   queue drain)
//! - [`registry`]: open streams grouped by session
//! - [`handlers`]: one module per HTTP resource
//! - [`shutdown`]: cancel everything, let streams close, then join tasks

#![deny(unsafe_code)]

pub mod config;
pub mod connection;
pub mod dispatcher;
pub mod errors;
pub mod handlers;
pub mod health;
pub mod metrics;
pub mod registry;
pub mod server;
pub mod shutdown;

pub use config::ServerConfig;
pub use errors::ApiError;
pub use server::{AppState, RelayServer};
pub use shutdown::{DrainReport, Shutdown};
