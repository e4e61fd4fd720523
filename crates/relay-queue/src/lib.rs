//! # relay-queue
//!
//! Session-scoped storage for the relay server.
//!
//! Everything sits on a [`KeyValueStore`] backend with per-key TTLs:
//!
//! - [`SessionQueueStore`]: per-session FIFO of pending [`ToolRequest`]s with
//!   atomic pop
//! - [`SessionStore`]: session records, expiry, and activity refresh
//! - [`ResponseStore`]: completed responses with long-poll retrieval
//! - [`ManifestStore`]: the client's published tool manifest
//!
//! Backends: [`MemoryStore`] (process-local) and [`SqliteStore`] (`rusqlite` +
//! `r2d2`). [`open_store`] picks one from settings.
//!
//! [`ToolRequest`]: relay_core::ToolRequest

#![deny(unsafe_code)]

pub mod errors;
pub mod factory;
pub mod kv;
pub mod manifest;
pub mod memory;
pub mod queue;
pub mod responses;
pub mod sessions;
pub mod sqlite;

pub use errors::{Result, StoreError};
pub use factory::open_store;
pub use kv::{KeyValueStore, KvResult};
pub use manifest::ManifestStore;
pub use memory::MemoryStore;
pub use queue::SessionQueueStore;
pub use responses::ResponseStore;
pub use sessions::{EXPIRED_GRACE, SessionInfo, SessionStore};
pub use sqlite::{SqliteConfig, SqliteStore};
