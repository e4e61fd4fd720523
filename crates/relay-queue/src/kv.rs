//! The key-value backend abstraction.
//!
//! A small Redis-like surface: FIFO lists and plain string values, each key
//! with an optional TTL. Expired keys behave as absent on every read (lazy
//! expiry) and are physically removed by [`KeyValueStore::purge_expired`].
//!
//! Key layout used by the stores in this crate:
//!
//! | Key | Kind | Contents |
//! |---|---|---|
//! | `session:{code}` | value | `SessionInfo` |
//! | `queue:{code}` | list | `ToolRequest`s, head first |
//! | `response:{code}:{requestId}` | value | `ToolResponse` |
//! | `manifest:{code}` | value | `ToolManifest` |

use std::time::Duration;

use async_trait::async_trait;
use relay_core::{RequestId, SessionCode, StorageError};

/// Result type for backend operations.
pub type KvResult<T> = std::result::Result<T, StorageError>;

/// A shared key-value backend.
///
/// Every operation on a single key is atomic: in particular, concurrent
/// [`pop_front`](Self::pop_front) calls never return the same element twice.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Append `value` to the list at `key`, creating it if absent. When `ttl`
    /// is given the key's deadline is reset to now + `ttl`. Returns the new length.
    async fn push_back(&self, key: &str, value: String, ttl: Option<Duration>) -> KvResult<usize>;

    /// Atomically remove and return the head of the list at `key`.
    async fn pop_front(&self, key: &str) -> KvResult<Option<String>>;

    /// Length of the list at `key` (0 if absent).
    async fn list_len(&self, key: &str) -> KvResult<usize>;

    /// Set a plain value, replacing any previous value and deadline.
    async fn set(&self, key: &str, value: String, ttl: Option<Duration>) -> KvResult<()>;

    /// Read a plain value.
    async fn get(&self, key: &str) -> KvResult<Option<String>>;

    /// Atomically read and delete a plain value.
    async fn take(&self, key: &str) -> KvResult<Option<String>>;

    /// Delete a key of either kind. Returns whether it existed.
    async fn delete(&self, key: &str) -> KvResult<bool>;

    /// Reset the deadline of an existing key. Returns whether it existed.
    async fn expire(&self, key: &str, ttl: Duration) -> KvResult<bool>;

    /// Physically remove every expired key. Returns how many were removed.
    async fn purge_expired(&self) -> KvResult<usize>;
}

/// Key of a session record.
pub fn session_key(code: &SessionCode) -> String {
    format!("session:{code}")
}

/// Key of a session's request queue.
pub fn queue_key(code: &SessionCode) -> String {
    format!("queue:{code}")
}

/// Key of one stored response.
pub fn response_key(code: &SessionCode, request_id: &RequestId) -> String {
    format!("response:{code}:{request_id}")
}

/// Key of a session's tool manifest.
pub fn manifest_key(code: &SessionCode) -> String {
    format!("manifest:{code}")
}
