//! Durable per-session FIFO of pending tool requests.
//!
//! Atomicity comes from the backend's `pop_front`: each enqueued request is
//! handed to at most one dequeue call. A request is never re-queued once
//! popped; redelivery can only come from the client side, which is why the
//! client deduplicates.

use std::sync::Arc;
use std::time::Duration;

use relay_core::{ParseError, SessionCode, ToolRequest};
use tracing::{debug, warn};

use crate::errors::Result;
use crate::kv::{KeyValueStore, queue_key};

/// Per-session request queue over a shared [`KeyValueStore`].
#[derive(Clone)]
pub struct SessionQueueStore {
    kv: Arc<dyn KeyValueStore>,
    ttl: Duration,
}

impl SessionQueueStore {
    /// Queue store whose lists expire `ttl` after the last enqueue or refresh.
    pub fn new(kv: Arc<dyn KeyValueStore>, ttl: Duration) -> Self {
        Self { kv, ttl }
    }

    /// Append a request to the tail of the session's queue, creating it and
    /// refreshing its TTL. Returns the queue length after the append.
    ///
    /// Rejects requests that fail validation or belong to another session.
    pub async fn enqueue(&self, code: &SessionCode, request: &ToolRequest) -> Result<usize> {
        request.validate()?;
        if &request.session_code != code {
            return Err(ParseError::new(format!(
                "request belongs to session {}, not {code}",
                request.session_code
            ))
            .into());
        }
        let payload = serde_json::to_string(request)?;
        let len = self.kv.push_back(&queue_key(code), payload, Some(self.ttl)).await?;
        debug!(session_code = %code, request_id = %request.id, queue_len = len, "request enqueued");
        Ok(len)
    }

    /// Atomically pop the head request, or `None` when the queue is empty.
    ///
    /// Entries that no longer decode are logged and dropped; the next entry is
    /// returned instead.
    pub async fn dequeue(&self, code: &SessionCode) -> Result<Option<ToolRequest>> {
        let key = queue_key(code);
        loop {
            let Some(raw) = self.kv.pop_front(&key).await? else {
                return Ok(None);
            };
            match serde_json::from_str::<ToolRequest>(&raw) {
                Ok(request) => return Ok(Some(request)),
                Err(err) => {
                    warn!(session_code = %code, error = %err, "dropping malformed queue entry");
                }
            }
        }
    }

    /// Pop up to `max` requests in FIFO order.
    pub async fn dequeue_batch(&self, code: &SessionCode, max: usize) -> Result<Vec<ToolRequest>> {
        let mut out = Vec::with_capacity(max.min(16));
        while out.len() < max {
            match self.dequeue(code).await? {
                Some(request) => out.push(request),
                None => break,
            }
        }
        Ok(out)
    }

    /// Number of pending requests.
    pub async fn len(&self, code: &SessionCode) -> Result<usize> {
        Ok(self.kv.list_len(&queue_key(code)).await?)
    }

    /// Whether the session has no pending requests.
    pub async fn is_empty(&self, code: &SessionCode) -> Result<bool> {
        Ok(self.len(code).await? == 0)
    }

    /// Push the queue's deadline out by the configured TTL.
    pub async fn refresh_ttl(&self, code: &SessionCode) -> Result<bool> {
        Ok(self.kv.expire(&queue_key(code), self.ttl).await?)
    }

    /// Drop every pending request.
    pub async fn clear(&self, code: &SessionCode) -> Result<bool> {
        Ok(self.kv.delete(&queue_key(code)).await?)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
