//! Completed tool responses, addressed by request ID.
//!
//! The client posts whole batches; each response is stored under its own key
//! so the LLM side can fetch them individually, optionally long-polling until
//! the response arrives.

use std::sync::Arc;
use std::time::Duration;

use relay_core::{RequestId, ResponseBatch, SessionCode, ToolResponse};
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::debug;

use crate::errors::Result;
use crate::kv::{KeyValueStore, response_key};

/// Response storage with long-poll support.
#[derive(Clone)]
pub struct ResponseStore {
    kv: Arc<dyn KeyValueStore>,
    ttl: Duration,
    arrivals: Arc<Notify>,
}

impl ResponseStore {
    /// Store keeping responses for `ttl`.
    pub fn new(kv: Arc<dyn KeyValueStore>, ttl: Duration) -> Self {
        Self {
            kv,
            ttl,
            arrivals: Arc::new(Notify::new()),
        }
    }

    /// Persist every response in the batch. Returns how many were stored.
    pub async fn store_batch(&self, code: &SessionCode, batch: &ResponseBatch) -> Result<usize> {
        for response in &batch.responses {
            self.put(code, response).await?;
        }
        debug!(
            session_code = %code,
            batch_id = %batch.id,
            count = batch.len(),
            "response batch stored"
        );
        self.arrivals.notify_waiters();
        Ok(batch.len())
    }

    /// Persist one response.
    pub async fn store(&self, code: &SessionCode, response: &ToolResponse) -> Result<()> {
        self.put(code, response).await?;
        self.arrivals.notify_waiters();
        Ok(())
    }

    async fn put(&self, code: &SessionCode, response: &ToolResponse) -> Result<()> {
        let payload = serde_json::to_string(response)?;
        self.kv
            .set(&response_key(code, &response.request_id), payload, Some(self.ttl))
            .await?;
        Ok(())
    }

    /// Fetch a response if it has arrived.
    pub async fn get(&self, code: &SessionCode, request_id: &RequestId) -> Result<Option<ToolResponse>> {
        match self.kv.get(&response_key(code, request_id)).await? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    /// Fetch a response, waiting up to `wait` for it to arrive.
    pub async fn wait_for(
        &self,
        code: &SessionCode,
        request_id: &RequestId,
        wait: Duration,
    ) -> Result<Option<ToolResponse>> {
        let deadline = Instant::now() + wait;
        loop {
            let notified = self.arrivals.notified();
            tokio::pin!(notified);
            // register before checking so an arrival in between is not missed
            let _ = notified.as_mut().enable();

            if let Some(response) = self.get(code, request_id).await? {
                return Ok(Some(response));
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Ok(None);
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
