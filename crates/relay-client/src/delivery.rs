//! Outbound response delivery.
//!
//! Every POST first takes a token from the limiter; every reply's
//! rate-limit headers flow back into it, so the limiter tracks the
//! server's view. Transient failures retry with backoff.

use std::sync::Arc;

use async_trait::async_trait;
use relay_core::metrics::RATE_LIMITED_TOTAL;
use relay_core::retry::RetryPolicy;
use relay_core::{RateLimiter, ResponseBatch, SessionCode};
use serde::Deserialize;
use tracing::{debug, instrument};

use crate::api::{RelayApi, check, connection_error};
use crate::batch::BatchSink;
use crate::errors::DeliveryError;
use crate::retry::{retry_with_backoff, should_retry_delivery};

#[derive(Deserialize)]
struct BatchReply {
    stored: usize,
}

/// Posts response batches to `POST /api/sessions/{code}/responses`.
pub struct ResponseSender {
    api: RelayApi,
    session_code: SessionCode,
    limiter: Arc<RateLimiter>,
    retry: RetryPolicy,
}

impl ResponseSender {
    /// Sender for one session.
    pub fn new(api: RelayApi, session_code: SessionCode, limiter: Arc<RateLimiter>, retry: RetryPolicy) -> Self {
        Self {
            api,
            session_code,
            limiter,
            retry,
        }
    }

    /// The outbound limiter.
    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    /// Deliver a batch, retrying transient failures. Returns how many
    /// responses the server stored.
    #[instrument(skip_all, fields(session_code = %self.session_code, batch_id = %batch.id, size = batch.len()))]
    pub async fn send(&self, batch: &ResponseBatch) -> Result<usize, DeliveryError> {
        retry_with_backoff(&self.retry, should_retry_delivery, |_attempt| async move {
            self.limiter.wait_for_request().await;
            self.post_once(batch).await
        })
        .await
    }

    async fn post_once(&self, batch: &ResponseBatch) -> Result<usize, DeliveryError> {
        let resp = self
            .api
            .http()
            .post(self.api.session_url(&self.session_code, "responses"))
            .json(batch)
            .send()
            .await
            .map_err(|e| connection_error(&e))?;

        self.limiter.update_from_headers(
            resp.headers()
                .iter()
                .filter_map(|(name, value)| Some((name.as_str(), value.to_str().ok()?))),
        );

        let resp = match check(resp).await {
            Ok(resp) => resp,
            Err(err) => {
                if matches!(err, DeliveryError::RateLimited { .. }) {
                    metrics::counter!(RATE_LIMITED_TOTAL, "side" => "client").increment(1);
                }
                return Err(err);
            }
        };
        let reply: BatchReply = resp
            .json()
            .await
            .map_err(|e| DeliveryError::Connection(relay_core::ConnectionError::protocol(e.to_string())))?;
        debug!(stored = reply.stored, remaining = self.limiter.remaining(), "batch stored");
        Ok(reply.stored)
    }
}

#[async_trait]
impl BatchSink for ResponseSender {
    async fn deliver(&self, batch: &ResponseBatch) -> Result<(), DeliveryError> {
        self.send(batch).await.map(|_| ())
    }
}
