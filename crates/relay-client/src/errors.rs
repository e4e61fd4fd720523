//! Client error types.

use relay_core::retry::is_retryable_status;
use relay_core::{ConnectionError, ResponseBatch};
use thiserror::Error;

/// Failure delivering one batch to the server.
#[derive(Clone, Debug, Error)]
pub enum DeliveryError {
    /// The server refused the batch with 429.
    #[error("rate limited by server, retry after {retry_after_ms}ms")]
    RateLimited {
        /// Server-suggested wait.
        retry_after_ms: u64,
    },
    /// The server answered with another non-success status.
    #[error("delivery rejected with status {status}: {body}")]
    Status {
        /// HTTP status.
        status: u16,
        /// Response body, for diagnostics.
        body: String,
    },
    /// The request never got an answer.
    #[error(transparent)]
    Connection(#[from] ConnectionError),
}

impl DeliveryError {
    /// Default classifier: network faults, 429, and transient 5xx retry.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::RateLimited { .. } => true,
            Self::Status { status, .. } => is_retryable_status(*status),
            Self::Connection(err) => err.is_retryable(),
        }
    }
}

/// Failure flushing a batch.
///
/// The processor never re-buffers: the batch is handed back so the caller
/// decides whether to resubmit or drop it.
#[derive(Debug, Error)]
pub enum BatchError {
    /// The sink rejected the batch.
    #[error("batch {} ({} responses) not delivered: {source}", .batch.id, .batch.len())]
    Delivery {
        /// The batch that failed.
        batch: ResponseBatch,
        /// Why it failed.
        #[source]
        source: DeliveryError,
    },
}

impl BatchError {
    /// Take back the undelivered batch.
    pub fn into_batch(self) -> ResponseBatch {
        match self {
            Self::Delivery { batch, .. } => batch,
        }
    }
}

/// Top-level client error.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The connection gave up.
    #[error(transparent)]
    Connection(#[from] ConnectionError),
    /// A direct API call failed.
    #[error(transparent)]
    Delivery(#[from] DeliveryError),
    /// A batch flush failed.
    #[error(transparent)]
    Batch(#[from] BatchError),
    /// Settings cannot produce a working client.
    #[error("invalid client configuration: {0}")]
    Config(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delivery_classifier() {
        assert!(DeliveryError::RateLimited { retry_after_ms: 10 }.is_retryable());
        assert!(DeliveryError::Status { status: 503, body: String::new() }.is_retryable());
        assert!(!DeliveryError::Status { status: 400, body: String::new() }.is_retryable());
        assert!(DeliveryError::Connection(ConnectionError::network("reset")).is_retryable());
        assert!(
            !DeliveryError::Connection(ConnectionError::from_status(401, "nope")).is_retryable()
        );
    }

    #[test]
    fn batch_error_returns_batch() {
        let batch = ResponseBatch::new(Vec::new());
        let id = batch.id.clone();
        let err = BatchError::Delivery {
            batch,
            source: DeliveryError::Status { status: 500, body: "boom".into() },
        };
        assert!(err.to_string().contains("not delivered"));
        assert_eq!(err.into_batch().id, id);
    }
}
