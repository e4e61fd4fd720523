//! Async retry loop over [`RetryPolicy`].
//!
//! Only errors the classifier accepts are retried; anything else is
//! returned at once without consuming an attempt.

use std::future::Future;
use std::time::Duration;

use relay_core::retry::RetryPolicy;
use tracing::{debug, warn};

use crate::errors::DeliveryError;

/// Run `operation` until it succeeds, the classifier rejects the error, or
/// `policy.max_attempts` retries are spent.
///
/// `operation` receives the zero-based attempt number.
pub async fn retry_with_backoff<T, E, F, Fut, P>(
    policy: &RetryPolicy,
    should_retry: P,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: Fn(&E) -> bool,
    E: std::fmt::Display,
{
    let mut attempt = 0u32;
    loop {
        match operation(attempt).await {
            Ok(value) => return Ok(value),
            Err(err) if !should_retry(&err) => {
                debug!(attempt, error = %err, "not retryable");
                return Err(err);
            }
            Err(err) if attempt >= policy.max_attempts => {
                warn!(attempts = attempt + 1, error = %err, "retries exhausted");
                return Err(err);
            }
            Err(err) => {
                attempt += 1;
                let delay_ms = policy.delay_for(attempt);
                debug!(attempt, delay_ms, error = %err, "retrying after backoff");
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            }
        }
    }
}

/// Default classifier for delivery errors.
pub fn should_retry_delivery(err: &DeliveryError) -> bool {
    err.is_retryable()
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_core::ConnectionError;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay_ms: 100,
            max_delay_ms: 1000,
            multiplier: 2.0,
            jitter_factor: 0.0,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn succeeds_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let start = tokio::time::Instant::now();
        let result: Result<u32, DeliveryError> = retry_with_backoff(&policy(5), should_retry_delivery, |attempt| {
            let _ = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if attempt < 2 {
                    Err(DeliveryError::Status { status: 503, body: String::new() })
                } else {
                    Ok(attempt)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        // 100 + 200 with no jitter
        assert_eq!(start.elapsed(), Duration::from_millis(300));
    }

    #[tokio::test(start_paused = true)]
    async fn fatal_error_returns_immediately() {
        let calls = AtomicU32::new(0);
        let result: Result<(), DeliveryError> = retry_with_backoff(&policy(5), should_retry_delivery, |_| {
            let _ = calls.fetch_add(1, Ordering::SeqCst);
            async { Err(DeliveryError::Status { status: 400, body: "bad".into() }) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausts_after_max_attempts() {
        let calls = AtomicU32::new(0);
        let result: Result<(), DeliveryError> = retry_with_backoff(&policy(3), should_retry_delivery, |_| {
            let _ = calls.fetch_add(1, Ordering::SeqCst);
            async { Err(DeliveryError::Connection(ConnectionError::network("reset"))) }
        })
        .await;
        assert!(result.is_err());
        // first try plus three retries
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn custom_classifier_is_honoured() {
        let calls = AtomicU32::new(0);
        let result: Result<(), String> = retry_with_backoff(&policy(3), |e: &String| e == "again", |attempt| {
            let _ = calls.fetch_add(1, Ordering::SeqCst);
            async move { Err(if attempt == 0 { "again".to_owned() } else { "stop".to_owned() }) }
        })
        .await;
        assert_eq!(result.unwrap_err(), "stop");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
