//! Response batching.
//!
//! Completed responses accumulate until the batch is full or the oldest
//! pending response has waited `max_batch_delay`; then the batch is sealed
//! and handed to a [`BatchSink`]. A failed delivery is never re-buffered:
//! [`BatchError::Delivery`] returns the batch to the caller. A timer-driven
//! flush has no caller, so its failures are logged, counted, and dropped.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use relay_core::metrics::{BATCHES_FAILED_TOTAL, BATCHES_FLUSHED_TOTAL};
use relay_core::{ResponseBatch, ToolResponse};
use relay_settings::BatchSettings;
use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::errors::{BatchError, DeliveryError};
use crate::timer::Timer;

/// Rolling statistics cover this many recent batches.
const STATS_WINDOW: usize = 100;

/// Where sealed batches go.
#[async_trait]
pub trait BatchSink: Send + Sync {
    /// Deliver one batch.
    async fn deliver(&self, batch: &ResponseBatch) -> Result<(), DeliveryError>;
}

/// Batching thresholds.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BatchConfig {
    /// When false every response is delivered alone, immediately.
    pub enabled: bool,
    /// Flush once this many responses are pending.
    pub max_batch_size: usize,
    /// Flush a partial batch this long after its first response.
    pub max_batch_delay: Duration,
    /// Sort each batch by response timestamp.
    pub preserve_order: bool,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self::from_settings(&BatchSettings::default())
    }
}

impl BatchConfig {
    /// Build from the `client.batch` settings section.
    pub fn from_settings(settings: &BatchSettings) -> Self {
        Self {
            enabled: settings.enabled,
            max_batch_size: settings.max_batch_size.max(1),
            max_batch_delay: Duration::from_millis(settings.max_batch_delay_ms),
            preserve_order: settings.preserve_order,
        }
    }
}

/// Processor counters.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchStats {
    /// Batches delivered.
    pub total_batches: u64,
    /// Responses delivered.
    pub total_responses: u64,
    /// Batches whose delivery failed.
    pub failed_batches: u64,
    /// Estimated bytes delivered.
    pub total_bytes: u64,
    /// Mean responses per batch over the recent window.
    pub average_batch_size: f64,
    /// Mean wait from first response to delivery over the recent window, in ms.
    pub average_batch_delay_ms: f64,
}

#[derive(Default)]
struct StatsWindow {
    stats: BatchStats,
    recent: VecDeque<(usize, Duration)>,
}

impl StatsWindow {
    #[allow(clippy::cast_precision_loss)]
    fn record(&mut self, size: usize, bytes: usize, delay: Duration) {
        self.stats.total_batches += 1;
        self.stats.total_responses += u64::try_from(size).unwrap_or(u64::MAX);
        self.stats.total_bytes += u64::try_from(bytes).unwrap_or(u64::MAX);

        self.recent.push_back((size, delay));
        if self.recent.len() > STATS_WINDOW {
            let _ = self.recent.pop_front();
        }
        let n = self.recent.len() as f64;
        self.stats.average_batch_size = self.recent.iter().map(|(s, _)| *s as f64).sum::<f64>() / n;
        self.stats.average_batch_delay_ms =
            self.recent.iter().map(|(_, d)| d.as_secs_f64() * 1000.0).sum::<f64>() / n;
    }
}

#[derive(Default)]
struct Pending {
    responses: Vec<ToolResponse>,
    first_at: Option<Instant>,
}

impl Pending {
    fn take(&mut self) -> Option<(Vec<ToolResponse>, Instant)> {
        let first_at = self.first_at.take()?;
        Some((std::mem::take(&mut self.responses), first_at))
    }
}

struct Inner {
    config: BatchConfig,
    sink: Arc<dyn BatchSink>,
    pending: Mutex<Pending>,
    timer: Timer,
    stats: Mutex<StatsWindow>,
}

/// Buffers responses and flushes them in batches.
#[derive(Clone)]
pub struct ResponseBatchProcessor {
    inner: Arc<Inner>,
}

impl ResponseBatchProcessor {
    /// Processor delivering into `sink`.
    pub fn new(config: BatchConfig, sink: Arc<dyn BatchSink>) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                sink,
                pending: Mutex::new(Pending::default()),
                timer: Timer::new("batch-flush"),
                stats: Mutex::new(StatsWindow::default()),
            }),
        }
    }

    /// Add a completed response.
    ///
    /// Delivers immediately when batching is off or the batch is now full;
    /// otherwise the first response of a batch arms the flush timer.
    pub async fn add_response(&self, response: ToolResponse) -> Result<(), BatchError> {
        if !self.inner.config.enabled {
            return self.inner.deliver(vec![response], Instant::now()).await;
        }

        let full = {
            let mut pending = self.inner.pending.lock();
            pending.responses.push(response);
            if pending.first_at.is_none() {
                pending.first_at = Some(Instant::now());
                let inner = Arc::downgrade(&self.inner);
                self.inner.timer.schedule(self.inner.config.max_batch_delay, async move {
                    if let Some(inner) = inner.upgrade() {
                        inner.flush_from_timer().await;
                    }
                });
            }
            if pending.responses.len() >= self.inner.config.max_batch_size {
                let _ = self.inner.timer.cancel();
                pending.take()
            } else {
                None
            }
        };

        match full {
            Some((responses, first_at)) => self.inner.deliver(responses, first_at).await,
            None => Ok(()),
        }
    }

    /// Deliver whatever is pending now.
    pub async fn flush(&self) -> Result<(), BatchError> {
        self.inner.flush().await
    }

    /// Responses waiting for the next flush.
    pub fn pending_count(&self) -> usize {
        self.inner.pending.lock().responses.len()
    }

    /// Whether the flush timer is armed.
    pub fn timer_armed(&self) -> bool {
        self.inner.timer.is_armed()
    }

    /// Counter snapshot.
    pub fn stats(&self) -> BatchStats {
        self.inner.stats.lock().stats.clone()
    }

    /// Cancel the flush timer and discard pending responses.
    pub fn dispose(&self) -> usize {
        let _ = self.inner.timer.cancel();
        let dropped = self.inner.pending.lock().take().map_or(0, |(r, _)| r.len());
        if dropped > 0 {
            warn!(dropped, "pending responses discarded");
        }
        dropped
    }
}

impl Inner {
    async fn flush(&self) -> Result<(), BatchError> {
        let _ = self.timer.cancel();
        let taken = self.pending.lock().take();
        match taken {
            Some((responses, first_at)) => self.deliver(responses, first_at).await,
            None => Ok(()),
        }
    }

    async fn flush_from_timer(&self) {
        if let Err(err) = self.flush().await {
            warn!(error = %err, "timed flush failed; batch dropped");
        }
    }

    async fn deliver(&self, mut responses: Vec<ToolResponse>, first_at: Instant) -> Result<(), BatchError> {
        if self.config.preserve_order {
            responses.sort_by_key(|r| r.timestamp);
        }
        let batch = ResponseBatch::new(responses);
        match self.sink.deliver(&batch).await {
            Ok(()) => {
                let delay = first_at.elapsed();
                self.stats
                    .lock()
                    .record(batch.len(), batch.estimated_size_bytes, delay);
                metrics::counter!(BATCHES_FLUSHED_TOTAL).increment(1);
                debug!(batch_id = %batch.id, size = batch.len(), "batch delivered");
                Ok(())
            }
            Err(source) => {
                self.stats.lock().stats.failed_batches += 1;
                metrics::counter!(BATCHES_FAILED_TOTAL).increment(1);
                Err(BatchError::Delivery { batch, source })
            }
        }
    }
}
