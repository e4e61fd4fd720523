//! Bounded tracker of processed request IDs.
//!
//! Redeliveries happen when a stream drops after dequeue, or when stream
//! and poll overlap across a transport switch. The tracker keeps IDs in
//! insertion order; once it holds more than `max_tracked_ids`, the oldest
//! `eviction_fraction` of them are dropped in one go. Recency is by first
//! sighting, not by last lookup.

use std::collections::{HashSet, VecDeque};
use std::time::Duration;

use parking_lot::Mutex;
use relay_core::metrics::{DEDUP_EARLY_EVICTIONS_TOTAL, DUPLICATES_SUPPRESSED_TOTAL};
use relay_core::{RequestId, ToolRequest};
use relay_settings::DedupSettings;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, warn};

/// Tracker bounds.
#[derive(Clone, Debug, PartialEq)]
pub struct DedupConfig {
    /// Maximum IDs held.
    pub max_tracked_ids: usize,
    /// Fraction of `max_tracked_ids` evicted on overflow (at least one ID).
    pub eviction_fraction: f64,
    /// Evicting an ID seen more recently than this is reported.
    pub redelivery_window: Duration,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self::from_settings(&DedupSettings::default())
    }
}

impl DedupConfig {
    /// Build from the `client.dedup` settings section.
    pub fn from_settings(settings: &DedupSettings) -> Self {
        Self {
            max_tracked_ids: settings.max_tracked_ids.max(1),
            eviction_fraction: settings.eviction_fraction.clamp(0.0, 1.0),
            redelivery_window: Duration::from_secs(settings.redelivery_window_secs),
        }
    }

    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss
    )]
    fn eviction_count(&self) -> usize {
        let n = (self.max_tracked_ids as f64 * self.eviction_fraction).floor() as usize;
        n.max(1)
    }
}

/// Portable tracker contents, oldest ID first.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DedupState {
    /// Tracked IDs in insertion order.
    pub processed_ids: Vec<RequestId>,
    /// Most recently marked ID.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_processed_id: Option<RequestId>,
}

#[derive(Default)]
struct Tracker {
    order: VecDeque<(RequestId, Instant)>,
    ids: HashSet<RequestId>,
    last_processed_id: Option<RequestId>,
}

impl Tracker {
    fn insert(&mut self, id: RequestId, at: Instant) -> bool {
        if !self.ids.insert(id.clone()) {
            return false;
        }
        self.order.push_back((id, at));
        true
    }

    fn pop_oldest(&mut self) -> Option<(RequestId, Instant)> {
        let (id, at) = self.order.pop_front()?;
        let _ = self.ids.remove(&id);
        Some((id, at))
    }
}

/// Suppresses re-execution of already processed requests.
pub struct RequestDeduplicator {
    config: DedupConfig,
    state: Mutex<Tracker>,
}

impl RequestDeduplicator {
    /// Empty tracker.
    pub fn new(config: DedupConfig) -> Self {
        Self {
            config,
            state: Mutex::new(Tracker::default()),
        }
    }

    /// Whether `id` has been marked.
    pub fn is_processed(&self, id: &RequestId) -> bool {
        self.state.lock().ids.contains(id)
    }

    /// Mark `id` processed and record it as the last processed ID.
    pub fn mark_processed(&self, id: RequestId) {
        let mut state = self.state.lock();
        state.last_processed_id = Some(id.clone());
        if state.insert(id, Instant::now()) {
            self.enforce_bound(&mut state);
        }
    }

    /// Atomically check and mark. Returns `true` if `id` was new.
    ///
    /// A `false` return counts as a suppressed duplicate.
    pub fn check_and_mark(&self, id: &RequestId) -> bool {
        let mut state = self.state.lock();
        if state.ids.contains(id) {
            drop(state);
            metrics::counter!(DUPLICATES_SUPPRESSED_TOTAL).increment(1);
            debug!(request_id = %id, "duplicate request suppressed");
            return false;
        }
        state.last_processed_id = Some(id.clone());
        let _ = state.insert(id.clone(), Instant::now());
        self.enforce_bound(&mut state);
        true
    }

    /// Requests not yet processed, in input order. Repeats within `requests`
    /// keep only their first occurrence. Nothing is marked.
    pub fn filter_new_requests(&self, requests: Vec<ToolRequest>) -> Vec<ToolRequest> {
        let state = self.state.lock();
        let mut seen = HashSet::new();
        let before = requests.len();
        let fresh: Vec<ToolRequest> = requests
            .into_iter()
            .filter(|r| !state.ids.contains(&r.id) && seen.insert(r.id.clone()))
            .collect();
        drop(state);
        let suppressed = before - fresh.len();
        if suppressed > 0 {
            metrics::counter!(DUPLICATES_SUPPRESSED_TOTAL)
                .increment(u64::try_from(suppressed).unwrap_or(u64::MAX));
        }
        fresh
    }

    /// Number of tracked IDs.
    pub fn tracked_count(&self) -> usize {
        self.state.lock().order.len()
    }

    /// Most recently marked ID.
    pub fn last_processed_id(&self) -> Option<RequestId> {
        self.state.lock().last_processed_id.clone()
    }

    /// Forget everything.
    pub fn clear(&self) {
        *self.state.lock() = Tracker::default();
    }

    /// Snapshot for carrying across a connection manager recreation.
    pub fn export_state(&self) -> DedupState {
        let state = self.state.lock();
        DedupState {
            processed_ids: state.order.iter().map(|(id, _)| id.clone()).collect(),
            last_processed_id: state.last_processed_id.clone(),
        }
    }

    /// Merge a snapshot. Imported IDs count as seen now; if the merge
    /// overflows the bound, the oldest IDs are dropped silently.
    pub fn import_state(&self, imported: DedupState) {
        let mut state = self.state.lock();
        let now = Instant::now();
        let count = imported.processed_ids.len();
        for id in imported.processed_ids {
            let _ = state.insert(id, now);
        }
        if imported.last_processed_id.is_some() {
            state.last_processed_id = imported.last_processed_id;
        }
        while state.order.len() > self.config.max_tracked_ids {
            let _ = state.pop_oldest();
        }
        debug!(imported = count, tracked = state.order.len(), "dedup state imported");
    }

    fn enforce_bound(&self, state: &mut Tracker) {
        if state.order.len() <= self.config.max_tracked_ids {
            return;
        }
        let now = Instant::now();
        let mut newest_evicted = None;
        for _ in 0..self.config.eviction_count() {
            match state.pop_oldest() {
                Some((_, at)) => newest_evicted = Some(at),
                None => break,
            }
        }
        if let Some(at) = newest_evicted {
            let age = now.saturating_duration_since(at);
            if age < self.config.redelivery_window {
                metrics::counter!(DEDUP_EARLY_EVICTIONS_TOTAL).increment(1);
                warn!(
                    age_ms = u64::try_from(age.as_millis()).unwrap_or(u64::MAX),
                    window_secs = self.config.redelivery_window.as_secs(),
                    "evicted request ids inside the redelivery window"
                );
            }
        }
    }
}

impl Default for RequestDeduplicator {
    fn default() -> Self {
        Self::new(DedupConfig::default())
    }
}
