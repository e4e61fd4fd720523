//! Metric names shared by server and client.
//!
//! Recording uses the `metrics` facade; the server installs the Prometheus
//! exporter. Keeping the names here avoids typos across crates.

/// Requests accepted by the enqueue endpoint (counter).
pub const REQUESTS_ENQUEUED_TOTAL: &str = "relay_requests_enqueued_total";
/// Requests handed to a client by stream or poll (counter, labels: transport).
pub const REQUESTS_DISPATCHED_TOTAL: &str = "relay_requests_dispatched_total";
/// Responses stored by the server (counter).
pub const RESPONSES_STORED_TOTAL: &str = "relay_responses_stored_total";
/// Sessions created (counter).
pub const SESSIONS_CREATED_TOTAL: &str = "relay_sessions_created_total";
/// Open streams (gauge).
pub const STREAMS_ACTIVE: &str = "relay_streams_active";
/// Streams closed (counter, labels: reason).
pub const STREAMS_CLOSED_TOTAL: &str = "relay_streams_closed_total";
/// Expired keys swept from storage (counter).
pub const KEYS_PURGED_TOTAL: &str = "relay_keys_purged_total";
/// Client reconnect attempts (counter).
pub const RECONNECTS_TOTAL: &str = "relay_reconnects_total";
/// Redelivered requests suppressed by the client (counter).
pub const DUPLICATES_SUPPRESSED_TOTAL: &str = "relay_duplicates_suppressed_total";
/// Dedup evictions that dropped ids inside the redelivery window (counter).
pub const DEDUP_EARLY_EVICTIONS_TOTAL: &str = "relay_dedup_early_evictions_total";
/// Response batches delivered (counter).
pub const BATCHES_FLUSHED_TOTAL: &str = "relay_batches_flushed_total";
/// Response batches whose delivery failed (counter).
pub const BATCHES_FAILED_TOTAL: &str = "relay_batches_failed_total";
/// Requests refused by a rate limiter (counter, labels: side).
pub const RATE_LIMITED_TOTAL: &str = "relay_rate_limited_total";
