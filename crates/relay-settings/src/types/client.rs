//! Client-side settings: connection, dedup, batching, delivery.

use std::fmt;
use std::str::FromStr;

use relay_core::RateLimiterConfig;
use relay_core::retry::RetryPolicy;
use serde::{Deserialize, Serialize};

/// Settings for the browser-side (or CLI) relay client.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ClientSettings {
    /// Relay server base URL.
    pub base_url: String,
    /// Preferred transport.
    pub transport: TransportPreference,
    /// Switch to polling once the stream transport gives up.
    pub fallback_to_poll: bool,
    /// Connection manager settings.
    pub connection: ConnectionSettings,
    /// Duplicate suppression settings.
    pub dedup: DedupSettings,
    /// Response batching settings.
    pub batch: BatchSettings,
    /// Outbound delivery limiter.
    pub rate_limit: RateLimiterConfig,
    /// Retry policy for response delivery.
    pub delivery_retry: RetryPolicy,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8765".to_string(),
            transport: TransportPreference::Stream,
            fallback_to_poll: true,
            connection: ConnectionSettings::default(),
            dedup: DedupSettings::default(),
            batch: BatchSettings::default(),
            rate_limit: RateLimiterConfig::default(),
            delivery_retry: RetryPolicy {
                max_attempts: 3,
                base_delay_ms: 500,
                max_delay_ms: 5000,
                ..RetryPolicy::default()
            },
        }
    }
}

/// Which transport the client opens first.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportPreference {
    /// Server-sent events.
    #[default]
    Stream,
    /// Periodic polling of the dequeue endpoint.
    Poll,
}

impl FromStr for TransportPreference {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "stream" | "sse" => Ok(Self::Stream),
            "poll" => Ok(Self::Poll),
            other => Err(format!("unknown transport: {other}")),
        }
    }
}

impl fmt::Display for TransportPreference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stream => write!(f, "stream"),
            Self::Poll => write!(f, "poll"),
        }
    }
}

/// Connection manager timing.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ConnectionSettings {
    /// Treat the connection as dead after this long without a heartbeat.
    pub heartbeat_timeout_ms: u64,
    /// Give up on a connect attempt after this long.
    pub connect_timeout_ms: u64,
    /// Poll transport interval.
    pub poll_interval_ms: u64,
    /// Reconnect policy.
    pub retry: RetryPolicy,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            heartbeat_timeout_ms: 45_000,
            connect_timeout_ms: 10_000,
            poll_interval_ms: 1000,
            retry: RetryPolicy::default(),
        }
    }
}

/// Request deduplicator bounds.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DedupSettings {
    /// Maximum number of tracked request IDs.
    pub max_tracked_ids: usize,
    /// Fraction of tracked IDs evicted on overflow.
    pub eviction_fraction: f64,
    /// Evicting an ID younger than this is reported as an early eviction.
    pub redelivery_window_secs: u64,
}

impl Default for DedupSettings {
    fn default() -> Self {
        Self {
            max_tracked_ids: 1000,
            eviction_fraction: 0.2,
            redelivery_window_secs: 60,
        }
    }
}

/// Response batching thresholds.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BatchSettings {
    /// Batch responses at all; when false every response ships alone.
    pub enabled: bool,
    /// Flush as soon as the batch holds this many responses.
    pub max_batch_size: usize,
    /// Flush a partial batch this long after its first response.
    pub max_batch_delay_ms: u64,
    /// Sort each batch by response timestamp before delivery.
    pub preserve_order: bool,
}

impl Default for BatchSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            max_batch_size: 10,
            max_batch_delay_ms: 100,
            preserve_order: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delivery_retry_default_differs_from_connection_retry() {
        let s = ClientSettings::default();
        assert_eq!(s.delivery_retry.max_attempts, 3);
        assert_eq!(s.connection.retry.max_attempts, 5);
    }

    #[test]
    fn nested_partial_json() {
        let s: ClientSettings =
            serde_json::from_str(r#"{"batch": {"maxBatchSize": 3}, "transport": "poll"}"#).unwrap();
        assert_eq!(s.batch.max_batch_size, 3);
        assert_eq!(s.batch.max_batch_delay_ms, 100);
        assert_eq!(s.transport, TransportPreference::Poll);
        assert_eq!(s.delivery_retry.base_delay_ms, 500);
    }

    #[test]
    fn transport_parses_aliases() {
        assert_eq!("SSE".parse::<TransportPreference>().unwrap(), TransportPreference::Stream);
        assert!("ws".parse::<TransportPreference>().is_err());
    }
}
