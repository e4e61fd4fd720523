//! Settings type definitions.
//!
//! All types use `#[serde(rename_all = "camelCase", default)]`, so partial
//! JSON is accepted and missing fields get their production default.

mod client;
mod server;

pub use client::*;
pub use server::*;

use relay_core::logging::LogFormat;
use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Root settings type.
///
/// ```json
/// {
///   "server": { "port": 9000, "storage": { "backend": "sqlite" } },
///   "client": { "batch": { "maxBatchSize": 5 } },
///   "logging": { "level": "debug" }
/// }
/// ```
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RelaySettings {
    /// Settings schema version.
    pub version: String,
    /// Server settings.
    pub server: ServerSettings,
    /// Client settings.
    pub client: ClientSettings,
    /// Logging settings.
    pub logging: LoggingSettings,
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self {
            version: "0.1.0".to_string(),
            server: ServerSettings::default(),
            client: ClientSettings::default(),
            logging: LoggingSettings::default(),
        }
    }
}

impl RelaySettings {
    /// Reject combinations no component can run with.
    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: &str| Err(SettingsError::InvalidValue(msg.to_string()));

        if self.server.heartbeat_interval_secs == 0 {
            return invalid("server.heartbeatIntervalSecs must be at least 1");
        }
        if self.server.idle_timeout_secs <= self.server.heartbeat_interval_secs {
            return invalid("server.idleTimeoutSecs must exceed server.heartbeatIntervalSecs");
        }
        if self.server.session_ttl_secs == 0 {
            return invalid("server.sessionTtlSecs must be at least 1");
        }
        if self.server.queue_poll_interval_ms == 0 {
            return invalid("server.queuePollIntervalMs must be at least 1");
        }
        if self.server.storage.pool_size == 0 {
            return invalid("server.storage.poolSize must be at least 1");
        }
        if self.client.batch.max_batch_size == 0 {
            return invalid("client.batch.maxBatchSize must be at least 1");
        }
        if self.client.dedup.max_tracked_ids == 0 {
            return invalid("client.dedup.maxTrackedIds must be at least 1");
        }
        let fraction = self.client.dedup.eviction_fraction;
        if !(fraction > 0.0 && fraction <= 1.0) {
            return invalid("client.dedup.evictionFraction must be in (0, 1]");
        }
        if self.client.rate_limit.requests_per_second == 0
            || self.server.response_rate_limit.requests_per_second == 0
        {
            return invalid("rate limit requestsPerSecond must be at least 1");
        }
        Ok(())
    }
}

/// Logging configuration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default filter directive (overridden by `RUST_LOG`).
    pub level: String,
    /// Output format.
    pub format: LogFormat,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Compact,
        }
    }
}
