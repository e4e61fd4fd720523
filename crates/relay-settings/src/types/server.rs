//! Server-side settings: network, sessions, stream timing, storage.

use std::fmt;
use std::str::FromStr;

use relay_core::RateLimiterConfig;
use serde::{Deserialize, Serialize};

/// HTTP server and session settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Bind address.
    pub host: String,
    /// Bind port (0 = ephemeral).
    pub port: u16,
    /// Session lifetime in seconds; refreshed by client activity.
    pub session_ttl_secs: u64,
    /// Interval between stream heartbeats in seconds.
    pub heartbeat_interval_secs: u64,
    /// Close a stream after this many seconds without client activity.
    pub idle_timeout_secs: u64,
    /// How often an open stream polls the session queue, in milliseconds.
    pub queue_poll_interval_ms: u64,
    /// How often expired keys are swept from storage, in seconds.
    pub purge_interval_secs: u64,
    /// Upper bound on `waitMs` for response long-polls, in milliseconds.
    pub max_response_wait_ms: u64,
    /// Per-session limiter applied to inbound response deliveries.
    pub response_rate_limit: RateLimiterConfig,
    /// Queue storage backend.
    pub storage: StorageSettings,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8765,
            session_ttl_secs: 3600,
            heartbeat_interval_secs: 30,
            idle_timeout_secs: 300,
            queue_poll_interval_ms: 250,
            purge_interval_secs: 60,
            max_response_wait_ms: 30_000,
            response_rate_limit: RateLimiterConfig {
                requests_per_second: 20,
                burst_size: 40,
                window_ms: 1000,
            },
            storage: StorageSettings::default(),
        }
    }
}

/// Queue storage backend kind.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// Process-local map; lost on restart.
    #[default]
    Memory,
    /// `SQLite` file.
    Sqlite,
}

impl FromStr for StorageBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(Self::Memory),
            "sqlite" => Ok(Self::Sqlite),
            other => Err(format!("unknown storage backend: {other}")),
        }
    }
}

impl fmt::Display for StorageBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Memory => write!(f, "memory"),
            Self::Sqlite => write!(f, "sqlite"),
        }
    }
}

/// Storage settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StorageSettings {
    /// Backend kind.
    pub backend: StorageBackend,
    /// Database path for the `SQLite` backend (relative to `~/.relay`).
    pub path: String,
    /// Connection pool size for the `SQLite` backend.
    pub pool_size: u32,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Memory,
            path: "relay.db".to_string(),
            pool_size: 4,
        }
    }
}
