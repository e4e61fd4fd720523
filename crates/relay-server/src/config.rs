//! Server configuration.

use std::time::Duration;

use relay_core::RateLimiterConfig;
use relay_settings::ServerSettings;

/// Runtime configuration for [`RelayServer`](crate::server::RelayServer).
#[derive(Clone, Debug)]
pub struct ServerConfig {
    /// Host to bind (default `"127.0.0.1"`).
    pub host: String,
    /// Port to bind (default `0` for auto-assign).
    pub port: u16,
    /// Session lifetime after the last activity.
    pub session_ttl: Duration,
    /// Interval between stream heartbeats.
    pub heartbeat_interval: Duration,
    /// Close a stream after this long without client activity.
    pub idle_timeout: Duration,
    /// How often an open stream polls its queue.
    pub queue_poll_interval: Duration,
    /// How often expired keys are swept.
    pub purge_interval: Duration,
    /// Cap on response long-poll waits.
    pub max_response_wait: Duration,
    /// Per-session limiter on inbound response batches.
    pub response_rate_limit: RateLimiterConfig,
    /// Buffered signals per stream before sends are dropped.
    pub stream_buffer: usize,
    /// Time allowed for streams and tasks to stop on shutdown.
    pub shutdown_grace: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 0,
            session_ttl: Duration::from_secs(3600),
            heartbeat_interval: Duration::from_secs(30),
            idle_timeout: Duration::from_secs(300),
            queue_poll_interval: Duration::from_millis(250),
            purge_interval: Duration::from_secs(60),
            max_response_wait: Duration::from_secs(30),
            response_rate_limit: RateLimiterConfig {
                requests_per_second: 20,
                burst_size: 40,
                window_ms: 1000,
            },
            stream_buffer: 64,
            shutdown_grace: Duration::from_secs(10),
        }
    }
}

impl ServerConfig {
    /// Build from the `server` settings section.
    pub fn from_settings(settings: &ServerSettings) -> Self {
        Self {
            host: settings.host.clone(),
            port: settings.port,
            session_ttl: Duration::from_secs(settings.session_ttl_secs),
            heartbeat_interval: Duration::from_secs(settings.heartbeat_interval_secs),
            idle_timeout: Duration::from_secs(settings.idle_timeout_secs),
            queue_poll_interval: Duration::from_millis(settings.queue_poll_interval_ms),
            purge_interval: Duration::from_secs(settings.purge_interval_secs),
            max_response_wait: Duration::from_millis(settings.max_response_wait_ms),
            response_rate_limit: settings.response_rate_limit.clone(),
            ..Self::default()
        }
    }

    /// `host:port` bind address.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
