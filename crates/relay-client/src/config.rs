//! Resolved client configuration.

use relay_core::retry::RetryPolicy;
use relay_core::{RateLimiterConfig, SessionCode};
use relay_settings::ClientSettings;

use crate::batch::BatchConfig;
use crate::connection::ConnectionConfig;
use crate::dedup::DedupConfig;
use crate::errors::ClientError;
use crate::status::TransportKind;

/// Everything a [`RelayClient`](crate::RelayClient) needs to attach to a session.
#[derive(Clone, Debug)]
pub struct ClientConfig {
    /// Relay server root, without a trailing slash.
    pub base_url: String,
    /// Session to attach to.
    pub session_code: SessionCode,
    /// Preferred transport.
    pub transport: TransportKind,
    /// Switch to polling once the stream transport gives up.
    pub fallback_to_poll: bool,
    /// Timing and reconnect policy.
    pub connection: ConnectionConfig,
    /// Duplicate tracking.
    pub dedup: DedupConfig,
    /// Response batching.
    pub batch: BatchConfig,
    /// Outbound limiter for response delivery.
    pub rate_limit: RateLimiterConfig,
    /// Retry policy for one batch delivery.
    pub delivery_retry: RetryPolicy,
}

impl ClientConfig {
    /// Resolve the `client` settings section for one session.
    pub fn from_settings(settings: &ClientSettings, session_code: SessionCode) -> Result<Self, ClientError> {
        let base_url = settings.base_url.trim_end_matches('/').to_owned();
        if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
            return Err(ClientError::Config(format!(
                "base_url must be an http(s) URL, got {:?}",
                settings.base_url
            )));
        }
        if settings.connection.heartbeat_timeout_ms == 0 {
            return Err(ClientError::Config("heartbeat_timeout_ms must be positive".into()));
        }
        if settings.rate_limit.requests_per_second == 0 {
            return Err(ClientError::Config("requests_per_second must be positive".into()));
        }

        Ok(Self {
            base_url,
            session_code,
            transport: settings.transport.into(),
            fallback_to_poll: settings.fallback_to_poll,
            connection: ConnectionConfig::from_settings(&settings.connection),
            dedup: DedupConfig::from_settings(&settings.dedup),
            batch: BatchConfig::from_settings(&settings.batch),
            rate_limit: settings.rate_limit.clone(),
            delivery_retry: settings.delivery_retry.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use relay_settings::TransportPreference;
    use std::time::Duration;

    fn code() -> SessionCode {
        SessionCode::parse("ABCD2345").unwrap()
    }

    #[test]
    fn defaults_resolve() {
        let config = ClientConfig::from_settings(&ClientSettings::default(), code()).unwrap();
        assert_eq!(config.base_url, "http://127.0.0.1:8765");
        assert_eq!(config.transport, TransportKind::Stream);
        assert_eq!(config.connection.heartbeat_timeout, Duration::from_secs(45));
        assert_eq!(config.dedup.max_tracked_ids, 1000);
        assert_eq!(config.batch.max_batch_size, 10);
    }

    #[test]
    fn trailing_slash_is_trimmed() {
        let settings = ClientSettings {
            base_url: "https://relay.example.com/".into(),
            transport: TransportPreference::Poll,
            ..ClientSettings::default()
        };
        let config = ClientConfig::from_settings(&settings, code()).unwrap();
        assert_eq!(config.base_url, "https://relay.example.com");
        assert_eq!(config.transport, TransportKind::Poll);
    }

    #[test]
    fn rejects_non_http_url() {
        let settings = ClientSettings {
            base_url: "ftp://relay".into(),
            ..ClientSettings::default()
        };
        assert_matches!(
            ClientConfig::from_settings(&settings, code()),
            Err(ClientError::Config(msg)) if msg.contains("base_url")
        );
    }
}
