//! `/health` endpoint body.

use std::time::Instant;

use relay_core::constants::VERSION;
use serde::Serialize;

/// Health check response body.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    /// Always `"ok"` when the server is running.
    pub status: String,
    /// Server version.
    pub version: String,
    /// Seconds since the server started.
    pub uptime_secs: u64,
    /// Open session streams.
    pub active_streams: usize,
    /// Sessions with at least one open stream.
    pub active_sessions: usize,
}

/// Build a health response from live counters.
pub fn health_check(start_time: Instant, streams: usize, sessions: usize) -> HealthResponse {
    HealthResponse {
        status: "ok".into(),
        version: VERSION.into(),
        uptime_secs: start_time.elapsed().as_secs(),
        active_streams: streams,
        active_sessions: sessions,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_is_ok() {
        let resp = health_check(Instant::now(), 0, 0);
        assert_eq!(resp.status, "ok");
        assert!(resp.uptime_secs < 2);
    }

    #[test]
    fn uptime_increases() {
        let start = Instant::now()
            .checked_sub(std::time::Duration::from_secs(60))
            .unwrap();
        let resp = health_check(start, 0, 0);
        assert!(resp.uptime_secs >= 59);
    }

    #[test]
    fn serializes_camel_case() {
        let resp = health_check(Instant::now(), 2, 1);
        let parsed = serde_json::to_value(&resp).unwrap();
        assert_eq!(parsed["status"], "ok");
        assert_eq!(parsed["activeStreams"], 2);
        assert_eq!(parsed["activeSessions"], 1);
        assert!(parsed["uptimeSecs"].is_number());
    }
}
