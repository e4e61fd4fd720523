//! Adaptive token-bucket rate limiter.
//!
//! Tokens accrue continuously at `requests_per_second` up to `burst_size`;
//! refill is computed lazily on every check. A sliding window of grant
//! timestamps additionally caps grants to `requests_per_second` per
//! `window_ms`. Server feedback (`x-ratelimit-remaining`, `retry-after`)
//! can drain the bucket and push back the next refill.
//!
//! Time is read from [`tokio::time::Instant`], so paused-clock tests drive
//! refill deterministically.

use std::collections::VecDeque;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::debug;

use crate::constants::{HEADER_RATELIMIT_LIMIT, HEADER_RATELIMIT_REMAINING, HEADER_RETRY_AFTER};
use crate::errors::RateLimitError;
use crate::retry::parse_retry_after_header;

// ─────────────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Rate limiter parameters.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimiterConfig {
    /// Steady-state refill rate and sliding-window cap (default: 10).
    #[serde(default = "default_requests_per_second")]
    pub requests_per_second: u32,
    /// Bucket capacity (default: 20).
    #[serde(default = "default_burst_size")]
    pub burst_size: u32,
    /// Sliding window length in ms (default: 1000).
    #[serde(default = "default_window_ms")]
    pub window_ms: u64,
}

fn default_requests_per_second() -> u32 {
    10
}
fn default_burst_size() -> u32 {
    20
}
fn default_window_ms() -> u64 {
    1000
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            requests_per_second: default_requests_per_second(),
            burst_size: default_burst_size(),
            window_ms: default_window_ms(),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Limiter
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug)]
struct RateLimitState {
    tokens: f64,
    last_refill: Instant,
    request_timestamps: VecDeque<Instant>,
    blocked_until: Option<Instant>,
    server_limit: Option<u32>,
}

/// Token bucket with a sliding-window cap and server feedback.
#[derive(Debug)]
pub struct RateLimiter {
    config: RateLimiterConfig,
    state: Mutex<RateLimitState>,
}

impl RateLimiter {
    /// Create a limiter with a full bucket.
    pub fn new(config: RateLimiterConfig) -> Self {
        let state = RateLimitState {
            tokens: f64::from(config.burst_size),
            last_refill: Instant::now(),
            request_timestamps: VecDeque::new(),
            blocked_until: None,
            server_limit: None,
        };
        Self {
            config,
            state: Mutex::new(state),
        }
    }

    /// The active configuration.
    pub fn config(&self) -> &RateLimiterConfig {
        &self.config
    }

    /// Check-and-consume one token.
    ///
    /// Refuses when the server asked us to back off, when the sliding window
    /// already holds `requests_per_second` grants, or when the bucket is empty.
    pub fn allow_request(&self) -> Result<(), RateLimitError> {
        let now = Instant::now();
        let window = Duration::from_millis(self.config.window_ms);
        let mut state = self.state.lock();
        self.refill(&mut state, now);

        if let Some(until) = state.blocked_until {
            if now < until {
                return Err(RateLimitError {
                    retry_after_ms: duration_ms_ceil(until - now),
                });
            }
            state.blocked_until = None;
        }

        while state
            .request_timestamps
            .front()
            .is_some_and(|t| now.saturating_duration_since(*t) >= window)
        {
            let _ = state.request_timestamps.pop_front();
        }

        let per_window = usize::try_from(self.config.requests_per_second).unwrap_or(usize::MAX);
        if state.request_timestamps.len() >= per_window {
            let oldest = state.request_timestamps.front().copied().unwrap_or(now);
            let wait = (oldest + window).saturating_duration_since(now);
            return Err(RateLimitError {
                retry_after_ms: duration_ms_ceil(wait),
            });
        }

        if state.tokens < 1.0 {
            let rate = f64::from(self.config.requests_per_second.max(1));
            let wait = Duration::from_secs_f64((1.0 - state.tokens) / rate);
            return Err(RateLimitError {
                retry_after_ms: duration_ms_ceil(wait),
            });
        }

        state.tokens -= 1.0;
        state.request_timestamps.push_back(now);
        Ok(())
    }

    /// Wait until a request is allowed, then consume it.
    pub async fn wait_for_request(&self) {
        loop {
            match self.allow_request() {
                Ok(()) => return,
                Err(err) => {
                    debug!(retry_after_ms = err.retry_after_ms, "rate limited, waiting");
                    tokio::time::sleep(Duration::from_millis(err.retry_after_ms.max(1))).await;
                }
            }
        }
    }

    /// Adapt to server feedback.
    ///
    /// Header names are matched case-insensitively. A remaining count of zero
    /// or any `retry-after` drains the bucket; `retry-after` also pushes the
    /// next refill back by the given delay.
    pub fn update_from_headers<I, K, V>(&self, headers: I)
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let now = Instant::now();
        let mut state = self.state.lock();
        self.refill(&mut state, now);

        for (name, value) in headers {
            let name = name.as_ref();
            let value = value.as_ref().trim();
            if name.eq_ignore_ascii_case(HEADER_RATELIMIT_LIMIT) {
                if let Ok(limit) = value.parse::<u32>() {
                    state.server_limit = Some(limit);
                }
            } else if name.eq_ignore_ascii_case(HEADER_RATELIMIT_REMAINING) {
                if let Ok(remaining) = value.parse::<u32>() {
                    state.tokens = state.tokens.min(f64::from(remaining));
                }
            } else if name.eq_ignore_ascii_case(HEADER_RETRY_AFTER) {
                if let Some(delay_ms) = parse_retry_after_header(value) {
                    let until = now + Duration::from_millis(delay_ms);
                    state.tokens = 0.0;
                    state.blocked_until = Some(until);
                    state.last_refill = until;
                    debug!(delay_ms, "server requested backoff");
                }
            }
        }
    }

    /// Whole tokens currently available.
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn remaining(&self) -> u32 {
        let mut state = self.state.lock();
        self.refill(&mut state, Instant::now());
        state.tokens.floor().max(0.0) as u32
    }

    /// Effective limit: the server-advertised one if seen, else the configured rate.
    pub fn limit(&self) -> u32 {
        self.state
            .lock()
            .server_limit
            .unwrap_or(self.config.requests_per_second)
    }

    /// Refill the bucket and forget window history and server feedback.
    pub fn reset(&self) {
        let mut state = self.state.lock();
        state.tokens = f64::from(self.config.burst_size);
        state.last_refill = Instant::now();
        state.request_timestamps.clear();
        state.blocked_until = None;
        state.server_limit = None;
    }

    fn refill(&self, state: &mut RateLimitState, now: Instant) {
        let elapsed = now.saturating_duration_since(state.last_refill);
        if elapsed.is_zero() {
            return;
        }
        let added = elapsed.as_secs_f64() * f64::from(self.config.requests_per_second);
        state.tokens = (state.tokens + added).min(f64::from(self.config.burst_size));
        state.last_refill = now;
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(RateLimiterConfig::default())
    }
}

fn duration_ms_ceil(d: Duration) -> u64 {
    let ms = d.as_micros().div_ceil(1000);
    u64::try_from(ms).unwrap_or(u64::MAX).max(1)
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
