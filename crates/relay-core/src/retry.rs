//! Retry policy and backoff calculation.
//!
//! Provides the portable, sync-only building blocks for retry logic. The async
//! retry loop lives in `relay-client` (it needs tokio timers); this module
//! holds the math both connection retries and delivery retries share:
//!
//! - [`RetryPolicy`]: attempts, base/max delay, multiplier, jitter
//! - [`exponential_backoff`]: exponential backoff with random jitter
//! - [`exponential_backoff_with_random`]: same formula with caller-supplied randomness
//! - [`is_retryable_status`]: the default HTTP status classifier
//! - [`parse_retry_after_header`]: parse a `Retry-After` header value

use serde::{Deserialize, Serialize};

// ─────────────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Default maximum attempts.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;
/// Default base delay in milliseconds.
pub const DEFAULT_BASE_DELAY_MS: u64 = 1000;
/// Default maximum delay in milliseconds.
pub const DEFAULT_MAX_DELAY_MS: u64 = 30_000;
/// Default backoff multiplier.
pub const DEFAULT_MULTIPLIER: f64 = 2.0;
/// Default jitter factor (±25%).
pub const DEFAULT_JITTER_FACTOR: f64 = 0.25;

/// Parameters for a backoff-driven retry loop.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryPolicy {
    /// Maximum number of retries after the first failure (default: 5).
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Delay before the first retry in ms (default: 1000).
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    /// Upper bound for the un-jittered delay in ms (default: 30000).
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Growth factor per attempt (default: 2.0).
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
    /// Jitter factor 0.0–1.0 (default: 0.25).
    #[serde(default = "default_jitter_factor")]
    pub jitter_factor: f64,
}

fn default_max_attempts() -> u32 {
    DEFAULT_MAX_ATTEMPTS
}
fn default_base_delay_ms() -> u64 {
    DEFAULT_BASE_DELAY_MS
}
fn default_max_delay_ms() -> u64 {
    DEFAULT_MAX_DELAY_MS
}
fn default_multiplier() -> f64 {
    DEFAULT_MULTIPLIER
}
fn default_jitter_factor() -> f64 {
    DEFAULT_JITTER_FACTOR
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay_ms: DEFAULT_BASE_DELAY_MS,
            max_delay_ms: DEFAULT_MAX_DELAY_MS,
            multiplier: DEFAULT_MULTIPLIER,
            jitter_factor: DEFAULT_JITTER_FACTOR,
        }
    }
}

impl RetryPolicy {
    /// Jittered delay before retry number `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> u64 {
        exponential_backoff(
            attempt,
            self.base_delay_ms,
            self.max_delay_ms,
            self.multiplier,
            self.jitter_factor,
        )
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Backoff calculation
// ─────────────────────────────────────────────────────────────────────────────

/// Calculate an exponential backoff delay with random jitter.
///
/// Formula: `min(max_delay, base_delay * multiplier^(attempt - 1)) * (1 ± jitter)`.
///
/// `attempt` is 1-based; `0` is treated as `1`.
pub fn exponential_backoff(
    attempt: u32,
    base_delay_ms: u64,
    max_delay_ms: u64,
    multiplier: f64,
    jitter_factor: f64,
) -> u64 {
    exponential_backoff_with_random(
        attempt,
        base_delay_ms,
        max_delay_ms,
        multiplier,
        jitter_factor,
        rand::random::<f64>(),
    )
}

/// Calculate backoff delay with explicit randomness.
///
/// `random` should be a value in `[0.0, 1.0)`; it maps linearly onto
/// `[-jitter, +jitter]`, so `0.5` yields the un-jittered delay.
#[must_use]
#[allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_possible_wrap
)]
pub fn exponential_backoff_with_random(
    attempt: u32,
    base_delay_ms: u64,
    max_delay_ms: u64,
    multiplier: f64,
    jitter_factor: f64,
    random: f64,
) -> u64 {
    let exponent = attempt.max(1).saturating_sub(1).min(64) as i32;
    let exponential = (base_delay_ms as f64) * multiplier.max(1.0).powi(exponent);
    let capped = exponential.min(max_delay_ms as f64);

    let jitter = jitter_factor.clamp(0.0, 1.0);
    let factor = 1.0 + (random.clamp(0.0, 1.0) * 2.0 - 1.0) * jitter;

    (capped * factor).round().max(0.0) as u64
}

// ─────────────────────────────────────────────────────────────────────────────
// Classification
// ─────────────────────────────────────────────────────────────────────────────

/// Default classifier for HTTP statuses: 429 and the transient 5xx family.
pub fn is_retryable_status(status: u16) -> bool {
    matches!(status, 429 | 500 | 502 | 503 | 504)
}

// ─────────────────────────────────────────────────────────────────────────────
// Retry-After header parsing
// ─────────────────────────────────────────────────────────────────────────────

/// Parse a `Retry-After` HTTP header value.
///
/// The value can be either a number of seconds (e.g. `"120"`) or an HTTP-date
/// (e.g. `"Thu, 01 Dec 2025 16:00:00 GMT"`).
///
/// Returns the delay in milliseconds, or `None` if parsing fails.
pub fn parse_retry_after_header(value: &str) -> Option<u64> {
    let value = value.trim();
    if let Ok(seconds) = value.parse::<u64>() {
        return Some(seconds.saturating_mul(1000));
    }

    if let Ok(date) = chrono::DateTime::parse_from_rfc2822(value) {
        let delay_ms = date
            .signed_duration_since(chrono::Utc::now())
            .num_milliseconds();
        return Some(u64::try_from(delay_ms).unwrap_or(0));
    }

    None
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
