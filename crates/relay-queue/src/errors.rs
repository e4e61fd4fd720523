//! Error types for the store layer.
//!
//! [`StoreError`] separates backend faults ([`StorageError`], surfaced to the
//! caller and never retried here) from per-item validation faults
//! ([`ParseError`]) and session lifecycle outcomes.

use relay_core::{ParseError, SessionCode, StorageError};
use thiserror::Error;

/// Errors returned by the session-scoped stores.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The key-value backend failed.
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// A payload failed validation or decoding.
    #[error(transparent)]
    Invalid(#[from] ParseError),

    /// No session with this code exists.
    #[error("session not found: {0}")]
    SessionNotFound(SessionCode),

    /// The session existed but its TTL has elapsed.
    #[error("session expired: {0}")]
    SessionExpired(SessionCode),

    /// A session with this code already exists.
    #[error("session already exists: {0}")]
    SessionExists(SessionCode),
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::Invalid(err.into())
    }
}

/// Convenience type alias for store results.
pub type Result<T> = std::result::Result<T, StoreError>;

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn storage_error_is_transparent() {
        let err: StoreError = StorageError::new("disk full").into();
        assert_eq!(err.to_string(), "storage error: disk full");
    }

    #[test]
    fn serde_error_maps_to_invalid() {
        let serde_err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let err: StoreError = serde_err.into();
        assert_matches!(err, StoreError::Invalid(_));
    }

    #[test]
    fn session_errors_display_code() {
        let code = SessionCode::parse("ABCD2345").unwrap();
        assert_eq!(
            StoreError::SessionExpired(code).to_string(),
            "session expired: ABCD2345"
        );
    }
}
