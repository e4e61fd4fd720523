//! HTTP handlers, one module per resource.

pub mod requests;
pub mod responses;
pub mod sessions;
pub mod stream;
pub mod tools;

use relay_core::SessionCode;

use crate::errors::ApiError;

/// Parse a session code from a path segment.
pub(crate) fn parse_code(raw: &str) -> Result<SessionCode, ApiError> {
    SessionCode::parse(raw).map_err(|e| ApiError::InvalidSession(e.message))
}
