//! Package-level constants shared by server and client.

/// Current version of the relay (sourced from Cargo.toml).
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Package name.
pub const NAME: &str = "relay";

/// Metadata API version served by `/metadata`.
pub const API_VERSION: &str = "1.0.0";

/// API versions the metadata endpoint can negotiate.
pub const SUPPORTED_API_VERSIONS: &[&str] = &[API_VERSION];

/// Length of a session code.
pub const SESSION_CODE_LEN: usize = 8;

/// Alphabet for session codes (RFC 4648 base32).
pub const SESSION_CODE_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ234567";

/// Maximum length of a tool name.
pub const MAX_TOOL_NAME_LEN: usize = 128;

/// Header carrying the request budget of the current window.
pub const HEADER_RATELIMIT_LIMIT: &str = "x-ratelimit-limit";

/// Header carrying the remaining request budget.
pub const HEADER_RATELIMIT_REMAINING: &str = "x-ratelimit-remaining";

/// Standard `Retry-After` header.
pub const HEADER_RETRY_AFTER: &str = "retry-after";
