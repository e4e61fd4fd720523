//! Branded ID newtypes for type safety.
//!
//! Requests, batches, and stream connections each get a distinct ID type
//! wrapping a `String`, so a batch ID can never be passed where a request ID
//! is expected. Generated IDs are UUID v7 (time-ordered).
//!
//! [`SessionCode`] is different: it is a short human-typeable code that must
//! be validated on the way in, so it has no infallible `From<&str>`.

use std::fmt;
use std::str::FromStr;

use rand::Rng;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::constants::{SESSION_CODE_ALPHABET, SESSION_CODE_LEN};
use crate::errors::ParseError;

/// Generate a new UUID v7 string (time-ordered).
fn new_v7() -> String {
    Uuid::now_v7().to_string()
}

macro_rules! branded_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Create a new random ID (UUID v7, time-ordered).
            #[must_use]
            pub fn new() -> Self {
                Self(new_v7())
            }

            /// Return the inner string as a slice.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Consume self and return the inner `String`.
            #[must_use]
            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl std::ops::Deref for $name {
            type Target = str;
            fn deref(&self) -> &str {
                &self.0
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_owned())
            }
        }

        impl From<$name> for String {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

branded_id! {
    /// Unique identifier for a tool request.
    RequestId
}

branded_id! {
    /// Unique identifier for a flushed response batch.
    BatchId
}

branded_id! {
    /// Unique identifier for one server-side stream connection.
    ConnectionId
}

/// Opaque session code scoping one queue and one logical client connection.
///
/// Always upper-case, [`SESSION_CODE_LEN`] characters from the base32
/// alphabet. Lower-case input is accepted and normalized.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SessionCode(String);

impl SessionCode {
    /// Generate a fresh random session code.
    #[must_use]
    pub fn generate() -> Self {
        let mut rng = rand::rng();
        let code: String = (0..SESSION_CODE_LEN)
            .map(|_| {
                let idx = rng.random_range(0..SESSION_CODE_ALPHABET.len());
                char::from(SESSION_CODE_ALPHABET[idx])
            })
            .collect();
        Self(code)
    }

    /// Validate and normalize a session code.
    pub fn parse(raw: &str) -> Result<Self, ParseError> {
        let normalized = raw.trim().to_ascii_uppercase();
        if normalized.len() != SESSION_CODE_LEN {
            return Err(ParseError::new(format!(
                "session code must be {SESSION_CODE_LEN} characters, got {}",
                normalized.len()
            )));
        }
        if let Some(bad) = normalized
            .bytes()
            .find(|b| !SESSION_CODE_ALPHABET.contains(b))
        {
            return Err(ParseError::new(format!(
                "session code contains invalid character '{}'",
                char::from(bad)
            )));
        }
        Ok(Self(normalized))
    }

    /// Return the inner string as a slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for SessionCode {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for SessionCode {
    type Error = ParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<SessionCode> for String {
    fn from(code: SessionCode) -> Self {
        code.0
    }
}

impl AsRef<str> for SessionCode {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
