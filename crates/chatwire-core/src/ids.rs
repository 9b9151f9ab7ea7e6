//! Client identifiers.
//!
//! A [`ClientId`] is generated once per session controller and reused on
//! every reconnect attempt so the server can correlate physical connections
//! to one logical client.
//!
//! The suffix comes from a thread-local PRNG. It is unique enough to
//! correlate sessions within a process but it is **not** a security token:
//! never use it for authentication or authorization.

use std::fmt;

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Prefix every generated client ID carries.
pub const CLIENT_ID_PREFIX: &str = "client_";

/// Length of the random suffix after [`CLIENT_ID_PREFIX`].
pub const CLIENT_ID_SUFFIX_LEN: usize = 9;

const SUFFIX_CHARSET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

/// Session-scoped client identifier (`client_<suffix>`).
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClientId(String);

impl ClientId {
    /// Generate a fresh ID with a random lowercase alphanumeric suffix.
    #[must_use]
    pub fn generate() -> Self {
        let mut rng = rand::rng();
        let suffix: String = (0..CLIENT_ID_SUFFIX_LEN)
            .map(|_| char::from(SUFFIX_CHARSET[rng.random_range(0..SUFFIX_CHARSET.len())]))
            .collect();
        Self(format!("{CLIENT_ID_PREFIX}{suffix}"))
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

impl Default for ClientId {
    fn default() -> Self {
        Self::generate()
    }
}

impl AsRef<str> for ClientId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for ClientId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ClientId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
