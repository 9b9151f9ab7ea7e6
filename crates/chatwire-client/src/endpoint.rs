//! Connection endpoint resolution.
//!
//! The resolver owns the session's [`ClientId`], generated once, and turns
//! the configured base endpoint into the URL every connection attempt uses:
//!
//! | base                         | resolved                              |
//! |------------------------------|---------------------------------------|
//! | `ws://localhost:8000`        | `ws://localhost:8000/ws/client_xxx`   |
//! | `wss://host/api/ws`          | `wss://host/api/ws/client_xxx`        |
//! | `https://host`               | `wss://host/ws/client_xxx`            |

use chatwire_core::ClientId;
use url::Url;

use crate::errors::EndpointError;

/// Path segment that identifies the transport.
pub const TRANSPORT_SEGMENT: &str = "ws";

/// Derives the connection URL for one session.
#[derive(Clone, Debug)]
pub struct EndpointResolver {
    base: String,
    client_id: ClientId,
}

impl EndpointResolver {
    /// Create a resolver with a freshly generated client ID.
    pub fn new(base: impl Into<String>) -> Self {
        Self::with_client_id(base, ClientId::generate())
    }

    /// Create a resolver with a caller-supplied client ID.
    pub fn with_client_id(base: impl Into<String>, client_id: ClientId) -> Self {
        Self {
            base: base.into(),
            client_id,
        }
    }

    /// The configured base endpoint.
    pub fn base(&self) -> &str {
        &self.base
    }

    /// The session's client ID.
    pub fn client_id(&self) -> &ClientId {
        &self.client_id
    }

    /// Resolve the connection URL. Same input, same output.
    pub fn resolve(&self) -> Result<Url, EndpointError> {
        resolve_url(&self.base, &self.client_id)
    }
}

/// Build the connection URL for `client_id` from `base`.
pub fn resolve_url(base: &str, client_id: &ClientId) -> Result<Url, EndpointError> {
    let trimmed = base.trim();
    let malformed = |reason: &str| EndpointError::Malformed {
        endpoint: trimmed.to_owned(),
        reason: reason.to_owned(),
    };

    let mut url = Url::parse(trimmed).map_err(|e| malformed(&e.to_string()))?;

    let target_scheme = match url.scheme() {
        "ws" | "http" => "ws",
        "wss" | "https" => "wss",
        other => {
            return Err(EndpointError::UnsupportedScheme {
                endpoint: trimmed.to_owned(),
                scheme: other.to_owned(),
            });
        }
    };
    if url.scheme() != target_scheme {
        url.set_scheme(target_scheme)
            .map_err(|()| malformed("cannot switch to a websocket scheme"))?;
    }

    if url.host_str().is_none_or(str::is_empty) {
        return Err(malformed("missing host"));
    }
    if url.query().is_some() || url.fragment().is_some() {
        return Err(malformed("query strings and fragments are not supported"));
    }

    let has_transport_segment = url
        .path_segments()
        .is_some_and(|mut segments| segments.any(|s| s == TRANSPORT_SEGMENT));

    {
        let mut segments = url
            .path_segments_mut()
            .map_err(|()| malformed("endpoint cannot carry a path"))?;
        let _ = segments.pop_if_empty();
        if !has_transport_segment {
            let _ = segments.push(TRANSPORT_SEGMENT);
        }
        let _ = segments.push(client_id.as_str());
    }

    Ok(url)
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
