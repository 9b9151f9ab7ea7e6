//! Client error taxonomy.
//!
//! Only [`SessionError`] is ever handed to observers. [`DecodeError`] stays
//! inside the dispatcher and [`SendRejected`] is returned to the caller of
//! `send`.

use chatwire_core::messages::UnknownKind;
use thiserror::Error;

use crate::session::ConnectionState;

/// The base endpoint could not be turned into a connection URL.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum EndpointError {
    /// Not parseable as a URL, or structurally unusable.
    #[error("malformed endpoint `{endpoint}`: {reason}")]
    Malformed {
        /// The endpoint as configured.
        endpoint: String,
        /// What is wrong with it.
        reason: String,
    },

    /// Scheme is not one of `ws`, `wss`, `http`, `https`.
    #[error("unsupported scheme `{scheme}` in endpoint `{endpoint}`")]
    UnsupportedScheme {
        /// The endpoint as configured.
        endpoint: String,
        /// The offending scheme.
        scheme: String,
    },
}

/// Socket-level failure reported by the platform.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum TransportError {
    /// The connection could not be established.
    #[error("connection failed: {0}")]
    Connect(String),
    /// An established connection failed while reading or writing.
    #[error("socket error: {0}")]
    Socket(String),
}

/// An inbound frame that is not a valid message. Logged and discarded.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// Not JSON, or a field has the wrong shape.
    #[error("malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),
    /// Valid JSON but not an object.
    #[error("frame is not a JSON object")]
    NotAnObject,
    /// The `type` field is absent or not a string.
    #[error("frame has no string `type` field")]
    MissingKind,
    /// The `type` field is outside the closed set.
    #[error(transparent)]
    UnknownKind(#[from] UnknownKind),
}

/// A send that never reached the network.
#[derive(Debug, Error)]
pub enum SendRejected {
    /// The session is not connected.
    #[error("cannot send while {state}")]
    NotConnected {
        /// State at the time of the call.
        state: ConnectionState,
    },
    /// The per-connection outbound queue is full.
    #[error("outbound queue is full")]
    QueueFull,
    /// The transport task already stopped.
    #[error("transport is shutting down")]
    TransportClosed,
    /// The message could not be serialized.
    #[error("failed to encode message: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Failures observable by the application through `on_error`.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum SessionError {
    /// The endpoint could not be resolved; no attempt was consumed.
    #[error(transparent)]
    Construction(#[from] EndpointError),
    /// The socket failed; a `close` event follows.
    #[error(transparent)]
    Transport(#[from] TransportError),
    /// The reconnect budget is spent; the session stays disconnected until
    /// the next explicit `connect()`.
    #[error("gave up reconnecting after {attempts} attempts")]
    RetryExhausted {
        /// Attempts made before giving up.
        attempts: u32,
    },
}

/// Result type for session operations.
pub type Result<T> = std::result::Result<T, SessionError>;

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
