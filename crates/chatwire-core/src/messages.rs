//! Wire message types.
//!
//! Every frame on the duplex connection is a single JSON object with a
//! required `type` tag drawn from a closed set. The remaining fields are
//! optional and passed through untouched.
//!
//! ```json
//! {"type": "assistant", "content": "done", "agent": "planner"}
//! ```

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

// ─────────────────────────────────────────────────────────────────────────────
// Kind
// ─────────────────────────────────────────────────────────────────────────────

/// The closed set of message kinds carried in the `type` field.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    /// Plain user or peer text.
    Text,
    /// Encoded audio payload.
    Audio,
    /// Reply from the assistant.
    Assistant,
    /// System notice.
    System,
    /// Progress/status update (e.g. `thinking`).
    Status,
    /// Server-reported error.
    Error,
    /// Partial chunk of a streamed reply.
    Stream,
    /// Agent state change.
    AgentUpdate,
}

impl MessageKind {
    /// Every kind, in wire order.
    pub const ALL: [Self; 8] = [
        Self::Text,
        Self::Audio,
        Self::Assistant,
        Self::System,
        Self::Status,
        Self::Error,
        Self::Stream,
        Self::AgentUpdate,
    ];

    /// The wire tag for this kind.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Audio => "audio",
            Self::Assistant => "assistant",
            Self::System => "system",
            Self::Status => "status",
            Self::Error => "error",
            Self::Stream => "stream",
            Self::AgentUpdate => "agent_update",
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A `type` tag outside the closed set.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
#[error("unknown message kind: {0}")]
pub struct UnknownKind(pub String);

impl FromStr for MessageKind {
    type Err = UnknownKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| UnknownKind(s.to_owned()))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Message
// ─────────────────────────────────────────────────────────────────────────────

/// A decoded, validated application-level message.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Kind tag (`type` on the wire).
    #[serde(rename = "type")]
    pub kind: MessageKind,
    /// Free-text body.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Alternate free-text body used by assistant and stream frames.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    /// Encoded audio payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio: Option<String>,
    /// Agent identifier.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent: Option<String>,
    /// Status label.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    /// Serialized time, RFC 3339 when produced locally.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
    /// Opaque structured payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl Message {
    /// An empty message of the given kind.
    #[must_use]
    pub fn new(kind: MessageKind) -> Self {
        Self {
            kind,
            message: None,
            content: None,
            audio: None,
            agent: None,
            status: None,
            timestamp: None,
            data: None,
        }
    }

    /// A `text` message carrying `message`.
    #[must_use]
    pub fn text(message: impl Into<String>) -> Self {
        Self {
            message: Some(message.into()),
            ..Self::new(MessageKind::Text)
        }
    }

    /// An `audio` message carrying an encoded payload.
    #[must_use]
    pub fn audio(payload: impl Into<String>) -> Self {
        Self {
            audio: Some(payload.into()),
            ..Self::new(MessageKind::Audio)
        }
    }

    /// A `system` message.
    #[must_use]
    pub fn system(message: impl Into<String>) -> Self {
        Self {
            message: Some(message.into()),
            ..Self::new(MessageKind::System)
        }
    }

    /// A `status` message.
    #[must_use]
    pub fn status(status: impl Into<String>) -> Self {
        Self {
            status: Some(status.into()),
            ..Self::new(MessageKind::Status)
        }
    }

    /// Attach an opaque structured payload.
    #[must_use]
    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    /// Attach the agent identifier.
    #[must_use]
    pub fn with_agent(mut self, agent: impl Into<String>) -> Self {
        self.agent = Some(agent.into());
        self
    }

    /// Stamp the message with `at` in RFC 3339.
    #[must_use]
    pub fn with_timestamp(mut self, at: DateTime<Utc>) -> Self {
        self.timestamp = Some(at.to_rfc3339());
        self
    }

    /// Stamp the message with the current time.
    #[must_use]
    pub fn stamped(self) -> Self {
        self.with_timestamp(Utc::now())
    }

    /// The human-readable body: `message`, falling back to `content`.
    #[must_use]
    pub fn body(&self) -> Option<&str> {
        self.message.as_deref().or(self.content.as_deref())
    }

    /// Parse the timestamp, if present and well-formed.
    #[must_use]
    pub fn parsed_timestamp(&self) -> Option<DateTime<Utc>> {
        let raw = self.timestamp.as_deref()?;
        DateTime::parse_from_rfc3339(raw)
            .ok()
            .map(|dt| dt.with_timezone(&Utc))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
