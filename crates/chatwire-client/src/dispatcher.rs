//! Frame decoding and observer fan-out.
//!
//! Inbound frames are decoded into [`Message`]s with a strict guard: the
//! frame must be a JSON object whose `type` is one of the known kinds.
//! Anything else is logged and dropped; observers only ever see valid
//! messages.
//!
//! Observers are invoked synchronously in registration order. Each emit
//! iterates over a snapshot of the registry, so a handler may register or
//! remove observers (including itself) without disturbing the delivery in
//! progress.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chatwire_core::{Message, MessageKind};
use parking_lot::RwLock;
use serde_json::Value;
use tracing::{trace, warn};

use crate::errors::{DecodeError, SessionError};

// ─────────────────────────────────────────────────────────────────────────────
// Codec
// ─────────────────────────────────────────────────────────────────────────────

/// Decode one inbound text frame.
pub fn decode(raw: &str) -> Result<Message, DecodeError> {
    let value: Value = serde_json::from_str(raw)?;
    let Value::Object(ref fields) = value else {
        return Err(DecodeError::NotAnObject);
    };
    let Some(tag) = fields.get("type").and_then(Value::as_str) else {
        return Err(DecodeError::MissingKind);
    };
    let _kind: MessageKind = tag.parse()?;
    Ok(serde_json::from_value(value)?)
}

/// Encode one outbound message.
pub fn encode(message: &Message) -> Result<String, serde_json::Error> {
    serde_json::to_string(message)
}

// ─────────────────────────────────────────────────────────────────────────────
// Events
// ─────────────────────────────────────────────────────────────────────────────

/// Observable event names.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EventName {
    /// The session connected.
    Open,
    /// A message arrived.
    Message,
    /// Something failed.
    Error,
    /// The connection closed.
    Close,
}

impl EventName {
    /// Lowercase name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Message => "message",
            Self::Error => "error",
            Self::Close => "close",
        }
    }
}

impl fmt::Display for EventName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Details of a `close` event.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CloseInfo {
    /// Close code sent by the peer, if any.
    pub code: Option<u16>,
    /// Whether the application asked for the close.
    pub requested: bool,
    /// Delay until the next automatic attempt. `None` means no attempt is
    /// scheduled.
    pub reconnect_in: Option<Duration>,
}

/// An event delivered to observers.
#[derive(Clone, Debug, PartialEq)]
pub enum SessionEvent {
    /// The session connected.
    Open,
    /// A message arrived.
    Message(Message),
    /// Something failed.
    Error(SessionError),
    /// The connection closed.
    Close(CloseInfo),
}

impl SessionEvent {
    /// Name observers register under.
    pub fn name(&self) -> EventName {
        match self {
            Self::Open => EventName::Open,
            Self::Message(_) => EventName::Message,
            Self::Error(_) => EventName::Error,
            Self::Close(_) => EventName::Close,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Observers
// ─────────────────────────────────────────────────────────────────────────────

/// Handle returned by registration, used to remove the observer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ObserverId(u64);

type Handler = Arc<dyn Fn(&SessionEvent) + Send + Sync>;

struct Entry {
    id: ObserverId,
    name: EventName,
    handler: Handler,
}

/// Ordered observer registry.
#[derive(Default)]
pub struct Observers {
    entries: RwLock<Vec<Entry>>,
    next_id: AtomicU64,
}

impl Observers {
    /// Register `handler` for `name`.
    pub fn register<F>(&self, name: EventName, handler: F) -> ObserverId
    where
        F: Fn(&SessionEvent) + Send + Sync + 'static,
    {
        let id = ObserverId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.entries.write().push(Entry {
            id,
            name,
            handler: Arc::new(handler),
        });
        id
    }

    /// Remove an observer. Returns `false` if it was already gone.
    pub fn remove(&self, id: ObserverId) -> bool {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|e| e.id != id);
        entries.len() != before
    }

    /// Number of observers registered for `name`.
    pub fn count(&self, name: EventName) -> usize {
        self.entries.read().iter().filter(|e| e.name == name).count()
    }

    /// Deliver `event` to every observer registered for its name.
    pub fn emit(&self, event: &SessionEvent) {
        let name = event.name();
        let snapshot: Vec<Handler> = self
            .entries
            .read()
            .iter()
            .filter(|e| e.name == name)
            .map(|e| Arc::clone(&e.handler))
            .collect();

        trace!(event = %name, observers = snapshot.len(), "emitting");
        for handler in snapshot {
            handler(event);
        }
    }
}

impl fmt::Debug for Observers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Observers")
            .field("len", &self.entries.read().len())
            .finish_non_exhaustive()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Dispatcher
// ─────────────────────────────────────────────────────────────────────────────

/// Decodes inbound frames and routes events to observers.
#[derive(Debug, Default)]
pub struct Dispatcher {
    observers: Observers,
}

impl Dispatcher {
    /// A dispatcher with no observers.
    pub fn new() -> Self {
        Self::default()
    }

    /// The observer registry.
    pub fn observers(&self) -> &Observers {
        &self.observers
    }

    /// Decode `raw` and deliver it as a `message` event.
    ///
    /// Returns `false` if the frame was dropped.
    pub fn dispatch_frame(&self, raw: &str) -> bool {
        match decode(raw) {
            Ok(message) => {
                self.observers.emit(&SessionEvent::Message(message));
                true
            }
            Err(err) => {
                warn!(error = %err, frame_len = raw.len(), "dropping undecodable frame");
                false
            }
        }
    }

    /// Deliver a lifecycle event.
    pub fn emit(&self, event: &SessionEvent) {
        self.observers.emit(event);
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
