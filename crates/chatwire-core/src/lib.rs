//! # chatwire-core
//!
//! Foundation types shared by every chatwire crate:
//!
//! - **Client IDs**: [`ids::ClientId`], the per-session correlation token sent in the URL
//! - **Wire messages**: [`messages::Message`] and the closed [`messages::MessageKind`] set
//! - **Logging**: `tracing` subscriber setup and in-memory capture for tests

#![deny(unsafe_code)]

pub mod ids;
pub mod logging;
pub mod messages;

pub use ids::ClientId;
pub use messages::{Message, MessageKind};
