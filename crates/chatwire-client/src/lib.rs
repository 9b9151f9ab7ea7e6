//! # chatwire-client
//!
//! A reconnecting, typed, event-driven WebSocket session client.
//!
//! The [`SessionController`] is the only type most hosts need. It keeps one
//! logical session alive across physical reconnects:
//!
//! - [`endpoint`] derives the connection URL and the session's [`ClientId`]
//! - [`transport`] owns one physical socket per generation
//! - [`supervisor`] decides whether and when to reconnect (linear backoff)
//! - [`dispatcher`] decodes frames and fans messages out to observers
//!
//! ```no_run
//! use std::sync::Arc;
//! use chatwire_client::{SessionConfig, SessionController, WsConnector};
//!
//! # async fn run() {
//! let controller = SessionController::new(SessionConfig::default(), Arc::new(WsConnector));
//! let _ = controller.on_message(|msg| println!("{}: {:?}", msg.kind, msg.body()));
//! if let Err(err) = controller.connect() {
//!     eprintln!("cannot connect: {err}");
//! }
//! # }
//! ```
//!
//! [`ClientId`]: chatwire_core::ClientId

#![deny(unsafe_code)]

pub mod connector;
pub mod dispatcher;
pub mod endpoint;
pub mod errors;
pub mod session;
pub mod supervisor;
pub mod testing;
pub mod transport;

pub use connector::{Connection, Connector, Inbound, WsConnector};
pub use dispatcher::{CloseInfo, Dispatcher, EventName, ObserverId, SessionEvent};
pub use endpoint::EndpointResolver;
pub use errors::{DecodeError, EndpointError, SendRejected, SessionError, TransportError};
pub use session::{
    ConnectionState, SessionConfig, SessionController, SessionSnapshot, WeakSessionController,
};
pub use supervisor::{ReconnectPolicy, ReconnectSupervisor, RetryDecision, SupervisorState};
