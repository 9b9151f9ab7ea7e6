//! Physical connection establishment.
//!
//! A [`Connector`] turns a URL into a [`Connection`]: a boxed sink of
//! outbound text frames and a boxed stream of inbound events. The
//! production implementation is [`WsConnector`] over `tokio-tungstenite`;
//! tests swap in the in-memory connector from [`crate::testing`].

use std::fmt;
use std::pin::Pin;

use async_trait::async_trait;
use futures::future;
use futures::{Sink, SinkExt, Stream, StreamExt};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::{Error as WsError, Message as WsMessage};
use tracing::debug;
use url::Url;

use crate::errors::TransportError;

/// Outbound half of a connection.
pub type FrameSink = Pin<Box<dyn Sink<String, Error = TransportError> + Send>>;

/// Inbound half of a connection.
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<Inbound, TransportError>> + Send>>;

/// An inbound transport event.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Inbound {
    /// A text frame.
    Text(String),
    /// The peer closed the connection, with an optional close code.
    Close(Option<u16>),
}

/// An established duplex connection.
pub struct Connection {
    /// Outbound frames.
    pub sink: FrameSink,
    /// Inbound frames; ends when the socket is gone.
    pub stream: FrameStream,
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection").finish_non_exhaustive()
    }
}

impl Connection {
    /// Bundle a sink and stream.
    pub fn new(sink: FrameSink, stream: FrameStream) -> Self {
        Self { sink, stream }
    }
}

/// Opens physical connections.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Establish a connection to `url`.
    async fn connect(&self, url: &Url) -> Result<Connection, TransportError>;
}

/// WebSocket connector backed by `tokio-tungstenite`.
#[derive(Clone, Copy, Debug, Default)]
pub struct WsConnector;

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self, url: &Url) -> Result<Connection, TransportError> {
        let (ws, _response) = connect_async(url.as_str())
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;

        let (ws_tx, ws_rx) = ws.split();

        let sink = ws_tx
            .with(|frame: String| future::ready(Ok::<_, WsError>(WsMessage::Text(frame.into()))))
            .sink_map_err(|e| TransportError::Socket(e.to_string()));

        let stream = ws_rx.filter_map(|item| future::ready(translate(item)));

        Ok(Connection::new(Box::pin(sink), Box::pin(stream)))
    }
}

/// Map a tungstenite message to an inbound event; control frames are dropped.
fn translate(item: Result<WsMessage, WsError>) -> Option<Result<Inbound, TransportError>> {
    match item {
        Ok(WsMessage::Text(text)) => Some(Ok(Inbound::Text(text.as_str().to_owned()))),
        Ok(WsMessage::Binary(bytes)) => match String::from_utf8(bytes.to_vec()) {
            Ok(text) => Some(Ok(Inbound::Text(text))),
            Err(_) => {
                debug!(len = bytes.len(), "dropping non-utf8 binary frame");
                None
            }
        },
        Ok(WsMessage::Close(frame)) => Some(Ok(Inbound::Close(frame.map(|f| u16::from(f.code))))),
        Ok(WsMessage::Ping(_) | WsMessage::Pong(_) | WsMessage::Frame(_)) => None,
        Err(WsError::ConnectionClosed | WsError::AlreadyClosed) => None,
        Err(e) => Some(Err(TransportError::Socket(e.to_string()))),
    }
}
