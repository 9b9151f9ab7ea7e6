//! In-memory connector for tests.
//!
//! [`ScriptedConnector`] answers each connection attempt according to a
//! queue of [`ConnectPlan`]s and records when every attempt happened. Each
//! accepted attempt yields a [`ServerPeer`], the server side of an in-memory
//! duplex pipe, which a test uses to push frames, close the socket, or read
//! what the client sent.
//!
//! Attempt timestamps use `tokio::time::Instant`, so under a paused clock
//! the gaps between attempts are exact.

use std::collections::VecDeque;
use std::fmt;

use async_trait::async_trait;
use chatwire_core::Message;
use futures::channel::mpsc as pipe;
use futures::{SinkExt, StreamExt, future};
use parking_lot::Mutex;
use tokio::sync::{Mutex as AsyncMutex, mpsc};
use tokio::time::Instant;
use url::Url;

use crate::connector::{Connection, Connector, Inbound};
use crate::errors::TransportError;

/// How the connector answers one attempt.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConnectPlan {
    /// Establish a connection and hand the server side to the test.
    Accept,
    /// Fail with [`TransportError::Connect`].
    Refuse(String),
    /// Never resolve.
    Hang,
}

impl ConnectPlan {
    /// A refusal with a generic reason.
    pub fn refuse() -> Self {
        Self::Refuse("connection refused".into())
    }
}

/// One recorded connection attempt.
#[derive(Clone, Debug)]
pub struct ConnectAttempt {
    /// URL the client dialled.
    pub url: Url,
    /// When the attempt started.
    pub at: Instant,
}

/// A [`Connector`] driven by a script.
pub struct ScriptedConnector {
    plans: Mutex<VecDeque<ConnectPlan>>,
    fallback: ConnectPlan,
    attempts: Mutex<Vec<ConnectAttempt>>,
    peers_tx: mpsc::UnboundedSender<ServerPeer>,
    peers_rx: AsyncMutex<mpsc::UnboundedReceiver<ServerPeer>>,
}

impl ScriptedConnector {
    /// A connector whose unscripted attempts follow `fallback`.
    pub fn with_fallback(fallback: ConnectPlan) -> Self {
        let (peers_tx, peers_rx) = mpsc::unbounded_channel();
        Self {
            plans: Mutex::new(VecDeque::new()),
            fallback,
            attempts: Mutex::new(Vec::new()),
            peers_tx,
            peers_rx: AsyncMutex::new(peers_rx),
        }
    }

    /// Accepts every attempt unless scripted otherwise.
    pub fn accepting() -> Self {
        Self::with_fallback(ConnectPlan::Accept)
    }

    /// Refuses every attempt unless scripted otherwise.
    pub fn refusing() -> Self {
        Self::with_fallback(ConnectPlan::refuse())
    }

    /// Queue a plan for the next unscripted attempt.
    pub fn push_plan(&self, plan: ConnectPlan) {
        self.plans.lock().push_back(plan);
    }

    /// Builder form of [`push_plan`](Self::push_plan).
    #[must_use]
    pub fn then(self, plan: ConnectPlan) -> Self {
        self.push_plan(plan);
        self
    }

    /// Every attempt so far, oldest first.
    pub fn attempts(&self) -> Vec<ConnectAttempt> {
        self.attempts.lock().clone()
    }

    /// Number of attempts so far.
    pub fn attempt_count(&self) -> usize {
        self.attempts.lock().len()
    }

    /// Wait for the server side of the next accepted connection.
    pub async fn next_peer(&self) -> Option<ServerPeer> {
        self.peers_rx.lock().await.recv().await
    }
}

impl Default for ScriptedConnector {
    fn default() -> Self {
        Self::accepting()
    }
}

#[async_trait]
impl Connector for ScriptedConnector {
    async fn connect(&self, url: &Url) -> Result<Connection, TransportError> {
        self.attempts.lock().push(ConnectAttempt {
            url: url.clone(),
            at: Instant::now(),
        });
        let plan = self.plans.lock().pop_front();
        let plan = plan.unwrap_or_else(|| self.fallback.clone());

        match plan {
            ConnectPlan::Accept => {
                let (connection, peer) = duplex(url.clone());
                let _ = self.peers_tx.send(peer);
                Ok(connection)
            }
            ConnectPlan::Refuse(reason) => Err(TransportError::Connect(reason)),
            ConnectPlan::Hang => future::pending().await,
        }
    }
}

fn duplex(url: Url) -> (Connection, ServerPeer) {
    let (client_tx, server_rx) = pipe::unbounded::<String>();
    let (server_tx, client_rx) = pipe::unbounded::<Result<Inbound, TransportError>>();

    let sink = client_tx.sink_map_err(|e| TransportError::Socket(e.to_string()));
    let connection = Connection::new(Box::pin(sink), Box::pin(client_rx));
    let peer = ServerPeer {
        url,
        tx: server_tx,
        rx: server_rx,
    };
    (connection, peer)
}

/// Server side of one in-memory connection.
///
/// Dropping it ends the client's inbound stream, which the client sees as
/// an abnormal close.
pub struct ServerPeer {
    url: Url,
    tx: pipe::UnboundedSender<Result<Inbound, TransportError>>,
    rx: pipe::UnboundedReceiver<String>,
}

impl fmt::Debug for ServerPeer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerPeer")
            .field("url", &self.url.as_str())
            .finish_non_exhaustive()
    }
}

impl ServerPeer {
    /// URL the client dialled.
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Push a raw text frame. Returns `false` once the client is gone.
    pub fn send_frame(&self, frame: impl Into<String>) -> bool {
        self.tx.unbounded_send(Ok(Inbound::Text(frame.into()))).is_ok()
    }

    /// Push a JSON value as a text frame.
    pub fn send_json(&self, value: &serde_json::Value) -> bool {
        self.send_frame(value.to_string())
    }

    /// Push a message as a text frame.
    pub fn send_message(&self, message: &Message) -> bool {
        serde_json::to_string(message).is_ok_and(|frame| self.send_frame(frame))
    }

    /// Close the connection from the server side.
    pub fn close(self, code: Option<u16>) {
        let _ = self.tx.unbounded_send(Ok(Inbound::Close(code)));
    }

    /// Fail the connection with a socket error.
    pub fn fail(self, reason: &str) {
        let _ = self
            .tx
            .unbounded_send(Err(TransportError::Socket(reason.to_owned())));
    }

    /// Next frame the client sent, or `None` once the client side closed.
    pub async fn recv(&mut self) -> Option<String> {
        self.rx.next().await
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
