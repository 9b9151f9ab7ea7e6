//! One physical connection.
//!
//! A [`TransportSession`] owns a spawned task that dials, pumps frames in
//! both directions, and reports what happens as [`TransportEvent`]s tagged
//! with the generation the session was opened for. The task emits exactly
//! one [`TransportEventKind::Closed`], always last.
//!
//! Outbound frames go through a bounded queue; a full queue rejects the
//! send instead of blocking the caller.

use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};
use url::Url;

use crate::connector::{Connection, Connector, FrameSink, Inbound};
use crate::errors::{SendRejected, TransportError};
use crate::session::ConnectionState;

/// How long a requested close may take to flush before the socket is dropped.
const CLOSE_FLUSH_TIMEOUT: Duration = Duration::from_secs(2);

/// Something that happened on a transport, tagged with its generation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransportEvent {
    /// Generation the transport was opened for.
    pub generation: u64,
    /// What happened.
    pub kind: TransportEventKind,
}

/// Transport event payload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TransportEventKind {
    /// The connection is established.
    Opened,
    /// A text frame arrived.
    Frame(String),
    /// The socket failed. A `Closed` follows.
    Errored(TransportError),
    /// The connection is gone, with the peer's close code if it sent one.
    Closed(Option<u16>),
}

/// Lifecycle of one transport as seen by its owner.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransportState {
    /// Dialling.
    Connecting,
    /// Frames may be sent.
    Open,
    /// Close requested or observed.
    Closed,
}

/// Handle to one physical connection.
///
/// Dropping the handle closes the connection.
#[derive(Debug)]
pub struct TransportSession {
    generation: u64,
    outbound: mpsc::Sender<String>,
    cancel: CancellationToken,
    state: TransportState,
}

impl TransportSession {
    /// Dial `url` on a background task.
    ///
    /// Events are delivered on `events`, converted into the owner's event
    /// type. `buffer` bounds the outbound queue.
    pub fn open<E>(
        connector: Arc<dyn Connector>,
        url: Url,
        generation: u64,
        buffer: usize,
        events: mpsc::UnboundedSender<E>,
    ) -> Self
    where
        E: From<TransportEvent> + Send + 'static,
    {
        let (outbound, outbound_rx) = mpsc::channel(buffer.max(1));
        let cancel = CancellationToken::new();

        drop(tokio::spawn(run(
            connector,
            url,
            generation,
            outbound_rx,
            cancel.clone(),
            events,
        )));

        Self {
            generation,
            outbound,
            cancel,
            state: TransportState::Connecting,
        }
    }

    /// Generation this transport belongs to.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Current state.
    pub fn state(&self) -> TransportState {
        self.state
    }

    /// Whether frames may be sent.
    pub fn is_open(&self) -> bool {
        self.state == TransportState::Open
    }

    /// Record that the `Opened` event for this transport was observed.
    pub fn mark_open(&mut self) {
        if self.state == TransportState::Connecting {
            self.state = TransportState::Open;
        }
    }

    /// Queue a text frame without waiting.
    pub fn send(&self, frame: String) -> Result<(), SendRejected> {
        match self.state {
            TransportState::Open => {}
            TransportState::Connecting => {
                return Err(SendRejected::NotConnected {
                    state: ConnectionState::Connecting,
                });
            }
            TransportState::Closed => return Err(SendRejected::TransportClosed),
        }

        self.outbound.try_send(frame).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => SendRejected::QueueFull,
            mpsc::error::TrySendError::Closed(_) => SendRejected::TransportClosed,
        })
    }

    /// Request a close. Idempotent.
    pub fn close(&mut self) {
        if self.state != TransportState::Closed {
            debug!(generation = self.generation, "closing transport");
            self.state = TransportState::Closed;
        }
        self.cancel.cancel();
    }
}

impl Drop for TransportSession {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

// ── Task ────────────────────────────────────────────────────────────────────

fn emit<E: From<TransportEvent>>(
    events: &mpsc::UnboundedSender<E>,
    generation: u64,
    kind: TransportEventKind,
) {
    let _ = events.send(E::from(TransportEvent { generation, kind }));
}

#[instrument(skip_all, fields(generation = generation, url = %url))]
async fn run<E>(
    connector: Arc<dyn Connector>,
    url: Url,
    generation: u64,
    mut outbound_rx: mpsc::Receiver<String>,
    cancel: CancellationToken,
    events: mpsc::UnboundedSender<E>,
) where
    E: From<TransportEvent> + Send + 'static,
{
    let connected = tokio::select! {
        biased;
        () = cancel.cancelled() => {
            debug!("cancelled while dialling");
            emit(&events, generation, TransportEventKind::Closed(None));
            return;
        }
        result = connector.connect(&url) => result,
    };

    let Connection { mut sink, mut stream } = match connected {
        Ok(connection) => connection,
        Err(err) => {
            warn!(error = %err, "connection attempt failed");
            emit(&events, generation, TransportEventKind::Errored(err));
            emit(&events, generation, TransportEventKind::Closed(None));
            return;
        }
    };

    debug!("transport open");
    emit(&events, generation, TransportEventKind::Opened);

    let code = loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => {
                flush_close(&mut sink).await;
                break None;
            }
            frame = outbound_rx.recv() => {
                let Some(frame) = frame else {
                    flush_close(&mut sink).await;
                    break None;
                };
                if let Err(err) = sink.send(frame).await {
                    warn!(error = %err, "send failed");
                    emit(&events, generation, TransportEventKind::Errored(err));
                    break None;
                }
            }
            inbound = stream.next() => match inbound {
                Some(Ok(Inbound::Text(text))) => {
                    emit(&events, generation, TransportEventKind::Frame(text));
                }
                Some(Ok(Inbound::Close(code))) => {
                    debug!(?code, "peer closed");
                    break code;
                }
                Some(Err(err)) => {
                    warn!(error = %err, "socket error");
                    emit(&events, generation, TransportEventKind::Errored(err));
                    break None;
                }
                None => {
                    debug!("inbound stream ended");
                    break None;
                }
            },
        }
    };

    emit(&events, generation, TransportEventKind::Closed(code));
}

async fn flush_close(sink: &mut FrameSink) {
    match tokio::time::timeout(CLOSE_FLUSH_TIMEOUT, sink.close()).await {
        Ok(Ok(())) => {}
        Ok(Err(err)) => debug!(error = %err, "close handshake failed"),
        Err(_) => debug!("close handshake timed out"),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;
    use crate::testing::{ConnectPlan, ScriptedConnector};

    fn url() -> Url {
        Url::parse("ws://test/ws/client_t").unwrap()
    }

    fn open(
        connector: &Arc<ScriptedConnector>,
        generation: u64,
        buffer: usize,
    ) -> (TransportSession, mpsc::UnboundedReceiver<TransportEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let connector: Arc<dyn Connector> = connector.clone();
        (
            TransportSession::open(connector, url(), generation, buffer, tx),
            rx,
        )
    }

    async fn next_kind(rx: &mut mpsc::UnboundedReceiver<TransportEvent>) -> TransportEventKind {
        rx.recv().await.unwrap().kind
    }

    #[tokio::test]
    async fn opened_then_frames_then_closed_with_code() {
        let connector = Arc::new(ScriptedConnector::accepting());
        let (_session, mut rx) = open(&connector, 7, 8);
        let peer = connector.next_peer().await.unwrap();

        let event = rx.recv().await.unwrap();
        assert_eq!(event.generation, 7);
        assert_eq!(event.kind, TransportEventKind::Opened);

        assert!(peer.send_frame("a"));
        assert!(peer.send_frame("b"));
        assert_eq!(next_kind(&mut rx).await, TransportEventKind::Frame("a".into()));
        assert_eq!(next_kind(&mut rx).await, TransportEventKind::Frame("b".into()));

        peer.close(Some(1000));
        assert_eq!(next_kind(&mut rx).await, TransportEventKind::Closed(Some(1000)));
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn refused_emits_error_then_closed() {
        let connector = Arc::new(ScriptedConnector::refusing());
        let (_session, mut rx) = open(&connector, 1, 8);

        assert_matches!(
            next_kind(&mut rx).await,
            TransportEventKind::Errored(TransportError::Connect(_))
        );
        assert_eq!(next_kind(&mut rx).await, TransportEventKind::Closed(None));
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn socket_failure_emits_error_then_closed() {
        let connector = Arc::new(ScriptedConnector::accepting());
        let (_session, mut rx) = open(&connector, 1, 8);
        let peer = connector.next_peer().await.unwrap();
        assert_eq!(next_kind(&mut rx).await, TransportEventKind::Opened);

        peer.fail("reset by peer");
        assert_matches!(
            next_kind(&mut rx).await,
            TransportEventKind::Errored(TransportError::Socket(_))
        );
        assert_eq!(next_kind(&mut rx).await, TransportEventKind::Closed(None));
    }

    #[tokio::test]
    async fn close_while_dialling_emits_only_closed() {
        let connector = Arc::new(ScriptedConnector::with_fallback(ConnectPlan::Hang));
        let (mut session, mut rx) = open(&connector, 3, 8);

        session.close();
        session.close();
        assert_eq!(next_kind(&mut rx).await, TransportEventKind::Closed(None));
        assert!(rx.recv().await.is_none());
        assert_eq!(session.state(), TransportState::Closed);
    }

    #[tokio::test]
    async fn close_after_open_shuts_peer() {
        let connector = Arc::new(ScriptedConnector::accepting());
        let (mut session, mut rx) = open(&connector, 1, 8);
        let mut peer = connector.next_peer().await.unwrap();
        assert_eq!(next_kind(&mut rx).await, TransportEventKind::Opened);

        session.close();
        assert_eq!(next_kind(&mut rx).await, TransportEventKind::Closed(None));
        assert_eq!(peer.recv().await, None);
    }

    #[tokio::test]
    async fn drop_closes_connection() {
        let connector = Arc::new(ScriptedConnector::accepting());
        let (session, mut rx) = open(&connector, 1, 8);
        let mut peer = connector.next_peer().await.unwrap();
        assert_eq!(next_kind(&mut rx).await, TransportEventKind::Opened);

        drop(session);
        assert_eq!(next_kind(&mut rx).await, TransportEventKind::Closed(None));
        assert_eq!(peer.recv().await, None);
    }

    #[tokio::test]
    async fn send_requires_open() {
        let connector = Arc::new(ScriptedConnector::with_fallback(ConnectPlan::Hang));
        let (mut session, _rx) = open(&connector, 1, 8);

        assert_matches!(
            session.send("x".into()),
            Err(SendRejected::NotConnected {
                state: ConnectionState::Connecting
            })
        );
        session.close();
        assert_matches!(session.send("x".into()), Err(SendRejected::TransportClosed));
    }

    #[tokio::test]
    async fn sent_frames_reach_peer_in_order() {
        let connector = Arc::new(ScriptedConnector::accepting());
        let (mut session, mut rx) = open(&connector, 1, 8);
        let mut peer = connector.next_peer().await.unwrap();
        assert_eq!(next_kind(&mut rx).await, TransportEventKind::Opened);
        session.mark_open();
        assert!(session.is_open());

        session.send("one".into()).unwrap();
        session.send("two".into()).unwrap();
        assert_eq!(peer.recv().await.as_deref(), Some("one"));
        assert_eq!(peer.recv().await.as_deref(), Some("two"));
    }

    #[tokio::test(flavor = "current_thread")]
    async fn full_queue_rejects() {
        let connector = Arc::new(ScriptedConnector::accepting());
        let (mut session, mut rx) = open(&connector, 1, 1);
        let _peer = connector.next_peer().await.unwrap();
        assert_eq!(next_kind(&mut rx).await, TransportEventKind::Opened);
        session.mark_open();

        // The transport task cannot run between these two calls.
        session.send("first".into()).unwrap();
        assert_matches!(session.send("second".into()), Err(SendRejected::QueueFull));
    }
}
