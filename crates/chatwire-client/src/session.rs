//! Session controller.
//!
//! [`SessionController`] is the facade hosts use. It owns the endpoint
//! resolver, the current transport, the reconnection supervisor and the
//! observer registry, and it is the only writer of connection state.
//!
//! Transport events and retry timers are funnelled through one channel into
//! a driver task, so lifecycle transitions are applied strictly in order.
//! Every physical connection is tagged with a generation; events from any
//! generation other than the current one are dropped. Observers are always
//! invoked with no internal lock held, so a handler may call back into the
//! controller. Handlers that do so should capture a [`WeakSessionController`];
//! a strong handle stored in a handler keeps the session alive forever.
//!
//! Inbound frames are delivered only by the driver task, which rechecks the
//! generation just before dispatch. On a multi-threaded runtime a frame
//! already in dispatch when another thread calls `disconnect()` may still
//! reach observers after the requested close.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use chatwire_core::{ClientId, Message};
use chatwire_settings::ChatwireSettings;
use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};
use url::Url;

use crate::connector::Connector;
use crate::dispatcher::{self, CloseInfo, Dispatcher, EventName, ObserverId, SessionEvent};
use crate::endpoint::EndpointResolver;
use crate::errors::{EndpointError, Result, SendRejected, SessionError};
use crate::supervisor::{ReconnectPolicy, ReconnectSupervisor, RetryDecision, SupervisorState};
use crate::transport::{TransportEvent, TransportEventKind, TransportSession};

// ─────────────────────────────────────────────────────────────────────────────
// State
// ─────────────────────────────────────────────────────────────────────────────

/// Logical connection state.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// No connection and none being established.
    #[default]
    Disconnected,
    /// A connection attempt is in flight.
    Connecting,
    /// Frames may be sent.
    Connected,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
        })
    }
}

/// Point-in-time view of a session, published on every transition.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SessionSnapshot {
    /// Logical connection state.
    pub state: ConnectionState,
    /// Most recent failure, cleared on a successful open.
    pub last_error: Option<String>,
    /// Reconnect attempts since the last successful open.
    pub reconnect_attempts: u32,
    /// Delay of the scheduled reconnect, if one is pending.
    pub pending_retry: Option<Duration>,
    /// Supervisor state.
    pub retry_state: SupervisorState,
    /// Current connection generation.
    pub generation: u64,
}

// ─────────────────────────────────────────────────────────────────────────────
// Config
// ─────────────────────────────────────────────────────────────────────────────

/// Construction parameters for a [`SessionController`].
#[derive(Clone, Debug)]
pub struct SessionConfig {
    /// Base endpoint.
    pub endpoint: String,
    /// Connect immediately on construction.
    pub auto_connect: bool,
    /// Capacity of the per-connection outbound queue.
    pub outbound_buffer: usize,
    /// Reconnect budget and delay.
    pub reconnect: ReconnectPolicy,
    /// Fixed client ID; generated when `None`.
    pub client_id: Option<ClientId>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::from(&ChatwireSettings::default())
    }
}

impl From<&ChatwireSettings> for SessionConfig {
    fn from(settings: &ChatwireSettings) -> Self {
        Self {
            endpoint: settings.client.endpoint.clone(),
            auto_connect: settings.client.auto_connect,
            outbound_buffer: settings.client.outbound_buffer,
            reconnect: ReconnectPolicy::from(&settings.reconnect),
            client_id: None,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Controller
// ─────────────────────────────────────────────────────────────────────────────

/// Work items for the driver task.
#[derive(Debug)]
enum LoopEvent {
    Transport(TransportEvent),
    RetryDue { token: u64 },
}

impl From<TransportEvent> for LoopEvent {
    fn from(event: TransportEvent) -> Self {
        Self::Transport(event)
    }
}

struct Inner {
    state: ConnectionState,
    last_error: Option<String>,
    url: Option<Url>,
    generation: u64,
    transport: Option<TransportSession>,
    supervisor: ReconnectSupervisor,
    retry_timer: Option<JoinHandle<()>>,
}

impl Inner {
    fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            state: self.state,
            last_error: self.last_error.clone(),
            reconnect_attempts: self.supervisor.attempts(),
            pending_retry: self.supervisor.pending_delay(),
            retry_state: self.supervisor.state(),
            generation: self.generation,
        }
    }

    fn abort_timer(&mut self) {
        if let Some(timer) = self.retry_timer.take() {
            timer.abort();
        }
    }
}

struct Shared {
    resolver: EndpointResolver,
    connector: Arc<dyn Connector>,
    outbound_buffer: usize,
    dispatcher: Dispatcher,
    inner: Mutex<Inner>,
    /// Mirror of `Inner::generation` readable without the lock.
    generation: AtomicU64,
    state_tx: watch::Sender<SessionSnapshot>,
    loop_tx: mpsc::UnboundedSender<LoopEvent>,
}

/// A reconnecting, typed WebSocket session.
///
/// Cloning yields another handle to the same session. The session shuts
/// down when the last handle is dropped; use [`downgrade`](Self::downgrade)
/// for handles captured by observers.
#[derive(Clone)]
pub struct SessionController {
    shared: Arc<Shared>,
}

/// A non-owning handle to a [`SessionController`].
///
/// Does not keep the session alive. Observers that call back into the
/// controller capture one of these.
#[derive(Clone, Debug)]
pub struct WeakSessionController {
    shared: Weak<Shared>,
}

impl WeakSessionController {
    /// The controller, if any strong handle is still alive.
    pub fn upgrade(&self) -> Option<SessionController> {
        self.shared.upgrade().map(|shared| SessionController { shared })
    }
}

impl SessionController {
    /// Create a session. Connects immediately if `config.auto_connect` is set.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(config: SessionConfig, connector: Arc<dyn Connector>) -> Self {
        let resolver = match config.client_id {
            Some(id) => EndpointResolver::with_client_id(config.endpoint, id),
            None => EndpointResolver::new(config.endpoint),
        };
        let (loop_tx, loop_rx) = mpsc::unbounded_channel();
        let inner = Inner {
            state: ConnectionState::Disconnected,
            last_error: None,
            url: None,
            generation: 0,
            transport: None,
            supervisor: ReconnectSupervisor::new(config.reconnect),
            retry_timer: None,
        };
        let (state_tx, _) = watch::channel(inner.snapshot());

        let shared = Arc::new(Shared {
            resolver,
            connector,
            outbound_buffer: config.outbound_buffer,
            dispatcher: Dispatcher::new(),
            inner: Mutex::new(inner),
            generation: AtomicU64::new(0),
            state_tx,
            loop_tx,
        });
        drop(tokio::spawn(drive(Arc::downgrade(&shared), loop_rx)));

        debug!(client_id = %shared.resolver.client_id(), "session created");
        let controller = Self { shared };
        if config.auto_connect {
            if let Err(err) = controller.connect() {
                warn!(error = %err, "auto-connect failed");
            }
        }
        controller
    }

    /// A handle that does not keep the session alive.
    pub fn downgrade(&self) -> WeakSessionController {
        WeakSessionController {
            shared: Arc::downgrade(&self.shared),
        }
    }

    /// Start connecting.
    ///
    /// No-op while connected or connecting. From a settled state this starts
    /// a fresh reconnect budget; while a retry is pending it attempts
    /// immediately and keeps the attempt count.
    pub fn connect(&self) -> Result<()> {
        self.shared.connect()
    }

    /// Close the connection and cancel any pending reconnect.
    pub fn disconnect(&self) {
        self.shared.disconnect();
    }

    /// Send a message on the open connection.
    pub fn send(&self, message: &Message) -> std::result::Result<(), SendRejected> {
        self.shared.send(message)
    }

    /// Current logical state.
    pub fn state(&self) -> ConnectionState {
        self.shared.inner.lock().state
    }

    /// Whether frames may be sent.
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Whether a connection attempt is in flight.
    pub fn is_connecting(&self) -> bool {
        self.state() == ConnectionState::Connecting
    }

    /// Most recent failure, if any.
    pub fn last_error(&self) -> Option<String> {
        self.shared.inner.lock().last_error.clone()
    }

    /// The client ID sent on every connection.
    pub fn client_id(&self) -> &ClientId {
        self.shared.resolver.client_id()
    }

    /// The connection URL, once resolved.
    pub fn url(&self) -> Option<Url> {
        self.shared.inner.lock().url.clone()
    }

    /// Current snapshot.
    pub fn snapshot(&self) -> SessionSnapshot {
        self.shared.inner.lock().snapshot()
    }

    /// Watch snapshots as they change.
    pub fn subscribe_state(&self) -> watch::Receiver<SessionSnapshot> {
        self.shared.state_tx.subscribe()
    }

    // ── Observers ───────────────────────────────────────────────────────────

    /// Register for every event named `name`.
    ///
    /// The handler lives as long as the session. Capturing a
    /// [`SessionController`] in it forms a cycle that keeps the connection
    /// open after every other handle is dropped; capture a
    /// [`WeakSessionController`] instead.
    pub fn on<F>(&self, name: EventName, handler: F) -> ObserverId
    where
        F: Fn(&SessionEvent) + Send + Sync + 'static,
    {
        self.shared.dispatcher.observers().register(name, handler)
    }

    /// Called when the session connects.
    pub fn on_open<F>(&self, handler: F) -> ObserverId
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.on(EventName::Open, move |_| handler())
    }

    /// Called for each decoded inbound message, in arrival order.
    pub fn on_message<F>(&self, handler: F) -> ObserverId
    where
        F: Fn(&Message) + Send + Sync + 'static,
    {
        self.on(EventName::Message, move |event| {
            if let SessionEvent::Message(message) = event {
                handler(message);
            }
        })
    }

    /// Called for construction, transport and retry-exhaustion failures.
    pub fn on_error<F>(&self, handler: F) -> ObserverId
    where
        F: Fn(&SessionError) + Send + Sync + 'static,
    {
        self.on(EventName::Error, move |event| {
            if let SessionEvent::Error(err) = event {
                handler(err);
            }
        })
    }

    /// Called whenever a connection closes.
    pub fn on_close<F>(&self, handler: F) -> ObserverId
    where
        F: Fn(&CloseInfo) + Send + Sync + 'static,
    {
        self.on(EventName::Close, move |event| {
            if let SessionEvent::Close(info) = event {
                handler(info);
            }
        })
    }

    /// Remove an observer. Returns `false` if it was already gone.
    pub fn remove_observer(&self, id: ObserverId) -> bool {
        self.shared.dispatcher.observers().remove(id)
    }
}

impl fmt::Debug for SessionController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionController")
            .field("client_id", self.client_id())
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

// ── Driver ──────────────────────────────────────────────────────────────────

async fn drive(shared: Weak<Shared>, mut rx: mpsc::UnboundedReceiver<LoopEvent>) {
    while let Some(event) = rx.recv().await {
        let Some(shared) = shared.upgrade() else {
            break;
        };
        match event {
            LoopEvent::Transport(event) => shared.on_transport_event(event),
            LoopEvent::RetryDue { token } => shared.on_retry_due(token),
        }
    }
    trace!("session driver stopped");
}

impl Shared {
    fn publish(&self, inner: &Inner) {
        self.generation.store(inner.generation, Ordering::Release);
        let _ = self.state_tx.send_replace(inner.snapshot());
    }

    fn emit_all(&self, events: &[SessionEvent]) {
        for event in events {
            self.dispatcher.emit(event);
        }
    }

    fn connect(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.state != ConnectionState::Disconnected {
            debug!(state = %inner.state, "connect ignored");
            return Ok(());
        }

        if inner.supervisor.retry_now() {
            debug!(attempt = inner.supervisor.attempts(), "skipping reconnect delay");
        } else {
            inner.supervisor.reset();
        }
        inner.abort_timer();

        match self.open_transport(&mut inner) {
            Ok(()) => {
                self.publish(&inner);
                Ok(())
            }
            Err(err) => {
                warn!(error = %err, "cannot build connection url");
                inner.supervisor.cancel();
                inner.last_error = Some(err.to_string());
                self.publish(&inner);
                drop(inner);

                let err = SessionError::from(err);
                self.dispatcher.emit(&SessionEvent::Error(err.clone()));
                Err(err)
            }
        }
    }

    /// Start a new generation. The caller publishes.
    fn open_transport(&self, inner: &mut Inner) -> std::result::Result<(), EndpointError> {
        let url = match &inner.url {
            Some(url) => url.clone(),
            None => {
                let url = self.resolver.resolve()?;
                inner.url = Some(url.clone());
                url
            }
        };

        if let Some(mut old) = inner.transport.take() {
            old.close();
        }
        inner.generation += 1;
        info!(generation = inner.generation, url = %url, "connecting");

        inner.transport = Some(TransportSession::open(
            Arc::clone(&self.connector),
            url,
            inner.generation,
            self.outbound_buffer,
            self.loop_tx.clone(),
        ));
        inner.state = ConnectionState::Connecting;
        Ok(())
    }

    fn disconnect(&self) {
        let mut inner = self.inner.lock();
        inner.supervisor.cancel();
        inner.abort_timer();
        let had_transport = match inner.transport.take() {
            Some(mut transport) => {
                transport.close();
                true
            }
            None => false,
        };
        inner.generation += 1;
        inner.state = ConnectionState::Disconnected;
        info!(generation = inner.generation, "disconnected by request");
        self.publish(&inner);
        drop(inner);

        if had_transport {
            self.dispatcher.emit(&SessionEvent::Close(CloseInfo {
                code: None,
                requested: true,
                reconnect_in: None,
            }));
        }
    }

    fn send(&self, message: &Message) -> std::result::Result<(), SendRejected> {
        let inner = self.inner.lock();
        let sent = if inner.state == ConnectionState::Connected {
            Self::queue(&inner, message)
        } else {
            Err(SendRejected::NotConnected { state: inner.state })
        };
        match &sent {
            Ok(()) => trace!(kind = %message.kind, "message queued"),
            Err(err) => debug!(
                state = %inner.state,
                kind = %message.kind,
                error = %err,
                "send rejected"
            ),
        }
        sent
    }

    fn queue(inner: &Inner, message: &Message) -> std::result::Result<(), SendRejected> {
        let frame = dispatcher::encode(message)?;
        let Some(transport) = inner.transport.as_ref() else {
            return Err(SendRejected::TransportClosed);
        };
        transport.send(frame)
    }

    /// Deliver a frame unless its connection was superseded meanwhile.
    fn deliver_frame(&self, generation: u64, raw: &str) -> bool {
        if self.generation.load(Ordering::Acquire) != generation {
            trace!(stale = generation, "dropping frame from superseded connection");
            return false;
        }
        self.dispatcher.dispatch_frame(raw)
    }

    fn on_transport_event(&self, event: TransportEvent) {
        let mut inner = self.inner.lock();
        if event.generation != inner.generation {
            trace!(
                stale = event.generation,
                current = inner.generation,
                "ignoring event from old connection"
            );
            return;
        }

        match event.kind {
            TransportEventKind::Opened => {
                inner.state = ConnectionState::Connected;
                inner.last_error = None;
                inner.supervisor.on_opened();
                if let Some(transport) = inner.transport.as_mut() {
                    transport.mark_open();
                }
                info!(generation = inner.generation, "connected");
                self.publish(&inner);
                drop(inner);
                self.dispatcher.emit(&SessionEvent::Open);
            }
            TransportEventKind::Frame(raw) => {
                drop(inner);
                let _ = self.deliver_frame(event.generation, &raw);
            }
            TransportEventKind::Errored(err) => {
                inner.last_error = Some(err.to_string());
                self.publish(&inner);
                drop(inner);
                self.dispatcher
                    .emit(&SessionEvent::Error(SessionError::Transport(err)));
            }
            TransportEventKind::Closed(code) => {
                let events = self.on_closed(&mut inner, code);
                self.publish(&inner);
                drop(inner);
                self.emit_all(&events);
            }
        }
    }

    fn on_closed(&self, inner: &mut Inner, code: Option<u16>) -> Vec<SessionEvent> {
        inner.transport = None;
        inner.state = ConnectionState::Disconnected;
        inner.abort_timer();

        match inner.supervisor.on_closed() {
            RetryDecision::Retry {
                attempt,
                delay,
                token,
            } => {
                info!(
                    ?code,
                    attempt,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    "connection closed, reconnect scheduled"
                );
                inner.retry_timer = Some(self.schedule_retry(delay, token));
                vec![SessionEvent::Close(CloseInfo {
                    code,
                    requested: false,
                    reconnect_in: Some(delay),
                })]
            }
            RetryDecision::Exhausted { attempts } => {
                let err = SessionError::RetryExhausted { attempts };
                warn!(?code, attempts, "connection closed, giving up");
                inner.last_error = Some(err.to_string());
                vec![
                    SessionEvent::Close(CloseInfo {
                        code,
                        requested: false,
                        reconnect_in: None,
                    }),
                    SessionEvent::Error(err),
                ]
            }
        }
    }

    fn schedule_retry(&self, delay: Duration, token: u64) -> JoinHandle<()> {
        let tx = self.loop_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(LoopEvent::RetryDue { token });
        })
    }

    fn on_retry_due(&self, token: u64) {
        let mut inner = self.inner.lock();
        if !inner.supervisor.begin_retry(token) {
            trace!(token, "ignoring stale retry timer");
            return;
        }
        inner.retry_timer = None;
        debug!(attempt = inner.supervisor.attempts(), "retry timer fired");

        match self.open_transport(&mut inner) {
            Ok(()) => self.publish(&inner),
            Err(err) => {
                warn!(error = %err, "cannot build connection url");
                inner.supervisor.cancel();
                inner.last_error = Some(err.to_string());
                self.publish(&inner);
                drop(inner);
                self.dispatcher
                    .emit(&SessionEvent::Error(SessionError::Construction(err)));
            }
        }
    }
}

impl Drop for Shared {
    fn drop(&mut self) {
        let inner = self.inner.get_mut();
        inner.abort_timer();
        if let Some(transport) = inner.transport.as_mut() {
            transport.close();
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use chatwire_settings::{ClientSettings, ReconnectSettings};

    use super::*;
    use crate::testing::{ConnectPlan, ScriptedConnector};

    fn hanging_controller() -> SessionController {
        let connector = Arc::new(ScriptedConnector::with_fallback(ConnectPlan::Hang));
        SessionController::new(SessionConfig::default(), connector)
    }

    fn inject(controller: &SessionController, generation: u64, kind: TransportEventKind) {
        controller
            .shared
            .on_transport_event(TransportEvent { generation, kind });
    }

    #[test]
    fn state_display() {
        assert_eq!(ConnectionState::Disconnected.to_string(), "disconnected");
        assert_eq!(ConnectionState::Connecting.to_string(), "connecting");
        assert_eq!(ConnectionState::Connected.to_string(), "connected");
    }

    #[test]
    fn config_from_settings() {
        let settings = ChatwireSettings {
            client: ClientSettings {
                endpoint: "wss://chat.example.com".into(),
                auto_connect: true,
                outbound_buffer: 4,
            },
            reconnect: ReconnectSettings {
                max_attempts: 2,
                base_delay_ms: 50,
            },
            ..ChatwireSettings::default()
        };
        let config = SessionConfig::from(&settings);
        assert_eq!(config.endpoint, "wss://chat.example.com");
        assert!(config.auto_connect);
        assert_eq!(config.outbound_buffer, 4);
        assert_eq!(config.reconnect.max_attempts, 2);
        assert_eq!(config.reconnect.base_delay, Duration::from_millis(50));
    }

    #[tokio::test]
    async fn starts_disconnected() {
        let controller = hanging_controller();
        let snap = controller.snapshot();
        assert_eq!(snap.state, ConnectionState::Disconnected);
        assert_eq!(snap.generation, 0);
        assert!(controller.url().is_none());
        assert!(controller.client_id().as_str().starts_with("client_"));
    }

    #[tokio::test]
    async fn connect_caches_url_and_bumps_generation() {
        let controller = hanging_controller();
        controller.connect().unwrap();
        assert!(controller.is_connecting());
        assert_eq!(controller.snapshot().generation, 1);

        let url = controller.url().unwrap();
        assert!(url.path().ends_with(controller.client_id().as_str()));

        controller.connect().unwrap();
        assert_eq!(controller.snapshot().generation, 1);
    }

    #[tokio::test]
    async fn stale_events_are_ignored() {
        let controller = hanging_controller();
        let messages = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&messages);
        let _ = controller.on_message(move |m| sink.lock().push(m.clone()));

        controller.connect().unwrap();
        inject(&controller, 0, TransportEventKind::Opened);
        assert!(controller.is_connecting());

        inject(&controller, 1, TransportEventKind::Opened);
        assert!(controller.is_connected());

        inject(
            &controller,
            0,
            TransportEventKind::Frame(r#"{"type":"text","message":"old"}"#.into()),
        );
        inject(&controller, 0, TransportEventKind::Closed(None));
        assert!(messages.lock().is_empty());
        assert!(controller.is_connected());

        inject(
            &controller,
            1,
            TransportEventKind::Frame(r#"{"type":"text","message":"new"}"#.into()),
        );
        let messages = messages.lock();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].body(), Some("new"));
    }

    #[tokio::test]
    async fn events_after_disconnect_are_stale() {
        let controller = hanging_controller();
        controller.connect().unwrap();
        inject(&controller, 1, TransportEventKind::Opened);
        controller.disconnect();

        let generation = controller.snapshot().generation;
        assert_eq!(generation, 2);
        inject(&controller, 1, TransportEventKind::Closed(Some(1006)));
        let snap = controller.snapshot();
        assert_eq!(snap.retry_state, SupervisorState::Idle);
        assert_eq!(snap.reconnect_attempts, 0);
        assert_eq!(snap.pending_retry, None);
    }

    #[tokio::test]
    async fn transport_error_is_recorded_and_cleared_on_open() {
        let controller = hanging_controller();
        let errors = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&errors);
        let _ = controller.on_error(move |e| sink.lock().push(e.clone()));

        controller.connect().unwrap();
        inject(
            &controller,
            1,
            TransportEventKind::Errored(crate::errors::TransportError::Socket("boom".into())),
        );
        assert_eq!(
            controller.last_error().as_deref(),
            Some("socket error: boom")
        );
        assert_eq!(errors.lock().len(), 1);

        inject(&controller, 1, TransportEventKind::Opened);
        assert_eq!(controller.last_error(), None);
    }

    #[tokio::test]
    async fn send_requires_connected() {
        let controller = hanging_controller();
        let err = controller.send(&Message::text("hi")).unwrap_err();
        assert!(matches!(
            err,
            SendRejected::NotConnected {
                state: ConnectionState::Disconnected
            }
        ));

        controller.connect().unwrap();
        let err = controller.send(&Message::text("hi")).unwrap_err();
        assert!(matches!(
            err,
            SendRejected::NotConnected {
                state: ConnectionState::Connecting
            }
        ));
    }

    #[tokio::test]
    async fn observer_may_call_back_into_controller() {
        let controller = hanging_controller();
        let handle = controller.downgrade();
        let seen = Arc::new(Mutex::new(None));
        let slot = Arc::clone(&seen);
        let _ = controller.on_open(move || {
            if let Some(controller) = handle.upgrade() {
                *slot.lock() = Some(controller.state());
            }
        });

        controller.connect().unwrap();
        inject(&controller, 1, TransportEventKind::Opened);
        assert_eq!(*seen.lock(), Some(ConnectionState::Connected));
    }

    #[tokio::test]
    async fn state_watch_sees_transitions() {
        let controller = hanging_controller();
        let rx = controller.subscribe_state();
        controller.connect().unwrap();
        assert_eq!(rx.borrow().state, ConnectionState::Connecting);
        inject(&controller, 1, TransportEventKind::Opened);
        assert_eq!(rx.borrow().state, ConnectionState::Connected);
    }

    #[tokio::test]
    async fn weak_handle_does_not_keep_session_alive() {
        let controller = hanging_controller();
        let weak = controller.downgrade();
        let _ = controller.on_open({
            let weak = weak.clone();
            move || {
                let _ = weak.upgrade();
            }
        });
        assert!(weak.upgrade().is_some());
        drop(controller);
        assert!(weak.upgrade().is_none());
    }

    #[tokio::test]
    async fn frame_from_superseded_connection_is_not_delivered() {
        let controller = hanging_controller();
        let messages = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&messages);
        let _ = controller.on_message(move |m| sink.lock().push(m.clone()));

        controller.connect().unwrap();
        inject(&controller, 1, TransportEventKind::Opened);
        let raw = r#"{"type":"text","message":"late"}"#;

        // Passed the locked check, then the connection was replaced.
        controller.disconnect();
        assert!(!controller.shared.deliver_frame(1, raw));
        assert!(messages.lock().is_empty());

        controller.connect().unwrap();
        assert!(controller.shared.deliver_frame(3, raw));
        assert_eq!(messages.lock().len(), 1);
    }
}
