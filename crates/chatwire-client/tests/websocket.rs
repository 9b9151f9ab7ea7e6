//! End-to-end test over a real WebSocket server.

use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot};
use tokio::time::timeout;
use tokio_tungstenite::accept_hdr_async;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;

use chatwire_client::{
    CloseInfo, EventName, ReconnectPolicy, SessionConfig, SessionController, SessionError,
    SessionEvent, WsConnector,
};
use chatwire_core::{Message, MessageKind};

const TIMEOUT: Duration = Duration::from_secs(5);

/// Accept one client, greet it, echo its first frame as an assistant reply,
/// then close normally. Returns the request path the client used.
async fn serve_once(listener: TcpListener) -> String {
    let (stream, _) = listener.accept().await.unwrap();
    let (path_tx, path_rx) = oneshot::channel();
    let mut ws = accept_hdr_async(stream, move |req: &Request, resp: Response| {
        let _ = path_tx.send(req.uri().path().to_owned());
        Ok::<_, ErrorResponse>(resp)
    })
    .await
    .unwrap();

    let welcome = json!({"type": "system", "message": "welcome"}).to_string();
    ws.send(WsMessage::Text(welcome.into())).await.unwrap();

    let incoming = loop {
        match timeout(TIMEOUT, ws.next()).await.unwrap() {
            Some(Ok(WsMessage::Text(text))) => break text.as_str().to_owned(),
            Some(Ok(_)) => {}
            other => panic!("client went away: {other:?}"),
        }
    };
    let incoming: Value = serde_json::from_str(&incoming).unwrap();
    let reply = json!({"type": "assistant", "message": incoming["message"]}).to_string();
    ws.send(WsMessage::Text(reply.into())).await.unwrap();

    ws.close(Some(CloseFrame {
        code: CloseCode::Normal,
        reason: "bye".into(),
    }))
    .await
    .unwrap();
    while let Ok(Some(Ok(_))) = timeout(TIMEOUT, ws.next()).await {}

    path_rx.await.unwrap()
}

#[tokio::test]
async fn round_trip_over_real_socket() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = tokio::spawn(serve_once(listener));

    let config = SessionConfig {
        endpoint: format!("http://{addr}"),
        reconnect: ReconnectPolicy {
            max_attempts: 0,
            base_delay: Duration::from_millis(10),
        },
        ..SessionConfig::default()
    };
    let controller = SessionController::new(config, Arc::new(WsConnector));

    let (tx, mut events) = mpsc::unbounded_channel();
    for name in [
        EventName::Open,
        EventName::Message,
        EventName::Error,
        EventName::Close,
    ] {
        let tx = tx.clone();
        let _ = controller.on(name, move |event| {
            let _ = tx.send(event.clone());
        });
    }
    let replier = controller.downgrade();
    let _ = controller.on_message(move |message| {
        if message.kind != MessageKind::System {
            return;
        }
        if let Some(controller) = replier.upgrade() {
            controller.send(&Message::text("ping")).unwrap();
        }
    });

    controller.connect().unwrap();
    assert_eq!(controller.url().unwrap().scheme(), "ws");

    let mut seen = Vec::new();
    while seen.len() < 5 {
        let event = timeout(TIMEOUT, events.recv())
            .await
            .expect("timeout waiting for event")
            .expect("observer channel closed");
        seen.push(event);
    }

    assert_eq!(seen[0], SessionEvent::Open);
    assert!(matches!(&seen[1], SessionEvent::Message(m) if m.body() == Some("welcome")));
    assert!(matches!(
        &seen[2],
        SessionEvent::Message(m) if m.kind == MessageKind::Assistant && m.body() == Some("ping")
    ));
    assert_eq!(
        seen[3],
        SessionEvent::Close(CloseInfo {
            code: Some(1000),
            requested: false,
            reconnect_in: None,
        })
    );
    assert_eq!(
        seen[4],
        SessionEvent::Error(SessionError::RetryExhausted { attempts: 0 })
    );

    let path = timeout(TIMEOUT, server).await.unwrap().unwrap();
    assert_eq!(path, format!("/ws/{}", controller.client_id()));
    assert!(!controller.is_connected());
}
