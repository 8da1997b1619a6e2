//! Shared helpers for integration tests.
//!
//! Each integration test file compiles common/ as its own module, so not
//! every helper is used in every file.
#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use vigil::control::{server, ClientRole, ControlPlane};
use vigil::ledger::LedgerStore;
use vigil::types::{ActionEvent, FileOperation, VigilConfig};

pub const PRODUCER_SECRET: &str = "producer-secret";
pub const SESSION_SECRET: &str = "0123456789abcdef0123";

pub type Ws = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// A configuration that passes `validate()`.
pub fn serving_config() -> VigilConfig {
    let mut config = VigilConfig::default();
    config.auth.producer_secret = PRODUCER_SECRET.into();
    config.auth.session_secret = SESSION_SECRET.into();
    config.execution.resume_grace_ms = 50;
    config
}

/// Serve a plane over an in-memory ledger on an ephemeral port.
pub async fn start_server(config: VigilConfig) -> (Arc<ControlPlane>, SocketAddr) {
    let ledger = LedgerStore::open_in_memory().expect("should open in-memory ledger");
    let plane = ControlPlane::new(config, ledger);
    let listener = server::bind("127.0.0.1:0").await.expect("should bind");
    let addr = listener.local_addr().expect("listener address");
    tokio::spawn(server::serve(listener, Arc::clone(&plane)));
    (plane, addr)
}

pub async fn connect(addr: SocketAddr) -> Ws {
    let (ws, _) = connect_async(format!("ws://{addr}/ws"))
        .await
        .expect("should open websocket");
    ws
}

pub fn session_token(plane: &ControlPlane, role: ClientRole) -> String {
    plane
        .auth()
        .signer()
        .issue("tester", role, None)
        .expect("should issue token")
}

pub async fn send(ws: &mut Ws, frame: Value) {
    ws.send(Message::text(frame.to_string()))
        .await
        .expect("should send frame");
}

/// Send `REGISTER` and wait for `REGISTERED`.
pub async fn register(
    ws: &mut Ws,
    role: &str,
    client_id: &str,
    project_id: &str,
    token: &str,
    last_sequence_number: Option<u64>,
) -> Value {
    let mut payload = json!({
        "clientType": role,
        "clientId": client_id,
        "projectId": project_id,
        "authToken": token,
    });
    if let Some(last) = last_sequence_number {
        payload["lastSequenceNumber"] = json!(last);
    }
    send(ws, json!({ "type": "REGISTER", "payload": payload })).await;
    let reply = recv_until(ws, |f| f["type"] == "REGISTERED").await;
    reply.expect("should receive REGISTERED")
}

/// Connect and register as a producer.
pub async fn producer(addr: SocketAddr, client_id: &str, project_id: &str) -> Ws {
    let mut ws = connect(addr).await;
    register(&mut ws, "producer", client_id, project_id, PRODUCER_SECRET, None).await;
    ws
}

/// Connect and register as an operator or observer.
pub async fn watcher(
    plane: &ControlPlane,
    addr: SocketAddr,
    role: ClientRole,
    client_id: &str,
    project_id: &str,
) -> Ws {
    let mut ws = connect(addr).await;
    let token = session_token(plane, role);
    register(&mut ws, role.as_str(), client_id, project_id, &token, None).await;
    ws
}

/// Next JSON text frame, or `None` on close or after two seconds of silence.
pub async fn recv(ws: &mut Ws) -> Option<Value> {
    loop {
        let next = tokio::time::timeout(Duration::from_secs(2), ws.next())
            .await
            .ok()??;
        match next.ok()? {
            Message::Text(text) => return serde_json::from_str(text.as_str()).ok(),
            Message::Close(_) => return None,
            _ => continue,
        }
    }
}

/// Read frames until one satisfies `pred`.
pub async fn recv_until(ws: &mut Ws, pred: impl Fn(&Value) -> bool) -> Option<Value> {
    while let Some(frame) = recv(ws).await {
        if pred(&frame) {
            return Some(frame);
        }
    }
    None
}

/// Read frames until the server closes the socket; returns the close code.
pub async fn close_code(ws: &mut Ws) -> Option<u16> {
    loop {
        let next = tokio::time::timeout(Duration::from_secs(5), ws.next())
            .await
            .ok()??;
        match next {
            Ok(Message::Close(frame)) => return frame.map(|f| u16::from(f.code)),
            Ok(_) => continue,
            Err(_) => return None,
        }
    }
}

pub fn event(project: &str, seq: u64, op: FileOperation, path: &str) -> ActionEvent {
    ActionEvent::new(project, seq, op, path).with_content_hash(format!("hash-{seq}"))
}

pub fn event_frame(event: &ActionEvent) -> Value {
    json!({
        "type": "ACTION_EVENT",
        "payload": serde_json::to_value(event).expect("event serializes"),
    })
}
