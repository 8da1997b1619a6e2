//! WebSocket endpoint for producers, operators and observers.
//!
//! The first frame must be `REGISTER`. After a successful handshake the
//! connection is added to the registry, any events after the client's
//! declared ledger position are replayed, and then inbound frames, outbound
//! broadcasts, eviction signals and shutdown are multiplexed in one loop.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::http::{header, HeaderMap};
use axum::response::IntoResponse;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tracing::{debug, info, warn};

use crate::plane::{wait_for_shutdown, ControlPlane, Session};
use crate::protocol::{types, ClientRole, CloseReason, Envelope, Registered, Registration};

/// Interval between WebSocket ping frames.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

type WsSink = SplitSink<WebSocket, Message>;
type WsStream = SplitStream<WebSocket>;

/// `GET /ws`: upgrade, then run the connection.
pub(crate) async fn ws_upgrade(
    State(plane): State<Arc<ControlPlane>>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    let origin = headers
        .get(header::ORIGIN)
        .and_then(|v| v.to_str().ok())
        .map(String::from);
    let origin_ok = origin_allowed(&plane.config().server.allowed_origins, origin.as_deref());
    if !origin_ok {
        warn!(origin = ?origin, "rejecting connection from disallowed origin");
    }
    ws.on_upgrade(move |socket| handle_socket(socket, plane, origin_ok))
}

/// An empty allow-list admits every origin; requests without an `Origin`
/// header are not from browsers and are admitted too.
pub fn origin_allowed(allowed: &[String], origin: Option<&str>) -> bool {
    match origin {
        None => true,
        Some(_) if allowed.is_empty() => true,
        Some(origin) => allowed
            .iter()
            .any(|a| a.trim_end_matches('/') == origin.trim_end_matches('/')),
    }
}

async fn close(sender: &mut WsSink, reason: CloseReason) {
    let _ = sender
        .send(Message::Close(Some(CloseFrame {
            code: reason.code(),
            reason: reason.reason().into(),
        })))
        .await;
}

async fn send_envelope(sender: &mut WsSink, envelope: &Envelope) -> bool {
    sender
        .send(Message::Text(envelope.to_text().into()))
        .await
        .is_ok()
}

/// Next text payload, skipping control frames. `None` once the peer is gone.
async fn next_text(receiver: &mut WsStream) -> Option<String> {
    loop {
        match receiver.next().await? {
            Ok(Message::Text(text)) => return Some(text.to_string()),
            Ok(Message::Binary(data)) => match String::from_utf8(data.to_vec()) {
                Ok(text) => return Some(text),
                Err(_) => return Some(String::new()),
            },
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => continue,
            Ok(Message::Close(_)) | Err(_) => return None,
        }
    }
}

async fn read_registration(
    plane: &ControlPlane,
    receiver: &mut WsStream,
) -> Result<Registration, Option<CloseReason>> {
    let text = match tokio::time::timeout(plane.config().registration_timeout(), next_text(receiver))
        .await
    {
        Err(_) => return Err(Some(CloseReason::RegistrationTimeout)),
        Ok(None) => return Err(None),
        Ok(Some(text)) => text,
    };
    let registration = Envelope::parse(&text)
        .and_then(|envelope| Registration::from_envelope(&envelope))
        .map_err(|e| {
            warn!(error = %e, "invalid registration");
            Some(CloseReason::InvalidRegistration)
        })?;
    if let Err(e) = plane.auth().authorize(&registration) {
        warn!(
            client_id = %registration.client_id,
            role = %registration.client_type,
            error = %e,
            "registration rejected"
        );
        return Err(Some(CloseReason::InvalidCredential));
    }
    Ok(registration)
}

async fn handle_socket(socket: WebSocket, plane: Arc<ControlPlane>, origin_ok: bool) {
    let (mut sender, mut receiver) = socket.split();
    if !origin_ok {
        close(&mut sender, CloseReason::DisallowedOrigin).await;
        return;
    }

    let registration = match read_registration(&plane, &mut receiver).await {
        Ok(r) => r,
        Err(reason) => {
            if let Some(reason) = reason {
                close(&mut sender, reason).await;
            }
            return;
        }
    };

    let mut link = plane.registry().register(
        registration.client_id.clone(),
        registration.client_type,
        registration.project_id.clone(),
    );
    let session = Session::from_registration(&registration, link.conn_id);
    plane.guard().register(session.conn_id);
    let session_row = plane.begin_session(&registration);

    let replay = match registration.last_sequence_number {
        Some(last) if session.role != ClientRole::Producer => {
            plane
                .replay(&session.project_id, last)
                .unwrap_or_else(|e| {
                    warn!(client_id = %session.client_id, error = %e, "replay unavailable");
                    Vec::new()
                })
        }
        _ => Vec::new(),
    };

    let registered = Envelope::new(
        types::REGISTERED,
        Registered {
            client_id: session.client_id.clone(),
            project_id: session.project_id.clone(),
            client_type: session.role,
            replayed: replay.len(),
        },
    );
    let mut close_reason = "client closed";
    let mut alive = send_envelope(&mut sender, &registered).await;

    let mut replayed = HashSet::new();
    for recorded in &replay {
        if !alive {
            break;
        }
        let frame = Envelope::event_broadcast(&recorded.event, recorded.position);
        alive = send_envelope(&mut sender, &frame).await;
        replayed.insert(recorded.event.id);
    }
    if !replay.is_empty() {
        debug!(client_id = %session.client_id, count = replay.len(), "replayed events");
    }
    plane.registry().resume(
        &session.project_id,
        &session.client_id,
        link.conn_id,
        &replayed,
    );

    let max_message_bytes = plane.config().server.max_message_bytes;
    let mut shutdown = plane.shutdown_signal();
    let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
    heartbeat.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    while alive {
        tokio::select! {
            biased;

            _ = link.closed.changed() => {
                let signalled = *link.closed.borrow();
                if let Some(reason) = signalled {
                    info!(client_id = %session.client_id, "closing connection: {reason}");
                    close(&mut sender, reason).await;
                    close_reason = reason.reason();
                }
                break;
            }

            _ = wait_for_shutdown(&mut shutdown) => {
                close(&mut sender, CloseReason::ServerShutdown).await;
                close_reason = CloseReason::ServerShutdown.reason();
                break;
            }

            outbound = link.rx.recv() => {
                let Some(text) = outbound else { break };
                let len = text.len();
                alive = sender.send(Message::Text(text.to_string().into())).await.is_ok();
                link.sent(len);
            }

            inbound = receiver.next() => {
                let text = match inbound {
                    Some(Ok(Message::Text(text))) => text.to_string(),
                    Some(Ok(Message::Binary(data))) => match String::from_utf8(data.to_vec()) {
                        Ok(text) => text,
                        Err(_) => {
                            let err = Envelope::error("binary frames must be UTF-8 JSON", None, None);
                            alive = send_envelope(&mut sender, &err).await;
                            continue;
                        }
                    },
                    Some(Ok(Message::Ping(data))) => {
                        let _ = sender.send(Message::Pong(data)).await;
                        continue;
                    }
                    Some(Ok(Message::Pong(_))) => continue,
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        debug!(client_id = %session.client_id, error = %e, "receive error");
                        close_reason = "receive error";
                        break;
                    }
                };

                if text.len() > max_message_bytes {
                    let err = Envelope::error(
                        "message too large",
                        Some(format!("{} bytes exceeds limit {max_message_bytes}", text.len())),
                        None,
                    );
                    alive = send_envelope(&mut sender, &err).await;
                    continue;
                }

                for reply in plane.handle_text(&session, &text).await {
                    if !send_envelope(&mut sender, &reply).await {
                        alive = false;
                        break;
                    }
                }
            }

            _ = heartbeat.tick() => {
                alive = sender.send(Message::Ping(Vec::new().into())).await.is_ok();
            }
        }
    }

    plane.guard().release(session.conn_id);
    plane
        .registry()
        .unregister(&session.project_id, &session.client_id, link.conn_id);
    plane.end_session(session_row, close_reason);
    info!(
        client_id = %session.client_id,
        role = %session.role,
        project_id = %session.project_id,
        reason = close_reason,
        "connection closed"
    );
}
