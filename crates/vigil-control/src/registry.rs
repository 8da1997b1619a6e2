//! Live connections per project, role-scoped fan-out and backpressure.
//!
//! Each registered connection owns an unbounded outbound channel drained by
//! its socket task. The registry tracks the bytes queued on that channel and
//! evicts a connection once its backlog would pass the configured limit,
//! instead of letting a stalled reader grow memory without bound.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info};
use uuid::Uuid;

use vigil_types::{ClientId, ProjectId};

use crate::pause::{PauseGate, Pushed};
use crate::protocol::{types, ClientRole, CloseReason, Envelope};

/// Which roles receive a broadcast.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Audience {
    All,
    Operators,
    OperatorsAndObservers,
    Producers,
}

impl Audience {
    pub fn includes(&self, role: ClientRole) -> bool {
        match self {
            Audience::All => true,
            Audience::Operators => role == ClientRole::Operator,
            Audience::OperatorsAndObservers => role != ClientRole::Producer,
            Audience::Producers => role == ClientRole::Producer,
        }
    }

    /// Default routing for an outbound frame type.
    pub fn for_kind(kind: &str) -> Self {
        match kind {
            types::AGENT_OUTPUT => Audience::Operators,
            types::STATE_CHANGE => Audience::All,
            _ => Audience::OperatorsAndObservers,
        }
    }
}

/// One serialized frame on its way to a connection.
#[derive(Debug, Clone)]
pub struct Outbound {
    pub text: Arc<str>,
    /// Set for `EVENT_BROADCAST` so replayed events are not sent twice.
    pub event_id: Option<Uuid>,
}

impl Outbound {
    pub fn new(envelope: &Envelope) -> Self {
        Self {
            text: Arc::from(envelope.to_text()),
            event_id: None,
        }
    }

    pub fn for_event(envelope: &Envelope, event_id: Uuid) -> Self {
        Self {
            text: Arc::from(envelope.to_text()),
            event_id: Some(event_id),
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
enum Delivery {
    Sent,
    Queued,
    Dropped,
    Evict,
}

/// Registry-side half of a connection.
#[derive(Debug)]
pub struct ConnectionHandle {
    pub client_id: ClientId,
    pub role: ClientRole,
    pub project_id: ProjectId,
    pub connected_at: DateTime<Utc>,
    pub conn_id: Uuid,
    tx: mpsc::UnboundedSender<Arc<str>>,
    backlog: Arc<AtomicUsize>,
    gate: Mutex<PauseGate<Outbound>>,
    close: watch::Sender<Option<CloseReason>>,
}

/// Socket-side half of a connection, returned by [`ConnectionRegistry::register`].
#[derive(Debug)]
pub struct ConnectionLink {
    pub conn_id: Uuid,
    pub rx: mpsc::UnboundedReceiver<Arc<str>>,
    /// Decrement by the frame length after each socket write.
    pub backlog: Arc<AtomicUsize>,
    /// Becomes `Some` when the registry wants the socket closed.
    pub closed: watch::Receiver<Option<CloseReason>>,
}

impl ConnectionLink {
    pub fn sent(&self, bytes: usize) {
        // saturating: a frame queued before a superseding registration may
        // be counted against the new link's counter
        let _ = self
            .backlog
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |b| {
                Some(b.saturating_sub(bytes))
            });
    }
}

impl ConnectionHandle {
    fn send_now(&self, text: Arc<str>, max_backlog: usize) -> Delivery {
        let len = text.len();
        let queued = self.backlog.load(Ordering::Acquire);
        if queued + len > max_backlog {
            return Delivery::Evict;
        }
        self.backlog.fetch_add(len, Ordering::AcqRel);
        match self.tx.send(text) {
            Ok(()) => Delivery::Sent,
            Err(_) => {
                self.backlog.fetch_sub(len, Ordering::AcqRel);
                Delivery::Dropped
            }
        }
    }

    fn deliver(&self, outbound: Outbound, max_backlog: usize) -> Delivery {
        let pushed = self
            .gate
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(outbound);
        match pushed {
            Pushed::Emit(o) => self.send_now(o.text, max_backlog),
            Pushed::Queued => Delivery::Queued,
            Pushed::Overflow(_) => Delivery::Evict,
        }
    }

    fn flush(&self, skip: &HashSet<Uuid>, max_backlog: usize) -> Delivery {
        let queued = self.gate.lock().unwrap_or_else(|e| e.into_inner()).resume();
        for o in queued {
            if o.event_id.is_some_and(|id| skip.contains(&id)) {
                continue;
            }
            if self.send_now(o.text, max_backlog) == Delivery::Evict {
                return Delivery::Evict;
            }
        }
        Delivery::Sent
    }

    pub fn backlog_bytes(&self) -> usize {
        self.backlog.load(Ordering::Acquire)
    }

    fn signal_close(&self, reason: CloseReason) {
        let _ = self.close.send(Some(reason));
    }
}

/// Introspection view of one connection.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionInfo {
    pub client_id: ClientId,
    pub client_type: ClientRole,
    pub project_id: ProjectId,
    pub connected_at: DateTime<Utc>,
    pub backlog_bytes: usize,
}

/// Client ids are unique within a project, not across projects.
type ConnectionKey = (ProjectId, ClientId);

#[derive(Debug)]
pub struct ConnectionRegistry {
    connections: RwLock<HashMap<ConnectionKey, Arc<ConnectionHandle>>>,
    max_backlog_bytes: usize,
    queue_capacity: usize,
}

impl ConnectionRegistry {
    pub fn new(max_backlog_bytes: usize, queue_capacity: usize) -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
            max_backlog_bytes,
            queue_capacity,
        }
    }

    /// Add a connection. Live broadcasts are held until
    /// [`resume`](Self::resume) so a replay can be sent first. An existing
    /// connection with the same client id in the same project is told to
    /// close.
    pub fn register(
        &self,
        client_id: ClientId,
        role: ClientRole,
        project_id: ProjectId,
    ) -> ConnectionLink {
        let (tx, rx) = mpsc::unbounded_channel();
        let (close, closed) = watch::channel(None);
        let backlog = Arc::new(AtomicUsize::new(0));
        let conn_id = Uuid::new_v4();
        let handle = Arc::new(ConnectionHandle {
            client_id: client_id.clone(),
            role,
            project_id: project_id.clone(),
            connected_at: Utc::now(),
            conn_id,
            tx,
            backlog: Arc::clone(&backlog),
            gate: Mutex::new(PauseGate::paused(self.queue_capacity)),
            close,
        });

        let previous = self
            .connections
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert((project_id.clone(), client_id.clone()), handle);
        if let Some(old) = previous {
            info!(client_id = %client_id, "connection superseded");
            old.signal_close(CloseReason::Superseded);
        }
        info!(client_id = %client_id, role = %role, project_id = %project_id, "connection registered");

        ConnectionLink {
            conn_id,
            rx,
            backlog,
            closed,
        }
    }

    /// Open the connection's gate, flushing held frames except events
    /// already sent by the replay.
    pub fn resume(
        &self,
        project_id: &ProjectId,
        client_id: &ClientId,
        conn_id: Uuid,
        replayed: &HashSet<Uuid>,
    ) {
        let Some(handle) = self.get(project_id, client_id, conn_id) else {
            return;
        };
        if handle.flush(replayed, self.max_backlog_bytes) == Delivery::Evict {
            self.evict(&handle, CloseReason::SlowClient);
        }
    }

    fn get(
        &self,
        project_id: &ProjectId,
        client_id: &ClientId,
        conn_id: Uuid,
    ) -> Option<Arc<ConnectionHandle>> {
        self.connections
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&(project_id.clone(), client_id.clone()))
            .filter(|h| h.conn_id == conn_id)
            .cloned()
    }

    /// Remove a connection if it is still the registered one for its id.
    pub fn unregister(&self, project_id: &ProjectId, client_id: &ClientId, conn_id: Uuid) -> bool {
        let key = (project_id.clone(), client_id.clone());
        let mut connections = self.connections.write().unwrap_or_else(|e| e.into_inner());
        if connections.get(&key).is_some_and(|h| h.conn_id == conn_id) {
            connections.remove(&key);
            debug!(client_id = %client_id, "connection unregistered");
            true
        } else {
            false
        }
    }

    fn evict(&self, handle: &ConnectionHandle, reason: CloseReason) {
        if self.unregister(&handle.project_id, &handle.client_id, handle.conn_id) {
            info!(
                client_id = %handle.client_id,
                backlog_bytes = handle.backlog_bytes(),
                "evicting connection: {reason}"
            );
        }
        handle.signal_close(reason);
    }

    /// Send one frame to every connection of `project` in `audience`.
    /// Returns how many connections received or queued it.
    pub fn broadcast(&self, project: &ProjectId, audience: Audience, outbound: &Outbound) -> usize {
        let targets: Vec<Arc<ConnectionHandle>> = self
            .connections
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .filter(|h| &h.project_id == project && audience.includes(h.role))
            .cloned()
            .collect();

        let mut delivered = 0;
        for handle in targets {
            match handle.deliver(outbound.clone(), self.max_backlog_bytes) {
                Delivery::Sent | Delivery::Queued => delivered += 1,
                Delivery::Dropped => {}
                Delivery::Evict => self.evict(&handle, CloseReason::SlowClient),
            }
        }
        delivered
    }

    /// Close every connection, e.g. on shutdown.
    pub fn close_all(&self, reason: CloseReason) {
        let drained: Vec<Arc<ConnectionHandle>> = self
            .connections
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .drain()
            .map(|(_, h)| h)
            .collect();
        for handle in drained {
            handle.signal_close(reason);
        }
    }

    /// Drop entries whose socket task has gone away. Returns how many.
    pub fn sweep(&self) -> usize {
        let mut connections = self.connections.write().unwrap_or_else(|e| e.into_inner());
        let before = connections.len();
        connections.retain(|_, h| !h.tx.is_closed());
        before - connections.len()
    }

    pub fn connections(&self, project: &ProjectId) -> Vec<ConnectionInfo> {
        let mut infos: Vec<ConnectionInfo> = self
            .connections
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .filter(|h| &h.project_id == project)
            .map(|h| ConnectionInfo {
                client_id: h.client_id.clone(),
                client_type: h.role,
                project_id: h.project_id.clone(),
                connected_at: h.connected_at,
                backlog_bytes: h.backlog_bytes(),
            })
            .collect();
        infos.sort_by(|a, b| a.connected_at.cmp(&b.connected_at));
        infos
    }

    pub fn contains(&self, project_id: &ProjectId, client_id: &ClientId) -> bool {
        self.connections
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(&(project_id.clone(), client_id.clone()))
    }

    pub fn len(&self) -> usize {
        self.connections
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
