//! The control plane: ties the ingestion guard, per-project actors, the
//! ledger and the connection registry together behind one handle shared by
//! the WebSocket and HTTP servers.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use vigil_ledger::{LedgerStore, RecordedEvent};
use vigil_types::{
    ActionEvent, ClientId, ProjectId, ProtectionZone, StateTransition, VigilConfig, VigilError,
};

use crate::auth::Authenticator;
use crate::command::Command;
use crate::guard::{Admission, IngestionGuard};
use crate::machine::{ExecutionState, MachineEvent};
use crate::project::{Ingested, ProjectDeps, ProjectHandle, SharedLedger};
use crate::protocol::{
    types, Ack, AgentSignal, AgentSignalKind, ClientMessage, ClientRole, CloseReason, Envelope,
    Registration,
};
use crate::registry::{Audience, ConnectionInfo, ConnectionRegistry, Outbound};

/// A registered connection as seen by message handling.
#[derive(Debug, Clone)]
pub struct Session {
    pub client_id: ClientId,
    pub role: ClientRole,
    pub project_id: ProjectId,
    /// Registry connection id; keys the ingestion guard.
    pub conn_id: Uuid,
}

impl Session {
    pub fn from_registration(registration: &Registration, conn_id: Uuid) -> Self {
        Self {
            client_id: registration.client_id.clone(),
            role: registration.client_type,
            project_id: registration.project_id.clone(),
            conn_id,
        }
    }

    /// `triggeredBy` label for the history ledger.
    pub fn actor(&self) -> String {
        format!("{}:{}", self.role, self.client_id)
    }
}

pub struct ControlPlane {
    config: Arc<VigilConfig>,
    ledger: SharedLedger,
    registry: Arc<ConnectionRegistry>,
    guard: IngestionGuard,
    auth: Authenticator,
    deps: Arc<ProjectDeps>,
    projects: Mutex<HashMap<ProjectId, ProjectHandle>>,
    shutdown_tx: watch::Sender<bool>,
}

impl ControlPlane {
    pub fn new(config: VigilConfig, ledger: LedgerStore) -> Arc<Self> {
        let config = Arc::new(config);
        let ledger = Arc::new(Mutex::new(ledger));
        let registry = Arc::new(ConnectionRegistry::new(
            config.distribution.max_backlog_bytes,
            config.distribution.outbound_queue_capacity,
        ));
        let deps = Arc::new(ProjectDeps {
            config: Arc::clone(&config),
            ledger: Arc::clone(&ledger),
            registry: Arc::clone(&registry),
        });
        let (shutdown_tx, _) = watch::channel(false);
        Arc::new(Self {
            guard: IngestionGuard::new(&config.ingest),
            auth: Authenticator::new(&config.auth),
            config,
            ledger,
            registry,
            deps,
            projects: Mutex::new(HashMap::new()),
            shutdown_tx,
        })
    }

    /// Open the configured ledger and build a plane around it.
    pub fn open(config: VigilConfig) -> Result<Arc<Self>, VigilError> {
        let ledger = LedgerStore::open(&config.ledger_path)?;
        Ok(Self::new(config, ledger))
    }

    pub fn config(&self) -> &VigilConfig {
        &self.config
    }

    pub fn auth(&self) -> &Authenticator {
        &self.auth
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    pub fn guard(&self) -> &IngestionGuard {
        &self.guard
    }

    pub fn ledger(&self) -> &SharedLedger {
        &self.ledger
    }

    /// The project's actor, started on first use.
    pub fn project(&self, project_id: &ProjectId) -> Result<ProjectHandle, VigilError> {
        let mut projects = self.projects.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(handle) = projects.get(project_id) {
            return Ok(handle.clone());
        }
        let handle = ProjectHandle::spawn(project_id.clone(), Arc::clone(&self.deps))?;
        debug!(project_id = %project_id, "project actor spawned");
        projects.insert(project_id.clone(), handle.clone());
        Ok(handle)
    }

    /// Handle one raw post-registration text frame, counting it against the
    /// connection's rate limit first.
    pub async fn handle_text(&self, session: &Session, text: &str) -> Vec<Envelope> {
        if let Err(e) = self.guard.admit(session.conn_id) {
            return if e.notify {
                vec![Envelope::warning(e.to_string())]
            } else {
                Vec::new()
            };
        }
        match Envelope::parse(text) {
            Ok(envelope) => self.handle_message(session, envelope).await,
            Err(e) => vec![Envelope::error("invalid message", Some(e.to_string()), None)],
        }
    }

    /// Handle one decoded frame. Returns the replies to send back on the
    /// same connection, possibly none.
    pub async fn handle_message(&self, session: &Session, envelope: Envelope) -> Vec<Envelope> {
        let correlation_id = envelope.correlation_id.clone();
        let message = match ClientMessage::from_envelope(&envelope) {
            Ok(m) => m,
            Err(e) => {
                debug!(client_id = %session.client_id, error = %e, "rejecting message");
                return vec![Envelope::error(
                    "invalid message",
                    Some(e.to_string()),
                    correlation_id,
                )];
            }
        };
        if !message.allowed_for(session.role) {
            warn!(
                client_id = %session.client_id,
                role = %session.role,
                kind = %envelope.kind,
                "dropping message not permitted for role"
            );
            return Vec::new();
        }

        match message {
            ClientMessage::ActionEvent(event) => {
                self.submit_event(session, *event, correlation_id).await
            }
            ClientMessage::ActionComplete { event_id } => {
                debug!(event_id = %event_id, "action complete");
                self.signal(session, MachineEvent::ActionComplete, correlation_id)
                    .await
            }
            ClientMessage::AllActionsComplete => {
                self.signal(session, MachineEvent::AllActionsComplete, correlation_id)
                    .await
            }
            ClientMessage::AgentSignal(signal) => {
                self.signal(session, agent_signal_event(signal), correlation_id)
                    .await
            }
            ClientMessage::AgentOutput(output) => {
                self.relay(session, Envelope::new(types::AGENT_OUTPUT, output));
                Vec::new()
            }
            ClientMessage::AgentStatus(status) => {
                self.relay(session, Envelope::new(types::AGENT_STATUS, status));
                Vec::new()
            }
            ClientMessage::Command(command) => {
                match self
                    .command(&session.project_id, command, &session.actor())
                    .await
                {
                    Ok(state) => vec![
                        Envelope::new(types::STATE_SNAPSHOT, &state).correlated(correlation_id)
                    ],
                    Err(e) => vec![Envelope::error(
                        "command failed",
                        Some(e.to_string()),
                        correlation_id,
                    )],
                }
            }
            ClientMessage::Register => vec![Envelope::error(
                "already registered",
                None,
                correlation_id,
            )],
        }
    }

    fn relay(&self, session: &Session, envelope: Envelope) {
        let audience = Audience::for_kind(&envelope.kind);
        self.registry
            .broadcast(&session.project_id, audience, &Outbound::new(&envelope));
    }

    async fn signal(
        &self,
        session: &Session,
        event: MachineEvent,
        correlation_id: Option<String>,
    ) -> Vec<Envelope> {
        let result = match self.project(&session.project_id) {
            Ok(project) => project.apply(event, session.actor()).await,
            Err(e) => Err(e),
        };
        match result {
            Ok(_) => Vec::new(),
            Err(e) => vec![Envelope::error(
                "persistence failed",
                Some(e.to_string()),
                correlation_id,
            )],
        }
    }

    /// Run one producer submission through the guard and its project.
    pub async fn submit_event(
        &self,
        session: &Session,
        event: ActionEvent,
        correlation_id: Option<String>,
    ) -> Vec<Envelope> {
        if let Err(e) = event.validate() {
            return vec![Envelope::error(
                "invalid action event",
                Some(e.to_string()),
                correlation_id,
            )];
        }
        if event.project_id != session.project_id {
            return vec![Envelope::error(
                "invalid action event",
                Some(format!(
                    "event project {} does not match registered project {}",
                    event.project_id, session.project_id
                )),
                correlation_id,
            )];
        }

        let conn = session.conn_id;
        let event_id = event.id;
        let sequence_number = event.sequence_number;
        let gap = match self.guard.check(conn, event_id, sequence_number) {
            Admission::Duplicate => {
                return vec![Envelope::ack(Ack::duplicate(event_id), correlation_id)]
            }
            Admission::Stale { expected } => {
                debug!(client_id = %session.client_id, sequence_number, expected, "stale sequence number");
                return vec![Envelope::ack(
                    Ack::out_of_order(event_id, expected),
                    correlation_id,
                )];
            }
            Admission::Accept { gap } => gap,
        };

        let result = match self.project(&session.project_id) {
            Ok(project) => project.ingest(event, session.actor()).await,
            Err(e) => Err(e),
        };
        let ack = match result {
            Ok(Ingested::Duplicate) => {
                self.guard.commit(conn, sequence_number);
                Ack::duplicate(event_id)
            }
            Ok(Ingested::Accepted { .. }) => {
                self.guard.commit(conn, sequence_number);
                Ack::accepted(event_id)
            }
            Err(e) => {
                self.guard.reject(conn, &event_id);
                let message = if e.is_persistence() {
                    "persistence failed"
                } else {
                    "event processing failed"
                };
                return vec![Envelope::error(message, Some(e.to_string()), correlation_id)];
            }
        };

        let mut replies = vec![Envelope::ack(ack, correlation_id)];
        if gap > 0 {
            replies.push(Envelope::warning(format!(
                "sequence gap: {gap} number(s) skipped before {sequence_number}"
            )));
        }
        replies
    }

    /// Apply an operator command and return the resulting state.
    pub async fn command(
        &self,
        project_id: &ProjectId,
        command: Command,
        triggered_by: &str,
    ) -> Result<ExecutionState, VigilError> {
        let project = self.project(project_id)?;
        match command.to_machine_event() {
            Some(event) => project.apply(event, triggered_by.to_string()).await,
            None => project.snapshot().await,
        }
    }

    pub async fn snapshot(&self, project_id: &ProjectId) -> Result<ExecutionState, VigilError> {
        self.project(project_id)?.snapshot().await
    }

    pub fn transitions(
        &self,
        project_id: &ProjectId,
        last: Option<usize>,
    ) -> Result<Vec<StateTransition>, VigilError> {
        self.ledger
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .list_transitions(project_id, last)
    }

    pub fn zones(&self, project_id: &ProjectId) -> Result<Vec<ProtectionZone>, VigilError> {
        self.ledger
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .list_zones(project_id)
    }

    pub async fn add_zone(&self, zone: ProtectionZone) -> Result<ProtectionZone, VigilError> {
        self.ledger
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert_zone(&zone)?;
        info!(
            project_id = %zone.project_id,
            pattern = %zone.path_pattern,
            level = %zone.level.as_str(),
            "protection zone added"
        );
        self.project(&zone.project_id)?.reload_zones().await?;
        Ok(zone)
    }

    /// Delete a zone of `project_id`. Returns false if there is no such zone.
    pub async fn remove_zone(
        &self,
        project_id: &ProjectId,
        zone_id: &Uuid,
    ) -> Result<bool, VigilError> {
        let removed = {
            let ledger = self.ledger.lock().unwrap_or_else(|e| e.into_inner());
            match ledger.get_zone(zone_id)? {
                Some(zone) if &zone.project_id == project_id => ledger.delete_zone(zone_id)?,
                _ => false,
            }
        };
        if removed {
            info!(project_id = %project_id, zone_id = %zone_id, "protection zone removed");
            self.project(project_id)?.reload_zones().await?;
        }
        Ok(removed)
    }

    /// Persisted events a reconnecting client has not seen yet: everything
    /// after the ledger position it last processed.
    pub fn replay(
        &self,
        project_id: &ProjectId,
        last_position: u64,
    ) -> Result<Vec<RecordedEvent>, VigilError> {
        self.ledger
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .events_after(project_id, last_position)
    }

    pub fn connections(&self, project_id: &ProjectId) -> Vec<ConnectionInfo> {
        self.registry.connections(project_id)
    }

    /// Record a connection in the session log. Failures are only logged.
    pub fn begin_session(&self, registration: &Registration) -> Option<i64> {
        let ledger = self.ledger.lock().unwrap_or_else(|e| e.into_inner());
        match ledger.begin_session(
            &registration.client_id,
            registration.client_type.as_str(),
            &registration.project_id,
        ) {
            Ok(id) => Some(id),
            Err(e) => {
                warn!(client_id = %registration.client_id, error = %e, "failed to log session start");
                None
            }
        }
    }

    pub fn end_session(&self, session_id: Option<i64>, reason: &str) {
        let Some(session_id) = session_id else {
            return;
        };
        let ledger = self.ledger.lock().unwrap_or_else(|e| e.into_inner());
        if let Err(e) = ledger.end_session(session_id, reason) {
            warn!(session_id, error = %e, "failed to log session end");
        }
    }

    /// Periodically drop registry entries whose socket task is gone.
    pub fn spawn_sweeper(self: &Arc<Self>) -> JoinHandle<()> {
        let plane = Arc::clone(self);
        let mut shutdown = self.shutdown_tx.subscribe();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(plane.config.sweep_interval());
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        let removed = plane.registry.sweep();
                        if removed > 0 {
                            info!(removed, "swept dead connections");
                        }
                    }
                    _ = wait_for_shutdown(&mut shutdown) => break,
                }
            }
        })
    }

    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown_tx.subscribe()
    }

    pub fn is_shutting_down(&self) -> bool {
        *self.shutdown_tx.borrow()
    }

    /// Tell every connection and background task to stop.
    pub fn shutdown(&self) {
        info!("control plane shutting down");
        self.shutdown_tx.send_replace(true);
        self.registry.close_all(CloseReason::ServerShutdown);
    }
}

fn agent_signal_event(signal: AgentSignal) -> MachineEvent {
    match signal.signal {
        AgentSignalKind::Spawned => MachineEvent::AgentSpawned {
            session_id: signal.session_id,
        },
        AgentSignalKind::Completed => MachineEvent::AgentCompleted,
        AgentSignalKind::Crashed => MachineEvent::AgentCrashed {
            message: signal
                .message
                .unwrap_or_else(|| "agent process crashed".to_string()),
        },
    }
}

/// Wait for the shutdown flag without holding a watch guard across an await.
pub async fn wait_for_shutdown(shutdown: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow() {
            return;
        }
        if shutdown.changed().await.is_err() {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};
    use std::collections::HashSet;
    use vigil_types::{ExecutionStatus, FileOperation, ZoneLevel};

    fn plane() -> Arc<ControlPlane> {
        let mut config = VigilConfig::default();
        config.execution.resume_grace_ms = 10;
        ControlPlane::new(config, LedgerStore::open_in_memory().unwrap())
    }

    fn producer() -> Session {
        producer_on(Uuid::from_u128(1))
    }

    /// The producer as seen over a specific connection.
    fn producer_on(conn_id: Uuid) -> Session {
        Session {
            client_id: ClientId::new("worker"),
            role: ClientRole::Producer,
            project_id: ProjectId::new("p"),
            conn_id,
        }
    }

    fn operator() -> Session {
        Session {
            client_id: ClientId::new("op"),
            role: ClientRole::Operator,
            project_id: ProjectId::new("p"),
            conn_id: Uuid::from_u128(2),
        }
    }

    fn event_frame(event: &ActionEvent) -> Envelope {
        Envelope::new(types::ACTION_EVENT, event).correlated(Some("c".into()))
    }

    fn event(seq: u64, path: &str) -> ActionEvent {
        ActionEvent::new(ProjectId::new("p"), seq, FileOperation::FileModify, path)
            .with_content_hash(format!("h{seq}"))
    }

    fn payload(reply: &Envelope) -> Value {
        serde_json::to_value(&reply.payload).unwrap()
    }

    #[tokio::test]
    async fn dedup_idempotence() {
        let plane = plane();
        let e = event(1, "src/main.rs");
        let first = plane.handle_message(&producer(), event_frame(&e)).await;
        assert_eq!(first[0].kind, types::ACK);
        assert!(payload(&first[0]).get("duplicate").is_none());

        let again = plane.handle_message(&producer(), event_frame(&e)).await;
        assert_eq!(payload(&again[0])["duplicate"], true);

        let ledger = plane.ledger().lock().unwrap();
        assert_eq!(ledger.count_events(&ProjectId::new("p")).unwrap(), 1);
    }

    #[tokio::test]
    async fn sequence_acceptance() {
        let plane = plane();
        for seq in 1..=10 {
            let replies = plane
                .handle_message(&producer(), event_frame(&event(seq, "a.rs")))
                .await;
            assert_eq!(replies.len(), 1, "no gap warnings for contiguous numbers");
            assert_eq!(replies[0].kind, types::ACK);
        }
        let stale = plane
            .handle_message(&producer(), event_frame(&event(4, "a.rs")))
            .await;
        assert_eq!(payload(&stale[0])["outOfOrder"], true);
        assert_eq!(payload(&stale[0])["expected"], 11);

        let gap = plane
            .handle_message(&producer(), event_frame(&event(14, "a.rs")))
            .await;
        assert_eq!(gap.len(), 2);
        assert_eq!(gap[1].kind, types::WARNING);
    }

    #[tokio::test]
    async fn invalid_event_is_rejected_without_persisting() {
        let plane = plane();
        let bad = ActionEvent::new(ProjectId::new("p"), 1, FileOperation::FileCreate, "../etc");
        let replies = plane.handle_message(&producer(), event_frame(&bad)).await;
        assert_eq!(replies[0].kind, types::ERROR);
        assert_eq!(
            plane
                .ledger()
                .lock()
                .unwrap()
                .count_events(&ProjectId::new("p"))
                .unwrap(),
            0
        );
    }

    #[tokio::test]
    async fn wrong_role_is_silently_dropped() {
        let plane = plane();
        let replies = plane
            .handle_message(&operator(), event_frame(&event(1, "a.rs")))
            .await;
        assert!(replies.is_empty());

        let stop = Envelope::new(types::STOP_CMD, json!({"reason": "x"}));
        assert!(plane.handle_message(&producer(), stop).await.is_empty());
    }

    #[tokio::test]
    async fn malformed_message_gets_error() {
        let plane = plane();
        let env = Envelope::new("NOT_A_TYPE", json!({}));
        let replies = plane.handle_message(&producer(), env).await;
        assert_eq!(replies[0].kind, types::ERROR);
    }

    #[tokio::test]
    async fn operator_commands_reply_with_snapshot() {
        let plane = plane();
        plane
            .handle_message(&producer(), event_frame(&event(1, "a.rs")))
            .await;

        let stop = Envelope::new(types::STOP_CMD, json!({"reason": "pause"}))
            .correlated(Some("cmd-1".into()));
        let replies = plane.handle_message(&operator(), stop).await;
        assert_eq!(replies[0].kind, types::STATE_SNAPSHOT);
        assert_eq!(replies[0].correlation_id.as_deref(), Some("cmd-1"));
        assert_eq!(payload(&replies[0])["state"], "STOPPED");
        assert_eq!(payload(&replies[0])["context"]["stopReason"], "pause");

        let state = plane.snapshot(&ProjectId::new("p")).await.unwrap();
        assert_eq!(state.state(), ExecutionStatus::Stopped);
    }

    #[tokio::test]
    async fn agent_signals_drive_state() {
        let plane = plane();
        let spawned = Envelope::new(
            types::AGENT_SIGNAL,
            json!({"signal": "SPAWNED", "sessionId": "s-1"}),
        );
        assert!(plane.handle_message(&producer(), spawned).await.is_empty());
        let state = plane.snapshot(&ProjectId::new("p")).await.unwrap();
        assert_eq!(state.state(), ExecutionStatus::Running);
        assert_eq!(state.context().agent_session_id(), Some("s-1"));

        let crashed = Envelope::new(types::AGENT_SIGNAL, json!({"signal": "CRASHED"}));
        plane.handle_message(&producer(), crashed).await;
        let state = plane.snapshot(&ProjectId::new("p")).await.unwrap();
        assert_eq!(state.state(), ExecutionStatus::Error);
        assert_eq!(state.context().error_message(), Some("agent process crashed"));
    }

    #[tokio::test]
    async fn zones_are_project_scoped() {
        let plane = plane();
        let zone = plane
            .add_zone(ProtectionZone::new("p", ".env*", ZoneLevel::DoNotTouch, "op"))
            .await
            .unwrap();
        assert_eq!(plane.zones(&ProjectId::new("p")).unwrap().len(), 1);
        assert!(!plane
            .remove_zone(&ProjectId::new("other"), &zone.id)
            .await
            .unwrap());
        assert!(plane
            .remove_zone(&ProjectId::new("p"), &zone.id)
            .await
            .unwrap());
        assert!(plane.zones(&ProjectId::new("p")).unwrap().is_empty());
    }

    #[tokio::test]
    async fn raw_frames_are_rate_limited() {
        let mut config = VigilConfig::default();
        config.ingest.messages_per_second = 2;
        let plane = ControlPlane::new(config, LedgerStore::open_in_memory().unwrap());
        let text = r#"{"type":"GET_STATE"}"#;

        let mut warnings = 0;
        let mut silent = 0;
        for _ in 0..5 {
            let replies = plane.handle_text(&operator(), text).await;
            match replies.first() {
                Some(r) if r.kind == types::WARNING => warnings += 1,
                Some(_) => {}
                None => silent += 1,
            }
        }
        assert_eq!(warnings, 1);
        assert_eq!(silent, 2);

        let garbage = plane.handle_text(&producer(), "{not json").await;
        assert_eq!(garbage[0].kind, types::ERROR);
    }

    #[tokio::test]
    async fn release_clears_guard_state() {
        let plane = plane();
        plane
            .handle_message(&producer(), event_frame(&event(1, "a.rs")))
            .await;
        assert_eq!(plane.guard().tracked_connections(), 1);
        plane.guard().release(producer().conn_id);
        assert_eq!(plane.guard().tracked_connections(), 0);
    }

    #[tokio::test]
    async fn broken_parent_hash_is_still_accepted() {
        let plane = plane();
        let first = event(1, "src/a.rs");
        plane.handle_message(&producer(), event_frame(&first)).await;

        let obs = ClientId::new("obs");
        let mut link = plane
            .registry()
            .register(obs.clone(), ClientRole::Observer, ProjectId::new("p"));
        plane
            .registry()
            .resume(&ProjectId::new("p"), &obs, link.conn_id, &HashSet::new());

        let second = event(2, "src/a.rs").with_parent_hash("not-the-parent-hash");
        let replies = plane.handle_message(&producer(), event_frame(&second)).await;
        assert_eq!(replies.len(), 1);
        assert_eq!(replies[0].kind, types::ACK);
        assert!(payload(&replies[0]).get("duplicate").is_none());

        let ledger = plane.ledger().lock().unwrap();
        assert_eq!(ledger.count_events(&ProjectId::new("p")).unwrap(), 2);
        assert_eq!(
            ledger.get_event(&second.id).unwrap().unwrap().parent_event_hash.as_deref(),
            Some("not-the-parent-hash")
        );
        drop(ledger);

        let text = link.rx.try_recv().expect("event broadcast");
        let v: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(v["type"], "EVENT_BROADCAST");
        assert_eq!(v["payload"]["id"], second.id.to_string());
    }

    #[tokio::test]
    async fn replay_covers_events_after_producer_reconnects() {
        let plane = plane();
        for seq in 1..=3 {
            plane
                .handle_message(&producer(), event_frame(&event(seq, "a.rs")))
                .await;
        }
        let seen = plane.replay(&ProjectId::new("p"), 0).unwrap();
        let cursor = seen.last().unwrap().position;

        // the agent reconnects and numbers from 1 again
        let reconnected = producer_on(Uuid::from_u128(3));
        for seq in 1..=2 {
            let replies = plane
                .handle_message(&reconnected, event_frame(&event(seq, "b.rs")))
                .await;
            assert!(payload(&replies[0]).get("outOfOrder").is_none());
        }

        let missed = plane.replay(&ProjectId::new("p"), cursor).unwrap();
        let paths: Vec<&str> = missed.iter().map(|r| r.event.file_path.as_str()).collect();
        assert_eq!(paths, ["b.rs", "b.rs"]);
        assert_eq!(
            missed
                .iter()
                .map(|r| r.event.sequence_number)
                .collect::<Vec<_>>(),
            [1, 2]
        );
    }
}
