//! One actor per project.
//!
//! Every state transition and every classification for a project runs on
//! its actor task, fed by an mpsc mailbox, so they are linearized even
//! when several connections submit concurrently. The actor owns the
//! project's [`ExecutionState`] and [`RiskEngine`].
//!
//! Machine steps are computed first, committed to the ledger, and only then
//! adopted and broadcast. An ingested event, the state it produces and its
//! transition rows share one ledger transaction.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

use vigil_ledger::{ChainLink, LedgerStore};
use vigil_policy::{ClassifyContext, RiskEngine};
use vigil_types::{
    ActionEvent, ExecutionStatus, ProjectId, ProtectionZone, RiskVerdict, StateTransition,
    VigilConfig, VigilError,
};

use crate::machine::{transition, Effect, ExecutionState, MachineEvent, Outcome};
use crate::protocol::{Envelope, StateChange};
use crate::registry::{Audience, ConnectionRegistry, Outbound};

/// Ledger handle shared by all actors and the HTTP surface.
pub type SharedLedger = Arc<Mutex<LedgerStore>>;

const MAILBOX_CAPACITY: usize = 256;

/// Who drives automatic transitions in the history ledger.
pub const RISK_ENGINE_ACTOR: &str = "risk-engine";
pub const SYSTEM_ACTOR: &str = "system";

/// Result of ingesting one event.
#[derive(Debug, Clone)]
pub enum Ingested {
    /// Already in the ledger; nothing was reprocessed.
    Duplicate,
    Accepted {
        verdict: RiskVerdict,
        state: ExecutionStatus,
    },
}

enum ProjectCommand {
    Ingest {
        event: Box<ActionEvent>,
        triggered_by: String,
        reply: oneshot::Sender<Result<Ingested, VigilError>>,
    },
    Apply {
        event: MachineEvent,
        triggered_by: String,
        reply: oneshot::Sender<Result<ExecutionState, VigilError>>,
    },
    ResumeDue {
        epoch: u64,
    },
    Snapshot {
        reply: oneshot::Sender<ExecutionState>,
    },
    ReloadZones {
        reply: oneshot::Sender<Result<usize, VigilError>>,
    },
}

/// A handled machine event whose result is not yet persisted.
struct Step {
    event: MachineEvent,
    triggered_by: String,
    outcome: Outcome,
    transition: Option<StateTransition>,
}

/// What an actor needs from the rest of the plane.
pub struct ProjectDeps {
    pub config: Arc<VigilConfig>,
    pub ledger: SharedLedger,
    pub registry: Arc<ConnectionRegistry>,
}

/// Cheap, cloneable address of a project actor.
#[derive(Clone)]
pub struct ProjectHandle {
    project_id: ProjectId,
    tx: mpsc::Sender<ProjectCommand>,
}

fn actor_gone(project: &ProjectId) -> VigilError {
    VigilError::StateError(format!("project actor for {project} has stopped"))
}

impl ProjectHandle {
    /// Load the project's persisted state and zones, then start its actor.
    pub fn spawn(project_id: ProjectId, deps: Arc<ProjectDeps>) -> Result<Self, VigilError> {
        let actor = ProjectActor::load(project_id.clone(), deps)?;
        let (tx, rx) = mpsc::channel(MAILBOX_CAPACITY);
        tokio::spawn(actor.run(rx, tx.downgrade()));
        Ok(Self { project_id, tx })
    }

    pub fn project_id(&self) -> &ProjectId {
        &self.project_id
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> ProjectCommand,
    ) -> Result<T, VigilError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(make(reply))
            .await
            .map_err(|_| actor_gone(&self.project_id))?;
        rx.await.map_err(|_| actor_gone(&self.project_id))
    }

    pub async fn ingest(
        &self,
        event: ActionEvent,
        triggered_by: String,
    ) -> Result<Ingested, VigilError> {
        self.request(|reply| ProjectCommand::Ingest {
            event: Box::new(event),
            triggered_by,
            reply,
        })
        .await?
    }

    pub async fn apply(
        &self,
        event: MachineEvent,
        triggered_by: String,
    ) -> Result<ExecutionState, VigilError> {
        self.request(|reply| ProjectCommand::Apply {
            event,
            triggered_by,
            reply,
        })
        .await?
    }

    pub async fn snapshot(&self) -> Result<ExecutionState, VigilError> {
        self.request(|reply| ProjectCommand::Snapshot { reply }).await
    }

    pub async fn reload_zones(&self) -> Result<usize, VigilError> {
        self.request(|reply| ProjectCommand::ReloadZones { reply })
            .await?
    }
}

struct ProjectActor {
    project_id: ProjectId,
    deps: Arc<ProjectDeps>,
    engine: RiskEngine,
    state: ExecutionState,
    zones: Vec<ProtectionZone>,
    chain_tip: Option<ChainLink>,
    resume_epoch: u64,
}

impl ProjectActor {
    fn load(project_id: ProjectId, deps: Arc<ProjectDeps>) -> Result<Self, VigilError> {
        let (state, zones, chain_tip) = {
            let ledger = deps.ledger.lock().unwrap_or_else(|e| e.into_inner());
            let state = match ledger.load_state(&project_id)? {
                Some(record) => {
                    let state = ExecutionState::from_record(&record)?;
                    info!(project_id = %project_id, state = %state.state(), "restored execution state");
                    state
                }
                None => ExecutionState::new(
                    project_id.clone(),
                    deps.config.execution.auto_stop_threshold,
                    deps.config.execution.rate_limit_per_minute,
                ),
            };
            (
                state,
                ledger.list_zones(&project_id)?,
                ledger.chain_tip(&project_id)?,
            )
        };
        Ok(Self {
            project_id,
            engine: RiskEngine::new(&deps.config.effective_risk()),
            deps,
            state,
            zones,
            chain_tip,
            resume_epoch: 0,
        })
    }

    async fn run(
        mut self,
        mut rx: mpsc::Receiver<ProjectCommand>,
        mailbox: mpsc::WeakSender<ProjectCommand>,
    ) {
        debug!(project_id = %self.project_id, "project actor started");
        while let Some(command) = rx.recv().await {
            match command {
                ProjectCommand::Ingest {
                    event,
                    triggered_by,
                    reply,
                } => {
                    let result = self.ingest(*event, &triggered_by, &mailbox);
                    let _ = reply.send(result);
                }
                ProjectCommand::Apply {
                    event,
                    triggered_by,
                    reply,
                } => {
                    let result = self
                        .apply(event, &triggered_by, &mailbox)
                        .map(|_| self.state.clone());
                    let _ = reply.send(result);
                }
                ProjectCommand::ResumeDue { epoch } => {
                    if epoch == self.resume_epoch {
                        if let Err(e) =
                            self.apply(MachineEvent::ResumeComplete, SYSTEM_ACTOR, &mailbox)
                        {
                            error!(project_id = %self.project_id, error = %e, "failed to complete resume");
                        }
                    }
                }
                ProjectCommand::Snapshot { reply } => {
                    let _ = reply.send(self.state.clone());
                }
                ProjectCommand::ReloadZones { reply } => {
                    let _ = reply.send(self.reload_zones());
                }
            }
        }
        debug!(project_id = %self.project_id, "project actor stopped");
    }

    fn reload_zones(&mut self) -> Result<usize, VigilError> {
        let ledger = self.deps.ledger.lock().unwrap_or_else(|e| e.into_inner());
        self.zones = ledger.list_zones(&self.project_id)?;
        Ok(self.zones.len())
    }

    fn broadcast(&self, audience: Audience, outbound: &Outbound) {
        self.deps
            .registry
            .broadcast(&self.project_id, audience, outbound);
    }

    fn check_chain(&self, event: &ActionEvent) {
        let Some(declared) = event.parent_event_hash.as_deref() else {
            return;
        };
        match &self.chain_tip {
            Some(tip) if tip.mismatches(event) => warn!(
                project_id = %self.project_id,
                event_id = %event.id,
                declared,
                expected = %tip.expected_parent_hash(),
                "hash chain mismatch"
            ),
            Some(_) => {}
            None => warn!(
                project_id = %self.project_id,
                event_id = %event.id,
                "event declares a parent hash but the project has no prior event"
            ),
        }
    }

    fn ingest(
        &mut self,
        mut event: ActionEvent,
        triggered_by: &str,
        mailbox: &mpsc::WeakSender<ProjectCommand>,
    ) -> Result<Ingested, VigilError> {
        {
            let ledger = self.deps.ledger.lock().unwrap_or_else(|e| e.into_inner());
            if ledger.contains_event(&event.id)? {
                debug!(event_id = %event.id, "event already in ledger");
                return Ok(Ingested::Duplicate);
            }
        }
        self.check_chain(&event);

        let context = self.state.context();
        let ctx = ClassifyContext::new(
            &self.zones,
            context.auto_stop_risk_threshold(),
            context.rate_limit(),
        );
        let verdict = self.engine.classify(&event, &ctx);
        verdict.enrich(&mut event);

        let now = Utc::now();
        let mut steps = Vec::new();
        let counted = MachineEvent::ActionEvent {
            event_id: event.id,
            snapshot_id: event.snapshot_id.clone(),
        };
        if let Some(step) = self.plan(&self.state, counted, triggered_by, now) {
            steps.push(step);
        }
        let current = steps.last().map_or(&self.state, |s| &s.outcome.state);
        if (verdict.should_auto_stop || verdict.should_block)
            && current.state() == ExecutionStatus::Running
        {
            let reason = format!(
                "auto-stop: {} risk on {}: {}",
                verdict.risk_level,
                event.file_path,
                verdict.reasons.join("; ")
            );
            warn!(project_id = %self.project_id, event_id = %event.id, "{reason}");
            let stop = self.plan(current, MachineEvent::AutoStop { reason }, RISK_ENGINE_ACTOR, now);
            steps.extend(stop);
        }

        let record = match steps.last() {
            Some(step) => Some(step.outcome.state.to_record(now)?),
            None => None,
        };
        let transitions: Vec<&StateTransition> =
            steps.iter().filter_map(|s| s.transition.as_ref()).collect();
        let position = {
            let ledger = self.deps.ledger.lock().unwrap_or_else(|e| e.into_inner());
            match ledger.record_ingest(&event, record.as_ref(), &transitions) {
                Ok(position) => position,
                Err(e) => {
                    error!(event_id = %event.id, error = %e, "failed to persist action event");
                    return Err(e);
                }
            }
        };
        self.chain_tip = Some(ChainLink::from(&event));

        self.broadcast(
            Audience::OperatorsAndObservers,
            &Outbound::for_event(&Envelope::event_broadcast(&event, position), event.id),
        );
        if verdict.is_alert() {
            info!(
                project_id = %self.project_id,
                event_id = %event.id,
                risk_level = %verdict.risk_level,
                file_path = %event.file_path,
                "risk alert"
            );
            self.broadcast(
                Audience::OperatorsAndObservers,
                &Outbound::new(&Envelope::risk_alert(&event, &verdict)),
            );
        }
        for step in steps {
            self.adopt(step, mailbox);
        }

        Ok(Ingested::Accepted {
            verdict,
            state: self.state.state(),
        })
    }

    /// Run `event` against `current` without touching the actor's state.
    /// `None` when the event is not valid in that state.
    fn plan(
        &self,
        current: &ExecutionState,
        event: MachineEvent,
        triggered_by: &str,
        now: DateTime<Utc>,
    ) -> Option<Step> {
        let outcome = transition(current, &event, now);
        if !outcome.handled {
            debug!(
                project_id = %self.project_id,
                state = %current.state(),
                event = event.name(),
                "event ignored in current state"
            );
            return None;
        }
        let transition = outcome
            .state_change()
            .map(|(from, _)| outcome.state.transition_record(from, &event, triggered_by, now));
        Some(Step {
            event,
            triggered_by: triggered_by.to_string(),
            outcome,
            transition,
        })
    }

    /// Run one machine event that carries no action event, persist the
    /// result, then adopt it. Returns the state change, if any.
    fn apply(
        &mut self,
        event: MachineEvent,
        triggered_by: &str,
        mailbox: &mpsc::WeakSender<ProjectCommand>,
    ) -> Result<Option<StateChange>, VigilError> {
        let now = Utc::now();
        let Some(step) = self.plan(&self.state, event, triggered_by, now) else {
            return Ok(None);
        };
        let record = step.outcome.state.to_record(now)?;
        {
            let ledger = self.deps.ledger.lock().unwrap_or_else(|e| e.into_inner());
            if let Err(e) = ledger.record_state(&record, step.transition.as_ref()) {
                error!(project_id = %self.project_id, error = %e, "failed to persist execution state");
                return Err(e);
            }
        }
        Ok(self.adopt(step, mailbox))
    }

    /// Make a persisted step the current state, carry out its effects and
    /// broadcast the state change.
    fn adopt(
        &mut self,
        step: Step,
        mailbox: &mpsc::WeakSender<ProjectCommand>,
    ) -> Option<StateChange> {
        let Step {
            event,
            triggered_by,
            outcome,
            ..
        } = step;
        let change = outcome.state_change();
        self.state = outcome.state;

        for effect in &outcome.effects {
            if *effect == Effect::ScheduleResumeComplete {
                self.schedule_resume(mailbox);
            }
        }

        let (from, to) = change?;
        info!(
            project_id = %self.project_id,
            from = %from,
            to = %to,
            trigger = event.name(),
            triggered_by = %triggered_by,
            "execution state changed"
        );
        let context = self.state.context();
        let reason = match to {
            ExecutionStatus::Stopped => context.stop_reason().map(String::from),
            ExecutionStatus::Error => context.error_message().map(String::from),
            _ => None,
        };
        let change = StateChange {
            project_id: self.project_id.clone(),
            previous_state: from,
            state: to,
            trigger_event: event.name().to_string(),
            triggered_by,
            reason,
        };
        self.broadcast(Audience::All, &Outbound::new(&Envelope::state_change(&change)));
        Some(change)
    }

    fn schedule_resume(&mut self, mailbox: &mpsc::WeakSender<ProjectCommand>) {
        self.resume_epoch += 1;
        let epoch = self.resume_epoch;
        let grace = self.deps.config.resume_grace();
        let mailbox = mailbox.clone();
        tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            if let Some(tx) = mailbox.upgrade() {
                let _ = tx.send(ProjectCommand::ResumeDue { epoch }).await;
            }
        });
    }
}
