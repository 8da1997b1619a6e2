//! The per-project execution state machine.
//!
//! [`transition`] is the only function that produces a changed
//! [`ExecutionState`]: the fields are private and there are no setters.
//! It is pure; the caller persists the result and performs the returned
//! [`Effect`]s.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use vigil_ledger::StateRecord;
use vigil_types::{ExecutionStatus, ProjectId, RiskLevel, StateTransition, VigilError};

/// Run-control bookkeeping persisted alongside the state name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionContext {
    pending_actions: u64,
    total_actions_processed: u64,
    last_snapshot_id: Option<String>,
    last_action_event_id: Option<Uuid>,
    stopped_at: Option<DateTime<Utc>>,
    stop_reason: Option<String>,
    error_message: Option<String>,
    error_timestamp: Option<DateTime<Utc>>,
    session_started_at: Option<DateTime<Utc>>,
    auto_stop_risk_threshold: RiskLevel,
    rate_limit: u32,
    agent_session_id: Option<String>,
}

impl ExecutionContext {
    fn new(auto_stop_risk_threshold: RiskLevel, rate_limit: u32) -> Self {
        Self {
            pending_actions: 0,
            total_actions_processed: 0,
            last_snapshot_id: None,
            last_action_event_id: None,
            stopped_at: None,
            stop_reason: None,
            error_message: None,
            error_timestamp: None,
            session_started_at: None,
            auto_stop_risk_threshold,
            rate_limit,
            agent_session_id: None,
        }
    }

    pub fn pending_actions(&self) -> u64 {
        self.pending_actions
    }

    pub fn total_actions_processed(&self) -> u64 {
        self.total_actions_processed
    }

    pub fn last_snapshot_id(&self) -> Option<&str> {
        self.last_snapshot_id.as_deref()
    }

    pub fn last_action_event_id(&self) -> Option<Uuid> {
        self.last_action_event_id
    }

    pub fn stopped_at(&self) -> Option<DateTime<Utc>> {
        self.stopped_at
    }

    pub fn stop_reason(&self) -> Option<&str> {
        self.stop_reason.as_deref()
    }

    pub fn error_message(&self) -> Option<&str> {
        self.error_message.as_deref()
    }

    pub fn error_timestamp(&self) -> Option<DateTime<Utc>> {
        self.error_timestamp
    }

    pub fn session_started_at(&self) -> Option<DateTime<Utc>> {
        self.session_started_at
    }

    pub fn auto_stop_risk_threshold(&self) -> RiskLevel {
        self.auto_stop_risk_threshold
    }

    pub fn rate_limit(&self) -> u32 {
        self.rate_limit
    }

    pub fn agent_session_id(&self) -> Option<&str> {
        self.agent_session_id.as_deref()
    }

    fn record_action(&mut self, event_id: Uuid, snapshot_id: &str) {
        self.total_actions_processed += 1;
        self.last_action_event_id = Some(event_id);
        if !snapshot_id.is_empty() {
            self.last_snapshot_id = Some(snapshot_id.to_string());
        }
    }

    fn clear_stop(&mut self) {
        self.stopped_at = None;
        self.stop_reason = None;
    }

    fn clear_error(&mut self) {
        self.error_message = None;
        self.error_timestamp = None;
    }
}

/// Current run-control state of one project.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionState {
    project_id: ProjectId,
    state: ExecutionStatus,
    context: ExecutionContext,
}

impl ExecutionState {
    /// A fresh IDLE state for a project seen for the first time.
    pub fn new(project_id: ProjectId, auto_stop_threshold: RiskLevel, rate_limit: u32) -> Self {
        Self {
            project_id,
            state: ExecutionStatus::Idle,
            context: ExecutionContext::new(auto_stop_threshold, rate_limit),
        }
    }

    /// Rebuild a state from its persisted name and context JSON.
    pub fn restore(
        project_id: ProjectId,
        state: ExecutionStatus,
        context_json: &str,
    ) -> Result<Self, VigilError> {
        let context: ExecutionContext = serde_json::from_str(context_json).map_err(|e| {
            VigilError::StateError(format!("corrupt execution context for {project_id}: {e}"))
        })?;
        Ok(Self {
            project_id,
            state,
            context,
        })
    }

    pub fn from_record(record: &StateRecord) -> Result<Self, VigilError> {
        Self::restore(record.project_id.clone(), record.state, &record.context)
    }

    pub fn to_record(&self, now: DateTime<Utc>) -> Result<StateRecord, VigilError> {
        let context = serde_json::to_string(&self.context)
            .map_err(|e| VigilError::StateError(format!("failed to serialize context: {e}")))?;
        Ok(StateRecord {
            project_id: self.project_id.clone(),
            state: self.state,
            context,
            updated_at: now,
        })
    }

    pub fn project_id(&self) -> &ProjectId {
        &self.project_id
    }

    pub fn state(&self) -> ExecutionStatus {
        self.state
    }

    pub fn context(&self) -> &ExecutionContext {
        &self.context
    }

    /// History row for a move from `from` into the current state.
    pub fn transition_record(
        &self,
        from: ExecutionStatus,
        trigger: &MachineEvent,
        triggered_by: &str,
        now: DateTime<Utc>,
    ) -> StateTransition {
        StateTransition {
            id: Uuid::new_v4(),
            project_id: self.project_id.clone(),
            from_state: from,
            to_state: self.state,
            trigger_event: trigger.name().to_string(),
            triggered_by: triggered_by.to_string(),
            snapshot_id: self.context.last_snapshot_id.clone(),
            timestamp: now,
        }
    }
}

/// Inputs to the state machine.
#[derive(Debug, Clone, PartialEq)]
pub enum MachineEvent {
    ActionEvent { event_id: Uuid, snapshot_id: String },
    ActionComplete,
    AllActionsComplete,
    StopCmd { reason: String },
    AutoStop { reason: String },
    ContinueCmd,
    ResetCmd,
    ResumeComplete,
    ErrorOccurred { message: String },
    AgentSpawned { session_id: Option<String> },
    AgentCompleted,
    AgentCrashed { message: String },
    Configure {
        auto_stop_threshold: Option<RiskLevel>,
        rate_limit: Option<u32>,
    },
}

impl MachineEvent {
    /// Name recorded as `triggerEvent` in the history ledger.
    pub fn name(&self) -> &'static str {
        match self {
            MachineEvent::ActionEvent { .. } => "ACTION_EVENT",
            MachineEvent::ActionComplete => "ACTION_COMPLETE",
            MachineEvent::AllActionsComplete => "ALL_ACTIONS_COMPLETE",
            MachineEvent::StopCmd { .. } => "STOP_CMD",
            MachineEvent::AutoStop { .. } => "AUTO_STOP",
            MachineEvent::ContinueCmd => "CONTINUE_CMD",
            MachineEvent::ResetCmd => "RESET_CMD",
            MachineEvent::ResumeComplete => "RESUME_COMPLETE",
            MachineEvent::ErrorOccurred { .. } => "ERROR_OCCURRED",
            MachineEvent::AgentSpawned { .. } => "AGENT_SPAWNED",
            MachineEvent::AgentCompleted => "AGENT_COMPLETED",
            MachineEvent::AgentCrashed { .. } => "AGENT_CRASHED",
            MachineEvent::Configure { .. } => "CONFIGURE",
        }
    }
}

/// Side effects the caller must carry out after persisting the new state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// The state name changed; append a history row and broadcast it.
    StateChanged {
        from: ExecutionStatus,
        to: ExecutionStatus,
    },
    /// Deliver `ResumeComplete` after the resume grace delay.
    ScheduleResumeComplete,
}

/// Result of applying one event.
#[derive(Debug, Clone, PartialEq)]
pub struct Outcome {
    pub state: ExecutionState,
    pub effects: Vec<Effect>,
    /// False when the event is not valid in the current state and was ignored.
    pub handled: bool,
}

impl Outcome {
    pub fn state_change(&self) -> Option<(ExecutionStatus, ExecutionStatus)> {
        self.effects.iter().find_map(|e| match e {
            Effect::StateChanged { from, to } => Some((*from, *to)),
            _ => None,
        })
    }
}

/// Apply `event` to `current`.
pub fn transition(current: &ExecutionState, event: &MachineEvent, now: DateTime<Utc>) -> Outcome {
    use ExecutionStatus::*;

    let mut next = current.clone();
    let ctx = &mut next.context;
    let mut effects = Vec::new();

    let target = match (current.state, event) {
        (_, MachineEvent::ResetCmd) => {
            ctx.clear_stop();
            ctx.clear_error();
            ctx.pending_actions = 0;
            Some(Idle)
        }
        (_, MachineEvent::Configure {
            auto_stop_threshold,
            rate_limit,
        }) => {
            if let Some(threshold) = auto_stop_threshold {
                ctx.auto_stop_risk_threshold = *threshold;
            }
            if let Some(rate) = rate_limit {
                ctx.rate_limit = *rate;
            }
            Some(current.state)
        }

        (Idle, MachineEvent::ActionEvent {
            event_id,
            snapshot_id,
        }) => {
            ctx.pending_actions = 1;
            ctx.session_started_at = Some(now);
            ctx.record_action(*event_id, snapshot_id);
            Some(Running)
        }
        (Idle, MachineEvent::AgentSpawned { session_id }) => {
            ctx.agent_session_id = session_id.clone();
            ctx.session_started_at = Some(now);
            Some(Running)
        }

        (Running, MachineEvent::ActionEvent {
            event_id,
            snapshot_id,
        }) => {
            ctx.pending_actions += 1;
            ctx.record_action(*event_id, snapshot_id);
            Some(Running)
        }
        (Running, MachineEvent::ActionComplete) => {
            ctx.pending_actions = ctx.pending_actions.saturating_sub(1);
            Some(Running)
        }
        (Running, MachineEvent::AllActionsComplete) => {
            ctx.pending_actions = 0;
            Some(Idle)
        }
        (Running, MachineEvent::StopCmd { reason } | MachineEvent::AutoStop { reason })
        | (Resuming, MachineEvent::StopCmd { reason }) => {
            ctx.stopped_at = Some(now);
            ctx.stop_reason = Some(reason.clone());
            Some(Stopped)
        }
        (Running | Resuming, MachineEvent::ErrorOccurred { message }) => {
            ctx.error_message = Some(message.clone());
            ctx.error_timestamp = Some(now);
            Some(Error)
        }
        (Running, MachineEvent::AgentCompleted) => {
            ctx.agent_session_id = None;
            Some(Idle)
        }
        (Running, MachineEvent::AgentCrashed { message }) => {
            ctx.agent_session_id = None;
            ctx.error_message = Some(message.clone());
            ctx.error_timestamp = Some(now);
            Some(Error)
        }

        (Stopped | Error, MachineEvent::ContinueCmd) => {
            effects.push(Effect::ScheduleResumeComplete);
            Some(Resuming)
        }
        (Resuming, MachineEvent::ResumeComplete) => {
            ctx.clear_stop();
            Some(Running)
        }

        _ => None,
    };

    match target {
        Some(to) => {
            next.state = to;
            if to != current.state {
                effects.insert(
                    0,
                    Effect::StateChanged {
                        from: current.state,
                        to,
                    },
                );
            }
            Outcome {
                state: next,
                effects,
                handled: true,
            }
        }
        None => Outcome {
            state: current.clone(),
            effects: Vec::new(),
            handled: false,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fresh() -> ExecutionState {
        ExecutionState::new(ProjectId::new("p"), RiskLevel::High, 120)
    }

    fn action(n: u32) -> MachineEvent {
        MachineEvent::ActionEvent {
            event_id: Uuid::new_v4(),
            snapshot_id: format!("snap-{n}"),
        }
    }

    fn apply(state: ExecutionState, event: MachineEvent) -> ExecutionState {
        transition(&state, &event, Utc::now()).state
    }

    #[test]
    fn counting_scenario() {
        let n = 5;
        let mut s = fresh();
        for i in 0..n {
            s = apply(s, action(i));
        }
        assert_eq!(s.state(), ExecutionStatus::Running);
        assert_eq!(s.context().pending_actions(), n as u64);
        assert_eq!(s.context().total_actions_processed(), n as u64);
        assert_eq!(s.context().last_snapshot_id(), Some("snap-4"));

        for _ in 0..n {
            s = apply(s, MachineEvent::ActionComplete);
        }
        assert_eq!(s.state(), ExecutionStatus::Running);
        assert_eq!(s.context().pending_actions(), 0);

        // never goes negative
        s = apply(s, MachineEvent::ActionComplete);
        assert_eq!(s.context().pending_actions(), 0);

        s = apply(s, MachineEvent::AllActionsComplete);
        assert_eq!(s.state(), ExecutionStatus::Idle);
        assert_eq!(s.context().total_actions_processed(), n as u64);
    }

    #[test]
    fn full_lifecycle() {
        let s = apply(fresh(), action(1));
        assert_eq!(s.state(), ExecutionStatus::Running);

        let s = apply(
            s,
            MachineEvent::StopCmd {
                reason: "pause".into(),
            },
        );
        assert_eq!(s.state(), ExecutionStatus::Stopped);
        assert_eq!(s.context().stop_reason(), Some("pause"));
        assert!(s.context().stopped_at().is_some());

        let out = transition(&s, &MachineEvent::ContinueCmd, Utc::now());
        assert!(out.effects.contains(&Effect::ScheduleResumeComplete));
        let s = out.state;
        assert_eq!(s.state(), ExecutionStatus::Resuming);
        assert_eq!(s.context().stop_reason(), Some("pause"));

        let s = apply(s, MachineEvent::ResumeComplete);
        assert_eq!(s.state(), ExecutionStatus::Running);
        assert_eq!(s.context().stop_reason(), None);
        assert_eq!(s.context().stopped_at(), None);

        let s = apply(s, MachineEvent::AllActionsComplete);
        assert_eq!(s.state(), ExecutionStatus::Idle);
    }

    #[test]
    fn stop_in_idle_is_ignored() {
        let s = fresh();
        let out = transition(
            &s,
            &MachineEvent::StopCmd {
                reason: "x".into(),
            },
            Utc::now(),
        );
        assert!(!out.handled);
        assert!(out.effects.is_empty());
        assert_eq!(out.state, s);
    }

    #[test]
    fn state_change_effect_only_on_name_change() {
        let s = apply(fresh(), action(1));
        let out = transition(&s, &action(2), Utc::now());
        assert!(out.handled);
        assert_eq!(out.state_change(), None);

        let out = transition(&s, &MachineEvent::AllActionsComplete, Utc::now());
        assert_eq!(
            out.state_change(),
            Some((ExecutionStatus::Running, ExecutionStatus::Idle))
        );
    }

    #[test]
    fn auto_stop_only_from_running() {
        let auto = MachineEvent::AutoStop {
            reason: "critical".into(),
        };
        assert!(!transition(&fresh(), &auto, Utc::now()).handled);

        let s = apply(apply(fresh(), action(1)), auto);
        assert_eq!(s.state(), ExecutionStatus::Stopped);
        assert_eq!(s.context().stop_reason(), Some("critical"));
    }

    #[test]
    fn agent_crash_and_recovery() {
        let s = apply(
            fresh(),
            MachineEvent::AgentSpawned {
                session_id: Some("sess-1".into()),
            },
        );
        assert_eq!(s.state(), ExecutionStatus::Running);
        assert_eq!(s.context().agent_session_id(), Some("sess-1"));

        let s = apply(
            s,
            MachineEvent::AgentCrashed {
                message: "segfault".into(),
            },
        );
        assert_eq!(s.state(), ExecutionStatus::Error);
        assert_eq!(s.context().agent_session_id(), None);
        assert_eq!(s.context().error_message(), Some("segfault"));

        let s = apply(s, MachineEvent::ResetCmd);
        assert_eq!(s.state(), ExecutionStatus::Idle);
        assert_eq!(s.context().error_message(), None);
        assert_eq!(s.context().error_timestamp(), None);
    }

    #[test]
    fn reset_clears_stop_and_pending() {
        let mut s = fresh();
        for i in 0..3 {
            s = apply(s, action(i));
        }
        let s = apply(
            s,
            MachineEvent::StopCmd {
                reason: "halt".into(),
            },
        );
        let s = apply(s, MachineEvent::ResetCmd);
        assert_eq!(s.state(), ExecutionStatus::Idle);
        assert_eq!(s.context().pending_actions(), 0);
        assert_eq!(s.context().stop_reason(), None);
        assert_eq!(s.context().total_actions_processed(), 3);
    }

    #[test]
    fn configure_keeps_state() {
        let s = apply(fresh(), action(1));
        let out = transition(
            &s,
            &MachineEvent::Configure {
                auto_stop_threshold: Some(RiskLevel::Critical),
                rate_limit: None,
            },
            Utc::now(),
        );
        assert!(out.handled);
        assert_eq!(out.state_change(), None);
        assert_eq!(out.state.state(), ExecutionStatus::Running);
        assert_eq!(
            out.state.context().auto_stop_risk_threshold(),
            RiskLevel::Critical
        );
        assert_eq!(out.state.context().rate_limit(), 120);
    }

    #[test]
    fn persisted_state_round_trips() {
        let s = apply(apply(fresh(), action(1)), MachineEvent::StopCmd {
            reason: "pause".into(),
        });
        let record = s.to_record(Utc::now()).unwrap();
        let restored = ExecutionState::from_record(&record).unwrap();
        assert_eq!(restored, s);

        // restoring twice is idempotent
        let again = ExecutionState::from_record(&restored.to_record(Utc::now()).unwrap()).unwrap();
        assert_eq!(again, s);
    }

    #[test]
    fn corrupt_context_is_state_error() {
        let err = ExecutionState::restore(ProjectId::new("p"), ExecutionStatus::Idle, "{nope")
            .unwrap_err();
        assert!(matches!(err, VigilError::StateError(_)));
    }

    #[test]
    fn transition_record_names_trigger() {
        let s = apply(fresh(), action(7));
        let row = s.transition_record(ExecutionStatus::Idle, &action(7), "producer:w1", Utc::now());
        assert_eq!(row.from_state, ExecutionStatus::Idle);
        assert_eq!(row.to_state, ExecutionStatus::Running);
        assert_eq!(row.trigger_event, "ACTION_EVENT");
        assert_eq!(row.snapshot_id.as_deref(), Some("snap-7"));
    }
}
