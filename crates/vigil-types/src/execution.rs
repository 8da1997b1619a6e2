//! Execution status names and the state-transition history record.
//!
//! The state machine itself lives in `vigil-control`; these are the pieces
//! the ledger and the wire protocol need to agree on.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::ids::ProjectId;
use crate::VigilError;

/// Run-control state of one project.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionStatus {
    #[default]
    Idle,
    Running,
    Stopped,
    Resuming,
    Error,
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::Idle => "IDLE",
            ExecutionStatus::Running => "RUNNING",
            ExecutionStatus::Stopped => "STOPPED",
            ExecutionStatus::Resuming => "RESUMING",
            ExecutionStatus::Error => "ERROR",
        }
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExecutionStatus {
    type Err = VigilError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "IDLE" => Ok(ExecutionStatus::Idle),
            "RUNNING" => Ok(ExecutionStatus::Running),
            "STOPPED" => Ok(ExecutionStatus::Stopped),
            "RESUMING" => Ok(ExecutionStatus::Resuming),
            "ERROR" => Ok(ExecutionStatus::Error),
            other => Err(VigilError::StateError(format!(
                "unknown execution state {other:?}"
            ))),
        }
    }
}

/// One row of the append-only state-transition history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateTransition {
    pub id: Uuid,
    pub project_id: ProjectId,
    pub from_state: ExecutionStatus,
    pub to_state: ExecutionStatus,
    /// Name of the machine event that caused the transition (e.g. `STOP_CMD`).
    pub trigger_event: String,
    /// Who caused it: a client id, `system`, or `risk-engine`.
    pub triggered_by: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snapshot_id: Option<String>,
    pub timestamp: DateTime<Utc>,
}
