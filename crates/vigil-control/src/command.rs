//! Operator commands and the response shape used by the HTTP surface.
//!
//! Commands arrive either as WebSocket frames (`STOP_CMD`, `CONTINUE_CMD`,
//! ...) or as `POST /v1/projects/{id}/command` bodies. Both decode into
//! [`Command`] and are applied to the project's state machine the same way.

use serde::{Deserialize, Serialize};

use vigil_types::RiskLevel;

use crate::machine::MachineEvent;

/// Stop reason recorded when an operator does not give one.
pub const DEFAULT_STOP_REASON: &str = "operator stop";

fn default_stop_reason() -> String {
    DEFAULT_STOP_REASON.to_string()
}

/// A run-control command issued by an operator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum Command {
    /// Stop the agent.
    Stop {
        #[serde(default = "default_stop_reason")]
        reason: String,
    },
    /// Resume a stopped or errored project.
    Continue,
    /// Return the project to IDLE from any state.
    Reset,
    /// Change per-project execution settings.
    #[serde(rename_all = "camelCase")]
    Configure {
        #[serde(default)]
        auto_stop_threshold: Option<RiskLevel>,
        #[serde(default)]
        rate_limit: Option<u32>,
    },
    /// Read the current execution state.
    GetState,
}

impl Command {
    /// The state-machine event this command drives, if any.
    pub fn to_machine_event(&self) -> Option<MachineEvent> {
        match self {
            Command::Stop { reason } => Some(MachineEvent::StopCmd {
                reason: reason.clone(),
            }),
            Command::Continue => Some(MachineEvent::ContinueCmd),
            Command::Reset => Some(MachineEvent::ResetCmd),
            Command::Configure {
                auto_stop_threshold,
                rate_limit,
            } => Some(MachineEvent::Configure {
                auto_stop_threshold: *auto_stop_threshold,
                rate_limit: *rate_limit,
            }),
            Command::GetState => None,
        }
    }
}

/// Response to a command.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandResponse {
    /// Whether the command succeeded.
    pub ok: bool,
    /// Human-readable message.
    pub message: String,
    /// Optional structured data (depends on the command).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl CommandResponse {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            ok: true,
            message: message.into(),
            data: None,
        }
    }

    pub fn ok_with_data(message: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            ok: true,
            message: message.into(),
            data: Some(data),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            ok: false,
            message: message.into(),
            data: None,
        }
    }
}
