//! Wire protocol for the persistent duplex connection.
//!
//! Every frame is a JSON [`Envelope`]: `{type, payload, correlationId?,
//! timestamp}`. Inbound frames are decoded into [`ClientMessage`] after
//! registration; outbound frames are built with the constructors on
//! [`Envelope`].

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use vigil_types::{
    ActionEvent, ClientId, ExecutionStatus, ProjectId, RiskLevel, RiskVerdict, VigilError,
};

use crate::command::Command;

/// The role a connection registers under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClientRole {
    Producer,
    Operator,
    Observer,
}

impl ClientRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClientRole::Producer => "producer",
            ClientRole::Operator => "operator",
            ClientRole::Observer => "observer",
        }
    }
}

impl fmt::Display for ClientRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One wire frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub payload: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
    /// Top-level fields other than the above. Registration frames carry
    /// their fields here rather than in `payload`.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Envelope {
    pub fn new(kind: &str, payload: impl Serialize) -> Self {
        Self {
            kind: kind.to_string(),
            payload: serde_json::to_value(payload).unwrap_or(Value::Null),
            correlation_id: None,
            timestamp: Utc::now(),
            extra: Map::new(),
        }
    }

    pub fn correlated(mut self, correlation_id: Option<String>) -> Self {
        self.correlation_id = correlation_id;
        self
    }

    /// Parse one inbound text frame.
    pub fn parse(text: &str) -> Result<Self, VigilError> {
        serde_json::from_str(text)
            .map_err(|e| VigilError::ProtocolError(format!("malformed message: {e}")))
    }

    pub fn to_text(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }

    pub fn ack(ack: Ack, correlation_id: Option<String>) -> Self {
        Self::new(types::ACK, ack).correlated(correlation_id)
    }

    pub fn error(
        message: impl Into<String>,
        details: Option<String>,
        correlation_id: Option<String>,
    ) -> Self {
        Self::new(
            types::ERROR,
            ErrorPayload {
                message: message.into(),
                details,
            },
        )
        .correlated(correlation_id)
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self::new(
            types::WARNING,
            WarningPayload {
                message: message.into(),
            },
        )
    }

    /// `EVENT_BROADCAST`: the enriched event plus its `ledgerPosition`,
    /// which clients declare as `lastSequenceNumber` when they reconnect.
    pub fn event_broadcast(event: &ActionEvent, ledger_position: u64) -> Self {
        Self::new(
            types::EVENT_BROADCAST,
            EventBroadcast {
                ledger_position,
                event,
            },
        )
    }

    pub fn risk_alert(event: &ActionEvent, verdict: &RiskVerdict) -> Self {
        Self::new(
            types::RISK_ALERT,
            RiskAlert {
                event_id: event.id,
                project_id: event.project_id.clone(),
                file_path: event.file_path.clone(),
                verdict: verdict.clone(),
            },
        )
    }

    pub fn state_change(change: &StateChange) -> Self {
        Self::new(types::STATE_CHANGE, change)
    }
}

/// Frame type names.
pub mod types {
    pub const REGISTER: &str = "REGISTER";
    pub const REGISTERED: &str = "REGISTERED";
    pub const ACTION_EVENT: &str = "ACTION_EVENT";
    pub const ACTION_COMPLETE: &str = "ACTION_COMPLETE";
    pub const ALL_ACTIONS_COMPLETE: &str = "ALL_ACTIONS_COMPLETE";
    pub const AGENT_SIGNAL: &str = "AGENT_SIGNAL";
    pub const AGENT_OUTPUT: &str = "AGENT_OUTPUT";
    pub const AGENT_STATUS: &str = "AGENT_STATUS";
    pub const STOP_CMD: &str = "STOP_CMD";
    pub const CONTINUE_CMD: &str = "CONTINUE_CMD";
    pub const RESET_CMD: &str = "RESET_CMD";
    pub const CONFIGURE: &str = "CONFIGURE";
    pub const GET_STATE: &str = "GET_STATE";
    pub const ACK: &str = "ACK";
    pub const ERROR: &str = "ERROR";
    pub const WARNING: &str = "WARNING";
    pub const EVENT_BROADCAST: &str = "EVENT_BROADCAST";
    pub const RISK_ALERT: &str = "RISK_ALERT";
    pub const STATE_CHANGE: &str = "STATE_CHANGE";
    pub const STATE_SNAPSHOT: &str = "STATE_SNAPSHOT";
}

/// The registration handshake, which must be the first frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Registration {
    pub client_type: ClientRole,
    pub client_id: ClientId,
    pub project_id: ProjectId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_token: Option<String>,
    /// `ledgerPosition` of the last broadcast event the client fully
    /// processed; replay resumes after it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_sequence_number: Option<u64>,
}

impl Registration {
    /// Decode a `REGISTER` frame. Fields may sit at the top level of the
    /// envelope or inside `payload`.
    pub fn from_envelope(envelope: &Envelope) -> Result<Self, VigilError> {
        if envelope.kind != types::REGISTER {
            return Err(VigilError::ProtocolError(format!(
                "expected {} as the first message, got {}",
                types::REGISTER,
                envelope.kind
            )));
        }
        let fields = match &envelope.payload {
            Value::Object(map) if !map.is_empty() => Value::Object(map.clone()),
            _ => Value::Object(envelope.extra.clone()),
        };
        let registration: Registration = serde_json::from_value(fields)
            .map_err(|e| VigilError::ProtocolError(format!("invalid registration: {e}")))?;
        if registration.client_id.is_blank() || registration.project_id.is_blank() {
            return Err(VigilError::ProtocolError(
                "invalid registration: clientId and projectId must not be empty".into(),
            ));
        }
        Ok(registration)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AgentSignalKind {
    Spawned,
    Completed,
    Crashed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentSignal {
    pub signal: AgentSignalKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentOutput {
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentStatus {
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ActionCompletePayload {
    event_id: Uuid,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StopPayload {
    #[serde(default)]
    reason: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConfigurePayload {
    #[serde(default)]
    auto_stop_threshold: Option<RiskLevel>,
    #[serde(default)]
    rate_limit: Option<u32>,
}

/// A decoded post-registration frame.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientMessage {
    ActionEvent(Box<ActionEvent>),
    ActionComplete { event_id: Uuid },
    AllActionsComplete,
    AgentSignal(AgentSignal),
    AgentOutput(AgentOutput),
    AgentStatus(AgentStatus),
    Command(Command),
    /// A second `REGISTER` on an already registered connection.
    Register,
}

fn decode<T: serde::de::DeserializeOwned>(kind: &str, payload: &Value) -> Result<T, VigilError> {
    let payload = if payload.is_null() {
        Value::Object(Map::new())
    } else {
        payload.clone()
    };
    serde_json::from_value(payload)
        .map_err(|e| VigilError::ValidationError(format!("invalid {kind} payload: {e}")))
}

impl ClientMessage {
    pub fn from_envelope(envelope: &Envelope) -> Result<Self, VigilError> {
        let kind = envelope.kind.as_str();
        let payload = &envelope.payload;
        let message = match kind {
            types::ACTION_EVENT => ClientMessage::ActionEvent(Box::new(decode(kind, payload)?)),
            types::ACTION_COMPLETE => {
                let p: ActionCompletePayload = decode(kind, payload)?;
                ClientMessage::ActionComplete {
                    event_id: p.event_id,
                }
            }
            types::ALL_ACTIONS_COMPLETE => ClientMessage::AllActionsComplete,
            types::AGENT_SIGNAL => ClientMessage::AgentSignal(decode(kind, payload)?),
            types::AGENT_OUTPUT => ClientMessage::AgentOutput(decode(kind, payload)?),
            types::AGENT_STATUS => ClientMessage::AgentStatus(decode(kind, payload)?),
            types::STOP_CMD => {
                let p: StopPayload = decode(kind, payload)?;
                ClientMessage::Command(Command::Stop {
                    reason: p.reason.unwrap_or_else(|| "operator stop".to_string()),
                })
            }
            types::CONTINUE_CMD => ClientMessage::Command(Command::Continue),
            types::RESET_CMD => ClientMessage::Command(Command::Reset),
            types::GET_STATE => ClientMessage::Command(Command::GetState),
            types::CONFIGURE => {
                let p: ConfigurePayload = decode(kind, payload)?;
                ClientMessage::Command(Command::Configure {
                    auto_stop_threshold: p.auto_stop_threshold,
                    rate_limit: p.rate_limit,
                })
            }
            types::REGISTER => ClientMessage::Register,
            other => {
                return Err(VigilError::ProtocolError(format!(
                    "unknown message type {other:?}"
                )))
            }
        };
        Ok(message)
    }

    /// Whether a connection registered as `role` may send this message.
    /// Anything else is a trust-boundary violation and is dropped unanswered.
    pub fn allowed_for(&self, role: ClientRole) -> bool {
        match self {
            ClientMessage::ActionEvent(_)
            | ClientMessage::ActionComplete { .. }
            | ClientMessage::AllActionsComplete
            | ClientMessage::AgentSignal(_)
            | ClientMessage::AgentOutput(_)
            | ClientMessage::AgentStatus(_) => role == ClientRole::Producer,
            ClientMessage::Command(Command::GetState) => role != ClientRole::Producer,
            ClientMessage::Command(_) => role == ClientRole::Operator,
            ClientMessage::Register => true,
        }
    }
}

/// Payload of an `ACK` frame.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ack {
    pub event_id: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duplicate: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub out_of_order: Option<bool>,
    /// Lowest sequence number that would be accepted next.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected: Option<u64>,
}

impl Ack {
    pub fn accepted(event_id: Uuid) -> Self {
        Self {
            event_id,
            ..Default::default()
        }
    }

    pub fn duplicate(event_id: Uuid) -> Self {
        Self {
            event_id,
            duplicate: Some(true),
            ..Default::default()
        }
    }

    pub fn out_of_order(event_id: Uuid, expected: u64) -> Self {
        Self {
            event_id,
            out_of_order: Some(true),
            expected: Some(expected),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorPayload {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WarningPayload {
    pub message: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct EventBroadcast<'a> {
    ledger_position: u64,
    #[serde(flatten)]
    event: &'a ActionEvent,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RiskAlert {
    pub event_id: Uuid,
    pub project_id: ProjectId,
    pub file_path: String,
    pub verdict: RiskVerdict,
}

/// Payload of a `STATE_CHANGE` broadcast.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateChange {
    pub project_id: ProjectId,
    pub previous_state: ExecutionStatus,
    pub state: ExecutionStatus,
    pub trigger_event: String,
    pub triggered_by: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Payload of the `REGISTERED` reply that completes the handshake.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Registered {
    pub client_id: ClientId,
    pub project_id: ProjectId,
    pub client_type: ClientRole,
    pub replayed: usize,
}

/// Why the server closed a connection. Each has a stable close code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    RegistrationTimeout,
    InvalidRegistration,
    InvalidCredential,
    DisallowedOrigin,
    SlowClient,
    /// Another connection registered with the same client id.
    Superseded,
    ServerShutdown,
}

impl CloseReason {
    pub fn code(&self) -> u16 {
        match self {
            CloseReason::RegistrationTimeout => 4001,
            CloseReason::InvalidRegistration => 4002,
            CloseReason::InvalidCredential => 4003,
            CloseReason::DisallowedOrigin => 4004,
            CloseReason::SlowClient => 4008,
            CloseReason::Superseded => 4009,
            CloseReason::ServerShutdown => 1001,
        }
    }

    pub fn reason(&self) -> &'static str {
        match self {
            CloseReason::RegistrationTimeout => "registration timeout",
            CloseReason::InvalidRegistration => "invalid registration",
            CloseReason::InvalidCredential => "invalid credential",
            CloseReason::DisallowedOrigin => "origin not allowed",
            CloseReason::SlowClient => "slow client evicted",
            CloseReason::Superseded => "superseded by a newer connection",
            CloseReason::ServerShutdown => "server shutting down",
        }
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.reason(), self.code())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn registration_fields_at_top_level() {
        let env = Envelope::parse(
            r#"{"type":"REGISTER","clientType":"producer","clientId":"w1",
                "projectId":"p","authToken":"s3cret","lastSequenceNumber":7}"#,
        )
        .unwrap();
        let reg = Registration::from_envelope(&env).unwrap();
        assert_eq!(reg.client_type, ClientRole::Producer);
        assert_eq!(reg.client_id, "w1");
        assert_eq!(reg.last_sequence_number, Some(7));
    }

    #[test]
    fn registration_fields_in_payload() {
        let env = Envelope::parse(
            r#"{"type":"REGISTER","payload":{"clientType":"observer","clientId":"o","projectId":"p"}}"#,
        )
        .unwrap();
        let reg = Registration::from_envelope(&env).unwrap();
        assert_eq!(reg.client_type, ClientRole::Observer);
        assert!(reg.auth_token.is_none());
    }

    #[test]
    fn bad_registration_is_rejected() {
        let not_register = Envelope::parse(r#"{"type":"GET_STATE"}"#).unwrap();
        assert!(Registration::from_envelope(&not_register).is_err());

        let bad_role = Envelope::parse(
            r#"{"type":"REGISTER","clientType":"admin","clientId":"x","projectId":"p"}"#,
        )
        .unwrap();
        assert!(Registration::from_envelope(&bad_role).is_err());

        let blank = Envelope::parse(
            r#"{"type":"REGISTER","clientType":"producer","clientId":" ","projectId":"p"}"#,
        )
        .unwrap();
        assert!(Registration::from_envelope(&blank).is_err());
    }

    #[test]
    fn commands_decode() {
        let stop = Envelope::parse(r#"{"type":"STOP_CMD","payload":{"reason":"pause"}}"#).unwrap();
        assert_eq!(
            ClientMessage::from_envelope(&stop).unwrap(),
            ClientMessage::Command(Command::Stop {
                reason: "pause".into()
            })
        );
        let cont = Envelope::parse(r#"{"type":"CONTINUE_CMD","payload":{}}"#).unwrap();
        assert_eq!(
            ClientMessage::from_envelope(&cont).unwrap(),
            ClientMessage::Command(Command::Continue)
        );
        let configure =
            Envelope::parse(r#"{"type":"CONFIGURE","payload":{"autoStopThreshold":"CRITICAL"}}"#)
                .unwrap();
        assert_eq!(
            ClientMessage::from_envelope(&configure).unwrap(),
            ClientMessage::Command(Command::Configure {
                auto_stop_threshold: Some(RiskLevel::Critical),
                rate_limit: None
            })
        );
    }

    #[test]
    fn unknown_type_is_protocol_error() {
        let env = Envelope::parse(r#"{"type":"LAUNCH_MISSILES"}"#).unwrap();
        assert!(matches!(
            ClientMessage::from_envelope(&env),
            Err(VigilError::ProtocolError(_))
        ));
    }

    #[test]
    fn invalid_event_payload_is_validation_error() {
        let env = Envelope::parse(r#"{"type":"ACTION_EVENT","payload":{"filePath":"a"}}"#).unwrap();
        assert!(matches!(
            ClientMessage::from_envelope(&env),
            Err(VigilError::ValidationError(_))
        ));
    }

    #[test]
    fn role_scoping() {
        let event = ClientMessage::AllActionsComplete;
        assert!(event.allowed_for(ClientRole::Producer));
        assert!(!event.allowed_for(ClientRole::Operator));

        let stop = ClientMessage::Command(Command::Reset);
        assert!(stop.allowed_for(ClientRole::Operator));
        assert!(!stop.allowed_for(ClientRole::Observer));
        assert!(!stop.allowed_for(ClientRole::Producer));

        let get = ClientMessage::Command(Command::GetState);
        assert!(get.allowed_for(ClientRole::Observer));
        assert!(!get.allowed_for(ClientRole::Producer));
    }

    #[test]
    fn outbound_frames_serialize() {
        let ack = Envelope::ack(Ack::out_of_order(Uuid::nil(), 5), Some("c-1".into()));
        let v: Value = serde_json::from_str(&ack.to_text()).unwrap();
        assert_eq!(v["type"], "ACK");
        assert_eq!(v["correlationId"], "c-1");
        assert_eq!(v["payload"]["outOfOrder"], true);
        assert_eq!(v["payload"]["expected"], 5);
        assert!(v["payload"].get("duplicate").is_none());

        let err = Envelope::error("bad", Some("detail".into()), None);
        let v: Value = serde_json::from_str(&err.to_text()).unwrap();
        assert_eq!(v["payload"], json!({"message": "bad", "details": "detail"}));
        assert!(v.get("correlationId").is_none());
    }

    #[test]
    fn event_broadcast_carries_ledger_position() {
        let event = ActionEvent::new("p", 3, vigil_types::FileOperation::FileModify, "a.rs")
            .with_content_hash("h");
        let v: Value =
            serde_json::from_str(&Envelope::event_broadcast(&event, 42).to_text()).unwrap();
        assert_eq!(v["type"], "EVENT_BROADCAST");
        assert_eq!(v["payload"]["ledgerPosition"], 42);
        assert_eq!(v["payload"]["sequenceNumber"], 3);
        assert_eq!(v["payload"]["filePath"], "a.rs");
    }

    #[test]
    fn close_codes_are_distinct() {
        let reasons = [
            CloseReason::RegistrationTimeout,
            CloseReason::InvalidRegistration,
            CloseReason::InvalidCredential,
            CloseReason::DisallowedOrigin,
            CloseReason::SlowClient,
            CloseReason::Superseded,
            CloseReason::ServerShutdown,
        ];
        let mut codes: Vec<u16> = reasons.iter().map(|r| r.code()).collect();
        codes.sort_unstable();
        codes.dedup();
        assert_eq!(codes.len(), reasons.len());
        assert_eq!(CloseReason::SlowClient.code(), 4008);
    }
}
