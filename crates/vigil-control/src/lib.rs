//! Vigil control plane runtime.
//!
//! - [`machine`]: the per-project execution state machine
//! - [`guard`]: per-connection dedup, sequencing and rate limiting
//! - [`registry`]: connection registry, role-scoped broadcast, eviction
//! - [`project`]: one actor per project linearizing classification and
//!   transitions
//! - [`plane`]: the [`ControlPlane`] handle tying them together
//! - [`server`]: WebSocket and REST endpoints

pub mod auth;
pub mod command;
pub mod guard;
pub mod machine;
pub mod pause;
pub mod plane;
pub mod project;
pub mod protocol;
pub mod registry;
pub mod server;

pub use auth::{Authenticator, SessionClaims, SessionSigner};
pub use command::{Command, CommandResponse};
pub use guard::{Admission, IngestionGuard};
pub use machine::{transition, Effect, ExecutionContext, ExecutionState, MachineEvent, Outcome};
pub use pause::{PauseGate, Pushed};
pub use plane::{ControlPlane, Session};
pub use project::{Ingested, ProjectHandle, SharedLedger};
pub use protocol::{ClientMessage, ClientRole, CloseReason, Envelope, Registration};
pub use registry::{Audience, ConnectionInfo, ConnectionRegistry};
