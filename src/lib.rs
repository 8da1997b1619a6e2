//! Vigil: real-time oversight and veto for autonomous coding agents.
//!
//! This facade re-exports the workspace crates:
//! - [`types`]: shared data model, configuration, and errors
//! - [`policy`]: the risk classification engine
//! - [`ledger`]: SQLite persistence (append-only event ledger, state history)
//! - [`control`]: state machine, ingestion guard, distribution, servers

pub use vigil_control as control;
pub use vigil_ledger as ledger;
pub use vigil_policy as policy;
pub use vigil_types as types;
