//! Core types shared across all Vigil crates.
//!
//! Defines action events, risk levels, protection zones, verdicts,
//! execution-status records, configuration, and the shared error type used
//! by the risk engine, the ledger, and the control plane.

pub mod config;
pub mod config_loader;
pub mod error;
pub mod event;
pub mod execution;
pub mod ids;
pub mod verdict;
pub mod zone;

pub use config::{
    AuthConfig, DistributionConfig, ExecutionConfig, IngestConfig, RiskConfig, ServerConfig,
    VigilConfig, CONFIG_FILENAME, LEDGER_FILENAME,
};
pub use error::VigilError;
pub use event::{ActionEvent, FileOperation, RiskLevel};
pub use execution::{ExecutionStatus, StateTransition};
pub use ids::{ClientId, ProjectId};
pub use verdict::{RiskVerdict, RuleResult};
pub use zone::{ProtectionZone, ZoneLevel};
