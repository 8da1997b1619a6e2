//! Error types shared across all Vigil crates.

/// Errors that can occur across the Vigil control plane.
///
/// Each variant corresponds to a different subsystem: configuration, the
/// ledger, payload validation, the wire protocol, credentials, the execution
/// state machine, or risk classification.
#[derive(Debug, thiserror::Error)]
pub enum VigilError {
    #[error("configuration error: {0}")]
    ConfigError(String),

    #[error("ledger error: {0}")]
    LedgerError(String),

    #[error("validation failed: {0}")]
    ValidationError(String),

    #[error("protocol error: {0}")]
    ProtocolError(String),

    #[error("authentication failed: {0}")]
    AuthError(String),

    #[error("execution state error: {0}")]
    StateError(String),

    #[error("risk classification failed: {0}")]
    PolicyError(String),
}

impl VigilError {
    /// Whether this error came from persistence (ledger or state storage).
    ///
    /// Persistence errors on the event path are surfaced to the producer as
    /// a failed acknowledgment rather than swallowed.
    pub fn is_persistence(&self) -> bool {
        matches!(self, VigilError::LedgerError(_))
    }
}
