//! Append-only persistence for the Vigil control plane.
//!
//! Stores the immutable action-event ledger, the state-transition history,
//! the current execution state of each project, protection zones, and the
//! connection-session log in one SQLite database. Events and transitions are
//! guarded by triggers that refuse any `UPDATE` or `DELETE`.

pub mod batch;
pub mod chain;
pub mod events;
pub mod execution;
pub mod integrity;
mod parse_helpers;
pub mod session;
pub mod store;
pub mod zones;

pub use chain::{chain_hash, ChainLink};
pub use events::RecordedEvent;
pub use execution::StateRecord;
pub use integrity::{ChainMismatch, IntegrityReport};
pub use session::ConnectionSession;
pub use store::LedgerStore;
