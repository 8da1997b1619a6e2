//! LedgerStore: the SQLite persistence contract for the control plane.
use std::path::Path;

use rusqlite::Connection;
use tracing::info;

use vigil_types::VigilError;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS action_events (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    event_id TEXT NOT NULL UNIQUE,
    project_id TEXT NOT NULL,
    sequence_number INTEGER NOT NULL,
    operation TEXT NOT NULL,
    file_path TEXT NOT NULL,
    risk_level TEXT NOT NULL,
    content_hash TEXT NOT NULL,
    parent_event_hash TEXT,
    timestamp TEXT NOT NULL,
    recorded_at TEXT NOT NULL,
    payload TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_events_project ON action_events(project_id, id);
CREATE INDEX IF NOT EXISTS idx_events_sequence ON action_events(project_id, sequence_number);

CREATE TRIGGER IF NOT EXISTS action_events_no_update
BEFORE UPDATE ON action_events
BEGIN
    SELECT RAISE(ABORT, 'action_events is append-only');
END;
CREATE TRIGGER IF NOT EXISTS action_events_no_delete
BEFORE DELETE ON action_events
BEGIN
    SELECT RAISE(ABORT, 'action_events is append-only');
END;

CREATE TABLE IF NOT EXISTS state_transitions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    transition_id TEXT NOT NULL UNIQUE,
    project_id TEXT NOT NULL,
    from_state TEXT NOT NULL,
    to_state TEXT NOT NULL,
    trigger_event TEXT NOT NULL,
    triggered_by TEXT NOT NULL,
    snapshot_id TEXT,
    timestamp TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_transitions_project ON state_transitions(project_id, id);

CREATE TRIGGER IF NOT EXISTS state_transitions_no_update
BEFORE UPDATE ON state_transitions
BEGIN
    SELECT RAISE(ABORT, 'state_transitions is append-only');
END;
CREATE TRIGGER IF NOT EXISTS state_transitions_no_delete
BEFORE DELETE ON state_transitions
BEGIN
    SELECT RAISE(ABORT, 'state_transitions is append-only');
END;

CREATE TABLE IF NOT EXISTS execution_states (
    project_id TEXT PRIMARY KEY,
    state TEXT NOT NULL,
    context TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS protection_zones (
    zone_id TEXT PRIMARY KEY,
    project_id TEXT NOT NULL,
    path_pattern TEXT NOT NULL,
    level TEXT NOT NULL,
    allowed_operations TEXT,
    reason TEXT,
    is_system INTEGER NOT NULL DEFAULT 0,
    created_by TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    UNIQUE(project_id, path_pattern)
);

CREATE TABLE IF NOT EXISTS connection_sessions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    client_id TEXT NOT NULL,
    client_type TEXT NOT NULL,
    project_id TEXT NOT NULL,
    connected_at TEXT NOT NULL,
    disconnected_at TEXT,
    close_reason TEXT
);
CREATE INDEX IF NOT EXISTS idx_sessions_client ON connection_sessions(client_id);
";

/// Append-only event ledger, transition history, current execution states,
/// protection zones, and the connection-session log, in one SQLite file.
///
/// Immutability of events and transitions is enforced by triggers, so even a
/// raw `UPDATE` or `DELETE` against the database is refused.
pub struct LedgerStore {
    pub(crate) conn: Connection,
}

pub(crate) fn ledger_err(context: &str, e: impl std::fmt::Display) -> VigilError {
    VigilError::LedgerError(format!("{context}: {e}"))
}

impl LedgerStore {
    /// Open (or create) the ledger at `path` in WAL mode.
    pub fn open(path: &Path) -> Result<Self, VigilError> {
        let conn = Connection::open(path).map_err(|e| ledger_err("failed to open database", e))?;
        conn.pragma_update(None, "journal_mode", "WAL")
            .map_err(|e| ledger_err("failed to set WAL mode", e))?;
        let store = Self::init(conn)?;
        info!(path = %path.display(), "ledger opened");
        Ok(store)
    }

    /// A private in-memory ledger, for tests and dry runs.
    pub fn open_in_memory() -> Result<Self, VigilError> {
        let conn =
            Connection::open_in_memory().map_err(|e| ledger_err("failed to open database", e))?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self, VigilError> {
        conn.execute_batch(SCHEMA)
            .map_err(|e| ledger_err("failed to create schema", e))?;
        Ok(Self { conn })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_creates_schema_on_disk() {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        let store = LedgerStore::open(tmp.path()).unwrap();
        let tables: i64 = store
            .conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name IN
                 ('action_events', 'state_transitions', 'execution_states',
                  'protection_zones', 'connection_sessions')",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(tables, 5);
    }

    #[test]
    fn reopen_is_idempotent() {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        drop(LedgerStore::open(tmp.path()).unwrap());
        assert!(LedgerStore::open(tmp.path()).is_ok());
    }
}
