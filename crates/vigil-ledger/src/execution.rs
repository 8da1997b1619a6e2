//! Current execution states (keyed by project) and the append-only
//! transition history.

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};

use vigil_types::{ExecutionStatus, ProjectId, StateTransition, VigilError};

use crate::parse_helpers::{parse_datetime, parse_enum, parse_uuid};
use crate::store::{ledger_err, LedgerStore};

/// One row of the keyed execution-state table.
///
/// `context` is the opaque JSON serialization owned by the state machine.
#[derive(Debug, Clone, PartialEq)]
pub struct StateRecord {
    pub project_id: ProjectId,
    pub state: ExecutionStatus,
    pub context: String,
    pub updated_at: DateTime<Utc>,
}

impl LedgerStore {
    /// Insert or replace the current state of a project.
    pub fn save_state(&self, record: &StateRecord) -> Result<(), VigilError> {
        self.conn
            .execute(
                "INSERT INTO execution_states (project_id, state, context, updated_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(project_id) DO UPDATE SET
                    state = excluded.state,
                    context = excluded.context,
                    updated_at = excluded.updated_at",
                params![
                    record.project_id.as_str(),
                    record.state.as_str(),
                    record.context,
                    record.updated_at.to_rfc3339(),
                ],
            )
            .map_err(|e| ledger_err("failed to save execution state", e))?;
        Ok(())
    }

    pub fn load_state(&self, project: &ProjectId) -> Result<Option<StateRecord>, VigilError> {
        self.conn
            .query_row(
                "SELECT project_id, state, context, updated_at
                 FROM execution_states WHERE project_id = ?1",
                params![project.as_str()],
                row_to_state,
            )
            .optional()
            .map_err(|e| ledger_err("failed to load execution state", e))
    }

    pub fn list_states(&self) -> Result<Vec<StateRecord>, VigilError> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT project_id, state, context, updated_at
                 FROM execution_states ORDER BY project_id",
            )
            .map_err(|e| ledger_err("failed to prepare query", e))?;
        let rows = stmt
            .query_map([], row_to_state)
            .map_err(|e| ledger_err("failed to list execution states", e))?;
        rows.collect::<Result<Vec<_>, _>>()
            .map_err(|e| ledger_err("failed to read execution state", e))
    }

    pub fn append_transition(&self, t: &StateTransition) -> Result<(), VigilError> {
        self.conn
            .execute(
                "INSERT INTO state_transitions (transition_id, project_id, from_state, to_state,
                    trigger_event, triggered_by, snapshot_id, timestamp)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    t.id.to_string(),
                    t.project_id.as_str(),
                    t.from_state.as_str(),
                    t.to_state.as_str(),
                    t.trigger_event,
                    t.triggered_by,
                    t.snapshot_id,
                    t.timestamp.to_rfc3339(),
                ],
            )
            .map_err(|e| ledger_err("failed to append transition", e))?;
        Ok(())
    }

    /// Transition history of a project, oldest first. With `last`, only the
    /// most recent `last` rows are returned (still oldest first).
    pub fn list_transitions(
        &self,
        project: &ProjectId,
        last: Option<usize>,
    ) -> Result<Vec<StateTransition>, VigilError> {
        let limit = last.map_or(-1, |n| i64::try_from(n).unwrap_or(i64::MAX));
        let mut stmt = self
            .conn
            .prepare(
                "SELECT transition_id, project_id, from_state, to_state, trigger_event,
                        triggered_by, snapshot_id, timestamp
                 FROM (SELECT * FROM state_transitions WHERE project_id = ?1
                       ORDER BY id DESC LIMIT ?2)
                 ORDER BY id ASC",
            )
            .map_err(|e| ledger_err("failed to prepare query", e))?;
        let rows = stmt
            .query_map(params![project.as_str(), limit], |row| {
                Ok(StateTransition {
                    id: parse_uuid(&row.get::<_, String>(0)?, 0)?,
                    project_id: ProjectId::new(row.get::<_, String>(1)?),
                    from_state: parse_enum(&row.get::<_, String>(2)?, 2)?,
                    to_state: parse_enum(&row.get::<_, String>(3)?, 3)?,
                    trigger_event: row.get(4)?,
                    triggered_by: row.get(5)?,
                    snapshot_id: row.get(6)?,
                    timestamp: parse_datetime(&row.get::<_, String>(7)?, 7)?,
                })
            })
            .map_err(|e| ledger_err("failed to query transitions", e))?;
        rows.collect::<Result<Vec<_>, _>>()
            .map_err(|e| ledger_err("failed to read transition", e))
    }
}

fn row_to_state(row: &rusqlite::Row<'_>) -> rusqlite::Result<StateRecord> {
    Ok(StateRecord {
        project_id: ProjectId::new(row.get::<_, String>(0)?),
        state: parse_enum(&row.get::<_, String>(1)?, 1)?,
        context: row.get(2)?,
        updated_at: parse_datetime(&row.get::<_, String>(3)?, 3)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn transition(project: &str, from: ExecutionStatus, to: ExecutionStatus) -> StateTransition {
        StateTransition {
            id: Uuid::new_v4(),
            project_id: project.into(),
            from_state: from,
            to_state: to,
            trigger_event: "ACTION_EVENT".into(),
            triggered_by: "producer-1".into(),
            snapshot_id: Some("snap-1".into()),
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn save_state_upserts() {
        let store = LedgerStore::open_in_memory().unwrap();
        let mut record = StateRecord {
            project_id: "p".into(),
            state: ExecutionStatus::Running,
            context: "{\"pendingActions\":1}".into(),
            updated_at: Utc::now(),
        };
        store.save_state(&record).unwrap();
        record.state = ExecutionStatus::Stopped;
        store.save_state(&record).unwrap();

        let loaded = store.load_state(&"p".into()).unwrap().unwrap();
        assert_eq!(loaded.state, ExecutionStatus::Stopped);
        assert_eq!(store.list_states().unwrap().len(), 1);
        assert!(store.load_state(&"missing".into()).unwrap().is_none());
    }

    #[test]
    fn transitions_are_listed_oldest_first_with_limit() {
        use ExecutionStatus::*;
        let store = LedgerStore::open_in_memory().unwrap();
        store.append_transition(&transition("p", Idle, Running)).unwrap();
        store.append_transition(&transition("p", Running, Stopped)).unwrap();
        store.append_transition(&transition("q", Idle, Running)).unwrap();
        store.append_transition(&transition("p", Stopped, Resuming)).unwrap();

        let all = store.list_transitions(&"p".into(), None).unwrap();
        let to: Vec<ExecutionStatus> = all.iter().map(|t| t.to_state).collect();
        assert_eq!(to, vec![Running, Stopped, Resuming]);
        assert_eq!(all[0].snapshot_id.as_deref(), Some("snap-1"));

        let last_two = store.list_transitions(&"p".into(), Some(2)).unwrap();
        let to: Vec<ExecutionStatus> = last_two.iter().map(|t| t.to_state).collect();
        assert_eq!(to, vec![Stopped, Resuming]);
    }

    #[test]
    fn transitions_are_append_only() {
        let store = LedgerStore::open_in_memory().unwrap();
        store
            .append_transition(&transition("p", ExecutionStatus::Idle, ExecutionStatus::Running))
            .unwrap();
        assert!(store
            .conn
            .execute("UPDATE state_transitions SET to_state = 'IDLE'", [])
            .is_err());
        assert!(store.conn.execute("DELETE FROM state_transitions", []).is_err());
    }
}
