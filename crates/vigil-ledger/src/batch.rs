//! Multi-table writes that must land together or not at all.
//!
//! An accepted event, the execution state it produced, and the history rows
//! for any transitions are committed in one SQLite transaction. A failure
//! anywhere rolls all of them back, so the event ledger never records an
//! event the state machine has not counted.

use vigil_types::{ActionEvent, StateTransition, VigilError};

use crate::execution::StateRecord;
use crate::store::{ledger_err, LedgerStore};

impl LedgerStore {
    /// Persist one ingested event with its resulting state and transitions.
    /// Returns the event's ledger position.
    pub fn record_ingest(
        &self,
        event: &ActionEvent,
        state: Option<&StateRecord>,
        transitions: &[&StateTransition],
    ) -> Result<u64, VigilError> {
        let tx = self
            .conn
            .unchecked_transaction()
            .map_err(|e| ledger_err("failed to begin transaction", e))?;
        let position = self.append_event(event)?;
        if let Some(record) = state {
            self.save_state(record)?;
        }
        for transition in transitions {
            self.append_transition(transition)?;
        }
        tx.commit()
            .map_err(|e| ledger_err("failed to commit ingest", e))?;
        Ok(position)
    }

    /// Persist a state change that no event caused (commands, agent signals).
    pub fn record_state(
        &self,
        state: &StateRecord,
        transition: Option<&StateTransition>,
    ) -> Result<(), VigilError> {
        let tx = self
            .conn
            .unchecked_transaction()
            .map_err(|e| ledger_err("failed to begin transaction", e))?;
        self.save_state(state)?;
        if let Some(transition) = transition {
            self.append_transition(transition)?;
        }
        tx.commit()
            .map_err(|e| ledger_err("failed to commit state", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;
    use vigil_types::{ExecutionStatus, FileOperation, ProjectId};

    fn record(state: ExecutionStatus) -> StateRecord {
        StateRecord {
            project_id: ProjectId::new("p"),
            state,
            context: "{}".into(),
            updated_at: Utc::now(),
        }
    }

    fn transition(from: ExecutionStatus, to: ExecutionStatus) -> StateTransition {
        StateTransition {
            id: Uuid::new_v4(),
            project_id: ProjectId::new("p"),
            from_state: from,
            to_state: to,
            trigger_event: "ACTION_EVENT".into(),
            triggered_by: "producer:w".into(),
            snapshot_id: None,
            timestamp: Utc::now(),
        }
    }

    fn fail_state_writes(store: &LedgerStore) {
        store
            .conn
            .execute_batch(
                "CREATE TRIGGER fail_state BEFORE INSERT ON execution_states
                 BEGIN SELECT RAISE(ABORT, 'disk full'); END;",
            )
            .unwrap();
    }

    #[test]
    fn ingest_commits_event_state_and_history_together() {
        let store = LedgerStore::open_in_memory().unwrap();
        let event = ActionEvent::new("p", 1, FileOperation::FileModify, "a.rs").with_content_hash("h");
        let t = transition(ExecutionStatus::Idle, ExecutionStatus::Running);
        let position = store
            .record_ingest(&event, Some(&record(ExecutionStatus::Running)), &[&t])
            .unwrap();

        assert!(position > 0);
        assert!(store.contains_event(&event.id).unwrap());
        let state = store.load_state(&ProjectId::new("p")).unwrap().unwrap();
        assert_eq!(state.state, ExecutionStatus::Running);
        assert_eq!(store.list_transitions(&ProjectId::new("p"), None).unwrap().len(), 1);
    }

    #[test]
    fn failed_state_write_rolls_back_the_event() {
        let store = LedgerStore::open_in_memory().unwrap();
        fail_state_writes(&store);
        let event = ActionEvent::new("p", 1, FileOperation::FileModify, "a.rs").with_content_hash("h");
        let t = transition(ExecutionStatus::Idle, ExecutionStatus::Running);

        let err = store
            .record_ingest(&event, Some(&record(ExecutionStatus::Running)), &[&t])
            .unwrap_err();
        assert!(err.to_string().contains("disk full"));
        assert!(!store.contains_event(&event.id).unwrap());
        assert!(store.list_transitions(&ProjectId::new("p"), None).unwrap().is_empty());

        // the same event goes through once the store recovers
        store.conn.execute_batch("DROP TRIGGER fail_state").unwrap();
        store
            .record_ingest(&event, Some(&record(ExecutionStatus::Running)), &[&t])
            .unwrap();
        assert_eq!(store.count_events(&ProjectId::new("p")).unwrap(), 1);
    }

    #[test]
    fn failed_state_write_drops_the_transition() {
        let store = LedgerStore::open_in_memory().unwrap();
        fail_state_writes(&store);
        let t = transition(ExecutionStatus::Running, ExecutionStatus::Stopped);
        assert!(store
            .record_state(&record(ExecutionStatus::Stopped), Some(&t))
            .is_err());
        assert!(store.list_transitions(&ProjectId::new("p"), None).unwrap().is_empty());
    }
}
