//! The immutable action-event ledger.

use chrono::Utc;
use rusqlite::{params, OptionalExtension};
use serde::Serialize;
use uuid::Uuid;

use vigil_types::{ActionEvent, ProjectId, VigilError};

use crate::chain::ChainLink;
use crate::parse_helpers::parse_json;
use crate::store::{ledger_err, LedgerStore};

/// An event with its ledger position.
///
/// Positions grow with every append across the whole ledger, so unlike
/// producer sequence numbers they never restart when a producer reconnects.
/// Clients use them as their replay cursor.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordedEvent {
    #[serde(rename = "ledgerPosition")]
    pub position: u64,
    #[serde(flatten)]
    pub event: ActionEvent,
}

impl LedgerStore {
    /// Append an enriched event and return its ledger position. Fails if the
    /// id is already recorded.
    pub fn append_event(&self, event: &ActionEvent) -> Result<u64, VigilError> {
        let payload =
            serde_json::to_string(event).map_err(|e| ledger_err("failed to encode event", e))?;
        let sequence = i64::try_from(event.sequence_number)
            .map_err(|e| ledger_err("sequence number out of range", e))?;
        self.conn
            .execute(
                "INSERT INTO action_events (event_id, project_id, sequence_number, operation,
                    file_path, risk_level, content_hash, parent_event_hash, timestamp,
                    recorded_at, payload)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                params![
                    event.id.to_string(),
                    event.project_id.as_str(),
                    sequence,
                    event.operation.as_str(),
                    event.file_path,
                    event.risk_level.as_str(),
                    event.content_hash,
                    event.parent_event_hash,
                    event.timestamp.to_rfc3339(),
                    Utc::now().to_rfc3339(),
                    payload,
                ],
            )
            .map_err(|e| ledger_err("failed to insert event", e))?;
        Ok(self.conn.last_insert_rowid().max(0) as u64)
    }

    pub fn get_event(&self, id: &Uuid) -> Result<Option<ActionEvent>, VigilError> {
        self.conn
            .query_row(
                "SELECT payload FROM action_events WHERE event_id = ?1",
                params![id.to_string()],
                |row| parse_json(&row.get::<_, String>(0)?, 0),
            )
            .optional()
            .map_err(|e| ledger_err("failed to read event", e))
    }

    pub fn contains_event(&self, id: &Uuid) -> Result<bool, VigilError> {
        self.conn
            .query_row(
                "SELECT 1 FROM action_events WHERE event_id = ?1",
                params![id.to_string()],
                |_| Ok(()),
            )
            .optional()
            .map(|found| found.is_some())
            .map_err(|e| ledger_err("failed to read event", e))
    }

    /// Every event of `project` recorded after ledger position `after`, in
    /// ledger order.
    pub fn events_after(
        &self,
        project: &ProjectId,
        after: u64,
    ) -> Result<Vec<RecordedEvent>, VigilError> {
        let after = i64::try_from(after).unwrap_or(i64::MAX);
        let mut stmt = self
            .conn
            .prepare(
                "SELECT id, payload FROM action_events
                 WHERE project_id = ?1 AND id > ?2 ORDER BY id ASC",
            )
            .map_err(|e| ledger_err("failed to prepare query", e))?;
        let rows = stmt
            .query_map(params![project.as_str(), after], |row| {
                Ok(RecordedEvent {
                    position: row.get::<_, i64>(0)?.max(0) as u64,
                    event: parse_json(&row.get::<_, String>(1)?, 1)?,
                })
            })
            .map_err(|e| ledger_err("failed to query events", e))?;
        rows.collect::<Result<Vec<_>, _>>()
            .map_err(|e| ledger_err("failed to read event", e))
    }

    /// All events of `project` in ledger order.
    pub fn project_events(&self, project: &ProjectId) -> Result<Vec<ActionEvent>, VigilError> {
        self.query_events(
            "SELECT payload FROM action_events WHERE project_id = ?1 ORDER BY id ASC",
            params![project.as_str()],
        )
    }

    /// The most recently recorded event of `project`.
    pub fn latest_event(&self, project: &ProjectId) -> Result<Option<ActionEvent>, VigilError> {
        self.conn
            .query_row(
                "SELECT payload FROM action_events WHERE project_id = ?1 ORDER BY id DESC LIMIT 1",
                params![project.as_str()],
                |row| parse_json(&row.get::<_, String>(0)?, 0),
            )
            .optional()
            .map_err(|e| ledger_err("failed to read event", e))
    }

    /// Chain tip for `project`, used to seed the runtime hash-chain check.
    pub fn chain_tip(&self, project: &ProjectId) -> Result<Option<ChainLink>, VigilError> {
        Ok(self.latest_event(project)?.as_ref().map(ChainLink::from))
    }

    pub fn count_events(&self, project: &ProjectId) -> Result<u64, VigilError> {
        let n: i64 = self
            .conn
            .query_row(
                "SELECT COUNT(*) FROM action_events WHERE project_id = ?1",
                params![project.as_str()],
                |row| row.get(0),
            )
            .map_err(|e| ledger_err("failed to count events", e))?;
        Ok(n.max(0) as u64)
    }

    fn query_events(
        &self,
        sql: &str,
        params: impl rusqlite::Params,
    ) -> Result<Vec<ActionEvent>, VigilError> {
        let mut stmt = self
            .conn
            .prepare(sql)
            .map_err(|e| ledger_err("failed to prepare query", e))?;
        let rows = stmt
            .query_map(params, |row| parse_json(&row.get::<_, String>(0)?, 0))
            .map_err(|e| ledger_err("failed to query events", e))?;
        rows.collect::<Result<Vec<_>, _>>()
            .map_err(|e| ledger_err("failed to read event", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vigil_types::{FileOperation, RiskLevel};

    fn event(project: &str, seq: u64, path: &str) -> ActionEvent {
        ActionEvent::new(project, seq, FileOperation::FileModify, path).with_content_hash(format!("h{seq}"))
    }

    #[test]
    fn append_and_read_back() {
        let store = LedgerStore::open_in_memory().unwrap();
        let mut e = event("p", 1, "src/a.rs");
        e.risk_level = RiskLevel::Medium;
        e.risk_reasons = vec!["api".into()];
        store.append_event(&e).unwrap();

        assert!(store.contains_event(&e.id).unwrap());
        assert_eq!(store.get_event(&e.id).unwrap(), Some(e.clone()));
        assert_eq!(store.latest_event(&"p".into()).unwrap(), Some(e));
        assert!(store.get_event(&Uuid::new_v4()).unwrap().is_none());
    }

    #[test]
    fn duplicate_id_is_refused() {
        let store = LedgerStore::open_in_memory().unwrap();
        let e = event("p", 1, "a");
        store.append_event(&e).unwrap();
        assert!(matches!(store.append_event(&e), Err(VigilError::LedgerError(_))));
        assert_eq!(store.count_events(&"p".into()).unwrap(), 1);
    }

    #[test]
    fn events_cannot_be_updated_or_deleted() {
        let store = LedgerStore::open_in_memory().unwrap();
        let e = event("p", 1, "a");
        store.append_event(&e).unwrap();

        let update = store.conn.execute(
            "UPDATE action_events SET risk_level = 'NONE' WHERE event_id = ?1",
            params![e.id.to_string()],
        );
        assert!(update.unwrap_err().to_string().contains("append-only"));

        let delete = store.conn.execute("DELETE FROM action_events", []);
        assert!(delete.is_err());
        assert_eq!(store.count_events(&"p".into()).unwrap(), 1);
    }

    #[test]
    fn events_after_filters_project_and_position() {
        let store = LedgerStore::open_in_memory().unwrap();
        let mut positions = Vec::new();
        for seq in 1..=5 {
            positions.push(store.append_event(&event("p", seq, "a")).unwrap());
            store.append_event(&event("other", seq, "a")).unwrap();
        }
        let after = store.events_after(&"p".into(), positions[1]).unwrap();
        let seqs: Vec<u64> = after.iter().map(|r| r.event.sequence_number).collect();
        assert_eq!(seqs, vec![3, 4, 5]);
        assert_eq!(after[0].position, positions[2]);
        assert!(after.iter().all(|r| r.event.project_id == "p"));
        assert_eq!(store.events_after(&"p".into(), 0).unwrap().len(), 5);
        assert!(store.events_after(&"p".into(), positions[4]).unwrap().is_empty());
    }

    #[test]
    fn positions_keep_growing_when_sequence_numbers_restart() {
        let store = LedgerStore::open_in_memory().unwrap();
        let mut last = 0;
        for seq in 1..=3 {
            last = store.append_event(&event("p", seq, "a")).unwrap();
        }
        // a reconnected producer counts from 1 again
        for seq in 1..=2 {
            store.append_event(&event("p", seq, "b")).unwrap();
        }
        let missed = store.events_after(&"p".into(), last).unwrap();
        assert_eq!(missed.len(), 2);
        assert!(missed.iter().all(|r| r.event.file_path == "b"));
        assert!(missed[0].position < missed[1].position);
    }

    #[test]
    fn chain_tip_tracks_latest_event() {
        let store = LedgerStore::open_in_memory().unwrap();
        assert!(store.chain_tip(&"p".into()).unwrap().is_none());
        let first = event("p", 1, "a");
        let second = event("p", 2, "b");
        store.append_event(&first).unwrap();
        store.append_event(&second).unwrap();
        let tip = store.chain_tip(&"p".into()).unwrap().unwrap();
        assert_eq!(tip.event_id, second.id);
        assert_eq!(tip.content_hash, "h2");
    }
}
