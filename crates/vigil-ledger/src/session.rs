//! Connection-session log.
//!
//! One row per registered connection, closed out on disconnect. This is
//! incidental bookkeeping: callers log failures and carry on.

use chrono::{DateTime, Utc};
use rusqlite::params;
use serde::{Deserialize, Serialize};

use vigil_types::{ClientId, ProjectId, VigilError};

use crate::parse_helpers::parse_datetime;
use crate::store::{ledger_err, LedgerStore};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionSession {
    pub session_id: i64,
    pub client_id: ClientId,
    pub client_type: String,
    pub project_id: ProjectId,
    pub connected_at: DateTime<Utc>,
    pub disconnected_at: Option<DateTime<Utc>>,
    pub close_reason: Option<String>,
}

impl LedgerStore {
    /// Record a new connection and return its session row id.
    pub fn begin_session(
        &self,
        client: &ClientId,
        client_type: &str,
        project: &ProjectId,
    ) -> Result<i64, VigilError> {
        self.conn
            .execute(
                "INSERT INTO connection_sessions (client_id, client_type, project_id, connected_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    client.as_str(),
                    client_type,
                    project.as_str(),
                    Utc::now().to_rfc3339()
                ],
            )
            .map_err(|e| ledger_err("failed to record connection", e))?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn end_session(&self, session_id: i64, reason: &str) -> Result<(), VigilError> {
        self.conn
            .execute(
                "UPDATE connection_sessions SET disconnected_at = ?1, close_reason = ?2
                 WHERE id = ?3 AND disconnected_at IS NULL",
                params![Utc::now().to_rfc3339(), reason, session_id],
            )
            .map_err(|e| ledger_err("failed to record disconnect", e))?;
        Ok(())
    }

    /// Most recent sessions of a project, newest first.
    pub fn list_sessions(
        &self,
        project: &ProjectId,
        limit: usize,
    ) -> Result<Vec<ConnectionSession>, VigilError> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT id, client_id, client_type, project_id, connected_at, disconnected_at, close_reason
                 FROM connection_sessions WHERE project_id = ?1 ORDER BY id DESC LIMIT ?2",
            )
            .map_err(|e| ledger_err("failed to prepare query", e))?;
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = stmt
            .query_map(params![project.as_str(), limit], |row| {
                let disconnected: Option<String> = row.get(5)?;
                Ok(ConnectionSession {
                    session_id: row.get(0)?,
                    client_id: ClientId::new(row.get::<_, String>(1)?),
                    client_type: row.get(2)?,
                    project_id: ProjectId::new(row.get::<_, String>(3)?),
                    connected_at: parse_datetime(&row.get::<_, String>(4)?, 4)?,
                    disconnected_at: disconnected
                        .map(|s| parse_datetime(&s, 5))
                        .transpose()?,
                    close_reason: row.get(6)?,
                })
            })
            .map_err(|e| ledger_err("failed to query sessions", e))?;
        rows.collect::<Result<Vec<_>, _>>()
            .map_err(|e| ledger_err("failed to read session", e))
    }
}
