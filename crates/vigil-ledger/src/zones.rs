//! Protection-zone table.

use rusqlite::{params, OptionalExtension};
use uuid::Uuid;

use vigil_types::{FileOperation, ProjectId, ProtectionZone, VigilError};

use crate::parse_helpers::{parse_datetime, parse_enum, parse_json, parse_uuid};
use crate::store::{ledger_err, LedgerStore};

const ZONE_COLUMNS: &str = "zone_id, project_id, path_pattern, level, allowed_operations, reason, is_system, created_by, created_at, updated_at";

impl LedgerStore {
    /// Validate and insert a zone. A second zone with the same
    /// `(project, pattern)` is a validation error, not a storage failure.
    pub fn insert_zone(&self, zone: &ProtectionZone) -> Result<(), VigilError> {
        zone.validate()?;
        let allowed = zone
            .allowed_operations
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(|e| ledger_err("failed to encode allowed operations", e))?;
        let result = self.conn.execute(
            &format!("INSERT INTO protection_zones ({ZONE_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)"),
            params![
                zone.id.to_string(),
                zone.project_id.as_str(),
                zone.path_pattern.trim(),
                zone.level.as_str(),
                allowed,
                zone.reason,
                zone.is_system,
                zone.created_by,
                zone.created_at.to_rfc3339(),
                zone.updated_at.to_rfc3339(),
            ],
        );
        match result {
            Ok(_) => Ok(()),
            Err(rusqlite::Error::SqliteFailure(err, _))
                if err.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                Err(VigilError::ValidationError(format!(
                    "a zone for pattern {:?} already exists in project {}",
                    zone.path_pattern, zone.project_id
                )))
            }
            Err(e) => Err(ledger_err("failed to insert zone", e)),
        }
    }

    pub fn get_zone(&self, id: &Uuid) -> Result<Option<ProtectionZone>, VigilError> {
        self.conn
            .query_row(
                &format!("SELECT {ZONE_COLUMNS} FROM protection_zones WHERE zone_id = ?1"),
                params![id.to_string()],
                row_to_zone,
            )
            .optional()
            .map_err(|e| ledger_err("failed to read zone", e))
    }

    /// Zones of a project in creation order.
    pub fn list_zones(&self, project: &ProjectId) -> Result<Vec<ProtectionZone>, VigilError> {
        let mut stmt = self
            .conn
            .prepare(&format!(
                "SELECT {ZONE_COLUMNS} FROM protection_zones WHERE project_id = ?1
                 ORDER BY created_at ASC, rowid ASC"
            ))
            .map_err(|e| ledger_err("failed to prepare query", e))?;
        let rows = stmt
            .query_map(params![project.as_str()], row_to_zone)
            .map_err(|e| ledger_err("failed to query zones", e))?;
        rows.collect::<Result<Vec<_>, _>>()
            .map_err(|e| ledger_err("failed to read zone", e))
    }

    /// Delete a user zone. Returns `false` if no such zone exists; system
    /// zones are refused with a validation error.
    pub fn delete_zone(&self, id: &Uuid) -> Result<bool, VigilError> {
        match self.get_zone(id)? {
            None => Ok(false),
            Some(zone) if zone.is_system => Err(VigilError::ValidationError(format!(
                "zone {} ({}) is a system zone and cannot be deleted",
                zone.id, zone.path_pattern
            ))),
            Some(_) => {
                self.conn
                    .execute(
                        "DELETE FROM protection_zones WHERE zone_id = ?1 AND is_system = 0",
                        params![id.to_string()],
                    )
                    .map_err(|e| ledger_err("failed to delete zone", e))?;
                Ok(true)
            }
        }
    }
}

fn row_to_zone(row: &rusqlite::Row<'_>) -> rusqlite::Result<ProtectionZone> {
    let allowed: Option<String> = row.get(4)?;
    let allowed_operations = allowed
        .map(|s| parse_json::<Vec<FileOperation>>(&s, 4))
        .transpose()?;
    Ok(ProtectionZone {
        id: parse_uuid(&row.get::<_, String>(0)?, 0)?,
        project_id: ProjectId::new(row.get::<_, String>(1)?),
        path_pattern: row.get(2)?,
        level: parse_enum(&row.get::<_, String>(3)?, 3)?,
        allowed_operations,
        reason: row.get(5)?,
        is_system: row.get(6)?,
        created_by: row.get(7)?,
        created_at: parse_datetime(&row.get::<_, String>(8)?, 8)?,
        updated_at: parse_datetime(&row.get::<_, String>(9)?, 9)?,
    })
}
