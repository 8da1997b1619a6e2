//! Protection zones: path-pattern rules declaring a location sensitive.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::event::FileOperation;
use crate::ids::ProjectId;
use crate::VigilError;

/// Enforcement level of a protection zone.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ZoneLevel {
    /// Any mutation is critical and blocking.
    DoNotTouch,
    /// Only the listed operations are tolerated, and even those are flagged.
    SurgicalOnly,
    /// Declared but unenforced.
    None,
}

impl ZoneLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            ZoneLevel::DoNotTouch => "DO_NOT_TOUCH",
            ZoneLevel::SurgicalOnly => "SURGICAL_ONLY",
            ZoneLevel::None => "NONE",
        }
    }

    /// Rank used to pick the strictest of several matching zones.
    pub fn strictness(&self) -> u8 {
        match self {
            ZoneLevel::DoNotTouch => 2,
            ZoneLevel::SurgicalOnly => 1,
            ZoneLevel::None => 0,
        }
    }
}

impl fmt::Display for ZoneLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ZoneLevel {
    type Err = VigilError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "DO_NOT_TOUCH" => Ok(ZoneLevel::DoNotTouch),
            "SURGICAL_ONLY" => Ok(ZoneLevel::SurgicalOnly),
            "NONE" => Ok(ZoneLevel::None),
            other => Err(VigilError::ValidationError(format!(
                "unknown zone level {other:?}"
            ))),
        }
    }
}

/// A path-pattern rule scoped to one project.
///
/// `(project_id, path_pattern)` is unique. System zones cannot be deleted
/// through normal operations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProtectionZone {
    pub id: Uuid,
    pub project_id: ProjectId,
    /// Glob pattern relative to the project root.
    pub path_pattern: String,
    pub level: ZoneLevel,
    /// Required (and non-empty) when `level` is `SURGICAL_ONLY`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allowed_operations: Option<Vec<FileOperation>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default)]
    pub is_system: bool,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ProtectionZone {
    /// Create a user-defined zone with a fresh id.
    pub fn new(
        project_id: impl Into<ProjectId>,
        path_pattern: impl Into<String>,
        level: ZoneLevel,
        created_by: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            project_id: project_id.into(),
            path_pattern: path_pattern.into(),
            level,
            allowed_operations: None,
            reason: None,
            is_system: false,
            created_by: created_by.into(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_allowed_operations(mut self, ops: Vec<FileOperation>) -> Self {
        self.allowed_operations = Some(ops);
        self
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn system(mut self) -> Self {
        self.is_system = true;
        self
    }

    /// Whether `op` is listed in `allowed_operations`.
    pub fn allows(&self, op: FileOperation) -> bool {
        self.allowed_operations
            .as_ref()
            .is_some_and(|ops| ops.contains(&op))
    }

    pub fn validate(&self) -> Result<(), VigilError> {
        if self.project_id.is_blank() {
            return Err(VigilError::ValidationError(
                "projectId must not be empty".into(),
            ));
        }
        let pattern = self.path_pattern.trim();
        if pattern.is_empty() {
            return Err(VigilError::ValidationError(
                "pathPattern must not be empty".into(),
            ));
        }
        glob::Pattern::new(pattern).map_err(|e| {
            VigilError::ValidationError(format!("pathPattern {pattern:?} is not a valid glob: {e}"))
        })?;
        if self.level == ZoneLevel::SurgicalOnly
            && self.allowed_operations.as_ref().map_or(true, |ops| ops.is_empty())
        {
            return Err(VigilError::ValidationError(
                "allowedOperations is required for SURGICAL_ONLY zones".into(),
            ));
        }
        Ok(())
    }
}
