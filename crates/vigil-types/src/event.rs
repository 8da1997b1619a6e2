//! Action events: one observed file mutation attributed to the agent.
//!
//! An [`ActionEvent`] is the atomic unit the control plane reasons about. It
//! is submitted by a producer connection, classified for risk, written once
//! to the ledger, and broadcast to observers. Once persisted it is never
//! mutated.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::ids::ProjectId;
use crate::zone::ZoneLevel;
use crate::VigilError;

/// Largest diff accepted on the wire. Producers truncate before submitting.
pub const MAX_DIFF_BYTES: usize = 1024 * 1024;

/// The kind of file-tree mutation an event records.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FileOperation {
    FileCreate,
    FileModify,
    FileDelete,
    DirCreate,
    DirDelete,
}

impl FileOperation {
    /// Wire name of the operation (e.g. `FILE_DELETE`).
    pub fn as_str(&self) -> &'static str {
        match self {
            FileOperation::FileCreate => "FILE_CREATE",
            FileOperation::FileModify => "FILE_MODIFY",
            FileOperation::FileDelete => "FILE_DELETE",
            FileOperation::DirCreate => "DIR_CREATE",
            FileOperation::DirDelete => "DIR_DELETE",
        }
    }

    /// Whether the operation removes something from the tree.
    pub fn is_delete(&self) -> bool {
        matches!(self, FileOperation::FileDelete | FileOperation::DirDelete)
    }

    /// Whether the operation targets a directory rather than a file.
    pub fn is_directory(&self) -> bool {
        matches!(self, FileOperation::DirCreate | FileOperation::DirDelete)
    }

    /// Whether the operation leaves file content behind that has a hash.
    pub fn writes_content(&self) -> bool {
        matches!(self, FileOperation::FileCreate | FileOperation::FileModify)
    }
}

impl fmt::Display for FileOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FileOperation {
    type Err = VigilError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "FILE_CREATE" => Ok(FileOperation::FileCreate),
            "FILE_MODIFY" => Ok(FileOperation::FileModify),
            "FILE_DELETE" => Ok(FileOperation::FileDelete),
            "DIR_CREATE" => Ok(FileOperation::DirCreate),
            "DIR_DELETE" => Ok(FileOperation::DirDelete),
            other => Err(VigilError::ValidationError(format!(
                "unknown file operation {other:?}"
            ))),
        }
    }
}

/// Totally ordered risk level: `NONE < LOW < MEDIUM < HIGH < CRITICAL`.
///
/// The derived `Ord` follows declaration order, so `max()` over a set of
/// levels is the aggregate.
#[derive(
    Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RiskLevel {
    #[default]
    None,
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    pub const ALL: [RiskLevel; 5] = [
        RiskLevel::None,
        RiskLevel::Low,
        RiskLevel::Medium,
        RiskLevel::High,
        RiskLevel::Critical,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::None => "NONE",
            RiskLevel::Low => "LOW",
            RiskLevel::Medium => "MEDIUM",
            RiskLevel::High => "HIGH",
            RiskLevel::Critical => "CRITICAL",
        }
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RiskLevel {
    type Err = VigilError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "NONE" => Ok(RiskLevel::None),
            "LOW" => Ok(RiskLevel::Low),
            "MEDIUM" => Ok(RiskLevel::Medium),
            "HIGH" => Ok(RiskLevel::High),
            "CRITICAL" => Ok(RiskLevel::Critical),
            other => Err(VigilError::ValidationError(format!(
                "unknown risk level {other:?}"
            ))),
        }
    }
}

/// One observed mutation, as submitted by a producer and as persisted.
///
/// Producers leave `risk_level`, `risk_reasons` and `protection_zone_level`
/// unset; the control plane fills them in from the risk verdict before the
/// event is written to the ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionEvent {
    pub id: Uuid,
    /// Monotonic per producer connection, starting at 1.
    pub sequence_number: u64,
    pub project_id: ProjectId,
    pub operation: FileOperation,
    /// Path relative to the project root, `/`-separated.
    pub file_path: String,
    #[serde(default)]
    pub risk_level: RiskLevel,
    /// Checkpoint taken upstream before the mutation.
    #[serde(default)]
    pub snapshot_id: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub content_hash: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_content_hash: Option<String>,
    /// Commits to the identity and content hash of the project's previous event.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_event_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diff: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protection_zone_level: Option<ZoneLevel>,
    #[serde(default)]
    pub risk_reasons: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_binary: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_size: Option<u64>,
}

impl ActionEvent {
    /// Create an unclassified event with a fresh id and the current time.
    pub fn new(
        project_id: impl Into<ProjectId>,
        sequence_number: u64,
        operation: FileOperation,
        file_path: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            sequence_number,
            project_id: project_id.into(),
            operation,
            file_path: file_path.into(),
            risk_level: RiskLevel::None,
            snapshot_id: String::new(),
            timestamp: Utc::now(),
            content_hash: String::new(),
            previous_content_hash: None,
            parent_event_hash: None,
            diff: None,
            protection_zone_level: None,
            risk_reasons: Vec::new(),
            is_binary: None,
            file_size: None,
        }
    }

    pub fn with_content_hash(mut self, hash: impl Into<String>) -> Self {
        self.content_hash = hash.into();
        self
    }

    pub fn with_snapshot(mut self, snapshot_id: impl Into<String>) -> Self {
        self.snapshot_id = snapshot_id.into();
        self
    }

    pub fn with_diff(mut self, diff: impl Into<String>) -> Self {
        self.diff = Some(diff.into());
        self
    }

    pub fn with_file_size(mut self, bytes: u64) -> Self {
        self.file_size = Some(bytes);
        self
    }

    pub fn with_binary(mut self, is_binary: bool) -> Self {
        self.is_binary = Some(is_binary);
        self
    }

    pub fn with_parent_hash(mut self, hash: impl Into<String>) -> Self {
        self.parent_event_hash = Some(hash.into());
        self
    }

    /// Reject payloads that must never be classified or persisted.
    pub fn validate(&self) -> Result<(), VigilError> {
        if self.id.is_nil() {
            return Err(VigilError::ValidationError("id must not be nil".into()));
        }
        if self.project_id.is_blank() {
            return Err(VigilError::ValidationError(
                "projectId must not be empty".into(),
            ));
        }
        if self.sequence_number == 0 {
            return Err(VigilError::ValidationError(
                "sequenceNumber must start at 1".into(),
            ));
        }
        if self.file_path.trim().is_empty() {
            return Err(VigilError::ValidationError(
                "filePath must not be empty".into(),
            ));
        }
        if self.file_path.contains('\0') {
            return Err(VigilError::ValidationError(
                "filePath must not contain NUL bytes".into(),
            ));
        }
        if self.file_path.split(['/', '\\']).any(|c| c == "..") {
            return Err(VigilError::ValidationError(format!(
                "filePath {:?} escapes the project root",
                self.file_path
            )));
        }
        if self.operation.writes_content() && self.content_hash.trim().is_empty() {
            return Err(VigilError::ValidationError(format!(
                "contentHash is required for {}",
                self.operation
            )));
        }
        if let Some(diff) = &self.diff {
            if diff.len() > MAX_DIFF_BYTES {
                return Err(VigilError::ValidationError(format!(
                    "diff of {} bytes exceeds limit {MAX_DIFF_BYTES}",
                    diff.len()
                )));
            }
        }
        Ok(())
    }

    /// The path with backslashes normalised and any leading `./` removed.
    pub fn normalized_path(&self) -> String {
        let path = self.file_path.replace('\\', "/");
        path.strip_prefix("./").unwrap_or(&path).to_string()
    }

    /// Final path component.
    pub fn file_name(&self) -> String {
        let path = self.normalized_path();
        let trimmed = path.trim_end_matches('/');
        trimmed
            .rsplit('/')
            .next()
            .unwrap_or(trimmed)
            .to_string()
    }

    /// The directory this event touched.
    ///
    /// For directory operations that is the path itself; for files it is the
    /// parent directory, or `.` for files at the project root.
    pub fn directory(&self) -> String {
        let path = self.normalized_path();
        let trimmed = path.trim_end_matches('/');
        if self.operation.is_directory() {
            return trimmed.to_string();
        }
        match trimmed.rfind('/') {
            Some(idx) if idx > 0 => trimmed[..idx].to_string(),
            _ => ".".to_string(),
        }
    }

    /// Number of lines in the diff, if one was attached.
    pub fn diff_line_count(&self) -> Option<usize> {
        self.diff.as_ref().map(|d| d.lines().count())
    }
}
