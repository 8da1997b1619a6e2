//! Helpers for parsing column values from SQLite rows.
//!
//! These convert parse failures into `rusqlite::Error` instead of panicking,
//! since rows may contain corrupt or hand-edited data.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use uuid::Uuid;

fn conversion_error(
    col: usize,
    e: impl std::error::Error + Send + Sync + 'static,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(col, rusqlite::types::Type::Text, Box::new(e))
}

pub(crate) fn parse_uuid(s: &str, col: usize) -> rusqlite::Result<Uuid> {
    Uuid::parse_str(s).map_err(|e| conversion_error(col, e))
}

/// Parse an RFC 3339 timestamp.
pub(crate) fn parse_datetime(s: &str, col: usize) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.into())
        .map_err(|e| conversion_error(col, e))
}

/// Parse any wire enum (`RiskLevel`, `ExecutionStatus`, ...) stored by name.
pub(crate) fn parse_enum<T>(s: &str, col: usize) -> rusqlite::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    s.parse::<T>().map_err(|e| conversion_error(col, e))
}

/// Parse a JSON text column.
pub(crate) fn parse_json<T: serde::de::DeserializeOwned>(s: &str, col: usize) -> rusqlite::Result<T> {
    serde_json::from_str(s).map_err(|e| conversion_error(col, e))
}
