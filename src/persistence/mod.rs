//! Persistence layer modules.

pub mod db;
pub mod iteration_repo;
pub mod pool_repo;
pub mod reconcile;
pub mod retention;
pub mod schema;
pub mod session_repo;
pub mod step_repo;
pub mod task_repo;
pub mod transcript_repo;

use chrono::{DateTime, SecondsFormat, Utc};

/// Re-export the database pool type for convenience.
pub use sqlx::SqlitePool;

use crate::{AppError, Result};

/// Render a timestamp in the fixed-width form stored in every table.
///
/// Fixed width keeps lexical `ORDER BY` consistent with chronological order.
pub(crate) fn fmt_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Parse a stored timestamp column.
pub(crate) fn parse_ts(column: &str, raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| AppError::Db(format!("invalid {column}: {e}")))
}

/// Parse an optional stored timestamp column.
pub(crate) fn parse_opt_ts(column: &str, raw: Option<&str>) -> Result<Option<DateTime<Utc>>> {
    raw.map(|s| parse_ts(column, s)).transpose()
}

/// Convert a stored non-negative integer column.
pub(crate) fn to_u32(column: &str, value: i64) -> Result<u32> {
    u32::try_from(value).map_err(|_| AppError::Db(format!("invalid {column}: {value}")))
}
