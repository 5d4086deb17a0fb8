//! Retention service for time-based data purge.
//!
//! Runs as a background task deleting finished tasks (iterations cascade)
//! and then finished sessions (steps cascade) that ended more than
//! `retention_days` ago.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use super::db::Database;
use super::fmt_ts;
use crate::Result;

const PURGE_INTERVAL: Duration = Duration::from_secs(3600);

/// Spawn the retention purge background task.
///
/// The task runs hourly until `cancel` fires.
#[must_use]
pub fn spawn_retention_task(
    db: Arc<Database>,
    retention_days: u32,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(PURGE_INTERVAL);
        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    info!("retention task shutting down");
                    break;
                }
                _ = interval.tick() => {
                    if let Err(err) = purge(&db, retention_days).await {
                        error!(?err, "retention purge failed");
                    }
                }
            }
        }
    })
}

/// Delete finished records older than `retention_days`.
///
/// Returns the number of tasks and sessions removed.
///
/// # Errors
///
/// Returns `AppError::Db` if a delete fails.
pub async fn purge(db: &Database, retention_days: u32) -> Result<(u64, u64)> {
    let cutoff = Utc::now() - chrono::Duration::days(i64::from(retention_days));
    let cutoff_str = fmt_ts(cutoff);

    // Tasks first: a task row references its session.
    let tasks = sqlx::query(
        "DELETE FROM agent_task
         WHERE status IN ('completed', 'failed') AND completed_at < ?1",
    )
    .bind(&cutoff_str)
    .execute(db)
    .await?
    .rows_affected();

    let sessions = sqlx::query(
        "DELETE FROM agent_session
         WHERE status IN ('completed', 'failed', 'stopped') AND completed_at < ?1
           AND id NOT IN (SELECT agent_session_id FROM agent_task
                          WHERE agent_session_id IS NOT NULL)",
    )
    .bind(&cutoff_str)
    .execute(db)
    .await?
    .rows_affected();

    info!(retention_days, tasks, sessions, "retention purge completed");
    Ok((tasks, sessions))
}
