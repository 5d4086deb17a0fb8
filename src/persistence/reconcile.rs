//! Startup reconciliation of work orphaned by a previous process.
//!
//! Live task handles exist only in memory. After a crash or restart any row
//! still marked `running` (task) or mid-loop (session, step) has nothing
//! driving it. This pass fails those rows so the scheduler starts from a
//! consistent view; it must complete before scheduling requests are
//! accepted.

use chrono::Utc;
use tracing::{info, info_span, warn, Instrument};

use super::db::Database;
use super::fmt_ts;
use crate::{AppError, Result};

/// Error text written on reconciled rows.
pub const ORPHANED_MESSAGE: &str = "orphaned: engine restarted while this was running";

/// Counts of rows failed by [`reconcile_orphans`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Tasks moved from `running` to `failed`.
    pub tasks: u64,
    /// Mid-loop sessions moved to `failed`.
    pub sessions: u64,
    /// Unfinished steps of those sessions moved to `failed`.
    pub steps: u64,
}

impl ReconcileReport {
    /// Whether nothing needed fixing.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.tasks == 0 && self.sessions == 0 && self.steps == 0
    }
}

/// Fail every orphaned task, session and step in one transaction.
///
/// Idle sessions are left alone unless a running task owns them: an idle
/// session on its own has not started its loop yet.
///
/// # Errors
///
/// Returns `AppError::Db` if any statement fails; nothing is committed.
pub async fn reconcile_orphans(db: &Database) -> Result<ReconcileReport> {
    fail_orphans(db).instrument(info_span!("startup_reconcile")).await
}

async fn fail_orphans(db: &Database) -> Result<ReconcileReport> {
    let now = fmt_ts(Utc::now());
    let marker = AppError::Cancelled(ORPHANED_MESSAGE.into()).marker();
    let mut tx = db.begin().await?;

    let steps = sqlx::query(
        "UPDATE agent_step SET status = 'failed', output = COALESCE(output, ?1), completed_at = ?2
         WHERE status IN ('pending', 'approved', 'executing')
           AND session_id IN (SELECT id FROM agent_session
                              WHERE status NOT IN ('idle', 'completed', 'failed', 'stopped'))",
    )
    .bind(&marker)
    .bind(&now)
    .execute(&mut *tx)
    .await?
    .rows_affected();

    let sessions = sqlx::query(
        "UPDATE agent_session SET status = 'failed', error_message = ?1, updated_at = ?2,
         completed_at = ?2
         WHERE status NOT IN ('completed', 'failed', 'stopped')
           AND (status <> 'idle'
                OR id IN (SELECT agent_session_id FROM agent_task WHERE status = 'running'))",
    )
    .bind(ORPHANED_MESSAGE)
    .bind(&now)
    .execute(&mut *tx)
    .await?
    .rows_affected();

    let tasks = sqlx::query(
        "UPDATE agent_task SET status = 'failed', error_message = ?1, completed_at = ?2
         WHERE status = 'running'",
    )
    .bind(ORPHANED_MESSAGE)
    .bind(&now)
    .execute(&mut *tx)
    .await?
    .rows_affected();

    tx.commit().await?;

    let report = ReconcileReport {
        tasks,
        sessions,
        steps,
    };
    if report.is_clean() {
        info!("no orphaned work found on startup");
    } else {
        warn!(tasks, sessions, steps, "failed orphaned work left by a previous run");
    }
    Ok(report)
}
