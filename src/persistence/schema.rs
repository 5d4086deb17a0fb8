//! `SQLite` schema bootstrap logic.
//!
//! All table definitions use `CREATE TABLE IF NOT EXISTS`; safe to
//! re-run on every startup. Child tables cascade on parent deletion.

use sqlx::SqlitePool;

use crate::Result;

/// Apply all table definitions to the connected `SQLite` database.
///
/// # Errors
///
/// Returns `AppError::Db` if any DDL statement fails.
pub async fn bootstrap_schema(pool: &SqlitePool) -> Result<()> {
    let ddl = r"
CREATE TABLE IF NOT EXISTS agent_pool (
    id                    TEXT PRIMARY KEY NOT NULL,
    owner_id              TEXT NOT NULL,
    name                  TEXT NOT NULL,
    max_concurrent_agents INTEGER NOT NULL CHECK(max_concurrent_agents >= 1),
    created_at            TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS agent_session (
    id                  TEXT PRIMARY KEY NOT NULL,
    chat_id             TEXT,
    pool_id             TEXT,
    user_id             TEXT NOT NULL,
    target_server_id    TEXT,
    goal                TEXT NOT NULL,
    status              TEXT NOT NULL CHECK(status IN ('idle','thinking','awaiting_approval','executing','analyzing','completed','failed','stopped')),
    auto_approve        INTEGER NOT NULL DEFAULT 0,
    max_steps           INTEGER NOT NULL CHECK(max_steps >= 1),
    current_step_number INTEGER NOT NULL DEFAULT 0,
    error_message       TEXT,
    summary             TEXT,
    created_at          TEXT NOT NULL,
    updated_at          TEXT NOT NULL,
    completed_at        TEXT
);

CREATE TABLE IF NOT EXISTS agent_step (
    id           TEXT PRIMARY KEY NOT NULL,
    session_id   TEXT NOT NULL REFERENCES agent_session(id) ON DELETE CASCADE,
    step_number  INTEGER NOT NULL,
    step_type    TEXT NOT NULL CHECK(step_type IN ('command','analysis','question','complete','failed')),
    content      TEXT NOT NULL,
    reasoning    TEXT,
    status       TEXT NOT NULL CHECK(status IN ('pending','approved','executing','executed','rejected','failed')),
    output       TEXT,
    exit_code    INTEGER,
    created_at   TEXT NOT NULL,
    started_at   TEXT,
    completed_at TEXT,
    UNIQUE(session_id, step_number)
);

CREATE TABLE IF NOT EXISTS agent_task (
    id               TEXT PRIMARY KEY NOT NULL,
    pool_id          TEXT NOT NULL REFERENCES agent_pool(id) ON DELETE CASCADE,
    agent_session_id TEXT REFERENCES agent_session(id) ON DELETE SET NULL,
    goal             TEXT NOT NULL,
    kind             TEXT NOT NULL CHECK(kind IN ('interactive','background')),
    priority         INTEGER NOT NULL DEFAULT 0,
    status           TEXT NOT NULL CHECK(status IN ('queued','running','completed','failed','paused')),
    auto_iterate     INTEGER NOT NULL DEFAULT 1,
    max_iterations   INTEGER NOT NULL CHECK(max_iterations >= 1),
    target_server_id TEXT,
    error_message    TEXT,
    created_at       TEXT NOT NULL,
    started_at       TEXT,
    completed_at     TEXT
);

CREATE TABLE IF NOT EXISTS agent_iteration (
    agent_task_id    TEXT NOT NULL REFERENCES agent_task(id) ON DELETE CASCADE,
    iteration_number INTEGER NOT NULL,
    command          TEXT NOT NULL,
    output           TEXT NOT NULL,
    exit_code        INTEGER,
    error_detected   INTEGER NOT NULL DEFAULT 0,
    error_type       TEXT,
    created_at       TEXT NOT NULL,
    PRIMARY KEY (agent_task_id, iteration_number)
);

CREATE TABLE IF NOT EXISTS transcript_message (
    id         TEXT PRIMARY KEY NOT NULL,
    chat_id    TEXT NOT NULL,
    role       TEXT NOT NULL,
    content    TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_task_pool_status ON agent_task(pool_id, status);
CREATE INDEX IF NOT EXISTS idx_step_session ON agent_step(session_id);
CREATE INDEX IF NOT EXISTS idx_session_status ON agent_session(status);
CREATE INDEX IF NOT EXISTS idx_transcript_chat ON transcript_message(chat_id);
";

    sqlx::raw_sql(ddl).execute(pool).await?;
    Ok(())
}
