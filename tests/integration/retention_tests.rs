//! Retention purge of finished records.

use std::sync::Arc;

use remediation_engine::models::action::AgentAction;
use remediation_engine::models::pool::Pool;
use remediation_engine::models::session::{NewSession, Session, SessionStatus};
use remediation_engine::models::task::{SpawnRequest, Task};
use remediation_engine::orchestrator::ensure_session;
use remediation_engine::persistence::pool_repo::PoolRepo;
use remediation_engine::persistence::retention::purge;
use remediation_engine::persistence::session_repo::SessionRepo;
use remediation_engine::persistence::step_repo::StepRepo;
use remediation_engine::persistence::task_repo::TaskRepo;

use super::test_helpers::test_db;

const LONG_AGO: &str = "2000-01-01T00:00:00.000000Z";

#[tokio::test]
async fn purge_removes_only_old_finished_records() {
    let db = test_db().await;
    let sessions = SessionRepo::new(Arc::clone(&db));
    let steps = StepRepo::new(Arc::clone(&db));
    let tasks = TaskRepo::new(Arc::clone(&db));

    // An old failed task with its session.
    let pool = PoolRepo::new(Arc::clone(&db))
        .create(&Pool::new("chat-1".into(), "ops".into(), 1))
        .await
        .expect("pool");
    let old_task = tasks
        .create(&Task::new(pool.id.clone(), SpawnRequest::background("old"), 5))
        .await
        .expect("task");
    let old_task_session = ensure_session(&db, &old_task).await.expect("session");
    tasks.force_fail(&old_task.id, "boom").await.expect("fail task");
    sessions
        .fail(&old_task_session.id, "boom")
        .await
        .expect("fail session");

    // An old completed standalone session with a step.
    let params = NewSession {
        user_id: "operator".into(),
        goal: "old standalone".into(),
        ..NewSession::default()
    };
    let old_session = sessions
        .create(&Session::new(params.clone(), 10))
        .await
        .expect("session");
    let step = steps
        .create_next(
            &old_session.id,
            &AgentAction::Complete {
                content: "done".into(),
                reasoning: String::new(),
            },
        )
        .await
        .expect("step");
    steps.resolve(&step.id).await.expect("resolve");
    sessions
        .update_status(&old_session.id, SessionStatus::Thinking)
        .await
        .expect("thinking");
    sessions
        .complete(&old_session.id, "done")
        .await
        .expect("complete");

    // A recent stopped session and a live one.
    let recent = sessions
        .create(&Session::new(params.clone(), 10))
        .await
        .expect("recent");
    sessions.stop(&recent.id).await.expect("stop");
    let live = sessions
        .create(&Session::new(params, 10))
        .await
        .expect("live");

    sqlx::query("UPDATE agent_task SET completed_at = ?1 WHERE id = ?2")
        .bind(LONG_AGO)
        .bind(&old_task.id)
        .execute(db.as_ref())
        .await
        .expect("age task");
    sqlx::query("UPDATE agent_session SET completed_at = ?1 WHERE id IN (?2, ?3)")
        .bind(LONG_AGO)
        .bind(&old_task_session.id)
        .bind(&old_session.id)
        .execute(db.as_ref())
        .await
        .expect("age sessions");

    let (purged_tasks, purged_sessions) = purge(&db, 30).await.expect("purge");
    assert_eq!(purged_tasks, 1);
    assert_eq!(purged_sessions, 2);

    assert!(tasks.get_by_id(&old_task.id).await.expect("query").is_none());
    assert!(sessions.get_by_id(&old_session.id).await.expect("query").is_none());
    assert!(steps.get_by_id(&step.id).await.expect("query").is_none());
    assert!(sessions.get_by_id(&recent.id).await.expect("query").is_some());
    assert!(sessions.get_by_id(&live.id).await.expect("query").is_some());
}
