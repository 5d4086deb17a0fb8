use std::sync::Arc;

use remediation_engine::models::pool::Pool;
use remediation_engine::models::session::SessionStatus;
use remediation_engine::models::task::{SpawnRequest, Task, TaskStatus};
use remediation_engine::models::transcript::TranscriptMessage;
use remediation_engine::orchestrator::ensure_session;
use remediation_engine::persistence::db::{self, Database};
use remediation_engine::persistence::pool_repo::PoolRepo;
use remediation_engine::persistence::session_repo::SessionRepo;
use remediation_engine::persistence::task_repo::{TaskOutcome, TaskRepo};
use remediation_engine::persistence::transcript_repo::TranscriptRepo;
use remediation_engine::AppError;

async fn setup() -> (Arc<Database>, TaskRepo, Pool) {
    let db = Arc::new(db::connect_memory().await.expect("db connect"));
    let pool = PoolRepo::new(Arc::clone(&db))
        .create(&Pool::new("chat-1".into(), "ops".into(), 2))
        .await
        .expect("pool");
    (Arc::clone(&db), TaskRepo::new(db), pool)
}

async fn queue(tasks: &TaskRepo, pool: &Pool, goal: &str, priority: i32) -> Task {
    tasks
        .create(&Task::new(
            pool.id.clone(),
            SpawnRequest::background(goal).with_priority(priority),
            5,
        ))
        .await
        .expect("task")
}

#[tokio::test]
async fn queued_tasks_come_out_by_priority_then_age() {
    let (_db, tasks, pool) = setup().await;
    let low_a = queue(&tasks, &pool, "low a", 0).await;
    let high = queue(&tasks, &pool, "high", 10).await;
    let low_b = queue(&tasks, &pool, "low b", 0).await;
    let mid = queue(&tasks, &pool, "mid", 5).await;

    let order: Vec<String> = tasks
        .list_queued(&pool.id, 10)
        .await
        .expect("queued")
        .into_iter()
        .map(|t| t.id)
        .collect();
    assert_eq!(order, vec![high.id.clone(), mid.id, low_a.id, low_b.id]);

    let limited = tasks.list_queued(&pool.id, 1).await.expect("queued");
    assert_eq!(limited.len(), 1);
    assert_eq!(limited[0].id, high.id);
    assert_eq!(tasks.pools_with_queued().await.expect("pools"), vec![pool.id]);
}

#[tokio::test]
async fn running_requires_a_session() {
    let (db, tasks, pool) = setup().await;
    let task = queue(&tasks, &pool, "needs session", 0).await;

    let err = tasks.mark_running(&task.id).await.expect_err("no session");
    assert!(matches!(err, AppError::InvalidTransition(_)));

    let session = ensure_session(&db, &task).await.expect("session");
    let again = ensure_session(&db, &tasks.require(&task.id).await.expect("task"))
        .await
        .expect("same session");
    assert_eq!(session.id, again.id);

    let running = tasks.mark_running(&task.id).await.expect("running");
    assert_eq!(running.status, TaskStatus::Running);
    assert_eq!(running.agent_session_id.as_deref(), Some(session.id.as_str()));
    assert!(running.started_at.is_some());
    assert_eq!(tasks.count_running(&pool.id).await.expect("count"), 1);
}

#[tokio::test]
async fn finish_writes_task_session_and_transcript_together() {
    let (db, tasks, pool) = setup().await;
    let task = queue(&tasks, &pool, "rotate certs", 0).await;
    let session = ensure_session(&db, &task).await.expect("session");
    tasks.mark_running(&task.id).await.expect("running");

    let outcome = TaskOutcome {
        task_status: TaskStatus::Completed,
        session_status: SessionStatus::Completed,
        summary: Some("certs rotated".into()),
        error_message: None,
        transcript: Some(TranscriptMessage::assistant(
            "chat-1",
            "Background task completed: rotate certs\n\ncerts rotated".into(),
        )),
    };
    assert!(tasks.finish(&task.id, &outcome).await.expect("finish"));
    assert!(
        !tasks.finish(&task.id, &outcome).await.expect("second finish"),
        "already finished"
    );

    let task = tasks.require(&task.id).await.expect("task");
    assert_eq!(task.status, TaskStatus::Completed);
    assert!(task.completed_at.is_some());

    let session = SessionRepo::new(Arc::clone(&db))
        .require(&session.id)
        .await
        .expect("session");
    assert_eq!(session.status, SessionStatus::Completed);
    assert_eq!(session.summary.as_deref(), Some("certs rotated"));

    let transcript = TranscriptRepo::new(Arc::clone(&db))
        .list_for_chat("chat-1")
        .await
        .expect("transcript");
    assert_eq!(transcript.len(), 1, "second finish wrote nothing");
}

#[tokio::test]
async fn pause_resume_and_force_fail() {
    let (_db, tasks, pool) = setup().await;
    let task = queue(&tasks, &pool, "pausable", 0).await;

    let paused = tasks
        .update_status(&task.id, TaskStatus::Paused)
        .await
        .expect("pause");
    assert_eq!(paused.status, TaskStatus::Paused);
    assert!(tasks.list_queued(&pool.id, 10).await.expect("queued").is_empty());
    assert!(tasks.list_active(&pool.id).await.expect("active").is_empty());

    assert!(tasks
        .update_status(&task.id, TaskStatus::Running)
        .await
        .is_err());
    tasks
        .update_status(&task.id, TaskStatus::Queued)
        .await
        .expect("resume");

    assert!(tasks.force_fail(&task.id, "cancelled").await.expect("fail"));
    assert!(!tasks.force_fail(&task.id, "again").await.expect("no-op"));
    let task = tasks.require(&task.id).await.expect("task");
    assert_eq!(task.status, TaskStatus::Failed);
    assert_eq!(task.error_message.as_deref(), Some("cancelled"));
    assert_eq!(tasks.list_for_pool(&pool.id).await.expect("all").len(), 1);
}

#[tokio::test]
async fn cancel_waiting_leaves_launched_tasks_alone() {
    let (db, tasks, pool) = setup().await;
    let waiting = queue(&tasks, &pool, "still waiting", 0).await;
    let launched = queue(&tasks, &pool, "already launched", 0).await;
    ensure_session(&db, &launched).await.expect("session");
    tasks.mark_running(&launched.id).await.expect("running");

    assert!(tasks
        .cancel_waiting(&waiting.id, "cancelled")
        .await
        .expect("cancel queued"));
    assert!(!tasks
        .cancel_waiting(&launched.id, "cancelled")
        .await
        .expect("running untouched"));
    assert!(!tasks
        .cancel_waiting(&waiting.id, "again")
        .await
        .expect("failed untouched"));

    let launched = tasks.require(&launched.id).await.expect("launched");
    assert_eq!(launched.status, TaskStatus::Running);
    assert_eq!(launched.error_message, None);
    let waiting = tasks.require(&waiting.id).await.expect("waiting");
    assert_eq!(waiting.status, TaskStatus::Failed);
    assert_eq!(waiting.error_message.as_deref(), Some("cancelled"));
}

#[tokio::test]
async fn status_update_does_not_revive_a_failed_task() {
    let (_db, tasks, pool) = setup().await;
    let task = queue(&tasks, &pool, "stopped before pause", 0).await;
    assert!(tasks
        .cancel_waiting(&task.id, "cancelled")
        .await
        .expect("cancel"));

    let err = tasks
        .update_status(&task.id, TaskStatus::Paused)
        .await
        .expect_err("failed is terminal");
    assert!(matches!(err, AppError::InvalidTransition(_)));
    assert_eq!(
        tasks.require(&task.id).await.expect("task").status,
        TaskStatus::Failed
    );
}
