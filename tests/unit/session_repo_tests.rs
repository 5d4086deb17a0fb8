use std::sync::Arc;

use remediation_engine::models::session::{NewSession, Session, SessionStatus};
use remediation_engine::persistence::{db, session_repo::SessionRepo};
use remediation_engine::AppError;

async fn repo() -> SessionRepo {
    let db = db::connect_memory().await.expect("db connect");
    SessionRepo::new(Arc::new(db))
}

fn params() -> NewSession {
    NewSession {
        chat_id: Some("chat-1".into()),
        user_id: "operator".into(),
        target_server_id: Some("srv-1".into()),
        goal: "restore service".into(),
        auto_approve: true,
        ..NewSession::default()
    }
}

#[tokio::test]
async fn create_and_read_back() {
    let repo = repo().await;
    let created = repo
        .create(&Session::new(params(), 12))
        .await
        .expect("create session");

    let fetched = repo.require(&created.id).await.expect("fetch");
    assert_eq!(fetched, created);
    assert_eq!(fetched.status, SessionStatus::Idle);
    assert_eq!(fetched.max_steps, 12);
    assert!(fetched.auto_approve);
    assert_eq!(fetched.chat_id.as_deref(), Some("chat-1"));

    assert!(repo.get_by_id("missing").await.expect("query").is_none());
    assert!(matches!(
        repo.require("missing").await,
        Err(AppError::NotFound(_))
    ));
}

#[tokio::test]
async fn illegal_transition_is_refused() {
    let repo = repo().await;
    let session = repo.create(&Session::new(params(), 5)).await.expect("create");

    let err = repo
        .update_status(&session.id, SessionStatus::Executing)
        .await
        .expect_err("idle cannot execute");
    assert!(matches!(err, AppError::InvalidTransition(_)));

    let thinking = repo
        .update_status(&session.id, SessionStatus::Thinking)
        .await
        .expect("thinking");
    assert_eq!(thinking.status, SessionStatus::Thinking);
    assert!(thinking.completed_at.is_none());
}

#[tokio::test]
async fn terminal_sessions_stay_terminal() {
    let repo = repo().await;
    let session = repo.create(&Session::new(params(), 5)).await.expect("create");
    repo.update_status(&session.id, SessionStatus::Thinking)
        .await
        .expect("thinking");
    let done = repo.complete(&session.id, "fixed").await.expect("complete");
    assert_eq!(done.summary.as_deref(), Some("fixed"));
    assert!(done.completed_at.is_some());

    assert!(repo.fail(&session.id, "late failure").await.is_err());
    let (after_stop, changed) = repo.stop(&session.id).await.expect("stop");
    assert!(!changed);
    assert_eq!(after_stop.status, SessionStatus::Completed);
}

#[tokio::test]
async fn stop_reports_whether_it_changed_anything() {
    let repo = repo().await;
    let session = repo.create(&Session::new(params(), 5)).await.expect("create");

    let (stopped, changed) = repo.stop(&session.id).await.expect("stop");
    assert!(changed);
    assert_eq!(stopped.status, SessionStatus::Stopped);

    let (_, changed) = repo.stop(&session.id).await.expect("stop again");
    assert!(!changed);

    let live = repo.list_non_terminal().await.expect("list");
    assert!(live.is_empty());
}
