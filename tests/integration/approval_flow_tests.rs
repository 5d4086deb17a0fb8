//! Operator gating: approve, reject, answer and stop while a loop waits.

use std::sync::Arc;

use remediation_engine::agent::AgentService;
use remediation_engine::config::GlobalConfig;
use remediation_engine::models::session::{NewSession, Session, SessionStatus};
use remediation_engine::models::step::{Step, StepStatus, REJECTED_OUTPUT};
use remediation_engine::notify::Notifier;
use tokio::task::JoinHandle;

use super::test_helpers::{
    command, complete, question, test_config, test_db, wait_until, ScriptedProvider,
    StubExecutor,
};

async fn gated_session(agent: &AgentService, goal: &str) -> Session {
    agent
        .create_session(NewSession {
            chat_id: Some("chat-approval".into()),
            user_id: "operator".into(),
            goal: goal.into(),
            ..NewSession::default()
        })
        .await
        .expect("session")
}

fn spawn_loop(
    agent: &AgentService,
    session_id: &str,
    provider: Arc<ScriptedProvider>,
    executor: Arc<StubExecutor>,
) -> JoinHandle<Session> {
    let agent = agent.clone();
    let session_id = session_id.to_owned();
    tokio::spawn(async move {
        agent
            .run_loop(&session_id, provider, executor)
            .await
            .expect("loop")
    })
}

/// Wait until the loop is parked on a pending step and return it.
async fn pending_step(agent: &AgentService, session_id: &str) -> Step {
    wait_until("awaiting approval", || async move {
        agent
            .session(session_id)
            .await
            .is_ok_and(|s| s.status == SessionStatus::AwaitingApproval)
    })
    .await;
    let step = agent
        .pending_step(session_id)
        .await
        .expect("query")
        .expect("a pending step");
    assert_eq!(step.status, StepStatus::Pending);
    step
}

#[tokio::test]
async fn approval_wakes_the_loop_and_runs_the_command() {
    let agent = AgentService::new(test_db().await, Arc::new(test_config()), Notifier::none());
    let session = gated_session(&agent, "rotate logs").await;
    let provider = ScriptedProvider::new(vec![
        command("logrotate -f /etc/logrotate.conf"),
        complete("rotated"),
    ]);
    let executor = StubExecutor::ok("ok");
    let handle = spawn_loop(&agent, &session.id, provider, executor.clone());

    let step = pending_step(&agent, &session.id).await;
    assert!(executor.commands().is_empty(), "nothing runs before approval");
    agent.approve_step(&step.id).await.expect("approve");

    let session = handle.await.expect("join");
    assert_eq!(session.status, SessionStatus::Completed);
    let step = &agent.steps(&session.id).await.expect("steps")[0];
    assert_eq!(step.status, StepStatus::Executed);
    assert_eq!(step.exit_code, Some(0));
    assert_eq!(step.output.as_deref(), Some("ok"));
}

#[tokio::test]
async fn rejection_is_visible_to_the_next_think() {
    let agent = AgentService::new(test_db().await, Arc::new(test_config()), Notifier::none());
    let session = gated_session(&agent, "free disk space").await;
    let provider = ScriptedProvider::new(vec![
        command("rm -rf /var/lib/docker"),
        complete("asked operator to clean up manually"),
    ]);
    let executor = StubExecutor::ok("ok");
    let handle = spawn_loop(&agent, &session.id, provider.clone(), executor.clone());

    let step = pending_step(&agent, &session.id).await;
    let rejected = agent.reject_step(&step.id).await.expect("reject");
    assert_eq!(rejected.status, StepStatus::Rejected);
    assert_eq!(rejected.output.as_deref(), Some(REJECTED_OUTPUT));

    let session = handle.await.expect("join");
    assert_eq!(session.status, SessionStatus::Completed);
    assert!(executor.commands().is_empty());

    let second = &provider.conversations()[1];
    assert!(second.iter().any(|m| m.content.contains(REJECTED_OUTPUT)));
}

#[tokio::test]
async fn answering_a_question_resumes_the_loop() {
    let agent = AgentService::new(test_db().await, Arc::new(test_config()), Notifier::none());
    let session = gated_session(&agent, "fix the web tier").await;
    let provider = ScriptedProvider::new(vec![
        question("Which service is failing?"),
        complete("nginx restarted"),
    ]);
    let handle = spawn_loop(&agent, &session.id, provider.clone(), StubExecutor::ok("ok"));

    let step = pending_step(&agent, &session.id).await;
    let answered = agent
        .answer_question(&step.id, "nginx")
        .await
        .expect("answer");
    assert_eq!(answered.status, StepStatus::Executed);
    assert_eq!(answered.output.as_deref(), Some("nginx"));

    let session = handle.await.expect("join");
    assert_eq!(session.status, SessionStatus::Completed);
    let second = &provider.conversations()[1];
    assert!(second
        .iter()
        .any(|m| m.content.contains("Operator answer to step 1: nginx")));
}

#[tokio::test]
async fn decisions_are_checked_against_the_step_kind() {
    let agent = AgentService::new(test_db().await, Arc::new(test_config()), Notifier::none());
    let session = gated_session(&agent, "clarify").await;
    let provider = ScriptedProvider::new(vec![question("Which host?"), complete("done")]);
    let handle = spawn_loop(&agent, &session.id, provider, StubExecutor::ok("ok"));

    let step = pending_step(&agent, &session.id).await;
    assert!(agent.approve_step(&step.id).await.is_err());
    assert!(agent.reject_step(&step.id).await.is_err());

    agent.answer_question(&step.id, "web-01").await.expect("answer");
    handle.await.expect("join");

    // A decided step cannot be decided again.
    assert!(agent.answer_question(&step.id, "web-02").await.is_err());
}

#[tokio::test]
async fn stop_while_awaiting_approval_stops_the_session() {
    let agent = AgentService::new(test_db().await, Arc::new(test_config()), Notifier::none());
    let session = gated_session(&agent, "wait for me").await;
    let provider = ScriptedProvider::new(vec![command("reboot")]);
    let handle = spawn_loop(&agent, &session.id, provider, StubExecutor::ok("ok"));

    let step = pending_step(&agent, &session.id).await;
    let stopped = agent.stop_session(&session.id).await.expect("stop");
    assert_eq!(stopped.status, SessionStatus::Stopped);

    let session = handle.await.expect("join");
    assert_eq!(session.status, SessionStatus::Stopped);
    let step = agent
        .steps(&session.id)
        .await
        .expect("steps")
        .into_iter()
        .find(|s| s.id == step.id)
        .expect("step");
    assert_eq!(step.status, StepStatus::Failed);
}

#[tokio::test]
async fn unanswered_question_times_out() {
    let config = GlobalConfig::from_toml_str(
        "[agent]\niteration_delay_ms = 1\n\n[timeouts]\nquestion_seconds = 1\n",
    )
    .expect("config");
    let agent = AgentService::new(test_db().await, Arc::new(config), Notifier::none());
    let session = gated_session(&agent, "nobody answers").await;
    let provider = ScriptedProvider::new(vec![question("Anyone there?")]);

    let session = agent
        .run_loop(&session.id, provider, StubExecutor::ok("ok"))
        .await
        .expect("loop");
    assert_eq!(session.status, SessionStatus::Failed);
    assert!(session
        .error_message
        .as_deref()
        .is_some_and(|m| m.starts_with("timeout:")));

    let steps = agent.steps(&session.id).await.expect("steps");
    assert_eq!(steps[0].status, StepStatus::Failed);
}
