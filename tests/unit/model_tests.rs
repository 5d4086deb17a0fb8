use remediation_engine::models::action::AgentAction;
use remediation_engine::models::session::{NewSession, Session, SessionStatus};
use remediation_engine::models::step::{Step, StepStatus};
use remediation_engine::models::task::{SpawnRequest, Task, TaskKind, TaskStatus};

fn session_in(status: SessionStatus) -> Session {
    let mut session = Session::new(
        NewSession {
            user_id: "operator".into(),
            goal: "goal".into(),
            ..NewSession::default()
        },
        20,
    );
    session.status = status;
    session
}

#[test]
fn new_session_is_idle_with_default_budget() {
    let session = session_in(SessionStatus::Idle);
    assert_eq!(session.max_steps, 20);
    assert_eq!(session.current_step_number, 0);
    assert!(!session.auto_approve);

    let custom = Session::new(
        NewSession {
            max_steps: Some(3),
            ..NewSession::default()
        },
        20,
    );
    assert_eq!(custom.max_steps, 3);
}

#[test]
fn session_loop_transitions() {
    use SessionStatus::{
        Analyzing, AwaitingApproval, Completed, Executing, Failed, Idle, Stopped, Thinking,
    };
    let allowed = [
        (Idle, Thinking),
        (Thinking, AwaitingApproval),
        (Thinking, Executing),
        (Thinking, Completed),
        (AwaitingApproval, Executing),
        (AwaitingApproval, Analyzing),
        (Executing, Analyzing),
        (Analyzing, Thinking),
        (Idle, Stopped),
        (Executing, Failed),
    ];
    for (from, to) in allowed {
        assert!(session_in(from).can_transition_to(to), "{from:?} -> {to:?}");
    }

    let denied = [
        (Idle, Executing),
        (Analyzing, Completed),
        (Executing, Thinking),
        (Completed, Thinking),
        (Stopped, Failed),
        (Failed, Stopped),
    ];
    for (from, to) in denied {
        assert!(!session_in(from).can_transition_to(to), "{from:?} -> {to:?}");
    }
}

#[test]
fn step_transitions() {
    let action = AgentAction::Command {
        content: "uptime".into(),
        reasoning: "load".into(),
    };
    let mut step = Step::from_action("s-1", 1, &action);
    assert_eq!(step.status, StepStatus::Pending);
    assert!(step.can_transition_to(StepStatus::Approved));
    assert!(step.can_transition_to(StepStatus::Rejected));
    assert!(!step.can_transition_to(StepStatus::Executing));

    step.status = StepStatus::Approved;
    assert!(step.can_transition_to(StepStatus::Executing));
    assert!(!step.can_transition_to(StepStatus::Executed));

    step.status = StepStatus::Executing;
    assert!(step.can_transition_to(StepStatus::Executed));
    assert!(step.can_transition_to(StepStatus::Failed));

    step.status = StepStatus::Rejected;
    assert!(step.status.is_terminal());
    assert!(!step.can_transition_to(StepStatus::Approved));
}

#[test]
fn task_transitions_and_budget() {
    let mut task = Task::new("pool-1".into(), SpawnRequest::background("goal"), 7);
    assert_eq!(task.status, TaskStatus::Queued);
    assert_eq!(task.kind, TaskKind::Background);
    assert_eq!(task.max_iterations, 7);
    assert_eq!(task.iteration_budget(), 7);
    assert!(task.can_transition_to(TaskStatus::Running));
    assert!(task.can_transition_to(TaskStatus::Paused));
    assert!(!task.can_transition_to(TaskStatus::Completed));

    task.status = TaskStatus::Paused;
    assert!(task.can_transition_to(TaskStatus::Queued));
    assert!(!task.can_transition_to(TaskStatus::Running));

    task.status = TaskStatus::Running;
    assert!(task.can_transition_to(TaskStatus::Failed));
    assert!(!task.can_transition_to(TaskStatus::Paused));

    task.auto_iterate = false;
    assert_eq!(task.iteration_budget(), 1);

    let explicit = Task::new(
        "pool-1".into(),
        SpawnRequest {
            max_iterations: Some(2),
            ..SpawnRequest::background("goal").with_priority(9)
        },
        7,
    );
    assert_eq!(explicit.max_iterations, 2);
    assert_eq!(explicit.priority, 9);
}
