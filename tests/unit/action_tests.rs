use remediation_engine::models::action::AgentAction;
use remediation_engine::models::step::StepType;
use remediation_engine::AppError;

#[test]
fn every_action_kind_decodes() {
    for (name, step_type) in [
        ("command", StepType::Command),
        ("question", StepType::Question),
        ("complete", StepType::Complete),
        ("failed", StepType::Failed),
    ] {
        let reply = format!(r#"{{"action":"{name}","content":"x","reasoning":"y"}}"#);
        let action = AgentAction::parse(&reply).expect("valid action");
        assert_eq!(action.step_type(), step_type);
        assert_eq!(action.name(), name);
    }
}

#[test]
fn fenced_reply_with_surrounding_whitespace_decodes() {
    let reply = "\n```\n{\"action\":\"question\",\"content\":\"which host?\",\"reasoning\":\"ambiguous\"}\n```\n";
    let action = AgentAction::parse(reply).expect("valid");
    assert_eq!(action.content(), "which host?");
}

#[test]
fn malformed_replies_are_parse_errors() {
    for reply in [
        "",
        "   ",
        "restart nginx",
        r#"{"action":"reboot","content":"now","reasoning":"why not"}"#,
        r#"{"action":"command","reasoning":"no content"}"#,
        r#"{"action":"command","content":"uptime"#,
    ] {
        let err = AgentAction::parse(reply).expect_err(reply);
        assert!(matches!(err, AppError::Parse(_)), "{reply}: {err}");
    }
}
