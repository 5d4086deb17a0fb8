use remediation_engine::models::iteration::{classify_error, ErrorType, Iteration};

#[test]
fn clean_output_with_zero_exit_is_not_an_error() {
    assert_eq!(classify_error(Some(0), "all good"), None);
    assert_eq!(classify_error(None, "[PROPOSED FOR APPROVAL: rm -rf /]"), None);
}

#[test]
fn phrases_are_classified_case_insensitively() {
    assert_eq!(
        classify_error(Some(1), "bash: /root/x: Permission denied"),
        Some(ErrorType::PermissionDenied)
    );
    assert_eq!(
        classify_error(Some(127), "bash: foo: command not found"),
        Some(ErrorType::FileNotFound)
    );
    assert_eq!(
        classify_error(Some(2), "ls: cannot access 'x': No such file or directory"),
        Some(ErrorType::FileNotFound)
    );
    assert_eq!(
        classify_error(Some(2), "bash: syntax error near unexpected token"),
        Some(ErrorType::SyntaxError)
    );
    assert_eq!(
        classify_error(Some(124), "ssh: connect to host web-01: Connection TIMEOUT"),
        Some(ErrorType::Timeout)
    );
}

#[test]
fn nonzero_exit_without_known_phrase_is_runtime_error() {
    assert_eq!(classify_error(Some(3), "segfault"), Some(ErrorType::RuntimeError));
    assert_eq!(classify_error(Some(-1), ""), Some(ErrorType::RuntimeError));
}

#[test]
fn failure_phrase_with_zero_exit_is_still_flagged() {
    assert_eq!(
        classify_error(Some(0), "warning: permission denied for one file"),
        Some(ErrorType::PermissionDenied)
    );
}

#[test]
fn unexecuted_command_is_never_flagged() {
    let iteration = Iteration::record(
        "task-1",
        1,
        "grep 'not found' /var/log/syslog".into(),
        "[PROPOSED FOR APPROVAL: grep 'not found' /var/log/syslog]".into(),
        None,
    );
    assert!(!iteration.error_detected);
    assert_eq!(iteration.error_type, None);
}

#[test]
fn record_sets_detection_flag() {
    let iteration = Iteration::record("task-1", 2, "cat x".into(), "No such file".into(), Some(1));
    assert_eq!(iteration.iteration_number, 2);
    assert!(iteration.error_detected);
    assert_eq!(iteration.error_type, Some(ErrorType::FileNotFound));
    assert_eq!(ErrorType::from_name(ErrorType::FileNotFound.as_str()), Some(ErrorType::FileNotFound));
}
