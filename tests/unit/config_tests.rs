use std::io::Write;
use std::time::Duration;

use remediation_engine::{AppError, GlobalConfig};

#[test]
fn empty_file_yields_defaults() {
    let config = GlobalConfig::from_toml_str("").expect("defaults are valid");
    assert_eq!(config, GlobalConfig::default());
    assert_eq!(config.agent.max_steps, 20);
    assert_eq!(config.scheduler.max_iterations, 10);
    assert_eq!(config.retention_days, 30);
    assert_eq!(config.command_timeout(), Duration::from_secs(60));
    assert_eq!(config.question_timeout(), None);
    assert!(!config.risk.high_risk_patterns.is_empty());
}

#[test]
fn overrides_are_applied() {
    let toml = r#"
db_path = "data/engine.db"
retention_days = 7

[agent]
max_steps = 8
iteration_delay_ms = 50
output_head_chars = 200
output_tail_chars = 100

[timeouts]
command_seconds = 30
question_seconds = 600

[scheduler]
max_iterations = 4

[risk]
high_risk_patterns = ['\bshred\b']
"#;
    let config = GlobalConfig::from_toml_str(toml).expect("valid config");
    assert_eq!(config.db_path.to_str(), Some("data/engine.db"));
    assert_eq!(config.retention_days, 7);
    assert_eq!(config.agent.max_steps, 8);
    assert_eq!(config.iteration_delay(), Duration::from_millis(50));
    assert_eq!(config.agent.output_head_chars, 200);
    assert_eq!(config.agent.output_tail_chars, 100);
    assert_eq!(config.command_timeout(), Duration::from_secs(30));
    assert_eq!(config.question_timeout(), Some(Duration::from_secs(600)));
    assert_eq!(config.scheduler.max_iterations, 4);
    assert_eq!(config.risk.high_risk_patterns, vec![r"\bshred\b".to_owned()]);
}

#[test]
fn zero_budgets_are_rejected() {
    for toml in [
        "[agent]\nmax_steps = 0\n",
        "[scheduler]\nmax_iterations = 0\n",
        "[timeouts]\ncommand_seconds = 0\n",
    ] {
        let err = GlobalConfig::from_toml_str(toml).expect_err("zero must be rejected");
        assert!(matches!(err, AppError::Config(_)), "{toml}: {err}");
    }
}

#[test]
fn invalid_risk_pattern_is_rejected() {
    let err = GlobalConfig::from_toml_str("[risk]\nhigh_risk_patterns = ['(unclosed']\n")
        .expect_err("bad regex");
    assert!(err.to_string().contains("(unclosed"));
}

#[test]
fn malformed_toml_is_a_config_error() {
    let err = GlobalConfig::from_toml_str("retention_days = \"soon\"").expect_err("bad type");
    assert!(matches!(err, AppError::Config(_)));
}

#[test]
fn load_from_path_reads_the_file() {
    let mut file = tempfile::NamedTempFile::new().expect("temp file");
    writeln!(file, "retention_days = 3").expect("write");
    let config = GlobalConfig::load_from_path(file.path()).expect("load");
    assert_eq!(config.retention_days, 3);

    let err = GlobalConfig::load_from_path("/definitely/not/here.toml").expect_err("missing");
    assert!(matches!(err, AppError::Config(_)));
}
