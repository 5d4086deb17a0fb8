use remediation_engine::config::RiskConfig;
use remediation_engine::orchestrator::risk::RiskPolicy;

fn default_policy() -> RiskPolicy {
    RiskPolicy::from_config(&RiskConfig::default()).expect("default patterns compile")
}

#[test]
fn destructive_commands_are_high_risk() {
    let policy = default_policy();
    for command in [
        "rm -rf /var/log/nginx",
        "sudo rm -fr /tmp/cache",
        "mkfs.ext4 /dev/sdb1",
        "dd if=/dev/zero of=/dev/sda",
        "sudo reboot",
        "psql -c 'DROP TABLE users'",
        "systemctl stop postgresql",
    ] {
        let verdict = policy.check(command);
        assert!(verdict.high_risk, "{command}");
        assert!(verdict.matched_pattern.is_some(), "{command}");
    }
}

#[test]
fn diagnostics_are_not_high_risk() {
    let policy = default_policy();
    for command in [
        "df -h",
        "systemctl status nginx",
        "journalctl -u nginx --since today",
        "rm /tmp/lockfile",
        "ls -rf /tmp",
    ] {
        let verdict = policy.check(command);
        assert!(!verdict.high_risk, "{command}");
        assert_eq!(verdict.matched_pattern, None);
    }
}

#[test]
fn custom_patterns_match_case_insensitively() {
    let config = RiskConfig {
        high_risk_patterns: vec![r"\biptables\s+-F\b".into()],
    };
    let policy = RiskPolicy::from_config(&config).expect("compiles");
    let verdict = policy.check("IPTABLES -f");
    assert!(verdict.high_risk);
    assert_eq!(verdict.matched_pattern.as_deref(), Some(r"\biptables\s+-F\b"));
    assert!(!policy.check("rm -rf /").high_risk);
}

#[test]
fn invalid_pattern_fails_to_compile() {
    let config = RiskConfig {
        high_risk_patterns: vec!["[unterminated".into()],
    };
    assert!(RiskPolicy::from_config(&config).is_err());
}
