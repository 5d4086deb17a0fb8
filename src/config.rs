//! Global configuration parsing and validation.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::{AppError, Result};

/// Interactive agent loop tuning.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct AgentConfig {
    /// Step budget applied when a session does not set its own.
    #[serde(default = "default_max_steps")]
    pub max_steps: u32,
    /// Pause between loop iterations, bounding the LLM call rate.
    #[serde(default = "default_iteration_delay_ms")]
    pub iteration_delay_ms: u64,
    /// Number of knowledge snippets injected on the first step.
    #[serde(default = "default_knowledge_top_k")]
    pub knowledge_top_k: usize,
    /// Number of historically resolved alerts included in the prompt.
    #[serde(default = "default_resolved_alert_limit")]
    pub resolved_alert_limit: usize,
    /// Window used when similarity search over resolved alerts is unavailable.
    #[serde(default = "default_alert_history_days")]
    pub alert_history_days: u32,
    /// Characters kept from the start of an oversized transcript entry.
    #[serde(default = "default_output_chars")]
    pub output_head_chars: usize,
    /// Characters kept from the end of an oversized transcript entry.
    #[serde(default = "default_output_chars")]
    pub output_tail_chars: usize,
}

fn default_max_steps() -> u32 {
    20
}

fn default_iteration_delay_ms() -> u64 {
    500
}

fn default_knowledge_top_k() -> usize {
    3
}

fn default_resolved_alert_limit() -> usize {
    5
}

fn default_alert_history_days() -> u32 {
    7
}

fn default_output_chars() -> usize {
    1000
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_steps: default_max_steps(),
            iteration_delay_ms: default_iteration_delay_ms(),
            knowledge_top_k: default_knowledge_top_k(),
            resolved_alert_limit: default_resolved_alert_limit(),
            alert_history_days: default_alert_history_days(),
            output_head_chars: default_output_chars(),
            output_tail_chars: default_output_chars(),
        }
    }
}

/// Configurable timeout values (seconds).
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct TimeoutConfig {
    /// Per-command execution timeout.
    #[serde(default = "default_command_seconds")]
    pub command_seconds: u64,
    /// Wait for an operator answer to a `question` step; 0 means no timeout.
    #[serde(default)]
    pub question_seconds: u64,
}

fn default_command_seconds() -> u64 {
    60
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            command_seconds: default_command_seconds(),
            question_seconds: 0,
        }
    }
}

/// Pool scheduler defaults.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct SchedulerConfig {
    /// Iteration budget for spawned tasks that do not set one.
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
    /// How long `shutdown` waits for cancelled tasks to unwind.
    #[serde(default = "default_shutdown_grace_seconds")]
    pub shutdown_grace_seconds: u64,
}

fn default_max_iterations() -> u32 {
    10
}

fn default_shutdown_grace_seconds() -> u64 {
    5
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            shutdown_grace_seconds: default_shutdown_grace_seconds(),
        }
    }
}

/// Commands that background agents must propose instead of running.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct RiskConfig {
    /// Case-insensitive regular expressions matched against each command.
    #[serde(default = "default_high_risk_patterns")]
    pub high_risk_patterns: Vec<String>,
}

fn default_high_risk_patterns() -> Vec<String> {
    [
        r"\brm\s+-[a-z]*r[a-z]*f",
        r"\brm\s+-[a-z]*f[a-z]*r",
        r"\bmkfs(\.\w+)?\b",
        r"\bdd\s+if=",
        r"\b(shutdown|reboot|halt|poweroff)\b",
        r"\bdrop\s+(table|database)\b",
        r"\btruncate\s+table\b",
        r"\bformat\s+[a-z]:",
        r"\bsystemctl\s+(stop|disable)\b",
        r"\bkill\s+-9\s+1\b",
    ]
    .iter()
    .map(|p| (*p).to_owned())
    .collect()
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            high_risk_patterns: default_high_risk_patterns(),
        }
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from("remediation-engine.db")
}

fn default_retention_days() -> u32 {
    30
}

/// Global configuration parsed from `config.toml`.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct GlobalConfig {
    /// `SQLite` database file.
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,
    /// Days after a session or task ends before its records are purged.
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,
    /// Interactive loop tuning.
    #[serde(default)]
    pub agent: AgentConfig,
    /// Timeout configuration.
    #[serde(default)]
    pub timeouts: TimeoutConfig,
    /// Scheduler defaults.
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    /// High-risk command detection.
    #[serde(default)]
    pub risk: RiskConfig,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            retention_days: default_retention_days(),
            agent: AgentConfig::default(),
            timeouts: TimeoutConfig::default(),
            scheduler: SchedulerConfig::default(),
            risk: RiskConfig::default(),
        }
    }
}

impl GlobalConfig {
    /// Load and validate configuration from a TOML file path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read or contains
    /// invalid TOML, or if validation fails.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| AppError::Config(format!("failed to read config: {err}")))?;
        Self::from_toml_str(&raw)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Per-command execution timeout.
    #[must_use]
    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.timeouts.command_seconds)
    }

    /// Operator answer timeout, `None` when questions wait indefinitely.
    #[must_use]
    pub fn question_timeout(&self) -> Option<Duration> {
        match self.timeouts.question_seconds {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }

    /// Delay inserted between loop iterations.
    #[must_use]
    pub fn iteration_delay(&self) -> Duration {
        Duration::from_millis(self.agent.iteration_delay_ms)
    }

    fn validate(&self) -> Result<()> {
        if self.agent.max_steps == 0 {
            return Err(AppError::Config(
                "agent.max_steps must be greater than zero".into(),
            ));
        }

        if self.scheduler.max_iterations == 0 {
            return Err(AppError::Config(
                "scheduler.max_iterations must be greater than zero".into(),
            ));
        }

        if self.timeouts.command_seconds == 0 {
            return Err(AppError::Config(
                "timeouts.command_seconds must be greater than zero".into(),
            ));
        }

        for pattern in &self.risk.high_risk_patterns {
            regex::Regex::new(pattern).map_err(|err| {
                AppError::Config(format!("invalid high_risk_patterns entry `{pattern}`: {err}"))
            })?;
        }

        Ok(())
    }
}
