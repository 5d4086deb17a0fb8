//! High-risk command detection for unattended background runs.
//!
//! Patterns come from `[risk] high_risk_patterns` and are compiled once into
//! a case-insensitive [`RegexSet`]. A background agent never executes a
//! command that matches; it is handed to the proposal sink instead.

use regex::{RegexSet, RegexSetBuilder};
use tracing::{info, info_span};

use crate::config::RiskConfig;
use crate::{AppError, Result};

/// Outcome of a risk check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RiskVerdict {
    /// Whether the command must not run unattended.
    pub high_risk: bool,
    /// The first pattern that matched, if any.
    pub matched_pattern: Option<String>,
}

/// Compiled high-risk command patterns.
#[derive(Debug, Clone)]
pub struct RiskPolicy {
    patterns: Vec<String>,
    set: RegexSet,
}

impl RiskPolicy {
    /// Compile the configured patterns.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if any pattern is not a valid regex.
    pub fn from_config(config: &RiskConfig) -> Result<Self> {
        let set = RegexSetBuilder::new(&config.high_risk_patterns)
            .case_insensitive(true)
            .build()
            .map_err(|err| AppError::Config(format!("invalid high-risk pattern: {err}")))?;
        Ok(Self {
            patterns: config.high_risk_patterns.clone(),
            set,
        })
    }

    /// Classify `command`.
    #[must_use]
    pub fn check(&self, command: &str) -> RiskVerdict {
        let _span = info_span!("risk_check").entered();

        let matched_pattern = self
            .set
            .matches(command)
            .iter()
            .next()
            .and_then(|idx| self.patterns.get(idx).cloned());

        if let Some(ref pattern) = matched_pattern {
            info!(%pattern, "command matched high-risk pattern");
        }

        RiskVerdict {
            high_risk: matched_pattern.is_some(),
            matched_pattern,
        }
    }
}
