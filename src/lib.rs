#![forbid(unsafe_code)]

//! Orchestration engine for AI remediation agents: interactive sessions
//! with per-step approval, pooled background tasks and their persistence.

pub mod agent;
pub mod config;
pub mod errors;
pub mod integrations;
pub mod models;
pub mod notify;
pub mod orchestrator;
pub mod persistence;

pub use config::GlobalConfig;
pub use errors::{AppError, Result};
