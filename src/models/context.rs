//! Read-only operational context consumed when building agent prompts.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Metadata about the server an agent operates on.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct TargetServer {
    /// Identifier.
    pub id: String,
    /// Host name or address.
    pub hostname: String,
    /// Operating system family and version.
    pub os: Option<String>,
    /// Environment label (`prod`, `staging`, …).
    pub environment: Option<String>,
    /// Free-form description.
    pub description: Option<String>,
}

/// An alert raised against a server.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Alert {
    /// Identifier.
    pub id: String,
    /// Short title.
    pub title: String,
    /// Severity label.
    pub severity: String,
    /// Alert status (`open`, `resolved`, …).
    pub status: String,
    /// When the alert fired.
    pub created_at: DateTime<Utc>,
    /// Resolution notes for resolved alerts.
    pub resolution: Option<String>,
}

/// A ranked knowledge base excerpt.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct KnowledgeSnippet {
    /// Document title.
    pub title: String,
    /// Excerpt text.
    pub content: String,
    /// Similarity score, higher is closer.
    pub score: f32,
}
