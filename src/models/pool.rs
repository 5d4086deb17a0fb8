//! Agent pool model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Concurrency-bounded group of tasks sharing one owner.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct Pool {
    /// Unique record identifier.
    pub id: String,
    /// Chat/session that owns the pool.
    pub owner_id: String,
    /// Display name.
    pub name: String,
    /// Upper bound on simultaneously running tasks (at least 1).
    pub max_concurrent_agents: u32,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}

impl Pool {
    /// Construct a new pool with a generated identifier.
    #[must_use]
    pub fn new(owner_id: String, name: String, max_concurrent_agents: u32) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            owner_id,
            name,
            max_concurrent_agents,
            created_at: Utc::now(),
        }
    }
}
