//! Agent pool repository for `SQLite` persistence.

use std::sync::Arc;

use crate::models::pool::Pool;
use crate::Result;

use super::db::Database;
use super::{fmt_ts, parse_ts, to_u32};

/// Repository wrapper around `SQLite` for pool records.
#[derive(Clone)]
pub struct PoolRepo {
    db: Arc<Database>,
}

/// Internal row struct for `SQLite` deserialization.
#[derive(sqlx::FromRow)]
struct PoolRow {
    id: String,
    owner_id: String,
    name: String,
    max_concurrent_agents: i64,
    created_at: String,
}

impl PoolRow {
    fn into_pool(self) -> Result<Pool> {
        Ok(Pool {
            max_concurrent_agents: to_u32("max_concurrent_agents", self.max_concurrent_agents)?,
            created_at: parse_ts("created_at", &self.created_at)?,
            id: self.id,
            owner_id: self.owner_id,
            name: self.name,
        })
    }
}

impl PoolRepo {
    /// Create a new repository instance.
    #[must_use]
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Insert a new pool record.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the database insert fails.
    pub async fn create(&self, pool: &Pool) -> Result<Pool> {
        sqlx::query(
            "INSERT INTO agent_pool (id, owner_id, name, max_concurrent_agents, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
        )
        .bind(&pool.id)
        .bind(&pool.owner_id)
        .bind(&pool.name)
        .bind(i64::from(pool.max_concurrent_agents))
        .bind(fmt_ts(pool.created_at))
        .execute(self.db.as_ref())
        .await?;

        Ok(pool.clone())
    }

    /// Retrieve a pool by identifier.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn get_by_id(&self, id: &str) -> Result<Option<Pool>> {
        let row: Option<PoolRow> = sqlx::query_as("SELECT * FROM agent_pool WHERE id = ?1")
            .bind(id)
            .fetch_optional(self.db.as_ref())
            .await?;

        row.map(PoolRow::into_pool).transpose()
    }

    /// Retrieve the most recent pool owned by a chat/session.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn get_by_owner(&self, owner_id: &str) -> Result<Option<Pool>> {
        let row: Option<PoolRow> = sqlx::query_as(
            "SELECT * FROM agent_pool WHERE owner_id = ?1 ORDER BY created_at DESC LIMIT 1",
        )
        .bind(owner_id)
        .fetch_optional(self.db.as_ref())
        .await?;

        row.map(PoolRow::into_pool).transpose()
    }
}
