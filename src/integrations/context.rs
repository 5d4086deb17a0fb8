//! Operational context sources consulted when building prompts.

use chrono::{DateTime, Utc};

use super::BoxFuture;
use crate::models::context::{Alert, KnowledgeSnippet, TargetServer};
use crate::Result;

/// Ranked search over the knowledge base.
pub trait KnowledgeSearch: Send + Sync {
    /// Up to `limit` snippets most similar to `query`, best first.
    ///
    /// # Errors
    ///
    /// Returns an error if the search backend fails.
    fn search_similar<'a>(
        &'a self,
        query: &'a str,
        limit: usize,
    ) -> BoxFuture<'a, Result<Vec<KnowledgeSnippet>>>;
}

/// Target metadata and alert history.
pub trait OpsContext: Send + Sync {
    /// Metadata for a target server.
    ///
    /// # Errors
    ///
    /// Returns an error if the lookup fails.
    fn target<'a>(&'a self, server_id: &'a str) -> BoxFuture<'a, Result<Option<TargetServer>>>;

    /// Alerts currently open on a target.
    ///
    /// # Errors
    ///
    /// Returns an error if the lookup fails.
    fn open_alerts<'a>(&'a self, server_id: &'a str) -> BoxFuture<'a, Result<Vec<Alert>>>;

    /// Resolved alerts similar to `query`, best first.
    ///
    /// # Errors
    ///
    /// Returns an error if similarity search is unavailable; callers fall
    /// back to [`resolved_alerts_since`](Self::resolved_alerts_since).
    fn similar_resolved_alerts<'a>(
        &'a self,
        query: &'a str,
        limit: usize,
    ) -> BoxFuture<'a, Result<Vec<Alert>>>;

    /// Alerts resolved on a target since `since`, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the lookup fails.
    fn resolved_alerts_since<'a>(
        &'a self,
        server_id: Option<&'a str>,
        since: DateTime<Utc>,
        limit: usize,
    ) -> BoxFuture<'a, Result<Vec<Alert>>>;
}

/// Context source with nothing in it.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoContext;

impl KnowledgeSearch for NoContext {
    fn search_similar<'a>(
        &'a self,
        _query: &'a str,
        _limit: usize,
    ) -> BoxFuture<'a, Result<Vec<KnowledgeSnippet>>> {
        Box::pin(async { Ok(Vec::new()) })
    }
}

impl OpsContext for NoContext {
    fn target<'a>(&'a self, _server_id: &'a str) -> BoxFuture<'a, Result<Option<TargetServer>>> {
        Box::pin(async { Ok(None) })
    }

    fn open_alerts<'a>(&'a self, _server_id: &'a str) -> BoxFuture<'a, Result<Vec<Alert>>> {
        Box::pin(async { Ok(Vec::new()) })
    }

    fn similar_resolved_alerts<'a>(
        &'a self,
        _query: &'a str,
        _limit: usize,
    ) -> BoxFuture<'a, Result<Vec<Alert>>> {
        Box::pin(async { Ok(Vec::new()) })
    }

    fn resolved_alerts_since<'a>(
        &'a self,
        _server_id: Option<&'a str>,
        _since: DateTime<Utc>,
        _limit: usize,
    ) -> BoxFuture<'a, Result<Vec<Alert>>> {
        Box::pin(async { Ok(Vec::new()) })
    }
}
