use std::time::Duration;

use async_trait::async_trait;

use crate::errors::RepositoryError;

/// Keyed values with a time to live and tag-scoped invalidation.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Returns the value stored under `key` unless it has expired.
    async fn get(&self, key: &str) -> Result<Option<serde_json::Value>, RepositoryError>;

    async fn put(
        &self,
        key: &str,
        value: serde_json::Value,
        ttl: Duration,
        tags: &[&str],
    ) -> Result<(), RepositoryError>;

    /// Drops every entry carrying `tag` and returns how many were dropped.
    async fn invalidate_tag(&self, tag: &str) -> Result<usize, RepositoryError>;
}
