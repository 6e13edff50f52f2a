//! In-process cache storage.
//!
//! Values live for the lifetime of the process; a run flushes its own tag at
//! start so stale server settings never leak across runs of a long-lived host.
use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tokio::time::Instant;

use crate::errors::RepositoryError;
use crate::interfaces::CacheStore;

struct CacheEntry {
    value: serde_json::Value,
    expires_at: Instant,
    tags: Vec<String>,
}

/// In-memory [`CacheStore`].
#[derive(Default)]
pub struct MemoryCache {
    entries: RwLock<HashMap<String, CacheEntry>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CacheStore for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<serde_json::Value>, RepositoryError> {
        let entries = self.entries.read().await;
        Ok(entries
            .get(key)
            .filter(|entry| entry.expires_at > Instant::now())
            .map(|entry| entry.value.clone()))
    }

    async fn put(
        &self,
        key: &str,
        value: serde_json::Value,
        ttl: Duration,
        tags: &[&str],
    ) -> Result<(), RepositoryError> {
        let mut entries = self.entries.write().await;
        entries.insert(
            key.to_string(),
            CacheEntry {
                value,
                expires_at: Instant::now() + ttl,
                tags: tags.iter().map(|tag| tag.to_string()).collect(),
            },
        );
        Ok(())
    }

    async fn invalidate_tag(&self, tag: &str) -> Result<usize, RepositoryError> {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, entry| !entry.tags.iter().any(|t| t == tag));
        Ok(before - entries.len())
    }
}
