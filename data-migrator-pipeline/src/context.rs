use std::sync::Arc;

use data_migrator_repository::{CacheStore, Database};

/// Connections and shared services handed to every migration.
///
/// `source` holds the legacy schema, `target` the new one. They may point at
/// the same database.
#[derive(Clone)]
pub struct MigrationContext {
    pub source: Arc<dyn Database>,
    pub target: Arc<dyn Database>,
    pub cache: Arc<dyn CacheStore>,
}

impl MigrationContext {
    pub fn new(
        source: Arc<dyn Database>,
        target: Arc<dyn Database>,
        cache: Arc<dyn CacheStore>,
    ) -> Self {
        Self {
            source,
            target,
            cache,
        }
    }
}
