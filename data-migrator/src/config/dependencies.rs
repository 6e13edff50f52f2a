//! Dependency initialization and wiring for the data migrator.

use std::sync::Arc;

use data_migrator_pipeline::{LogProgress, MigrationContext, MigrationRunner};
use data_migrator_repository::{Database, MemoryCache, MySqlDatabase};
use tracing::info;

use super::{MigrationsFile, Settings};
use crate::errors::AppError;

/// Container for all initialized dependencies.
pub struct Dependencies {
    /// The configured runner, ready to run.
    pub runner: MigrationRunner,
}

impl Dependencies {
    /// Loads the migrations file and connects both databases.
    ///
    /// # Arguments
    ///
    /// * `settings` - Connection and file settings read from the environment
    ///
    /// # Returns
    ///
    /// * `Ok(Dependencies)` - Initialized dependencies
    /// * `Err(AppError)` - If the migrations file is invalid or a database
    ///   cannot be reached
    pub async fn new(settings: &Settings) -> Result<Self, AppError> {
        info!(
            path = %settings.migrations_config.display(),
            "Loading migrations file"
        );
        let manager = MigrationsFile::load(&settings.migrations_config)?.into_manager()?;

        info!(
            max_connections = settings.max_connections,
            same_database = settings.same_database(),
            "Connecting to databases"
        );
        let target: Arc<dyn Database> = Arc::new(
            MySqlDatabase::connect(&settings.target_url, settings.max_connections).await?,
        );
        let source: Arc<dyn Database> = if settings.same_database() {
            target.clone()
        } else {
            Arc::new(MySqlDatabase::connect(&settings.source_url, settings.max_connections).await?)
        };

        let context = MigrationContext::new(source, target, Arc::new(MemoryCache::new()));
        let runner = MigrationRunner::new(manager, context, Arc::new(LogProgress::new()));

        Ok(Self { runner })
    }
}
