//! Error types for the run orchestrator.
use data_migrator_repository::RepositoryError;
use thiserror::Error;

use crate::errors::MigrationError;

/// Represents errors that stop a run.
#[derive(Debug, Error)]
pub enum RunError {
    /// The named migration failed; later migrations were not started.
    #[error("Migration {name} failed: {source}")]
    Migration {
        name: String,
        #[source]
        source: MigrationError,
    },

    #[error("Repository error: {0}")]
    Repository(#[from] RepositoryError),
}

impl RunError {
    pub fn migration(name: impl Into<String>, source: MigrationError) -> Self {
        Self::Migration {
            name: name.into(),
            source,
        }
    }

    /// The underlying migration error, if a migration failed.
    pub fn migration_error(&self) -> Option<&MigrationError> {
        match self {
            Self::Migration { source, .. } => Some(source),
            Self::Repository(_) => None,
        }
    }
}
