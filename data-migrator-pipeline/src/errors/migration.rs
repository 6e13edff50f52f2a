//! Error types for a single migration.
//! Every variant except `RelationResolution` in non-strict runs is fatal for
//! the migration that raised it.
use data_migrator_repository::RepositoryError;
use thiserror::Error;

/// Represents errors that can occur while running one migration.
#[derive(Debug, Error)]
pub enum MigrationError {
    /// Missing or contradictory migration setup; never retried.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The column map does not match the new table.
    #[error("Map integrity check failed for {migration}: {}", format_mismatches(.mismatches))]
    Integrity {
        migration: String,
        mismatches: Vec<(String, String)>,
    },

    #[error("Relation resolution error: {0}")]
    RelationResolution(String),

    /// Inserting migrated rows failed.
    #[error("Problem inserting migration data for {migration}: {source}")]
    Write {
        migration: String,
        #[source]
        source: RepositoryError,
    },

    #[error("Schema introspection error: {0}")]
    SchemaIntrospection(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Repository error: {0}")]
    Repository(#[from] RepositoryError),
}

fn format_mismatches(mismatches: &[(String, String)]) -> String {
    mismatches
        .iter()
        .map(|(old, new)| format!("{old} -> {new}"))
        .collect::<Vec<_>>()
        .join(", ")
}

impl MigrationError {
    /// Create a configuration error.
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// Create an integrity error from `(old column, new column)` pairs.
    pub fn integrity(migration: impl Into<String>, mismatches: Vec<(String, String)>) -> Self {
        Self::Integrity {
            migration: migration.into(),
            mismatches,
        }
    }

    /// Create a relation resolution error.
    pub fn relation_resolution(msg: impl Into<String>) -> Self {
        Self::RelationResolution(msg.into())
    }

    /// Wrap a failed insert with the migration it belongs to.
    pub fn write(migration: impl Into<String>, source: RepositoryError) -> Self {
        Self::Write {
            migration: migration.into(),
            source,
        }
    }

    /// Create a schema introspection error.
    pub fn schema_introspection(msg: impl Into<String>) -> Self {
        Self::SchemaIntrospection(msg.into())
    }
}
