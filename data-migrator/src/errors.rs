//! Error types for the data migrator binary.
use data_migrator_pipeline::{MigrationError, RunError};
use data_migrator_repository::RepositoryError;
use thiserror::Error;

/// Errors that can occur while starting or running the migrator.
#[derive(Error, Debug)]
pub enum AppError {
    /// Missing environment or invalid migration definitions.
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid migrations file: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Run failed: {0}")]
    Run(#[from] RunError),

    #[error("Database error: {0}")]
    Repository(#[from] RepositoryError),
}

impl AppError {
    /// Create a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }
}

impl From<MigrationError> for AppError {
    fn from(err: MigrationError) -> Self {
        Self::Config(err.to_string())
    }
}
