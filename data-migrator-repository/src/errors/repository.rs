//! Repository error types.
//!
//! One error type covers every capability so the engine can wrap repository
//! failures without caring which backend produced them.
use thiserror::Error;

/// Represents errors that can occur within a database capability.
#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("Database error: {0}")]
    DatabaseError(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Unknown table: {0}")]
    UnknownTable(String),

    #[error("Unknown column `{column}` on table `{table}`")]
    UnknownColumn { table: String, column: String },

    #[error("Duplicate entry `{key}` for table `{table}`")]
    DuplicateKey { table: String, key: String },

    #[error("Decode error: {0}")]
    DecodeError(String),

    #[error("Invalid statement: {0}")]
    InvalidStatement(String),
}

impl RepositoryError {
    /// Create an unknown table error.
    pub fn unknown_table(table: impl Into<String>) -> Self {
        Self::UnknownTable(table.into())
    }

    /// Create an unknown column error.
    pub fn unknown_column(table: impl Into<String>, column: impl Into<String>) -> Self {
        Self::UnknownColumn {
            table: table.into(),
            column: column.into(),
        }
    }

    /// Create a duplicate key error.
    pub fn duplicate_key(table: impl Into<String>, key: impl Into<String>) -> Self {
        Self::DuplicateKey {
            table: table.into(),
            key: key.into(),
        }
    }

    /// Create a decode error.
    pub fn decode(msg: impl Into<String>) -> Self {
        Self::DecodeError(msg.into())
    }

    /// Create an invalid statement error.
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidStatement(msg.into())
    }
}
