use async_trait::async_trait;
use data_migrator_shared::Row;

use crate::errors::RepositoryError;
use crate::interfaces::{QueryExecutor, SchemaCatalog};

/// Conflict policy of a multi-row insert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InsertMode {
    /// Any uniqueness violation fails the statement.
    #[default]
    Plain,
    /// Rows violating a uniqueness constraint are skipped silently.
    IgnoreDuplicates,
}

/// A database connection the migration engine can read from and write to.
#[async_trait]
pub trait Database: SchemaCatalog + QueryExecutor {
    /// Largest statement, in bytes, the server accepts.
    async fn max_statement_bytes(&self) -> Result<u64, RepositoryError>;

    /// Pins one connection and suspends foreign key checks on it until the
    /// returned session is closed.
    async fn open_write_session(&self) -> Result<Box<dyn WriteSession>, RepositoryError>;
}

/// Inserts issued on a single connection with foreign key checks suspended.
///
/// Callers must call [`close`](WriteSession::close) on every path, including
/// after a failed insert, to restore the checks.
#[async_trait]
pub trait WriteSession: Send {
    /// Inserts rows as one statement per distinct column set and returns the
    /// number of rows the server reports as written.
    async fn insert(
        &mut self,
        table: &str,
        rows: &[Row],
        mode: InsertMode,
    ) -> Result<u64, RepositoryError>;

    /// Restores foreign key checks and releases the connection.
    async fn close(&mut self) -> Result<(), RepositoryError>;
}
