use async_trait::async_trait;
use data_migrator_shared::{ColumnDefinition, ColumnKind, TableDefinition};

use crate::errors::RepositoryError;

/// Schema introspection and DDL on one database connection.
#[async_trait]
pub trait SchemaCatalog: Send + Sync {
    /// Whether the database the connection points at exists.
    async fn database_exists(&self) -> Result<bool, RepositoryError>;

    /// Column names of `table` in ordinal order. Empty when the table does
    /// not exist.
    async fn list_columns(&self, table: &str) -> Result<Vec<String>, RepositoryError>;

    async fn has_table(&self, table: &str) -> Result<bool, RepositoryError>;

    async fn has_column(&self, table: &str, column: &str) -> Result<bool, RepositoryError>;

    /// Type of `table.column`, `None` when the column does not exist.
    async fn column_kind(
        &self,
        table: &str,
        column: &str,
    ) -> Result<Option<ColumnKind>, RepositoryError>;

    /// Adds a column, honoring the position hint and creating an index when
    /// requested.
    async fn add_column(
        &self,
        table: &str,
        column: &ColumnDefinition,
    ) -> Result<(), RepositoryError>;

    /// Changes the type and nullability of an existing column.
    async fn change_column(
        &self,
        table: &str,
        column: &ColumnDefinition,
    ) -> Result<(), RepositoryError>;

    /// Creates the table unless it already exists.
    async fn create_table(&self, table: &TableDefinition) -> Result<(), RepositoryError>;
}
