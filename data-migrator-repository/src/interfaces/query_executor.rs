use async_trait::async_trait;
use data_migrator_shared::{Filter, Row, SelectQuery, Value};

use crate::errors::RepositoryError;

/// Reads and writes rows on one database connection.
///
/// Every statement runs on whatever pooled connection is free; use a
/// [`WriteSession`](crate::WriteSession) when statements have to share
/// session state.
#[async_trait]
pub trait QueryExecutor: Send + Sync {
    /// Runs `query` and returns at most `limit` rows starting at `offset`.
    async fn fetch_page(
        &self,
        query: &SelectQuery,
        offset: u64,
        limit: u64,
    ) -> Result<Vec<Row>, RepositoryError>;

    /// Number of rows `query` yields.
    async fn count(&self, query: &SelectQuery) -> Result<u64, RepositoryError>;

    /// Largest value of `column`, `None` when the table is empty.
    async fn max(&self, table: &str, column: &str) -> Result<Option<Value>, RepositoryError>;

    /// Values of `column` for up to `limit` rows of `table` matching every
    /// filter.
    async fn first_value(
        &self,
        table: &str,
        filters: &[Filter],
        column: &str,
        limit: u64,
    ) -> Result<Vec<Value>, RepositoryError>;

    /// Inserts rows and returns the number of rows written.
    async fn insert(&self, table: &str, rows: &[Row]) -> Result<u64, RepositoryError>;

    /// Deletes every row matching all filters and returns how many went.
    async fn delete(&self, table: &str, filters: &[Filter]) -> Result<u64, RepositoryError>;

    /// Sets `values` on every row matching all filters.
    async fn update(
        &self,
        table: &str,
        filters: &[Filter],
        values: &Row,
    ) -> Result<u64, RepositoryError>;

    /// Executes a statement verbatim.
    async fn execute_raw(&self, sql: &str) -> Result<u64, RepositoryError>;
}
