//! Lazy page-at-a-time reading of a select query.
use data_migrator_shared::{Row, SelectQuery};

use crate::errors::RepositoryError;
use crate::interfaces::QueryExecutor;

/// Streams a query in pages of `page_size` rows using `ORDER BY` plus
/// `LIMIT/OFFSET`. Only one page is held in memory at a time.
pub struct Pager<'a, E: QueryExecutor + ?Sized> {
    executor: &'a E,
    query: SelectQuery,
    page_size: u64,
    offset: u64,
    exhausted: bool,
}

impl<'a, E: QueryExecutor + ?Sized> Pager<'a, E> {
    /// Orders the query by `order_column` unless it already carries an
    /// ordering.
    pub fn new(
        executor: &'a E,
        mut query: SelectQuery,
        order_column: &str,
        page_size: usize,
    ) -> Self {
        if query.order_by.is_empty() {
            query.order_by.push(order_column.to_string());
        }
        Self {
            executor,
            query,
            page_size: page_size.max(1) as u64,
            offset: 0,
            exhausted: false,
        }
    }

    /// Fetches the next page, `None` once the query is drained.
    pub async fn next_page(&mut self) -> Result<Option<Vec<Row>>, RepositoryError> {
        if self.exhausted {
            return Ok(None);
        }

        let rows = self
            .executor
            .fetch_page(&self.query, self.offset, self.page_size)
            .await?;
        self.offset += rows.len() as u64;

        if (rows.len() as u64) < self.page_size {
            self.exhausted = true;
        }
        if rows.is_empty() {
            return Ok(None);
        }
        Ok(Some(rows))
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }
}
