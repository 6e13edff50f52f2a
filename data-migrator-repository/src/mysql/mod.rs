//! MySQL implementation of the database capabilities.
//!
//! Statements are built at runtime from the backend-neutral query
//! descriptors, so no compile-time database connection is needed.
mod decode;
mod session;
pub mod sql;

use async_trait::async_trait;
use data_migrator_shared::{
    ColumnDefinition, ColumnKind, Filter, Row, SelectQuery, TableDefinition, Value,
};
use sqlx::mysql::{MySqlPool, MySqlPoolOptions, MySqlRow};
use sqlx::{Executor, Row as _};
use tracing::debug;

use crate::errors::RepositoryError;
use crate::interfaces::{Database, InsertMode, QueryExecutor, SchemaCatalog, WriteSession};
use decode::{bind_all, decode_row, first_column};
pub use session::MySqlWriteSession;
use sql::Statement;

/// MySQL-backed database.
#[derive(Clone)]
pub struct MySqlDatabase {
    pool: MySqlPool,
}

impl MySqlDatabase {
    /// Connects a pool of at most `max_connections` connections.
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self, RepositoryError> {
        let pool = MySqlPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await?;
        Ok(Self { pool })
    }

    pub fn from_pool(pool: MySqlPool) -> Self {
        Self { pool }
    }

    async fn fetch_all(&self, statement: &Statement) -> Result<Vec<MySqlRow>, RepositoryError> {
        Ok(bind_all(&statement.sql, &statement.params)
            .fetch_all(&self.pool)
            .await?)
    }

    async fn fetch_scalar(&self, statement: &Statement) -> Result<Value, RepositoryError> {
        let row = bind_all(&statement.sql, &statement.params)
            .fetch_one(&self.pool)
            .await?;
        first_column(&row)
    }

    async fn execute(&self, statement: &Statement) -> Result<u64, RepositoryError> {
        let result = bind_all(&statement.sql, &statement.params)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn execute_ddl(&self, sql: &str) -> Result<(), RepositoryError> {
        debug!(sql = %sql, "Executing DDL");
        self.pool.execute(sql).await?;
        Ok(())
    }

    fn scalar(sql: &str, params: Vec<Value>) -> Statement {
        Statement {
            sql: sql.to_string(),
            params,
        }
    }
}

fn as_u64(value: &Value) -> u64 {
    match value {
        Value::UInt(u) => *u,
        other => other.as_i64().map(|i| i.max(0) as u64).unwrap_or(0),
    }
}

#[async_trait]
impl SchemaCatalog for MySqlDatabase {
    async fn database_exists(&self) -> Result<bool, RepositoryError> {
        let count = self
            .fetch_scalar(&Self::scalar(
                "SELECT COUNT(*) FROM INFORMATION_SCHEMA.SCHEMATA WHERE SCHEMA_NAME = DATABASE()",
                Vec::new(),
            ))
            .await?;
        Ok(as_u64(&count) > 0)
    }

    async fn list_columns(&self, table: &str) -> Result<Vec<String>, RepositoryError> {
        let rows = self
            .fetch_all(&Self::scalar(
                "SELECT CAST(COLUMN_NAME AS CHAR) AS name FROM INFORMATION_SCHEMA.COLUMNS \
                 WHERE TABLE_SCHEMA = DATABASE() AND TABLE_NAME = ? ORDER BY ORDINAL_POSITION",
                vec![Value::from(table)],
            ))
            .await?;
        rows.iter()
            .map(|row| row.try_get::<String, _>(0).map_err(RepositoryError::from))
            .collect()
    }

    async fn has_table(&self, table: &str) -> Result<bool, RepositoryError> {
        let count = self
            .fetch_scalar(&Self::scalar(
                "SELECT COUNT(*) FROM INFORMATION_SCHEMA.TABLES \
                 WHERE TABLE_SCHEMA = DATABASE() AND TABLE_NAME = ?",
                vec![Value::from(table)],
            ))
            .await?;
        Ok(as_u64(&count) > 0)
    }

    async fn has_column(&self, table: &str, column: &str) -> Result<bool, RepositoryError> {
        Ok(self.column_kind(table, column).await?.is_some())
    }

    async fn column_kind(
        &self,
        table: &str,
        column: &str,
    ) -> Result<Option<ColumnKind>, RepositoryError> {
        let rows = self
            .fetch_all(&Self::scalar(
                "SELECT CAST(COLUMN_TYPE AS CHAR) AS column_type FROM INFORMATION_SCHEMA.COLUMNS \
                 WHERE TABLE_SCHEMA = DATABASE() AND TABLE_NAME = ? AND COLUMN_NAME = ?",
                vec![Value::from(table), Value::from(column)],
            ))
            .await?;
        match rows.first() {
            Some(row) => Ok(Some(sql::parse_column_type(&row.try_get::<String, _>(0)?))),
            None => Ok(None),
        }
    }

    async fn add_column(
        &self,
        table: &str,
        column: &ColumnDefinition,
    ) -> Result<(), RepositoryError> {
        for statement in sql::add_column(table, column) {
            self.execute_ddl(&statement).await?;
        }
        Ok(())
    }

    async fn change_column(
        &self,
        table: &str,
        column: &ColumnDefinition,
    ) -> Result<(), RepositoryError> {
        self.execute_ddl(&sql::change_column(table, column)).await
    }

    async fn create_table(&self, table: &TableDefinition) -> Result<(), RepositoryError> {
        self.execute_ddl(&sql::create_table(table)).await
    }
}

#[async_trait]
impl QueryExecutor for MySqlDatabase {
    async fn fetch_page(
        &self,
        query: &SelectQuery,
        offset: u64,
        limit: u64,
    ) -> Result<Vec<Row>, RepositoryError> {
        let rows = self.fetch_all(&sql::select(query, offset, limit)).await?;
        rows.iter().map(decode_row).collect()
    }

    async fn count(&self, query: &SelectQuery) -> Result<u64, RepositoryError> {
        let count = self.fetch_scalar(&sql::count(query)).await?;
        Ok(as_u64(&count))
    }

    async fn max(&self, table: &str, column: &str) -> Result<Option<Value>, RepositoryError> {
        let max = self.fetch_scalar(&sql::max(table, column)).await?;
        Ok(if max.is_null() { None } else { Some(max) })
    }

    async fn first_value(
        &self,
        table: &str,
        filters: &[Filter],
        column: &str,
        limit: u64,
    ) -> Result<Vec<Value>, RepositoryError> {
        let rows = self
            .fetch_all(&sql::first_value(table, filters, column, limit))
            .await?;
        rows.iter().map(first_column).collect()
    }

    async fn insert(&self, table: &str, rows: &[Row]) -> Result<u64, RepositoryError> {
        let mut written = 0;
        for statement in sql::insert(table, rows, InsertMode::Plain) {
            written += self.execute(&statement).await?;
        }
        Ok(written)
    }

    async fn delete(&self, table: &str, filters: &[Filter]) -> Result<u64, RepositoryError> {
        self.execute(&sql::delete(table, filters)).await
    }

    async fn update(
        &self,
        table: &str,
        filters: &[Filter],
        values: &Row,
    ) -> Result<u64, RepositoryError> {
        if values.is_empty() {
            return Ok(0);
        }
        self.execute(&sql::update(table, filters, values)).await
    }

    async fn execute_raw(&self, sql: &str) -> Result<u64, RepositoryError> {
        let result = self.pool.execute(sql).await?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl Database for MySqlDatabase {
    async fn max_statement_bytes(&self) -> Result<u64, RepositoryError> {
        let packet = self
            .fetch_scalar(&Self::scalar("SELECT @@max_allowed_packet", Vec::new()))
            .await?;
        Ok(as_u64(&packet))
    }

    async fn open_write_session(&self) -> Result<Box<dyn WriteSession>, RepositoryError> {
        let session = MySqlWriteSession::open(self.pool.acquire().await?).await?;
        Ok(Box::new(session))
    }
}
