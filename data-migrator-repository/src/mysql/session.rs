use async_trait::async_trait;
use data_migrator_shared::Row;
use sqlx::pool::PoolConnection;
use sqlx::MySql;
use tracing::debug;

use crate::errors::RepositoryError;
use crate::interfaces::{InsertMode, WriteSession};
use crate::mysql::decode::bind_all;
use crate::mysql::sql;

/// One pooled connection with `FOREIGN_KEY_CHECKS` turned off.
pub struct MySqlWriteSession {
    connection: Option<PoolConnection<MySql>>,
}

impl MySqlWriteSession {
    pub(crate) async fn open(mut connection: PoolConnection<MySql>) -> Result<Self, RepositoryError> {
        sqlx::query("SET FOREIGN_KEY_CHECKS=0")
            .execute(&mut *connection)
            .await?;
        debug!("Foreign key checks suspended");
        Ok(Self {
            connection: Some(connection),
        })
    }
}

#[async_trait]
impl WriteSession for MySqlWriteSession {
    async fn insert(
        &mut self,
        table: &str,
        rows: &[Row],
        mode: InsertMode,
    ) -> Result<u64, RepositoryError> {
        let connection = self
            .connection
            .as_mut()
            .ok_or_else(|| RepositoryError::invalid("write session is closed"))?;
        let mut written = 0;
        for statement in sql::insert(table, rows, mode) {
            let result = bind_all(&statement.sql, &statement.params)
                .execute(&mut **connection)
                .await?;
            written += result.rows_affected();
        }
        Ok(written)
    }

    async fn close(&mut self) -> Result<(), RepositoryError> {
        if let Some(mut connection) = self.connection.take() {
            sqlx::query("SET FOREIGN_KEY_CHECKS=1")
                .execute(&mut *connection)
                .await?;
            debug!("Foreign key checks restored");
        }
        Ok(())
    }
}
