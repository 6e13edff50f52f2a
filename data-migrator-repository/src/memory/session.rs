use async_trait::async_trait;
use data_migrator_shared::Row;

use crate::errors::RepositoryError;
use crate::interfaces::{InsertMode, WriteSession};
use crate::memory::{MemoryDatabase, SessionEvent};

/// Write session over a [`MemoryDatabase`]; foreign key checks are only
/// tracked as a flag.
pub struct MemoryWriteSession {
    database: MemoryDatabase,
    open: bool,
}

impl MemoryWriteSession {
    pub(crate) fn new(database: MemoryDatabase) -> Self {
        Self {
            database,
            open: true,
        }
    }
}

#[async_trait]
impl WriteSession for MemoryWriteSession {
    async fn insert(
        &mut self,
        table: &str,
        rows: &[Row],
        mode: InsertMode,
    ) -> Result<u64, RepositoryError> {
        if !self.open {
            return Err(RepositoryError::invalid("write session is closed"));
        }
        if rows.is_empty() {
            return Ok(0);
        }
        let mut state = self.database.state.write().await;
        let written = state.insert_rows(table, rows, mode)?;
        state.session_log.push(SessionEvent::Inserted {
            table: table.to_string(),
            rows: written as usize,
        });
        Ok(written)
    }

    async fn close(&mut self) -> Result<(), RepositoryError> {
        if self.open {
            self.open = false;
            let mut state = self.database.state.write().await;
            state.foreign_key_checks = true;
            state.session_log.push(SessionEvent::Closed);
        }
        Ok(())
    }
}
