//! Rows left out of a non-strict run because a relation did not resolve.
use std::collections::HashSet;

use chrono::Utc;
use data_migrator_repository::{Database, QueryExecutor, SchemaCatalog};
use data_migrator_shared::{
    ColumnDefinition, ColumnKind, FailedRecord, Row, TableDefinition, Value,
};
use tracing::debug;

use crate::errors::MigrationError;

pub const FAILED_TABLE: &str = "failed_migrations";

const INSERT_CHUNK: usize = 100;

/// Failed records collected for the current chunk.
#[derive(Debug, Default)]
pub struct FailedRecordLog {
    records: Vec<FailedRecord>,
    seen: HashSet<String>,
}

impl FailedRecordLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keeps the first failure of every item id; returns whether `item` was
    /// recorded.
    pub fn record(&mut self, migration: &str, item_id: Value, item: Row) -> bool {
        if !self.seen.insert(item_id.to_key()) {
            return false;
        }
        debug!(migration = %migration, item_id = %item_id, "Recorded failed row");
        self.records.push(FailedRecord {
            migration: migration.to_string(),
            item_id,
            item,
        });
        true
    }

    pub fn records(&self) -> &[FailedRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Persists the collected records to `failed_migrations`, in inserts of
    /// 100, and empties the log.
    pub async fn flush(&mut self, target: &dyn Database) -> Result<usize, MigrationError> {
        self.seen.clear();
        let records = std::mem::take(&mut self.records);
        if records.is_empty() {
            return Ok(0);
        }
        if !target.has_table(FAILED_TABLE).await? {
            target.create_table(&failed_table()).await?;
        }

        let now = Value::Timestamp(Utc::now().naive_utc());
        let mut rows = Vec::with_capacity(records.len());
        for record in &records {
            rows.push(Row::from([
                ("migration".to_string(), Value::from(record.migration.as_str())),
                ("item_id".to_string(), Value::Text(record.item_id.to_key())),
                (
                    "item".to_string(),
                    Value::Text(serde_json::to_string(&record.item)?),
                ),
                ("created_at".to_string(), now.clone()),
                ("updated_at".to_string(), now.clone()),
            ]));
        }
        for chunk in rows.chunks(INSERT_CHUNK) {
            target.insert(FAILED_TABLE, chunk).await?;
        }
        Ok(rows.len())
    }
}

fn failed_table() -> TableDefinition {
    TableDefinition::new(FAILED_TABLE)
        .increments("id")
        .column(ColumnDefinition::new("migration", ColumnKind::String(191)))
        .column(ColumnDefinition::new("item_id", ColumnKind::String(191)))
        .column(ColumnDefinition::new("item", ColumnKind::Text))
        .column(ColumnDefinition::new("created_at", ColumnKind::Timestamp).nullable())
        .column(ColumnDefinition::new("updated_at", ColumnKind::Timestamp).nullable())
}

#[cfg(test)]
mod tests {
    use super::*;
    use data_migrator_repository::MemoryDatabase;

    #[tokio::test]
    async fn test_first_failure_per_item_wins_and_flush_chunks() {
        let target = MemoryDatabase::new();
        let mut log = FailedRecordLog::new();

        let item = |id: i64| Row::from([("id".to_string(), Value::Int(id))]);
        assert!(log.record("orders", Value::Int(1), item(1)));
        assert!(!log.record("orders", Value::Int(1), item(1)));
        for id in 2..=150 {
            log.record("orders", Value::Int(id), item(id));
        }
        assert_eq!(log.len(), 150);

        assert_eq!(log.flush(&target).await.unwrap(), 150);
        assert!(log.is_empty());
        assert_eq!(target.insert_batches(FAILED_TABLE).await, vec![100, 50]);

        let rows = target.rows(FAILED_TABLE).await;
        assert_eq!(rows[0]["migration"], Value::from("orders"));
        assert_eq!(rows[0]["item_id"], Value::from("1"));
        assert_eq!(rows[0]["item"], Value::from(r#"{"id":1}"#));

        // A new chunk may record the same item again.
        assert!(log.record("orders", Value::Int(1), item(1)));
    }
}
