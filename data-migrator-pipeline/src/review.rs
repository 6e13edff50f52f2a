//! Records flagged for a human to look at after they were migrated.
use data_migrator_repository::{Database, QueryExecutor, SchemaCatalog};
use data_migrator_shared::{
    ColumnDefinition, ColumnKind, ReviewEntry, Row, TableDefinition, Value,
};
use tokio::sync::Mutex;
use tracing::info;

use crate::errors::MigrationError;

/// Queue of review entries, flushed once a migration has finished.
#[derive(Debug, Default)]
pub struct ReviewQueue {
    entries: Mutex<Vec<ReviewEntry>>,
}

/// Rows written by one flush.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReviewFlush {
    pub local: usize,
    pub remote: usize,
}

impl ReviewQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Flags `fields` of a record. Local entries concern the new table,
    /// remote ones the legacy table.
    pub async fn mark(
        &self,
        record_id: impl Into<Value>,
        fields: Vec<String>,
        comment: Option<String>,
        local: bool,
    ) {
        self.entries.lock().await.push(ReviewEntry {
            record_id: record_id.into(),
            local,
            fields,
            comment,
        });
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }

    /// Writes local entries to `<new_table>_reviews` on `target` and remote
    /// entries to `<old_table>_reviews` on `source`, creating the tables when
    /// needed. The queue is empty afterwards.
    pub async fn flush(
        &self,
        source: &dyn Database,
        target: &dyn Database,
        old_table: &str,
        new_table: &str,
        chunk_size: usize,
    ) -> Result<ReviewFlush, MigrationError> {
        let entries = std::mem::take(&mut *self.entries.lock().await);
        if entries.is_empty() {
            return Ok(ReviewFlush::default());
        }

        let (local, remote): (Vec<_>, Vec<_>) = entries.into_iter().partition(|e| e.local);
        let flushed = ReviewFlush {
            local: write_entries(target, &format!("{new_table}_reviews"), &local, chunk_size)
                .await?,
            remote: write_entries(source, &format!("{old_table}_reviews"), &remote, chunk_size)
                .await?,
        };
        info!(
            table = %new_table,
            local = flushed.local,
            remote = flushed.remote,
            "Flushed review queue"
        );
        Ok(flushed)
    }
}

fn review_table(name: &str) -> TableDefinition {
    TableDefinition::new(name)
        .increments("id")
        .column(ColumnDefinition::new("review_id", ColumnKind::String(191)))
        .column(ColumnDefinition::new("review_fields", ColumnKind::Text))
        .column(ColumnDefinition::new("comment", ColumnKind::String(255)).nullable())
}

async fn write_entries(
    database: &dyn Database,
    table: &str,
    entries: &[ReviewEntry],
    chunk_size: usize,
) -> Result<usize, MigrationError> {
    if entries.is_empty() {
        return Ok(0);
    }
    if !database.has_table(table).await? {
        database.create_table(&review_table(table)).await?;
    }

    let mut rows = Vec::with_capacity(entries.len());
    for entry in entries {
        rows.push(Row::from([
            ("review_id".to_string(), Value::Text(entry.record_id.to_key())),
            (
                "review_fields".to_string(),
                Value::Text(serde_json::to_string(&entry.fields)?),
            ),
            ("comment".to_string(), Value::from(entry.comment.clone())),
        ]));
    }
    for chunk in rows.chunks(chunk_size.max(1)) {
        database.insert(table, chunk).await?;
    }
    Ok(rows.len())
}
