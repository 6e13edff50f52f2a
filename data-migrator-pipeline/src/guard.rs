//! Skipping rows a previous run already migrated.
use std::collections::{HashMap, HashSet};

use data_migrator_repository::{Database, QueryExecutor};
use data_migrator_shared::{Filter, MigrationDefinition, Row, Value};
use tracing::debug;

use crate::errors::MigrationError;
use crate::identity::IdentityStrategy;

/// Collapses rows sharing an identity to the last occurrence, kept at the
/// position of the first. Rows without an identity are left alone.
pub fn dedupe_by_identity(rows: Vec<Row>, identity_column: &str) -> Vec<Row> {
    let mut positions: HashMap<String, usize> = HashMap::new();
    let mut deduped: Vec<Row> = Vec::with_capacity(rows.len());
    for row in rows {
        let key = row
            .get(identity_column)
            .filter(|value| !value.is_null())
            .map(Value::to_key);
        match key {
            Some(key) => match positions.get(&key) {
                Some(&index) => deduped[index] = row,
                None => {
                    positions.insert(key, deduped.len());
                    deduped.push(row);
                }
            },
            None => deduped.push(row),
        }
    }
    deduped
}

/// Outcome of checking one chunk against the new table.
#[derive(Debug, Default)]
pub struct Exclusion {
    /// Rows still to migrate.
    pub rows: Vec<Row>,
    /// Rows dropped because they were already migrated.
    pub excluded: usize,
    /// New rows deleted to be migrated again (test mode).
    pub replaced: u64,
}

/// Filters chunks against rows already present in the new table.
///
/// For snapshot-bounded identities only new rows whose primary key is at or
/// below the largest key seen before the run are considered. The snapshot is
/// taken on first use after each [`ExclusionGuard::reset`].
#[derive(Debug, Default)]
pub struct ExclusionGuard {
    snapshot: Option<Option<Value>>,
    test_mode: bool,
    dry_run: bool,
}

impl ExclusionGuard {
    pub fn new(test_mode: bool, dry_run: bool) -> Self {
        Self {
            snapshot: None,
            test_mode,
            dry_run,
        }
    }

    /// Forgets the snapshot so the next chunk takes a fresh one.
    pub fn reset(&mut self) {
        self.snapshot = None;
    }

    async fn snapshot(
        &mut self,
        definition: &MigrationDefinition,
        target: &dyn Database,
    ) -> Result<Option<Value>, MigrationError> {
        if let Some(snapshot) = &self.snapshot {
            return Ok(snapshot.clone());
        }
        let max = target.max(&definition.new_table, &definition.new_id).await?;
        debug!(
            migration = %definition.name,
            max_id = %max.clone().unwrap_or_default(),
            "Took pre-run id snapshot"
        );
        self.snapshot = Some(max.clone());
        Ok(max)
    }

    pub async fn exclude(
        &mut self,
        definition: &MigrationDefinition,
        target: &dyn Database,
        strategy: &dyn IdentityStrategy,
        rows: Vec<Row>,
        slice_size: usize,
    ) -> Result<Exclusion, MigrationError> {
        let identity_column = strategy.identity_column(definition);
        let rows = dedupe_by_identity(rows, &identity_column);
        if !definition.save_old_id || rows.is_empty() {
            return Ok(Exclusion {
                rows,
                ..Exclusion::default()
            });
        }

        let bound = if strategy.snapshot_bounded() {
            match self.snapshot(definition, target).await? {
                Some(max) => Some(max),
                // Nothing existed before the run.
                None => {
                    return Ok(Exclusion {
                        rows,
                        ..Exclusion::default()
                    })
                }
            }
        } else {
            None
        };

        let ids: Vec<Value> = rows
            .iter()
            .filter_map(|row| row.get(&identity_column))
            .filter(|value| !value.is_null())
            .cloned()
            .collect();

        let mut existing: HashSet<String> = HashSet::new();
        let mut replaced = 0;
        for slice in ids.chunks(slice_size.max(1)) {
            let mut filters = vec![Filter::is_in(&definition.local_old_id, slice.to_vec())];
            if let Some(max) = &bound {
                filters.push(Filter::lte(&definition.new_id, max.clone()));
            }
            let found = target
                .first_value(&definition.new_table, &filters, &definition.local_old_id, u64::MAX)
                .await?;
            if found.is_empty() {
                continue;
            }
            if self.test_mode && !self.dry_run {
                replaced += target.delete(&definition.new_table, &filters).await?;
            }
            existing.extend(found.iter().map(Value::to_key));
        }

        if self.test_mode {
            return Ok(Exclusion {
                rows,
                excluded: 0,
                replaced,
            });
        }

        let before = rows.len();
        let rows: Vec<Row> = rows
            .into_iter()
            .filter(|row| {
                row.get(&identity_column)
                    .map_or(true, |value| !existing.contains(&value.to_key()))
            })
            .collect();
        Ok(Exclusion {
            excluded: before - rows.len(),
            rows,
            replaced,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::OldIdIdentity;
    use data_migrator_repository::{MemoryDatabase, SchemaCatalog};
    use data_migrator_shared::{ColumnDefinition, ColumnKind, TableDefinition};

    fn row(id: i64, name: &str) -> Row {
        Row::from([
            ("id".to_string(), Value::Int(id)),
            ("name".to_string(), Value::from(name)),
        ])
    }

    async fn target_with(old_ids: &[u64]) -> MemoryDatabase {
        let target = MemoryDatabase::new();
        target
            .create_table(
                &TableDefinition::new("people")
                    .increments("id")
                    .column(ColumnDefinition::new("old_id", ColumnKind::UnsignedInteger).nullable())
                    .column(ColumnDefinition::new("name", ColumnKind::String(255)).nullable()),
            )
            .await
            .unwrap();
        let rows = old_ids
            .iter()
            .map(|old| Row::from([("old_id".to_string(), Value::UInt(*old))]))
            .collect();
        target.seed("people", rows).await.unwrap();
        target
    }

    fn definition() -> MigrationDefinition {
        MigrationDefinition::new("people", "people", "people", "id")
    }

    #[test]
    fn test_dedupe_keeps_last_occurrence_at_first_position() {
        let rows = vec![row(1, "a"), row(2, "b"), row(1, "c")];
        let deduped = dedupe_by_identity(rows, "id");
        assert_eq!(deduped, vec![row(1, "c"), row(2, "b")]);
    }

    #[tokio::test]
    async fn test_excludes_previously_migrated_rows() {
        let target = target_with(&[1, 3]).await;
        let mut guard = ExclusionGuard::new(false, false);
        let rows = vec![row(1, "a"), row(2, "b"), row(3, "c"), row(4, "d")];

        let exclusion = guard
            .exclude(&definition(), &target, &OldIdIdentity, rows, 1)
            .await
            .unwrap();
        assert_eq!(exclusion.excluded, 2);
        assert_eq!(exclusion.rows, vec![row(2, "b"), row(4, "d")]);
        // One query per slice of ids.
        assert_eq!(target.counters().await.lookups, 4);
    }

    #[tokio::test]
    async fn test_rows_written_during_the_run_are_not_excluded() {
        let target = target_with(&[1]).await;
        let mut guard = ExclusionGuard::new(false, false);
        guard
            .exclude(&definition(), &target, &OldIdIdentity, vec![row(9, "x")], 10)
            .await
            .unwrap();

        // Inserted after the snapshot, with id 2.
        target
            .seed("people", vec![Row::from([("old_id".to_string(), Value::UInt(5))])])
            .await
            .unwrap();
        let exclusion = guard
            .exclude(&definition(), &target, &OldIdIdentity, vec![row(5, "e")], 10)
            .await
            .unwrap();
        assert_eq!(exclusion.rows.len(), 1);
    }

    #[tokio::test]
    async fn test_empty_table_skips_the_check() {
        let target = target_with(&[]).await;
        let mut guard = ExclusionGuard::new(false, false);
        let exclusion = guard
            .exclude(&definition(), &target, &OldIdIdentity, vec![row(1, "a")], 10)
            .await
            .unwrap();
        assert_eq!(exclusion.rows.len(), 1);
        assert_eq!(target.counters().await.lookups, 0);
    }

    #[tokio::test]
    async fn test_test_mode_replaces_instead_of_excluding() {
        let target = target_with(&[1, 3]).await;
        let mut guard = ExclusionGuard::new(true, false);
        let rows = vec![row(1, "a"), row(2, "b")];

        let exclusion = guard
            .exclude(&definition(), &target, &OldIdIdentity, rows, 10)
            .await
            .unwrap();
        assert_eq!(exclusion.rows.len(), 2);
        assert_eq!(exclusion.replaced, 1);
        let remaining = target.rows("people").await;
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0]["old_id"], Value::UInt(3));
    }
}
