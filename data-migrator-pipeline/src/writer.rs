//! Turning source rows into insert records and sizing insert statements.
use chrono::NaiveDateTime;
use data_migrator_shared::{MigrationDefinition, Row, Value};
use serde::Serialize;

use crate::errors::MigrationError;
use crate::mapping::ColumnMapper;
use crate::relations::RelationCache;

/// Bytes added to a serialized batch to cover statement syntax.
pub const STATEMENT_MARGIN: u64 = 400;

/// Outcome of building one insert record.
#[derive(Debug, Clone, PartialEq)]
pub enum BuiltRecord {
    Ready {
        record: Row,
        /// The record carries its own new primary key.
        explicit_id: bool,
    },
    /// A relation could not be resolved and the column may not be null.
    Unresolved {
        table: String,
        column: String,
        value: Value,
    },
}

/// Builds insert records for one migration.
pub struct RecordBuilder<'a> {
    definition: &'a MigrationDefinition,
    mapper: &'a ColumnMapper,
    identity_column: &'a str,
    force: bool,
    timestamps: Option<(NaiveDateTime, Vec<String>)>,
}

impl<'a> RecordBuilder<'a> {
    pub fn new(
        definition: &'a MigrationDefinition,
        mapper: &'a ColumnMapper,
        identity_column: &'a str,
    ) -> Self {
        Self {
            definition,
            mapper,
            identity_column,
            force: false,
            timestamps: None,
        }
    }

    /// Unresolved relations become `NULL` instead of failing.
    pub fn forced(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    /// Fills `columns` with `now` wherever a record leaves them empty.
    pub fn with_timestamps(mut self, now: NaiveDateTime, columns: Vec<String>) -> Self {
        if !columns.is_empty() {
            self.timestamps = Some((now, columns));
        }
        self
    }

    pub fn build(&self, row: &Row, cache: &RelationCache) -> BuiltRecord {
        let definition = self.definition;
        let mut record = Row::new();
        let mut explicit_id = false;

        if definition.new_id != definition.old_id {
            if let Some(id) = row.get(&definition.new_id).filter(|id| !id.is_null()) {
                record.insert(definition.new_id.clone(), id.clone());
                explicit_id = true;
            }
        }

        for (old_column, value) in row {
            let Some(new_column) = self.mapper.map(old_column) else {
                continue;
            };
            if new_column == definition.new_id {
                continue;
            }
            let value = match definition.default_values.get(new_column) {
                Some(default) if value.is_null() => default.clone(),
                _ => value.clone(),
            };
            record.insert(new_column.to_string(), value);
        }

        let identity = row.get(self.identity_column).cloned().unwrap_or_default();
        for (table, relations) in &definition.relations {
            for relation in relations {
                let old_value = row.get(&relation.old_key).cloned().unwrap_or_default();
                let resolved = cache
                    .get(&identity, table, &relation.old_key, &old_value)
                    .and_then(|resolved| resolved.value());
                let value = match resolved {
                    Some(value) => value,
                    None if self.force
                        || definition.is_nullable_relation_column(table, &relation.foreign) =>
                    {
                        Value::Null
                    }
                    None => {
                        return BuiltRecord::Unresolved {
                            table: table.clone(),
                            column: relation.foreign.clone(),
                            value: old_value,
                        }
                    }
                };
                record.insert(relation.foreign.clone(), value);
            }
        }

        if let Some((now, columns)) = &self.timestamps {
            for column in columns {
                let empty = record.get(column).map_or(true, Value::is_null);
                if empty {
                    record.insert(column.clone(), Value::Timestamp(*now));
                }
            }
        }

        BuiltRecord::Ready {
            record,
            explicit_id,
        }
    }
}

/// Serialized size of a batch plus the statement margin.
pub fn batch_size<T: Serialize>(items: &[T]) -> Result<u64, MigrationError> {
    Ok(serde_json::to_vec(items)?.len() as u64 + STATEMENT_MARGIN)
}

/// Splits `items` so every part fits in `budget` bytes.
///
/// An oversized batch is cut into `ceil(size / budget)` parts of near-equal
/// length; a part that is still too large is cut again. Single items are
/// never split.
pub fn split_by_budget<T: Serialize>(
    items: Vec<T>,
    budget: u64,
) -> Result<Vec<Vec<T>>, MigrationError> {
    let size = batch_size(&items)?;
    if size <= budget || items.len() <= 1 {
        return Ok(vec![items]);
    }

    let parts = (size.div_ceil(budget.max(1)) as usize).clamp(2, items.len());
    let base = items.len() / parts;
    let remainder = items.len() % parts;

    let mut batches = Vec::with_capacity(parts);
    let mut rest = items.into_iter();
    for index in 0..parts {
        let length = base + usize::from(index < remainder);
        let part: Vec<T> = rest.by_ref().take(length).collect();
        batches.extend(split_by_budget(part, budget)?);
    }
    Ok(batches)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relations::resolve_chunk;
    use chrono::NaiveDate;
    use data_migrator_repository::{MemoryDatabase, SchemaCatalog};
    use data_migrator_shared::{RelationSpec, ResolvedForeign, TableDefinition};

    fn definition() -> MigrationDefinition {
        let mut definition = MigrationDefinition::new("orders", "orders", "orders", "id_orders")
            .map_column("order_total", "total")
            .ignore_column("legacy")
            .relation(
                "customers",
                RelationSpec {
                    foreign: "customer_id".to_string(),
                    old_foreign: "old_id".to_string(),
                    old_key: "customer".to_string(),
                    key: "id".to_string(),
                },
            );
        definition
            .default_values
            .insert("status".to_string(), Value::from("new"));
        definition
    }

    fn source_row(id: i64, customer: Value) -> Row {
        Row::from([
            ("id_orders".to_string(), Value::Int(id)),
            ("order_total".to_string(), Value::Float(9.5)),
            ("orders_status".to_string(), Value::Null),
            ("legacy".to_string(), Value::from("x")),
            ("customer".to_string(), customer),
        ])
    }

    fn cached(identity: i64, customer: Value, resolved: ResolvedForeign) -> RelationCache {
        let mut cache = RelationCache::new();
        cache.insert(&Value::Int(identity), "customers", "customer", &customer, resolved);
        cache
    }

    fn mapper(definition: &MigrationDefinition) -> ColumnMapper {
        let columns: Vec<String> = source_row(1, Value::Null).into_keys().collect();
        ColumnMapper::build(definition, &columns, "id_orders")
    }

    #[test]
    fn test_build_maps_defaults_and_relations() {
        let definition = definition();
        let mapper = mapper(&definition);
        let builder = RecordBuilder::new(&definition, &mapper, "id_orders");
        let cache = cached(1, Value::Int(7), ResolvedForeign::Found(Value::UInt(70)));

        let BuiltRecord::Ready {
            record,
            explicit_id,
        } = builder.build(&source_row(1, Value::Int(7)), &cache)
        else {
            panic!("record should be ready");
        };
        assert!(!explicit_id);
        assert_eq!(
            record,
            Row::from([
                ("old_id".to_string(), Value::Int(1)),
                ("total".to_string(), Value::Float(9.5)),
                ("status".to_string(), Value::from("new")),
                ("customer_id".to_string(), Value::UInt(70)),
            ])
        );
    }

    #[test]
    fn test_unresolved_relation_policies() {
        let definition = definition();
        let mapper = mapper(&definition);
        let row = source_row(1, Value::Int(99));
        let cache = cached(1, Value::Int(99), ResolvedForeign::Unresolved);

        let strict = RecordBuilder::new(&definition, &mapper, "id_orders");
        assert!(matches!(
            strict.build(&row, &cache),
            BuiltRecord::Unresolved { ref column, .. } if column == "customer_id"
        ));

        let forced = RecordBuilder::new(&definition, &mapper, "id_orders").forced(true);
        let BuiltRecord::Ready { record, .. } = forced.build(&row, &cache) else {
            panic!("forced build should succeed");
        };
        assert_eq!(record["customer_id"], Value::Null);

        let mut nullable = definition.clone();
        nullable
            .nullable_relation_columns
            .insert("customers".to_string(), vec!["customer_id".to_string()]);
        let builder = RecordBuilder::new(&nullable, &mapper, "id_orders");
        assert!(matches!(
            builder.build(&row, &cache),
            BuiltRecord::Ready { .. }
        ));
    }

    #[test]
    fn test_explicit_id_and_timestamps() {
        let definition = definition();
        let mut row = source_row(1, Value::Null);
        row.insert("id".to_string(), Value::UInt(500));
        row.insert("created_at".to_string(), Value::from("2020-01-01 00:00:00"));
        let columns: Vec<String> = row.keys().cloned().collect();
        let mapper = ColumnMapper::build(&definition, &columns, "id_orders");
        assert_eq!(mapper.map("id"), Some("id"));

        let now = NaiveDate::from_ymd_opt(2024, 5, 1)
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap();
        let builder = RecordBuilder::new(&definition, &mapper, "id_orders")
            .with_timestamps(now, vec!["created_at".to_string(), "updated_at".to_string()]);

        let cache = cached(1, Value::Null, ResolvedForeign::KnownAbsent);

        let BuiltRecord::Ready {
            record,
            explicit_id,
        } = builder.build(&row, &cache)
        else {
            panic!("record should be ready");
        };
        assert!(explicit_id);
        assert_eq!(record["id"], Value::UInt(500));
        assert_eq!(record["customer_id"], Value::Null);
        assert_eq!(record["created_at"], Value::from("2020-01-01 00:00:00"));
        assert_eq!(record["updated_at"], Value::Timestamp(now));
    }

    #[test]
    fn test_split_by_budget_uses_ceil_parts() {
        let rows: Vec<Row> = (0..10)
            .map(|i| Row::from([("payload".to_string(), Value::from(format!("{i:0>990}")))]))
            .collect();
        let size = batch_size(&rows).unwrap();
        let budget = 5000;
        assert!(size > budget);

        let parts = split_by_budget(rows, budget).unwrap();
        assert_eq!(parts.len() as u64, size.div_ceil(budget));
        assert_eq!(parts.iter().map(Vec::len).sum::<usize>(), 10);
        assert_eq!(parts.iter().map(Vec::len).collect::<Vec<_>>(), vec![4, 3, 3]);
        for part in &parts {
            assert!(batch_size(part).unwrap() <= budget);
        }
    }

    #[test]
    fn test_split_keeps_small_batches_and_single_rows() {
        let rows = vec![Row::from([("a".to_string(), Value::Int(1))])];
        assert_eq!(split_by_budget(rows.clone(), 10).unwrap(), vec![rows.clone()]);
        assert_eq!(split_by_budget(rows.clone(), 1 << 20).unwrap(), vec![rows]);

        let empty: Vec<Row> = Vec::new();
        assert_eq!(split_by_budget(empty, 10).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_resolved_chunk_feeds_builder() {
        let target = MemoryDatabase::new();
        target
            .create_table(&TableDefinition::new("customers").increments("id").column(
                data_migrator_shared::ColumnDefinition::new(
                    "old_id",
                    data_migrator_shared::ColumnKind::UnsignedInteger,
                ),
            ))
            .await
            .unwrap();
        target
            .seed(
                "customers",
                vec![Row::from([("old_id".to_string(), Value::UInt(7))])],
            )
            .await
            .unwrap();

        let definition = definition();
        let mapper = mapper(&definition);
        let rows = vec![source_row(1, Value::Int(7)), source_row(2, Value::Int(0))];
        let mut cache = RelationCache::new();
        resolve_chunk(&definition, &target, "id_orders", &rows, &mut cache)
            .await
            .unwrap();

        let builder = RecordBuilder::new(&definition, &mapper, "id_orders");
        let ids: Vec<Value> = rows
            .iter()
            .map(|row| match builder.build(row, &cache) {
                BuiltRecord::Ready { record, .. } => record["customer_id"].clone(),
                BuiltRecord::Unresolved { .. } => panic!("every relation resolves"),
            })
            .collect();
        assert_eq!(ids, vec![Value::UInt(1), Value::Null]);
    }
}
