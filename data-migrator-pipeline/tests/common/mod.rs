//! Shared fixtures: a small legacy shop schema and its new counterpart.
#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use data_migrator_pipeline::{
    GlobalValues, Migration, MigrationContext, MigrationEntry, MigrationError, MigrationSummary,
    ProgressReporting,
};
use data_migrator_repository::{MemoryCache, MemoryDatabase, SchemaCatalog};
use data_migrator_shared::{
    ColumnDefinition, ColumnKind, MigrationDefinition, RelationSpec, Row, TableDefinition, Value,
};

pub const CUSTOMER_NAMES: [&str; 3] = ["Ada", "Grace", "Linus"];

pub fn row(values: &[(&str, Value)]) -> Row {
    values
        .iter()
        .map(|(column, value)| (column.to_string(), value.clone()))
        .collect()
}

/// Legacy schema with three customers and one order per entry of
/// `order_customers`, pointing at that customer id.
pub async fn legacy_shop(order_customers: &[Value]) -> MemoryDatabase {
    let source = MemoryDatabase::new();
    source
        .create_table(
            &TableDefinition::new("customers")
                .increments("id_customers")
                .column(ColumnDefinition::new("customers_name", ColumnKind::String(255)).nullable()),
        )
        .await
        .unwrap();
    source
        .create_table(
            &TableDefinition::new("orders")
                .increments("id_orders")
                .column(ColumnDefinition::new("customer", ColumnKind::UnsignedInteger).nullable())
                .column(ColumnDefinition::new("orders_note", ColumnKind::String(255)).nullable()),
        )
        .await
        .unwrap();

    let customers = CUSTOMER_NAMES
        .iter()
        .map(|name| row(&[("customers_name", Value::from(*name))]))
        .collect();
    source.seed("customers", customers).await.unwrap();

    let orders = order_customers
        .iter()
        .enumerate()
        .map(|(index, customer)| {
            row(&[
                ("customer", customer.clone()),
                ("orders_note", Value::from(format!("order {}", index + 1))),
            ])
        })
        .collect();
    source.seed("orders", orders).await.unwrap();
    source
}

/// New schema without old id columns; migrations add them.
pub async fn new_shop(max_statement_bytes: u64) -> MemoryDatabase {
    let target = MemoryDatabase::with_max_statement_bytes(max_statement_bytes);
    target
        .create_table(
            &TableDefinition::new("clients")
                .increments("id")
                .column(ColumnDefinition::new("name", ColumnKind::String(255)).nullable())
                .column(ColumnDefinition::new("created_at", ColumnKind::Timestamp).nullable())
                .column(ColumnDefinition::new("updated_at", ColumnKind::Timestamp).nullable()),
        )
        .await
        .unwrap();
    target
        .create_table(
            &TableDefinition::new("shop_orders")
                .increments("id")
                .column(ColumnDefinition::new("customer_id", ColumnKind::UnsignedInteger))
                .column(ColumnDefinition::new("note", ColumnKind::String(255)).nullable()),
        )
        .await
        .unwrap();
    target
}

pub fn customers() -> MigrationDefinition {
    MigrationDefinition::new("customers", "customers", "clients", "id_customers")
}

pub fn orders() -> MigrationDefinition {
    let mut definition = MigrationDefinition::new("orders", "orders", "shop_orders", "id_orders")
        .relation(
            "clients",
            RelationSpec {
                foreign: "customer_id".to_string(),
                old_foreign: "old_id".to_string(),
                old_key: "customer".to_string(),
                key: "id".to_string(),
            },
        );
    definition
        .old_relations
        .insert("customers".to_string(), "customer".to_string());
    definition
}

pub fn context(source: &MemoryDatabase, target: &MemoryDatabase) -> MigrationContext {
    MigrationContext::new(
        Arc::new(source.clone()),
        Arc::new(target.clone()),
        Arc::new(MemoryCache::new()),
    )
}

pub fn migration(
    entry: MigrationEntry,
    source: &MemoryDatabase,
    target: &MemoryDatabase,
) -> Migration {
    Migration::new(
        &entry,
        context(source, target),
        Arc::new(GlobalValues::new()),
        Vec::new(),
    )
    .unwrap()
}

pub async fn migrate(
    definition: MigrationDefinition,
    source: &MemoryDatabase,
    target: &MemoryDatabase,
) -> Result<MigrationSummary, MigrationError> {
    migration(definition.into(), source, target).migrate().await
}

/// Values of `column` across `rows`, in order.
pub fn column(rows: &[Row], column: &str) -> Vec<Value> {
    rows.iter()
        .map(|row| row.get(column).cloned().unwrap_or_default())
        .collect()
}

/// Progress reporter recording every call.
#[derive(Default)]
pub struct RecordingProgress {
    pub started: Mutex<Vec<(String, u64)>>,
    pub advanced: Mutex<Vec<u64>>,
    pub finished: Mutex<usize>,
}

impl ProgressReporting for RecordingProgress {
    fn start(&self, migration: &str, total: u64) {
        self.started
            .lock()
            .unwrap()
            .push((migration.to_string(), total));
    }

    fn advance(&self, rows: u64) {
        self.advanced.lock().unwrap().push(rows);
    }

    fn finish(&self) {
        *self.finished.lock().unwrap() += 1;
    }
}
