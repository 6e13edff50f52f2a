//! In-memory database.
//!
//! Implements every capability the engine needs over plain row vectors so
//! migrations can be exercised without a server. It also records what
//! happened (statement counters, write-session events, insert batch sizes)
//! for tests to assert on.
mod evaluate;
mod session;

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use async_trait::async_trait;
use data_migrator_shared::{
    ColumnDefinition, ColumnKind, Filter, Row, SelectQuery, TableDefinition, Value,
};
use tokio::sync::RwLock;

use crate::errors::RepositoryError;
use crate::interfaces::{Database, InsertMode, QueryExecutor, SchemaCatalog, WriteSession};
use evaluate::{evaluate, matches_all, project, scope_of};
pub use session::MemoryWriteSession;

const DEFAULT_MAX_STATEMENT_BYTES: u64 = 64 * 1024 * 1024;

/// Statement counts since creation or the last reset.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatementCounters {
    pub selects: usize,
    pub lookups: usize,
    pub inserts: usize,
    pub deletes: usize,
    pub updates: usize,
}

/// What happened on write sessions, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    Opened,
    Inserted { table: String, rows: usize },
    Closed,
}

pub(crate) struct MemoryTable {
    columns: Vec<ColumnDefinition>,
    primary_key: Option<String>,
    unique: Vec<String>,
    pub(crate) rows: Vec<Row>,
    next_id: u64,
}

impl MemoryTable {
    fn from_definition(definition: &TableDefinition) -> Self {
        Self {
            columns: definition.columns.clone(),
            primary_key: definition.primary_key.clone(),
            unique: Vec::new(),
            rows: Vec::new(),
            next_id: 1,
        }
    }

    fn column(&self, name: &str) -> Option<&ColumnDefinition> {
        self.columns.iter().find(|column| column.name == name)
    }

    fn auto_increment_column(&self) -> Option<&str> {
        self.columns
            .iter()
            .find(|column| column.auto_increment)
            .map(|column| column.name.as_str())
    }

    fn unique_columns(&self) -> impl Iterator<Item = &String> {
        self.primary_key.iter().chain(self.unique.iter())
    }
}

struct MemoryState {
    exists: bool,
    tables: BTreeMap<String, MemoryTable>,
    max_statement_bytes: u64,
    counters: StatementCounters,
    session_log: Vec<SessionEvent>,
    insert_batches: Vec<(String, usize)>,
    raw_statements: Vec<String>,
    failing_tables: BTreeSet<String>,
    foreign_key_checks: bool,
}

impl MemoryState {
    fn new(exists: bool, max_statement_bytes: u64) -> Self {
        Self {
            exists,
            tables: BTreeMap::new(),
            max_statement_bytes,
            counters: StatementCounters::default(),
            session_log: Vec::new(),
            insert_batches: Vec::new(),
            raw_statements: Vec::new(),
            failing_tables: BTreeSet::new(),
            foreign_key_checks: true,
        }
    }

    fn table(&self, name: &str) -> Result<&MemoryTable, RepositoryError> {
        self.tables
            .get(name)
            .ok_or_else(|| RepositoryError::unknown_table(name))
    }

    fn table_mut(&mut self, name: &str) -> Result<&mut MemoryTable, RepositoryError> {
        self.tables
            .get_mut(name)
            .ok_or_else(|| RepositoryError::unknown_table(name))
    }

    /// Inserts all rows or none of them.
    fn insert_rows(
        &mut self,
        table_name: &str,
        rows: &[Row],
        mode: InsertMode,
    ) -> Result<u64, RepositoryError> {
        if self.failing_tables.contains(table_name) {
            return Err(RepositoryError::invalid(format!(
                "insert into `{table_name}` rejected"
            )));
        }
        let table = self.table_mut(table_name)?;
        let auto_increment = table.auto_increment_column().map(str::to_string);
        let mut next_id = table.next_id;
        let mut staged: Vec<Row> = Vec::with_capacity(rows.len());

        'rows: for row in rows {
            let mut full: Row = table
                .columns
                .iter()
                .map(|column| (column.name.clone(), Value::Null))
                .collect();
            for (column, value) in row {
                if table.column(column).is_none() {
                    return Err(RepositoryError::unknown_column(table_name, column));
                }
                full.insert(column.clone(), value.clone());
            }

            if let Some(id_column) = &auto_increment {
                match full.get(id_column).and_then(Value::as_i64) {
                    Some(id) => next_id = next_id.max(id as u64 + 1),
                    None => {
                        full.insert(id_column.clone(), Value::UInt(next_id));
                        next_id += 1;
                    }
                }
            }

            for column in table.unique_columns() {
                let Some(value) = full.get(column).filter(|v| !v.is_null()) else {
                    continue;
                };
                let taken = table
                    .rows
                    .iter()
                    .chain(staged.iter())
                    .any(|existing| existing.get(column).is_some_and(|v| v.loosely_equals(value)));
                if taken {
                    match mode {
                        InsertMode::Plain => {
                            return Err(RepositoryError::duplicate_key(
                                table_name,
                                format!("{column}={value}"),
                            ))
                        }
                        InsertMode::IgnoreDuplicates => continue 'rows,
                    }
                }
            }
            staged.push(full);
        }

        let written = staged.len() as u64;
        table.next_id = next_id;
        table.rows.extend(staged);
        self.counters.inserts += 1;
        self.insert_batches.push((table_name.to_string(), rows.len()));
        Ok(written)
    }
}

/// Shared in-memory database. Clones share the same tables.
#[derive(Clone)]
pub struct MemoryDatabase {
    state: Arc<RwLock<MemoryState>>,
}

impl Default for MemoryDatabase {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryDatabase {
    pub fn new() -> Self {
        Self::with_max_statement_bytes(DEFAULT_MAX_STATEMENT_BYTES)
    }

    pub fn with_max_statement_bytes(max_statement_bytes: u64) -> Self {
        Self {
            state: Arc::new(RwLock::new(MemoryState::new(true, max_statement_bytes))),
        }
    }

    /// A database that reports itself as not existing.
    pub fn missing() -> Self {
        Self {
            state: Arc::new(RwLock::new(MemoryState::new(
                false,
                DEFAULT_MAX_STATEMENT_BYTES,
            ))),
        }
    }

    pub async fn set_max_statement_bytes(&self, bytes: u64) {
        self.state.write().await.max_statement_bytes = bytes;
    }

    /// Inserts fixture rows without touching the counters.
    pub async fn seed(&self, table: &str, rows: Vec<Row>) -> Result<(), RepositoryError> {
        let mut state = self.state.write().await;
        let counters = state.counters;
        state.insert_rows(table, &rows, InsertMode::Plain)?;
        state.counters = counters;
        state.insert_batches.pop();
        Ok(())
    }

    /// Adds a uniqueness constraint on `column`.
    pub async fn add_unique(&self, table: &str, column: &str) -> Result<(), RepositoryError> {
        let mut state = self.state.write().await;
        let table_state = state.table_mut(table)?;
        if table_state.column(column).is_none() {
            return Err(RepositoryError::unknown_column(table, column));
        }
        table_state.unique.push(column.to_string());
        Ok(())
    }

    /// Every row of `table`, in insertion order.
    pub async fn rows(&self, table: &str) -> Vec<Row> {
        let state = self.state.read().await;
        state
            .tables
            .get(table)
            .map(|t| t.rows.clone())
            .unwrap_or_default()
    }

    pub async fn counters(&self) -> StatementCounters {
        self.state.read().await.counters
    }

    pub async fn reset_counters(&self) {
        let mut state = self.state.write().await;
        state.counters = StatementCounters::default();
        state.insert_batches.clear();
    }

    pub async fn session_log(&self) -> Vec<SessionEvent> {
        self.state.read().await.session_log.clone()
    }

    /// Row counts of every insert statement issued against `table`.
    pub async fn insert_batches(&self, table: &str) -> Vec<usize> {
        let state = self.state.read().await;
        state
            .insert_batches
            .iter()
            .filter(|(name, _)| name == table)
            .map(|(_, rows)| *rows)
            .collect()
    }

    pub async fn raw_statements(&self) -> Vec<String> {
        self.state.read().await.raw_statements.clone()
    }

    pub async fn foreign_key_checks(&self) -> bool {
        self.state.read().await.foreign_key_checks
    }

    /// Makes every subsequent insert into `table` fail.
    pub async fn fail_inserts_into(&self, table: &str) {
        self.state
            .write()
            .await
            .failing_tables
            .insert(table.to_string());
    }
}

#[async_trait]
impl SchemaCatalog for MemoryDatabase {
    async fn database_exists(&self) -> Result<bool, RepositoryError> {
        Ok(self.state.read().await.exists)
    }

    async fn list_columns(&self, table: &str) -> Result<Vec<String>, RepositoryError> {
        let state = self.state.read().await;
        Ok(state
            .tables
            .get(table)
            .map(|t| t.columns.iter().map(|c| c.name.clone()).collect())
            .unwrap_or_default())
    }

    async fn has_table(&self, table: &str) -> Result<bool, RepositoryError> {
        Ok(self.state.read().await.tables.contains_key(table))
    }

    async fn has_column(&self, table: &str, column: &str) -> Result<bool, RepositoryError> {
        let state = self.state.read().await;
        Ok(state
            .tables
            .get(table)
            .is_some_and(|t| t.column(column).is_some()))
    }

    async fn column_kind(
        &self,
        table: &str,
        column: &str,
    ) -> Result<Option<ColumnKind>, RepositoryError> {
        let state = self.state.read().await;
        Ok(state
            .tables
            .get(table)
            .and_then(|t| t.column(column))
            .map(|c| c.kind.clone()))
    }

    async fn add_column(
        &self,
        table: &str,
        column: &ColumnDefinition,
    ) -> Result<(), RepositoryError> {
        let mut state = self.state.write().await;
        let table_state = state.table_mut(table)?;
        if table_state.column(&column.name).is_some() {
            return Err(RepositoryError::invalid(format!(
                "duplicate column `{}` on `{table}`",
                column.name
            )));
        }
        let position = column
            .after
            .as_ref()
            .and_then(|after| table_state.columns.iter().position(|c| &c.name == after))
            .map(|index| index + 1)
            .unwrap_or(table_state.columns.len());
        table_state.columns.insert(position, column.clone());
        for row in &mut table_state.rows {
            row.insert(column.name.clone(), Value::Null);
        }
        Ok(())
    }

    async fn change_column(
        &self,
        table: &str,
        column: &ColumnDefinition,
    ) -> Result<(), RepositoryError> {
        let mut state = self.state.write().await;
        let table_state = state.table_mut(table)?;
        let existing = table_state
            .columns
            .iter_mut()
            .find(|c| c.name == column.name)
            .ok_or_else(|| RepositoryError::unknown_column(table, &column.name))?;
        existing.kind = column.kind.clone();
        existing.nullable = column.nullable;

        let to_string = column.kind.is_string();
        for row in &mut table_state.rows {
            if let Some(value) = row.get_mut(&column.name) {
                if to_string && !value.is_null() && value.as_str().is_none() {
                    *value = Value::Text(value.to_key());
                }
            }
        }
        Ok(())
    }

    async fn create_table(&self, table: &TableDefinition) -> Result<(), RepositoryError> {
        let mut state = self.state.write().await;
        state
            .tables
            .entry(table.name.clone())
            .or_insert_with(|| MemoryTable::from_definition(table));
        Ok(())
    }
}

#[async_trait]
impl QueryExecutor for MemoryDatabase {
    async fn fetch_page(
        &self,
        query: &SelectQuery,
        offset: u64,
        limit: u64,
    ) -> Result<Vec<Row>, RepositoryError> {
        let mut state = self.state.write().await;
        state.counters.selects += 1;
        let scopes = evaluate(&state.tables, query)?;
        scopes
            .iter()
            .skip(offset as usize)
            .take(limit as usize)
            .map(|scope| project(scope, query))
            .collect()
    }

    async fn count(&self, query: &SelectQuery) -> Result<u64, RepositoryError> {
        let state = self.state.read().await;
        Ok(evaluate(&state.tables, query)?.len() as u64)
    }

    async fn max(&self, table: &str, column: &str) -> Result<Option<Value>, RepositoryError> {
        let state = self.state.read().await;
        let table_state = state.table(table)?;
        if table_state.column(column).is_none() {
            return Err(RepositoryError::unknown_column(table, column));
        }
        let mut max: Option<Value> = None;
        for value in table_state.rows.iter().filter_map(|row| row.get(column)) {
            if value.is_null() {
                continue;
            }
            let greater = match &max {
                None => true,
                Some(current) => value.compare(current) == Some(std::cmp::Ordering::Greater),
            };
            if greater {
                max = Some(value.clone());
            }
        }
        Ok(max)
    }

    async fn first_value(
        &self,
        table: &str,
        filters: &[Filter],
        column: &str,
        limit: u64,
    ) -> Result<Vec<Value>, RepositoryError> {
        let mut state = self.state.write().await;
        state.counters.lookups += 1;
        let table_state = state.table(table)?;
        if table_state.column(column).is_none() {
            return Err(RepositoryError::unknown_column(table, column));
        }
        let mut values = Vec::new();
        for row in &table_state.rows {
            if values.len() as u64 >= limit {
                break;
            }
            if matches_all(&scope_of(table, row), table, filters)? {
                values.push(row.get(column).cloned().unwrap_or_default());
            }
        }
        Ok(values)
    }

    async fn insert(&self, table: &str, rows: &[Row]) -> Result<u64, RepositoryError> {
        if rows.is_empty() {
            return Ok(0);
        }
        self.state
            .write()
            .await
            .insert_rows(table, rows, InsertMode::Plain)
    }

    async fn delete(&self, table: &str, filters: &[Filter]) -> Result<u64, RepositoryError> {
        let mut state = self.state.write().await;
        state.counters.deletes += 1;
        let table_state = state.table_mut(table)?;
        let mut kept = Vec::with_capacity(table_state.rows.len());
        let mut deleted = 0;
        for row in table_state.rows.drain(..) {
            if matches_all(&scope_of(table, &row), table, filters)? {
                deleted += 1;
            } else {
                kept.push(row);
            }
        }
        table_state.rows = kept;
        Ok(deleted)
    }

    async fn update(
        &self,
        table: &str,
        filters: &[Filter],
        values: &Row,
    ) -> Result<u64, RepositoryError> {
        let mut state = self.state.write().await;
        state.counters.updates += 1;
        let table_state = state.table_mut(table)?;
        for column in values.keys() {
            if table_state.column(column).is_none() {
                return Err(RepositoryError::unknown_column(table, column));
            }
        }
        let mut updated = 0;
        for row in &mut table_state.rows {
            if matches_all(&scope_of(table, row), table, filters)? {
                row.extend(values.iter().map(|(k, v)| (k.clone(), v.clone())));
                updated += 1;
            }
        }
        Ok(updated)
    }

    async fn execute_raw(&self, sql: &str) -> Result<u64, RepositoryError> {
        self.state.write().await.raw_statements.push(sql.to_string());
        Ok(0)
    }
}

#[async_trait]
impl Database for MemoryDatabase {
    async fn max_statement_bytes(&self) -> Result<u64, RepositoryError> {
        Ok(self.state.read().await.max_statement_bytes)
    }

    async fn open_write_session(&self) -> Result<Box<dyn WriteSession>, RepositoryError> {
        {
            let mut state = self.state.write().await;
            state.foreign_key_checks = false;
            state.session_log.push(SessionEvent::Opened);
        }
        Ok(Box::new(MemoryWriteSession::new(self.clone())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(values: &[(&str, Value)]) -> Row {
        values
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    async fn customers() -> MemoryDatabase {
        let db = MemoryDatabase::new();
        db.create_table(
            &TableDefinition::new("customers")
                .increments("id")
                .column(ColumnDefinition::new("name", ColumnKind::String(255)))
                .column(ColumnDefinition::new("old_id", ColumnKind::UnsignedInteger).nullable()),
        )
        .await
        .unwrap();
        db
    }

    #[tokio::test]
    async fn test_auto_increment_and_explicit_ids() {
        let db = customers().await;
        db.insert(
            "customers",
            &[
                row(&[("name", "Ada".into())]),
                row(&[("id", Value::Int(10)), ("name", "Grace".into())]),
                row(&[("name", "Linus".into())]),
            ],
        )
        .await
        .unwrap();

        let ids: Vec<Value> = db
            .rows("customers")
            .await
            .into_iter()
            .map(|r| r["id"].clone())
            .collect();
        assert_eq!(ids, vec![Value::UInt(1), Value::Int(10), Value::UInt(11)]);
    }

    #[tokio::test]
    async fn test_plain_insert_is_atomic_and_ignore_skips() {
        let db = customers().await;
        db.add_unique("customers", "old_id").await.unwrap();
        db.seed("customers", vec![row(&[("name", "Ada".into()), ("old_id", 1.into())])])
            .await
            .unwrap();

        let batch = vec![
            row(&[("name", "Grace".into()), ("old_id", 2.into())]),
            row(&[("name", "Ada again".into()), ("old_id", 1.into())]),
        ];
        let error = db.insert("customers", &batch).await.unwrap_err();
        assert!(matches!(error, RepositoryError::DuplicateKey { .. }));
        assert_eq!(db.rows("customers").await.len(), 1);

        let mut session = db.open_write_session().await.unwrap();
        let written = session
            .insert("customers", &batch, InsertMode::IgnoreDuplicates)
            .await
            .unwrap();
        session.close().await.unwrap();
        assert_eq!(written, 1);
        assert_eq!(db.rows("customers").await.len(), 2);
        assert!(db.foreign_key_checks().await);
    }

    #[tokio::test]
    async fn test_join_filter_order_and_page() {
        let db = customers().await;
        db.create_table(
            &TableDefinition::new("orders")
                .increments("id")
                .column(ColumnDefinition::new("customer", ColumnKind::Integer))
                .column(ColumnDefinition::new("total", ColumnKind::Integer)),
        )
        .await
        .unwrap();
        db.seed(
            "customers",
            vec![row(&[("name", "Ada".into())]), row(&[("name", "Grace".into())])],
        )
        .await
        .unwrap();
        db.seed(
            "orders",
            vec![
                row(&[("customer", 2.into()), ("total", 30.into())]),
                row(&[("customer", 1.into()), ("total", 10.into())]),
                row(&[("customer", 2.into()), ("total", 20.into())]),
            ],
        )
        .await
        .unwrap();

        let query = SelectQuery::table("orders")
            .select("orders.total")
            .select_as("customers.name", "customer_name")
            .join("customers", "customers.id", "orders.customer")
            .filter(Filter::eq("customers.name", "Grace"))
            .order_by("total");

        assert_eq!(db.count(&query).await.unwrap(), 2);
        let page = db.fetch_page(&query, 1, 10).await.unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(page[0]["total"], Value::Int(30));
        assert_eq!(page[0]["customer_name"], Value::from("Grace"));
    }

    #[tokio::test]
    async fn test_change_column_to_string_converts_values() {
        let db = customers().await;
        db.seed("customers", vec![row(&[("name", "Ada".into()), ("old_id", 7.into())])])
            .await
            .unwrap();
        db.change_column(
            "customers",
            &ColumnDefinition::new("old_id", ColumnKind::FixedString(40)).nullable(),
        )
        .await
        .unwrap();

        assert_eq!(db.rows("customers").await[0]["old_id"], Value::from("7"));
        assert_eq!(
            db.column_kind("customers", "old_id").await.unwrap(),
            Some(ColumnKind::FixedString(40))
        );
    }

    #[tokio::test]
    async fn test_add_column_respects_position() {
        let db = customers().await;
        db.add_column(
            "customers",
            &ColumnDefinition::new("hash", ColumnKind::FixedString(40))
                .nullable()
                .after("id"),
        )
        .await
        .unwrap();
        assert_eq!(
            db.list_columns("customers").await.unwrap(),
            vec!["id", "hash", "name", "old_id"]
        );
        assert!(db.list_columns("missing").await.unwrap().is_empty());
    }
}
