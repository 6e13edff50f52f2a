//! Lifecycle hooks a migration can plug into.
use std::collections::BTreeMap;

use async_trait::async_trait;
use data_migrator_repository::Database;
use data_migrator_shared::{MigrationDefinition, Row, SelectQuery, Value};

use crate::errors::MigrationError;
use crate::review::ReviewQueue;

/// Run-wide key/value parameters.
pub type GlobalValues = BTreeMap<String, Value>;

/// What a hook can see and touch while a migration runs.
pub struct HookContext<'a> {
    pub definition: &'a MigrationDefinition,
    pub globals: &'a GlobalValues,
    pub reviews: &'a ReviewQueue,
    pub source: &'a dyn Database,
    pub target: &'a dyn Database,
}

impl HookContext<'_> {
    /// Global value stored under `key`, or `default`.
    pub fn global(&self, key: &str, default: Value) -> Value {
        self.globals.get(key).cloned().unwrap_or(default)
    }
}

/// Per-migration customisation points, called in pipeline order. Every hook
/// defaults to doing nothing.
#[async_trait]
pub trait MigrationHooks: Send + Sync {
    async fn before_migration(&self, _ctx: &HookContext<'_>) -> Result<(), MigrationError> {
        Ok(())
    }

    /// Adjusts the read query after constraints and select columns are set.
    async fn before_query(
        &self,
        _ctx: &HookContext<'_>,
        _query: &mut SelectQuery,
    ) -> Result<(), MigrationError> {
        Ok(())
    }

    /// Sees each chunk as read, before already migrated rows are excluded.
    async fn before_write(
        &self,
        _ctx: &HookContext<'_>,
        _rows: &mut Vec<Row>,
    ) -> Result<(), MigrationError> {
        Ok(())
    }

    /// Sees each chunk after exclusion, before relations are resolved.
    async fn prepare_data(
        &self,
        _ctx: &HookContext<'_>,
        _rows: &mut Vec<Row>,
    ) -> Result<(), MigrationError> {
        Ok(())
    }

    /// Sees the insert records of a batch next to the source rows they came
    /// from.
    async fn before_insert(
        &self,
        _ctx: &HookContext<'_>,
        _records: &mut Vec<Row>,
        _data: &[Row],
    ) -> Result<(), MigrationError> {
        Ok(())
    }

    async fn after_insert(
        &self,
        _ctx: &HookContext<'_>,
        _records: &[Row],
        _data: &[Row],
    ) -> Result<(), MigrationError> {
        Ok(())
    }

    async fn after_migration(&self, _ctx: &HookContext<'_>) -> Result<(), MigrationError> {
        Ok(())
    }
}

/// Hooks of a migration fully described by its definition.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultHooks;

impl MigrationHooks for DefaultHooks {}
