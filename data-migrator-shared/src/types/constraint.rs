//! Cross-migration filters.
use serde::{Deserialize, Serialize};

use crate::types::value::Value;

/// A filter registered once and applied to every migration that can reach
/// the constrained old table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlobalConstraint {
    /// Constrained old table.
    pub table: String,
    /// Constrained old column.
    pub field: String,
    pub value: Value,
    /// The same constraint expressed in the new schema, when a migration for
    /// the constrained table is registered.
    #[serde(default)]
    pub local: Option<LocalConstraint>,
}

impl GlobalConstraint {
    /// Qualified `table.field` name of the constrained column.
    pub fn alias(&self) -> String {
        format!("{}.{}", self.table, self.field)
    }
}

/// New-schema view of a global constraint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocalConstraint {
    /// Mapped column in the new table.
    pub field: String,
    pub value: Value,
    /// New table the constrained rows were migrated into.
    pub table: String,
    /// Primary key of that new table.
    pub primary_key: String,
}

/// A local constraint whose new primary key value has been looked up,
/// recorded by a migration for its clean-up step.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedConstraint {
    pub table: String,
    pub field: String,
    pub value: Value,
}
