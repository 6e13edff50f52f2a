use serde::{Deserialize, Serialize};

use crate::types::value::{Row, Value};

/// A source row that was left out because one of its relations could not be
/// resolved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailedRecord {
    pub migration: String,
    pub item_id: Value,
    pub item: Row,
}

/// Fields of a migrated record that need a human to look at them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewEntry {
    pub record_id: Value,
    /// `true` for the new database, `false` for the legacy one.
    pub local: bool,
    pub fields: Vec<String>,
    pub comment: Option<String>,
}
