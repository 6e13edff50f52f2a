//! Old column to new column mapping.
use data_migrator_shared::{ColumnMap, IdentityKind, MapEntry, MigrationDefinition};
use regex::Regex;

/// Derives a new column name by removing every `_<table>` and `<table>_`
/// token from an old column name. Best effort: `customer_orders_id` on
/// `orders` becomes `customer_id`.
pub fn derive_column_name(old_table: &str, column: &str) -> String {
    let table = regex::escape(old_table);
    let derived = match Regex::new(&format!("_{table}|{table}_")) {
        Ok(pattern) => pattern.replace_all(column, "").into_owned(),
        Err(_) => column.to_string(),
    };
    if derived.is_empty() {
        column.to_string()
    } else {
        derived
    }
}

/// Maps an old column without looking at the live schema: explicit entries
/// first, then the identity and relation columns, then affix stripping.
/// Under hash identity `local_old_id` holds hashes, so the old id maps to
/// nothing.
pub fn static_map(definition: &MigrationDefinition, column: &str) -> Option<String> {
    if let Some(entry) = definition.column_map.get(column) {
        return entry.target().map(str::to_string);
    }
    if column == definition.old_id {
        return match definition.identity {
            IdentityKind::Hash { .. } => None,
            IdentityKind::OldId if definition.save_old_id => {
                Some(definition.local_old_id.clone())
            }
            IdentityKind::OldId => None,
        };
    }
    let relation = definition
        .relations
        .values()
        .flatten()
        .find(|relation| relation.old_key == column);
    if let Some(relation) = relation {
        return Some(relation.foreign.clone());
    }
    Some(derive_column_name(&definition.old_table, column))
}

/// The working column map of one migration.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnMapper {
    entries: ColumnMap,
}

impl ColumnMapper {
    /// Builds the map from the definition's explicit entries, then adds
    /// `identity_column -> local_old_id` (when old ids are saved), each
    /// relation's `old_key -> foreign`, and a derived entry for every other
    /// old column. Explicit entries are never overwritten.
    pub fn build(
        definition: &MigrationDefinition,
        old_columns: &[String],
        identity_column: &str,
    ) -> Self {
        let mut entries = definition.column_map.clone();

        if definition.save_old_id {
            entries
                .entry(identity_column.to_string())
                .or_insert_with(|| MapEntry::Mapped(definition.local_old_id.clone()));
        }

        for relation in definition.relations.values().flatten() {
            entries
                .entry(relation.old_key.clone())
                .or_insert_with(|| MapEntry::Mapped(relation.foreign.clone()));
        }

        for column in old_columns {
            if column == &definition.old_id || column == identity_column {
                continue;
            }
            entries.entry(column.clone()).or_insert_with(|| {
                MapEntry::Mapped(derive_column_name(&definition.old_table, column))
            });
        }

        Self { entries }
    }

    pub fn map(&self, old_column: &str) -> Option<&str> {
        self.entries.get(old_column).and_then(MapEntry::target)
    }

    pub fn entries(&self) -> &ColumnMap {
        &self.entries
    }

    pub fn is_ignored(&self, old_column: &str) -> bool {
        matches!(self.entries.get(old_column), Some(MapEntry::Ignored))
    }

    /// Mapped `(old, new)` pairs whose new column is missing from
    /// `new_columns`. Each new column satisfies a single mapping, so two old
    /// columns aimed at the same new column are reported too. Ignored
    /// entries are skipped.
    pub fn integrity_mismatches(&self, new_columns: &[String]) -> Vec<(String, String)> {
        let mut available: Vec<&str> = new_columns.iter().map(String::as_str).collect();
        let mut mismatches = Vec::new();
        for (old, entry) in &self.entries {
            let Some(new) = entry.target() else {
                continue;
            };
            match available.iter().position(|column| *column == new) {
                Some(index) => {
                    available.swap_remove(index);
                }
                None => mismatches.push((old.clone(), new.to_string())),
            }
        }
        mismatches
    }
}
