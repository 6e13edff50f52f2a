//! Static description of one old table to new table migration.
//!
//! Definitions are read once at start-up (usually from TOML) and stay
//! immutable; the engine derives its working column map and chunk size from
//! them during setup.
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;

use crate::types::value::Value;

/// Where an old column goes in the new table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum MapEntry {
    /// Copy the old column into the named new column.
    Mapped(String),
    /// Never migrate this column and leave it out of integrity checks.
    Ignored,
}

impl MapEntry {
    pub fn target(&self) -> Option<&str> {
        match self {
            MapEntry::Mapped(name) => Some(name.as_str()),
            MapEntry::Ignored => None,
        }
    }
}

impl<'de> Deserialize<'de> for MapEntry {
    /// Accepts a column name, or `false` to ignore the column.
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Name(String),
            Flag(bool),
        }

        match Repr::deserialize(deserializer)? {
            Repr::Name(name) => Ok(MapEntry::Mapped(name)),
            Repr::Flag(false) => Ok(MapEntry::Ignored),
            Repr::Flag(true) => Err(serde::de::Error::custom(
                "a column map entry must be a column name or `false`",
            )),
        }
    }
}

/// Old column name to [`MapEntry`].
pub type ColumnMap = BTreeMap<String, MapEntry>;

/// A foreign key that has to be translated into the new identifier space.
///
/// The row's value in `old_key` is looked up in the related table's
/// `old_foreign` column; the matching row's `key` becomes this row's
/// `foreign` value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationSpec {
    /// Foreign key column in the new table.
    pub foreign: String,
    /// Column on the related table holding the legacy identifier.
    pub old_foreign: String,
    /// Column on this migration's old table holding the legacy reference.
    pub old_key: String,
    /// Key column on the related table whose value is copied over.
    #[serde(default = "default_new_id")]
    pub key: String,
}

/// How a row is identified across runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum IdentityKind {
    /// The old table's primary key is stored in `local_old_id`.
    #[default]
    OldId,
    /// A content hash of the listed fields is stored in `local_old_id`.
    Hash {
        #[serde(default)]
        fields: Vec<String>,
    },
}

/// Everything the engine needs to know about one migration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MigrationDefinition {
    pub name: String,
    /// Optional group (priority bucket) the migration is registered under.
    #[serde(default)]
    pub group: Option<String>,
    pub old_table: String,
    pub new_table: String,
    /// Primary key of the old table.
    pub old_id: String,
    /// Primary key of the new table.
    #[serde(default = "default_new_id")]
    pub new_id: String,
    /// Column of the new table that remembers where a row came from.
    #[serde(default = "default_local_old_id")]
    pub local_old_id: String,
    #[serde(default = "default_true")]
    pub save_old_id: bool,
    #[serde(default)]
    pub column_map: ColumnMap,
    /// Values written when the mapped old value is null, keyed by new column.
    #[serde(default)]
    pub default_values: BTreeMap<String, Value>,
    /// Related table to the foreign keys pointing into it.
    #[serde(default, deserialize_with = "one_or_many")]
    pub relations: BTreeMap<String, Vec<RelationSpec>>,
    /// Old related table to the join column on this old table.
    #[serde(default)]
    pub old_relations: BTreeMap<String, String>,
    /// Related table to foreign columns that may stay null when unresolved.
    #[serde(default)]
    pub nullable_relation_columns: BTreeMap<String, Vec<String>>,
    /// Static equality filters applied to the read query.
    #[serde(default)]
    pub filters: BTreeMap<String, Value>,
    #[serde(default)]
    pub order_by: Option<String>,
    /// Upper bound on rows per page. The placeholder limit may lower it.
    #[serde(default)]
    pub chunk_size: Option<usize>,
    #[serde(default = "default_max_placeholders")]
    pub max_placeholders: usize,
    /// Overrides the statement size reported by the target database.
    #[serde(default)]
    pub max_statement_bytes: Option<u64>,
    #[serde(default = "default_true")]
    pub strict: bool,
    #[serde(default = "default_true")]
    pub check_integrity: bool,
    #[serde(default = "default_true")]
    pub timestamps: bool,
    #[serde(default)]
    pub insert_ignore: bool,
    #[serde(default)]
    pub allow_duplicate_relation_keys: bool,
    #[serde(default)]
    pub identity: IdentityKind,
}

impl MigrationDefinition {
    /// Creates a definition with every optional setting at its default.
    pub fn new(
        name: impl Into<String>,
        old_table: impl Into<String>,
        new_table: impl Into<String>,
        old_id: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            group: None,
            old_table: old_table.into(),
            new_table: new_table.into(),
            old_id: old_id.into(),
            new_id: default_new_id(),
            local_old_id: default_local_old_id(),
            save_old_id: true,
            column_map: ColumnMap::new(),
            default_values: BTreeMap::new(),
            relations: BTreeMap::new(),
            old_relations: BTreeMap::new(),
            nullable_relation_columns: BTreeMap::new(),
            filters: BTreeMap::new(),
            order_by: None,
            chunk_size: None,
            max_placeholders: default_max_placeholders(),
            max_statement_bytes: None,
            strict: true,
            check_integrity: true,
            timestamps: true,
            insert_ignore: false,
            allow_duplicate_relation_keys: false,
            identity: IdentityKind::OldId,
        }
    }

    pub fn map_column(mut self, old: impl Into<String>, new: impl Into<String>) -> Self {
        self.column_map.insert(old.into(), MapEntry::Mapped(new.into()));
        self
    }

    pub fn ignore_column(mut self, old: impl Into<String>) -> Self {
        self.column_map.insert(old.into(), MapEntry::Ignored);
        self
    }

    pub fn relation(mut self, table: impl Into<String>, relation: RelationSpec) -> Self {
        self.relations.entry(table.into()).or_default().push(relation);
        self
    }

    pub fn is_nullable_relation_column(&self, table: &str, column: &str) -> bool {
        self.nullable_relation_columns
            .get(table)
            .is_some_and(|columns| columns.iter().any(|c| c == column))
    }
}

fn default_new_id() -> String {
    "id".to_string()
}

fn default_local_old_id() -> String {
    "old_id".to_string()
}

fn default_true() -> bool {
    true
}

fn default_max_placeholders() -> usize {
    65535
}

/// Relations may be declared as a single table or as an array of tables.
fn one_or_many<'de, D>(deserializer: D) -> Result<BTreeMap<String, Vec<RelationSpec>>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(RelationSpec),
        Many(Vec<RelationSpec>),
    }

    let raw = BTreeMap::<String, OneOrMany>::deserialize(deserializer)?;
    Ok(raw
        .into_iter()
        .map(|(table, relations)| match relations {
            OneOrMany::One(relation) => (table, vec![relation]),
            OneOrMany::Many(relations) => (table, relations),
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_definition_from_toml_applies_defaults() {
        let definition: MigrationDefinition = toml::from_str(
            r#"
            name = "orders"
            old_table = "orders"
            new_table = "shop_orders"
            old_id = "id_orders"

            [column_map]
            legacy_flags = false
            order_total = "total"

            [relations.customers]
            foreign = "customer_id"
            old_foreign = "old_id"
            old_key = "customer_orders_id"

            [identity]
            strategy = "hash"
            fields = ["reference", "created"]
            "#,
        )
        .unwrap();

        assert_eq!(definition.new_id, "id");
        assert_eq!(definition.local_old_id, "old_id");
        assert!(definition.save_old_id);
        assert!(definition.strict);
        assert_eq!(definition.chunk_size, None);
        assert_eq!(definition.column_map["legacy_flags"], MapEntry::Ignored);
        assert_eq!(
            definition.column_map["order_total"],
            MapEntry::Mapped("total".to_string())
        );
        assert_eq!(definition.relations["customers"].len(), 1);
        assert_eq!(definition.relations["customers"][0].key, "id");
        assert_eq!(
            definition.identity,
            IdentityKind::Hash {
                fields: vec!["reference".to_string(), "created".to_string()]
            }
        );
    }

    #[test]
    fn test_relations_accept_arrays() {
        let definition: MigrationDefinition = toml::from_str(
            r#"
            name = "transfers"
            old_table = "transfers"
            new_table = "transfers"
            old_id = "id"

            [[relations.accounts]]
            foreign = "from_account_id"
            old_foreign = "old_id"
            old_key = "from_account"

            [[relations.accounts]]
            foreign = "to_account_id"
            old_foreign = "old_id"
            old_key = "to_account"
            "#,
        )
        .unwrap();

        assert_eq!(definition.relations["accounts"].len(), 2);
        assert_eq!(definition.identity, IdentityKind::OldId);
    }

    #[test]
    fn test_true_is_not_a_valid_map_entry() {
        let result: Result<MigrationDefinition, _> = toml::from_str(
            r#"
            name = "x"
            old_table = "x"
            new_table = "x"
            old_id = "id"

            [column_map]
            flag = true
            "#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_nullable_relation_lookup() {
        let mut definition = MigrationDefinition::new("orders", "orders", "orders", "id");
        definition
            .nullable_relation_columns
            .insert("users".to_string(), vec!["reviewer_id".to_string()]);
        assert!(definition.is_nullable_relation_column("users", "reviewer_id"));
        assert!(!definition.is_nullable_relation_column("users", "customer_id"));
        assert!(!definition.is_nullable_relation_column("customers", "reviewer_id"));
    }
}
