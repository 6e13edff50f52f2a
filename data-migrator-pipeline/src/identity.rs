//! Row identity across runs.
//!
//! A migration remembers where each new row came from in its `local_old_id`
//! column. The identity strategy decides what goes into that column: the old
//! primary key, or a content hash of selected fields for sources whose keys
//! are not stable between extractions.
use std::sync::Arc;

use async_trait::async_trait;
use data_migrator_repository::{Database, QueryExecutor, SchemaCatalog};
use data_migrator_shared::{
    ColumnDefinition, ColumnKind, Filter, IdentityKind, MigrationDefinition, Row, SelectQuery,
    Value,
};
use sha1::{Digest, Sha1};
use tracing::info;

use crate::errors::MigrationError;

/// Name of the synthetic column carrying a row's content hash.
pub const HASH_COLUMN: &str = "hash";

const REHASH_PAGE_SIZE: u64 = 5000;

/// Lowercase hex SHA-1 of the JSON array of `values`.
pub fn content_hash(values: &[Value]) -> Result<String, MigrationError> {
    let serialized = serde_json::to_vec(values)?;
    let mut hasher = Sha1::new();
    hasher.update(&serialized);
    Ok(hex::encode(hasher.finalize()))
}

/// Supplies the inputs of a row's content hash.
pub trait ContentHashing: Send + Sync {
    /// Fields hashed, in a fixed order.
    fn hash_columns(&self) -> Vec<String>;

    /// Values fed to the digest. Fields missing from the row are skipped.
    fn hash_input(&self, row: &Row) -> Vec<Value> {
        self.hash_columns()
            .iter()
            .filter_map(|column| row.get(column).cloned())
            .collect()
    }

    fn hash(&self, row: &Row) -> Result<String, MigrationError> {
        content_hash(&self.hash_input(row))
    }
}

/// Hashes the fields listed in the migration definition.
#[derive(Debug, Clone)]
pub struct DeclaredFields {
    fields: Vec<String>,
}

impl DeclaredFields {
    pub fn new(fields: Vec<String>) -> Self {
        Self { fields }
    }
}

impl ContentHashing for DeclaredFields {
    fn hash_columns(&self) -> Vec<String> {
        self.fields.clone()
    }
}

/// How rows are identified, stored and prepared for.
#[async_trait]
pub trait IdentityStrategy: Send + Sync {
    /// Row key used for exclusion, relation caching and failure bookkeeping.
    fn identity_column(&self, definition: &MigrationDefinition) -> String;

    /// Whether exclusion only considers new rows that existed before the run.
    fn snapshot_bounded(&self) -> bool;

    /// Source columns the identity needs besides the old id.
    fn required_columns(&self) -> Vec<String> {
        Vec::new()
    }

    /// Adds whatever the identity column needs to each incoming row.
    fn stamp(&self, _rows: &mut [Row]) -> Result<(), MigrationError> {
        Ok(())
    }

    /// Makes sure the new table can store the identity.
    async fn prepare_table(
        &self,
        definition: &MigrationDefinition,
        target: &dyn Database,
    ) -> Result<bool, MigrationError>;
}

/// Adds `local_old_id` as a nullable indexed column right after the new id.
async fn add_local_old_id(
    definition: &MigrationDefinition,
    target: &dyn Database,
    kind: ColumnKind,
) -> Result<(), MigrationError> {
    let column = ColumnDefinition::new(&definition.local_old_id, kind)
        .nullable()
        .indexed()
        .after(&definition.new_id);
    target.add_column(&definition.new_table, &column).await?;
    info!(
        table = %definition.new_table,
        column = %definition.local_old_id,
        "Added old id column"
    );
    Ok(())
}

/// Identity by the old table's primary key.
#[derive(Debug, Clone, Default)]
pub struct OldIdIdentity;

#[async_trait]
impl IdentityStrategy for OldIdIdentity {
    fn identity_column(&self, definition: &MigrationDefinition) -> String {
        definition.old_id.clone()
    }

    fn snapshot_bounded(&self) -> bool {
        true
    }

    async fn prepare_table(
        &self,
        definition: &MigrationDefinition,
        target: &dyn Database,
    ) -> Result<bool, MigrationError> {
        if !definition.save_old_id
            || target
                .has_column(&definition.new_table, &definition.local_old_id)
                .await?
        {
            return Ok(false);
        }
        add_local_old_id(definition, target, ColumnKind::UnsignedInteger).await?;
        Ok(true)
    }
}

/// Identity by content hash, stored as `CHAR(40)`.
pub struct HashIdentity {
    hashing: Arc<dyn ContentHashing>,
}

impl HashIdentity {
    pub fn new(hashing: Arc<dyn ContentHashing>) -> Self {
        Self { hashing }
    }

    /// Rewrites existing non-hash identities as hashes of themselves, one
    /// page at a time.
    async fn rehash_existing(
        &self,
        definition: &MigrationDefinition,
        target: &dyn Database,
    ) -> Result<u64, MigrationError> {
        let query = SelectQuery::table(&definition.new_table)
            .select(&definition.new_id)
            .select(&definition.local_old_id)
            .filter(Filter::not_null(&definition.local_old_id))
            .order_by(&definition.new_id);

        let mut offset = 0;
        let mut rehashed = 0;
        loop {
            let page = target.fetch_page(&query, offset, REHASH_PAGE_SIZE).await?;
            if page.is_empty() {
                break;
            }
            offset += page.len() as u64;
            for row in &page {
                let id = row.get(&definition.new_id).cloned().unwrap_or_default();
                let old = row.get(&definition.local_old_id).cloned().unwrap_or_default();
                let mut values = Row::new();
                values.insert(
                    definition.local_old_id.clone(),
                    Value::Text(content_hash(&[old])?),
                );
                rehashed += target
                    .update(
                        &definition.new_table,
                        &[Filter::eq(&definition.new_id, id)],
                        &values,
                    )
                    .await?;
            }
            if (page.len() as u64) < REHASH_PAGE_SIZE {
                break;
            }
        }
        Ok(rehashed)
    }
}

#[async_trait]
impl IdentityStrategy for HashIdentity {
    fn identity_column(&self, _definition: &MigrationDefinition) -> String {
        HASH_COLUMN.to_string()
    }

    fn snapshot_bounded(&self) -> bool {
        false
    }

    fn required_columns(&self) -> Vec<String> {
        self.hashing.hash_columns()
    }

    fn stamp(&self, rows: &mut [Row]) -> Result<(), MigrationError> {
        for row in rows.iter_mut() {
            let hash = self.hashing.hash(row)?;
            row.insert(HASH_COLUMN.to_string(), Value::Text(hash));
        }
        Ok(())
    }

    async fn prepare_table(
        &self,
        definition: &MigrationDefinition,
        target: &dyn Database,
    ) -> Result<bool, MigrationError> {
        if !definition.save_old_id {
            return Ok(false);
        }
        let hash_kind = ColumnKind::FixedString(40);
        match target
            .column_kind(&definition.new_table, &definition.local_old_id)
            .await?
        {
            Some(kind) if kind.is_string() => Ok(false),
            Some(_) => {
                let column = ColumnDefinition::new(&definition.local_old_id, hash_kind).nullable();
                target.change_column(&definition.new_table, &column).await?;
                let rehashed = self.rehash_existing(definition, target).await?;
                info!(
                    table = %definition.new_table,
                    rows = rehashed,
                    "Converted old id column to content hashes"
                );
                Ok(true)
            }
            None => {
                add_local_old_id(definition, target, hash_kind).await?;
                Ok(true)
            }
        }
    }
}

/// Picks the strategy a definition asks for. Hash identities use the
/// supplied hashing capability, or the definition's declared fields.
pub fn strategy_for(
    definition: &MigrationDefinition,
    hashing: Option<Arc<dyn ContentHashing>>,
) -> Result<Box<dyn IdentityStrategy>, MigrationError> {
    match &definition.identity {
        IdentityKind::OldId => Ok(Box::new(OldIdIdentity)),
        IdentityKind::Hash { fields } => {
            let hashing = match hashing {
                Some(hashing) => hashing,
                None if !fields.is_empty() => Arc::new(DeclaredFields::new(fields.clone())),
                None => {
                    return Err(MigrationError::configuration(format!(
                        "migration {} uses hash identity without hash fields",
                        definition.name
                    )))
                }
            };
            Ok(Box::new(HashIdentity::new(hashing)))
        }
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

    #[test]
    fn test_content_hash_is_stable_hex() {
        let hash = content_hash(&[Value::Int(1), Value::from("a")]).unwrap();
        assert_eq!(hash.len(), 40);
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
        assert_eq!(
            hash,
            content_hash(&[Value::Int(1), Value::from("a")]).unwrap()
        );
        assert_ne!(hash, content_hash(&[Value::from("a"), Value::Int(1)]).unwrap());
    }

    #[test]
    fn test_hash_ignores_unrelated_fields() {
        let hashing = DeclaredFields::new(vec!["email".to_string(), "name".to_string()]);
        let first = row(&[
            ("id", Value::Int(1)),
            ("email", "ada@example.com".into()),
            ("name", "Ada".into()),
            ("visits", Value::Int(3)),
        ]);
        let second = row(&[
            ("id", Value::Int(999)),
            ("email", "ada@example.com".into()),
            ("name", "Ada".into()),
            ("visits", Value::Int(42)),
        ]);
        assert_eq!(hashing.hash(&first).unwrap(), hashing.hash(&second).unwrap());

        let renamed = row(&[("email", "ada@example.com".into()), ("name", "Ada L.".into())]);
        assert_ne!(hashing.hash(&first).unwrap(), hashing.hash(&renamed).unwrap());
    }

    #[test]
    fn test_field_order_matters() {
        let forward = DeclaredFields::new(vec!["a".to_string(), "b".to_string()]);
        let backward = DeclaredFields::new(vec!["b".to_string(), "a".to_string()]);
        let data = row(&[("a", Value::Int(1)), ("b", Value::Int(2))]);
        assert_ne!(forward.hash(&data).unwrap(), backward.hash(&data).unwrap());
    }

    #[test]
    fn test_stamp_and_strategy_selection() {
        let mut definition = MigrationDefinition::new("people", "people", "people", "id");
        assert_eq!(
            strategy_for(&definition, None).unwrap().identity_column(&definition),
            "id"
        );

        definition.identity = IdentityKind::Hash { fields: Vec::new() };
        assert!(strategy_for(&definition, None).is_err());

        definition.identity = IdentityKind::Hash {
            fields: vec!["email".to_string()],
        };
        let strategy = strategy_for(&definition, None).unwrap();
        assert_eq!(strategy.identity_column(&definition), HASH_COLUMN);
        assert!(!strategy.snapshot_bounded());

        let mut rows = vec![row(&[("email", "ada@example.com".into())])];
        strategy.stamp(&mut rows).unwrap();
        assert_eq!(
            rows[0][HASH_COLUMN],
            Value::Text(content_hash(&[Value::from("ada@example.com")]).unwrap())
        );
    }
}
