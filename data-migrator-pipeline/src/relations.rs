//! Foreign key translation between the old and new identifier spaces.
//!
//! For every chunk the resolver collects the distinct old key values each
//! relation references, looks every value up once on the target database and
//! caches the outcome per row. The cache lives for one chunk only.
use std::collections::HashMap;

use data_migrator_repository::QueryExecutor;
use data_migrator_shared::{Filter, MigrationDefinition, RelationSpec, ResolvedForeign, Row, Value};
use tracing::debug;

use crate::errors::MigrationError;

/// `(identity, related table, old key column, old key value)`.
type CacheKey = (String, String, String, String);

/// Per-chunk relation outcomes keyed by the row they belong to.
#[derive(Debug, Default)]
pub struct RelationCache {
    entries: HashMap<CacheKey, ResolvedForeign>,
}

impl RelationCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn key(identity: &Value, table: &str, old_key: &str, value: &Value) -> CacheKey {
        (
            identity.to_key(),
            table.to_string(),
            old_key.to_string(),
            value.to_key(),
        )
    }

    pub fn insert(
        &mut self,
        identity: &Value,
        table: &str,
        old_key: &str,
        value: &Value,
        resolved: ResolvedForeign,
    ) {
        self.entries
            .insert(Self::key(identity, table, old_key, value), resolved);
    }

    /// Cached outcome for one row's relation, `None` when never looked up.
    pub fn get(
        &self,
        identity: &Value,
        table: &str,
        old_key: &str,
        value: &Value,
    ) -> Option<&ResolvedForeign> {
        self.entries
            .get(&Self::key(identity, table, old_key, value))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

/// Old key values that stand for "no related row".
pub fn is_absent_reference(value: &Value) -> bool {
    value.is_null() || value.is_zero() || value.as_str() == Some("0")
}

/// Looks up the new key of the row in `table` whose `old_foreign` equals
/// `value`.
async fn lookup<E: QueryExecutor + ?Sized>(
    definition: &MigrationDefinition,
    target: &E,
    table: &str,
    relation: &RelationSpec,
    value: &Value,
) -> Result<ResolvedForeign, MigrationError> {
    let matches = target
        .first_value(
            table,
            &[Filter::eq(&relation.old_foreign, value.clone())],
            &relation.key,
            2,
        )
        .await?;

    if matches.len() > 1 && !definition.allow_duplicate_relation_keys {
        return Err(MigrationError::configuration(format!(
            "{}: more than one row of {table} has {} = {value}",
            definition.name, relation.old_foreign
        )));
    }

    Ok(match matches.into_iter().next() {
        Some(found) => ResolvedForeign::Found(found),
        None => ResolvedForeign::Unresolved,
    })
}

/// Resolves every relation of every row in `rows` into `cache`.
///
/// # Arguments
///
/// * `definition` - The migration whose relations are resolved
/// * `target` - Database holding the related new tables
/// * `identity_column` - Row key the cache entries are stored under
/// * `rows` - The chunk being migrated
/// * `cache` - Cache filled with one outcome per row and relation
///
/// # Returns
///
/// The number of lookup queries issued.
pub async fn resolve_chunk<E: QueryExecutor + ?Sized>(
    definition: &MigrationDefinition,
    target: &E,
    identity_column: &str,
    rows: &[Row],
    cache: &mut RelationCache,
) -> Result<usize, MigrationError> {
    let mut lookups = 0;
    for (table, relations) in &definition.relations {
        for relation in relations {
            // Outcomes already looked up in this chunk, by old key value.
            let mut seen: HashMap<String, ResolvedForeign> = HashMap::new();
            for row in rows {
                let identity = row.get(identity_column).cloned().unwrap_or_default();
                let value = row.get(&relation.old_key).cloned().unwrap_or_default();

                let resolved = if is_absent_reference(&value) {
                    ResolvedForeign::KnownAbsent
                } else if let Some(resolved) = seen.get(&value.to_key()) {
                    resolved.clone()
                } else {
                    let resolved = lookup(definition, target, table, relation, &value).await?;
                    lookups += 1;
                    seen.insert(value.to_key(), resolved.clone());
                    resolved
                };
                cache.insert(&identity, table, &relation.old_key, &value, resolved);
            }
        }
    }
    debug!(
        migration = %definition.name,
        lookups,
        cached = cache.len(),
        "Resolved chunk relations"
    );
    Ok(lookups)
}
