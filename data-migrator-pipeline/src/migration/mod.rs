//! One old table to new table migration.
//!
//! `migrate` runs setup, table preparation, the map integrity check, read
//! query construction, scoped clean-up and then reads the old table page by
//! page. Every page goes through identity stamping, exclusion of rows that
//! were migrated before, relation resolution and a byte-budgeted write on a
//! single write session.
mod constraints;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use data_migrator_repository::{
    Database, InsertMode, Pager, QueryExecutor, SchemaCatalog, WriteSession,
};
use data_migrator_shared::{
    GlobalConstraint, MigrationDefinition, ResolvedConstraint, Row, SelectQuery,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use crate::context::MigrationContext;
use crate::errors::MigrationError;
use crate::failed::FailedRecordLog;
use crate::guard::ExclusionGuard;
use crate::hooks::{GlobalValues, HookContext, MigrationHooks};
use crate::identity::{strategy_for, IdentityStrategy};
use crate::manager::MigrationEntry;
use crate::mapping::{static_map, ColumnMapper};
use crate::progress::ProgressReporting;
use crate::relations::{resolve_chunk, RelationCache};
use crate::review::ReviewQueue;
use crate::writer::{split_by_budget, BuiltRecord, RecordBuilder};
use constraints::{apply_constraints, base_query, qualify, truncate_scope};

/// Tag every value cached by a migration is stored under.
pub const CACHE_TAG: &str = "migration";

pub const MAX_STATEMENT_BYTES_KEY: &str = "max_statement_bytes";

const MAX_STATEMENT_BYTES_TTL: Duration = Duration::from_secs(24 * 60 * 60);

const TIMESTAMP_COLUMNS: [&str; 2] = ["created_at", "updated_at"];

/// Counts collected while a migration runs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MigrationSummary {
    /// Rows read from the old table.
    pub read: u64,
    /// Rows skipped because an earlier run migrated them.
    pub excluded: u64,
    /// Rows submitted to the new table.
    pub written: u64,
    /// Rows left out because of unresolved relations.
    pub failed: u64,
    /// New rows deleted before being migrated again.
    pub deleted: u64,
}

/// Working state derived from the live schemas during setup.
struct Setup {
    old_columns: Vec<String>,
    mapper: ColumnMapper,
    timestamp_columns: Vec<String>,
}

pub struct Migration {
    definition: MigrationDefinition,
    hooks: Arc<dyn MigrationHooks>,
    strategy: Box<dyn IdentityStrategy>,
    identity_column: String,
    context: MigrationContext,
    globals: Arc<GlobalValues>,
    global_constraints: Vec<GlobalConstraint>,
    local_constraints: Vec<ResolvedConstraint>,
    setup: Option<Setup>,
    chunk_size: usize,
    max_statement_bytes: u64,
    relation_cache: RelationCache,
    failed: FailedRecordLog,
    reviews: ReviewQueue,
    guard: ExclusionGuard,
    progress: Option<Arc<dyn ProgressReporting>>,
    test_mode: bool,
    force: bool,
    strict: bool,
    dry_run: bool,
}

impl Migration {
    /// Creates a migration for a registered entry.
    ///
    /// # Arguments
    ///
    /// * `entry` - The registered definition, hooks and hashing capability
    /// * `context` - Source and target connections plus the cache
    /// * `globals` - Run-wide global values
    /// * `global_constraints` - Constraints registered on the manager
    ///
    /// # Returns
    ///
    /// A migration ready to `migrate`, or a configuration error when the
    /// identity strategy cannot be built.
    pub fn new(
        entry: &MigrationEntry,
        context: MigrationContext,
        globals: Arc<GlobalValues>,
        global_constraints: Vec<GlobalConstraint>,
    ) -> Result<Self, MigrationError> {
        let definition = entry.definition.clone();
        let strategy = strategy_for(&definition, entry.hashing.clone())?;
        let identity_column = strategy.identity_column(&definition);
        Ok(Self {
            strict: definition.strict,
            definition,
            hooks: Arc::clone(&entry.hooks),
            strategy,
            identity_column,
            context,
            globals,
            global_constraints,
            local_constraints: Vec::new(),
            setup: None,
            chunk_size: definition_chunk_size(&entry.definition),
            max_statement_bytes: 0,
            relation_cache: RelationCache::new(),
            failed: FailedRecordLog::new(),
            reviews: ReviewQueue::new(),
            guard: ExclusionGuard::default(),
            progress: None,
            test_mode: false,
            force: false,
            dry_run: false,
        })
    }

    pub fn name(&self) -> &str {
        &self.definition.name
    }

    pub fn definition(&self) -> &MigrationDefinition {
        &self.definition
    }

    pub fn identity_column(&self) -> &str {
        &self.identity_column
    }

    /// Matching new rows are deleted and migrated again instead of skipped.
    pub fn set_test_mode(&mut self, test_mode: bool) {
        self.test_mode = test_mode;
        self.guard = ExclusionGuard::new(self.test_mode, self.dry_run);
    }

    /// Unresolved relations are written as `NULL`.
    pub fn set_force(&mut self, force: bool) {
        self.force = force;
    }

    pub fn set_strict(&mut self, strict: bool) {
        self.strict = strict;
    }

    /// Records are built and logged but never inserted.
    pub fn set_dry_run(&mut self, dry_run: bool) {
        self.dry_run = dry_run;
        self.guard = ExclusionGuard::new(self.test_mode, self.dry_run);
    }

    pub fn set_progress(&mut self, progress: Arc<dyn ProgressReporting>) {
        self.progress = Some(progress);
    }

    /// Rows per page. Sized from the placeholder limit during setup.
    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn max_statement_bytes(&self) -> u64 {
        self.max_statement_bytes
    }

    pub fn local_constraints(&self) -> &[ResolvedConstraint] {
        &self.local_constraints
    }

    pub fn reviews(&self) -> &ReviewQueue {
        &self.reviews
    }

    /// New column for `old_column`. Before setup only the definition and
    /// affix stripping are consulted.
    pub fn map(&self, old_column: &str) -> Option<String> {
        match &self.setup {
            Some(setup) => setup.mapper.map(old_column).map(str::to_string),
            None => static_map(&self.definition, old_column),
        }
    }

    /// Returns the cached value under `key`, computing and caching it on a
    /// miss. Entries are tagged so a new run starts from a clean cache.
    pub async fn cached<T, F, Fut>(
        &self,
        key: &str,
        ttl: Duration,
        compute: F,
    ) -> Result<T, MigrationError>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, MigrationError>>,
    {
        if let Some(value) = self.context.cache.get(key).await? {
            return Ok(serde_json::from_value(value)?);
        }
        let value = compute().await?;
        self.context
            .cache
            .put(key, serde_json::to_value(&value)?, ttl, &[CACHE_TAG])
            .await?;
        Ok(value)
    }

    /// Number of rows the constrained read query yields.
    pub async fn get_records_count(&self) -> Result<u64, MigrationError> {
        let mut query = base_query(&self.definition);
        apply_constraints(
            &self.definition,
            &self.global_constraints,
            self.context.target.as_ref(),
            &mut query,
        )
        .await?;
        Ok(self.context.source.count(&query).await?)
    }

    /// Runs the whole migration. Any error is fatal for this migration.
    #[instrument(skip(self), fields(migration = %self.definition.name))]
    pub async fn migrate(&mut self) -> Result<MigrationSummary, MigrationError> {
        self.guard.reset();
        self.setup().await?;

        let prepared = self
            .strategy
            .prepare_table(&self.definition, self.context.target.as_ref())
            .await?;
        if prepared {
            // The new table gained or changed a column.
            self.refresh_timestamp_columns().await?;
        }

        if self.definition.check_integrity {
            self.check_integrity().await?;
        }

        let query = self.build_read_query().await?;
        let mut summary = MigrationSummary {
            deleted: self.truncate().await?,
            ..MigrationSummary::default()
        };

        self.hooks.before_migration(&self.hook_context()).await?;

        let source = Arc::clone(&self.context.source);
        let order = query.order_by.first().cloned().unwrap_or_default();
        let mut pager = Pager::new(source.as_ref(), query, &order, self.chunk_size);
        while let Some(rows) = pager.next_page().await? {
            summary.read += rows.len() as u64;
            let chunk = self.process_chunk(rows).await;
            self.relation_cache.clear();
            let chunk = chunk?;
            summary.excluded += chunk.excluded;
            summary.written += chunk.written;
            summary.failed += chunk.failed;
            summary.deleted += chunk.deleted;
        }

        self.hooks.after_migration(&self.hook_context()).await?;

        if !self.dry_run {
            self.reviews
                .flush(
                    self.context.source.as_ref(),
                    self.context.target.as_ref(),
                    &self.definition.old_table,
                    &self.definition.new_table,
                    self.chunk_size,
                )
                .await?;
        }
        if let Some(progress) = &self.progress {
            progress.finish();
        }

        info!(
            read = summary.read,
            excluded = summary.excluded,
            written = summary.written,
            failed = summary.failed,
            "Migration completed"
        );
        Ok(summary)
    }

    fn hook_context(&self) -> HookContext<'_> {
        HookContext {
            definition: &self.definition,
            globals: &self.globals,
            reviews: &self.reviews,
            source: self.context.source.as_ref(),
            target: self.context.target.as_ref(),
        }
    }

    /// Reads the statement budget and both schemas, sizes chunks by the
    /// placeholder limit and builds the column map.
    async fn setup(&mut self) -> Result<(), MigrationError> {
        let max_statement_bytes = match self.definition.max_statement_bytes {
            Some(bytes) => bytes,
            None => {
                let target = Arc::clone(&self.context.target);
                self.cached(MAX_STATEMENT_BYTES_KEY, MAX_STATEMENT_BYTES_TTL, || async move {
                    Ok(target.max_statement_bytes().await?)
                })
                .await?
            }
        };
        self.max_statement_bytes = max_statement_bytes;

        let source = self.context.source.as_ref();
        if !source.database_exists().await? {
            return Err(MigrationError::schema_introspection(format!(
                "source database for {} does not exist",
                self.definition.name
            )));
        }
        let old_columns = source.list_columns(&self.definition.old_table).await?;
        if old_columns.is_empty() {
            return Err(MigrationError::schema_introspection(format!(
                "no columns for old table {}",
                self.definition.old_table
            )));
        }

        let new_columns = self
            .context
            .target
            .list_columns(&self.definition.new_table)
            .await?;
        if new_columns.is_empty() {
            return Err(MigrationError::schema_introspection(format!(
                "no columns for table {}",
                self.definition.new_table
            )));
        }
        self.chunk_size = placeholder_chunk_size(&self.definition, new_columns.len());

        let mapper = ColumnMapper::build(&self.definition, &old_columns, &self.identity_column);
        self.setup = Some(Setup {
            old_columns,
            mapper,
            timestamp_columns: self.timestamp_columns(&new_columns),
        });
        debug!(
            chunk_size = self.chunk_size,
            max_statement_bytes = self.max_statement_bytes,
            "Migration set up"
        );
        Ok(())
    }

    fn timestamp_columns(&self, new_columns: &[String]) -> Vec<String> {
        if !self.definition.timestamps {
            return Vec::new();
        }
        TIMESTAMP_COLUMNS
            .iter()
            .filter(|column| new_columns.iter().any(|c| c == *column))
            .map(|column| column.to_string())
            .collect()
    }

    async fn refresh_timestamp_columns(&mut self) -> Result<(), MigrationError> {
        let new_columns = self
            .context
            .target
            .list_columns(&self.definition.new_table)
            .await?;
        let timestamp_columns = self.timestamp_columns(&new_columns);
        if let Some(setup) = &mut self.setup {
            setup.timestamp_columns = timestamp_columns;
        }
        Ok(())
    }

    fn setup_state(&self) -> Result<&Setup, MigrationError> {
        self.setup.as_ref().ok_or_else(|| {
            MigrationError::configuration(format!("{} was not set up", self.definition.name))
        })
    }

    async fn check_integrity(&self) -> Result<(), MigrationError> {
        let new_columns = self
            .context
            .target
            .list_columns(&self.definition.new_table)
            .await?;
        let mismatches = self.setup_state()?.mapper.integrity_mismatches(&new_columns);
        if mismatches.is_empty() {
            return Ok(());
        }
        warn!(mismatches = mismatches.len(), "Map integrity check failed");
        Err(MigrationError::integrity(&self.definition.name, mismatches))
    }

    /// Old columns read from the old table: everything not ignored, plus
    /// whatever identity and relations need.
    fn select_columns(&self) -> Result<Vec<String>, MigrationError> {
        let setup = self.setup_state()?;
        let required = self.strategy.required_columns();
        Ok(setup
            .old_columns
            .iter()
            .filter(|column| {
                !setup.mapper.is_ignored(column)
                    || **column == self.definition.old_id
                    || required.contains(column)
                    || self
                        .definition
                        .relations
                        .values()
                        .flatten()
                        .any(|relation| &relation.old_key == *column)
            })
            .cloned()
            .collect())
    }

    async fn build_read_query(&mut self) -> Result<SelectQuery, MigrationError> {
        let mut query = base_query(&self.definition);
        self.local_constraints = apply_constraints(
            &self.definition,
            &self.global_constraints,
            self.context.target.as_ref(),
            &mut query,
        )
        .await?;
        for column in self.select_columns()? {
            query.add_select(qualify(&self.definition.old_table, &column), None);
        }
        self.hooks
            .before_query(&self.hook_context(), &mut query)
            .await?;
        Ok(query)
    }

    /// Deletes the constrained subset of the new table. Without a constraint
    /// scope nothing is deleted.
    async fn truncate(&self) -> Result<u64, MigrationError> {
        if self.dry_run {
            return Ok(0);
        }
        let scope = truncate_scope(
            &self.definition,
            &self.global_constraints,
            &self.local_constraints,
            |column| self.map(column),
        );
        let Some(filter) = scope else {
            return Ok(0);
        };
        let deleted = self
            .context
            .target
            .delete(&self.definition.new_table, &[filter])
            .await?;
        info!(deleted, "Removed constrained rows before import");
        Ok(deleted)
    }

    async fn process_chunk(&mut self, mut rows: Vec<Row>) -> Result<MigrationSummary, MigrationError> {
        let mut summary = MigrationSummary::default();
        let target = Arc::clone(&self.context.target);

        self.strategy.stamp(&mut rows)?;
        self.hooks
            .before_write(&self.hook_context(), &mut rows)
            .await?;

        let slice_size = self.chunk_size;
        let exclusion = self
            .guard
            .exclude(
                &self.definition,
                target.as_ref(),
                self.strategy.as_ref(),
                rows,
                slice_size,
            )
            .await?;
        summary.excluded = exclusion.excluded as u64;
        summary.deleted = exclusion.replaced;
        let mut rows = exclusion.rows;

        self.hooks
            .prepare_data(&self.hook_context(), &mut rows)
            .await?;
        if rows.is_empty() {
            return Ok(summary);
        }

        resolve_chunk(
            &self.definition,
            target.as_ref(),
            &self.identity_column,
            &rows,
            &mut self.relation_cache,
        )
        .await?;

        let (explicit, plain, failed) = self.build_records(&rows)?;
        summary.failed = failed;

        summary.written = if self.dry_run {
            self.log_dry_run(&explicit, &plain)
        } else {
            self.write(explicit, plain, &rows).await?
        };

        if self.dry_run {
            self.failed = FailedRecordLog::new();
        } else if !self.strict {
            self.failed.flush(target.as_ref()).await?;
        }
        Ok(summary)
    }

    /// Builds insert records, split into rows carrying their own new id and
    /// the rest. Unresolved relations abort in strict mode and are logged
    /// otherwise.
    fn build_records(&mut self, rows: &[Row]) -> Result<(Vec<Row>, Vec<Row>, u64), MigrationError> {
        let setup = self.setup_state()?;
        let builder = RecordBuilder::new(&self.definition, &setup.mapper, &self.identity_column)
            .forced(self.force)
            .with_timestamps(Utc::now().naive_utc(), setup.timestamp_columns.clone());

        let mut explicit = Vec::new();
        let mut plain = Vec::new();
        let mut unresolved = Vec::new();
        for row in rows {
            match builder.build(row, &self.relation_cache) {
                BuiltRecord::Ready {
                    record,
                    explicit_id: true,
                } => explicit.push(record),
                BuiltRecord::Ready { record, .. } => plain.push(record),
                BuiltRecord::Unresolved {
                    table,
                    column,
                    value,
                } => {
                    if self.strict {
                        return Err(MigrationError::relation_resolution(format!(
                            "{}: no row in {table} for {column} (old value {value}, {} {})",
                            self.definition.name,
                            self.identity_column,
                            row.get(&self.identity_column).cloned().unwrap_or_default()
                        )));
                    }
                    unresolved.push(row);
                }
            }
        }

        let mut failed = 0;
        for row in unresolved {
            let identity = row.get(&self.identity_column).cloned().unwrap_or_default();
            if self
                .failed
                .record(&self.definition.name, identity, row.clone())
            {
                failed += 1;
            }
        }
        Ok((explicit, plain, failed))
    }

    fn log_dry_run(&self, explicit: &[Row], plain: &[Row]) -> u64 {
        let records = explicit.len() + plain.len();
        for record in explicit.iter().chain(plain) {
            debug!(record = ?record, "Dry run record");
        }
        if let Some(progress) = &self.progress {
            progress.advance(records as u64);
        }
        records as u64
    }

    /// Writes both record lists on one write session, which is closed on
    /// every path.
    async fn write(
        &self,
        explicit: Vec<Row>,
        plain: Vec<Row>,
        data: &[Row],
    ) -> Result<u64, MigrationError> {
        if explicit.is_empty() && plain.is_empty() {
            return Ok(0);
        }
        let name = &self.definition.name;
        let mut session = self
            .context
            .target
            .open_write_session()
            .await
            .map_err(|e| MigrationError::write(name, e))?;

        let written = self
            .insert_batches(session.as_mut(), [explicit, plain], data)
            .await;
        let closed = session
            .close()
            .await
            .map_err(|e| MigrationError::write(name, e));
        let written = written?;
        closed?;
        Ok(written)
    }

    async fn insert_batches(
        &self,
        session: &mut dyn WriteSession,
        batches: [Vec<Row>; 2],
        data: &[Row],
    ) -> Result<u64, MigrationError> {
        let mut written = 0;
        for records in batches {
            if !records.is_empty() {
                written += self.insert_batch(session, records, data).await?;
            }
        }
        Ok(written)
    }

    async fn insert_batch(
        &self,
        session: &mut dyn WriteSession,
        mut records: Vec<Row>,
        data: &[Row],
    ) -> Result<u64, MigrationError> {
        let context = self.hook_context();
        self.hooks
            .before_insert(&context, &mut records, data)
            .await?;

        let mode = if self.definition.insert_ignore {
            InsertMode::IgnoreDuplicates
        } else {
            InsertMode::Plain
        };
        let after = records.clone();
        let mut submitted = 0;
        for part in split_by_budget(records, self.max_statement_bytes)? {
            session
                .insert(&self.definition.new_table, &part, mode)
                .await
                .map_err(|e| MigrationError::write(&self.definition.name, e))?;
            submitted += part.len() as u64;
            if let Some(progress) = &self.progress {
                progress.advance(part.len() as u64);
            }
        }

        self.hooks.after_insert(&context, &after, data).await?;
        Ok(submitted)
    }
}

/// Rows per page before the new table's column count is known.
fn definition_chunk_size(definition: &MigrationDefinition) -> usize {
    definition
        .chunk_size
        .unwrap_or(definition.max_placeholders)
        .max(1)
}

/// Rows per page so one insert stays within the placeholder limit, capped by
/// the configured chunk size.
fn placeholder_chunk_size(definition: &MigrationDefinition, new_columns: usize) -> usize {
    let by_placeholders = definition.max_placeholders / new_columns.max(1);
    let size = match definition.chunk_size {
        Some(limit) => by_placeholders.min(limit),
        None => by_placeholders,
    };
    size.max(1)
}
